#![cfg(test)]
//! Test-only collaborators for unit tests of the buffers.

use std::{
    net::Ipv6Addr,
    sync::{Arc, Mutex},
};

use bytes::Bytes;

use crate::{
    L2Addr,
    NetifId,
    error::LinkError,
    iphc::{Decompressed, HeaderCompressor, NotCompressible, Recompressed},
    netif::NetInterface,
    route::{NextHop, NoRoute, RouteTable},
    wire::ipv6::build_header,
};

/// Frames captured by a [`TestNetif`].
pub type SentLog = Arc<Mutex<Vec<(L2Addr, Bytes)>>>;

/// Interface recording every frame it is asked to send.
#[derive(Debug)]
pub struct TestNetif {
    id: NetifId,
    addr: L2Addr,
    max_frame: usize,
    sent: SentLog,
    fail_with: Option<LinkError>,
}

impl TestNetif {
    pub fn new(id: u16, max_frame: usize) -> (Self, SentLog) {
        let sent = SentLog::default();
        let netif = Self {
            id: NetifId::new(id),
            addr: L2Addr::short(id),
            max_frame,
            sent: Arc::clone(&sent),
            fail_with: None,
        };
        (netif, sent)
    }

    /// Interface rejecting every frame with `err`.
    pub fn failing(id: u16, max_frame: usize, err: LinkError) -> Self {
        let (mut netif, _) = Self::new(id, max_frame);
        netif.fail_with = Some(err);
        netif
    }
}

impl NetInterface for TestNetif {
    fn id(&self) -> NetifId { self.id }

    fn l2addr(&self) -> L2Addr { self.addr }

    fn max_frame_size(&self) -> usize { self.max_frame }

    fn send(&mut self, dst: &L2Addr, frame: Bytes) -> Result<usize, LinkError> {
        if let Some(err) = self.fail_with {
            return Err(err);
        }
        let len = frame.len();
        self.sent.lock().expect("sent log poisoned").push((*dst, frame));
        Ok(len)
    }
}

/// Route table sending everything to one next hop.
#[derive(Clone, Copy, Debug)]
pub struct OneHop(pub NextHop);

impl RouteTable for OneHop {
    fn resolve_next_hop(&self, _dst: &Ipv6Addr) -> Result<NextHop, NoRoute> { Ok(self.0) }
}

/// Dispatch byte of the toy compressed header.
pub const TOY_DISPATCH: u8 = 0x7a;

/// Length of the toy header without padding.
pub const TOY_HEADER_LEN: usize = 6;

/// Stand-in for IPHC: `[dispatch, hop limit, dst low byte, payload length
/// (2 bytes), pad length, pad...]`, expanding to a 40-byte IPv6 header.
///
/// `growth` padding bytes are added whenever a header is recompressed.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToyCompressor {
    pub growth: u8,
}

impl ToyCompressor {
    /// Compressed form of a datagram with `payload` after the IPv6 header.
    pub fn compress(hop_limit: u8, dst_low: u8, payload: &[u8]) -> Vec<u8> {
        let len = u16::try_from(payload.len()).expect("test payload fits");
        let mut raw = vec![TOY_DISPATCH, hop_limit, dst_low];
        raw.extend_from_slice(&len.to_be_bytes());
        raw.push(0);
        raw.extend_from_slice(payload);
        raw
    }
}

fn toy_dst(low: u8) -> Ipv6Addr { Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, u16::from(low)) }

impl HeaderCompressor for ToyCompressor {
    fn decompress(&self, raw: &[u8]) -> Result<Decompressed, NotCompressible> {
        let head = raw.get(..TOY_HEADER_LEN).ok_or(NotCompressible)?;
        if head[0] != TOY_DISPATCH {
            return Err(NotCompressible);
        }
        let payload_len = u16::from_be_bytes([head[3], head[4]]);
        Ok(Decompressed {
            header: build_header(payload_len, head[1], Ipv6Addr::LOCALHOST, toy_dst(head[2])),
            consumed: TOY_HEADER_LEN + usize::from(head[5]),
        })
    }

    fn recompress_first_fragment(
        &self,
        raw: &[u8],
        hop_limit: u8,
    ) -> Result<Recompressed, NotCompressible> {
        let head = raw.get(..TOY_HEADER_LEN).ok_or(NotCompressible)?;
        if head[0] != TOY_DISPATCH {
            return Err(NotCompressible);
        }
        let pad = head[5];
        let mut header = vec![TOY_DISPATCH, hop_limit, head[2], head[3], head[4], pad + self.growth];
        header.resize(TOY_HEADER_LEN + usize::from(pad + self.growth), 0);
        Ok(Recompressed {
            header,
            consumed: TOY_HEADER_LEN + usize::from(pad),
        })
    }
}
