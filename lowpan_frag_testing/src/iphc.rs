//! Toy header compression and IPv6 packet builders.
//!
//! The toy format stands in for IPHC: `[dispatch, hop limit, low byte of the
//! destination, payload length (2 bytes), pad length, pad...]`. Padding lets
//! tests pick how much smaller than 40 bytes the compressed header is, and
//! how much it grows when a forwarder recompresses it.

use std::net::Ipv6Addr;

use lowpan_frag::{Decompressed, HeaderCompressor, NotCompressible, Recompressed};

/// Dispatch byte of the toy header; falls in the IPHC dispatch range.
pub const TOY_DISPATCH: u8 = 0x7a;

/// Length of the toy header without padding.
pub const TOY_HEADER_LEN: usize = 6;

const IPV6_HEADER_LEN: usize = 40;

/// Destination `fd00::<low>` used by toy headers.
pub fn toy_dst(low: u8) -> Ipv6Addr { Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, u16::from(low)) }

/// Uncompressed IPv6 header from `::1` to `dst`.
pub fn ipv6_header(payload_len: u16, hop_limit: u8, dst: Ipv6Addr) -> Vec<u8> {
    let mut raw = vec![0_u8; IPV6_HEADER_LEN];
    raw[0] = 0x60;
    raw[4..6].copy_from_slice(&payload_len.to_be_bytes());
    raw[6] = 17;
    raw[7] = hop_limit;
    raw[8..24].copy_from_slice(&Ipv6Addr::LOCALHOST.octets());
    raw[24..40].copy_from_slice(&dst.octets());
    raw
}

/// Complete IPv6 packet carrying `payload`.
pub fn ipv6_packet(hop_limit: u8, dst: Ipv6Addr, payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(payload.len()).expect("test payload fits an IPv6 packet");
    let mut raw = ipv6_header(len, hop_limit, dst);
    raw.extend_from_slice(payload);
    raw
}

/// Header compressor speaking the toy format.
///
/// `growth` padding bytes are added whenever a first fragment is
/// recompressed for the next hop.
#[derive(Clone, Copy, Debug, Default)]
pub struct ToyCompressor {
    pub growth: u8,
}

impl ToyCompressor {
    /// Compressed form of a packet to `toy_dst(dst_low)` carrying `payload`,
    /// with `pad` bytes of header padding.
    pub fn compress(hop_limit: u8, dst_low: u8, pad: u8, payload: &[u8]) -> Vec<u8> {
        let len = u16::try_from(payload.len()).expect("test payload fits an IPv6 packet");
        let mut raw = vec![TOY_DISPATCH, hop_limit, dst_low];
        raw.extend_from_slice(&len.to_be_bytes());
        raw.push(pad);
        raw.resize(TOY_HEADER_LEN + usize::from(pad), 0);
        raw.extend_from_slice(payload);
        raw
    }

    /// Uncompressed size of a packet built by [`ToyCompressor::compress`].
    pub fn uncompressed_size(payload_len: usize) -> usize { IPV6_HEADER_LEN + payload_len }
}

fn toy_head(raw: &[u8]) -> Result<&[u8], NotCompressible> {
    let head = raw.get(..TOY_HEADER_LEN).ok_or(NotCompressible)?;
    if head[0] == TOY_DISPATCH {
        Ok(head)
    } else {
        Err(NotCompressible)
    }
}

impl HeaderCompressor for ToyCompressor {
    fn decompress(&self, raw: &[u8]) -> Result<Decompressed, NotCompressible> {
        let head = toy_head(raw)?;
        let payload_len = u16::from_be_bytes([head[3], head[4]]);
        Ok(Decompressed {
            header: ipv6_header(payload_len, head[1], toy_dst(head[2])),
            consumed: TOY_HEADER_LEN + usize::from(head[5]),
        })
    }

    fn recompress_first_fragment(
        &self,
        raw: &[u8],
        hop_limit: u8,
    ) -> Result<Recompressed, NotCompressible> {
        let head = toy_head(raw)?;
        let pad = head[5];
        let grown = pad.checked_add(self.growth).ok_or(NotCompressible)?;
        let mut header = vec![TOY_DISPATCH, hop_limit, head[2], head[3], head[4], grown];
        header.resize(TOY_HEADER_LEN + usize::from(grown), 0);
        Ok(Recompressed {
            header,
            consumed: TOY_HEADER_LEN + usize::from(pad),
        })
    }
}
