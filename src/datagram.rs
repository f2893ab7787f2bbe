//! Datagrams exchanged with the upper (IPv6) layer.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{DatagramKey, L2Addr, NetifId, error::FragError, wire::IPV6_DISPATCH};

/// An outgoing IPv6 datagram in its 6LoWPAN form.
///
/// The payload starts with a dispatch byte: either the uncompressed IPv6
/// dispatch or an IPHC header produced by the compressor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    netif: NetifId,
    dst: L2Addr,
    payload: Bytes,
    datagram_size: usize,
}

impl Datagram {
    /// Wrap an uncompressed IPv6 packet, prefixing the IPv6 dispatch.
    #[must_use]
    pub fn uncompressed(netif: NetifId, dst: L2Addr, ipv6: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(ipv6.len() + 1);
        payload.put_u8(IPV6_DISPATCH);
        payload.put_slice(ipv6);
        Self {
            netif,
            dst,
            payload: payload.freeze(),
            datagram_size: ipv6.len(),
        }
    }

    /// Wrap an IPHC-compressed packet whose uncompressed size is
    /// `datagram_size`.
    #[must_use]
    pub fn compressed(netif: NetifId, dst: L2Addr, payload: Bytes, datagram_size: usize) -> Self {
        Self {
            netif,
            dst,
            payload,
            datagram_size,
        }
    }

    /// Interface to send on.
    #[must_use]
    pub const fn netif(&self) -> NetifId { self.netif }

    /// Link-layer destination.
    #[must_use]
    pub const fn dst(&self) -> L2Addr { self.dst }

    /// 6LoWPAN form of the datagram.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// Size of the uncompressed IPv6 datagram.
    #[must_use]
    pub const fn datagram_size(&self) -> usize { self.datagram_size }
}

/// A datagram reassembled from fragments, as an uncompressed IPv6 packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReassembledDatagram {
    key: DatagramKey,
    netif: NetifId,
    payload: Bytes,
}

impl ReassembledDatagram {
    /// Construct a new [`ReassembledDatagram`].
    #[must_use]
    pub fn new(key: DatagramKey, netif: NetifId, payload: Bytes) -> Self {
        Self {
            key,
            netif,
            payload,
        }
    }

    /// Identity shared by the fragments that formed this datagram.
    #[must_use]
    pub const fn key(&self) -> DatagramKey { self.key }

    /// Interface the fragments arrived on.
    #[must_use]
    pub const fn netif(&self) -> NetifId { self.netif }

    /// Borrow the IPv6 packet.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Consume the datagram, returning the packet bytes.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }
}

/// The IPv6 layer above the fragmentation engine.
pub trait UpperLayer: Send {
    /// Called once per fully reassembled datagram.
    fn deliver(&mut self, datagram: ReassembledDatagram);

    /// Called when an acknowledged transmission finishes, successfully or
    /// not. Classic fragmentation reports nothing here.
    fn send_completed(&mut self, _tag: u16, _result: Result<(), FragError>) {}
}

/// Upper layer that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardUpper;

impl UpperLayer for DiscardUpper {
    fn deliver(&mut self, datagram: ReassembledDatagram) {
        log::debug!("discarding reassembled datagram {}", datagram.key());
    }
}
