//! On-wire representation of 6LoWPAN fragmentation headers.
//!
//! Two fragment formats are supported:
//!
//! - [`frag`]: the classic RFC 4944 FRAG1/FRAGN headers, whose offsets are
//!   expressed in 8-byte units of the *uncompressed* datagram;
//! - [`rfrag`]: the RFC 8931 recoverable fragment (RFRAG) header and its
//!   acknowledgement (RFRAG-ACK), whose offsets are byte-exact positions in
//!   the *compressed* datagram.
//!
//! [`classify`] inspects the first byte of a frame and tells the engine which
//! parser applies.

use bytes::Buf;

pub mod frag;
pub mod ipv6;
pub mod rfrag;

pub use frag::FragHeader;
pub use ipv6::Ipv6Header;
pub use rfrag::{AckBitmap, RfragAck, RfragHeader};

/// Dispatch byte of an uncompressed IPv6 header.
pub const IPV6_DISPATCH: u8 = 0x41;

/// Mask selecting the IPHC dispatch bits.
pub const IPHC_DISPATCH_MASK: u8 = 0xe0;

/// Value of the IPHC dispatch bits after masking.
pub const IPHC_DISPATCH: u8 = 0x60;

/// Kind of 6LoWPAN frame, derived from its dispatch byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// RFC 4944 first fragment.
    Frag1,
    /// RFC 4944 subsequent fragment.
    FragN,
    /// RFC 8931 recoverable fragment.
    Rfrag,
    /// RFC 8931 fragment acknowledgement.
    RfragAck,
    /// Uncompressed IPv6 packet.
    Ipv6,
    /// IPHC-compressed IPv6 packet.
    Iphc,
    /// Anything this engine does not process.
    Other(u8),
}

/// Classify a frame by its dispatch byte.
///
/// Returns `None` for an empty frame.
///
/// # Examples
///
/// ```
/// use lowpan_frag::wire::{Dispatch, classify};
///
/// assert_eq!(classify(&[0xc4, 0xd0, 0x00, 0x01]), Some(Dispatch::Frag1));
/// assert_eq!(classify(&[0xe9, 0x01]), Some(Dispatch::Rfrag));
/// ```
#[must_use]
pub fn classify(frame: &[u8]) -> Option<Dispatch> {
    let first = *frame.first()?;
    let kind = if frag::is_frag1(first) {
        Dispatch::Frag1
    } else if frag::is_fragn(first) {
        Dispatch::FragN
    } else if rfrag::is_rfrag(first) {
        Dispatch::Rfrag
    } else if rfrag::is_rfrag_ack(first) {
        Dispatch::RfragAck
    } else if first == IPV6_DISPATCH {
        Dispatch::Ipv6
    } else if is_iphc(first) {
        Dispatch::Iphc
    } else {
        Dispatch::Other(first)
    };
    Some(kind)
}

/// Whether `byte` starts an IPHC-compressed header.
#[must_use]
pub const fn is_iphc(byte: u8) -> bool { byte & IPHC_DISPATCH_MASK == IPHC_DISPATCH }

/// Read a big-endian `u16` at `at`, or `None` if `buf` is too short.
pub(crate) fn u16_at(buf: &[u8], at: usize) -> Option<u16> {
    let mut raw = buf.get(at..at.checked_add(2)?)?;
    Some(raw.get_u16())
}

/// Round `value` down to a multiple of eight.
#[must_use]
pub const fn floor8(value: usize) -> usize { value & !0x7 }

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0xc0, Dispatch::Frag1)]
    #[case(0xc7, Dispatch::Frag1)]
    #[case(0xe0, Dispatch::FragN)]
    #[case(0xe7, Dispatch::FragN)]
    #[case(0xe8, Dispatch::Rfrag)]
    #[case(0xe9, Dispatch::Rfrag)]
    #[case(0xea, Dispatch::RfragAck)]
    #[case(0xeb, Dispatch::RfragAck)]
    #[case(0x41, Dispatch::Ipv6)]
    #[case(0x7a, Dispatch::Iphc)]
    #[case(0x01, Dispatch::Other(0x01))]
    fn dispatch_byte_selects_parser(#[case] byte: u8, #[case] expected: Dispatch) {
        assert_eq!(classify(&[byte]), Some(expected));
    }

    #[test]
    fn empty_frame_has_no_dispatch() {
        assert_eq!(classify(&[]), None);
    }
}
