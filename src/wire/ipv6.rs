//! Read-only view of an uncompressed IPv6 header.
//!
//! The engine never builds IPv6 headers; it only needs the destination for
//! route lookup, the hop limit for forwarding, and the payload length to
//! size reassembly targets.

use std::net::Ipv6Addr;

use super::u16_at;
use crate::error::FragError;

/// Length of the fixed IPv6 header.
pub const IPV6_HEADER_LEN: usize = 40;

/// Offset of the hop-limit byte within the header.
pub const HOP_LIMIT_OFFSET: usize = 7;

/// Fields of an IPv6 header relevant to fragmentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv6Header {
    /// Length of the payload following the fixed header.
    pub payload_len: u16,
    /// Remaining hop count.
    pub hop_limit: u8,
    /// Source address.
    pub src: Ipv6Addr,
    /// Destination address.
    pub dst: Ipv6Addr,
}

impl Ipv6Header {
    /// Parse the fixed header at the start of `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`FragError::MalformedFragment`] when `raw` is shorter than
    /// [`IPV6_HEADER_LEN`] or the version nibble is not 6.
    pub fn parse(raw: &[u8]) -> Result<Self, FragError> {
        let Some(fixed) = raw.get(..IPV6_HEADER_LEN) else {
            return Err(FragError::MalformedFragment("truncated IPv6 header"));
        };
        if fixed[0] >> 4 != 6 {
            return Err(FragError::MalformedFragment("not an IPv6 header"));
        }
        let payload_len = u16_at(fixed, 4).unwrap_or_default();
        Ok(Self {
            payload_len,
            hop_limit: fixed[HOP_LIMIT_OFFSET],
            src: address_at(fixed, 8),
            dst: address_at(fixed, 24),
        })
    }

    /// Size of the whole datagram described by this header.
    #[must_use]
    pub fn datagram_size(&self) -> usize { IPV6_HEADER_LEN + usize::from(self.payload_len) }
}

fn address_at(fixed: &[u8], at: usize) -> Ipv6Addr {
    let mut octets = [0_u8; 16];
    octets.copy_from_slice(&fixed[at..at + 16]);
    Ipv6Addr::from(octets)
}

/// Minimal IPv6 header encoder used to build test datagrams.
#[cfg(test)]
pub(crate) fn build_header(payload_len: u16, hop_limit: u8, src: Ipv6Addr, dst: Ipv6Addr) -> Vec<u8> {
    let mut raw = vec![0_u8; IPV6_HEADER_LEN];
    raw[0] = 0x60;
    raw[4..6].copy_from_slice(&payload_len.to_be_bytes());
    raw[6] = 17;
    raw[HOP_LIMIT_OFFSET] = hop_limit;
    raw[8..24].copy_from_slice(&src.octets());
    raw[24..40].copy_from_slice(&dst.octets());
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_routing_fields() {
        let dst: Ipv6Addr = "2001:db8::2".parse().expect("address");
        let raw = build_header(158, 64, Ipv6Addr::LOCALHOST, dst);
        let header = Ipv6Header::parse(&raw).expect("valid header");
        assert_eq!(header.dst, dst);
        assert_eq!(header.hop_limit, 64);
        assert_eq!(header.datagram_size(), 198);
    }

    #[test]
    fn parse_rejects_short_or_wrong_version() {
        assert!(Ipv6Header::parse(&[0x60; 39]).is_err());
        let mut raw = build_header(0, 1, Ipv6Addr::LOCALHOST, Ipv6Addr::LOCALHOST);
        raw[0] = 0x40;
        assert_eq!(
            Ipv6Header::parse(&raw),
            Err(FragError::MalformedFragment("not an IPv6 header"))
        );
    }
}
