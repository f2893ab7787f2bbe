//! RFC 4944 fragmentation headers.
//!
//! ```text
//! FRAG1: 1 1 0 0 0 | datagram_size (11) | datagram_tag (16)
//! FRAGN: 1 1 1 0 0 | datagram_size (11) | datagram_tag (16) | offset (8)
//! ```
//!
//! `datagram_size` is the size of the uncompressed IPv6 datagram and the
//! FRAGN offset counts 8-byte units of that uncompressed datagram.

use bytes::BufMut;

use super::u16_at;
use crate::error::FragError;

/// Length of a FRAG1 header.
pub const FRAG1_HEADER_LEN: usize = 4;
/// Length of a FRAGN header.
pub const FRAGN_HEADER_LEN: usize = 5;

const FRAG1_DISPATCH: u8 = 0xc0;
const FRAGN_DISPATCH: u8 = 0xe0;
const DISPATCH_MASK: u8 = 0xf8;
const SIZE_MASK: u16 = 0x07ff;

/// Largest datagram a FRAG header can describe.
pub const MAX_DATAGRAM_SIZE: usize = SIZE_MASK as usize;

/// Whether `byte` is a FRAG1 dispatch.
#[must_use]
pub const fn is_frag1(byte: u8) -> bool { byte & DISPATCH_MASK == FRAG1_DISPATCH }

/// Whether `byte` is a FRAGN dispatch.
#[must_use]
pub const fn is_fragn(byte: u8) -> bool { byte & DISPATCH_MASK == FRAGN_DISPATCH }

/// Decoded FRAG1 or FRAGN header.
///
/// # Examples
///
/// ```
/// use lowpan_frag::wire::FragHeader;
///
/// let (header, len) = FragHeader::parse(&[0xe4, 0xd0, 0x00, 0x07, 0x96]).expect("valid");
/// assert_eq!(len, 5);
/// assert_eq!(header.datagram_size(), 1232);
/// assert_eq!(header.tag(), 7);
/// assert_eq!(header.offset(), 1200);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragHeader {
    datagram_size: u16,
    tag: u16,
    offset: u16,
    first: bool,
}

impl FragHeader {
    /// Header of the first fragment.
    #[must_use]
    pub const fn first(datagram_size: u16, tag: u16) -> Self {
        Self {
            datagram_size,
            tag,
            offset: 0,
            first: true,
        }
    }

    /// Header of a subsequent fragment; `offset` is in bytes and must be a
    /// multiple of eight.
    #[must_use]
    pub const fn subsequent(datagram_size: u16, tag: u16, offset: u16) -> Self {
        Self {
            datagram_size,
            tag,
            offset,
            first: false,
        }
    }

    /// Uncompressed datagram size.
    #[must_use]
    pub const fn datagram_size(&self) -> u16 { self.datagram_size }

    /// Datagram tag.
    #[must_use]
    pub const fn tag(&self) -> u16 { self.tag }

    /// Byte offset of the payload in the uncompressed datagram.
    #[must_use]
    pub const fn offset(&self) -> u16 { self.offset }

    /// Whether this is a FRAG1 header.
    #[must_use]
    pub const fn is_first(&self) -> bool { self.first }

    /// Copy of the header carrying a different tag.
    #[must_use]
    pub const fn with_tag(mut self, tag: u16) -> Self {
        self.tag = tag;
        self
    }

    /// Encoded header length.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        if self.first {
            FRAG1_HEADER_LEN
        } else {
            FRAGN_HEADER_LEN
        }
    }

    /// Parse a FRAG1 or FRAGN header from the start of `frame`.
    ///
    /// Returns the header and its encoded length.
    ///
    /// # Errors
    ///
    /// Returns [`FragError::MalformedFragment`] for a wrong dispatch, a
    /// truncated header or a zero datagram size.
    pub fn parse(frame: &[u8]) -> Result<(Self, usize), FragError> {
        let Some(&dispatch) = frame.first() else {
            return Err(FragError::MalformedFragment("empty frame"));
        };
        let first = if is_frag1(dispatch) {
            true
        } else if is_fragn(dispatch) {
            false
        } else {
            return Err(FragError::MalformedFragment("not a FRAG header"));
        };
        let (Some(size_field), Some(tag)) = (u16_at(frame, 0), u16_at(frame, 2)) else {
            return Err(FragError::MalformedFragment("truncated FRAG header"));
        };
        let datagram_size = size_field & SIZE_MASK;
        if datagram_size == 0 {
            return Err(FragError::MalformedFragment("zero datagram size"));
        }
        let offset = if first {
            0
        } else {
            let Some(&units) = frame.get(4) else {
                return Err(FragError::MalformedFragment("truncated FRAGN header"));
            };
            u16::from(units) * 8
        };
        let header = Self {
            datagram_size,
            tag,
            offset,
            first,
        };
        Ok((header, header.encoded_len()))
    }

    /// Append the encoded header to `buf`.
    pub fn write(&self, buf: &mut impl BufMut) {
        let dispatch = if self.first {
            FRAG1_DISPATCH
        } else {
            FRAGN_DISPATCH
        };
        let [size_hi, size_lo] = (self.datagram_size & SIZE_MASK).to_be_bytes();
        buf.put_u8(dispatch | size_hi);
        buf.put_u8(size_lo);
        buf.put_u16(self.tag);
        if !self.first {
            // offsets beyond 2040 cannot occur for an 11-bit datagram size
            buf.put_u8(u8::try_from(self.offset / 8).unwrap_or(u8::MAX));
        }
    }
}
