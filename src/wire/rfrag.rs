//! RFC 8931 recoverable fragment headers and acknowledgements.
//!
//! ```text
//! RFRAG:     1 1 1 0 1 0 0 E | tag (8) | X | seq (5) | size (10) | offset (16)
//! RFRAG-ACK: 1 1 1 0 1 0 1 E | tag (8) | bitmap (32)
//! ```
//!
//! For sequence number 0 the offset field carries the size of the
//! compressed datagram instead of an offset. A fragment with sequence 0,
//! size 0 and offset 0 is the abort pseudo-fragment.

use std::fmt;

use bytes::BufMut;

use super::u16_at;
use crate::error::FragError;

/// Length of an RFRAG header.
pub const RFRAG_HEADER_LEN: usize = 6;
/// Length of an RFRAG-ACK frame.
pub const RFRAG_ACK_LEN: usize = 6;
/// Highest sequence number that fits the header and the bitmap.
pub const MAX_SEQ: u8 = 31;
/// Largest fragment payload the 10-bit size field can describe.
pub const MAX_FRAG_SIZE: u16 = 0x03ff;

const RFRAG_DISPATCH: u8 = 0xe8;
const RFRAG_ACK_DISPATCH: u8 = 0xea;
const DISPATCH_MASK: u8 = 0xfe;
const ECN_BIT: u8 = 0x01;
const ACK_REQ_BIT: u16 = 0x8000;
const SEQ_SHIFT: u16 = 10;
const SEQ_MASK: u16 = 0x1f;

/// RFRAG tags are eight bits wide; datagram tags are kept as `u16` and
/// truncated on the wire.
#[must_use]
#[expect(
    clippy::cast_possible_truncation,
    reason = "RFRAG carries the low byte of the datagram tag"
)]
pub const fn short_tag(tag: u16) -> u8 { (tag & 0x00ff) as u8 }

/// Whether `byte` is an RFRAG dispatch.
#[must_use]
pub const fn is_rfrag(byte: u8) -> bool { byte & DISPATCH_MASK == RFRAG_DISPATCH }

/// Whether `byte` is an RFRAG-ACK dispatch.
#[must_use]
pub const fn is_rfrag_ack(byte: u8) -> bool { byte & DISPATCH_MASK == RFRAG_ACK_DISPATCH }

/// Decoded RFRAG header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RfragHeader {
    /// Congestion-experienced mark.
    pub ecn: bool,
    /// Datagram tag.
    pub tag: u8,
    /// Whether the receiver must acknowledge this fragment.
    pub ack_req: bool,
    /// Fragment sequence number.
    pub seq: u8,
    /// Payload length in bytes.
    pub frag_size: u16,
    /// Byte offset in the compressed datagram, or its size when `seq == 0`.
    pub offset: u16,
}

impl RfragHeader {
    /// Header of a regular fragment.
    #[must_use]
    pub const fn new(tag: u8, seq: u8, frag_size: u16, offset: u16, ack_req: bool) -> Self {
        Self {
            ecn: false,
            tag,
            ack_req,
            seq,
            frag_size,
            offset,
        }
    }

    /// The abort pseudo-fragment for `tag`.
    #[must_use]
    pub const fn abort(tag: u8, ack_req: bool) -> Self { Self::new(tag, 0, 0, 0, ack_req) }

    /// Whether this is the abort pseudo-fragment.
    #[must_use]
    pub const fn is_abort(&self) -> bool { self.seq == 0 && self.frag_size == 0 && self.offset == 0 }

    /// Whether this fragment starts the datagram.
    #[must_use]
    pub const fn is_first(&self) -> bool { self.seq == 0 }

    /// Datagram size announced by a first fragment.
    #[must_use]
    pub const fn datagram_size(&self) -> Option<u16> {
        if self.seq == 0 { Some(self.offset) } else { None }
    }

    /// Parse an RFRAG header from the start of `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`FragError::MalformedFragment`] for a wrong dispatch or a
    /// truncated header.
    pub fn parse(frame: &[u8]) -> Result<(Self, usize), FragError> {
        let (Some(&dispatch), Some(&tag)) = (frame.first(), frame.get(1)) else {
            return Err(FragError::MalformedFragment("truncated RFRAG header"));
        };
        if !is_rfrag(dispatch) {
            return Err(FragError::MalformedFragment("not an RFRAG header"));
        }
        let (Some(ar_seq_fs), Some(offset)) = (u16_at(frame, 2), u16_at(frame, 4)) else {
            return Err(FragError::MalformedFragment("truncated RFRAG header"));
        };
        #[expect(
            clippy::cast_possible_truncation,
            reason = "sequence number is masked to five bits"
        )]
        let seq = ((ar_seq_fs >> SEQ_SHIFT) & SEQ_MASK) as u8;
        let header = Self {
            ecn: dispatch & ECN_BIT != 0,
            tag,
            ack_req: ar_seq_fs & ACK_REQ_BIT != 0,
            seq,
            frag_size: ar_seq_fs & MAX_FRAG_SIZE,
            offset,
        };
        Ok((header, RFRAG_HEADER_LEN))
    }

    /// Append the encoded header to `buf`.
    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(RFRAG_DISPATCH | u8::from(self.ecn));
        buf.put_u8(self.tag);
        let mut ar_seq_fs = (u16::from(self.seq) & SEQ_MASK) << SEQ_SHIFT;
        ar_seq_fs |= self.frag_size & MAX_FRAG_SIZE;
        if self.ack_req {
            ar_seq_fs |= ACK_REQ_BIT;
        }
        buf.put_u16(ar_seq_fs);
        buf.put_u16(self.offset);
    }
}

/// Bitmap of received fragment sequence numbers.
///
/// Bit `n` (counted from the most significant bit of the on-wire value)
/// marks sequence number `n`.
///
/// # Examples
///
/// ```
/// use lowpan_frag::wire::AckBitmap;
///
/// let bitmap = AckBitmap::NULL.with(0).with(2);
/// assert!(bitmap.contains(2));
/// assert!(!bitmap.contains(1));
/// assert_eq!(bitmap.bits(), 0xa000_0000);
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AckBitmap(u32);

impl AckBitmap {
    /// The empty bitmap, which signals an abort.
    pub const NULL: Self = Self(0);
    /// The full bitmap, which signals complete reception.
    pub const FULL: Self = Self(u32::MAX);

    /// Wrap raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self { Self(bits) }

    /// Raw bits as sent on the wire.
    #[must_use]
    pub const fn bits(self) -> u32 { self.0 }

    /// Copy with `seq` marked.
    #[must_use]
    pub const fn with(self, seq: u8) -> Self {
        if seq > MAX_SEQ {
            return self;
        }
        Self(self.0 | (0x8000_0000 >> seq))
    }

    /// Mark `seq` as received.
    pub fn set(&mut self, seq: u8) { *self = self.with(seq); }

    /// Whether `seq` is marked.
    #[must_use]
    pub const fn contains(self, seq: u8) -> bool {
        seq <= MAX_SEQ && self.0 & (0x8000_0000 >> seq) != 0
    }

    /// Whether this is the abort bitmap.
    #[must_use]
    pub const fn is_null(self) -> bool { self.0 == 0 }

    /// Whether this is the completion bitmap.
    #[must_use]
    pub const fn is_full(self) -> bool { self.0 == u32::MAX }
}

impl fmt::Debug for AckBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AckBitmap({:#010x})", self.0)
    }
}

/// Decoded RFRAG-ACK frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RfragAck {
    /// Echo of a congestion-experienced mark seen by the receiver.
    pub ecn: bool,
    /// Datagram tag being acknowledged.
    pub tag: u8,
    /// Received sequence numbers.
    pub bitmap: AckBitmap,
}

impl RfragAck {
    /// Acknowledgement carrying `bitmap` for `tag`.
    #[must_use]
    pub const fn new(tag: u8, bitmap: AckBitmap) -> Self {
        Self {
            ecn: false,
            tag,
            bitmap,
        }
    }

    /// The abort acknowledgement for `tag`.
    #[must_use]
    pub const fn abort(tag: u8) -> Self { Self::new(tag, AckBitmap::NULL) }

    /// Parse an RFRAG-ACK frame.
    ///
    /// # Errors
    ///
    /// Returns [`FragError::MalformedFragment`] for a wrong dispatch or a
    /// truncated frame.
    pub fn parse(frame: &[u8]) -> Result<Self, FragError> {
        let Some(raw) = frame.get(..RFRAG_ACK_LEN) else {
            return Err(FragError::MalformedFragment("truncated RFRAG-ACK"));
        };
        if !is_rfrag_ack(raw[0]) {
            return Err(FragError::MalformedFragment("not an RFRAG-ACK"));
        }
        Ok(Self {
            ecn: raw[0] & ECN_BIT != 0,
            tag: raw[1],
            bitmap: AckBitmap(u32::from_be_bytes([raw[2], raw[3], raw[4], raw[5]])),
        })
    }

    /// Append the encoded acknowledgement to `buf`.
    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(RFRAG_ACK_DISPATCH | u8::from(self.ecn));
        buf.put_u8(self.tag);
        buf.put_u32(self.bitmap.bits());
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(RfragHeader::new(0x2a, 0, 91, 193, false), [0xe8, 0x2a, 0x00, 0x5b, 0x00, 0xc1])]
    #[case(RfragHeader::new(0x2a, 1, 96, 91, false), [0xe8, 0x2a, 0x04, 0x60, 0x00, 0x5b])]
    #[case(RfragHeader::new(0x2a, 2, 6, 187, true), [0xe8, 0x2a, 0x88, 0x06, 0x00, 0xbb])]
    fn rfrag_header_matches_wire_layout(#[case] header: RfragHeader, #[case] wire: [u8; 6]) {
        let mut buf = BytesMut::new();
        header.write(&mut buf);
        assert_eq!(&buf[..], &wire);
        assert_eq!(RfragHeader::parse(&wire), Ok((header, RFRAG_HEADER_LEN)));
    }

    #[test]
    fn ecn_bit_lives_in_dispatch() {
        let (header, _) = RfragHeader::parse(&[0xe9, 1, 0x04, 0x10, 0, 16]).expect("valid");
        assert!(header.ecn);
        assert_eq!(header.seq, 1);
        assert_eq!(header.frag_size, 16);
    }

    #[test]
    fn abort_fragment_is_recognised() {
        let (header, _) = RfragHeader::parse(&[0xe8, 9, 0x80, 0, 0, 0]).expect("valid");
        assert!(header.is_abort());
        assert!(header.ack_req);
        assert!(!RfragHeader::new(9, 0, 10, 10, false).is_abort());
    }

    #[rstest]
    #[case(&[0xe8, 1, 0, 0, 0])]
    #[case(&[0xea, 1, 0, 0, 0, 0])]
    fn parse_rejects_bad_rfrag(#[case] raw: &[u8]) {
        assert!(matches!(
            RfragHeader::parse(raw),
            Err(FragError::MalformedFragment(_))
        ));
    }

    #[test]
    fn ack_encodes_bitmap_msb_first() {
        let ack = RfragAck::new(0x2a, AckBitmap::NULL.with(2));
        let mut buf = BytesMut::new();
        ack.write(&mut buf);
        assert_eq!(&buf[..], &[0xea, 0x2a, 0x20, 0, 0, 0]);
        assert_eq!(RfragAck::parse(&buf), Ok(ack));
    }

    #[test]
    fn bitmap_ignores_out_of_range_sequence() {
        let bitmap = AckBitmap::NULL.with(32);
        assert!(bitmap.is_null());
        assert!(!AckBitmap::FULL.contains(40));
        assert!(AckBitmap::FULL.contains(31));
    }
}
