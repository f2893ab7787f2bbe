//! Link-layer identifiers used to key fragmentation state.
//!
//! IEEE 802.15.4 links address nodes with either a 16-bit short address or
//! a 64-bit extended address. [`L2Addr`] stores both inline so that pool
//! entries stay fixed-size and `Copy`.

use std::fmt;

use derive_more::{Display, From};

/// Longest link-layer address the engine understands (EUI-64).
pub const MAX_L2ADDR_LEN: usize = 8;

/// A link-layer address of up to [`MAX_L2ADDR_LEN`] bytes.
///
/// # Examples
///
/// ```
/// use lowpan_frag::L2Addr;
///
/// let addr = L2Addr::short(0xbeef);
/// assert_eq!(addr.as_bytes(), &[0xbe, 0xef]);
/// assert_eq!(addr.to_string(), "be:ef");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct L2Addr {
    len: u8,
    bytes: [u8; MAX_L2ADDR_LEN],
}

impl L2Addr {
    /// Build an address from raw bytes.
    ///
    /// Returns `None` when `bytes` is empty or longer than
    /// [`MAX_L2ADDR_LEN`].
    #[must_use]
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MAX_L2ADDR_LEN {
            return None;
        }
        let mut inline = [0_u8; MAX_L2ADDR_LEN];
        inline[..bytes.len()].copy_from_slice(bytes);
        let len = u8::try_from(bytes.len()).ok()?;
        Some(Self { len, bytes: inline })
    }

    /// A 16-bit short address in network byte order.
    #[must_use]
    pub fn short(value: u16) -> Self {
        let [hi, lo] = value.to_be_bytes();
        let mut bytes = [0_u8; MAX_L2ADDR_LEN];
        bytes[0] = hi;
        bytes[1] = lo;
        Self { len: 2, bytes }
    }

    /// A 64-bit extended address.
    #[must_use]
    pub const fn long(bytes: [u8; MAX_L2ADDR_LEN]) -> Self {
        Self {
            len: 8,
            bytes,
        }
    }

    /// Borrow the significant address bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.bytes[..usize::from(self.len)] }

    /// Number of significant bytes.
    #[must_use]
    pub const fn len(&self) -> usize { self.len as usize }

    /// Addresses are never empty; provided for API symmetry.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.len == 0 }
}

impl fmt::Display for L2Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for L2Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "L2Addr({self})") }
}

/// Identifier of a network interface attached to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From)]
#[display("netif{_0}")]
pub struct NetifId(u16);

impl NetifId {
    /// Create a new identifier.
    #[must_use]
    pub const fn new(value: u16) -> Self { Self(value) }

    /// Return the inner numeric identifier.
    #[must_use]
    pub const fn get(self) -> u16 { self.0 }
}

/// Identity of one fragmented datagram as seen by a receiver.
///
/// The tag is chosen by the originator (or by the previous forwarder) and is
/// only unique per source/destination pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display("{src}->{dst}#{tag}")]
pub struct DatagramKey {
    /// Link-layer sender of the fragments.
    pub src: L2Addr,
    /// Link-layer receiver of the fragments.
    pub dst: L2Addr,
    /// Datagram tag carried by every fragment.
    pub tag: u16,
}

impl DatagramKey {
    /// Construct a key from its parts.
    #[must_use]
    pub const fn new(src: L2Addr, dst: L2Addr, tag: u16) -> Self { Self { src, dst, tag } }
}
