//! Header-compression collaborator.
//!
//! The engine only needs to know where the compressed header ends and what
//! it expands to. Compression itself lives behind [`HeaderCompressor`].

use thiserror::Error;

/// The bytes do not start with a header the compressor understands.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("header is not compressible")]
pub struct NotCompressible;

/// A compressed header expanded to its uncompressed form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decompressed {
    /// Uncompressed IPv6 header (and any uncompressed next headers).
    pub header: Vec<u8>,
    /// Bytes of the input consumed by the compressed header.
    pub consumed: usize,
}

/// A first-fragment header compressed again for the next hop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recompressed {
    /// New compressed header bytes, dispatch included.
    pub header: Vec<u8>,
    /// Bytes of the original compressed header that `header` replaces.
    pub consumed: usize,
}

impl Recompressed {
    /// Growth of the header on this hop; negative when it shrank.
    #[must_use]
    pub fn size_delta(&self) -> isize {
        let grown = isize::try_from(self.header.len()).unwrap_or(isize::MAX);
        let replaced = isize::try_from(self.consumed).unwrap_or(isize::MAX);
        grown - replaced
    }
}

/// IPHC codec.
pub trait HeaderCompressor: Send {
    /// Expand the compressed header at the start of `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`NotCompressible`] when `raw` does not start with a header
    /// this codec handles.
    fn decompress(&self, raw: &[u8]) -> Result<Decompressed, NotCompressible>;

    /// Compress the header at the start of `raw` again for the next hop,
    /// writing `hop_limit` into it.
    ///
    /// # Errors
    ///
    /// Returns [`NotCompressible`] when `raw` does not start with a header
    /// this codec handles.
    fn recompress_first_fragment(
        &self,
        raw: &[u8],
        hop_limit: u8,
    ) -> Result<Recompressed, NotCompressible>;
}
