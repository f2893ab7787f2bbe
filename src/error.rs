//! Error types surfaced by the fragmentation engine.
//!
//! [`FragError`] is the single taxonomy shared by the buffers and both
//! engines. Most variants describe a problem local to one fragment and are
//! handled by dropping that fragment; only [`FragError::RetryBudgetExhausted`],
//! [`FragError::Aborted`] and [`FragError::StaleEntry`] terminate a whole
//! datagram.

use thiserror::Error;

use crate::{NetifId, pool::PoolKind};

/// Failure reported by a [`NetInterface`](crate::NetInterface) while sending.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The interface could not allocate a buffer for the outgoing frame.
    #[error("no buffer available for outgoing frame")]
    NoBuffer,
    /// The frame exceeds what the device accepts.
    #[error("frame of {size} bytes exceeds device limit")]
    FrameTooLarge { size: usize },
    /// The device rejected or failed to transmit the frame.
    #[error("transmission failed")]
    TxFailed,
}

/// Errors produced by the fragmentation engine.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FragError {
    /// A fixed-capacity pool has no free slot.
    #[error("{pool} pool exhausted")]
    PoolExhausted { pool: PoolKind },
    /// No next hop exists for the datagram's destination.
    #[error("no route to destination")]
    NoRoute,
    /// A fragment header is truncated or carries invalid fields.
    #[error("malformed fragment: {0}")]
    MalformedFragment(&'static str),
    /// A fragment partially overlaps data already received.
    #[error("fragment overlaps previously received data")]
    Overlap,
    /// A fragment repeats data already received.
    #[error("duplicate fragment")]
    DuplicateFragment,
    /// Building the outgoing frame failed for lack of buffer space.
    #[error("could not allocate outgoing frame")]
    AllocationFailure,
    /// The sender gave up after exhausting its retransmission budget.
    #[error("retry budget exhausted for datagram tag {tag}")]
    RetryBudgetExhausted { tag: u16 },
    /// The peer aborted the datagram with a null acknowledgement bitmap.
    #[error("datagram tag {tag} aborted by peer")]
    Aborted { tag: u16 },
    /// A non-first fragment arrived for a datagram without local state.
    #[error("no state for datagram tag {tag}")]
    UnknownDatagram { tag: u16 },
    /// An entry was discarded after its lifetime elapsed.
    #[error("entry timed out")]
    StaleEntry,
    /// The datagram cannot be represented by the selected fragment format.
    #[error("datagram of {size} bytes exceeds limit of {limit}")]
    DatagramTooLarge { size: usize, limit: usize },
    /// A rewritten fragment no longer fits into one outgoing frame.
    #[error("frame of {size} bytes exceeds maximum frame size {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    /// No interface with the given identifier is attached.
    #[error("unknown interface {0}")]
    UnknownInterface(NetifId),
    /// The interface reported a transmission failure.
    #[error("link error: {0}")]
    Link(#[from] LinkError),
}

impl FragError {
    /// Whether the error ends the life of a whole datagram rather than a
    /// single fragment.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RetryBudgetExhausted { .. } | Self::Aborted { .. } | Self::StaleEntry
        )
    }
}

/// Map interface failures onto the engine taxonomy.
///
/// Buffer exhaustion while building a frame becomes
/// [`FragError::AllocationFailure`]; everything else stays a link error.
pub(crate) fn from_link(err: LinkError) -> FragError {
    match err {
        LinkError::NoBuffer => FragError::AllocationFailure,
        other => FragError::Link(other),
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = FragError> = std::result::Result<T, E>;
