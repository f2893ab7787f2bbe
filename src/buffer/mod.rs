//! Per-datagram state pools.
//!
//! - [`Rbuf`]: reassembly at the final destination;
//! - [`Vrb`]: forwarding state at intermediate routers;
//! - [`Fbuf`]: outgoing datagrams on the originating node.
//!
//! Each pool is a fixed-capacity [`Pool`](crate::pool::Pool) addressed by
//! generational handles and reports exhaustion as
//! [`FragError::PoolExhausted`](crate::FragError::PoolExhausted).

pub mod fbuf;
pub mod rbuf;
pub mod vrb;

pub use fbuf::{Fbuf, FbufEntry, SendState, SfrSendState, TagAllocator};
pub use rbuf::{CompletedReassembly, Rbuf, RbufEntry, ReassemblyStatus, StaleReassembly};
pub use vrb::{
    ForwardFragment,
    ForwardOutcome,
    FromRouteError,
    InboundHeader,
    StaleForward,
    Vrb,
    VrbEntry,
};

/// Fragment format a datagram travels with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    /// RFC 4944 FRAG1/FRAGN.
    Classic,
    /// RFC 8931 RFRAG.
    Selective,
}

#[cfg(test)]
mod tests;
