//! Fragment send buffer.
//!
//! An [`FbufEntry`] holds an outgoing datagram (a cheap [`Bytes`] clone of
//! the caller's buffer) while it is being fragmented. Classic datagrams are
//! emitted in one go and the entry is released immediately afterwards.
//! Selective datagrams keep their entry until the receiver confirms every
//! fragment or the retry budget runs out; the entry then also owns the
//! retransmission window and the datagram's congestion controller.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use bytes::Bytes;

use crate::{
    Datagram,
    L2Addr,
    NetifId,
    congestion::{CongestionController, InFlight},
    error::FragError,
    pool::{Handle, Pool, PoolKind},
    wire::rfrag::short_tag,
};

/// Issues datagram tags for originated and forwarded datagrams.
#[derive(Clone, Copy, Debug)]
pub struct TagAllocator {
    next: u16,
}

impl TagAllocator {
    /// Start issuing tags at `first`.
    #[must_use]
    pub const fn starting_at(first: u16) -> Self { Self { next: first } }

    /// Issue the next tag.
    pub fn next_tag(&mut self) -> u16 {
        let tag = self.next;
        self.next = self.next.wrapping_add(1);
        tag
    }
}

impl Default for TagAllocator {
    fn default() -> Self { Self::starting_at(1) }
}

/// Lifecycle of a selective datagram on the sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendState {
    /// The window has room and fragments remain.
    Sending,
    /// Every fragment in the window was sent; waiting for an acknowledgement.
    AwaitingAck,
    /// Unconfirmed fragments are being sent again.
    Retransmitting,
    /// An abort fragment was sent; waiting for its acknowledgement.
    Aborting,
    /// The receiver confirmed every fragment.
    Done,
    /// The retry budget ran out.
    Failed,
}

/// Selective-transport part of an [`FbufEntry`].
#[derive(Debug)]
pub struct SfrSendState {
    pub(crate) window: VecDeque<InFlight>,
    pub(crate) next_seq: u8,
    pub(crate) datagram_retries: u8,
    pub(crate) arq_timeout: Duration,
    pub(crate) controller: Box<dyn CongestionController>,
    pub(crate) state: SendState,
    pub(crate) next_slot: Option<Instant>,
    pub(crate) abort_cause: Option<FragError>,
}

impl SfrSendState {
    pub(crate) fn new(
        controller: Box<dyn CongestionController>,
        datagram_retries: u8,
        arq_timeout: Duration,
    ) -> Self {
        Self {
            window: VecDeque::new(),
            next_seq: 0,
            datagram_retries,
            arq_timeout,
            controller,
            state: SendState::Sending,
            next_slot: None,
            abort_cause: None,
        }
    }

    /// Fragments sent and not yet confirmed.
    #[must_use]
    pub fn window(&self) -> &VecDeque<InFlight> { &self.window }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SendState { self.state }

    /// Whether another fragment fits the congestion window.
    pub(crate) fn in_window(&self) -> bool { self.window.len() < self.controller.window() }

    /// Whether the fragment after the next one still fits.
    pub(crate) fn next_in_window(&self) -> bool {
        self.window.len() + 1 < self.controller.window()
    }

    /// Oldest send time in the window.
    pub(crate) fn earliest_send(&self) -> Option<Instant> {
        self.window.iter().map(|f| f.send_time).min()
    }

    /// Drop every window record and restart numbering.
    pub(crate) fn reset(&mut self) {
        self.window.clear();
        self.next_seq = 0;
    }
}

/// An outgoing datagram being fragmented.
#[derive(Debug)]
pub struct FbufEntry {
    pub(crate) datagram: Datagram,
    pub(crate) tag: u16,
    pub(crate) datagram_size: usize,
    pub(crate) offset: usize,
    pub(crate) sfr: Option<SfrSendState>,
}

impl FbufEntry {
    pub(crate) fn new(datagram: Datagram, tag: u16, sfr: Option<SfrSendState>) -> Self {
        let datagram_size = datagram.datagram_size();
        Self {
            datagram,
            tag,
            datagram_size,
            offset: 0,
            sfr,
        }
    }

    /// Datagram tag.
    #[must_use]
    pub const fn tag(&self) -> u16 { self.tag }

    /// Low byte of the tag, as carried by RFRAG headers.
    #[must_use]
    pub const fn short_tag(&self) -> u8 { short_tag(self.tag) }

    /// Interface the datagram is sent on.
    #[must_use]
    pub const fn netif(&self) -> NetifId { self.datagram.netif() }

    /// Link-layer destination.
    #[must_use]
    pub const fn dst(&self) -> L2Addr { self.datagram.dst() }

    /// 6LoWPAN form of the datagram.
    #[must_use]
    pub fn payload(&self) -> &Bytes { self.datagram.payload() }

    /// Datagram size in the units of the fragment format.
    #[must_use]
    pub const fn datagram_size(&self) -> usize { self.datagram_size }

    /// Offset of the next fragment to send for the first time.
    #[must_use]
    pub const fn offset(&self) -> usize { self.offset }

    /// Selective state, if the datagram uses selective fragment recovery.
    #[must_use]
    pub const fn sfr(&self) -> Option<&SfrSendState> { self.sfr.as_ref() }
}

/// Pool of outgoing datagrams.
#[derive(Debug)]
pub struct Fbuf {
    pool: Pool<FbufEntry>,
}

impl Fbuf {
    /// Create a pool with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Pool::new(PoolKind::Fbuf, capacity),
        }
    }

    /// Store an entry.
    ///
    /// # Errors
    ///
    /// Returns [`FragError::PoolExhausted`] when no slot is free.
    pub fn alloc(&mut self, entry: FbufEntry) -> Result<Handle, FragError> {
        self.pool.insert(entry).map_err(|_| FragError::PoolExhausted {
            pool: PoolKind::Fbuf,
        })
    }

    /// Borrow the entry behind `handle`.
    #[must_use]
    pub fn entry(&self, handle: Handle) -> Option<&FbufEntry> { self.pool.get(handle) }

    pub(crate) fn entry_mut(&mut self, handle: Handle) -> Option<&mut FbufEntry> {
        self.pool.get_mut(handle)
    }

    /// Handle of the selective datagram sent to `dst` whose short tag is
    /// `tag`.
    #[must_use]
    pub fn by_short_tag(&self, dst: &L2Addr, tag: u8) -> Option<Handle> {
        self.pool
            .find(|e| e.sfr.is_some() && e.short_tag() == tag && e.dst() == *dst)
    }

    /// Release an entry.
    pub fn remove(&mut self, handle: Handle) -> Option<FbufEntry> { self.pool.remove(handle) }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize { self.pool.len() }

    /// Whether nothing is being sent.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.pool.is_empty() }
}
