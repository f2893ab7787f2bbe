//! Paced transmission queue.
//!
//! Selective senders space their fragments by the controller's inter-frame
//! gap. Frames that are not due yet wait here, ordered by due time, until
//! [`FragEngine::poll`](super::FragEngine::poll) or a transmit completion
//! drains them. The queue length doubles as the congestion signal for
//! relayed fragments.

use std::{collections::VecDeque, time::Instant};

use bytes::Bytes;

use crate::{L2Addr, NetifId, pool::Handle};

/// A frame waiting for its slot.
#[derive(Clone, Debug)]
pub(crate) struct QueuedFrame {
    pub(crate) due: Instant,
    pub(crate) netif: NetifId,
    pub(crate) dst: L2Addr,
    pub(crate) frame: Bytes,
    pub(crate) owner: Handle,
}

/// Bounded queue of paced frames.
#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<QueuedFrame>,
    capacity: usize,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of waiting frames.
    #[must_use]
    pub fn len(&self) -> usize { self.frames.len() }

    /// Whether no frame is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.frames.is_empty() }

    /// Whether another frame would be rejected.
    #[must_use]
    pub fn is_full(&self) -> bool { self.frames.len() >= self.capacity }

    /// Due time of the earliest frame.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> { self.frames.front().map(|f| f.due) }

    /// Enqueue `frame`, handing it back when the queue is full.
    pub(crate) fn push(&mut self, frame: QueuedFrame) -> Result<(), QueuedFrame> {
        if self.is_full() {
            return Err(frame);
        }
        let at = self.frames.partition_point(|queued| queued.due <= frame.due);
        self.frames.insert(at, frame);
        Ok(())
    }

    /// Remove and return every frame due at or before `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<QueuedFrame> {
        let due = self.frames.partition_point(|queued| queued.due <= now);
        self.frames.drain(..due).collect()
    }

    /// Drop every frame of a released datagram.
    pub(crate) fn remove_owner(&mut self, owner: Handle) {
        self.frames.retain(|queued| queued.owner != owner);
    }
}
