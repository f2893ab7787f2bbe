//! Deadlines keyed by generation-tagged pool handles.
//!
//! Timers are plain records in a queue; firing one hands its [`Handle`] back
//! to the engine, which resolves it against the pool. An entry destroyed and
//! reused in the meantime has a new generation, so the old timer resolves to
//! nothing and is ignored.

use std::time::Instant;

use crate::pool::Handle;

/// Why a timer was armed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Acknowledgement wait of an SFR datagram.
    Arq,
    /// Release of a forwarding entry after its final acknowledgement.
    VrbRelease,
}

/// A timer that reached its deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expired {
    /// Entry the timer belongs to.
    pub handle: Handle,
    /// What the timer was for.
    pub kind: TimerKind,
    /// When it was due.
    pub deadline: Instant,
}

#[derive(Clone, Copy, Debug)]
struct Armed {
    deadline: Instant,
    handle: Handle,
    kind: TimerKind,
}

/// Queue of armed timers.
#[derive(Debug, Default)]
pub struct Timers {
    armed: Vec<Armed>,
}

impl Timers {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Arm a timer, replacing any timer of the same kind for `handle`.
    pub fn schedule(&mut self, handle: Handle, kind: TimerKind, deadline: Instant) {
        self.cancel_kind(handle, kind);
        self.armed.push(Armed {
            deadline,
            handle,
            kind,
        });
    }

    /// Deadline of the timer of `kind` for `handle`, if armed.
    #[must_use]
    pub fn deadline(&self, handle: Handle, kind: TimerKind) -> Option<Instant> {
        self.armed
            .iter()
            .find(|armed| armed.handle == handle && armed.kind == kind)
            .map(|armed| armed.deadline)
    }

    /// Disarm the timer of `kind` for `handle`.
    pub fn cancel_kind(&mut self, handle: Handle, kind: TimerKind) {
        self.armed
            .retain(|armed| !(armed.handle == handle && armed.kind == kind));
    }

    /// Disarm every timer for `handle`.
    pub fn cancel(&mut self, handle: Handle) { self.armed.retain(|armed| armed.handle != handle); }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> { self.armed.iter().map(|a| a.deadline).min() }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<Expired> {
        let mut expired: Vec<Expired> = self
            .armed
            .iter()
            .filter(|armed| armed.deadline <= now)
            .map(|armed| Expired {
                handle: armed.handle,
                kind: armed.kind,
                deadline: armed.deadline,
            })
            .collect();
        self.armed.retain(|armed| armed.deadline > now);
        expired.sort_by_key(|e| e.deadline);
        expired
    }

    /// Number of armed timers.
    #[must_use]
    pub fn len(&self) -> usize { self.armed.len() }

    /// Whether no timer is armed.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.armed.is_empty() }
}
