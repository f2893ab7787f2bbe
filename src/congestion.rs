//! Congestion-control hooks for selective fragment recovery.
//!
//! Every SFR datagram owns one [`CongestionController`] for the lifetime of
//! its transmission. The engine reports what happens to fragments; the
//! controller answers with the window (fragments in flight) and the spacing
//! between consecutive fragments. Reports never influence protocol
//! correctness, only pacing.
//!
//! [`FixedWindow`] is used when no [`ControllerFactory`] is installed.
//! [`RenoController`] is a small additive-increase, multiplicative-decrease
//! controller for deployments that want the window to react to loss.

use std::{
    fmt,
    time::{Duration, Instant},
};

/// Snapshot of one in-flight fragment handed to controller callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InFlight {
    /// Sequence number.
    pub seq: u8,
    /// Byte offset in the compressed datagram.
    pub offset: u16,
    /// Payload length.
    pub size: u16,
    /// Time of the most recent (re)transmission.
    pub send_time: Instant,
    /// Retransmissions so far.
    pub resends: u8,
    /// Whether the most recent transmission requested an acknowledgement.
    pub ack_req: bool,
}

/// Per-datagram congestion controller.
pub trait CongestionController: Send + fmt::Debug {
    /// Current congestion window in fragments. Must be at least 1.
    fn window(&self) -> usize;

    /// Spacing to keep between consecutive fragments.
    fn inter_frame_gap(&self) -> Duration { Duration::ZERO }

    /// `count` fragments were put on the link.
    fn report_sent(&mut self, _count: usize) {}

    /// `count` fragments were dropped before being sent.
    fn report_discarded(&mut self, _count: usize) {}

    /// An acknowledgement showed these fragments missing.
    fn report_lost(&mut self, _lost: &[InFlight]) {}

    /// The acknowledgement timer expired with these fragments unconfirmed.
    fn report_timed_out(&mut self, _timed_out: &[InFlight]) {}

    /// `fragment` was confirmed by an acknowledgement received at `now`.
    fn report_acked(&mut self, _fragment: &InFlight, _now: Instant) {}

    /// An acknowledgement echoed a congestion-experienced mark; `earliest`
    /// is the oldest send time still in the window.
    fn report_ecn(&mut self, _earliest: Instant) {}
}

/// Produces a controller for each new SFR datagram.
pub trait ControllerFactory: Send {
    /// Controller for the datagram with `tag`, or `None` to fall back to a
    /// [`FixedWindow`].
    fn create(&mut self, tag: u16) -> Option<Box<dyn CongestionController>>;
}

impl<F> ControllerFactory for F
where
    F: FnMut(u16) -> Option<Box<dyn CongestionController>> + Send,
{
    fn create(&mut self, tag: u16) -> Option<Box<dyn CongestionController>> { self(tag) }
}

/// Controller with a constant window that ignores every report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedWindow {
    window: usize,
    gap: Duration,
}

impl FixedWindow {
    /// Create a controller with the given window and spacing.
    #[must_use]
    pub fn new(window: usize, gap: Duration) -> Self {
        Self {
            window: window.max(1),
            gap,
        }
    }
}

impl CongestionController for FixedWindow {
    fn window(&self) -> usize { self.window }

    fn inter_frame_gap(&self) -> Duration { self.gap }
}

/// Additive-increase, multiplicative-decrease window.
///
/// The window grows by one fragment per acknowledged fragment below the
/// slow-start threshold and by one per full window above it. Loss and ECN
/// halve the window, at most once per round trip; a timeout resets it to
/// one fragment.
#[derive(Clone, Debug)]
pub struct RenoController {
    cwnd: usize,
    ssthresh: usize,
    max_window: usize,
    acked_in_round: usize,
    recovery_until: Option<Instant>,
    gap: Duration,
}

impl RenoController {
    /// Start with `initial` fragments, never exceeding `max_window`.
    #[must_use]
    pub fn new(initial: usize, max_window: usize, gap: Duration) -> Self {
        let max_window = max_window.max(1);
        Self {
            cwnd: initial.clamp(1, max_window),
            ssthresh: max_window,
            max_window,
            acked_in_round: 0,
            recovery_until: None,
            gap,
        }
    }

    /// Slow-start threshold.
    #[must_use]
    pub const fn ssthresh(&self) -> usize { self.ssthresh }

    fn halve(&mut self, now: Instant) {
        self.ssthresh = (self.cwnd / 2).max(1);
        self.cwnd = self.ssthresh;
        self.acked_in_round = 0;
        self.recovery_until = Some(now);
    }

    fn in_recovery(&self, sent: Instant) -> bool {
        self.recovery_until.is_some_and(|mark| sent <= mark)
    }
}

impl CongestionController for RenoController {
    fn window(&self) -> usize { self.cwnd }

    fn inter_frame_gap(&self) -> Duration { self.gap }

    fn report_lost(&mut self, lost: &[InFlight]) {
        let Some(latest) = lost.iter().map(|f| f.send_time).max() else {
            return;
        };
        if !self.in_recovery(latest) {
            self.halve(latest);
        }
    }

    fn report_timed_out(&mut self, timed_out: &[InFlight]) {
        let Some(latest) = timed_out.iter().map(|f| f.send_time).max() else {
            return;
        };
        self.ssthresh = (self.cwnd / 2).max(1);
        self.cwnd = 1;
        self.acked_in_round = 0;
        self.recovery_until = Some(latest);
    }

    fn report_acked(&mut self, fragment: &InFlight, _now: Instant) {
        if self.in_recovery(fragment.send_time) {
            return;
        }
        if self.cwnd < self.ssthresh {
            self.cwnd += 1;
        } else {
            self.acked_in_round += 1;
            if self.acked_in_round >= self.cwnd {
                self.acked_in_round = 0;
                self.cwnd += 1;
            }
        }
        self.cwnd = self.cwnd.min(self.max_window);
    }

    fn report_ecn(&mut self, earliest: Instant) {
        if !self.in_recovery(earliest) {
            self.halve(earliest);
        }
    }
}
