//! Congestion controller that records the engine's reports.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use lowpan_frag::{CongestionController, InFlight};

/// Totals of the reports a [`RecordingController`] received.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerCalls {
    pub sent: usize,
    pub discarded: usize,
    pub lost: Vec<u8>,
    pub timed_out: Vec<u8>,
    pub acked: Vec<u8>,
    pub ecn: usize,
}

/// Shared view of the reports of one or more controllers.
#[derive(Clone, Debug, Default)]
pub struct ControllerLog {
    calls: Arc<Mutex<ControllerCalls>>,
}

impl ControllerLog {
    /// Snapshot of the reports so far.
    pub fn calls(&self) -> ControllerCalls {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, f: impl FnOnce(&mut ControllerCalls)) {
        f(&mut self.calls.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Fixed-window controller that logs every report.
#[derive(Debug)]
pub struct RecordingController {
    window: usize,
    gap: Duration,
    log: ControllerLog,
}

impl RecordingController {
    pub fn new(window: usize, gap: Duration, log: ControllerLog) -> Self {
        Self {
            window: window.max(1),
            gap,
            log,
        }
    }
}

fn seqs(fragments: &[InFlight]) -> impl Iterator<Item = u8> + '_ { fragments.iter().map(|f| f.seq) }

impl CongestionController for RecordingController {
    fn window(&self) -> usize { self.window }

    fn inter_frame_gap(&self) -> Duration { self.gap }

    fn report_sent(&mut self, count: usize) { self.log.record(|c| c.sent += count); }

    fn report_discarded(&mut self, count: usize) { self.log.record(|c| c.discarded += count); }

    fn report_lost(&mut self, lost: &[InFlight]) { self.log.record(|c| c.lost.extend(seqs(lost))); }

    fn report_timed_out(&mut self, timed_out: &[InFlight]) {
        self.log.record(|c| c.timed_out.extend(seqs(timed_out)));
    }

    fn report_acked(&mut self, fragment: &InFlight, _now: Instant) {
        self.log.record(|c| c.acked.push(fragment.seq));
    }

    fn report_ecn(&mut self, _earliest: Instant) { self.log.record(|c| c.ecn += 1); }
}

/// Factory handing every datagram a [`RecordingController`] sharing one log.
pub fn recording_factory(
    window: usize,
    gap: Duration,
) -> (
    impl FnMut(u16) -> Option<Box<dyn CongestionController>> + Send + 'static,
    ControllerLog,
) {
    let log = ControllerLog::default();
    let shared = log.clone();
    let factory = move |_tag: u16| -> Option<Box<dyn CongestionController>> {
        Some(Box::new(RecordingController::new(window, gap, shared.clone())))
    };
    (factory, log)
}
