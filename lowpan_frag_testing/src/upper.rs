//! Upper layer that records what the engine hands it.

use std::sync::{Arc, Mutex, PoisonError};

use lowpan_frag::{FragError, ReassembledDatagram, UpperLayer};

#[derive(Debug, Default)]
struct Records {
    delivered: Vec<ReassembledDatagram>,
    completed: Vec<(u16, Result<(), FragError>)>,
}

/// Records delivered datagrams and send outcomes.
#[derive(Debug, Default)]
pub struct RecordingUpper {
    records: Arc<Mutex<Records>>,
}

/// Test-side view of a [`RecordingUpper`].
#[derive(Clone, Debug, Default)]
pub struct UpperLog {
    records: Arc<Mutex<Records>>,
}

impl RecordingUpper {
    pub fn new() -> (Self, UpperLog) {
        let records = Arc::new(Mutex::new(Records::default()));
        let log = UpperLog {
            records: Arc::clone(&records),
        };
        (Self { records }, log)
    }
}

impl UpperLayer for RecordingUpper {
    fn deliver(&mut self, datagram: ReassembledDatagram) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .delivered
            .push(datagram);
    }

    fn send_completed(&mut self, tag: u16, result: Result<(), FragError>) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .completed
            .push((tag, result));
    }
}

impl UpperLog {
    /// Datagrams delivered so far.
    pub fn delivered(&self) -> Vec<ReassembledDatagram> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .delivered
            .clone()
    }

    /// Selective send outcomes reported so far, by tag.
    pub fn completed(&self) -> Vec<(u16, Result<(), FragError>)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .completed
            .clone()
    }
}
