//! Recording network interface.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use lowpan_frag::{L2Addr, LinkError, NetInterface, NetifId};

/// A frame handed to a [`MockNetif`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentFrame {
    /// Link-layer destination.
    pub dst: L2Addr,
    /// Frame bytes, starting at the 6LoWPAN dispatch.
    pub frame: Bytes,
}

#[derive(Debug, Default)]
struct Radio {
    sent: Vec<SentFrame>,
    failures: VecDeque<LinkError>,
}

/// Interface that records frames instead of transmitting them.
#[derive(Debug)]
pub struct MockNetif {
    id: NetifId,
    addr: L2Addr,
    max_frame: usize,
    radio: Arc<Mutex<Radio>>,
}

/// Test-side view of a [`MockNetif`] after it moved into an engine.
#[derive(Clone, Debug)]
pub struct NetifHandle {
    id: NetifId,
    addr: L2Addr,
    radio: Arc<Mutex<Radio>>,
}

fn lock(radio: &Mutex<Radio>) -> MutexGuard<'_, Radio> {
    radio.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockNetif {
    /// Create interface `id` with short address `addr`.
    pub fn new(id: u16, addr: u16, max_frame: usize) -> (Self, NetifHandle) {
        let radio = Arc::new(Mutex::new(Radio::default()));
        let netif = Self {
            id: NetifId::new(id),
            addr: L2Addr::short(addr),
            max_frame,
            radio: Arc::clone(&radio),
        };
        let handle = NetifHandle {
            id: netif.id,
            addr: netif.addr,
            radio,
        };
        (netif, handle)
    }
}

impl NetInterface for MockNetif {
    fn id(&self) -> NetifId { self.id }

    fn l2addr(&self) -> L2Addr { self.addr }

    fn max_frame_size(&self) -> usize { self.max_frame }

    fn send(&mut self, dst: &L2Addr, frame: Bytes) -> Result<usize, LinkError> {
        let mut radio = lock(&self.radio);
        if let Some(err) = radio.failures.pop_front() {
            return Err(err);
        }
        let len = frame.len();
        radio.sent.push(SentFrame { dst: *dst, frame });
        Ok(len)
    }
}

impl NetifHandle {
    /// Interface identifier.
    pub fn id(&self) -> NetifId { self.id }

    /// Link-layer address of the interface.
    pub fn addr(&self) -> L2Addr { self.addr }

    /// Copy of every frame sent so far and not yet taken.
    pub fn frames(&self) -> Vec<SentFrame> { lock(&self.radio).sent.clone() }

    /// Remove and return every recorded frame.
    pub fn take_frames(&self) -> Vec<SentFrame> { std::mem::take(&mut lock(&self.radio).sent) }

    /// Remove and return the frames addressed to `dst`.
    pub fn take_frames_to(&self, dst: L2Addr) -> Vec<SentFrame> {
        let mut radio = lock(&self.radio);
        let (taken, kept) = std::mem::take(&mut radio.sent)
            .into_iter()
            .partition(|sent| sent.dst == dst);
        radio.sent = kept;
        taken
    }

    /// Make the next send fail with `err`.
    pub fn fail_next(&self, err: LinkError) { lock(&self.radio).failures.push_back(err); }

    /// Make the next `count` sends fail with `err`.
    pub fn fail_next_n(&self, count: usize, err: LinkError) {
        lock(&self.radio)
            .failures
            .extend(std::iter::repeat_n(err, count));
    }
}
