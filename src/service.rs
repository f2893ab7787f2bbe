//! Tokio driver for a [`FragEngine`].
//!
//! The engine itself is synchronous. [`FragService`] shares it behind a
//! mutex and runs a background task that sleeps until the engine's next
//! deadline, then polls it. Calls that may move the deadline earlier wake
//! the task so the new timer is honoured.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use tokio::{sync::Notify, time::sleep_until};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    datagram::Datagram,
    engine::{Disposition, FragEngine, SendOutcome},
    error::FragError,
    netif::LinkEvent,
};

type SharedEngine = Arc<Mutex<FragEngine>>;

fn lock(engine: &SharedEngine) -> MutexGuard<'_, FragEngine> {
    // A panic inside a collaborator leaves the pools consistent; keep going.
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now() -> Instant { tokio::time::Instant::now().into_std() }

/// A [`FragEngine`] driven by a tokio task.
///
/// Must be created inside a tokio runtime.
///
/// ```no_run
/// use lowpan_frag::{FragConfig, FragEngine, FragService};
///
/// # async fn run() {
/// let engine = FragEngine::builder(FragConfig::selective()).build();
/// let service = FragService::spawn(engine);
/// // feed `service.handle_event(..)` from the radio driver
/// service.shutdown().await;
/// # }
/// ```
#[derive(Debug)]
pub struct FragService {
    engine: SharedEngine,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl FragService {
    /// Move `engine` into a new service and start its timer task.
    #[must_use]
    pub fn spawn(engine: FragEngine) -> Self {
        let engine = Arc::new(Mutex::new(engine));
        let wake = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(drive(
            Arc::clone(&engine),
            Arc::clone(&wake),
            shutdown.clone(),
        ));
        tracker.close();
        Self {
            engine,
            wake,
            shutdown,
            tracker,
        }
    }

    /// Send a datagram; see [`FragEngine::send_datagram`].
    ///
    /// # Errors
    ///
    /// Returns the engine's error when the datagram could not be sent.
    pub fn send(&self, datagram: Datagram) -> Result<SendOutcome, FragError> {
        let result = lock(&self.engine).send_datagram(datagram, now());
        self.wake.notify_one();
        result
    }

    /// Dispatch an interface event; see [`FragEngine::handle_event`].
    ///
    /// # Errors
    ///
    /// Returns the reason a received fragment was dropped.
    pub fn handle_event(&self, event: &LinkEvent) -> Result<Disposition, FragError> {
        let result = lock(&self.engine).handle_event(event, now());
        self.wake.notify_one();
        result
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut FragEngine) -> R) -> R {
        let result = f(&mut lock(&self.engine));
        self.wake.notify_one();
        result
    }

    /// Stop the timer task and wait for it to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.tracker.wait().await;
    }
}

impl Drop for FragService {
    fn drop(&mut self) { self.shutdown.cancel(); }
}

#[tracing::instrument(level = "debug", skip_all)]
async fn drive(engine: SharedEngine, wake: Arc<Notify>, shutdown: CancellationToken) {
    loop {
        let deadline = lock(&engine).next_deadline();
        let timer = async move {
            match deadline {
                Some(at) => sleep_until(tokio::time::Instant::from_std(at)).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;

            () = shutdown.cancelled() => break,
            () = wake.notified() => {}
            () = timer => {}
        }
        lock(&engine).poll(now());
    }
    tracing::debug!("fragmentation service stopped");
}
