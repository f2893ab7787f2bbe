//! Reassembly buffer.
//!
//! An [`RbufEntry`] owns a zeroed target buffer sized to the declared
//! datagram size. Fragment payloads are copied to their offsets, and an
//! [`IntervalSet`] records which bytes have arrived. The entry completes when
//! the set covers the whole datagram; it is destroyed without delivery when
//! it outlives the reassembly timeout.
//!
//! For the selective transport the entry also keeps a bitmap of received
//! sequence numbers. The bitmap only feeds acknowledgements and is updated
//! independently of payload placement.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use super::Transport;
use crate::{
    DatagramKey,
    FragConfig,
    NetifId,
    error::FragError,
    interval::{Insertion, IntervalSet},
    pool::{Handle, Pool, PoolKind},
    wire::AckBitmap,
};

/// Result of adding a fragment to an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReassemblyStatus {
    /// The datagram is now complete.
    Complete,
    /// More fragments are needed.
    Incomplete,
    /// The fragment repeated received bytes and was ignored.
    Duplicate,
    /// The fragment partially overlapped received bytes and was ignored.
    Overlap,
}

/// In-progress reassembly of one datagram.
#[derive(Debug)]
pub struct RbufEntry {
    key: DatagramKey,
    netif: NetifId,
    transport: Transport,
    datagram_size: usize,
    buffer: BytesMut,
    intervals: IntervalSet,
    received: AckBitmap,
    ecn: bool,
    arrival: Instant,
}

impl RbufEntry {
    /// Identity of the datagram.
    #[must_use]
    pub const fn key(&self) -> DatagramKey { self.key }

    /// Interface the fragments arrive on.
    #[must_use]
    pub const fn netif(&self) -> NetifId { self.netif }

    /// Fragment format of the datagram.
    #[must_use]
    pub const fn transport(&self) -> Transport { self.transport }

    /// Declared datagram size.
    #[must_use]
    pub const fn datagram_size(&self) -> usize { self.datagram_size }

    /// Bytes received so far.
    #[must_use]
    pub fn received_bytes(&self) -> usize { self.intervals.covered() }

    /// Sequence numbers received so far.
    #[must_use]
    pub const fn received(&self) -> AckBitmap { self.received }

    /// Time of the most recent fragment.
    #[must_use]
    pub const fn arrival(&self) -> Instant { self.arrival }
}

/// A datagram whose fragments have all arrived.
#[derive(Debug)]
pub struct CompletedReassembly {
    /// Identity of the datagram.
    pub key: DatagramKey,
    /// Interface the fragments arrived on.
    pub netif: NetifId,
    /// Fragment format used.
    pub transport: Transport,
    /// The reassembled bytes.
    pub payload: Bytes,
}

/// An entry discarded on timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaleReassembly {
    /// Identity of the datagram.
    pub key: DatagramKey,
    /// Interface the fragments arrived on.
    pub netif: NetifId,
    /// Fragment format used.
    pub transport: Transport,
}

/// Pool of reassembly entries.
#[derive(Debug)]
pub struct Rbuf {
    pool: Pool<RbufEntry>,
    timeout: Duration,
    holdoff: Duration,
    max_intervals: usize,
    completed: Vec<(DatagramKey, Instant)>,
}

impl Rbuf {
    /// Create a pool sized by `config`.
    #[must_use]
    pub fn new(config: &FragConfig) -> Self {
        Self {
            pool: Pool::new(PoolKind::Rbuf, config.rbuf_size),
            timeout: config.reassembly_timeout,
            holdoff: config.reuse_holdoff,
            max_intervals: config.max_intervals,
            completed: Vec::new(),
        }
    }

    /// Handle of the entry for `key`.
    #[must_use]
    pub fn get(&self, key: &DatagramKey) -> Option<Handle> { self.pool.find(|e| e.key == *key) }

    /// Borrow the entry behind `handle`.
    #[must_use]
    pub fn entry(&self, handle: Handle) -> Option<&RbufEntry> { self.pool.get(handle) }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize { self.pool.len() }

    /// Whether no reassembly is in progress.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.pool.is_empty() }

    /// Return the entry for `key`, creating it if necessary.
    ///
    /// An existing entry announcing a different size belongs to an older
    /// datagram that reused the tag; it is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`FragError::MalformedFragment`] for a zero size and
    /// [`FragError::PoolExhausted`] when no slot is free.
    pub fn start_or_get(
        &mut self,
        key: DatagramKey,
        total_size: usize,
        netif: NetifId,
        transport: Transport,
        now: Instant,
    ) -> Result<Handle, FragError> {
        if total_size == 0 {
            return Err(FragError::MalformedFragment("zero datagram size"));
        }
        if let Some(handle) = self.get(&key) {
            match self.pool.get(handle) {
                Some(entry) if entry.datagram_size == total_size => return Ok(handle),
                _ => {
                    log::debug!("rbuf: size of {key} changed, discarding old entry");
                    self.pool.remove(handle);
                }
            }
        }
        let entry = RbufEntry {
            key,
            netif,
            transport,
            datagram_size: total_size,
            buffer: BytesMut::zeroed(total_size),
            intervals: IntervalSet::new(self.max_intervals),
            received: AckBitmap::NULL,
            ecn: false,
            arrival: now,
        };
        self.pool.insert(entry).map_err(|_| FragError::PoolExhausted {
            pool: PoolKind::Rbuf,
        })
    }

    /// Copy `payload` to `offset` in the entry's buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FragError::StaleEntry`] for a dead handle,
    /// [`FragError::MalformedFragment`] when the fragment exceeds the
    /// declared size, and [`FragError::PoolExhausted`] when the entry cannot
    /// track another disjoint range.
    pub fn insert_fragment(
        &mut self,
        handle: Handle,
        offset: usize,
        payload: &[u8],
        now: Instant,
    ) -> Result<ReassemblyStatus, FragError> {
        let entry = self.pool.get_mut(handle).ok_or(FragError::StaleEntry)?;
        let end = offset + payload.len();
        if end > entry.datagram_size {
            return Err(FragError::MalformedFragment("fragment exceeds datagram size"));
        }
        entry.arrival = now;
        let insertion = entry
            .intervals
            .insert(offset, end)
            .map_err(|_| FragError::PoolExhausted {
                pool: PoolKind::Rbuf,
            })?;
        match insertion {
            Insertion::Duplicate => Ok(ReassemblyStatus::Duplicate),
            Insertion::Overlap => Ok(ReassemblyStatus::Overlap),
            Insertion::Inserted => {
                entry.buffer[offset..end].copy_from_slice(payload);
                if entry.intervals.is_complete(entry.datagram_size) {
                    Ok(ReassemblyStatus::Complete)
                } else {
                    Ok(ReassemblyStatus::Incomplete)
                }
            }
        }
    }

    /// Record that sequence number `seq` arrived, remembering a
    /// congestion-experienced mark until the next acknowledgement.
    pub fn mark_received(&mut self, handle: Handle, seq: u8, ecn: bool) {
        if let Some(entry) = self.pool.get_mut(handle) {
            entry.received.set(seq);
            entry.ecn |= ecn;
        }
    }

    /// Consume the pending congestion-experienced mark.
    pub fn take_ecn(&mut self, handle: Handle) -> bool {
        self.pool
            .get_mut(handle)
            .is_some_and(|entry| std::mem::take(&mut entry.ecn))
    }

    /// Received sequence numbers of the entry, empty for a dead handle.
    #[must_use]
    pub fn bitmap(&self, handle: Handle) -> AckBitmap {
        self.pool.get(handle).map_or(AckBitmap::NULL, |e| e.received)
    }

    /// Remove a complete entry and hand out its payload.
    ///
    /// The identity is held off from reassembly for the configured period.
    pub fn take(&mut self, handle: Handle, now: Instant) -> Option<CompletedReassembly> {
        let entry = self.pool.remove(handle)?;
        self.completed.retain(|(key, _)| *key != entry.key);
        self.completed.push((entry.key, now + self.holdoff));
        Some(CompletedReassembly {
            key: entry.key,
            netif: entry.netif,
            transport: entry.transport,
            payload: entry.buffer.freeze(),
        })
    }

    /// Discard an entry without delivery.
    pub fn remove(&mut self, handle: Handle) -> Option<RbufEntry> { self.pool.remove(handle) }

    /// Whether `key` completed recently and must not be reassembled again.
    #[must_use]
    pub fn is_held_off(&self, key: &DatagramKey, now: Instant) -> bool {
        self.completed
            .iter()
            .any(|(held, until)| held == key && now < *until)
    }

    /// Discard entries idle for longer than the reassembly timeout.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<StaleReassembly> {
        self.completed.retain(|(_, until)| now < *until);
        let timeout = self.timeout;
        let stale = self
            .pool
            .handles_where(|e| now.saturating_duration_since(e.arrival) >= timeout);
        stale
            .into_iter()
            .filter_map(|handle| self.pool.remove(handle))
            .map(|entry| StaleReassembly {
                key: entry.key,
                netif: entry.netif,
                transport: entry.transport,
            })
            .collect()
    }

    /// When the oldest entry goes stale.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.pool
            .iter()
            .map(|(_, e)| e.arrival + self.timeout)
            .min()
    }
}
