//! Metric helpers for `lowpan-frag`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Nothing is exported unless a
//! recorder is installed by the application.

use metrics::{counter, gauge};

use crate::stats::{AckKind, ResendCause, SentKind};

/// Counter of fragments put on the link, labelled by `kind`.
pub const FRAGMENTS_SENT: &str = "lowpan_frag_fragments_sent_total";
/// Counter of fragment retransmissions, labelled by `cause`.
pub const FRAGMENT_RESENDS: &str = "lowpan_frag_fragment_resends_total";
/// Counter of acknowledgements received or relayed, labelled by `kind`.
pub const ACKS: &str = "lowpan_frag_acks_total";
/// Counter of datagram restarts.
pub const DATAGRAM_RESENDS: &str = "lowpan_frag_datagram_resends_total";
/// Counter of reassembled datagrams delivered upward.
pub const DATAGRAMS_DELIVERED: &str = "lowpan_frag_datagrams_delivered_total";
/// Counter of entries evicted on timeout, labelled by `pool`.
pub const ENTRIES_EVICTED: &str = "lowpan_frag_entries_evicted_total";
/// Counter of dropped inbound fragments.
pub const FRAGMENTS_DROPPED: &str = "lowpan_frag_fragments_dropped_total";
/// Gauge of occupied pool slots, labelled by `pool`.
pub const POOL_OCCUPANCY: &str = "lowpan_frag_pool_occupancy";

/// Record a fragment transmission.
pub fn inc_fragments_sent(kind: SentKind) {
    counter!(FRAGMENTS_SENT, "kind" => kind.as_str()).increment(1);
}

/// Record a fragment retransmission.
pub fn inc_fragment_resends(cause: ResendCause) {
    counter!(FRAGMENT_RESENDS, "cause" => cause.as_str()).increment(1);
}

/// Record an acknowledgement.
pub fn inc_acks(kind: AckKind) { counter!(ACKS, "kind" => kind.as_str()).increment(1); }

/// Record a datagram restart.
pub fn inc_datagram_resends() { counter!(DATAGRAM_RESENDS).increment(1); }

/// Record a delivered datagram.
pub fn inc_delivered() { counter!(DATAGRAMS_DELIVERED).increment(1); }

/// Record an evicted entry.
pub fn inc_evicted(pool: &'static str) { counter!(ENTRIES_EVICTED, "pool" => pool).increment(1); }

/// Record a dropped fragment.
pub fn inc_dropped() { counter!(FRAGMENTS_DROPPED).increment(1); }

/// Publish the occupancy of a pool.
#[expect(
    clippy::cast_precision_loss,
    reason = "pool sizes are tiny and gauges are f64"
)]
pub fn set_pool_occupancy(pool: &'static str, occupied: usize) {
    gauge!(POOL_OCCUPANCY, "pool" => pool).set(occupied as f64);
}
