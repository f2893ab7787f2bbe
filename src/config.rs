//! Engine configuration.
//!
//! [`FragConfig`] bounds every pool, fixes the timeouts that drive eviction
//! and retransmission, and selects the fragment format used when sending.
//! Defaults follow common values for IEEE 802.15.4 deployments.

use std::time::Duration;

use crate::interval::DEFAULT_MAX_INTERVALS;

/// Fragment format used for outgoing datagrams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FragMode {
    /// RFC 4944 fragments forwarded hop by hop without acknowledgement.
    #[default]
    Minimal,
    /// RFC 8931 selective fragment recovery.
    Selective,
}

/// Tunables for [`FragEngine`](crate::FragEngine).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragConfig {
    /// Fragment format for datagrams originated by this node.
    pub mode: FragMode,
    /// Number of reassembly entries.
    pub rbuf_size: usize,
    /// Number of virtual reassembly (forwarding) entries.
    pub vrb_size: usize,
    /// Number of concurrently fragmented outgoing datagrams.
    pub fbuf_size: usize,
    /// Disjoint byte ranges tracked per reassembly entry.
    pub max_intervals: usize,
    /// Lifetime of an incomplete reassembly entry.
    pub reassembly_timeout: Duration,
    /// Lifetime of an idle forwarding entry.
    pub vrb_timeout: Duration,
    /// How long a completed datagram identity is refused for reassembly.
    pub reuse_holdoff: Duration,
    /// Emit abort acknowledgements for classic fragments without state.
    pub classic_abort_ack: bool,
    /// Window used when no congestion controller is supplied.
    pub sfr_window: usize,
    /// Spacing between fragments used when no congestion controller is supplied.
    pub sfr_inter_frame_gap: Duration,
    /// Time to wait for an acknowledgement before retransmitting.
    pub sfr_arq_timeout: Duration,
    /// Retransmissions allowed per fragment.
    pub sfr_frag_retries: u8,
    /// Restarts allowed per datagram once a fragment runs out of retries.
    pub sfr_datagram_retries: u8,
    /// Delay before a forwarding entry is dropped after a full or null ACK.
    pub vrb_release_delay: Duration,
    /// Capacity of the paced outgoing frame queue.
    pub frame_queue_size: usize,
    /// Queue occupancy at which forwarded fragments get the ECN mark.
    pub ecn_queue_threshold: usize,
}

impl Default for FragConfig {
    fn default() -> Self {
        Self {
            mode: FragMode::Minimal,
            rbuf_size: 4,
            vrb_size: 16,
            fbuf_size: 4,
            max_intervals: DEFAULT_MAX_INTERVALS,
            reassembly_timeout: Duration::from_secs(3),
            vrb_timeout: Duration::from_secs(3),
            reuse_holdoff: Duration::from_secs(1),
            classic_abort_ack: false,
            sfr_window: 16,
            sfr_inter_frame_gap: Duration::ZERO,
            sfr_arq_timeout: Duration::from_millis(700),
            sfr_frag_retries: 2,
            sfr_datagram_retries: 0,
            vrb_release_delay: Duration::from_micros(250),
            frame_queue_size: 8,
            ecn_queue_threshold: 4,
        }
    }
}

impl FragConfig {
    /// Configuration sending RFC 8931 fragments.
    #[must_use]
    pub fn selective() -> Self {
        Self {
            mode: FragMode::Selective,
            ..Self::default()
        }
    }

    /// Select the outgoing fragment format.
    #[must_use]
    pub fn with_mode(mut self, mode: FragMode) -> Self {
        self.mode = mode;
        self
    }

    /// Size the reassembly, forwarding and send pools.
    #[must_use]
    pub fn with_pool_sizes(mut self, rbuf: usize, vrb: usize, fbuf: usize) -> Self {
        self.rbuf_size = rbuf;
        self.vrb_size = vrb;
        self.fbuf_size = fbuf;
        self
    }

    /// Bound the number of disjoint ranges per reassembly entry.
    #[must_use]
    pub fn with_max_intervals(mut self, max: usize) -> Self {
        self.max_intervals = max;
        self
    }

    /// Set the lifetime of incomplete reassembly entries.
    #[must_use]
    pub fn with_reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout = timeout;
        self
    }

    /// Set the lifetime of idle forwarding entries.
    #[must_use]
    pub fn with_vrb_timeout(mut self, timeout: Duration) -> Self {
        self.vrb_timeout = timeout;
        self
    }

    /// Set the hold-off before a completed identity may be reassembled again.
    #[must_use]
    pub fn with_reuse_holdoff(mut self, holdoff: Duration) -> Self {
        self.reuse_holdoff = holdoff;
        self
    }

    /// Enable abort acknowledgements for classic fragments.
    #[must_use]
    pub fn with_classic_abort_ack(mut self, enabled: bool) -> Self {
        self.classic_abort_ack = enabled;
        self
    }

    /// Set the fallback window and inter-frame gap.
    #[must_use]
    pub fn with_sfr_window(mut self, window: usize, gap: Duration) -> Self {
        self.sfr_window = window;
        self.sfr_inter_frame_gap = gap;
        self
    }

    /// Set the acknowledgement timeout.
    #[must_use]
    pub fn with_sfr_arq_timeout(mut self, timeout: Duration) -> Self {
        self.sfr_arq_timeout = timeout;
        self
    }

    /// Set per-fragment and per-datagram retry budgets.
    #[must_use]
    pub fn with_sfr_retries(mut self, frag: u8, datagram: u8) -> Self {
        self.sfr_frag_retries = frag;
        self.sfr_datagram_retries = datagram;
        self
    }

    /// Set the forwarding entry release delay after a final ACK.
    #[must_use]
    pub fn with_vrb_release_delay(mut self, delay: Duration) -> Self {
        self.vrb_release_delay = delay;
        self
    }

    /// Size the paced frame queue and its ECN threshold.
    #[must_use]
    pub fn with_frame_queue(mut self, size: usize, ecn_threshold: usize) -> Self {
        self.frame_queue_size = size;
        self.ecn_queue_threshold = ecn_threshold;
        self
    }
}
