//! Running counters kept by the engine.
//!
//! [`Stats`] is always maintained so tests and diagnostics can inspect it;
//! with the `metrics` feature every update is mirrored to the
//! [`metrics`](crate::metrics) counters as well.

#[cfg(feature = "metrics")]
use crate::metrics;

/// Kind of fragment transmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SentKind {
    /// A fragment originated by this node.
    Usual,
    /// An abort pseudo-fragment.
    Abort,
    /// A fragment relayed through a forwarding entry.
    Forwarded,
}

impl SentKind {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "metric labels"))]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            SentKind::Usual => "usual",
            SentKind::Abort => "abort",
            SentKind::Forwarded => "forwarded",
        }
    }
}

/// Reason for a retransmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResendCause {
    /// An acknowledgement reported the fragment missing.
    Nack,
    /// The acknowledgement timer expired.
    Timeout,
}

impl ResendCause {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "metric labels"))]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ResendCause::Nack => "nack",
            ResendCause::Timeout => "timeout",
        }
    }
}

/// Kind of acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckKind {
    /// Every fragment confirmed.
    Full,
    /// Some fragments confirmed.
    Partly,
    /// Null bitmap.
    Abort,
    /// Relayed along a forwarding entry.
    Forwarded,
}

impl AckKind {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "metric labels"))]
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            AckKind::Full => "full",
            AckKind::Partly => "partly",
            AckKind::Abort => "abort",
            AckKind::Forwarded => "forwarded",
        }
    }
}

/// Fragment transmissions by kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragmentsSent {
    pub usual: u32,
    pub aborts: u32,
    pub forwarded: u32,
}

/// Retransmissions by cause.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragmentResends {
    pub by_nack: u32,
    pub by_timeout: u32,
}

/// Acknowledgements by kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Acks {
    pub full: u32,
    pub partly: u32,
    pub aborts: u32,
    pub forwarded: u32,
}

/// Snapshot of engine counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub fragments_sent: FragmentsSent,
    pub fragment_resends: FragmentResends,
    pub acks: Acks,
    pub datagram_resends: u32,
    pub datagrams_delivered: u32,
    pub fragments_dropped: u32,
    pub entries_evicted: u32,
}

impl Stats {
    pub(crate) fn sent(&mut self, kind: SentKind) {
        let slot = match kind {
            SentKind::Usual => &mut self.fragments_sent.usual,
            SentKind::Abort => &mut self.fragments_sent.aborts,
            SentKind::Forwarded => &mut self.fragments_sent.forwarded,
        };
        *slot += 1;
        #[cfg(feature = "metrics")]
        metrics::inc_fragments_sent(kind);
    }

    pub(crate) fn resent(&mut self, cause: ResendCause) {
        let slot = match cause {
            ResendCause::Nack => &mut self.fragment_resends.by_nack,
            ResendCause::Timeout => &mut self.fragment_resends.by_timeout,
        };
        *slot += 1;
        #[cfg(feature = "metrics")]
        metrics::inc_fragment_resends(cause);
    }

    pub(crate) fn ack(&mut self, kind: AckKind) {
        let slot = match kind {
            AckKind::Full => &mut self.acks.full,
            AckKind::Partly => &mut self.acks.partly,
            AckKind::Abort => &mut self.acks.aborts,
            AckKind::Forwarded => &mut self.acks.forwarded,
        };
        *slot += 1;
        #[cfg(feature = "metrics")]
        metrics::inc_acks(kind);
    }

    pub(crate) fn datagram_resent(&mut self) {
        self.datagram_resends += 1;
        #[cfg(feature = "metrics")]
        metrics::inc_datagram_resends();
    }

    pub(crate) fn delivered(&mut self) {
        self.datagrams_delivered += 1;
        #[cfg(feature = "metrics")]
        metrics::inc_delivered();
    }

    pub(crate) fn dropped(&mut self) {
        self.fragments_dropped += 1;
        #[cfg(feature = "metrics")]
        metrics::inc_dropped();
    }

    #[cfg_attr(
        not(feature = "metrics"),
        expect(unused_variables, reason = "label only used by metrics")
    )]
    pub(crate) fn evicted(&mut self, pool: &'static str) {
        self.entries_evicted += 1;
        #[cfg(feature = "metrics")]
        metrics::inc_evicted(pool);
    }
}
