//! Virtual reassembly buffer.
//!
//! A forwarding router keeps one [`VrbEntry`] per datagram it relays. The
//! entry holds no payload: it maps the incoming identity (previous hop, tag)
//! to the outgoing one (next hop, fresh tag) and remembers by how much the
//! first fragment's header grew or shrank when it was recompressed for the
//! next hop. Every later fragment has its offset shifted by that amount.
//!
//! Classic entries also track received byte ranges so that duplicates are
//! not relayed twice and the entry can be released once every byte passed
//! through. Selective entries relay everything and stay alive until an
//! acknowledgement or a timeout ends them, because acknowledgements must be
//! translated back along the same path.

use std::{
    net::Ipv6Addr,
    ops::Range,
    time::{Duration, Instant},
};

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use super::{TagAllocator, Transport};
use crate::{
    DatagramKey,
    FragConfig,
    L2Addr,
    NetifId,
    error::FragError,
    iphc::HeaderCompressor,
    interval::{Insertion, IntervalSet},
    netif::Interfaces,
    pool::{Handle, Pool, PoolKind},
    route::RouteTable,
    wire::{
        FragHeader,
        IPV6_DISPATCH,
        RfragHeader,
        ipv6::HOP_LIMIT_OFFSET,
        is_iphc,
        rfrag::short_tag,
    },
};

/// Why no forwarding entry was created.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FromRouteError {
    /// The destination is local or unreachable.
    #[error("no route for forwarding")]
    NoRoute,
    /// Every forwarding slot is taken.
    #[error("vrb pool exhausted")]
    Full,
}

/// Header of a fragment to relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundHeader {
    /// RFC 4944 header.
    Frag(FragHeader),
    /// RFC 8931 header.
    Rfrag(RfragHeader),
}

impl InboundHeader {
    fn is_first(&self) -> bool {
        match self {
            Self::Frag(header) => header.is_first(),
            Self::Rfrag(header) => header.is_first(),
        }
    }
}

/// A fragment handed to [`Vrb::forward`].
#[derive(Clone, Debug)]
pub struct ForwardFragment<'a> {
    /// Parsed inbound header.
    pub header: InboundHeader,
    /// Payload following the header, borrowed from the inbound frame.
    pub payload: &'a [u8],
    /// Datagram bytes covered by this fragment, in header offset units.
    pub span: Range<usize>,
    /// Hop limit to write into a rewritten first-fragment header.
    pub hop_limit: u8,
    /// Set the congestion-experienced mark on a relayed RFRAG.
    pub mark_ecn: bool,
}

/// Result of [`Vrb::forward`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The fragment was relayed.
    Forwarded {
        /// Bytes handed to the interface.
        sent: usize,
        /// Every byte of the datagram has passed; the entry is gone.
        complete: bool,
    },
    /// The bytes were already relayed; nothing was sent.
    Duplicate,
    /// The fragment conflicted with relayed bytes; the entry is gone.
    Overlap,
}

/// An entry discarded on timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaleForward {
    /// Incoming identity.
    pub incoming: DatagramKey,
    /// Fragment format used.
    pub transport: Transport,
}

/// Forwarding state of one datagram.
#[derive(Debug)]
pub struct VrbEntry {
    incoming: DatagramKey,
    in_netif: NetifId,
    out_netif: NetifId,
    out_dst: L2Addr,
    out_tag: u16,
    transport: Transport,
    datagram_size: usize,
    current_size: usize,
    offset_diff: isize,
    intervals: IntervalSet,
    expires_at: Instant,
}

impl VrbEntry {
    /// Identity of the datagram on the incoming hop.
    #[must_use]
    pub const fn incoming(&self) -> DatagramKey { self.incoming }

    /// Interface fragments arrive on.
    #[must_use]
    pub const fn in_netif(&self) -> NetifId { self.in_netif }

    /// Interface fragments leave on.
    #[must_use]
    pub const fn out_netif(&self) -> NetifId { self.out_netif }

    /// Link-layer next hop.
    #[must_use]
    pub const fn out_dst(&self) -> L2Addr { self.out_dst }

    /// Tag used on the outgoing hop.
    #[must_use]
    pub const fn out_tag(&self) -> u16 { self.out_tag }

    /// Fragment format of the datagram.
    #[must_use]
    pub const fn transport(&self) -> Transport { self.transport }

    /// Declared datagram size, in the units of the fragment format.
    #[must_use]
    pub const fn datagram_size(&self) -> usize { self.datagram_size }

    /// Bytes relayed so far.
    #[must_use]
    pub const fn current_size(&self) -> usize { self.current_size }

    /// Growth of the first fragment's header on this hop.
    #[must_use]
    pub const fn offset_diff(&self) -> isize { self.offset_diff }

    /// When the entry goes stale unless refreshed.
    #[must_use]
    pub const fn expires_at(&self) -> Instant { self.expires_at }
}

/// Pool of forwarding entries.
#[derive(Debug)]
pub struct Vrb {
    pool: Pool<VrbEntry>,
    timeout: Duration,
    max_intervals: usize,
}

impl Vrb {
    /// Create a pool sized by `config`.
    #[must_use]
    pub fn new(config: &FragConfig) -> Self {
        Self {
            pool: Pool::new(PoolKind::Vrb, config.vrb_size),
            timeout: config.vrb_timeout,
            max_intervals: config.max_intervals,
        }
    }

    /// Handle of the entry relaying fragments from `src` with `tag`.
    #[must_use]
    pub fn get(&self, src: &L2Addr, tag: u16) -> Option<Handle> {
        self.pool
            .find(|e| e.incoming.src == *src && e.incoming.tag == tag)
    }

    /// Handle of the selective entry whose outgoing identity matches an
    /// acknowledgement received from `from` on `netif` for `tag`.
    #[must_use]
    pub fn reverse(&self, netif: NetifId, from: &L2Addr, tag: u8) -> Option<Handle> {
        self.pool.find(|e| {
            e.transport == Transport::Selective
                && e.out_netif == netif
                && e.out_dst == *from
                && short_tag(e.out_tag) == tag
        })
    }

    /// Borrow the entry behind `handle`.
    #[must_use]
    pub fn entry(&self, handle: Handle) -> Option<&VrbEntry> { self.pool.get(handle) }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize { self.pool.len() }

    /// Whether nothing is being forwarded.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.pool.is_empty() }

    /// Create an entry for a datagram to `dst`, unless this node is its
    /// destination.
    ///
    /// An existing entry for the same incoming identity is returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`FromRouteError::NoRoute`] when `dst` is local or
    /// unreachable and [`FromRouteError::Full`] when no slot is free.
    #[expect(clippy::too_many_arguments, reason = "mirrors the entry's fields")]
    pub fn from_route(
        &mut self,
        incoming: DatagramKey,
        in_netif: NetifId,
        datagram_size: usize,
        dst: &Ipv6Addr,
        transport: Transport,
        routes: &dyn RouteTable,
        tags: &mut TagAllocator,
        now: Instant,
    ) -> Result<Handle, FromRouteError> {
        if routes.is_local(dst) {
            return Err(FromRouteError::NoRoute);
        }
        let hop = routes
            .resolve_next_hop(dst)
            .map_err(|_| FromRouteError::NoRoute)?;
        if let Some(existing) = self.get(&incoming.src, incoming.tag) {
            return Ok(existing);
        }
        let entry = VrbEntry {
            incoming,
            in_netif,
            out_netif: hop.netif,
            out_dst: hop.l2addr,
            out_tag: tags.next_tag(),
            transport,
            datagram_size,
            current_size: 0,
            offset_diff: 0,
            intervals: IntervalSet::new(self.max_intervals),
            expires_at: now + self.timeout,
        };
        let handle = self.pool.insert(entry).map_err(|_| FromRouteError::Full)?;
        tracing::debug!(%incoming, %handle, next_hop = %hop.l2addr, "vrb: created forwarding entry");
        Ok(handle)
    }

    /// Rewrite `fragment` for the next hop and send it.
    ///
    /// The entry is only updated once the interface accepted the frame; on
    /// any error the entry and the borrowed inbound payload are untouched.
    ///
    /// # Errors
    ///
    /// - [`FragError::StaleEntry`] for a dead handle;
    /// - [`FragError::MalformedFragment`] when the first fragment cannot be
    ///   rewritten;
    /// - [`FragError::FrameTooLarge`] when the rewritten frame exceeds the
    ///   outgoing interface's frame size;
    /// - [`FragError::AllocationFailure`] when the interface has no buffer.
    pub(crate) fn forward(
        &mut self,
        handle: Handle,
        fragment: &ForwardFragment<'_>,
        compressor: Option<&dyn HeaderCompressor>,
        netifs: &mut Interfaces,
        now: Instant,
    ) -> Result<ForwardOutcome, FragError> {
        let entry = self.pool.get(handle).ok_or(FragError::StaleEntry)?;

        let mut intervals = None;
        if entry.transport == Transport::Classic {
            let mut probe = entry.intervals.clone();
            match probe.insert(fragment.span.start, fragment.span.end) {
                Ok(Insertion::Inserted) => intervals = Some(probe),
                Ok(Insertion::Duplicate) => {
                    log::debug!("vrb: duplicate fragment for {}, not forwarded", entry.incoming);
                    return Ok(ForwardOutcome::Duplicate);
                }
                Ok(Insertion::Overlap) | Err(_) => {
                    log::warn!("vrb: overlapping fragment for {}, dropping entry", entry.incoming);
                    self.pool.remove(handle);
                    return Ok(ForwardOutcome::Overlap);
                }
            }
        }

        let (body, offset_diff) = if fragment.header.is_first() {
            rewrite_first(entry.transport, fragment, compressor)?
        } else {
            (BytesMut::from(fragment.payload), entry.offset_diff)
        };

        let mut frame = BytesMut::with_capacity(body.len() + 6);
        match fragment.header {
            InboundHeader::Frag(header) => {
                let out = header.with_tag(entry.out_tag);
                out.write(&mut frame);
            }
            InboundHeader::Rfrag(header) => {
                let frag_size = u16::try_from(body.len())
                    .map_err(|_| FragError::MalformedFragment("fragment too large"))?;
                let offset = shift(header.offset, offset_diff)?;
                let out = RfragHeader {
                    ecn: header.ecn || fragment.mark_ecn,
                    tag: short_tag(entry.out_tag),
                    frag_size,
                    offset,
                    ..header
                };
                out.write(&mut frame);
            }
        }
        frame.put_slice(&body);

        let limit = netifs.max_frame_size(entry.out_netif)?;
        if frame.len() > limit {
            return Err(FragError::FrameTooLarge {
                size: frame.len(),
                limit,
            });
        }
        let (out_netif, out_dst) = (entry.out_netif, entry.out_dst);
        let sent = netifs.send(out_netif, &out_dst, frame.freeze())?;

        let timeout = self.timeout;
        let Some(entry) = self.pool.get_mut(handle) else {
            return Err(FragError::StaleEntry);
        };
        entry.offset_diff = offset_diff;
        if let Some(intervals) = intervals {
            entry.intervals = intervals;
        }
        entry.current_size += fragment.span.len();
        entry.expires_at = now + timeout;
        let complete =
            entry.transport == Transport::Classic && entry.current_size >= entry.datagram_size;
        if complete {
            log::debug!("vrb: {} fully forwarded, releasing entry", entry.incoming);
            self.pool.remove(handle);
        }
        Ok(ForwardOutcome::Forwarded { sent, complete })
    }

    /// Make the entry go stale `delay` from `now`.
    pub fn expire_after(&mut self, handle: Handle, delay: Duration, now: Instant) {
        if let Some(entry) = self.pool.get_mut(handle) {
            entry.expires_at = entry.expires_at.min(now + delay);
        }
    }

    /// Discard an entry.
    pub fn remove(&mut self, handle: Handle) -> Option<VrbEntry> { self.pool.remove(handle) }

    /// Discard entries past their expiry.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<StaleForward> {
        let stale = self.pool.handles_where(|e| e.expires_at <= now);
        stale
            .into_iter()
            .filter_map(|handle| self.pool.remove(handle))
            .map(|entry| StaleForward {
                incoming: entry.incoming,
                transport: entry.transport,
            })
            .collect()
    }

    /// Earliest expiry among live entries.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> { self.pool.iter().map(|(_, e)| e.expires_at).min() }
}

/// Rewrite the header carried by a first fragment.
///
/// Returns the new payload and the offset shift it implies. Classic offsets
/// count uncompressed bytes, so recompression never shifts them.
fn rewrite_first(
    transport: Transport,
    fragment: &ForwardFragment<'_>,
    compressor: Option<&dyn HeaderCompressor>,
) -> Result<(BytesMut, isize), FragError> {
    let payload = fragment.payload;
    let Some(&dispatch) = payload.first() else {
        return Err(FragError::MalformedFragment("empty first fragment"));
    };
    if dispatch == IPV6_DISPATCH {
        let hop_limit_at = 1 + HOP_LIMIT_OFFSET;
        if payload.len() <= hop_limit_at {
            return Err(FragError::MalformedFragment("truncated IPv6 header"));
        }
        let mut body = BytesMut::from(payload);
        body[hop_limit_at] = fragment.hop_limit;
        return Ok((body, 0));
    }
    if !is_iphc(dispatch) {
        return Err(FragError::MalformedFragment("unsupported first fragment dispatch"));
    }
    let Some(compressor) = compressor else {
        return Err(FragError::MalformedFragment("no header compressor"));
    };
    let recompressed = compressor
        .recompress_first_fragment(payload, fragment.hop_limit)
        .map_err(|_| FragError::MalformedFragment("header not compressible"))?;
    let rest = payload
        .get(recompressed.consumed..)
        .ok_or(FragError::MalformedFragment("compressed header exceeds fragment"))?;
    let mut body = BytesMut::with_capacity(recompressed.header.len() + rest.len());
    body.put_slice(&recompressed.header);
    body.put_slice(rest);
    let offset_diff = match transport {
        Transport::Classic => 0,
        Transport::Selective => recompressed.size_delta(),
    };
    Ok((body, offset_diff))
}

/// Shift a non-zero RFRAG offset field by `diff`.
fn shift(offset: u16, diff: isize) -> Result<u16, FragError> {
    if offset == 0 {
        return Ok(0);
    }
    let out_of_range = || FragError::MalformedFragment("offset out of range");
    let shifted = isize::try_from(offset).map_err(|_| out_of_range())? + diff;
    u16::try_from(shifted).map_err(|_| out_of_range())
}
