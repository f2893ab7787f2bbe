//! The fragmentation engine.
//!
//! [`FragEngine`] owns the reassembly, forwarding and send pools, the timer
//! queue and the collaborators registered through [`FragEngineBuilder`]. It
//! is synchronous and never reads a clock: every entry point takes the
//! current time, and [`FragEngine::poll`] fires whatever became due by then.
//! [`FragService`](crate::FragService) drives an engine from a tokio task.
//!
//! The classic RFC 4944 path lives in `minfwd`, the RFC 8931 selective path
//! in `sfr`. Both share the helpers defined here.

mod minfwd;
mod queue;
mod sfr;

use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
pub use queue::FrameQueue;

use crate::{
    DatagramKey,
    FragConfig,
    FragMode,
    L2Addr,
    NetifId,
    buffer::{Fbuf, Rbuf, StaleReassembly, TagAllocator, Transport, Vrb},
    congestion::ControllerFactory,
    datagram::{Datagram, DiscardUpper, ReassembledDatagram, UpperLayer},
    error::FragError,
    iphc::HeaderCompressor,
    netif::{Interfaces, LinkEvent, NetInterface, ReceivedFrame},
    pool::Handle,
    route::{NoRoutes, RouteTable},
    stats::Stats,
    timer::{TimerKind, Timers},
    wire::{
        self,
        Dispatch,
        IPV6_DISPATCH,
        Ipv6Header,
        RfragAck,
        is_iphc,
        rfrag::{AckBitmap, RFRAG_ACK_LEN, short_tag},
    },
};

/// How [`FragEngine::send_datagram`] handled a datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The datagram fit into one frame and was sent unfragmented.
    Unfragmented {
        /// Bytes handed to the interface.
        sent: usize,
    },
    /// Every classic fragment was handed to the interface.
    Fragmented {
        /// Datagram tag used.
        tag: u16,
        /// Number of fragments sent.
        fragments: usize,
    },
    /// Selective fragmentation started. The outcome is reported through
    /// [`UpperLayer::send_completed`].
    InProgress {
        /// Datagram tag used.
        tag: u16,
        /// Send buffer entry of the datagram.
        handle: Handle,
    },
}

/// What happened to a received frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The fragment was stored for reassembly.
    Buffered,
    /// The fragment completed a datagram, which was delivered.
    Delivered,
    /// The fragment was relayed to the next hop.
    Forwarded,
    /// An acknowledgement for a datagram sent by this node was processed.
    Acknowledged,
    /// An acknowledgement was relayed towards the datagram's origin.
    AckRelayed,
    /// An abort fragment ended a datagram.
    Aborted,
    /// The frame is not a fragment and is left to the caller.
    Ignored,
}

/// Builder for [`FragEngine`].
pub struct FragEngineBuilder {
    config: FragConfig,
    netifs: Interfaces,
    routes: Box<dyn RouteTable>,
    compressor: Option<Box<dyn HeaderCompressor>>,
    upper: Box<dyn UpperLayer>,
    controllers: Option<Box<dyn ControllerFactory>>,
    tags: TagAllocator,
}

impl FragEngineBuilder {
    fn new(config: FragConfig) -> Self {
        Self {
            config,
            netifs: Interfaces::default(),
            routes: Box::new(NoRoutes),
            compressor: None,
            upper: Box::new(DiscardUpper),
            controllers: None,
            tags: TagAllocator::default(),
        }
    }

    /// Attach a network interface.
    #[must_use]
    pub fn interface(mut self, netif: impl NetInterface + 'static) -> Self {
        self.netifs.attach(Box::new(netif));
        self
    }

    /// Use `routes` to decide whether a datagram is forwarded.
    #[must_use]
    pub fn routes(mut self, routes: impl RouteTable + 'static) -> Self {
        self.routes = Box::new(routes);
        self
    }

    /// Use `compressor` for IPHC headers.
    #[must_use]
    pub fn compressor(mut self, compressor: impl HeaderCompressor + 'static) -> Self {
        self.compressor = Some(Box::new(compressor));
        self
    }

    /// Deliver reassembled datagrams and send outcomes to `upper`.
    #[must_use]
    pub fn upper_layer(mut self, upper: impl UpperLayer + 'static) -> Self {
        self.upper = Box::new(upper);
        self
    }

    /// Create a congestion controller per selective datagram with `factory`.
    #[must_use]
    pub fn congestion(mut self, factory: impl ControllerFactory + 'static) -> Self {
        self.controllers = Some(Box::new(factory));
        self
    }

    /// Issue datagram tags starting at `first`.
    #[must_use]
    pub fn first_tag(mut self, first: u16) -> Self {
        self.tags = TagAllocator::starting_at(first);
        self
    }

    /// Build the engine.
    #[must_use]
    pub fn build(self) -> FragEngine {
        let config = self.config;
        FragEngine {
            rbuf: Rbuf::new(&config),
            vrb: Vrb::new(&config),
            fbuf: Fbuf::new(config.fbuf_size),
            queue: FrameQueue::new(config.frame_queue_size),
            timers: Timers::new(),
            stats: Stats::default(),
            netifs: self.netifs,
            routes: self.routes,
            compressor: self.compressor,
            upper: self.upper,
            controllers: self.controllers,
            tags: self.tags,
            config,
        }
    }
}

/// 6LoWPAN fragmentation, reassembly and forwarding.
pub struct FragEngine {
    config: FragConfig,
    netifs: Interfaces,
    routes: Box<dyn RouteTable>,
    compressor: Option<Box<dyn HeaderCompressor>>,
    upper: Box<dyn UpperLayer>,
    controllers: Option<Box<dyn ControllerFactory>>,
    rbuf: Rbuf,
    vrb: Vrb,
    fbuf: Fbuf,
    tags: TagAllocator,
    timers: Timers,
    queue: FrameQueue,
    stats: Stats,
}

impl std::fmt::Debug for FragEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragEngine")
            .field("config", &self.config)
            .field("netifs", &self.netifs)
            .field("rbuf", &self.rbuf.len())
            .field("vrb", &self.vrb.len())
            .field("fbuf", &self.fbuf.len())
            .field("timers", &self.timers.len())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl FragEngine {
    /// Start building an engine with `config`.
    #[must_use]
    pub fn builder(config: FragConfig) -> FragEngineBuilder { FragEngineBuilder::new(config) }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &FragConfig { &self.config }

    /// Counters collected so far.
    #[must_use]
    pub const fn stats(&self) -> &Stats { &self.stats }

    /// Reassembly buffer.
    #[must_use]
    pub const fn rbuf(&self) -> &Rbuf { &self.rbuf }

    /// Virtual reassembly buffer.
    #[must_use]
    pub const fn vrb(&self) -> &Vrb { &self.vrb }

    /// Fragment send buffer.
    #[must_use]
    pub const fn fbuf(&self) -> &Fbuf { &self.fbuf }

    /// Paced frames waiting for their slot.
    #[must_use]
    pub const fn queue(&self) -> &FrameQueue { &self.queue }

    /// Send a datagram, fragmenting it when it exceeds the interface's frame
    /// size.
    ///
    /// # Errors
    ///
    /// - [`FragError::UnknownInterface`] when the datagram names no attached
    ///   interface;
    /// - [`FragError::DatagramTooLarge`] when the fragment format cannot
    ///   carry the datagram;
    /// - [`FragError::PoolExhausted`] when the send buffer is full;
    /// - link errors raised while sending.
    pub fn send_datagram(
        &mut self,
        datagram: Datagram,
        now: Instant,
    ) -> Result<SendOutcome, FragError> {
        let netif = datagram.netif();
        let max_frame = self.netifs.max_frame_size(netif)?;
        if datagram.payload().len() <= max_frame {
            let sent = self
                .netifs
                .send(netif, &datagram.dst(), datagram.payload().clone())?;
            return Ok(SendOutcome::Unfragmented { sent });
        }
        match self.config.mode {
            FragMode::Minimal => self.send_classic(datagram, max_frame),
            FragMode::Selective => self.send_selective(datagram, max_frame, now),
        }
    }

    /// Process a frame received on one of the attached interfaces.
    ///
    /// # Errors
    ///
    /// Returns the reason the fragment was dropped. Dropping a fragment is
    /// routine; the engine stays consistent whatever the error.
    pub fn receive(
        &mut self,
        frame: &ReceivedFrame<'_>,
        now: Instant,
    ) -> Result<Disposition, FragError> {
        let result = match wire::classify(frame.payload) {
            Some(Dispatch::Frag1 | Dispatch::FragN) => self.receive_classic(frame, now),
            Some(Dispatch::Rfrag) => self.receive_rfrag(frame, now),
            Some(Dispatch::RfragAck) => self.receive_ack(frame, now),
            Some(_) => Ok(Disposition::Ignored),
            None => Err(FragError::MalformedFragment("empty frame")),
        };
        if let Err(err) = &result {
            self.stats.dropped();
            log::debug!("dropped fragment from {} on {}: {err}", frame.src, frame.netif);
        }
        self.publish_occupancy();
        result
    }

    /// Dispatch an interface event.
    ///
    /// # Errors
    ///
    /// Propagates the result of [`FragEngine::receive`] for received frames.
    pub fn handle_event(
        &mut self,
        event: &LinkEvent,
        now: Instant,
    ) -> Result<Disposition, FragError> {
        match event {
            LinkEvent::FrameReceived {
                netif,
                src,
                dst,
                payload,
            } => self.receive(
                &ReceivedFrame {
                    netif: *netif,
                    src: *src,
                    dst: *dst,
                    payload,
                },
                now,
            ),
            LinkEvent::TransmitComplete { netif } => {
                log::trace!("transmit complete on {netif}");
                self.drain_queue(now);
                Ok(Disposition::Ignored)
            }
        }
    }

    /// Fire due timers, evict stale entries and release paced frames.
    pub fn poll(&mut self, now: Instant) {
        for expired in self.timers.pop_expired(now) {
            match expired.kind {
                TimerKind::Arq => self.on_arq_timeout(expired.handle, now),
                TimerKind::VrbRelease => {
                    if self.vrb.remove(expired.handle).is_some() {
                        log::debug!("vrb: released {} after final acknowledgement", expired.handle);
                    }
                }
            }
        }
        for stale in self.rbuf.evict_stale(now) {
            self.on_stale_reassembly(stale);
        }
        for stale in self.vrb.evict_stale(now) {
            self.stats.evicted("vrb");
            log::info!("vrb: forwarding state for {} timed out", stale.incoming);
        }
        self.drain_queue(now);
        self.publish_occupancy();
    }

    /// Earliest instant at which [`FragEngine::poll`] has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.timers.next_deadline(),
            self.rbuf.next_expiry(),
            self.vrb.next_expiry(),
            self.queue.next_due(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn on_stale_reassembly(&mut self, stale: StaleReassembly) {
        self.stats.evicted("rbuf");
        log::info!("rbuf: reassembly of {} timed out", stale.key);
        let acknowledge = match stale.transport {
            Transport::Selective => true,
            Transport::Classic => self.config.classic_abort_ack,
        };
        if acknowledge {
            self.send_abort_ack(stale.netif, stale.key.src, stale.key.tag);
        }
    }

    /// Restore the uncompressed IPv6 bytes of a datagram start.
    ///
    /// `form` begins with the IPv6 dispatch or an IPHC header.
    fn uncompress(&self, form: &[u8]) -> Result<(Ipv6Header, BytesMut), FragError> {
        let Some(&dispatch) = form.first() else {
            return Err(FragError::MalformedFragment("empty datagram"));
        };
        if dispatch == IPV6_DISPATCH {
            let raw = &form[1..];
            let header = Ipv6Header::parse(raw)?;
            return Ok((header, BytesMut::from(raw)));
        }
        if !is_iphc(dispatch) {
            return Err(FragError::MalformedFragment("unsupported datagram dispatch"));
        }
        let compressor = self
            .compressor
            .as_deref()
            .ok_or(FragError::MalformedFragment("no header compressor"))?;
        let decompressed = compressor
            .decompress(form)
            .map_err(|_| FragError::MalformedFragment("undecodable IPHC header"))?;
        let rest = form
            .get(decompressed.consumed..)
            .ok_or(FragError::MalformedFragment("IPHC header exceeds fragment"))?;
        let header = Ipv6Header::parse(&decompressed.header)?;
        let mut raw = BytesMut::with_capacity(decompressed.header.len() + rest.len());
        raw.put_slice(&decompressed.header);
        raw.put_slice(rest);
        Ok((header, raw))
    }

    fn deliver(&mut self, key: DatagramKey, netif: NetifId, payload: Bytes) {
        log::debug!("delivering {} bytes of {key}", payload.len());
        self.stats.delivered();
        self.upper
            .deliver(ReassembledDatagram::new(key, netif, payload));
    }

    fn send_ack(&mut self, netif: NetifId, dst: L2Addr, ack: RfragAck) -> Result<usize, FragError> {
        let mut frame = BytesMut::with_capacity(RFRAG_ACK_LEN);
        ack.write(&mut frame);
        self.netifs.send(netif, &dst, frame.freeze())
    }

    /// Tell the sender of `tag` to abandon its datagram.
    fn send_abort_ack(&mut self, netif: NetifId, dst: L2Addr, tag: u16) {
        let ack = RfragAck::abort(short_tag(tag));
        if let Err(err) = self.send_ack(netif, dst, ack) {
            log::warn!("could not send abort acknowledgement for tag {tag} to {dst}: {err}");
        }
    }

    /// Acknowledge the fragments received for a reassembly entry.
    fn acknowledge(&mut self, rbuf: Handle, netif: NetifId, key: DatagramKey, bitmap: AckBitmap) {
        let ack = RfragAck {
            ecn: self.rbuf.take_ecn(rbuf),
            ..RfragAck::new(short_tag(key.tag), bitmap)
        };
        if let Err(err) = self.send_ack(netif, key.src, ack) {
            log::warn!("could not acknowledge {key}: {err}");
        }
    }

    /// Release paced frames whose slot has come.
    fn drain_queue(&mut self, now: Instant) {
        for queued in self.queue.pop_due(now) {
            self.transmit_queued(queued);
        }
    }

    fn transmit_queued(&mut self, queued: queue::QueuedFrame) {
        if let Err(err) = self.netifs.send(queued.netif, &queued.dst, queued.frame) {
            log::warn!("paced frame to {} failed: {err}", queued.dst);
            if let Some(sfr) = self
                .fbuf
                .entry_mut(queued.owner)
                .and_then(|entry| entry.sfr.as_mut())
            {
                sfr.controller.report_discarded(1);
            }
        }
    }

    #[cfg(feature = "metrics")]
    fn publish_occupancy(&self) {
        crate::metrics::set_pool_occupancy("rbuf", self.rbuf.len());
        crate::metrics::set_pool_occupancy("vrb", self.vrb.len());
        crate::metrics::set_pool_occupancy("fbuf", self.fbuf.len());
    }

    #[cfg(not(feature = "metrics"))]
    fn publish_occupancy(&self) {}
}

