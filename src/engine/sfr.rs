//! Selective fragment recovery (RFC 8931).
//!
//! The sender keeps every unacknowledged fragment in a per-datagram window
//! sized by its congestion controller. Fragments that fill the window or end
//! the datagram request an acknowledgement; the returned bitmap decides what
//! is sent again. An ARQ timer covers lost acknowledgements. Receivers track
//! sequence numbers in the reassembly entry, forwarders relay fragments and
//! translate acknowledgements back along the reverse path.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use bytes::{BufMut, Bytes, BytesMut};

use super::{Disposition, FragEngine, SendOutcome, queue::QueuedFrame};
use crate::{
    DatagramKey,
    buffer::{
        FbufEntry,
        ForwardFragment,
        FromRouteError,
        InboundHeader,
        ReassemblyStatus,
        SendState,
        SfrSendState,
        Transport,
    },
    congestion::{FixedWindow, InFlight},
    datagram::Datagram,
    error::FragError,
    netif::ReceivedFrame,
    pool::{Handle, PoolKind},
    stats::{AckKind, ResendCause, SentKind},
    timer::TimerKind,
    wire::{
        RfragAck,
        RfragHeader,
        rfrag::{AckBitmap, MAX_FRAG_SIZE, MAX_SEQ, RFRAG_HEADER_LEN, short_tag},
    },
};

/// Payload lengths of the first and the following fragments.
///
/// The first fragment leaves room for the header to grow back to its
/// uncompressed size when a forwarder recompresses it.
fn selective_sizes(
    uncompressed: usize,
    compressed: usize,
    max_frame: usize,
) -> Result<(usize, usize), FragError> {
    let frag_size = max_frame
        .saturating_sub(RFRAG_HEADER_LEN)
        .min(usize::from(MAX_FRAG_SIZE));
    let slack = uncompressed.saturating_sub(compressed);
    match frag_size.checked_sub(slack) {
        Some(first) if first > 0 => Ok((first, frag_size)),
        _ => Err(FragError::FrameTooLarge {
            size: RFRAG_HEADER_LEN + slack + 1,
            limit: max_frame,
        }),
    }
}

/// Largest compressed datagram the sequence number space can carry.
fn selective_limit(first: usize, rest: usize) -> usize {
    (first + rest * usize::from(MAX_SEQ)).min(usize::from(u16::MAX))
}

/// Encode the fragment described by `record`.
fn build_fragment(entry: &FbufEntry, record: &InFlight) -> Bytes {
    let offset_field = if record.offset == 0 {
        u16::try_from(entry.datagram_size()).unwrap_or(u16::MAX)
    } else {
        record.offset
    };
    let header = RfragHeader::new(
        entry.short_tag(),
        record.seq,
        record.size,
        offset_field,
        record.ack_req,
    );
    let start = usize::from(record.offset);
    let body = &entry.payload()[start..start + usize::from(record.size)];
    let mut frame = BytesMut::with_capacity(RFRAG_HEADER_LEN + body.len());
    header.write(&mut frame);
    frame.put_slice(body);
    frame.freeze()
}

/// Trim the window to what the controller currently allows.
///
/// Dropped records are sent again as new fragments, so the send offset and
/// sequence counter rewind to just after the last kept record.
fn shrink_window(sfr: &mut SfrSendState, offset: &mut usize) {
    let window = sfr.controller.window().max(1);
    if sfr.window.len() <= window {
        return;
    }
    sfr.window.truncate(window);
    if let Some(last) = sfr.window.back() {
        *offset = usize::from(last.offset) + usize::from(last.size);
        sfr.next_seq = last.seq + 1;
    }
}

impl FragEngine {
    pub(super) fn send_selective(
        &mut self,
        datagram: Datagram,
        max_frame: usize,
        now: Instant,
    ) -> Result<SendOutcome, FragError> {
        let compressed = datagram.payload().len();
        let (first, rest) = selective_sizes(datagram.datagram_size(), compressed, max_frame)?;
        let limit = selective_limit(first, rest);
        if compressed > limit {
            return Err(FragError::DatagramTooLarge {
                size: compressed,
                limit,
            });
        }

        let tag = self.tags.next_tag();
        let (window, gap) = (self.config.sfr_window, self.config.sfr_inter_frame_gap);
        let controller = self
            .controllers
            .as_mut()
            .and_then(|factory| factory.create(tag))
            .unwrap_or_else(|| Box::new(FixedWindow::new(window, gap)));
        let sfr = SfrSendState::new(
            controller,
            self.config.sfr_datagram_retries,
            self.config.sfr_arq_timeout,
        );
        let mut entry = FbufEntry::new(datagram, tag, Some(sfr));
        entry.datagram_size = compressed;
        let handle = self.fbuf.alloc(entry)?;
        log::debug!("sending datagram tag {tag} ({compressed} bytes) selectively as {handle}");

        if let Err(err) = self.send_window(handle, now) {
            let nothing_sent = self
                .fbuf
                .entry(handle)
                .and_then(FbufEntry::sfr)
                .is_none_or(|sfr| sfr.next_seq == 0);
            if nothing_sent {
                self.timers.cancel(handle);
                self.fbuf.remove(handle);
                return Err(err);
            }
            self.abort_datagram(handle, err, now);
        }
        Ok(SendOutcome::InProgress { tag, handle })
    }

    /// Send new fragments while the window has room.
    fn send_window(&mut self, handle: Handle, now: Instant) -> Result<(), FragError> {
        loop {
            let Some(entry) = self.fbuf.entry(handle) else {
                return Ok(());
            };
            let Some(sfr) = entry.sfr() else {
                return Ok(());
            };
            if entry.offset >= entry.datagram_size || !sfr.in_window() {
                break;
            }
            let seq = sfr.next_seq;
            if seq > MAX_SEQ {
                return Err(FragError::DatagramTooLarge {
                    size: entry.datagram_size,
                    limit: entry.offset,
                });
            }
            let max_frame = self.netifs.max_frame_size(entry.netif())?;
            let (first, rest) = selective_sizes(
                entry.datagram.datagram_size(),
                entry.datagram_size,
                max_frame,
            )?;
            let budget = if entry.offset == 0 { first } else { rest };
            let size = budget.min(entry.datagram_size - entry.offset);
            let last = entry.offset + size >= entry.datagram_size;
            let record = InFlight {
                seq,
                offset: u16::try_from(entry.offset).unwrap_or(u16::MAX),
                size: u16::try_from(size).unwrap_or(MAX_FRAG_SIZE),
                send_time: now,
                resends: 0,
                ack_req: last || !sfr.next_in_window(),
            };
            let frame = build_fragment(entry, &record);

            self.transmit(handle, frame, now)?;
            self.stats.sent(SentKind::Usual);
            if let Some(entry) = self.fbuf.entry_mut(handle)
                && let Some(sfr) = entry.sfr.as_mut()
            {
                sfr.window.push_back(record);
                sfr.next_seq += 1;
                entry.offset += size;
            }
            if record.ack_req {
                self.arm_arq(handle, now, false);
            }
        }
        self.refresh_state(handle);
        Ok(())
    }

    /// Send the window members `seqs` again.
    ///
    /// Only the last of them requests an acknowledgement, and only if
    /// `request_last` is set.
    fn resend(
        &mut self,
        handle: Handle,
        seqs: &[u8],
        request_last: bool,
        cause: ResendCause,
        now: Instant,
    ) -> Result<(), FragError> {
        for (i, &seq) in seqs.iter().enumerate() {
            let ack_req = request_last && i + 1 == seqs.len();
            let frame = {
                let entry = self.fbuf.entry_mut(handle).ok_or(FragError::StaleEntry)?;
                let sfr = entry.sfr.as_mut().ok_or(FragError::StaleEntry)?;
                sfr.state = SendState::Retransmitting;
                let Some(record) = sfr.window.iter_mut().find(|f| f.seq == seq) else {
                    continue;
                };
                record.ack_req = ack_req;
                record.send_time = now;
                let record = *record;
                build_fragment(entry, &record)
            };
            self.transmit(handle, frame, now)?;
            self.stats.resent(cause);
            log::trace!("resent fragment {seq} of {handle} ({cause:?})");
            if ack_req {
                self.arm_arq(handle, now, true);
            }
        }
        self.refresh_state(handle);
        Ok(())
    }

    /// Hand a fragment to the interface or to the paced queue.
    fn transmit(&mut self, handle: Handle, frame: Bytes, now: Instant) -> Result<(), FragError> {
        let entry = self.fbuf.entry_mut(handle).ok_or(FragError::StaleEntry)?;
        let (netif, dst) = (entry.netif(), entry.dst());
        let sfr = entry.sfr.as_mut().ok_or(FragError::StaleEntry)?;
        let gap = sfr.controller.inter_frame_gap();
        let due = sfr.next_slot.filter(|slot| *slot > now).unwrap_or(now);
        sfr.next_slot = (!gap.is_zero()).then(|| due + gap);

        let frame = if due > now {
            match self.queue.push(QueuedFrame {
                due,
                netif,
                dst,
                frame,
                owner: handle,
            }) {
                Ok(()) => {
                    sfr.controller.report_sent(1);
                    return Ok(());
                }
                Err(queued) => queued.frame,
            }
        } else {
            frame
        };
        match self.netifs.send(netif, &dst, frame) {
            Ok(_) => {
                sfr.controller.report_sent(1);
                Ok(())
            }
            Err(err) => {
                sfr.controller.report_discarded(1);
                Err(err)
            }
        }
    }

    fn arm_arq(&mut self, handle: Handle, now: Instant, replace: bool) {
        if !replace && self.timers.deadline(handle, TimerKind::Arq).is_some() {
            return;
        }
        let Some(timeout) = self
            .fbuf
            .entry(handle)
            .and_then(FbufEntry::sfr)
            .map(|sfr| sfr.arq_timeout)
        else {
            return;
        };
        self.timers.schedule(handle, TimerKind::Arq, now + timeout);
    }

    fn refresh_state(&mut self, handle: Handle) {
        let Some(entry) = self.fbuf.entry_mut(handle) else {
            return;
        };
        let all_sent = entry.offset >= entry.datagram_size;
        if let Some(sfr) = entry.sfr.as_mut()
            && sfr.state != SendState::Aborting
        {
            sfr.state = if !sfr.window.is_empty() && (all_sent || !sfr.in_window()) {
                SendState::AwaitingAck
            } else {
                SendState::Sending
            };
        }
    }

    pub(super) fn on_arq_timeout(&mut self, handle: Handle, now: Instant) {
        let retries = self.config.sfr_frag_retries;
        let Some(entry) = self.fbuf.entry_mut(handle) else {
            log::trace!("ignoring ARQ timer of released {handle}");
            return;
        };
        let tag = entry.tag;
        let Some(sfr) = entry.sfr.as_mut() else {
            return;
        };
        if sfr.state == SendState::Aborting {
            let cause = sfr
                .abort_cause
                .take()
                .unwrap_or(FragError::Aborted { tag });
            self.finish(handle, Err(cause));
            return;
        }
        if sfr.window.is_empty() {
            if let Err(err) = self.send_window(handle, now) {
                self.abort_datagram(handle, err, now);
            }
            return;
        }

        let arq = sfr.arq_timeout;
        let timed_out: Vec<InFlight> = sfr
            .window
            .iter()
            .filter(|f| now.saturating_duration_since(f.send_time) >= arq)
            .copied()
            .collect();
        if !timed_out.is_empty() {
            sfr.controller.report_timed_out(&timed_out);
            shrink_window(sfr, &mut entry.offset);
        }

        let mut resend = Vec::new();
        let mut next_check: Option<Duration> = None;
        let mut exhausted = false;
        for frag in &mut sfr.window {
            let age = now.saturating_duration_since(frag.send_time);
            if age < arq {
                let wait = arq - age;
                next_check = Some(next_check.map_or(wait, |n| n.min(wait)));
            } else if frag.resends >= retries {
                exhausted = true;
                break;
            } else {
                frag.resends += 1;
                resend.push(frag.seq);
            }
        }

        if exhausted {
            log::info!("fragment retries exhausted for datagram tag {tag}");
            self.retry_datagram(handle, FragError::RetryBudgetExhausted { tag }, now);
        } else if !resend.is_empty() {
            if let Err(err) = self.resend(handle, &resend, true, ResendCause::Timeout, now) {
                self.abort_datagram(handle, err, now);
            }
        } else if let Some(wait) = next_check {
            self.timers.schedule(handle, TimerKind::Arq, now + wait);
        }
    }

    /// Start the datagram over if its budget allows, fail it otherwise.
    fn retry_datagram(&mut self, handle: Handle, cause: FragError, now: Instant) {
        let Some(entry) = self.fbuf.entry_mut(handle) else {
            return;
        };
        let tag = entry.tag;
        let Some(sfr) = entry.sfr.as_mut() else {
            return;
        };
        if sfr.datagram_retries == 0 {
            self.finish(handle, Err(cause));
            return;
        }
        sfr.datagram_retries -= 1;
        sfr.reset();
        sfr.state = SendState::Sending;
        entry.offset = 0;
        self.timers.cancel(handle);
        self.queue.remove_owner(handle);
        self.stats.datagram_resent();
        log::info!("restarting datagram tag {tag} after: {cause}");
        if let Err(err) = self.send_window(handle, now) {
            self.abort_datagram(handle, err, now);
        }
    }

    /// Give up on a datagram after a local failure.
    ///
    /// Once fragments are out, the receiver is told with an abort fragment
    /// and the outcome is reported when it is acknowledged or the ARQ timer
    /// fires.
    fn abort_datagram(&mut self, handle: Handle, cause: FragError, now: Instant) {
        let Some(entry) = self.fbuf.entry_mut(handle) else {
            return;
        };
        let (netif, dst, short) = (entry.netif(), entry.dst(), entry.short_tag());
        let Some(sfr) = entry.sfr.as_mut() else {
            return;
        };
        if sfr.next_seq == 0 {
            self.finish(handle, Err(cause));
            return;
        }
        sfr.window.clear();
        sfr.state = SendState::Aborting;
        sfr.abort_cause = Some(cause.clone());
        self.queue.remove_owner(handle);

        let mut frame = BytesMut::with_capacity(RFRAG_HEADER_LEN);
        RfragHeader::abort(short, true).write(&mut frame);
        match self.netifs.send(netif, &dst, frame.freeze()) {
            Ok(_) => {
                self.stats.sent(SentKind::Abort);
                log::warn!("aborting {handle}: {cause}");
                self.arm_arq(handle, now, true);
            }
            Err(err) => {
                log::warn!("could not send abort fragment for {handle}: {err}");
                self.finish(handle, Err(cause));
            }
        }
    }

    /// Release a datagram and report its outcome upward.
    fn finish(&mut self, handle: Handle, result: Result<(), FragError>) {
        self.timers.cancel(handle);
        self.queue.remove_owner(handle);
        let Some(mut entry) = self.fbuf.remove(handle) else {
            return;
        };
        if let Some(sfr) = entry.sfr.as_mut() {
            sfr.state = if result.is_ok() {
                SendState::Done
            } else {
                SendState::Failed
            };
        }
        match &result {
            Ok(()) => log::debug!("datagram tag {} acknowledged", entry.tag),
            Err(err) => log::warn!("datagram tag {} failed: {err}", entry.tag),
        }
        self.upper.send_completed(entry.tag, result);
    }

    pub(super) fn receive_ack(
        &mut self,
        frame: &ReceivedFrame<'_>,
        now: Instant,
    ) -> Result<Disposition, FragError> {
        let ack = RfragAck::parse(frame.payload)?;
        if let Some(vrb) = self.vrb.reverse(frame.netif, &frame.src, ack.tag) {
            return self.relay_ack(vrb, ack, now);
        }
        let handle = self
            .fbuf
            .by_short_tag(&frame.src, ack.tag)
            .ok_or(FragError::UnknownDatagram {
                tag: u16::from(ack.tag),
            })?;
        self.timers.cancel_kind(handle, TimerKind::Arq);

        let Some(entry) = self.fbuf.entry_mut(handle) else {
            return Err(FragError::StaleEntry);
        };
        let tag = entry.tag;
        if let Some(sfr) = entry.sfr.as_mut()
            && sfr.state == SendState::Aborting
        {
            let cause = sfr
                .abort_cause
                .take()
                .unwrap_or(FragError::Aborted { tag });
            self.finish(handle, Err(cause));
            return Ok(Disposition::Acknowledged);
        }
        if ack.bitmap.is_null() {
            self.stats.ack(AckKind::Abort);
            log::info!("receiver aborted datagram tag {tag}");
            self.retry_datagram(handle, FragError::Aborted { tag }, now);
        } else {
            self.process_bitmap(handle, ack, now);
        }
        Ok(Disposition::Acknowledged)
    }

    fn process_bitmap(&mut self, handle: Handle, ack: RfragAck, now: Instant) {
        let retries = self.config.sfr_frag_retries;
        let Some(entry) = self.fbuf.entry_mut(handle) else {
            return;
        };
        let tag = entry.tag;
        let Some(sfr) = entry.sfr.as_mut() else {
            return;
        };
        let earliest = sfr.earliest_send();
        let mut pending = VecDeque::new();
        let mut exhausted = false;
        for mut frag in std::mem::take(&mut sfr.window) {
            if ack.bitmap.contains(frag.seq) {
                sfr.controller.report_acked(&frag, now);
            } else if frag.resends >= retries {
                exhausted = true;
            } else {
                frag.resends += 1;
                frag.ack_req = false;
                pending.push_back(frag);
            }
        }
        if ack.ecn
            && let Some(earliest) = earliest
        {
            sfr.controller.report_ecn(earliest);
        }
        if exhausted {
            log::info!("fragment retries exhausted for datagram tag {tag}");
            self.retry_datagram(handle, FragError::RetryBudgetExhausted { tag }, now);
            return;
        }
        if pending.is_empty() && entry.offset >= entry.datagram_size {
            self.stats.ack(AckKind::Full);
            self.finish(handle, Ok(()));
            return;
        }
        self.stats.ack(AckKind::Partly);
        if !pending.is_empty() {
            sfr.controller.report_lost(pending.make_contiguous());
        }
        sfr.window = pending;
        shrink_window(sfr, &mut entry.offset);
        let seqs: Vec<u8> = sfr.window.iter().map(|f| f.seq).collect();
        let request_last = !sfr.in_window() || entry.offset >= entry.datagram_size;

        let result = self
            .resend(handle, &seqs, request_last, ResendCause::Nack, now)
            .and_then(|()| self.send_window(handle, now));
        if let Err(err) = result {
            self.abort_datagram(handle, err, now);
        }
    }

    /// Translate an acknowledgement from the next hop for the previous one.
    fn relay_ack(
        &mut self,
        vrb: Handle,
        ack: RfragAck,
        now: Instant,
    ) -> Result<Disposition, FragError> {
        let entry = self.vrb.entry(vrb).ok_or(FragError::StaleEntry)?;
        let (in_netif, prev_hop) = (entry.in_netif(), entry.incoming().src);
        let relayed = RfragAck {
            tag: short_tag(entry.incoming().tag),
            ..ack
        };
        self.send_ack(in_netif, prev_hop, relayed)?;
        self.stats.ack(AckKind::Forwarded);
        if ack.bitmap.is_full() || ack.bitmap.is_null() {
            let delay = self.config.vrb_release_delay;
            if delay.is_zero() {
                self.vrb.remove(vrb);
            } else {
                self.timers.schedule(vrb, TimerKind::VrbRelease, now + delay);
            }
        }
        Ok(Disposition::AckRelayed)
    }

    pub(super) fn receive_rfrag(
        &mut self,
        frame: &ReceivedFrame<'_>,
        now: Instant,
    ) -> Result<Disposition, FragError> {
        let (header, header_len) = RfragHeader::parse(frame.payload)?;
        let key = DatagramKey::new(frame.src, frame.dst, u16::from(header.tag));
        if header.is_abort() {
            return Ok(self.receive_abort(frame, key, header));
        }
        let payload = frame
            .payload
            .get(header_len..header_len + usize::from(header.frag_size))
            .ok_or(FragError::MalformedFragment("truncated RFRAG payload"))?;
        if payload.is_empty() {
            return Err(FragError::MalformedFragment("empty RFRAG"));
        }
        if header.is_first() {
            self.rfrag_first(frame, key, header, payload, now)
        } else {
            self.rfrag_next(frame, key, header, payload, now)
        }
    }

    fn rfrag_first(
        &mut self,
        frame: &ReceivedFrame<'_>,
        key: DatagramKey,
        header: RfragHeader,
        payload: &[u8],
        now: Instant,
    ) -> Result<Disposition, FragError> {
        let size = usize::from(header.offset);
        let ipv6 = self.uncompress(payload).ok().map(|(ipv6, _)| ipv6);

        if let Some(vrb) = self.vrb.get(&key.src, key.tag) {
            let hop_limit = ipv6.map_or(0, |h| h.hop_limit.saturating_sub(1));
            return self.rfrag_forward(frame, key, vrb, header, payload, hop_limit, now);
        }
        if self.rbuf.get(&key).is_none() {
            if self.rbuf.is_held_off(&key, now) {
                self.repeat_full_ack(frame, key, header);
                return Err(FragError::DuplicateFragment);
            }
            if let Some(ipv6) = ipv6.filter(|h| h.hop_limit > 1) {
                match self.vrb.from_route(
                    key,
                    frame.netif,
                    size,
                    &ipv6.dst,
                    Transport::Selective,
                    self.routes.as_ref(),
                    &mut self.tags,
                    now,
                ) {
                    Ok(vrb) => {
                        return self.rfrag_forward(
                            frame,
                            key,
                            vrb,
                            header,
                            payload,
                            ipv6.hop_limit - 1,
                            now,
                        );
                    }
                    Err(FromRouteError::NoRoute) => {}
                    Err(FromRouteError::Full) => {
                        log::warn!("vrb full, aborting {key}");
                        self.send_abort_ack(frame.netif, key.src, key.tag);
                        return Err(FragError::PoolExhausted {
                            pool: PoolKind::Vrb,
                        });
                    }
                }
            }
        }
        self.rfrag_reassemble(frame, key, header, payload, now)
    }

    fn rfrag_next(
        &mut self,
        frame: &ReceivedFrame<'_>,
        key: DatagramKey,
        header: RfragHeader,
        payload: &[u8],
        now: Instant,
    ) -> Result<Disposition, FragError> {
        if self.rbuf.get(&key).is_some() {
            return self.rfrag_reassemble(frame, key, header, payload, now);
        }
        if let Some(vrb) = self.vrb.get(&key.src, key.tag) {
            return self.rfrag_forward(frame, key, vrb, header, payload, 0, now);
        }
        if self.rbuf.is_held_off(&key, now) {
            self.repeat_full_ack(frame, key, header);
            return Err(FragError::DuplicateFragment);
        }
        self.send_abort_ack(frame.netif, key.src, key.tag);
        Err(FragError::UnknownDatagram { tag: key.tag })
    }

    #[expect(clippy::too_many_arguments, reason = "fragment context is passed through")]
    fn rfrag_forward(
        &mut self,
        frame: &ReceivedFrame<'_>,
        key: DatagramKey,
        vrb: Handle,
        header: RfragHeader,
        payload: &[u8],
        hop_limit: u8,
        now: Instant,
    ) -> Result<Disposition, FragError> {
        let offset = if header.is_first() {
            0
        } else {
            usize::from(header.offset)
        };
        let fragment = ForwardFragment {
            header: InboundHeader::Rfrag(header),
            payload,
            span: offset..offset + payload.len(),
            hop_limit,
            mark_ecn: self.queue.len() >= self.config.ecn_queue_threshold,
        };
        match self
            .vrb
            .forward(vrb, &fragment, self.compressor.as_deref(), &mut self.netifs, now)
        {
            Ok(_) => {
                self.stats.sent(SentKind::Forwarded);
                Ok(Disposition::Forwarded)
            }
            Err(err) if header.is_first() => {
                self.vrb.remove(vrb);
                self.send_abort_ack(frame.netif, key.src, key.tag);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn rfrag_reassemble(
        &mut self,
        frame: &ReceivedFrame<'_>,
        key: DatagramKey,
        header: RfragHeader,
        payload: &[u8],
        now: Instant,
    ) -> Result<Disposition, FragError> {
        let existing = self.rbuf.get(&key);
        let rbuf = match (header.datagram_size(), existing) {
            (Some(size), _) => {
                match self.rbuf.start_or_get(
                    key,
                    usize::from(size),
                    frame.netif,
                    Transport::Selective,
                    now,
                ) {
                    Ok(rbuf) => rbuf,
                    Err(err) => {
                        self.send_abort_ack(frame.netif, key.src, key.tag);
                        return Err(err);
                    }
                }
            }
            (None, Some(rbuf)) => rbuf,
            (None, None) => {
                self.send_abort_ack(frame.netif, key.src, key.tag);
                return Err(FragError::UnknownDatagram { tag: key.tag });
            }
        };
        let offset = if header.is_first() {
            0
        } else {
            usize::from(header.offset)
        };
        self.rbuf.mark_received(rbuf, header.seq, header.ecn);

        let status = match self.rbuf.insert_fragment(rbuf, offset, payload, now) {
            Ok(status) => status,
            Err(err) => {
                self.rbuf.remove(rbuf);
                self.send_abort_ack(frame.netif, key.src, key.tag);
                return Err(err);
            }
        };
        if status == ReassemblyStatus::Complete {
            return self.complete_selective(rbuf, now);
        }
        if header.ack_req {
            let bitmap = self.rbuf.bitmap(rbuf);
            self.acknowledge(rbuf, frame.netif, key, bitmap);
        }
        match status {
            ReassemblyStatus::Duplicate => Err(FragError::DuplicateFragment),
            ReassemblyStatus::Overlap => Err(FragError::Overlap),
            ReassemblyStatus::Complete | ReassemblyStatus::Incomplete => Ok(Disposition::Buffered),
        }
    }

    fn complete_selective(&mut self, rbuf: Handle, now: Instant) -> Result<Disposition, FragError> {
        let ecn = self.rbuf.take_ecn(rbuf);
        let done = self.rbuf.take(rbuf, now).ok_or(FragError::StaleEntry)?;
        match self.uncompress(&done.payload) {
            Ok((_, raw)) => {
                self.deliver(done.key, done.netif, raw.freeze());
                let ack = RfragAck {
                    ecn,
                    ..RfragAck::new(short_tag(done.key.tag), AckBitmap::FULL)
                };
                if let Err(err) = self.send_ack(done.netif, done.key.src, ack) {
                    log::warn!("could not acknowledge {}: {err}", done.key);
                }
                Ok(Disposition::Delivered)
            }
            Err(err) => {
                self.send_abort_ack(done.netif, done.key.src, done.key.tag);
                Err(err)
            }
        }
    }

    /// Confirm a datagram delivered moments ago whose final acknowledgement
    /// was evidently lost.
    fn repeat_full_ack(&mut self, frame: &ReceivedFrame<'_>, key: DatagramKey, header: RfragHeader) {
        if !header.ack_req {
            return;
        }
        let ack = RfragAck::new(short_tag(key.tag), AckBitmap::FULL);
        if let Err(err) = self.send_ack(frame.netif, key.src, ack) {
            log::warn!("could not repeat acknowledgement for {key}: {err}");
        }
    }

    /// Handle the abort pseudo-fragment.
    ///
    /// A forwarder relays it to the next hop and forgets the datagram; the
    /// acknowledgement, if requested, is answered locally.
    fn receive_abort(
        &mut self,
        frame: &ReceivedFrame<'_>,
        key: DatagramKey,
        header: RfragHeader,
    ) -> Disposition {
        if let Some(vrb) = self.vrb.get(&key.src, key.tag) {
            if let Some(entry) = self.vrb.remove(vrb) {
                let mut abort = BytesMut::with_capacity(RFRAG_HEADER_LEN);
                RfragHeader::abort(short_tag(entry.out_tag()), false).write(&mut abort);
                match self
                    .netifs
                    .send(entry.out_netif(), &entry.out_dst(), abort.freeze())
                {
                    Ok(_) => self.stats.sent(SentKind::Forwarded),
                    Err(err) => log::warn!("could not relay abort of {key}: {err}"),
                }
            }
        } else if let Some(rbuf) = self.rbuf.get(&key) {
            self.rbuf.remove(rbuf);
        }
        log::info!("{key} aborted by sender");
        if header.ack_req {
            self.send_abort_ack(frame.netif, key.src, key.tag);
        }
        Disposition::Aborted
    }
}
