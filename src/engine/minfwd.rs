//! Classic RFC 4944 fragmentation with minimal fragment forwarding.
//!
//! Outgoing datagrams are cut into FRAG1/FRAGN fragments whose payloads are
//! multiples of eight uncompressed bytes. Incoming fragments are either
//! relayed fragment by fragment through the VRB, when the first fragment
//! names a destination reachable via another hop, or reassembled in the
//! RBUF. FRAGN offsets count uncompressed bytes, so the reassembly target
//! holds the uncompressed datagram and the first fragment is decompressed
//! before it is stored.

use std::{ops::Range, time::Instant};

use bytes::{BufMut, BytesMut};

use super::{Disposition, FragEngine, SendOutcome};
use crate::{
    DatagramKey,
    buffer::{
        FbufEntry,
        ForwardFragment,
        ForwardOutcome,
        FromRouteError,
        InboundHeader,
        ReassemblyStatus,
        Transport,
    },
    datagram::Datagram,
    error::FragError,
    netif::ReceivedFrame,
    pool::{Handle, PoolKind},
    stats::SentKind,
    wire::{
        FragHeader,
        floor8,
        frag::{FRAG1_HEADER_LEN, FRAGN_HEADER_LEN, MAX_DATAGRAM_SIZE},
    },
};

fn signed(value: usize) -> Result<isize, FragError> {
    isize::try_from(value).map_err(|_| FragError::DatagramTooLarge {
        size: value,
        limit: MAX_DATAGRAM_SIZE,
    })
}

/// Payload lengths of the first and the following fragments.
///
/// `diff` is the uncompressed size minus the length of the 6LoWPAN form.
/// The first fragment must end on an eight-byte boundary of the
/// uncompressed datagram, every later one carries a multiple of eight bytes.
fn classic_sizes(max_frame: usize, diff: isize) -> Result<(usize, usize), FragError> {
    let too_small = FragError::FrameTooLarge {
        size: FRAGN_HEADER_LEN + 8,
        limit: max_frame,
    };
    let budget = usize::try_from(signed(max_frame)? + diff - signed(FRAG1_HEADER_LEN)?)
        .map_err(|_| too_small.clone())?;
    let first_end = floor8(budget);
    let rest = floor8(max_frame.saturating_sub(FRAGN_HEADER_LEN));
    if first_end == 0 || rest == 0 {
        return Err(too_small);
    }
    let first = usize::try_from(signed(first_end)? - diff).map_err(|_| too_small.clone())?;
    if first == 0 {
        return Err(too_small);
    }
    Ok((first, rest))
}

impl FragEngine {
    pub(super) fn send_classic(
        &mut self,
        datagram: Datagram,
        max_frame: usize,
    ) -> Result<SendOutcome, FragError> {
        let size = datagram.datagram_size();
        if size > MAX_DATAGRAM_SIZE {
            return Err(FragError::DatagramTooLarge {
                size,
                limit: MAX_DATAGRAM_SIZE,
            });
        }
        let tag = self.tags.next_tag();
        let handle = self.fbuf.alloc(FbufEntry::new(datagram, tag, None))?;
        let result = self.emit_classic(handle, max_frame);
        self.fbuf.remove(handle);
        let fragments = result?;
        log::debug!("sent datagram tag {tag} ({size} bytes) in {fragments} fragments");
        Ok(SendOutcome::Fragmented { tag, fragments })
    }

    fn emit_classic(&mut self, handle: Handle, max_frame: usize) -> Result<usize, FragError> {
        let entry = self.fbuf.entry(handle).ok_or(FragError::StaleEntry)?;
        let (netif, dst, tag) = (entry.netif(), entry.dst(), entry.tag());
        let payload = entry.payload().clone();
        let size = entry.datagram_size();
        let size_field = u16::try_from(size).map_err(|_| FragError::DatagramTooLarge {
            size,
            limit: MAX_DATAGRAM_SIZE,
        })?;
        let diff = signed(size)? - signed(payload.len())?;
        let (first, rest) = classic_sizes(max_frame, diff)?;

        let mut frame = BytesMut::with_capacity(FRAG1_HEADER_LEN + first);
        FragHeader::first(size_field, tag).write(&mut frame);
        frame.put_slice(&payload[..first]);
        self.netifs.send(netif, &dst, frame.freeze())?;
        self.stats.sent(SentKind::Usual);

        let mut fragments = 1;
        let mut pos = first;
        while pos < payload.len() {
            let len = rest.min(payload.len() - pos);
            let offset = usize::try_from(signed(pos)? + diff)
                .ok()
                .and_then(|offset| u16::try_from(offset).ok())
                .ok_or(FragError::MalformedFragment("fragment offset out of range"))?;
            let mut frame = BytesMut::with_capacity(FRAGN_HEADER_LEN + len);
            FragHeader::subsequent(size_field, tag, offset).write(&mut frame);
            frame.put_slice(&payload[pos..pos + len]);
            self.netifs.send(netif, &dst, frame.freeze())?;
            self.stats.sent(SentKind::Usual);
            fragments += 1;
            pos += len;
        }
        Ok(fragments)
    }

    pub(super) fn receive_classic(
        &mut self,
        frame: &ReceivedFrame<'_>,
        now: Instant,
    ) -> Result<Disposition, FragError> {
        let (header, header_len) = FragHeader::parse(frame.payload)?;
        let payload = &frame.payload[header_len..];
        if payload.is_empty() {
            return Err(FragError::MalformedFragment("empty fragment"));
        }
        let key = DatagramKey::new(frame.src, frame.dst, header.tag());
        if header.is_first() {
            self.classic_first(frame, key, header, payload, now)
        } else {
            self.classic_subsequent(frame, key, header, payload, now)
        }
    }

    fn classic_first(
        &mut self,
        frame: &ReceivedFrame<'_>,
        key: DatagramKey,
        header: FragHeader,
        payload: &[u8],
        now: Instant,
    ) -> Result<Disposition, FragError> {
        let size = usize::from(header.datagram_size());
        let (ipv6, raw) = self.uncompress(payload)?;
        let span = 0..raw.len();

        if let Some(vrb) = self.vrb.get(&key.src, key.tag) {
            let hop_limit = ipv6.hop_limit.saturating_sub(1);
            return self.forward_classic(vrb, header, payload, span, hop_limit, now);
        }
        if self.rbuf.get(&key).is_none() {
            if self.rbuf.is_held_off(&key, now) {
                return Err(FragError::DuplicateFragment);
            }
            if ipv6.hop_limit > 1 {
                match self.vrb.from_route(
                    key,
                    frame.netif,
                    size,
                    &ipv6.dst,
                    Transport::Classic,
                    self.routes.as_ref(),
                    &mut self.tags,
                    now,
                ) {
                    Ok(vrb) => {
                        let result =
                            self.forward_classic(vrb, header, payload, span, ipv6.hop_limit - 1, now);
                        if result.is_err() {
                            self.vrb.remove(vrb);
                        }
                        return result;
                    }
                    Err(FromRouteError::NoRoute) => {}
                    Err(FromRouteError::Full) => {
                        log::warn!("vrb full, dropping {key}");
                        self.classic_abort(frame, key);
                        return Err(FragError::PoolExhausted {
                            pool: PoolKind::Vrb,
                        });
                    }
                }
            }
        }

        let rbuf = match self
            .rbuf
            .start_or_get(key, size, frame.netif, Transport::Classic, now)
        {
            Ok(rbuf) => rbuf,
            Err(err) => {
                self.classic_abort(frame, key);
                return Err(err);
            }
        };
        let status = self.rbuf.insert_fragment(rbuf, 0, &raw, now);
        self.after_classic_insert(rbuf, status, now)
    }

    fn classic_subsequent(
        &mut self,
        frame: &ReceivedFrame<'_>,
        key: DatagramKey,
        header: FragHeader,
        payload: &[u8],
        now: Instant,
    ) -> Result<Disposition, FragError> {
        let size = usize::from(header.datagram_size());
        let offset = usize::from(header.offset());
        let span = offset..offset + payload.len();
        if span.end > size {
            return Err(FragError::MalformedFragment("fragment exceeds datagram size"));
        }

        if let Some(vrb) = self.vrb.get(&key.src, key.tag) {
            return self.forward_classic(vrb, header, payload, span, 0, now);
        }
        if let Some(rbuf) = self.rbuf.get(&key) {
            if self
                .rbuf
                .entry(rbuf)
                .is_some_and(|entry| entry.datagram_size() != size)
            {
                self.rbuf.remove(rbuf);
                return Err(FragError::MalformedFragment("datagram size changed"));
            }
            let status = self.rbuf.insert_fragment(rbuf, offset, payload, now);
            return self.after_classic_insert(rbuf, status, now);
        }
        if self.rbuf.is_held_off(&key, now) {
            return Err(FragError::DuplicateFragment);
        }
        self.classic_abort(frame, key);
        Err(FragError::UnknownDatagram { tag: key.tag })
    }

    fn after_classic_insert(
        &mut self,
        rbuf: Handle,
        status: Result<ReassemblyStatus, FragError>,
        now: Instant,
    ) -> Result<Disposition, FragError> {
        match status {
            Ok(ReassemblyStatus::Complete) => {
                let done = self.rbuf.take(rbuf, now).ok_or(FragError::StaleEntry)?;
                self.deliver(done.key, done.netif, done.payload);
                Ok(Disposition::Delivered)
            }
            Ok(ReassemblyStatus::Incomplete) => Ok(Disposition::Buffered),
            Ok(ReassemblyStatus::Duplicate) => Err(FragError::DuplicateFragment),
            Ok(ReassemblyStatus::Overlap) => {
                if let Some(entry) = self.rbuf.remove(rbuf) {
                    log::warn!("overlapping fragment, discarding reassembly of {}", entry.key());
                }
                Err(FragError::Overlap)
            }
            Err(err @ FragError::PoolExhausted { .. }) => {
                self.rbuf.remove(rbuf);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn forward_classic(
        &mut self,
        vrb: Handle,
        header: FragHeader,
        payload: &[u8],
        span: Range<usize>,
        hop_limit: u8,
        now: Instant,
    ) -> Result<Disposition, FragError> {
        let fragment = ForwardFragment {
            header: InboundHeader::Frag(header),
            payload,
            span,
            hop_limit,
            mark_ecn: false,
        };
        match self
            .vrb
            .forward(vrb, &fragment, self.compressor.as_deref(), &mut self.netifs, now)?
        {
            ForwardOutcome::Forwarded { .. } => {
                self.stats.sent(SentKind::Forwarded);
                Ok(Disposition::Forwarded)
            }
            ForwardOutcome::Duplicate => Err(FragError::DuplicateFragment),
            ForwardOutcome::Overlap => Err(FragError::Overlap),
        }
    }

    /// Answer a dropped classic datagram with an abort acknowledgement when
    /// configured to.
    fn classic_abort(&mut self, frame: &ReceivedFrame<'_>, key: DatagramKey) {
        if self.config.classic_abort_ack {
            self.send_abort_ack(frame.netif, key.src, key.tag);
        }
    }
}
