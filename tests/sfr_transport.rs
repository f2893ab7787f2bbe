//! End-to-end tests for selective fragment recovery between engines.
//!
//! A datagram of 198 uncompressed bytes whose toy-compressed form is 193
//! bytes is sent over 102-byte frames, giving fragments of 91, 96 and 6
//! bytes. Frames are carried by hand so that tests can lose, delay or
//! replay them.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use log::Level;
use lowpan_frag::{
    CongestionController,
    Datagram,
    Disposition,
    FragConfig,
    FragError,
    L2Addr,
    LinkError,
    NetifId,
    ReceivedFrame,
    SendOutcome,
    wire::{AckBitmap, RfragAck, RfragHeader},
};
use lowpan_frag_testing::{
    LoggerHandle,
    Node,
    StaticRoutes,
    ToyCompressor,
    logger,
    recording_factory,
    toy_dst,
    transfer,
    transfer_where,
};
use rstest::rstest;
use serial_test::serial;

const MAX_FRAME: usize = 102;
const PAYLOAD_LEN: usize = 158;
const PAD: u8 = 29;
const ARQ: Duration = Duration::from_millis(100);

fn config() -> FragConfig { FragConfig::selective().with_sfr_arq_timeout(ARQ) }

fn node(addr: u16, config: FragConfig) -> Node {
    Node::new(addr, MAX_FRAME, config, |b| b.compressor(ToyCompressor::default()))
}

fn datagram(sender: &Node, next_hop: L2Addr) -> Datagram {
    let form = ToyCompressor::compress(64, 2, PAD, &[0x5a; PAYLOAD_LEN]);
    assert_eq!(form.len(), 193);
    Datagram::compressed(
        sender.radio.id(),
        next_hop,
        Bytes::from(form),
        ToyCompressor::uncompressed_size(PAYLOAD_LEN),
    )
}

fn start(sender: &mut Node, next_hop: L2Addr, now: Instant) -> u16 {
    let outcome = sender
        .engine
        .send_datagram(datagram(sender, next_hop), now)
        .expect("send accepted");
    let SendOutcome::InProgress { tag, .. } = outcome else {
        panic!("expected selective send, got {outcome:?}");
    };
    tag
}

fn headers(node: &Node) -> Vec<RfragHeader> {
    node.radio
        .frames()
        .iter()
        .map(|sent| RfragHeader::parse(&sent.frame).expect("RFRAG").0)
        .collect()
}

fn acks(node: &Node) -> Vec<RfragAck> {
    node.radio
        .frames()
        .iter()
        .map(|sent| RfragAck::parse(&sent.frame).expect("RFRAG-ACK"))
        .collect()
}

#[test]
fn datagram_travels_in_three_fragments() {
    let now = Instant::now();
    let mut a = node(1, config());
    let mut b = node(2, config());
    let tag = start(&mut a, b.addr(), now);
    assert_eq!(tag, 1);

    let sent: Vec<_> = headers(&a)
        .iter()
        .map(|h| (h.seq, h.frag_size, h.offset, h.ack_req))
        .collect();
    assert_eq!(
        sent,
        vec![(0, 91, 193, false), (1, 96, 91, false), (2, 6, 187, true)]
    );

    let received = transfer(&a, &mut b, now);
    assert_eq!(
        received,
        vec![
            Ok(Disposition::Buffered),
            Ok(Disposition::Buffered),
            Ok(Disposition::Delivered)
        ]
    );
    let delivered = b.upper.delivered();
    assert_eq!(delivered.len(), 1);
    let payload = delivered[0].payload();
    assert_eq!(payload.len(), 198);
    assert_eq!(payload[7], 64, "hop limit restored from the compressed header");
    assert!(payload[40..].iter().all(|&byte| byte == 0x5a));

    let full = acks(&b);
    assert_eq!(full.len(), 1);
    assert!(full[0].bitmap.is_full());
    assert_eq!(transfer(&b, &mut a, now), vec![Ok(Disposition::Acknowledged)]);

    assert_eq!(a.upper.completed(), vec![(tag, Ok(()))]);
    assert!(a.engine.fbuf().is_empty());
    assert_eq!(a.engine.next_deadline(), None);
    let stats = a.engine.stats();
    assert_eq!(stats.fragments_sent.usual, 3);
    assert_eq!(stats.acks.full, 1);
    assert_eq!(b.engine.stats().datagrams_delivered, 1);
}

#[test]
fn partial_ack_resends_only_missing_fragment() {
    let now = Instant::now();
    let (factory, calls) = recording_factory(16, Duration::ZERO);
    let mut a = Node::new(1, MAX_FRAME, config(), |b| b.congestion(factory));
    let mut b = node(2, config());
    let tag = start(&mut a, b.addr(), now);

    let received = transfer_where(&a, &mut b, now, |i, _| i != 1);
    assert_eq!(received, vec![Ok(Disposition::Buffered), Ok(Disposition::Buffered)]);
    let partial = acks(&b);
    assert_eq!(partial.len(), 1);
    let bitmap = partial[0].bitmap;
    assert!(bitmap.contains(0) && !bitmap.contains(1) && bitmap.contains(2));

    assert_eq!(transfer(&b, &mut a, now), vec![Ok(Disposition::Acknowledged)]);
    let resent = headers(&a);
    assert_eq!(resent.len(), 1);
    assert_eq!(
        (resent[0].seq, resent[0].frag_size, resent[0].offset, resent[0].ack_req),
        (1, 96, 91, true)
    );

    assert_eq!(transfer(&a, &mut b, now), vec![Ok(Disposition::Delivered)]);
    assert_eq!(transfer(&b, &mut a, now), vec![Ok(Disposition::Acknowledged)]);
    assert_eq!(a.upper.completed(), vec![(tag, Ok(()))]);

    let stats = a.engine.stats();
    assert_eq!(stats.fragment_resends.by_nack, 1);
    assert_eq!((stats.acks.partly, stats.acks.full), (1, 1));
    let calls = calls.calls();
    assert_eq!(calls.lost, vec![1]);
    assert_eq!(calls.acked, vec![0, 2, 1]);
    assert_eq!(calls.sent, 4);
}

#[test]
fn timeout_resends_every_unacknowledged_fragment() {
    let now = Instant::now();
    let (factory, calls) = recording_factory(16, Duration::ZERO);
    let mut a = Node::new(1, MAX_FRAME, config(), |b| b.congestion(factory));
    let mut b = node(2, config());
    let tag = start(&mut a, b.addr(), now);
    a.radio.take_frames();

    assert_eq!(a.engine.next_deadline(), Some(now + ARQ));
    a.engine.poll(now + ARQ / 2);
    assert!(a.radio.frames().is_empty());

    a.engine.poll(now + ARQ);
    let resent: Vec<_> = headers(&a).iter().map(|h| (h.seq, h.ack_req)).collect();
    assert_eq!(resent, vec![(0, false), (1, false), (2, true)]);
    assert_eq!(a.engine.stats().fragment_resends.by_timeout, 3);
    assert_eq!(calls.calls().timed_out, vec![0, 1, 2]);

    let later = now + ARQ;
    assert_eq!(transfer(&a, &mut b, later).last(), Some(&Ok(Disposition::Delivered)));
    transfer(&b, &mut a, later);
    assert_eq!(a.upper.completed(), vec![(tag, Ok(()))]);
}

fn acknowledge(receiver: &Node, sender: &mut Node, tag: u16, bitmap: AckBitmap, now: Instant) {
    let short = u8::try_from(tag).expect("tag fits in one byte");
    let mut ack = BytesMut::new();
    RfragAck::new(short, bitmap).write(&mut ack);
    let disposition = sender.engine.receive(
        &ReceivedFrame {
            netif: sender.radio.id(),
            src: receiver.addr(),
            dst: sender.addr(),
            payload: &ack,
        },
        now,
    );
    assert_eq!(disposition, Ok(Disposition::Acknowledged));
}

#[test]
fn full_ack_reports_every_fragment_once() {
    let now = Instant::now();
    let (factory, calls) = recording_factory(16, Duration::ZERO);
    let mut a = Node::new(1, MAX_FRAME, config(), |b| b.congestion(factory));
    let mut b = node(2, config());
    let tag = start(&mut a, b.addr(), now);

    assert_eq!(transfer(&a, &mut b, now).last(), Some(&Ok(Disposition::Delivered)));
    assert_eq!(transfer(&b, &mut a, now), vec![Ok(Disposition::Acknowledged)]);

    assert_eq!(a.upper.completed(), vec![(tag, Ok(()))]);
    assert!(a.engine.fbuf().is_empty());
    let calls = calls.calls();
    assert_eq!(calls.sent, 3);
    assert_eq!(calls.acked, vec![0, 1, 2]);
    assert!(calls.lost.is_empty() && calls.timed_out.is_empty());
}

#[test]
fn ack_for_last_fragment_resends_the_earlier_ones() {
    let now = Instant::now();
    let (factory, calls) = recording_factory(16, Duration::ZERO);
    let mut a = Node::new(1, MAX_FRAME, config(), |b| b.congestion(factory));
    let b = node(2, config());
    let tag = start(&mut a, b.addr(), now);
    a.radio.take_frames();

    acknowledge(&b, &mut a, tag, AckBitmap::NULL.with(2), now);
    let resent: Vec<_> = headers(&a)
        .iter()
        .map(|h| (h.seq, h.frag_size, h.offset, h.ack_req))
        .collect();
    assert_eq!(resent, vec![(0, 91, 193, false), (1, 96, 91, true)]);

    let calls = calls.calls();
    assert_eq!(calls.acked, vec![2]);
    assert_eq!(calls.lost, vec![0, 1]);
    assert_eq!(a.engine.stats().fragment_resends.by_nack, 2);
    assert_eq!(a.engine.fbuf().len(), 1);
}

#[test]
fn timeout_after_partial_ack_resends_only_the_missing_fragment() {
    let now = Instant::now();
    let (factory, calls) = recording_factory(16, Duration::ZERO);
    let mut a = Node::new(1, MAX_FRAME, config(), |b| b.congestion(factory));
    let b = node(2, config());
    let tag = start(&mut a, b.addr(), now);
    a.radio.take_frames();

    acknowledge(&b, &mut a, tag, AckBitmap::NULL.with(0).with(2), now);
    assert_eq!(headers(&a).len(), 1);
    a.radio.take_frames();

    a.engine.poll(now + ARQ);
    let resent: Vec<_> = headers(&a).iter().map(|h| (h.seq, h.ack_req)).collect();
    assert_eq!(resent, vec![(1, true)]);
    let calls = calls.calls();
    assert_eq!(calls.timed_out, vec![1]);
    assert_eq!(calls.acked, vec![0, 2]);
    assert_eq!(a.engine.stats().fragment_resends.by_timeout, 1);
}

#[rstest]
#[serial]
fn exhausted_retries_fail_the_datagram(mut logger: LoggerHandle) {
    let now = Instant::now();
    let mut a = node(1, config().with_sfr_retries(0, 0));
    let b = node(2, config());
    let tag = start(&mut a, b.addr(), now);
    a.radio.take_frames();

    a.engine.poll(now + ARQ);
    assert_eq!(
        a.upper.completed(),
        vec![(tag, Err(FragError::RetryBudgetExhausted { tag }))]
    );
    assert!(a.radio.frames().is_empty());
    assert!(a.engine.fbuf().is_empty());
    assert_eq!(a.engine.next_deadline(), None);
    assert!(logger.contains(Level::Warn, "datagram tag 1 failed"));
}

#[test]
fn datagram_restarts_under_the_same_tag() {
    let now = Instant::now();
    let mut a = node(1, config().with_sfr_retries(0, 1));
    let mut b = node(2, config());
    let tag = start(&mut a, b.addr(), now);
    a.radio.take_frames();

    let restart = now + ARQ;
    a.engine.poll(restart);
    let again = headers(&a);
    assert_eq!(again.len(), 3);
    assert!(again.iter().all(|h| u16::from(h.tag) == tag));
    assert_eq!(again[0].seq, 0);
    assert_eq!(a.engine.stats().datagram_resends, 1);
    assert_eq!(a.engine.stats().fragments_sent.usual, 6);
    assert_eq!(a.engine.next_deadline(), Some(restart + ARQ));

    transfer(&a, &mut b, restart);
    transfer(&b, &mut a, restart);
    assert_eq!(a.upper.completed(), vec![(tag, Ok(()))]);
}

#[test]
fn receiver_without_state_aborts_the_sender() {
    let now = Instant::now();
    let mut a = node(1, config());
    let mut b = node(2, config());
    let tag = start(&mut a, b.addr(), now);

    let received = transfer_where(&a, &mut b, now, |i, _| i == 1);
    assert_eq!(received, vec![Err(FragError::UnknownDatagram { tag })]);
    let abort = acks(&b);
    assert_eq!(abort.len(), 1);
    assert!(abort[0].bitmap.is_null());

    assert_eq!(transfer(&b, &mut a, now), vec![Ok(Disposition::Acknowledged)]);
    assert_eq!(a.upper.completed(), vec![(tag, Err(FragError::Aborted { tag }))]);
    assert_eq!(a.engine.stats().acks.aborts, 1);
    assert_eq!(b.engine.stats().fragments_dropped, 1);
}

#[test]
fn lost_final_ack_is_repeated_during_holdoff() {
    let now = Instant::now();
    let mut a = node(1, FragConfig::selective());
    let mut b = node(2, FragConfig::selective());
    let tag = start(&mut a, b.addr(), now);
    transfer(&a, &mut b, now);
    b.radio.take_frames();

    let retry = now + FragConfig::default().sfr_arq_timeout;
    a.engine.poll(retry);
    let replayed = transfer(&a, &mut b, retry);
    assert_eq!(replayed, vec![Err(FragError::DuplicateFragment); 3]);
    assert_eq!(b.upper.delivered().len(), 1);
    let repeated = acks(&b);
    assert_eq!(repeated.len(), 1);
    assert!(repeated[0].bitmap.is_full());

    transfer(&b, &mut a, retry);
    assert_eq!(a.upper.completed(), vec![(tag, Ok(()))]);
}

fn one_at_a_time() -> FragConfig { config().with_sfr_window(1, Duration::ZERO) }

fn no_controller(_tag: u16) -> Option<Box<dyn CongestionController>> { None }

#[test]
fn factory_without_controller_falls_back_to_configured_window() {
    let now = Instant::now();
    let mut a = Node::new(1, MAX_FRAME, one_at_a_time(), |b| b.congestion(no_controller));
    let mut b = node(2, config());
    let tag = start(&mut a, b.addr(), now);

    for expected_seq in 0..3 {
        let sent = headers(&a);
        assert_eq!(sent.len(), 1, "window of one");
        assert_eq!(sent[0].seq, expected_seq);
        assert!(sent[0].ack_req);
        transfer(&a, &mut b, now);
        transfer(&b, &mut a, now);
    }
    assert_eq!(a.upper.completed(), vec![(tag, Ok(()))]);
    assert_eq!((a.engine.stats().acks.partly, a.engine.stats().acks.full), (2, 1));
}

#[test]
fn local_send_failure_aborts_fragments_already_out() {
    let now = Instant::now();
    let mut a = node(1, one_at_a_time());
    let mut b = node(2, config());
    let tag = start(&mut a, b.addr(), now);
    assert_eq!(transfer(&a, &mut b, now), vec![Ok(Disposition::Buffered)]);

    a.radio.fail_next(LinkError::TxFailed);
    transfer(&b, &mut a, now);
    let abort = headers(&a);
    assert_eq!(abort.len(), 1);
    assert!(abort[0].is_abort() && abort[0].ack_req);
    assert_eq!(a.engine.stats().fragments_sent.aborts, 1);
    assert!(a.upper.completed().is_empty(), "waits for the abort to be acknowledged");

    assert_eq!(transfer(&a, &mut b, now), vec![Ok(Disposition::Aborted)]);
    assert!(b.engine.rbuf().is_empty());
    transfer(&b, &mut a, now);
    assert_eq!(
        a.upper.completed(),
        vec![(tag, Err(FragError::Link(LinkError::TxFailed)))]
    );
}

#[test]
fn first_fragment_failure_is_reported_synchronously() {
    let now = Instant::now();
    let mut a = node(1, config());
    a.radio.fail_next(LinkError::NoBuffer);
    let err = a
        .engine
        .send_datagram(datagram(&a, L2Addr::short(2)), now)
        .expect_err("nothing could be sent");
    assert_eq!(err, FragError::AllocationFailure);
    assert!(a.engine.fbuf().is_empty());
    assert!(a.upper.completed().is_empty());
}

#[test]
fn forwarder_relays_fragments_and_acknowledgements() {
    let now = Instant::now();
    let (factory, calls) = recording_factory(16, Duration::ZERO);
    let mut a = Node::new(1, MAX_FRAME, config(), |b| b.congestion(factory));
    let mut b = node(2, config());
    let routes = StaticRoutes::new().route(toy_dst(2), NetifId::new(1), b.addr());
    let mut f = Node::new(3, MAX_FRAME, config().with_frame_queue(8, 0), |builder| {
        builder.compressor(ToyCompressor::default()).routes(routes)
    });
    let tag = start(&mut a, f.addr(), now);

    assert_eq!(transfer(&a, &mut f, now), vec![Ok(Disposition::Forwarded); 3]);
    assert_eq!(f.engine.vrb().len(), 1);
    let relayed = headers(&f);
    assert!(relayed.iter().all(|h| h.ecn), "queue threshold of zero marks everything");
    let sizes: Vec<_> = relayed.iter().map(|h| (h.frag_size, h.offset)).collect();
    assert_eq!(sizes, vec![(91, 193), (96, 91), (6, 187)]);

    assert_eq!(
        transfer(&f, &mut b, now).last(),
        Some(&Ok(Disposition::Delivered))
    );
    assert_eq!(b.upper.delivered()[0].payload()[7], 63);
    assert!(acks(&b)[0].ecn);

    assert_eq!(transfer(&b, &mut f, now), vec![Ok(Disposition::AckRelayed)]);
    assert_eq!(transfer(&f, &mut a, now), vec![Ok(Disposition::Acknowledged)]);
    assert_eq!(a.upper.completed(), vec![(tag, Ok(()))]);
    assert_eq!(calls.calls().ecn, 1);

    let stats = f.engine.stats();
    assert_eq!((stats.fragments_sent.forwarded, stats.acks.forwarded), (3, 1));
    assert_eq!(f.engine.vrb().len(), 1, "released after a short delay");
    f.engine.poll(now + FragConfig::default().vrb_release_delay);
    assert!(f.engine.vrb().is_empty());
}

#[test]
fn forwarder_relays_replayed_fragments() {
    let now = Instant::now();
    let mut a = node(1, config());
    let b = node(2, config());
    let routes = StaticRoutes::new().route(toy_dst(2), NetifId::new(1), b.addr());
    let mut f = Node::new(3, MAX_FRAME, config(), |builder| {
        builder.compressor(ToyCompressor::default()).routes(routes)
    });
    start(&mut a, f.addr(), now);
    let replay = a.radio.frames()[1].frame.clone();
    assert_eq!(transfer(&a, &mut f, now), vec![Ok(Disposition::Forwarded); 3]);

    let disposition = f.engine.receive(
        &ReceivedFrame {
            netif: f.radio.id(),
            src: a.addr(),
            dst: f.addr(),
            payload: &replay,
        },
        now,
    );
    assert_eq!(disposition, Ok(Disposition::Forwarded));
    let relayed: Vec<_> = headers(&f).iter().map(|h| (h.seq, h.offset)).collect();
    assert_eq!(relayed, vec![(0, 193), (1, 91), (2, 187), (1, 91)]);
    assert_eq!(f.engine.stats().fragments_sent.forwarded, 4);
}

#[test]
fn forwarder_relays_abort_and_forgets_the_datagram() {
    let now = Instant::now();
    let mut a = node(1, one_at_a_time());
    let mut b = node(2, config());
    let routes = StaticRoutes::new().route(toy_dst(2), NetifId::new(1), b.addr());
    let mut f = Node::new(3, MAX_FRAME, config(), |builder| {
        builder.compressor(ToyCompressor::default()).routes(routes)
    });
    start(&mut a, f.addr(), now);
    transfer(&a, &mut f, now);
    transfer(&f, &mut b, now);
    assert_eq!(b.engine.rbuf().len(), 1);

    let mut abort = BytesMut::new();
    RfragHeader::abort(1, true).write(&mut abort);
    let disposition = f.engine.receive(
        &ReceivedFrame {
            netif: f.radio.id(),
            src: a.addr(),
            dst: f.addr(),
            payload: &abort,
        },
        now,
    );
    assert_eq!(disposition, Ok(Disposition::Aborted));
    assert!(f.engine.vrb().is_empty());

    let onward = f.radio.take_frames_to(b.addr());
    assert_eq!(onward.len(), 1);
    let (relayed, _) = RfragHeader::parse(&onward[0].frame).expect("RFRAG");
    assert!(relayed.is_abort() && !relayed.ack_req);
    let back = f.radio.take_frames_to(a.addr());
    assert_eq!(back.len(), 1);
    assert!(RfragAck::parse(&back[0].frame).expect("RFRAG-ACK").bitmap.is_null());

    b.radio.take_frames();
    let disposition = b.engine.receive(
        &ReceivedFrame {
            netif: b.radio.id(),
            src: f.addr(),
            dst: b.addr(),
            payload: &onward[0].frame,
        },
        now,
    );
    assert_eq!(disposition, Ok(Disposition::Aborted));
    assert!(b.engine.rbuf().is_empty());
    assert!(b.radio.frames().is_empty(), "no acknowledgement was requested");
}
