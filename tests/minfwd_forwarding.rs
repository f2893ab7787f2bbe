//! End-to-end tests for classic fragmentation, reassembly and minimal
//! fragment forwarding.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use lowpan_frag::{
    Datagram,
    Disposition,
    FragConfig,
    FragError,
    NetifId,
    ReceivedFrame,
    SendOutcome,
    wire::{FragHeader, RfragAck},
};
use lowpan_frag_testing::{
    Node,
    SentFrame,
    StaticRoutes,
    ToyCompressor,
    ipv6_header,
    ipv6_packet,
    toy_dst,
    transfer,
};
use rstest::rstest;

const MAX_FRAME: usize = 102;

fn node(addr: u16) -> Node { node_with(addr, FragConfig::default()) }

fn node_with(addr: u16, config: FragConfig) -> Node {
    Node::new(addr, MAX_FRAME, config, |b| b.compressor(ToyCompressor::default()))
}

/// An uncompressed 240-byte packet: 96 + 96 + 48 bytes on 102-byte frames.
fn packet(hop_limit: u8) -> Vec<u8> {
    let payload: Vec<u8> = (0..200_u8).collect();
    ipv6_packet(hop_limit, toy_dst(2), &payload)
}

fn send(sender: &mut Node, next_hop: &Node, ipv6: &[u8], now: Instant) -> SendOutcome {
    let datagram = Datagram::uncompressed(sender.radio.id(), next_hop.addr(), ipv6);
    sender.engine.send_datagram(datagram, now).expect("send accepted")
}

fn headers(frames: &[SentFrame]) -> Vec<(FragHeader, usize)> {
    frames
        .iter()
        .map(|sent| {
            let (header, len) = FragHeader::parse(&sent.frame).expect("FRAG header");
            (header, sent.frame.len() - len)
        })
        .collect()
}

fn receive(to: &mut Node, from: &Node, frame: &[u8], now: Instant) -> Result<Disposition, FragError> {
    to.engine.receive(
        &ReceivedFrame {
            netif: to.radio.id(),
            src: from.addr(),
            dst: to.addr(),
            payload: frame,
        },
        now,
    )
}

#[test]
fn uncompressed_datagram_is_cut_on_eight_byte_boundaries() {
    let now = Instant::now();
    let mut a = node(1);
    let mut b = node(2);
    let ipv6 = packet(64);
    assert_eq!(
        send(&mut a, &b, &ipv6, now),
        SendOutcome::Fragmented {
            tag: 1,
            fragments: 3
        }
    );
    assert!(a.engine.fbuf().is_empty(), "classic sends keep no state");

    let sent: Vec<_> = headers(&a.radio.frames())
        .into_iter()
        .map(|(h, len)| (h.is_first(), h.datagram_size(), h.offset(), len))
        .collect();
    assert_eq!(
        sent,
        vec![(true, 240, 0, 97), (false, 240, 96, 96), (false, 240, 192, 48)]
    );

    assert_eq!(
        transfer(&a, &mut b, now),
        vec![
            Ok(Disposition::Buffered),
            Ok(Disposition::Buffered),
            Ok(Disposition::Delivered)
        ]
    );
    let delivered = b.upper.delivered();
    assert_eq!(delivered[0].payload(), &ipv6[..]);
    assert_eq!(delivered[0].key().tag, 1);
    assert!(b.engine.rbuf().is_empty());
}

#[test]
fn compressed_datagram_offsets_count_uncompressed_bytes() {
    let now = Instant::now();
    let mut a = node(1);
    let mut b = node(2);
    let body = [0x33; 200];
    let form = ToyCompressor::compress(64, 2, 0, &body);
    let datagram = Datagram::compressed(a.radio.id(), b.addr(), Bytes::from(form), 240);
    a.engine.send_datagram(datagram, now).expect("send accepted");

    let sent: Vec<_> = headers(&a.radio.frames())
        .into_iter()
        .map(|(h, len)| (h.offset(), len))
        .collect();
    assert_eq!(sent, vec![(0, 94), (128, 96), (224, 16)]);

    assert_eq!(transfer(&a, &mut b, now).last(), Some(&Ok(Disposition::Delivered)));
    let mut expected = ipv6_header(200, 64, toy_dst(2));
    expected.extend_from_slice(&body);
    assert_eq!(b.upper.delivered()[0].payload(), &expected[..]);
}

#[test]
fn reassembly_tolerates_reordering_and_duplicates() {
    let now = Instant::now();
    let mut a = node(1);
    let mut b = node(2);
    send(&mut a, &b, &packet(64), now);
    let frames = a.radio.take_frames();

    let results: Vec<_> = [0, 2, 2, 1]
        .into_iter()
        .map(|i| receive(&mut b, &a, &frames[i].frame, now))
        .collect();
    assert_eq!(
        results,
        vec![
            Ok(Disposition::Buffered),
            Ok(Disposition::Buffered),
            Err(FragError::DuplicateFragment),
            Ok(Disposition::Delivered)
        ]
    );
    assert_eq!(b.engine.stats().fragments_dropped, 1);
}

#[rstest]
#[case::silent(false, 0)]
#[case::abort_ack(true, 1)]
fn subsequent_fragment_without_state_is_dropped(#[case] abort_ack: bool, #[case] acks: usize) {
    let now = Instant::now();
    let mut a = node(1);
    let mut b = node_with(2, FragConfig::default().with_classic_abort_ack(abort_ack));
    send(&mut a, &b, &packet(64), now);
    let frames = a.radio.take_frames();

    assert_eq!(
        receive(&mut b, &a, &frames[1].frame, now),
        Err(FragError::UnknownDatagram { tag: 1 })
    );
    let sent = b.radio.frames();
    assert_eq!(sent.len(), acks);
    for ack in sent {
        assert!(RfragAck::parse(&ack.frame).expect("RFRAG-ACK").bitmap.is_null());
    }
}

#[test]
fn overlapping_fragment_discards_the_reassembly() {
    let now = Instant::now();
    let mut a = node(1);
    let mut b = node(2);
    send(&mut a, &b, &packet(64), now);
    let frames = a.radio.take_frames();
    receive(&mut b, &a, &frames[0].frame, now).expect("first fragment buffered");

    let mut overlapping = BytesMut::new();
    FragHeader::subsequent(240, 1, 88).write(&mut overlapping);
    overlapping.extend_from_slice(&[0; 16]);
    assert_eq!(
        receive(&mut b, &a, &overlapping, now),
        Err(FragError::Overlap)
    );
    assert!(b.engine.rbuf().is_empty());
}

#[test]
fn incomplete_reassembly_is_evicted() {
    let now = Instant::now();
    let mut a = node(1);
    let mut b = node(2);
    send(&mut a, &b, &packet(64), now);
    let frames = a.radio.take_frames();
    receive(&mut b, &a, &frames[0].frame, now).expect("first fragment buffered");

    let timeout = FragConfig::default().reassembly_timeout;
    assert_eq!(b.engine.next_deadline(), Some(now + timeout));
    b.engine.poll(now + timeout - Duration::from_millis(1));
    assert_eq!(b.engine.rbuf().len(), 1);
    b.engine.poll(now + timeout);
    assert!(b.engine.rbuf().is_empty());
    assert_eq!(b.engine.stats().entries_evicted, 1);
    assert!(b.upper.delivered().is_empty());
}

#[test]
fn datagram_beyond_size_field_is_rejected() {
    let mut a = node(1);
    let b = node(2);
    let ipv6 = ipv6_packet(64, toy_dst(2), &[0; 2008]);
    let datagram = Datagram::uncompressed(a.radio.id(), b.addr(), &ipv6);
    assert_eq!(
        a.engine.send_datagram(datagram, Instant::now()),
        Err(FragError::DatagramTooLarge {
            size: 2048,
            limit: 2047
        })
    );
    assert!(a.radio.frames().is_empty());
}

#[test]
fn small_datagram_is_sent_whole() {
    let now = Instant::now();
    let mut a = node(1);
    let mut b = node(2);
    let ipv6 = ipv6_packet(64, toy_dst(2), &[7; 20]);
    assert_eq!(
        send(&mut a, &b, &ipv6, now),
        SendOutcome::Unfragmented { sent: 61 }
    );
    assert_eq!(transfer(&a, &mut b, now), vec![Ok(Disposition::Ignored)]);
}

fn forwarder(next_hop: &Node) -> Node {
    let routes = StaticRoutes::new().route(toy_dst(2), NetifId::new(1), next_hop.addr());
    Node::new(3, MAX_FRAME, FragConfig::default(), |b| {
        b.compressor(ToyCompressor::default()).routes(routes)
    })
}

#[test]
fn forwarder_relays_each_fragment_under_a_new_tag() {
    let now = Instant::now();
    let mut a = node(1);
    let mut b = node(2);
    let mut f = forwarder(&b);
    let ipv6 = packet(64);
    send(&mut a, &f, &ipv6, now);
    send(&mut a, &f, &ipv6, now);

    assert_eq!(transfer(&a, &mut f, now), vec![Ok(Disposition::Forwarded); 6]);
    assert!(f.engine.vrb().is_empty(), "released once every byte passed");
    assert!(f.upper.delivered().is_empty());

    let relayed = headers(&f.radio.frames());
    let tags: Vec<u16> = relayed.iter().map(|(h, _)| h.tag()).collect();
    assert_eq!(tags, vec![1, 1, 1, 2, 2, 2]);

    let results = transfer(&f, &mut b, now);
    assert_eq!(results.iter().filter(|r| **r == Ok(Disposition::Delivered)).count(), 2);
    let delivered = b.upper.delivered();
    assert_eq!(delivered[0].payload()[7], 63);
    assert_eq!(delivered[0].payload()[40..], ipv6[40..]);
    assert_eq!(f.engine.stats().fragments_sent.forwarded, 6);
}

#[test]
fn last_hop_limit_is_reassembled_locally() {
    let now = Instant::now();
    let mut a = node(1);
    let b = node(2);
    let mut f = forwarder(&b);
    send(&mut a, &f, &packet(1), now);

    assert_eq!(transfer(&a, &mut f, now).last(), Some(&Ok(Disposition::Delivered)));
    assert_eq!(f.upper.delivered().len(), 1);
    assert!(f.radio.frames().is_empty());
}

#[test]
fn duplicate_fragment_is_not_relayed_twice() {
    let now = Instant::now();
    let mut a = node(1);
    let b = node(2);
    let mut f = forwarder(&b);
    send(&mut a, &f, &packet(64), now);
    let frames = a.radio.take_frames();

    receive(&mut f, &a, &frames[0].frame, now).expect("forwarded");
    receive(&mut f, &a, &frames[1].frame, now).expect("forwarded");
    assert_eq!(
        receive(&mut f, &a, &frames[1].frame, now),
        Err(FragError::DuplicateFragment)
    );
    assert_eq!(f.radio.frames().len(), 2);
    assert_eq!(f.engine.vrb().len(), 1);
}
