#![cfg(feature = "metrics")]
//! Tests for the `lowpan-frag` metrics mirror.
//!
//! Engine activity is recorded with
//! `metrics_util::debugging::DebuggingRecorder` installed as a local recorder.

use std::time::Instant;

use lowpan_frag::{
    Datagram,
    FragConfig,
    ReceivedFrame,
    metrics::{DATAGRAMS_DELIVERED, FRAGMENTS_DROPPED, FRAGMENTS_SENT, POOL_OCCUPANCY},
};
use lowpan_frag_testing::{Node, ipv6_packet, toy_dst};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;

/// Creates a debugging recorder and snapshotter for metrics testing.
fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

fn value(snapshotter: &Snapshotter, name: &str, label: Option<(&str, &str)>) -> Option<DebugValue> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find(|(k, _, _, _)| {
            k.key().name() == name
                && label.is_none_or(|(key, value)| {
                    k.key().labels().any(|l| l.key() == key && l.value() == value)
                })
        })
        .map(|(_, _, _, v)| v)
}

fn node(addr: u16) -> Node { Node::new(addr, 102, FragConfig::default(), |b| b) }

fn send_fragmented(from: &mut Node, to: &Node) {
    let ipv6 = ipv6_packet(64, toy_dst(2), &[0; 200]);
    let datagram = Datagram::uncompressed(from.radio.id(), to.addr(), &ipv6);
    from.engine
        .send_datagram(datagram, Instant::now())
        .expect("send accepted");
}

#[test]
fn sent_fragments_are_counted_by_kind() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let mut a = node(1);
    let b = node(2);
    metrics::with_local_recorder(&recorder, || send_fragmented(&mut a, &b));

    let sent = value(&snapshotter, FRAGMENTS_SENT, Some(("kind", "usual")));
    assert!(matches!(sent, Some(DebugValue::Counter(3))), "got {sent:?}");
    assert!(value(&snapshotter, FRAGMENTS_SENT, Some(("kind", "forwarded"))).is_none());
}

#[test]
fn delivery_and_occupancy_are_recorded() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let mut a = node(1);
    let mut b = node(2);
    send_fragmented(&mut a, &b);
    let frames = a.radio.take_frames();
    let now = Instant::now();

    metrics::with_local_recorder(&recorder, || {
        b.engine
            .receive(
                &ReceivedFrame {
                    netif: b.radio.id(),
                    src: a.addr(),
                    dst: b.addr(),
                    payload: &frames[0].frame,
                },
                now,
            )
            .expect("first fragment buffered");
    });
    let occupied = value(&snapshotter, POOL_OCCUPANCY, Some(("pool", "rbuf")));
    assert!(
        matches!(occupied, Some(DebugValue::Gauge(g)) if (g.into_inner() - 1.0).abs() < f64::EPSILON),
        "got {occupied:?}"
    );

    metrics::with_local_recorder(&recorder, || {
        for sent in &frames[1..] {
            b.engine
                .receive(
                    &ReceivedFrame {
                        netif: b.radio.id(),
                        src: a.addr(),
                        dst: b.addr(),
                        payload: &sent.frame,
                    },
                    now,
                )
                .expect("fragment accepted");
        }
    });
    let delivered = value(&snapshotter, DATAGRAMS_DELIVERED, None);
    assert!(matches!(delivered, Some(DebugValue::Counter(1))), "got {delivered:?}");
}

#[rstest]
#[case::empty(&[])]
#[case::stateless_fragment(&[0xe0, 0xf0, 0x00, 0x01, 0x0c, 0xff])]
fn dropped_fragments_are_counted(#[case] frame: &[u8]) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let a = node(1);
    let mut b = node(2);
    metrics::with_local_recorder(&recorder, || {
        let result = b.engine.receive(
            &ReceivedFrame {
                netif: b.radio.id(),
                src: a.addr(),
                dst: b.addr(),
                payload: frame,
            },
            Instant::now(),
        );
        assert!(result.is_err());
    });
    let dropped = value(&snapshotter, FRAGMENTS_DROPPED, None);
    assert!(matches!(dropped, Some(DebugValue::Counter(1))), "got {dropped:?}");
}
