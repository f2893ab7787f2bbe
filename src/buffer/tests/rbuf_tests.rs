//! Tests for reassembly placement, limits and lifetimes.

use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use crate::{
    DatagramKey,
    FragConfig,
    L2Addr,
    NetifId,
    buffer::{Rbuf, ReassemblyStatus, Transport},
    error::FragError,
    pool::PoolKind,
};

fn key(tag: u16) -> DatagramKey { DatagramKey::new(L2Addr::short(1), L2Addr::short(2), tag) }

#[fixture]
fn rbuf() -> Rbuf { Rbuf::new(&FragConfig::default().with_pool_sizes(2, 1, 1)) }

fn datagram() -> Vec<u8> { (0..64_u8).collect() }

#[rstest]
#[case::in_order(&[0, 1, 2, 3])]
#[case::reversed(&[3, 2, 1, 0])]
#[case::interleaved(&[2, 0, 3, 1])]
fn any_arrival_order_completes(mut rbuf: Rbuf, #[case] order: &[usize]) {
    let now = Instant::now();
    let data = datagram();
    let handle = rbuf
        .start_or_get(key(1), data.len(), NetifId::new(1), Transport::Classic, now)
        .expect("slot");

    let mut statuses = Vec::new();
    for &chunk in order {
        let range = chunk * 16..(chunk + 1) * 16;
        statuses.push(
            rbuf.insert_fragment(handle, range.start, &data[range], now)
                .expect("fits"),
        );
    }

    assert_eq!(statuses.last(), Some(&ReassemblyStatus::Complete));
    assert!(
        statuses[..statuses.len() - 1]
            .iter()
            .all(|s| *s == ReassemblyStatus::Incomplete)
    );
    let done = rbuf.take(handle, now).expect("complete entry");
    assert_eq!(done.payload.as_ref(), data.as_slice());
    assert!(rbuf.is_empty());
}

#[rstest]
fn duplicate_and_overlap_leave_state_unchanged(mut rbuf: Rbuf) {
    let now = Instant::now();
    let handle = rbuf
        .start_or_get(key(2), 32, NetifId::new(1), Transport::Classic, now)
        .expect("slot");
    rbuf.insert_fragment(handle, 0, &[1; 16], now).expect("fits");

    assert_eq!(
        rbuf.insert_fragment(handle, 0, &[9; 16], now),
        Ok(ReassemblyStatus::Duplicate)
    );
    assert_eq!(
        rbuf.insert_fragment(handle, 8, &[9; 16], now),
        Ok(ReassemblyStatus::Overlap)
    );
    let entry = rbuf.entry(handle).expect("live");
    assert_eq!(entry.received_bytes(), 16);

    rbuf.insert_fragment(handle, 16, &[2; 16], now).expect("fits");
    let done = rbuf.take(handle, now).expect("complete");
    assert_eq!(&done.payload[..16], &[1; 16]);
    assert_eq!(&done.payload[16..], &[2; 16]);
}

#[rstest]
fn fragment_past_declared_size_is_malformed(mut rbuf: Rbuf) {
    let now = Instant::now();
    let handle = rbuf
        .start_or_get(key(3), 16, NetifId::new(1), Transport::Classic, now)
        .expect("slot");
    assert_eq!(
        rbuf.insert_fragment(handle, 8, &[0; 16], now),
        Err(FragError::MalformedFragment("fragment exceeds datagram size"))
    );
}

#[rstest]
fn full_pool_reports_exhaustion(mut rbuf: Rbuf) {
    let now = Instant::now();
    for tag in 0..2 {
        rbuf.start_or_get(key(tag), 8, NetifId::new(1), Transport::Classic, now)
            .expect("slot");
    }
    assert_eq!(
        rbuf.start_or_get(key(9), 8, NetifId::new(1), Transport::Classic, now),
        Err(FragError::PoolExhausted {
            pool: PoolKind::Rbuf
        })
    );
}

#[rstest]
fn changed_size_restarts_entry(mut rbuf: Rbuf) {
    let now = Instant::now();
    let old = rbuf
        .start_or_get(key(4), 16, NetifId::new(1), Transport::Classic, now)
        .expect("slot");
    rbuf.insert_fragment(old, 0, &[1; 8], now).expect("fits");

    let new = rbuf
        .start_or_get(key(4), 24, NetifId::new(1), Transport::Classic, now)
        .expect("slot");
    assert_ne!(old, new);
    assert!(rbuf.entry(old).is_none());
    assert_eq!(rbuf.entry(new).map(|e| e.received_bytes()), Some(0));
    assert_eq!(
        rbuf.insert_fragment(old, 8, &[1; 8], now),
        Err(FragError::StaleEntry)
    );
}

#[rstest]
fn stale_entries_are_evicted(mut rbuf: Rbuf) {
    let start = Instant::now();
    let timeout = FragConfig::default().reassembly_timeout;
    let handle = rbuf
        .start_or_get(key(5), 16, NetifId::new(1), Transport::Selective, start)
        .expect("slot");
    assert_eq!(rbuf.next_expiry(), Some(start + timeout));

    assert!(rbuf.evict_stale(start + timeout / 2).is_empty());
    let stale = rbuf.evict_stale(start + timeout);
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].key, key(5));
    assert_eq!(stale[0].transport, Transport::Selective);
    assert!(rbuf.entry(handle).is_none());
    assert_eq!(rbuf.next_expiry(), None);
}

#[rstest]
fn completed_identity_is_held_off(mut rbuf: Rbuf) {
    let now = Instant::now();
    let holdoff = FragConfig::default().reuse_holdoff;
    let handle = rbuf
        .start_or_get(key(6), 8, NetifId::new(1), Transport::Selective, now)
        .expect("slot");
    rbuf.insert_fragment(handle, 0, &[7; 8], now).expect("fits");
    rbuf.take(handle, now).expect("complete");

    assert!(rbuf.is_held_off(&key(6), now + Duration::from_millis(1)));
    assert!(!rbuf.is_held_off(&key(7), now));
    rbuf.evict_stale(now + holdoff);
    assert!(!rbuf.is_held_off(&key(6), now + holdoff));
}

#[rstest]
fn bitmap_and_ecn_follow_marks(mut rbuf: Rbuf) {
    let now = Instant::now();
    let handle = rbuf
        .start_or_get(key(8), 32, NetifId::new(1), Transport::Selective, now)
        .expect("slot");
    rbuf.mark_received(handle, 0, false);
    rbuf.mark_received(handle, 2, true);
    rbuf.mark_received(handle, 2, false);

    let bitmap = rbuf.bitmap(handle);
    assert!(bitmap.contains(0) && bitmap.contains(2) && !bitmap.contains(1));
    assert!(rbuf.take_ecn(handle));
    assert!(!rbuf.take_ecn(handle));
}
