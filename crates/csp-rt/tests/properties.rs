// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Property tests for channel invariants.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use csp_rt::{buffered, select_no_wait, select_timeout, Channel, Selected};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Size never exceeds capacity while producers race a slow consumer.
    #[test]
    fn size_bounded_by_capacity(cap in 1usize..8, producers in 1usize..4, per in 1usize..20) {
        let ch: Channel<usize> = buffered(cap);
        let max_seen = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let monitor = {
            let (ch, max_seen, stop) = (ch.clone(), max_seen.clone(), stop.clone());
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    max_seen.fetch_max(ch.size(), Ordering::SeqCst);
                    thread::yield_now();
                }
            })
        };
        let workers: Vec<_> = (0..producers)
            .map(|p| {
                let tx = ch.clone();
                thread::spawn(move || {
                    for i in 0..per {
                        tx.put(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..producers * per {
            ch.take().unwrap();
        }
        for w in workers {
            w.join().unwrap();
        }
        stop.store(true, Ordering::SeqCst);
        monitor.join().unwrap();
        prop_assert!(max_seen.load(Ordering::SeqCst) <= cap);
    }

    /// Values from one producer come out in the order they went in.
    #[test]
    fn single_producer_fifo(values in proptest::collection::vec(any::<i64>(), 0..64), cap in 0usize..6) {
        let ch: Channel<i64> = buffered(cap);
        let tx = ch.clone();
        let expected = values.clone();
        let producer = thread::spawn(move || {
            for v in values {
                tx.put(v).unwrap();
            }
            tx.close();
        });
        let mut got = Vec::new();
        while let Ok(v) = ch.take() {
            got.push(v);
        }
        producer.join().unwrap();
        prop_assert_eq!(got, expected);
    }

    /// With exactly one ready channel, select takes from it and nothing else.
    #[test]
    fn single_ready_channel_selected(n in 1usize..8, ready in 0usize..8, val in any::<u32>()) {
        let ready = ready % n;
        let chans: Vec<Channel<u32>> = (0..n).map(|_| buffered(2)).collect();
        chans[ready].put(val).unwrap();
        let refs: Vec<&Channel<u32>> = chans.iter().collect();
        prop_assert_eq!(select_no_wait(&refs, None), Selected::Recv(ready, val));
        prop_assert!(chans.iter().all(|c| c.size() == 0));
    }

    /// Closing keeps buffered values and rejects new puts.
    #[test]
    fn close_keeps_contents(values in proptest::collection::vec(any::<u8>(), 0..8)) {
        let ch: Channel<u8> = buffered(8);
        for v in &values {
            ch.put(*v).unwrap();
        }
        ch.close();
        prop_assert!(ch.put(0).is_err());
        prop_assert_eq!(ch.snapshot(), values.clone());
        prop_assert_eq!(ch.drain(), values);
    }
}

#[test]
fn timeout_select_mutates_nothing() {
    let a: Channel<u8> = buffered(1);
    let b: Channel<u8> = buffered(1);
    b.close();
    let got = select_timeout(Duration::from_millis(15), &[&a, &b]);
    assert_eq!(got, Selected::Timeout);
    assert_eq!(a.size(), 0);
    assert!(!a.is_closed());
}
