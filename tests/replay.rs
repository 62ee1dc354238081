//! Replay-coordinator behavior: convergence under contention and the
//! retry budget.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use optikv::{
    submit_replayable, ReplayConfig, RetryPolicy, Store, StoreError, TxnIdAllocator,
};

#[test]
fn replay_runs_a_fixed_transaction_once() {
    let store = Store::new();
    submit_replayable(
        |store| {
            store.begin(0)?;
            store.read(&"key1", 0)?;
            store.write("key1", 55, 0)?;
            store.commit(0)
        },
        &store,
        &ReplayConfig::default(),
    )
    .unwrap();

    assert_eq!(
        store.record(&"key1").and_then(|r| r.value().copied()),
        Some(55)
    );
}

#[test]
fn replayed_increments_converge_serially() {
    let store = Store::new();
    let ids = TxnIdAllocator::new();
    let config = ReplayConfig::default();

    for _ in 0..20 {
        submit_replayable(
            |store| {
                let id = ids.next_id();
                store.begin(id)?;
                let current = store.read(&"counter", id)?.unwrap_or(0);
                store.write("counter", current + 5, id)?;
                store.commit(id)
            },
            &store,
            &config,
        )
        .unwrap();
    }

    assert_eq!(
        store.record(&"counter").and_then(|r| r.value().copied()),
        Some(100)
    );
}

/// Many clients hammering one key through the replay loop: every increment
/// must land exactly once.
#[test]
fn parallel_replayed_increments_all_land() {
    const CLIENTS: usize = 50;
    const INCREMENTS_PER_CLIENT: usize = 50;
    const DELTA: i64 = 10;

    // tight backoff keeps the suite fast; correctness must not depend on it
    let store: Arc<Store<&'static str, i64>> = Arc::new(Store::with_retry_policy(
        RetryPolicy::new().base_ms(1).per_conflict_ms(0).jitter_ms(2),
    ));
    let ids = Arc::new(TxnIdAllocator::new());
    let config = ReplayConfig::new().max_attempts(10_000);

    {
        let id = ids.next_id();
        store.begin(id).unwrap();
        assert_eq!(store.read(&"key1", id).unwrap(), None);
        store.write("key1", 0, id).unwrap();
        store.commit(id).unwrap();
    }

    let handles: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let store = Arc::clone(&store);
            let ids = Arc::clone(&ids);
            let config = config.clone();
            thread::spawn(move || {
                for _ in 0..INCREMENTS_PER_CLIENT {
                    submit_replayable(
                        |store| {
                            let id = ids.next_id();
                            store.begin(id)?;
                            let current = store.read(&"key1", id)?.unwrap_or(0);
                            store.write("key1", current + DELTA, id)?;
                            store.commit(id)
                        },
                        &store,
                        &config,
                    )
                    .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let expected = (CLIENTS * INCREMENTS_PER_CLIENT) as i64 * DELTA;
    assert_eq!(
        store.record(&"key1").and_then(|r| r.value().copied()),
        Some(expected)
    );
}

/// Fibonacci appended by competing clients. Each replay reads the current
/// sequence length, appends the next element under its index, and bumps the
/// length; contention forces replays but the sequence must stay coherent.
#[test]
fn fibonacci_appends_survive_contention() {
    const CLIENTS: usize = 6;
    const REPLAYS_PER_CLIENT: usize = 15;

    let store: Arc<Store<String, u64>> = Arc::new(Store::with_retry_policy(
        RetryPolicy::new().base_ms(1).per_conflict_ms(0).jitter_ms(2),
    ));
    let ids = Arc::new(TxnIdAllocator::new());
    let config = ReplayConfig::new().max_attempts(10_000);

    // seed the first two elements
    {
        let id = ids.next_id();
        store.begin(id).unwrap();
        store.write("0".to_string(), 0, id).unwrap();
        store.write("1".to_string(), 1, id).unwrap();
        store.write("size".to_string(), 2, id).unwrap();
        store.commit(id).unwrap();
    }

    let handles: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let store = Arc::clone(&store);
            let ids = Arc::clone(&ids);
            let config = config.clone();
            thread::spawn(move || {
                for _ in 0..REPLAYS_PER_CLIENT {
                    submit_replayable(
                        |store| {
                            let id = ids.next_id();
                            store.begin(id)?;
                            let size = store
                                .read(&"size".to_string(), id)?
                                .expect("sequence is seeded");
                            let two_back = store
                                .read(&(size - 2).to_string(), id)?
                                .expect("element present");
                            let one_back = store
                                .read(&(size - 1).to_string(), id)?
                                .expect("element present");
                            store.write(size.to_string(), two_back + one_back, id)?;
                            store.write("size".to_string(), size + 1, id)?;
                            store.commit(id)
                        },
                        &store,
                        &config,
                    )
                    .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let element = |i: u64| {
        store
            .record(&i.to_string())
            .and_then(|r| r.value().copied())
            .expect("element present")
    };

    let size = store
        .record(&"size".to_string())
        .and_then(|r| r.value().copied())
        .unwrap();
    assert_eq!(size, 2 + (CLIENTS * REPLAYS_PER_CLIENT) as u64);
    assert_eq!(element(10), 55);
    for i in 2..size {
        assert_eq!(element(i), element(i - 1) + element(i - 2));
    }
}

/// A replayed commit landing mid-flight invalidates a client-driven
/// transaction on the same key; the client re-runs by hand and both
/// increments survive.
#[test]
fn a_replayed_commit_invalidates_an_open_transaction() {
    const INITIAL_VALUE: i64 = 5;
    const DELTA: i64 = 204;

    let store = Store::new();
    let ids = TxnIdAllocator::new();

    let seed = ids.next_id();
    store.begin(seed).unwrap();
    store.write("key1", INITIAL_VALUE, seed).unwrap();
    store.commit(seed).unwrap();

    let open = ids.next_id();
    store.begin(open).unwrap();
    let current = store.read(&"key1", open).unwrap().unwrap();
    store.write("key1", current + DELTA, open).unwrap();

    submit_replayable(
        |store| {
            let id = ids.next_id();
            store.begin(id)?;
            let current = store.read(&"key1", id)?.unwrap_or(0);
            store.write("key1", current + DELTA, id)?;
            store.commit(id)
        },
        &store,
        &ReplayConfig::default(),
    )
    .unwrap();

    assert!(matches!(
        store.commit(open),
        Err(StoreError::RetryLater { .. })
    ));

    // re-run the rebuffed increment against the fresh state
    let retry = ids.next_id();
    store.begin(retry).unwrap();
    let current = store.read(&"key1", retry).unwrap().unwrap();
    store.write("key1", current + DELTA, retry).unwrap();
    store.commit(retry).unwrap();

    assert_eq!(
        store.record(&"key1").and_then(|r| r.value().copied()),
        Some(INITIAL_VALUE + 2 * DELTA)
    );
}

#[test]
fn gives_up_after_exhausting_the_budget() {
    let store: Store<&str, i64> = Store::new();
    let config = ReplayConfig::new().max_attempts(7);
    let invocations = AtomicU32::new(0);

    let result = submit_replayable(
        |_store| {
            invocations.fetch_add(1, Ordering::Relaxed);
            Err(StoreError::RetryLater {
                wait_ms: 0,
                conflicts: 1,
            })
        },
        &store,
        &config,
    );

    match result {
        Err(StoreError::GaveUp { attempts }) => assert_eq!(attempts, 8),
        other => panic!("expected GaveUp, got {other:?}"),
    }
    assert_eq!(invocations.load(Ordering::Relaxed), 8);
}

#[test]
fn non_retry_errors_surface_unchanged() {
    let store: Store<&str, i64> = Store::new();
    let result = submit_replayable(|store| store.commit(99), &store, &ReplayConfig::default());
    assert!(matches!(result, Err(StoreError::NoSuchTransaction(99))));
}
