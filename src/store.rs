//! The store engine: an authoritative in-memory map plus the optimistic
//! commit protocol around it.
//!
//! Every transaction starts with its own deep copy of the store that it
//! reads and writes in isolation. At commit the engine validates that no
//! other transaction committed a write to any touched key since this one
//! started; if one did, the transaction is rolled back and the caller gets
//! a [`StoreError::RetryLater`] advising how long to back off.
//!
//! The canonical example is a bank account with two concurrent appends:
//! the later transaction read a balance that went stale, so it must be
//! re-run against the new state.
//!
//! # Example
//!
//! ```
//! use optikv::Store;
//!
//! let store = Store::new();
//! store.begin(1).unwrap();
//! store.write("balance", 100, 1).unwrap();
//! store.commit(1).unwrap();
//!
//! store.begin(2).unwrap();
//! assert_eq!(store.read(&"balance", 2).unwrap(), Some(100));
//! store.commit(2).unwrap();
//! ```

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::txn::{Clock, Op, TickClock, Transaction, TxnId, ValueRecord};

/// Knobs for building the retry signal raised on commit conflicts.
///
/// The advised wait is `base_ms + per_conflict_ms * conflicts`, plus up to
/// `jitter_ms` of random padding so that herds of rebuffed clients do not
/// all come back in the same instant.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub per_conflict_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 100,
            per_conflict_ms: 50,
            jitter_ms: 0,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_ms(mut self, ms: u64) -> Self {
        self.base_ms = ms;
        self
    }

    pub fn per_conflict_ms(mut self, ms: u64) -> Self {
        self.per_conflict_ms = ms;
        self
    }

    pub fn jitter_ms(mut self, ms: u64) -> Self {
        self.jitter_ms = ms;
        self
    }

    fn wait_ms(&self, conflicts: usize) -> u64 {
        let mut wait = self.base_ms + self.per_conflict_ms * conflicts as u64;
        if self.jitter_ms > 0 {
            wait += rand::thread_rng().gen_range(0..=self.jitter_ms);
        }
        wait
    }
}

/// Counts of what the engine currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub keys: usize,
    pub live_txns: usize,
}

/// In-memory transactional key-value store with optimistic commit-time
/// validation.
///
/// The store is safe to share across threads behind an `Arc`; every
/// operation takes `&self` and serializes on one internal lock, which is
/// what makes begin/commit tick capture atomic with the index updates.
pub struct Store<K, V> {
    inner: Mutex<StoreInner<K, V>>,
    retry: RetryPolicy,
}

struct StoreInner<K, V> {
    /// Sole source of truth. Only mutated inside `commit`.
    master: HashMap<K, ValueRecord<V>>,
    by_id: HashMap<TxnId, Transaction<K, V>>,
    in_flight: HashSet<TxnId>,
    clock: Box<dyn Clock + Send>,
}

impl<K, V> StoreInner<K, V>
where
    K: Eq + Hash,
{
    fn txn_mut(&mut self, id: TxnId) -> Result<&mut Transaction<K, V>, StoreError> {
        if !self.in_flight.contains(&id) {
            return Err(StoreError::NoSuchTransaction(id));
        }
        self.by_id
            .get_mut(&id)
            .ok_or(StoreError::NoSuchTransaction(id))
    }
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::with_clock(Box::new(TickClock::new()))
    }

    pub fn with_retry_policy(retry: RetryPolicy) -> Self {
        let mut store = Self::new();
        store.retry = retry;
        store
    }

    /// Build a store around an injected tick source. The clock must be
    /// strictly increasing; conflict detection relies on no two ordered
    /// events sharing a tick.
    pub fn with_clock(clock: Box<dyn Clock + Send>) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                master: HashMap::new(),
                by_id: HashMap::new(),
                in_flight: HashSet::new(),
                clock,
            }),
            retry: RetryPolicy::default(),
        }
    }

    /// Open a transaction under a caller-chosen id.
    ///
    /// The id must not already be live; reuse after the transaction
    /// terminates is allowed. The new context gets a deep copy of the
    /// master map, so commits landing later never show through it.
    pub fn begin(&self, id: TxnId) -> Result<(), StoreError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.by_id.contains_key(&id) {
            return Err(StoreError::InvalidTransaction(id));
        }

        let start_time = inner.clock.next_tick();
        let snapshot = inner.master.clone();
        inner
            .by_id
            .insert(id, Transaction::new(id, start_time, snapshot));
        inner.in_flight.insert(id);
        debug!(txn = id, start_time, "begin");
        Ok(())
    }

    /// Read a key under a live transaction. Returns `None` when the key is
    /// absent from the transaction's view.
    ///
    /// Reading a key nobody ever wrote is acceptable: application logic
    /// decides how to treat the absence, and the read still participates in
    /// commit-time validation. Committing such a read publishes a
    /// metadata-only record for the key so that later writers see it.
    pub fn read(&self, key: &K, id: TxnId) -> Result<Option<V>, StoreError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let at = inner.clock.next_tick();
        let txn = inner.txn_mut(id)?;
        txn.log_read(key.clone(), at);

        if let Some(record) = txn.snapshot_get(key) {
            return Ok(record.value().cloned());
        }

        // First touch of a key the snapshot has never seen: remember that
        // this transaction read absence so commit can reconcile it.
        txn.snapshot_insert(key.clone(), ValueRecord::placeholder(at));
        Ok(None)
    }

    /// Stage a write under a live transaction. Nothing reaches the master
    /// map until `commit`.
    pub fn write(&self, key: K, value: V, id: TxnId) -> Result<(), StoreError> {
        self.stage(key, Some(value), id)
    }

    /// Stage a removal under a live transaction: a write whose value is
    /// absence. The key's master record survives the commit with its
    /// metadata history intact and `last_written` advanced.
    pub fn remove(&self, key: K, id: TxnId) -> Result<(), StoreError> {
        self.stage(key, None, id)
    }

    fn stage(&self, key: K, value: Option<V>, id: TxnId) -> Result<(), StoreError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let at = inner.clock.next_tick();
        let txn = inner.txn_mut(id)?;
        txn.log_write(key.clone(), value.clone(), at);
        txn.snapshot_insert(key, ValueRecord::new(value));
        Ok(())
    }

    /// Validate and publish a live transaction.
    ///
    /// On success every staged write lands in the master map stamped with
    /// the commit tick, and every read bumps its key's `last_read`. On
    /// conflict the transaction is dropped and [`StoreError::RetryLater`]
    /// is returned; either way the context is gone and the id may be
    /// reused.
    pub fn commit(&self, id: TxnId) -> Result<(), StoreError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if !inner.in_flight.contains(&id) {
            return Err(StoreError::NoSuchTransaction(id));
        }
        let Some(txn) = inner.by_id.remove(&id) else {
            return Err(StoreError::NoSuchTransaction(id));
        };
        inner.in_flight.remove(&id);

        let conflicts = conflicting_key_count(&txn, &inner.master);
        if conflicts > 0 {
            let wait_ms = self.retry.wait_ms(conflicts);
            warn!(txn = id, conflicts, wait_ms, "snapshot invalidated, rolling back");
            return Err(StoreError::RetryLater { wait_ms, conflicts });
        }

        let commit_time = inner.clock.next_tick();
        let (mut snapshot, op_log) = txn.into_parts();
        for op in op_log {
            match op {
                Op::Write { key, value, .. } => match inner.master.entry(key) {
                    Entry::Occupied(mut entry) => {
                        let record = entry.get_mut();
                        record.set_value(value);
                        record.set_last_written(commit_time);
                    }
                    Entry::Vacant(entry) => {
                        let mut record = ValueRecord::new(value);
                        record.set_last_written(commit_time);
                        entry.insert(record);
                    }
                },
                Op::Read { key, .. } => {
                    if let Some(record) = inner.master.get_mut(&key) {
                        record.set_last_read(commit_time);
                    } else {
                        // Nobody ever committed this key; publish the
                        // read-side placeholder so later writers see that
                        // someone read absence.
                        let Some(mut record) = snapshot.remove(&key) else {
                            return Err(StoreError::InternalInvariant(format!(
                                "transaction {id} logged a read of a key absent from its snapshot"
                            )));
                        };
                        record.set_last_read(commit_time);
                        inner.master.insert(key, record);
                    }
                }
            }
        }

        debug!(txn = id, commit_time, "committed");
        Ok(())
    }

    /// Ask whether a live transaction's snapshot has been invalidated by a
    /// commit that landed after it started. Read-only; the transaction
    /// stays live either way.
    pub fn is_invalidated(&self, id: TxnId) -> Result<bool, StoreError> {
        let inner = self.inner.lock();
        if !inner.in_flight.contains(&id) {
            return Err(StoreError::NoSuchTransaction(id));
        }
        let txn = inner
            .by_id
            .get(&id)
            .ok_or(StoreError::NoSuchTransaction(id))?;
        Ok(conflicting_key_count(txn, &inner.master) > 0)
    }

    /// Clone out the master record for a key, outside any transaction.
    ///
    /// Diagnostic accessor: the value and metadata are a consistent copy
    /// taken under the engine lock, but nothing stops a commit from
    /// superseding them immediately after.
    pub fn record(&self, key: &K) -> Option<ValueRecord<V>> {
        self.inner.lock().master.get(key).cloned()
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            keys: inner.master.len(),
            live_txns: inner.in_flight.len(),
        }
    }
}

impl<K, V> Default for Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Count the distinct keys that force `txn` to roll back.
///
/// A key conflicts when the master map shows a write committed after the
/// transaction started. The rule applies to reads and writes alike: the
/// transaction operated on a snapshot, so a blind overwrite of a
/// since-changed key is conservatively treated as stale too. Keys with no
/// master entry, or whose record has only ever been read, cannot conflict.
fn conflicting_key_count<K, V>(
    txn: &Transaction<K, V>,
    master: &HashMap<K, ValueRecord<V>>,
) -> usize
where
    K: Eq + Hash,
{
    let mut conflicting: HashSet<&K> = HashSet::new();
    for op in txn.op_log() {
        let key = op.key();
        if conflicting.contains(key) {
            continue;
        }
        let Some(record) = master.get(key) else {
            continue;
        };
        let Some(last_written) = record.last_written() else {
            continue;
        };
        if last_written > txn.start_time() {
            debug!(
                txn = txn.id(),
                op_at = op.at(),
                last_written,
                start_time = txn.start_time(),
                "operation invalidated by a later write commit"
            );
            conflicting.insert(key);
        }
    }
    conflicting.len()
}
