use std::collections::HashMap;
use std::hash::Hash;

use super::record::ValueRecord;
use super::{Timestamp, TxnId};

/// One entry in a transaction's operation log.
#[derive(Debug, Clone)]
pub enum Op<K, V> {
    Read {
        key: K,
        at: Timestamp,
    },
    /// `value: None` is a removal staged as a tombstone write.
    Write {
        key: K,
        value: Option<V>,
        at: Timestamp,
    },
}

impl<K, V> Op<K, V> {
    pub fn key(&self) -> &K {
        match self {
            Op::Read { key, .. } => key,
            Op::Write { key, .. } => key,
        }
    }

    /// Tick at which the operation was appended to the log.
    pub fn at(&self) -> Timestamp {
        match self {
            Op::Read { at, .. } => *at,
            Op::Write { at, .. } => *at,
        }
    }
}

/// Per-transaction state: identity, the tick it started at, the private
/// snapshot it reads against, and the ordered log replayed at commit.
///
/// `id` and `start_time` never change; the snapshot and log only grow.
/// Contexts are owned by the engine's index and never handed out, so they
/// need no synchronization of their own.
#[derive(Debug)]
pub struct Transaction<K, V> {
    id: TxnId,
    start_time: Timestamp,
    snapshot: HashMap<K, ValueRecord<V>>,
    op_log: Vec<Op<K, V>>,
}

impl<K, V> Transaction<K, V>
where
    K: Eq + Hash,
{
    pub(crate) fn new(id: TxnId, start_time: Timestamp, snapshot: HashMap<K, ValueRecord<V>>) -> Self {
        Self {
            id,
            start_time,
            snapshot,
            op_log: Vec::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    pub fn op_log(&self) -> &[Op<K, V>] {
        &self.op_log
    }

    pub(crate) fn log_read(&mut self, key: K, at: Timestamp) {
        self.op_log.push(Op::Read { key, at });
    }

    pub(crate) fn log_write(&mut self, key: K, value: Option<V>, at: Timestamp) {
        self.op_log.push(Op::Write { key, value, at });
    }

    pub(crate) fn snapshot_get(&self, key: &K) -> Option<&ValueRecord<V>> {
        self.snapshot.get(key)
    }

    pub(crate) fn snapshot_insert(&mut self, key: K, record: ValueRecord<V>) {
        self.snapshot.insert(key, record);
    }

    pub(crate) fn into_parts(self) -> (HashMap<K, ValueRecord<V>>, Vec<Op<K, V>>) {
        (self.snapshot, self.op_log)
    }
}
