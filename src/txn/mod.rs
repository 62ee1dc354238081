pub mod clock;
pub mod context;
pub mod record;

pub use clock::{Clock, TickClock};
pub use context::{Op, Transaction};
pub use record::ValueRecord;

use std::sync::atomic::{AtomicU64, Ordering};

pub type TxnId = u64;

/// A tick drawn from the engine clock. Ticks order events within one
/// engine and carry no wall-clock meaning.
pub type Timestamp = u64;

/// Hands out strictly increasing transaction ids.
///
/// The engine never allocates ids itself; clients bring their own to
/// `begin`. Replayable closures need a fresh id on every attempt, and this
/// shared counter is the usual source.
#[derive(Debug, Default)]
pub struct TxnIdAllocator {
    next: AtomicU64,
}

impl TxnIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> TxnId {
        self.next.fetch_add(1, Ordering::AcqRel)
    }
}
