//! Server-side replay of transactional closures.
//!
//! A client ships the whole transaction as a closure once and the server
//! re-runs it until it commits, instead of bouncing every conflict back
//! over the wire. Each attempt is its own transaction under a fresh id, so
//! a replay that ultimately gives up leaves nothing half-applied.
//!
//! # Example
//!
//! ```
//! use optikv::{submit_replayable, ReplayConfig, Store, TxnIdAllocator};
//!
//! let store = Store::new();
//! let ids = TxnIdAllocator::new();
//! submit_replayable(
//!     |store| {
//!         let id = ids.next_id();
//!         store.begin(id)?;
//!         let hits = store.read(&"hits", id)?.unwrap_or(0);
//!         store.write("hits", hits + 1, id)?;
//!         store.commit(id)
//!     },
//!     &store,
//!     &ReplayConfig::default(),
//! )
//! .unwrap();
//!
//! assert_eq!(store.record(&"hits").and_then(|r| r.value().copied()), Some(1));
//! ```

use std::hash::Hash;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::store::Store;

/// Bounds for the replay loop.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub max_attempts: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { max_attempts: 100 }
    }
}

impl ReplayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// Run `transaction` against the store until it commits.
///
/// The closure owns the whole transaction lifecycle: it must allocate a
/// fresh id on every attempt and drive `begin`/`read`/`write`/`commit`
/// itself. A [`StoreError::RetryLater`] return sleeps for the advised
/// interval and re-invokes the closure; any other error is surfaced
/// unchanged. Once the conflict budget is spent the loop stops with
/// [`StoreError::GaveUp`].
pub fn submit_replayable<K, V, F>(
    mut transaction: F,
    store: &Store<K, V>,
    config: &ReplayConfig,
) -> Result<(), StoreError>
where
    K: Eq + Hash + Clone,
    V: Clone,
    F: FnMut(&Store<K, V>) -> Result<(), StoreError>,
{
    let mut attempts: u32 = 0;
    loop {
        match transaction(store) {
            Ok(()) => return Ok(()),
            Err(StoreError::RetryLater { wait_ms, conflicts }) => {
                attempts += 1;
                if attempts > config.max_attempts {
                    warn!(attempts, "giving up on replayable transaction");
                    return Err(StoreError::GaveUp { attempts });
                }
                debug!(attempts, wait_ms, conflicts, "replaying after conflict");
                thread::sleep(Duration::from_millis(wait_ms));
            }
            Err(other) => return Err(other),
        }
    }
}
