use thiserror::Error;

use crate::txn::TxnId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction {0} cannot be started because it is already live")]
    InvalidTransaction(TxnId),

    #[error("no live transaction with id {0}")]
    NoSuchTransaction(TxnId),

    /// Commit-time validation found the transaction's snapshot stale. The
    /// transaction has already been cleaned up when this is returned;
    /// callers retry under a fresh id, either by hand or through
    /// [`submit_replayable`](crate::submit_replayable).
    #[error("commit conflicted on {conflicts} key(s); retry in {wait_ms} ms")]
    RetryLater { wait_ms: u64, conflicts: usize },

    #[error("could not commit transaction, even after {attempts} attempts")]
    GaveUp { attempts: u32 },

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}
