//! Engine error types.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by engine bring-up and lifecycle hooks.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of an admission attempt that did not succeed.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The admission rendezvous timed out; all slots stayed occupied for the
    /// full wait. The caller compensates by deleting the tentative record.
    #[error("admission queue full")]
    CapacityExceeded,

    /// The supervisor is gone; only happens during shutdown.
    #[error("task service unavailable")]
    Shutdown,
}
