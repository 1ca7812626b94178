//! Errors surfaced by the bootstrap engine and its collaborator contracts.

use lattice_types::{Hash, Nonce};

/// Errors produced while synchronizing, rolling back or replaying blocks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// A wait for requested data exceeded its deadline.
    #[error("timed out waiting for requested data")]
    Timeout,

    /// No header with the given nonce in pool or storage.
    #[error("header with nonce {0} not found")]
    HeaderNotFoundForNonce(Nonce),

    /// No header with the given hash in pool or storage.
    #[error("header with hash {0} not found")]
    HeaderNotFoundForHash(Hash),

    /// No block body for the given header in pool or storage.
    #[error("block body not found for header with nonce {0}")]
    BodyNotFound(Nonce),

    /// The chain has no current header where one is required.
    #[error("chain has no current header")]
    MissingHeader,

    /// A rollback step would revert a block at or below the highest final one.
    #[error("roll back would revert a block at or below the highest final block")]
    RollBackBehindFinal,

    /// Startup replay could not find a long-enough valid block window.
    #[error("not enough valid blocks in storage")]
    NotEnoughValidBlocks,

    /// A configuration value failed validation at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A key was absent from a durable store.
    #[error("key not found in storer")]
    KeyNotFound,

    /// A durable-store operation failed.
    #[error("storage: {0}")]
    Storage(String),

    /// Block processing, commit or state reversion failed.
    #[error("processing: {0}")]
    Processing(String),

    /// A network request could not be dispatched.
    #[error("request dispatch: {0}")]
    RequestDispatch(String),
}
