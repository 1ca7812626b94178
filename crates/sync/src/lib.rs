//! Block-synchronization (bootstrap) engine.
//!
//! This crate keeps a node's local chain caught up with the network: it
//! detects when the node is behind, fetches and applies missing blocks,
//! resolves forks by rolling the chain head back, and replays locally
//! persisted blocks after a restart.
//!
//! # Protocol Overview
//!
//! 1. **Decision**: Once per round the engine asks the fork detector whether
//!    a fork exists and whether the probable highest nonce is beyond the
//!    local head. A synchronized verdict is memoized for the round.
//!
//! 2. **Fork resolution**: A detected fork rolls the head back — to the fork
//!    point's parent when a competing header is known, or all the way to the
//!    last final block on a forced fork.
//!
//! 3. **Fetch**: The next header (head nonce + 1, or the fork hash) is taken
//!    from the pool, or requested from the network and awaited with a
//!    timeout. A bounded look-ahead window of follow-up headers is requested
//!    in the background.
//!
//! 4. **Apply**: The block body is fetched the same way, then the block
//!    processor executes and commits the block against the chain head.
//!
//! 5. **Failure handling**: Timeouts are counted; crossing the configured
//!    threshold in a proper round phase forces a rollback and a
//!    probable-highest-nonce reset. Non-timeout failures purge the offending
//!    header and roll back immediately.
//!
//! # Architecture
//!
//! ```text
//! sync loop (tokio task)                    transport callbacks
//!    │                                            │
//!    ▼                                            ▼
//! should_sync ──► sync_block          process_received_header /
//!    │               │                received_header_nonce
//!    │               ├─► roll_back          │
//!    │               ├─► fetch header ◄─────┤  (one-shot completion)
//!    │               ├─► fetch body         │
//!    │               └─► process + commit   └─► fork detector feed
//!    ▼
//! load_blocks (startup only, storage replay)
//! ```
//!
//! All I/O runs behind collaborator contracts; the engine owns only the
//! orchestration, the pending-request bookkeeping and the chain-head
//! transitions.

mod chain;
mod config;
mod engine;
mod error;
mod metrics;
mod pending;
mod replay;
mod rollback;
mod traits;

pub use chain::Blockchain;
pub use config::SyncConfig;
pub use engine::{
    BootstrapArgs, BootstrapEngine, ListenerId, MiniBlockTrigger, SyncStateListener,
};
pub use error::SyncError;
pub use metrics::{Metric, PrometheusStatus, StatusHandler};
pub use replay::NotarizedInfo;
pub use traits::{
    BlockBootstrapper, BlockHeaderState, BlockProcessor, ChainHandler, ForkDetector, ForkInfo,
    HeaderResolver, HeadersPool, NetworkConnectionWatcher, Rounder, StateAdapter, Storer,
    StorageBootstrapper,
};
