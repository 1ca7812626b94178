//! Collaborator contracts consumed by the bootstrap engine.
//!
//! The engine orchestrates; everything domain-specific lives behind these
//! traits: fork detection, block execution, storage replay, shard-vs-metachain
//! fetch rules, network requests and connectivity. Implementations are
//! provided by the node wiring and are out of scope here.

use crate::SyncError;
use async_trait::async_trait;
use lattice_types::{BlockBody, BlockHeader, Hash, Nonce, Round, ShardId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Fork state reported by the fork detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkInfo {
    /// Whether a fork is currently detected.
    pub detected: bool,

    /// Nonce at which the chains diverge. Meaningful only while `detected`.
    pub nonce: Nonce,

    /// Hash of the competing header to chase, if there is one.
    pub hash: Option<Hash>,
}

impl ForkInfo {
    /// The no-fork state.
    pub fn none() -> Self {
        Self {
            detected: false,
            nonce: Nonce(0),
            hash: None,
        }
    }

    /// A forced fork demands a rollback without a competing header to chase.
    ///
    /// The sentinel (maximum nonce, no hash) is a convention emitted by the
    /// fork detector; the engine treats it as an opaque signal value.
    pub fn is_forced(&self) -> bool {
        self.detected && self.nonce == Nonce::MAX && self.hash.is_none()
    }
}

/// Lifecycle position of a header when fed to the fork detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHeaderState {
    /// Seen on the network, not yet executed locally.
    Received,

    /// Executed and committed locally.
    Processed,

    /// Already notarized; used when seeding replayed headers at startup.
    Notarized,
}

/// Fork and finality oracle.
pub trait ForkDetector: Send + Sync {
    /// Track a header observed at the given lifecycle state.
    fn add_header(
        &self,
        header: &BlockHeader,
        hash: Hash,
        state: BlockHeaderState,
        notarized_headers: &[Arc<BlockHeader>],
        notarized_hashes: &[Hash],
    ) -> Result<(), SyncError>;

    /// Forget all tracked headers with the given nonce except the given hash.
    fn remove_headers(&self, nonce: Nonce, hash: Hash);

    /// Current fork state.
    fn check_fork(&self) -> ForkInfo;

    /// Nonce of the highest block considered final.
    fn highest_final_block_nonce(&self) -> Nonce;

    /// Best estimate of the network's current chain height.
    fn probable_highest_nonce(&self) -> Nonce;

    /// Drop the probable-highest-nonce estimate back to the final nonce.
    fn reset_probable_highest_nonce(&self);

    /// Like [`Self::reset_probable_highest_nonce`], but only when the
    /// detector's own heuristics say the estimate has gone stale.
    fn reset_probable_highest_nonce_if_needed(&self);

    /// Clear the fork flags after a forced fork has been resolved.
    fn reset_fork(&self);
}

/// Mutable chain head: current header, body and header hash.
///
/// Exclusively mutated by the bootstrap engine while processing, committing
/// or rolling back a block; read by many external consumers.
pub trait ChainHandler: Send + Sync {
    /// The current head header, if any block has been applied.
    fn current_header(&self) -> Option<Arc<BlockHeader>>;

    /// Replace the current head header.
    fn set_current_header(&self, header: Option<Arc<BlockHeader>>);

    /// The current head body.
    fn current_body(&self) -> Option<Arc<BlockBody>>;

    /// Replace the current head body.
    fn set_current_body(&self, body: Option<Arc<BlockBody>>);

    /// Hash of the current head header.
    fn current_header_hash(&self) -> Option<Hash>;

    /// Replace the current head header hash.
    fn set_current_header_hash(&self, hash: Option<Hash>);
}

/// Block execution engine.
pub trait BlockProcessor: Send + Sync {
    /// Execute a block against the current state, within the time budget.
    fn process_block(
        &self,
        chain: &dyn ChainHandler,
        header: &Arc<BlockHeader>,
        body: &Arc<BlockBody>,
        time_budget: Duration,
    ) -> Result<(), SyncError>;

    /// Persist an executed block and advance the chain head.
    fn commit_block(
        &self,
        chain: &dyn ChainHandler,
        header: &Arc<BlockHeader>,
        body: &Arc<BlockBody>,
    ) -> Result<(), SyncError>;

    /// Revert execution state to the given (previous) header.
    fn revert_state_to_block(&self, header: &Arc<BlockHeader>) -> Result<(), SyncError>;

    /// Put a rolled-back block's content back into the shared pools.
    fn restore_block_into_pools(
        &self,
        header: &Arc<BlockHeader>,
        body: &Arc<BlockBody>,
    ) -> Result<(), SyncError>;
}

/// Replays persisted blocks and supplies notarization snapshots at startup.
pub trait StorageBootstrapper: Send + Sync {
    /// Resolve the anchor nonce and notarization snapshots for a probe nonce.
    ///
    /// Returns `(valid_nonce, final_notarized, last_notarized)` where the
    /// maps go from shard to notarized nonce.
    fn nonce_with_last_notarized(
        &self,
        nonce: Nonce,
    ) -> (Nonce, HashMap<ShardId, Nonce>, HashMap<ShardId, Nonce>);

    /// Load a stored header and its hash.
    fn header(&self, shard: ShardId, nonce: Nonce) -> Result<(Arc<BlockHeader>, Hash), SyncError>;

    /// Load the stored body of a header.
    fn block_body(&self, header: &BlockHeader) -> Result<Arc<BlockBody>, SyncError>;

    /// Re-establish cross-chain notarization state from the snapshots.
    fn apply_notarized_blocks(
        &self,
        final_notarized: &HashMap<ShardId, Nonce>,
        last_notarized: &HashMap<ShardId, Nonce>,
    ) -> Result<(), SyncError>;

    /// Seed the fork detector with a replayed, already-notarized header.
    fn add_header_to_fork_detector(
        &self,
        shard: ShardId,
        nonce: Nonce,
        notarized_meta_nonce: Nonce,
    );

    /// Drop notarized data stored above the given snapshot.
    fn cleanup_notarized_storage(&self, last_notarized: &HashMap<ShardId, Nonce>);

    /// Remove a stored block body.
    fn remove_block_body(&self, nonce: Nonce) -> Result<(), SyncError>;
}

/// Shard-vs-metachain-specific fetch of headers and bodies.
#[async_trait]
pub trait BlockBootstrapper: Send + Sync {
    /// Look up a header and its hash in the pool by nonce.
    fn get_header_from_pool_with_nonce(
        &self,
        nonce: Nonce,
    ) -> Result<(Arc<BlockHeader>, Hash), SyncError>;

    /// Look up a header in the pool by hash.
    fn get_header_from_pool_with_hash(&self, hash: Hash) -> Result<Arc<BlockHeader>, SyncError>;

    /// Whether the pool holds a header with the given nonce.
    fn have_header_in_pool_with_nonce(&self, nonce: Nonce) -> bool;

    /// Fetch a header's body from the pool, requesting it from the network
    /// and waiting up to the implementation's timeout when missing.
    async fn get_block_body_requesting_if_missing(
        &self,
        header: &Arc<BlockHeader>,
    ) -> Result<Arc<BlockBody>, SyncError>;

    /// The chain's current head header.
    fn get_curr_header(&self) -> Result<Arc<BlockHeader>, SyncError>;

    /// The predecessor of the given header, loaded from the durable store.
    fn get_prev_header(
        &self,
        curr: &BlockHeader,
        header_store: &dyn Storer,
    ) -> Result<Arc<BlockHeader>, SyncError>;

    /// A header's body from pool or storage, without network requests.
    fn get_block_body(&self, header: &Arc<BlockHeader>) -> Result<Arc<BlockBody>, SyncError>;
}

/// Dispatches header requests to the network.
pub trait HeaderResolver: Send + Sync {
    /// Request the header with the given nonce from peers.
    fn request_data_from_nonce(&self, nonce: Nonce) -> Result<(), SyncError>;

    /// Request the header with the given hash from peers.
    fn request_data_from_hash(&self, hash: Hash) -> Result<(), SyncError>;
}

/// Network connectivity probe.
pub trait NetworkConnectionWatcher: Send + Sync {
    /// Whether the node currently has network connectivity.
    fn is_connected_to_the_network(&self) -> bool;
}

/// Consensus round clock.
pub trait Rounder: Send + Sync {
    /// Index of the current round.
    fn index(&self) -> Round;

    /// Time remaining in the current round.
    fn time_duration(&self) -> Duration;

    /// Whether the round is in its proper (non-terminal) phase.
    fn is_in_proper_round(&self) -> bool;
}

/// Account-state access needed during startup replay.
pub trait StateAdapter: Send + Sync {
    /// Recreate the account-state trie at the given root.
    fn recreate_trie(&self, root_hash: Hash) -> Result<(), SyncError>;
}

/// In-memory header pool purge hook.
pub trait HeadersPool: Send + Sync {
    /// Drop the pooled header with the given nonce in the given shard.
    fn remove_header(&self, nonce: Nonce, shard: ShardId);
}

/// Durable key-value store for one logical unit of chain data.
///
/// The engine keeps two handles: header-by-hash and nonce-to-hash. Nonce keys
/// are the fixed-width big-endian form from [`Nonce::to_storage_key`]; keys
/// are otherwise opaque.
pub trait Storer: Send + Sync {
    /// Read a value.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, SyncError>;

    /// Whether a key is present.
    fn has(&self, key: &[u8]) -> bool;

    /// Remove a key.
    fn remove(&self, key: &[u8]) -> Result<(), SyncError>;
}
