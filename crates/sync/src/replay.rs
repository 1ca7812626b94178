//! Startup replay of locally persisted blocks.
//!
//! After a restart the node rebuilds its chain head from durable storage,
//! without touching the network: probe for the highest contiguous stored
//! nonce, walk backward until the storage bootstrapper vouches for an anchor,
//! re-apply the trailing finality window, then purge everything above it.

use crate::engine::BootstrapEngine;
use crate::error::SyncError;
use lattice_types::{Nonce, ShardId};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Per-shard notarization bookkeeping used only during startup replay.
#[derive(Debug, Clone, Default)]
pub struct NotarizedInfo {
    /// Last notarized nonce per shard.
    pub last_notarized: HashMap<ShardId, Nonce>,

    /// Highest final notarized nonce per shard.
    pub final_notarized: HashMap<ShardId, Nonce>,

    /// Nonce of the local block that carried each shard's last notarization.
    pub block_with_last_notarized: HashMap<ShardId, Nonce>,

    /// Nonce of the local block that carried each shard's final notarization.
    pub block_with_final_notarized: HashMap<ShardId, Nonce>,

    /// Anchor nonce the replay started forward from.
    pub start_nonce: Nonce,
}

impl NotarizedInfo {
    /// Create empty bookkeeping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all maps; called at the start of each replay attempt.
    pub fn reset(&mut self) {
        self.last_notarized.clear();
        self.final_notarized.clear();
        self.block_with_last_notarized.clear();
        self.block_with_final_notarized.clear();
        self.start_nonce = Nonce(0);
    }

    /// Record the snapshots accepted at `anchor`.
    pub fn record(
        &mut self,
        anchor: Nonce,
        final_notarized: &HashMap<ShardId, Nonce>,
        last_notarized: &HashMap<ShardId, Nonce>,
    ) {
        for (shard, last) in last_notarized {
            let final_nonce = final_notarized.get(shard).copied().unwrap_or_default();
            if final_nonce > *last {
                warn!(
                    shard = %shard,
                    final_nonce = %final_nonce,
                    last = %last,
                    "final notarized nonce above last notarized nonce"
                );
            }
        }

        self.last_notarized = last_notarized.clone();
        self.final_notarized = final_notarized.clone();
        self.block_with_last_notarized =
            last_notarized.keys().map(|shard| (*shard, anchor)).collect();
        self.block_with_final_notarized =
            final_notarized.keys().map(|shard| (*shard, anchor)).collect();
        self.start_nonce = anchor;
    }
}

/// Outcome of a successful replay walk.
struct ReplayedWindow {
    valid_nonce: Nonce,
    last_notarized: HashMap<ShardId, Nonce>,
}

impl BootstrapEngine {
    /// Rebuild the chain head from durable storage.
    ///
    /// On success the head sits at the replayed anchor and everything stored
    /// above it has been purged. On failure everything stored is purged and
    /// [`SyncError::NotEnoughValidBlocks`] is returned; the caller falls back
    /// to a full network bootstrap.
    pub fn load_blocks(&self) -> Result<(), SyncError> {
        let _guard = self.span.enter();

        let highest_nonce_in_storer = self.compute_highest_nonce();
        info!(
            nonce = %highest_nonce_in_storer,
            "highest header nonce committed in storer"
        );

        let result = self.replay_from_storage(highest_nonce_in_storer);

        // Purge everything above the replayed window; on failure that is the
        // whole store.
        let (valid_nonce, last_notarized) = match &result {
            Ok(window) => (window.valid_nonce, window.last_notarized.clone()),
            Err(_) => (Nonce(0), HashMap::new()),
        };
        for nonce in (valid_nonce.0 + 1)..=highest_nonce_in_storer.0 {
            self.cleanup_storage(Nonce(nonce));
        }
        self.storage_bootstrapper
            .cleanup_notarized_storage(&last_notarized);

        result.map(|_| ())
    }

    fn replay_from_storage(&self, highest: Nonce) -> Result<ReplayedWindow, SyncError> {
        let window = Nonce(self.config.block_finality);

        let mut current_nonce = highest;
        let mut valid_nonce = Nonce(0);
        let mut final_notarized = HashMap::new();
        let mut last_notarized = HashMap::new();
        let mut window_applied = false;

        while current_nonce > window {
            self.notarized.lock().reset();

            let (anchor, final_map, last_map) = self
                .storage_bootstrapper
                .nonce_with_last_notarized(current_nonce);
            valid_nonce = anchor;
            final_notarized = final_map;
            last_notarized = last_map;

            if valid_nonce <= window {
                break;
            }
            if valid_nonce < current_nonce {
                current_nonce = valid_nonce;
            }

            match self.apply_window(valid_nonce, window) {
                Ok(()) => {
                    window_applied = true;
                    break;
                }
                Err(err) => {
                    debug!(anchor = %valid_nonce, %err, "replay window");
                    current_nonce = current_nonce.prev();
                }
            }
        }

        if !window_applied {
            return Err(SyncError::NotEnoughValidBlocks);
        }

        self.notarized
            .lock()
            .record(valid_nonce, &final_notarized, &last_notarized);
        self.storage_bootstrapper
            .apply_notarized_blocks(&final_notarized, &last_notarized)?;

        let notarized_meta_nonce = last_notarized
            .get(&ShardId::METACHAIN)
            .copied()
            .unwrap_or_default();
        for nonce in (valid_nonce.0 - window.0)..=valid_nonce.0 {
            self.storage_bootstrapper.add_header_to_fork_detector(
                self.shard,
                Nonce(nonce),
                notarized_meta_nonce,
            );
        }

        Ok(ReplayedWindow {
            valid_nonce,
            last_notarized,
        })
    }

    /// Apply the blocks in `[anchor - window, anchor]` in order, then
    /// recreate the account-state trie at the applied head.
    fn apply_window(&self, anchor: Nonce, window: Nonce) -> Result<(), SyncError> {
        for nonce in (anchor.0 - window.0)..=anchor.0 {
            if let Err(err) = self.apply_block(self.shard, Nonce(nonce)) {
                debug!(nonce, %err, "apply block");
                return Err(err);
            }
        }

        let header = self.chain.current_header().ok_or(SyncError::MissingHeader)?;
        if let Err(err) = self.accounts.recreate_trie(header.state_root_hash) {
            debug!(nonce = %header.nonce, shard = %header.shard, %err, "recreate trie for block");
            return Err(err);
        }

        Ok(())
    }

    fn apply_block(&self, shard: ShardId, nonce: Nonce) -> Result<(), SyncError> {
        let (header, header_hash) = self.storage_bootstrapper.header(shard, nonce)?;

        debug!(nonce = %header.nonce, round = %header.round, "apply block");

        let body = self.storage_bootstrapper.block_body(&header)?;

        self.chain.set_current_body(Some(body));
        self.chain.set_current_header(Some(header));
        self.chain.set_current_header_hash(Some(header_hash));

        Ok(())
    }

    /// Highest nonce reachable from 1 without a gap in the nonce-to-hash
    /// store.
    fn compute_highest_nonce(&self) -> Nonce {
        let mut highest = Nonce(0);
        loop {
            let probe = highest.next();
            if !self.header_nonce_hash_store.has(&probe.to_storage_key()) {
                break;
            }
            highest = probe;
        }
        highest
    }

    fn cleanup_storage(&self, nonce: Nonce) {
        if let Err(err) = self.storage_bootstrapper.remove_block_body(nonce) {
            debug!(%nonce, %err, "remove block body");
        }
        if let Err(err) = self.remove_block_header(nonce) {
            debug!(%nonce, %err, "remove block header");
        }
    }

    fn remove_block_header(&self, nonce: Nonce) -> Result<(), SyncError> {
        let nonce_key = nonce.to_storage_key();
        let header_hash = self.header_nonce_hash_store.get(&nonce_key)?;

        self.header_store.remove(&header_hash)?;
        self.header_nonce_hash_store.remove(&nonce_key)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_all_bookkeeping() {
        let mut info = NotarizedInfo::new();
        info.record(
            Nonce(9),
            &HashMap::from([(ShardId(0), Nonce(7))]),
            &HashMap::from([(ShardId(0), Nonce(8))]),
        );
        assert_eq!(info.start_nonce, Nonce(9));

        info.reset();
        assert!(info.last_notarized.is_empty());
        assert!(info.final_notarized.is_empty());
        assert!(info.block_with_last_notarized.is_empty());
        assert!(info.block_with_final_notarized.is_empty());
        assert_eq!(info.start_nonce, Nonce(0));
    }

    #[test]
    fn test_record_tracks_carrier_blocks() {
        let mut info = NotarizedInfo::new();
        info.record(
            Nonce(12),
            &HashMap::from([(ShardId::METACHAIN, Nonce(5))]),
            &HashMap::from([(ShardId::METACHAIN, Nonce(6))]),
        );

        assert_eq!(
            info.block_with_last_notarized.get(&ShardId::METACHAIN),
            Some(&Nonce(12))
        );
        assert_eq!(
            info.block_with_final_notarized.get(&ShardId::METACHAIN),
            Some(&Nonce(12))
        );
        assert_eq!(info.last_notarized.get(&ShardId::METACHAIN), Some(&Nonce(6)));
        assert_eq!(
            info.final_notarized.get(&ShardId::METACHAIN),
            Some(&Nonce(5))
        );
    }
}
