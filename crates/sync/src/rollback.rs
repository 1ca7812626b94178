//! Chain-head rollback.

use crate::engine::BootstrapEngine;
use crate::error::SyncError;
use lattice_types::{BlockBody, BlockHeader, Nonce};
use std::sync::Arc;
use tracing::debug;

/// How far a rollback run is allowed to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RollBackMode {
    /// One guarded step: fails rather than revert a final block.
    OneStep,

    /// Unwind every block whose nonce is at or above the fork nonce, leaving
    /// the head at the fork point's parent so the competing header can be
    /// applied next.
    ToForkNonce(Nonce),

    /// Unwind down to the highest final block. Only the forced-fork path uses
    /// this; it stops at the final block and never reverts past it.
    ToFinal,
}

impl BootstrapEngine {
    /// Roll the chain head back according to `mode`.
    ///
    /// Each step loads the current head and its predecessor, moves the head
    /// to the predecessor, reverts execution state, and purges the removed
    /// block from pools, fork detector and durable stores.
    pub(crate) fn roll_back(&self, mode: RollBackMode) -> Result<(), SyncError> {
        let _guard = self.span.enter();
        debug!("starting roll back");

        loop {
            let curr_header = self.block_bootstrapper.get_curr_header()?;
            let highest_final = self.fork_detector.highest_final_block_nonce();

            match mode {
                RollBackMode::OneStep if curr_header.nonce <= highest_final => {
                    return Err(SyncError::RollBackBehindFinal);
                }
                RollBackMode::ToFinal if curr_header.nonce <= highest_final => {
                    break;
                }
                _ => {}
            }

            let curr_body = self.block_bootstrapper.get_block_body(&curr_header)?;
            let prev_header = self
                .block_bootstrapper
                .get_prev_header(&curr_header, self.header_store.as_ref())?;
            let prev_body = self.block_bootstrapper.get_block_body(&prev_header)?;

            debug!(
                nonce = %prev_header.nonce,
                hash = ?curr_header.prev_hash,
                "roll back to block"
            );
            debug!(nonce = %highest_final, "highest final block nonce");

            self.roll_back_one_block(&curr_header, &curr_body, &prev_header, &prev_body)?;

            let done = match mode {
                RollBackMode::OneStep => true,
                RollBackMode::ToForkNonce(fork_nonce) => curr_header.nonce <= fork_nonce,
                RollBackMode::ToFinal => prev_header.nonce <= highest_final,
            };
            if done {
                break;
            }
        }

        debug!("ending roll back");
        Ok(())
    }

    fn roll_back_one_block(
        &self,
        curr_header: &Arc<BlockHeader>,
        curr_body: &Arc<BlockBody>,
        prev_header: &Arc<BlockHeader>,
        prev_body: &Arc<BlockBody>,
    ) -> Result<(), SyncError> {
        // Rolling back past nonce 1 leaves the head hash empty: genesis has
        // no recorded predecessor hash.
        let prev_header_hash = (curr_header.nonce.0 > 1).then_some(curr_header.prev_hash);

        self.chain.set_current_header(Some(Arc::clone(prev_header)));
        self.chain.set_current_body(Some(Arc::clone(prev_body)));
        self.chain.set_current_header_hash(prev_header_hash);

        self.block_processor.revert_state_to_block(prev_header)?;

        self.clean_caches_and_storage_on_rollback(curr_header);

        let restored = self
            .block_processor
            .restore_block_into_pools(curr_header, curr_body);
        if let Err(err) = restored {
            debug!(%err, "restore block into pools");
        }

        Ok(())
    }

    /// Purge a removed block from pools, fork detector and durable stores.
    /// Store removals are best effort: a stale entry is re-deleted on the
    /// next rollback or replay cleanup that touches it.
    fn clean_caches_and_storage_on_rollback(&self, header: &Arc<BlockHeader>) {
        let hash = self.remove_header_from_pools(header);
        self.fork_detector.remove_headers(header.nonce, hash);

        if let Err(err) = self.header_store.remove(hash.as_bytes()) {
            debug!(%err, "remove header from storage");
        }
        if let Err(err) = self
            .header_nonce_hash_store
            .remove(&header.nonce.to_storage_key())
        {
            debug!(%err, "remove header nonce from storage");
        }
    }

    /// Resolve a forced fork: unwind to the last final block, then clear the
    /// detector's estimate and fork flags.
    pub(crate) fn roll_back_on_forced_fork(&self) {
        if let Err(err) = self.roll_back(RollBackMode::ToFinal) {
            debug!(%err, "roll back");
        }

        self.fork_detector.reset_probable_highest_nonce();
        self.fork_detector.reset_fork();
    }
}
