//! In-memory chain head.

use crate::traits::ChainHandler;
use lattice_types::{BlockBody, BlockHeader, Hash};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Default)]
struct ChainState {
    header: Option<Arc<BlockHeader>>,
    body: Option<Arc<BlockBody>>,
    header_hash: Option<Hash>,
}

/// The node's single mutable chain head.
///
/// Writers are the bootstrap engine and the block processor; everything else
/// only reads. All three head fields sit behind one lock so a reader never
/// observes a header from one block paired with the hash of another.
#[derive(Default)]
pub struct Blockchain {
    state: RwLock<ChainState>,
}

impl Blockchain {
    /// Create an empty chain head (pre-genesis).
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainHandler for Blockchain {
    fn current_header(&self) -> Option<Arc<BlockHeader>> {
        self.state.read().header.clone()
    }

    fn set_current_header(&self, header: Option<Arc<BlockHeader>>) {
        self.state.write().header = header;
    }

    fn current_body(&self) -> Option<Arc<BlockBody>> {
        self.state.read().body.clone()
    }

    fn set_current_body(&self, body: Option<Arc<BlockBody>>) {
        self.state.write().body = body;
    }

    fn current_header_hash(&self) -> Option<Hash> {
        self.state.read().header_hash
    }

    fn set_current_header_hash(&self, hash: Option<Hash>) {
        self.state.write().header_hash = hash;
    }
}
