//! Foundational chain types shared across the node.
//!
//! Everything here is plain data: no I/O, no async, no locking. The types are
//! deliberately small so that every layer (pools, storage, sync, consensus
//! plumbing) can pass them around by value or behind an [`std::sync::Arc`].

mod block;
mod hash;
mod shard;

pub use block::{BlockBody, BlockHeader, MiniBlock, Nonce, Round};
pub use hash::Hash;
pub use shard::ShardId;
