//! Block headers, bodies and their sequence numbers.

use crate::{Hash, ShardId};
use std::fmt;

/// Block sequence number assigned by consensus.
///
/// Nonce 0 is the genesis block; the first block produced after genesis has
/// nonce 1. `Nonce::MAX` never names a real block — the fork detector uses it
/// as an opaque sentinel when demanding a rollback without a competing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Nonce(pub u64);

impl Nonce {
    /// The sentinel nonce, larger than any real block's.
    pub const MAX: Nonce = Nonce(u64::MAX);

    /// The nonce of the following block.
    pub fn next(self) -> Nonce {
        Nonce(self.0.saturating_add(1))
    }

    /// The nonce of the preceding block, saturating at 0.
    pub fn prev(self) -> Nonce {
        Nonce(self.0.saturating_sub(1))
    }

    /// Fixed-width big-endian key used in the nonce-to-hash store.
    pub fn to_storage_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consensus round in which a block was proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Round(pub u64);

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Header of a block, as seen by the sync layer.
///
/// Wire encoding is owned by the networking layer; here the header is already
/// decoded. Only the fields the bootstrap path reads are modeled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Sequence number of this block.
    pub nonce: Nonce,

    /// Round in which this block was proposed.
    pub round: Round,

    /// Shard this block belongs to.
    pub shard: ShardId,

    /// Hash of the previous block's header.
    pub prev_hash: Hash,

    /// Root of the account-state trie after executing this block.
    pub state_root_hash: Hash,
}

impl BlockHeader {
    /// Content hash of this header.
    pub fn hash(&self) -> Hash {
        let mut data = Vec::with_capacity(8 + 8 + 4 + Hash::LENGTH * 2);
        data.extend_from_slice(&self.nonce.0.to_be_bytes());
        data.extend_from_slice(&self.round.0.to_be_bytes());
        data.extend_from_slice(&self.shard.0.to_be_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.state_root_hash.as_bytes());
        Hash::compute(&data)
    }
}

/// A slice of a block's transactions routed between two shards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MiniBlock {
    /// Shard that produced the transactions.
    pub sender_shard: ShardId,

    /// Shard that executes the transactions.
    pub receiver_shard: ShardId,

    /// Hashes of the transactions carried by this miniblock.
    pub tx_hashes: Vec<Hash>,
}

/// Payload of a block: the miniblocks it carries.
///
/// The sync layer shuttles bodies between pool, processor and chain head but
/// never looks inside them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockBody {
    /// Miniblocks grouped into this block.
    pub mini_blocks: Vec<MiniBlock>,
}
