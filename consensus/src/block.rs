/// Ordered block handed from consensus to the execution layer
///
/// Transactions are opaque byte strings; the state machine decides how to
/// decode them. The timestamp is chosen by the proposer so every replica
/// executes against the same block context.

use crate::crypto::{hash, Hash};

/// Block structure
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub parent: Hash,
    pub height: u64,
    pub view: u64,
    pub timestamp: u64,
    pub transactions: Vec<Vec<u8>>,
    /// Opaque proposer identity (public key bytes)
    pub proposer: Vec<u8>,
}

impl Block {
    /// Create a new block
    pub fn new(
        parent: Hash,
        height: u64,
        view: u64,
        timestamp: u64,
        transactions: Vec<Vec<u8>>,
        proposer: Vec<u8>,
    ) -> Self {
        Self {
            parent,
            height,
            view,
            timestamp,
            transactions,
            proposer,
        }
    }

    /// Create genesis block
    pub fn genesis() -> Self {
        Self::new(Hash::genesis(), 0, 0, 0, vec![], vec![])
    }

    /// Compute hash of this block
    pub fn hash(&self) -> Hash {
        let mut data = Vec::new();
        data.extend_from_slice(self.parent.as_bytes());
        data.extend_from_slice(&self.height.to_le_bytes());
        data.extend_from_slice(&self.view.to_le_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());

        // Length-prefix so that transaction boundaries are part of the hash
        for tx in &self.transactions {
            data.extend_from_slice(&(tx.len() as u64).to_le_bytes());
            data.extend_from_slice(tx);
        }
        data.extend_from_slice(&self.proposer);

        hash(&data)
    }

    /// Check if this block extends from another block
    pub fn extends_from(&self, other: &Block) -> bool {
        self.parent == other.hash() && self.height == other.height + 1
    }
}
