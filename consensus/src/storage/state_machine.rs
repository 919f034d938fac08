/// State machine interface for consensus
///
/// Provides ABCI-like interface for state transitions and queries. The engine
/// calls `apply_block` for a decided block, then exactly one of `commit` or
/// `rollback`.

use crate::block::Block;
use crate::crypto::Hash;
use std::collections::HashMap;
use thiserror::Error;

/// State machine errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("State not found")]
    StateNotFound,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The storage medium failed; the block cannot be processed on this node
    #[error("Fatal storage error: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// State represents the application state at a specific height
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct State {
    pub root_hash: Hash,
    pub height: u64,
    pub data: HashMap<Vec<u8>, Vec<u8>>,
}

impl State {
    /// Create a new empty state
    pub fn new(root_hash: Hash) -> Self {
        Self {
            root_hash,
            height: 0,
            data: HashMap::new(),
        }
    }

    /// Create genesis state
    pub fn genesis() -> Self {
        Self::new(Hash::genesis())
    }

    /// Set a key-value pair
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.data.insert(key, value);
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.data.get(key)
    }

    /// Hash of the auxiliary data map
    pub fn compute_hash(&self) -> Hash {
        use crate::crypto::hash;

        // Sort keys for deterministic hashing
        let mut keys: Vec<_> = self.data.keys().collect();
        keys.sort();

        let mut data = Vec::new();
        for key in keys {
            data.extend_from_slice(&(key.len() as u64).to_le_bytes());
            data.extend_from_slice(key);
            if let Some(value) = self.data.get(key) {
                data.extend_from_slice(&(value.len() as u64).to_le_bytes());
                data.extend_from_slice(value);
            }
        }
        data.extend_from_slice(&self.height.to_le_bytes());

        hash(&data)
    }
}

/// State transition result
#[derive(Clone, Debug)]
pub struct StateTransition {
    pub old_state: State,
    pub new_state: State,
    pub block_hash: Hash,
    pub height: u64,
}

/// Query types for state machine
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum Query {
    /// Get value by key
    Get { key: Vec<u8> },

    /// Get state hash at height
    GetStateHash { height: u64 },

    /// Check if key exists
    Exists { key: Vec<u8> },
}

/// Query response
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum QueryResponse {
    Value(Option<Vec<u8>>),
    Hash(Hash),
    Exists(bool),
}

/// State machine trait
/// Provides interface for applying blocks and querying state
pub trait StateMachine: Send + Sync {
    /// Apply a block on top of the committed state, keeping the result pending
    fn apply_block(&mut self, block: &Block) -> Result<StateTransition>;

    /// Query the committed state
    fn query(&self, query: &Query) -> Result<QueryResponse>;

    /// Commit the pending state and return the state hash
    fn commit(&mut self) -> Result<Hash>;

    /// Drop the pending state
    fn rollback(&mut self) -> Result<()>;
}
