// EVM State Machine Implementation
//
// Bridges the consensus StateMachine trait with the EVM executor. A decided
// block is executed and sealed in `apply_block`; its changes and roots stay
// pending until consensus calls `commit` or `rollback`.

use alloy_primitives::{Address, B256};
use consensus::storage::state_machine::{
    Query, QueryResponse, State, StateError, StateMachine, StateTransition as ConsensusStateTransition,
};
use consensus::{Block, Hash};
use rocksdb::DB;
use std::sync::Arc;
use tracing::{debug, error};

use crate::block_commit::BlockChanges;
use crate::config::ChainConfig;
use crate::executor::EvmExecutor;
use crate::extstore::ExtStore;
use crate::precompiles::StakingOp;
use crate::storage::EvmStorage;
use crate::types::{Receipt, StateRoots, Transaction};

const SEP101_QUERY_PREFIX: &[u8] = b"sep101_";
const BALANCE_QUERY_PREFIX: &[u8] = b"evm_balance_";
const RECEIPT_QUERY_PREFIX: &[u8] = b"receipt_";
const ADDRESS_LEN: usize = 20;

/// A sealed block waiting for the consensus decision
struct PendingBlock {
    state: State,
    changes: BlockChanges,
    roots: StateRoots,
}

fn fatal(err: anyhow::Error) -> StateError {
    error!(error = %format!("{err:#}"), "block processing aborted");
    StateError::Fatal(format!("{err:#}"))
}

fn to_hash(root: B256) -> Hash {
    Hash::new(root.0)
}

/// EVM State Machine
///
/// Implements the StateMachine trait from consensus, delegating to EvmExecutor
pub struct EvmStateMachine {
    executor: EvmExecutor,
    storage: EvmStorage,
    ext_store: ExtStore,
    current_state: State,
    pending: Option<PendingBlock>,
    last_receipts: Vec<Receipt>,
    last_staking_ops: Vec<StakingOp>,
}

impl EvmStateMachine {
    /// Open the state machine on `db`, resuming from the last committed block
    pub fn new(db: Arc<DB>, config: ChainConfig) -> Result<Self, StateError> {
        let storage = EvmStorage::new(db.clone());
        let ext_store = ExtStore::new(db);
        let executor = EvmExecutor::new(storage.clone(), ext_store.clone(), config);

        let height = storage.committed_height().map_err(fatal)?;
        let current_state = if height == 0 {
            State::genesis()
        } else {
            let roots = storage
                .committed_roots(height)
                .map_err(fatal)?
                .ok_or(StateError::StateNotFound)?;
            let mut state = State::new(to_hash(roots.state_root));
            state.height = height;
            log::info!("Restored committed state at height {}", height);
            state
        };

        Ok(Self {
            executor,
            storage,
            ext_store,
            current_state,
            pending: None,
            last_receipts: Vec::new(),
            last_staking_ops: Vec::new(),
        })
    }

    /// Get the current state
    pub fn current_state(&self) -> &State {
        &self.current_state
    }

    /// Get the executor (for testing and inspection)
    pub fn executor(&self) -> &EvmExecutor {
        &self.executor
    }

    /// Get mutable executor access
    pub fn executor_mut(&mut self) -> &mut EvmExecutor {
        &mut self.executor
    }

    /// Receipts of the last applied block
    pub fn last_receipts(&self) -> &[Receipt] {
        &self.last_receipts
    }

    /// Staking requests of the last applied block, in execution order
    pub fn last_staking_ops(&self) -> &[StakingOp] {
        &self.last_staking_ops
    }

    /// Roots of the pending block, if any
    pub fn pending_roots(&self) -> Option<StateRoots> {
        self.pending.as_ref().map(|pending| pending.roots)
    }

    /// Decode transactions from block data
    fn decode_transactions(&self, block: &Block) -> Result<Vec<Transaction>, StateError> {
        block
            .transactions
            .iter()
            .enumerate()
            .map(|(index, bytes)| {
                Self::decode_single_transaction(bytes).map_err(|e| {
                    StateError::InvalidTransition(format!(
                        "Transaction {index} decode error: {e}"
                    ))
                })
            })
            .collect()
    }

    /// Decode a single transaction: JSON first, then bincode
    fn decode_single_transaction(bytes: &[u8]) -> Result<Transaction, StateError> {
        if let Ok(tx) = serde_json::from_slice::<Transaction>(bytes) {
            return Ok(tx);
        }

        bincode::deserialize(bytes).map_err(|e| {
            StateError::SerializationError(format!("Failed to deserialize transaction: {}", e))
        })
    }

    fn execute_block(&mut self, block: &Block) -> anyhow::Result<(Vec<Receipt>, BlockChanges)> {
        let transactions = self
            .decode_transactions(block)
            .map_err(anyhow::Error::from)?;

        self.executor.begin_block(block.height, block.timestamp);
        let receipts = self.executor.execute_batch(&transactions)?;
        let mut changes = self.executor.seal_block()?;
        changes.block_hash = Some(B256::from(*block.hash().as_bytes()));
        changes.receipts = receipts.clone();
        Ok((receipts, changes))
    }

    fn query_sep101(&self, rest: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        if rest.len() <= ADDRESS_LEN {
            return Err(StateError::QueryFailed(
                "sep101 query needs a 20-byte owner and a key".into(),
            ));
        }
        let (owner, key) = rest.split_at(ADDRESS_LEN);
        self.ext_store
            .get(&Address::from_slice(owner), key)
            .map_err(|e| StateError::Fatal(e.to_string()))
    }

    /// `receipt_{height}_{index}`, decimal
    fn query_receipt(&self, rest: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        let malformed =
            || StateError::QueryFailed("receipt query is receipt_{height}_{index}".into());
        let (height, index) = std::str::from_utf8(rest)
            .ok()
            .and_then(|rest| rest.split_once('_'))
            .ok_or_else(malformed)?;
        let height = height.parse::<u64>().map_err(|_| malformed())?;
        let index = index.parse::<u64>().map_err(|_| malformed())?;

        let receipt = self
            .storage
            .get_receipt(height, index)
            .map_err(|e| StateError::Fatal(e.to_string()))?;
        receipt
            .map(|r| serde_json::to_vec(&r))
            .transpose()
            .map_err(|e| StateError::SerializationError(e.to_string()))
    }

    /// Committed value behind a `Get` / `Exists` key
    fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        if let Some(rest) = key.strip_prefix(SEP101_QUERY_PREFIX) {
            return self.query_sep101(rest);
        }
        if let Some(rest) = key.strip_prefix(RECEIPT_QUERY_PREFIX) {
            return self.query_receipt(rest);
        }

        // evm_balance_{address}
        if let Some(addr_bytes) = key.strip_prefix(BALANCE_QUERY_PREFIX) {
            if addr_bytes.len() == ADDRESS_LEN {
                let account = self
                    .storage
                    .get_account(&Address::from_slice(addr_bytes))
                    .map_err(|e| StateError::Fatal(e.to_string()))?;
                return Ok(account.map(|a| a.balance.to_be_bytes::<32>().to_vec()));
            }
        }

        Ok(None)
    }
}

impl StateMachine for EvmStateMachine {
    fn apply_block(&mut self, block: &Block) -> Result<ConsensusStateTransition, StateError> {
        if self.pending.is_some() {
            return Err(StateError::InvalidTransition(
                "A block is already pending".into(),
            ));
        }
        let expected = self.current_state.height + 1;
        if block.height != expected {
            return Err(StateError::InvalidTransition(format!(
                "Expected block at height {}, got {}",
                expected, block.height
            )));
        }

        let (receipts, changes) = match self.execute_block(block) {
            Ok(executed) => executed,
            Err(err) => {
                if let Err(discard) = self.executor.discard_block() {
                    error!(error = %discard, "failed to discard aborted block");
                }
                return match err.downcast::<StateError>() {
                    Ok(state_err) => Err(state_err),
                    Err(err) => Err(fatal(err)),
                };
            }
        };

        let prev_roots = self.executor.committed_roots().map_err(fatal)?;
        let roots = changes.roots(&prev_roots);

        // Receipts travel with the changes and are served from storage
        let mut new_state = State::new(to_hash(roots.state_root));
        new_state.height = block.height;

        debug!(
            height = block.height,
            txs = receipts.len(),
            state_root = %roots.state_root,
            "block applied"
        );

        let transition = ConsensusStateTransition {
            old_state: self.current_state.clone(),
            new_state: new_state.clone(),
            block_hash: block.hash(),
            height: block.height,
        };

        self.last_receipts = receipts;
        self.last_staking_ops = changes.staking_ops.clone();
        self.pending = Some(PendingBlock {
            state: new_state,
            changes,
            roots,
        });

        Ok(transition)
    }

    fn query(&self, query: &Query) -> Result<QueryResponse, StateError> {
        match query {
            Query::Get { key } => self.lookup(key).map(QueryResponse::Value),
            Query::GetStateHash { height } => {
                if *height > self.current_state.height {
                    return Err(StateError::StateNotFound);
                }
                if *height == self.current_state.height {
                    return Ok(QueryResponse::Hash(self.current_state.root_hash));
                }
                if *height == 0 {
                    return Ok(QueryResponse::Hash(Hash::genesis()));
                }
                match self
                    .storage
                    .committed_roots(*height)
                    .map_err(|e| StateError::Fatal(e.to_string()))?
                {
                    Some(roots) => Ok(QueryResponse::Hash(to_hash(roots.state_root))),
                    None => Err(StateError::StateNotFound),
                }
            }
            Query::Exists { key } => Ok(QueryResponse::Exists(self.lookup(key)?.is_some())),
        }
    }

    fn commit(&mut self) -> Result<Hash, StateError> {
        let pending = self.pending.take().ok_or_else(|| {
            StateError::InvalidTransition("No pending state to commit".into())
        })?;
        let height = pending.state.height;

        let roots = self
            .executor
            .commit_block(height, &pending.changes)
            .map_err(fatal)?;
        if roots != pending.roots {
            return Err(StateError::Fatal(format!(
                "roots changed between apply and commit at height {height}"
            )));
        }

        let hash = pending.state.root_hash;
        self.current_state = pending.state;
        log::info!("Committed block {} with state root {}", height, roots.state_root);

        Ok(hash)
    }

    fn rollback(&mut self) -> Result<(), StateError> {
        if self.pending.take().is_none() {
            return Err(StateError::InvalidTransition(
                "No pending state to rollback".into(),
            ));
        }
        self.executor.discard_block().map_err(fatal)?;
        self.last_receipts.clear();
        self.last_staking_ops.clear();
        log::info!("Rolled back block {}", self.current_state.height + 1);
        Ok(())
    }
}
