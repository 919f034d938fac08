// EVM Executor
//
// Runs transactions through revm with the native call inspector installed.
// State changes accumulate in a per-block cache (contract state) and a
// per-block native working set (extended store, staking requests) until the
// block is sealed and committed, or discarded.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use anyhow::{anyhow, bail, Context, Result};
use revm::{
    db::CacheDB,
    inspector_handle_register,
    primitives::{EVMError, Env, ExecutionResult, Output, ResultAndState, SpecId, TxKind},
    Database, DatabaseCommit, Evm,
};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::block_commit::BlockChanges;
use crate::config::ChainConfig;
use crate::extstore::{ExtSnapshot, ExtStore};
use crate::inspector::{NativeCallInspector, NativeTxOutcome};
use crate::precompiles::{NativeState, PrecompileRegistry};
use crate::storage::EvmStorage;
use crate::types::{Account, Log, Receipt, StateRoots, Transaction, TxStatus, KECCAK_EMPTY};

/// EVM Executor manages transaction execution
pub struct EvmExecutor {
    /// Durable state
    storage: EvmStorage,
    /// Contract state written by the current block
    cache: Arc<RwLock<CacheDB<EvmStorage>>>,
    ext_store: ExtStore,
    registry: PrecompileRegistry,
    config: ChainConfig,
    /// Extended store as of the start of the current block
    snapshot: ExtSnapshot,
    /// Native writes of the current block
    native: NativeState,
    /// Current block number
    block_number: u64,
    /// Current block timestamp
    block_timestamp: u64,
}

impl EvmExecutor {
    /// Create a new EVM executor
    pub fn new(storage: EvmStorage, ext_store: ExtStore, config: ChainConfig) -> Self {
        let registry = PrecompileRegistry::new(config.gas);
        let snapshot = ext_store.begin_block(0);
        Self {
            cache: Arc::new(RwLock::new(CacheDB::new(storage.clone()))),
            storage,
            ext_store,
            registry,
            config,
            snapshot,
            native: NativeState::default(),
            block_number: 0,
            block_timestamp: 0,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn registry(&self) -> &PrecompileRegistry {
        &self.registry
    }

    /// Get the current block number
    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Start executing block `number` on top of committed state
    pub fn begin_block(&mut self, number: u64, timestamp: u64) {
        self.block_number = number;
        self.block_timestamp = timestamp;
        self.snapshot = self.ext_store.begin_block(number);
        debug!(height = number, timestamp, "block started");
    }

    fn cache_mut(&self) -> Result<RwLockWriteGuard<'_, CacheDB<EvmStorage>>> {
        self.cache
            .write()
            .map_err(|_| anyhow!("EVM state cache lock poisoned"))
    }

    /// Execute a transaction, keeping its effects in the current block
    pub fn execute_transaction(&mut self, tx: &Transaction) -> Result<Receipt> {
        self.run(tx, true)
    }

    /// Simulate a transaction. Nothing it does is kept.
    pub fn call(&mut self, tx: &Transaction) -> Result<Receipt> {
        self.run(tx, false)
    }

    fn run(&mut self, tx: &Transaction, keep: bool) -> Result<Receipt> {
        let tx_hash = self.compute_tx_hash(tx);
        let mut env = self.build_env(tx);
        if !keep {
            env.tx.nonce = None;
        }

        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow!("EVM state cache lock poisoned"))?;
        let inspector = NativeCallInspector::new(&self.registry, &self.snapshot, &mut self.native);

        let (result, native) = {
            let mut evm = Evm::builder()
                .with_db(&mut *cache)
                .with_external_context(inspector)
                .with_env(Box::new(env))
                .with_spec_id(SpecId::CANCUN)
                .append_handler_register(inspector_handle_register)
                .build();
            let result = evm.transact();
            let inspector = evm.into_context().external;
            (result, inspector.finish(keep))
        };
        let native = native.context("native call aborted the transaction")?;

        let ResultAndState { result, state } = match result {
            Ok(result) => result,
            Err(EVMError::Transaction(invalid)) => {
                warn!(tx = %tx_hash, reason = %invalid, "transaction rejected");
                return Ok(Receipt {
                    transaction_hash: tx_hash,
                    from: tx.from,
                    to: tx.to,
                    contract_address: None,
                    gas_used: 0,
                    status: TxStatus::Revert,
                    output: Bytes::from(invalid.to_string()),
                    logs: Vec::new(),
                });
            }
            Err(EVMError::Database(err)) => return Err(err.context("state read failed")),
            Err(err) => bail!("EVM execution failed: {err}"),
        };

        if keep {
            cache.commit(state);
        }
        drop(cache);

        let receipt = self.build_receipt(tx, tx_hash, result, native);
        debug!(
            tx = %tx_hash,
            status = %receipt.status,
            gas_used = receipt.gas_used,
            simulated = !keep,
            "transaction executed"
        );
        Ok(receipt)
    }

    /// Execute multiple transactions in order
    pub fn execute_batch(&mut self, transactions: &[Transaction]) -> Result<Vec<Receipt>> {
        transactions
            .iter()
            .map(|tx| self.execute_transaction(tx))
            .collect()
    }

    /// Get account balance
    pub fn get_balance(&self, address: &Address) -> Result<U256> {
        let mut cache = self.cache_mut()?;
        Ok(cache
            .basic(*address)?
            .map(|info| info.balance)
            .unwrap_or_default())
    }

    /// Get account nonce
    pub fn get_nonce(&self, address: &Address) -> Result<u64> {
        let mut cache = self.cache_mut()?;
        Ok(cache.basic(*address)?.map(|info| info.nonce).unwrap_or(0))
    }

    /// Get storage slot value
    pub fn get_storage(&self, address: &Address, slot: &U256) -> Result<U256> {
        let mut cache = self.cache_mut()?;
        cache.storage(*address, *slot)
    }

    /// Get contract code
    pub fn get_code(&self, address: &Address) -> Result<Option<Bytes>> {
        let mut cache = self.cache_mut()?;
        let Some(info) = cache.basic(*address)? else {
            return Ok(None);
        };
        if info.code_hash == KECCAK_EMPTY {
            return Ok(None);
        }
        let code = match info.code {
            Some(code) => code,
            None => cache.code_by_hash(info.code_hash)?,
        };
        Ok(Some(code.original_bytes()))
    }

    /// Extended store entry as the current block sees it
    pub fn ext_get(&self, owner: &Address, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.native.ext.read_through(&self.snapshot, owner, key)?)
    }

    /// Native writes staged by the current block
    pub fn native_state(&self) -> &NativeState {
        &self.native
    }

    /// Create an account with initial balance (genesis allocation).
    /// Written straight to durable state.
    pub fn create_account(&mut self, address: Address, balance: U256) -> Result<()> {
        self.storage
            .set_account(&address, &Account::with_balance(balance))?;
        // Drop any cached copy so the next read sees the allocation
        self.cache_mut()?.accounts.remove(&address);
        info!(%address, %balance, "genesis account created");
        Ok(())
    }

    /// Deploy a contract (convenience method)
    pub fn deploy_contract(
        &mut self,
        deployer: Address,
        bytecode: Bytes,
        nonce: u64,
    ) -> Result<(Address, Receipt)> {
        let tx = Transaction::deploy(deployer, bytecode, nonce);
        let receipt = self.execute_transaction(&tx)?;

        let contract_address = receipt
            .contract_address
            .ok_or_else(|| anyhow!("contract deployment failed: {}", receipt.status))?;

        Ok((contract_address, receipt))
    }

    /// Call a contract method (convenience method)
    pub fn call_contract(
        &mut self,
        caller: Address,
        contract: Address,
        data: Bytes,
        nonce: u64,
    ) -> Result<Receipt> {
        let tx = Transaction::call(caller, contract, data, nonce);
        self.execute_transaction(&tx)
    }

    /// Roots of the last committed block
    pub fn committed_roots(&self) -> Result<StateRoots> {
        let height = self.storage.committed_height()?;
        Ok(self.storage.committed_roots(height)?.unwrap_or_default())
    }

    pub fn committed_height(&self) -> Result<u64> {
        self.storage.committed_height()
    }

    /// Close the current block and collect what it changed. The block stays
    /// pending until `commit_block` or `discard_block`.
    pub fn seal_block(&mut self) -> Result<BlockChanges> {
        let native = std::mem::take(&mut self.native);
        let cache = self
            .cache
            .read()
            .map_err(|_| anyhow!("EVM state cache lock poisoned"))?;
        BlockChanges::collect(&cache, &self.storage, native)
    }

    /// Persist a sealed block as `height` and return its roots
    pub fn commit_block(&mut self, height: u64, changes: &BlockChanges) -> Result<StateRoots> {
        let committed = self.storage.committed_height()?;
        if height != committed + 1 {
            bail!("cannot commit height {height} on top of {committed}");
        }

        let roots = changes.roots(&self.committed_roots()?);
        changes.persist(&self.storage, &self.ext_store, height, &roots)?;
        self.reset()?;
        Ok(roots)
    }

    /// Drop everything the current block did
    pub fn discard_block(&mut self) -> Result<()> {
        self.reset()?;
        debug!(height = self.block_number, "block discarded");
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        *self.cache_mut()? = CacheDB::new(self.storage.clone());
        self.native = NativeState::default();
        self.snapshot = self.ext_store.begin_block(self.block_number + 1);
        Ok(())
    }

    /// Build the EVM environment from a transaction
    fn build_env(&self, tx: &Transaction) -> Env {
        let mut env = Env::default();

        env.cfg.chain_id = self.config.chain_id;

        // Set block context
        env.block.number = U256::from(self.block_number);
        env.block.timestamp = U256::from(self.block_timestamp);
        env.block.gas_limit = U256::from(self.config.block_gas_limit);
        env.block.basefee = tx.gas_price;

        // Set transaction context
        env.tx.caller = tx.from;
        env.tx.transact_to = match tx.to {
            Some(addr) => TxKind::Call(addr),
            None => TxKind::Create,
        };
        env.tx.value = tx.value;
        env.tx.data = tx.data.clone();
        env.tx.gas_limit = tx.gas_limit;
        env.tx.gas_price = tx.gas_price;
        env.tx.nonce = Some(tx.nonce);
        env.tx.chain_id = Some(tx.chain_id);

        env
    }

    /// Build a receipt from execution result
    fn build_receipt(
        &self,
        tx: &Transaction,
        tx_hash: B256,
        result: ExecutionResult,
        native: NativeTxOutcome,
    ) -> Receipt {
        let (status, output, gas_used, contract_address, logs) = match result {
            ExecutionResult::Success {
                output,
                gas_used,
                logs,
                ..
            } => {
                let logs = logs
                    .into_iter()
                    .map(|log| Log {
                        address: log.address,
                        topics: log.data.topics().to_vec(),
                        data: log.data.data.clone(),
                    })
                    .collect();
                match output {
                    Output::Create(bytes, addr) => (TxStatus::Success, bytes, gas_used, addr, logs),
                    Output::Call(bytes) => (TxStatus::Success, bytes, gas_used, None, logs),
                }
            }
            ExecutionResult::Revert { output, gas_used } => {
                (TxStatus::Revert, output, gas_used, None, Vec::new())
            }
            ExecutionResult::Halt { reason, gas_used } => (
                TxStatus::Revert,
                Bytes::from(format!("Halt: {reason:?}")),
                gas_used,
                None,
                Vec::new(),
            ),
        };

        // A rejected native call anywhere in the tree marks the whole transaction
        let status = if native.precompile_failed {
            TxStatus::PrecompileFailure
        } else {
            status
        };

        Receipt {
            transaction_hash: tx_hash,
            from: tx.from,
            to: tx.to,
            contract_address,
            gas_used,
            status,
            output,
            logs,
        }
    }

    /// Compute transaction hash
    fn compute_tx_hash(&self, tx: &Transaction) -> B256 {
        let mut data = Vec::new();
        data.extend_from_slice(tx.from.as_slice());
        if let Some(to) = tx.to {
            data.extend_from_slice(to.as_slice());
        }
        data.extend_from_slice(&tx.nonce.to_be_bytes());
        data.extend_from_slice(&tx.value.to_be_bytes::<32>());
        data.extend_from_slice(&tx.gas_limit.to_be_bytes());
        data.extend_from_slice(&tx.chain_id.to_be_bytes());
        data.extend_from_slice(&tx.data);

        keccak256(&data)
    }
}
