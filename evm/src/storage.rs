// EVM Storage Adapter
//
// Durable world state in RocksDB, exposed to revm through DatabaseRef.
// Reads go straight to the medium; block writes are staged into a
// WriteBatch and land together with the extended store and the roots.

use alloy_primitives::{Address, Bytes, B256, U256};
use anyhow::{anyhow, Result};
use revm::{
    primitives::{AccountInfo, Bytecode},
    Database, DatabaseRef,
};
use rocksdb::{WriteBatch, DB};
use std::sync::Arc;

use crate::extstore::StoreError;
use crate::types::{Account, Receipt, StateRoots, KECCAK_EMPTY};

const ACCOUNT_PREFIX: &[u8] = b"evm_account_";
const STORAGE_PREFIX: &[u8] = b"evm_storage_";
const CODE_PREFIX: &[u8] = b"evm_code_";
const BLOCK_HASH_PREFIX: &[u8] = b"evm_block_hash_";
const RECEIPT_PREFIX: &[u8] = b"evm_receipt_";
const HEIGHT_KEY: &[u8] = b"chain_height";
const ROOTS_PREFIX: &[u8] = b"chain_roots_";

fn account_key(address: &Address) -> Vec<u8> {
    let mut key = ACCOUNT_PREFIX.to_vec();
    key.extend_from_slice(address.as_slice());
    key
}

/// All slots of one account share this prefix
fn storage_prefix(address: &Address) -> Vec<u8> {
    let mut key = STORAGE_PREFIX.to_vec();
    key.extend_from_slice(address.as_slice());
    key.push(b'_');
    key
}

fn storage_key(address: &Address, slot: &U256) -> Vec<u8> {
    let mut key = storage_prefix(address);
    key.extend_from_slice(&slot.to_be_bytes::<32>());
    key
}

fn code_key(code_hash: &B256) -> Vec<u8> {
    let mut key = CODE_PREFIX.to_vec();
    key.extend_from_slice(code_hash.as_slice());
    key
}

fn block_hash_key(number: u64) -> Vec<u8> {
    let mut key = BLOCK_HASH_PREFIX.to_vec();
    key.extend_from_slice(&number.to_be_bytes());
    key
}

fn receipt_key(height: u64, index: u64) -> Vec<u8> {
    let mut key = RECEIPT_PREFIX.to_vec();
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn roots_key(height: u64) -> Vec<u8> {
    let mut key = ROOTS_PREFIX.to_vec();
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn corrupted(key: &[u8], reason: impl Into<String>) -> anyhow::Error {
    StoreError::Corrupted {
        key: hex::encode(key),
        reason: reason.into(),
    }
    .into()
}

/// EVM Storage backed by RocksDB
#[derive(Clone)]
pub struct EvmStorage {
    db: Arc<DB>,
}

impl EvmStorage {
    /// Create a new EVM storage instance
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Arc<DB> {
        &self.db
    }

    /// Get account information
    pub fn get_account(&self, address: &Address) -> Result<Option<Account>> {
        let key = account_key(address);
        match self.db.get(&key)? {
            Some(bytes) => {
                let account = bincode::deserialize(&bytes)
                    .map_err(|e| corrupted(&key, e.to_string()))?;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    /// Write an account directly, outside any block (genesis allocation)
    pub fn set_account(&self, address: &Address, account: &Account) -> Result<()> {
        self.db.put(account_key(address), bincode::serialize(account)?)?;
        Ok(())
    }

    /// Get storage slot value
    pub fn get_storage(&self, address: &Address, slot: &U256) -> Result<U256> {
        let key = storage_key(address, slot);
        match self.db.get(&key)? {
            Some(bytes) => {
                let word: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| corrupted(&key, format!("slot is {} bytes", bytes.len())))?;
                Ok(U256::from_be_bytes(word))
            }
            None => Ok(U256::ZERO),
        }
    }

    /// Get contract code by hash
    pub fn get_code(&self, code_hash: &B256) -> Result<Option<Bytes>> {
        Ok(self.db.get(code_key(code_hash))?.map(Bytes::from))
    }

    /// Get block hash by number
    pub fn get_block_hash(&self, number: u64) -> Result<Option<B256>> {
        let key = block_hash_key(number);
        match self.db.get(&key)? {
            Some(bytes) if bytes.len() == 32 => Ok(Some(B256::from_slice(&bytes))),
            Some(bytes) => Err(corrupted(&key, format!("hash is {} bytes", bytes.len()))),
            None => Ok(None),
        }
    }

    /// Height of the last committed block, 0 before the first commit
    pub fn committed_height(&self) -> Result<u64> {
        match self.db.get(HEIGHT_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| corrupted(HEIGHT_KEY, "height is not 8 bytes"))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    /// Roots committed at `height`
    /// Receipt `index` of committed block `height`
    pub fn get_receipt(&self, height: u64, index: u64) -> Result<Option<Receipt>> {
        let key = receipt_key(height, index);
        match self.db.get(&key)? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| corrupted(&key, e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn committed_roots(&self, height: u64) -> Result<Option<StateRoots>> {
        let key = roots_key(height);
        match self.db.get(&key)? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| corrupted(&key, e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Stage an account write; `None` deletes the record
    pub fn stage_account(
        &self,
        batch: &mut WriteBatch,
        address: &Address,
        account: Option<&Account>,
    ) -> Result<()> {
        let key = account_key(address);
        match account {
            Some(account) => batch.put(key, bincode::serialize(account)?),
            None => batch.delete(key),
        }
        Ok(())
    }

    /// Stage a slot write; zero deletes the slot
    pub fn stage_storage(&self, batch: &mut WriteBatch, address: &Address, slot: &U256, value: &U256) {
        let key = storage_key(address, slot);
        if value.is_zero() {
            batch.delete(key);
        } else {
            batch.put(key, value.to_be_bytes::<32>());
        }
    }

    /// Stage removal of every slot the account holds
    pub fn stage_wipe_storage(&self, batch: &mut WriteBatch, address: &Address) {
        let from = storage_prefix(address);
        let mut to = from.clone();
        if let Some(last) = to.last_mut() {
            *last += 1;
        }
        batch.delete_range(from, to);
    }

    pub fn stage_code(&self, batch: &mut WriteBatch, code_hash: &B256, code: &Bytes) {
        batch.put(code_key(code_hash), code.as_ref());
    }

    pub fn stage_block_hash(&self, batch: &mut WriteBatch, number: u64, hash: &B256) {
        batch.put(block_hash_key(number), hash.as_slice());
    }

    pub fn stage_receipt(
        &self,
        batch: &mut WriteBatch,
        height: u64,
        index: u64,
        receipt: &Receipt,
    ) -> Result<()> {
        batch.put(receipt_key(height, index), serde_json::to_vec(receipt)?);
        Ok(())
    }

    /// Stage the committed height and its roots
    pub fn stage_commit_marker(
        &self,
        batch: &mut WriteBatch,
        height: u64,
        roots: &StateRoots,
    ) -> Result<()> {
        batch.put(roots_key(height), bincode::serialize(roots)?);
        batch.put(HEIGHT_KEY, height.to_be_bytes());
        Ok(())
    }

    /// Apply a staged batch atomically
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db.write(batch)?;
        Ok(())
    }
}

impl DatabaseRef for EvmStorage {
    type Error = anyhow::Error;

    fn basic_ref(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        Ok(self.get_account(&address)?.map(|account| AccountInfo {
            balance: account.balance,
            nonce: account.nonce,
            code_hash: account.code_hash,
            // Loaded on demand through code_by_hash
            code: None,
        }))
    }

    fn code_by_hash_ref(&self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        if code_hash == KECCAK_EMPTY || code_hash == B256::ZERO {
            return Ok(Bytecode::default());
        }
        self.get_code(&code_hash)?
            .map(Bytecode::new_raw)
            .ok_or_else(|| anyhow!("missing code for hash {code_hash}"))
    }

    fn storage_ref(&self, address: Address, index: U256) -> Result<U256, Self::Error> {
        self.get_storage(&address, &index)
    }

    fn block_hash_ref(&self, number: u64) -> Result<B256, Self::Error> {
        Ok(self.get_block_hash(number)?.unwrap_or(B256::ZERO))
    }
}

impl Database for EvmStorage {
    type Error = anyhow::Error;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        self.basic_ref(address)
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        self.code_by_hash_ref(code_hash)
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        self.storage_ref(address, index)
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        self.block_hash_ref(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use tempfile::tempdir;

    fn create_test_storage() -> (EvmStorage, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = DB::open_default(temp_dir.path()).unwrap();
        (EvmStorage::new(Arc::new(db)), temp_dir)
    }

    #[test]
    fn test_account_storage() {
        let (storage, _temp) = create_test_storage();
        let address = Address::repeat_byte(0x01);
        let account = Account::with_balance(U256::from(1000));

        storage.set_account(&address, &account).unwrap();

        let retrieved = storage.get_account(&address).unwrap();
        assert_eq!(retrieved, Some(account));
    }

    #[test]
    fn test_staged_writes_land_together() {
        let (storage, _temp) = create_test_storage();
        let address = Address::repeat_byte(0x01);
        let code = Bytes::from(vec![0x60, 0x00, 0x60, 0x00, 0xf3]);
        let code_hash = keccak256(&code);
        let account = Account::with_code(U256::from(7), code_hash);

        let mut batch = WriteBatch::default();
        storage.stage_account(&mut batch, &address, Some(&account)).unwrap();
        storage.stage_storage(&mut batch, &address, &U256::from(5), &U256::from(12345));
        storage.stage_code(&mut batch, &code_hash, &code);
        storage
            .stage_commit_marker(&mut batch, 3, &StateRoots::default())
            .unwrap();

        // Nothing visible before the write
        assert!(storage.get_account(&address).unwrap().is_none());
        assert_eq!(storage.committed_height().unwrap(), 0);

        storage.write(batch).unwrap();
        assert_eq!(storage.get_account(&address).unwrap(), Some(account));
        assert_eq!(storage.get_storage(&address, &U256::from(5)).unwrap(), U256::from(12345));
        assert_eq!(storage.get_code(&code_hash).unwrap(), Some(code));
        assert_eq!(storage.committed_height().unwrap(), 3);
        assert_eq!(storage.committed_roots(3).unwrap(), Some(StateRoots::default()));
    }

    #[test]
    fn test_zero_slot_write_deletes() {
        let (storage, _temp) = create_test_storage();
        let address = Address::repeat_byte(0x01);

        let mut batch = WriteBatch::default();
        storage.stage_storage(&mut batch, &address, &U256::from(1), &U256::from(9));
        storage.write(batch).unwrap();

        let mut batch = WriteBatch::default();
        storage.stage_storage(&mut batch, &address, &U256::from(1), &U256::ZERO);
        storage.write(batch).unwrap();

        assert_eq!(storage.get_storage(&address, &U256::from(1)).unwrap(), U256::ZERO);
        assert!(storage.db.get(storage_key(&address, &U256::from(1))).unwrap().is_none());
    }

    #[test]
    fn test_wipe_storage_is_per_account() {
        let (storage, _temp) = create_test_storage();
        let wiped = Address::repeat_byte(0x01);
        let kept = Address::repeat_byte(0x02);

        let mut batch = WriteBatch::default();
        for slot in [0u64, 1, u64::MAX] {
            storage.stage_storage(&mut batch, &wiped, &U256::from(slot), &U256::from(1));
            storage.stage_storage(&mut batch, &kept, &U256::from(slot), &U256::from(2));
        }
        storage.stage_storage(&mut batch, &wiped, &U256::MAX, &U256::from(1));
        storage.write(batch).unwrap();

        let mut batch = WriteBatch::default();
        storage.stage_wipe_storage(&mut batch, &wiped);
        storage.write(batch).unwrap();

        for slot in [U256::from(0), U256::from(1), U256::from(u64::MAX), U256::MAX] {
            assert_eq!(storage.get_storage(&wiped, &slot).unwrap(), U256::ZERO);
        }
        assert_eq!(storage.get_storage(&kept, &U256::from(1)).unwrap(), U256::from(2));
    }

    #[test]
    fn test_block_hash_storage() {
        let (storage, _temp) = create_test_storage();
        let hash = B256::repeat_byte(0xaa);

        let mut batch = WriteBatch::default();
        storage.stage_block_hash(&mut batch, 42, &hash);
        storage.write(batch).unwrap();

        assert_eq!(storage.get_block_hash(42).unwrap(), Some(hash));
        assert_eq!(storage.block_hash_ref(43).unwrap(), B256::ZERO);
    }

    #[test]
    fn test_receipts_keyed_by_height_and_index() {
        let (storage, _temp) = create_test_storage();
        let receipt = Receipt {
            transaction_hash: B256::repeat_byte(0x11),
            from: Address::repeat_byte(0x01),
            to: None,
            contract_address: Some(Address::repeat_byte(0x02)),
            gas_used: 53_000,
            status: crate::types::TxStatus::Success,
            output: Bytes::from_static(&[0x60, 0x01]),
            logs: Vec::new(),
        };

        let mut batch = WriteBatch::default();
        storage.stage_receipt(&mut batch, 7, 1, &receipt).unwrap();
        storage.write(batch).unwrap();

        assert_eq!(storage.get_receipt(7, 1).unwrap(), Some(receipt));
        assert_eq!(storage.get_receipt(7, 0).unwrap(), None);
        assert_eq!(storage.get_receipt(1, 7).unwrap(), None);
    }

    #[test]
    fn test_database_trait_basic() {
        let (mut storage, _temp) = create_test_storage();
        let address = Address::repeat_byte(0x01);
        storage
            .set_account(&address, &Account::with_balance(U256::from(5000)))
            .unwrap();

        let info = storage.basic(address).unwrap().unwrap();
        assert_eq!(info.balance, U256::from(5000));
        assert_eq!(info.code_hash, KECCAK_EMPTY);
        assert!(storage.basic(Address::repeat_byte(0xff)).unwrap().is_none());
    }

    #[test]
    fn test_code_by_hash() {
        let (storage, _temp) = create_test_storage();
        let code = Bytes::from(vec![0x60, 0x01]);
        let code_hash = keccak256(&code);

        assert!(storage.code_by_hash_ref(code_hash).is_err());
        assert!(storage.code_by_hash_ref(KECCAK_EMPTY).unwrap().is_empty());

        let mut batch = WriteBatch::default();
        storage.stage_code(&mut batch, &code_hash, &code);
        storage.write(batch).unwrap();
        assert_eq!(storage.code_by_hash_ref(code_hash).unwrap().original_bytes(), code);
    }

    #[test]
    fn test_corrupted_slot_is_an_error() {
        let (storage, _temp) = create_test_storage();
        let address = Address::repeat_byte(0x01);
        storage
            .db
            .put(storage_key(&address, &U256::from(1)), [1u8, 2, 3])
            .unwrap();

        let err = storage.get_storage(&address, &U256::from(1)).unwrap_err();
        assert!(err.downcast_ref::<StoreError>().is_some());
    }
}
