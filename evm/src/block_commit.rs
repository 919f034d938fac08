// Block commit
//
// At the block boundary the revm cache and the native working set are
// reduced to a `BlockChanges` set: every account, slot, code blob and
// extended-store entry that differs from durable state. The roots are chained
// over those changes in a fixed order and the whole set is written in a
// single batch together with the new height.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use anyhow::Result;
use revm::db::{AccountState, CacheDB};
use rocksdb::WriteBatch;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::extstore::{ExtStore, PendingWrites};
use crate::precompiles::{NativeState, StakingOp};
use crate::storage::EvmStorage;
use crate::types::{Account, Receipt, StateRoots, KECCAK_EMPTY};

const TAG_ACCOUNT: u8 = b'A';
const TAG_WIPE: u8 = b'W';
const TAG_SLOT: u8 = b'S';

/// New durable value of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountChange {
    Updated(Account),
    Deleted,
}

/// Everything a block changed, keyed in commit order
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BlockChanges {
    pub accounts: BTreeMap<Address, AccountChange>,
    /// Accounts whose durable storage is dropped before `storage` applies
    pub wiped: BTreeSet<Address>,
    pub storage: BTreeMap<(Address, U256), U256>,
    pub code: BTreeMap<B256, Bytes>,
    pub ext: PendingWrites,
    /// Staking requests in execution order
    pub staking_ops: Vec<StakingOp>,
    /// Served to BLOCKHASH once committed
    pub block_hash: Option<B256>,
    /// Stored by height and index; not part of any root
    pub receipts: Vec<Receipt>,
}

fn is_empty_account(account: &Account) -> bool {
    account.nonce == 0 && account.balance.is_zero() && account.code_hash == KECCAK_EMPTY
}

impl BlockChanges {
    /// Diff the block's cache and native working set against durable state
    pub fn collect(
        cache: &CacheDB<EvmStorage>,
        durable: &EvmStorage,
        native: NativeState,
    ) -> Result<Self> {
        let mut changes = Self {
            ext: native.ext,
            staking_ops: native.staking_ops,
            ..Self::default()
        };

        for (address, db_account) in &cache.accounts {
            let previous = durable.get_account(address)?;
            let cleared = match db_account.account_state {
                // Loaded but never written
                AccountState::None => continue,
                AccountState::NotExisting => {
                    if previous.is_some() {
                        changes.accounts.insert(*address, AccountChange::Deleted);
                        changes.wiped.insert(*address);
                    }
                    continue;
                }
                AccountState::StorageCleared => true,
                AccountState::Touched => false,
            };

            let info = &db_account.info;
            let account = Account {
                nonce: info.nonce,
                balance: info.balance,
                code_hash: info.code_hash,
            };
            match previous {
                Some(prev) if prev == account => {}
                None if is_empty_account(&account) => {}
                _ => {
                    changes.accounts.insert(*address, AccountChange::Updated(account));
                }
            }
            if cleared && previous.is_some() {
                changes.wiped.insert(*address);
            }

            let stored_code = previous.map(|p| p.code_hash);
            if account.code_hash != KECCAK_EMPTY
                && account.code_hash != B256::ZERO
                && stored_code != Some(account.code_hash)
            {
                let code = cache
                    .contracts
                    .get(&account.code_hash)
                    .or(info.code.as_ref())
                    .map(|bytecode| bytecode.original_bytes());
                if let Some(code) = code.filter(|c| !c.is_empty()) {
                    changes.code.insert(account.code_hash, code);
                }
            }

            for (slot, value) in &db_account.storage {
                let durable_value = if cleared {
                    U256::ZERO
                } else {
                    durable.get_storage(address, slot)?
                };
                if *value != durable_value {
                    changes.storage.insert((*address, *slot), *value);
                }
            }
        }

        debug!(
            accounts = changes.accounts.len(),
            slots = changes.storage.len(),
            ext_entries = changes.ext.len(),
            staking_ops = changes.staking_ops.len(),
            "block changes collected"
        );
        Ok(changes)
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.wiped.is_empty()
            && self.storage.is_empty()
            && self.ext.is_empty()
            && self.staking_ops.is_empty()
    }

    /// Chain account and storage changes onto `prev_root`
    pub fn account_root(&self, prev_root: B256) -> B256 {
        if self.accounts.is_empty() && self.wiped.is_empty() && self.storage.is_empty() {
            return prev_root;
        }

        let mut preimage = prev_root.to_vec();
        for (address, change) in &self.accounts {
            preimage.push(TAG_ACCOUNT);
            preimage.extend_from_slice(address.as_slice());
            match change {
                AccountChange::Deleted => preimage.push(0x00),
                AccountChange::Updated(account) => {
                    preimage.push(0x01);
                    preimage.extend_from_slice(&account.nonce.to_be_bytes());
                    preimage.extend_from_slice(&account.balance.to_be_bytes::<32>());
                    preimage.extend_from_slice(account.code_hash.as_slice());
                }
            }
        }
        for address in &self.wiped {
            preimage.push(TAG_WIPE);
            preimage.extend_from_slice(address.as_slice());
        }
        for ((address, slot), value) in &self.storage {
            preimage.push(TAG_SLOT);
            preimage.extend_from_slice(address.as_slice());
            preimage.extend_from_slice(&slot.to_be_bytes::<32>());
            preimage.extend_from_slice(&value.to_be_bytes::<32>());
        }
        keccak256(&preimage)
    }

    /// Roots of the block on top of `prev`
    pub fn roots(&self, prev: &StateRoots) -> StateRoots {
        StateRoots::new(
            self.account_root(prev.account_root),
            self.ext.fold_root(prev.ext_root),
        )
    }

    /// Write every change, the roots and the new height in one batch
    pub fn persist(
        &self,
        storage: &EvmStorage,
        ext_store: &ExtStore,
        height: u64,
        roots: &StateRoots,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        for address in &self.wiped {
            storage.stage_wipe_storage(&mut batch, address);
        }
        for (address, change) in &self.accounts {
            match change {
                AccountChange::Updated(account) => {
                    storage.stage_account(&mut batch, address, Some(account))?
                }
                AccountChange::Deleted => storage.stage_account(&mut batch, address, None)?,
            }
        }
        for ((address, slot), value) in &self.storage {
            storage.stage_storage(&mut batch, address, slot, value);
        }
        for (code_hash, code) in &self.code {
            storage.stage_code(&mut batch, code_hash, code);
        }
        ext_store.write_batch(&mut batch, &self.ext);
        if let Some(hash) = &self.block_hash {
            storage.stage_block_hash(&mut batch, height, hash);
        }
        for (index, receipt) in (0u64..).zip(&self.receipts) {
            storage.stage_receipt(&mut batch, height, index, receipt)?;
        }
        storage.stage_commit_marker(&mut batch, height, roots)?;

        storage.write(batch)?;
        info!(
            height,
            state_root = %roots.state_root,
            accounts = self.accounts.len(),
            ext_entries = self.ext.len(),
            "block committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extstore::EntryKey;
    use revm::primitives::AccountInfo;
    use rocksdb::DB;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct Setup {
        _temp: tempfile::TempDir,
        storage: EvmStorage,
        ext_store: ExtStore,
    }

    fn setup() -> Setup {
        let temp = tempdir().unwrap();
        let db = Arc::new(DB::open_default(temp.path()).unwrap());
        Setup {
            _temp: temp,
            storage: EvmStorage::new(db.clone()),
            ext_store: ExtStore::new(db),
        }
    }

    fn touch(cache: &mut CacheDB<EvmStorage>, address: Address, balance: u64) {
        cache.insert_account_info(
            address,
            AccountInfo {
                balance: U256::from(balance),
                nonce: 1,
                code_hash: KECCAK_EMPTY,
                code: None,
            },
        );
        cache.accounts.get_mut(&address).unwrap().account_state = AccountState::Touched;
    }

    #[test]
    fn test_untouched_cache_has_no_changes() {
        let s = setup();
        let address = Address::repeat_byte(0x01);
        s.storage
            .set_account(&address, &Account::with_balance(U256::from(5)))
            .unwrap();

        let mut cache = CacheDB::new(s.storage.clone());
        cache.load_account(address).unwrap();
        cache.load_account(Address::repeat_byte(0x02)).unwrap();

        let changes = BlockChanges::collect(&cache, &s.storage, NativeState::default()).unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.account_root(B256::repeat_byte(9)), B256::repeat_byte(9));
    }

    #[test]
    fn test_touched_account_and_slots_collected() {
        let s = setup();
        let address = Address::repeat_byte(0x01);
        let mut cache = CacheDB::new(s.storage.clone());
        touch(&mut cache, address, 100);
        cache
            .insert_account_storage(address, U256::from(1), U256::from(11))
            .unwrap();

        let changes = BlockChanges::collect(&cache, &s.storage, NativeState::default()).unwrap();
        assert_eq!(
            changes.accounts.get(&address),
            Some(&AccountChange::Updated(Account {
                nonce: 1,
                balance: U256::from(100),
                code_hash: KECCAK_EMPTY,
            }))
        );
        assert_eq!(changes.storage.get(&(address, U256::from(1))), Some(&U256::from(11)));
    }

    #[test]
    fn test_persist_then_recollect_is_empty() {
        let s = setup();
        let address = Address::repeat_byte(0x01);
        let mut cache = CacheDB::new(s.storage.clone());
        touch(&mut cache, address, 100);

        let mut native = NativeState::default();
        native
            .ext
            .put(EntryKey::new(address, vec![1]), vec![2, 3]);

        let changes = BlockChanges::collect(&cache, &s.storage, native).unwrap();
        let roots = changes.roots(&StateRoots::default());
        changes.persist(&s.storage, &s.ext_store, 1, &roots).unwrap();

        assert_eq!(s.storage.committed_height().unwrap(), 1);
        assert_eq!(s.storage.committed_roots(1).unwrap(), Some(roots));
        assert_eq!(s.ext_store.get(&address, &[1]).unwrap(), Some(vec![2, 3]));

        let again = BlockChanges::collect(&cache, &s.storage, NativeState::default()).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_deleted_account_wipes_storage() {
        let s = setup();
        let address = Address::repeat_byte(0x01);
        s.storage
            .set_account(&address, &Account::with_balance(U256::from(5)))
            .unwrap();
        let mut batch = WriteBatch::default();
        s.storage
            .stage_storage(&mut batch, &address, &U256::from(3), &U256::from(4));
        s.storage.write(batch).unwrap();

        let mut cache = CacheDB::new(s.storage.clone());
        cache.load_account(address).unwrap().account_state = AccountState::NotExisting;

        let changes = BlockChanges::collect(&cache, &s.storage, NativeState::default()).unwrap();
        assert_eq!(changes.accounts.get(&address), Some(&AccountChange::Deleted));
        assert!(changes.wiped.contains(&address));

        let roots = changes.roots(&StateRoots::default());
        changes.persist(&s.storage, &s.ext_store, 1, &roots).unwrap();
        assert!(s.storage.get_account(&address).unwrap().is_none());
        assert_eq!(s.storage.get_storage(&address, &U256::from(3)).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_roots_ignore_insertion_order_and_chain() {
        let a = Address::repeat_byte(0x01);
        let b = Address::repeat_byte(0x02);

        let mut first = BlockChanges::default();
        first.storage.insert((a, U256::from(1)), U256::from(1));
        first.storage.insert((b, U256::from(1)), U256::from(2));

        let mut second = BlockChanges::default();
        second.storage.insert((b, U256::from(1)), U256::from(2));
        second.storage.insert((a, U256::from(1)), U256::from(1));

        let prev = StateRoots::default();
        assert_eq!(first.roots(&prev), second.roots(&prev));
        assert_ne!(first.roots(&prev).account_root, prev.account_root);
        assert_eq!(first.roots(&prev).ext_root, prev.ext_root);

        let chained = first.roots(&first.roots(&prev));
        assert_ne!(chained, first.roots(&prev));
    }
}
