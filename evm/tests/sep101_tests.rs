// End-to-end tests for the SEP101 native store
//
// Transactions run through revm against real contract bytecode: the Solidity
// proxy (DELEGATECALL, entries owned by the proxy) and small hand-assembled
// forwarders (CALL / STATICCALL, entries owned by the forwarder).

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use proptest::prelude::*;
use rocksdb::DB;
use sepnode_evm::precompiles::sep101::ISep101;
use sepnode_evm::{
    ChainConfig, EvmExecutor, EvmStorage, ExtStore, Receipt, Transaction, TxStatus,
    SEP101_PRECOMPILE,
};
use std::sync::Arc;
use tempfile::tempdir;
use testutil::fixtures::{
    hex_fixture, sep101_proxy_bytecode, CONDITIONAL_FORWARDER_CREATION_HEX,
    FORWARDER_CREATION_HEX, STATIC_FORWARDER_CREATION_HEX,
};

const FUNDS: u64 = 1_000_000_000_000_000_000;

struct Node {
    _temp: tempfile::TempDir,
    executor: EvmExecutor,
    user: Address,
    nonce: u64,
}

impl Node {
    fn new() -> Self {
        let temp = tempdir().unwrap();
        let db = Arc::new(DB::open_default(temp.path()).unwrap());
        let mut executor = EvmExecutor::new(
            EvmStorage::new(db.clone()),
            ExtStore::new(db),
            ChainConfig::default(),
        );
        let user = Address::repeat_byte(0x01);
        executor.create_account(user, U256::from(FUNDS)).unwrap();
        executor.begin_block(1, 1_700_000_000);
        Self {
            _temp: temp,
            executor,
            user,
            nonce: 0,
        }
    }

    fn deploy(&mut self, creation: Vec<u8>) -> Address {
        let (address, receipt) = self
            .executor
            .deploy_contract(self.user, Bytes::from(creation), self.nonce)
            .unwrap();
        assert!(receipt.is_success(), "deployment failed: {receipt:?}");
        self.nonce += 1;
        address
    }

    fn send(&mut self, tx: Transaction) -> Receipt {
        let receipt = self.executor.execute_transaction(&tx).unwrap();
        self.nonce += 1;
        receipt
    }

    fn call(&mut self, to: Address, data: Bytes) -> Receipt {
        let tx = Transaction::call(self.user, to, data, self.nonce).with_gas_limit(3_000_000);
        self.send(tx)
    }

    fn ext(&self, owner: Address, key: &[u8]) -> Option<Vec<u8>> {
        self.executor.ext_get(&owner, key).unwrap()
    }
}

fn set_call(key: &[u8], value: &[u8]) -> Bytes {
    ISep101::setCall {
        key: Bytes::copy_from_slice(key),
        value: Bytes::copy_from_slice(value),
    }
    .abi_encode()
    .into()
}

fn get_call(key: &[u8]) -> Bytes {
    ISep101::getCall {
        key: Bytes::copy_from_slice(key),
    }
    .abi_encode()
    .into()
}

fn decode_get(receipt: &Receipt) -> Vec<u8> {
    ISep101::getCall::abi_decode_returns(&receipt.output, true)
        .unwrap()
        .value
        .to_vec()
}

#[test]
fn test_proxy_set_then_get() {
    let mut node = Node::new();
    let proxy = node.deploy(sep101_proxy_bytecode());

    let key = [0xAB, 0xCD];
    let value = [0x12, 0x34].repeat(500);

    let receipt = node.call(proxy, set_call(&key, &value));
    assert_eq!(receipt.status, TxStatus::Success);

    let receipt = node.call(proxy, get_call(&key));
    assert_eq!(receipt.status, TxStatus::Success);
    assert_eq!(decode_get(&receipt), value);

    // DELEGATECALL: the proxy owns the entry, not the signer
    assert_eq!(node.ext(proxy, &key), Some(value));
    assert_eq!(node.ext(node.user, &key), None);
}

#[test]
fn test_proxy_get_absent_key_is_empty() {
    let mut node = Node::new();
    let proxy = node.deploy(sep101_proxy_bytecode());

    let receipt = node.call(proxy, get_call(&[9, 9, 9]));
    assert_eq!(receipt.status, TxStatus::Success);
    assert!(decode_get(&receipt).is_empty());
}

#[test]
fn test_proxy_rejects_out_of_bounds_writes() {
    let mut node = Node::new();
    let proxy = node.deploy(sep101_proxy_bytecode());

    let cases = [
        (Vec::new(), vec![1, 2, 3]),
        (vec![39u8; 257], vec![1, 2, 3]),
        (vec![1, 2, 3], vec![39u8; 24 * 1024 + 1]),
    ];
    for (key, value) in cases {
        let receipt = node.call(proxy, set_call(&key, &value));
        assert_eq!(
            receipt.status,
            TxStatus::PrecompileFailure,
            "key {} bytes, value {} bytes",
            key.len(),
            value.len()
        );
        // Included and charged
        assert!(receipt.gas_used > 21000);
    }

    assert!(node.executor.native_state().ext.is_empty());
    assert_eq!(node.executor.get_nonce(&node.user).unwrap(), node.nonce);
}

#[test]
fn test_forwarder_owns_its_entries() {
    let mut node = Node::new();
    let first = node.deploy(hex_fixture(FORWARDER_CREATION_HEX));
    let second = node.deploy(hex_fixture(FORWARDER_CREATION_HEX));

    assert!(node.call(first, set_call(b"key", b"first")).is_success());
    assert!(node.call(second, set_call(b"key", b"second")).is_success());
    assert!(node
        .call(SEP101_PRECOMPILE, set_call(b"key", b"signer"))
        .is_success());

    assert_eq!(node.ext(first, b"key"), Some(b"first".to_vec()));
    assert_eq!(node.ext(second, b"key"), Some(b"second".to_vec()));
    assert_eq!(node.ext(node.user, b"key"), Some(b"signer".to_vec()));
}

#[test]
fn test_failed_inner_call_marks_transaction() {
    let mut node = Node::new();
    let forwarder = node.deploy(hex_fixture(FORWARDER_CREATION_HEX));

    // The forwarder ignores the inner result and returns normally
    let receipt = node.call(forwarder, set_call(&[], b"v"));
    assert_eq!(receipt.status, TxStatus::PrecompileFailure);
    assert_eq!(node.ext(forwarder, b""), None);

    let receipt = node.call(forwarder, Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]));
    assert_eq!(receipt.status, TxStatus::PrecompileFailure);
}

#[test]
fn test_outer_revert_undoes_committed_inner_write() {
    let mut node = Node::new();
    let forwarder = node.deploy(hex_fixture(CONDITIONAL_FORWARDER_CREATION_HEX));

    assert!(node.call(forwarder, set_call(b"k", b"kept")).is_success());

    // Inner set succeeds, then the forwarder reverts because value != 0
    let tx = Transaction::call(node.user, forwarder, set_call(b"k", b"dropped"), node.nonce)
        .with_value(U256::from(1));
    let receipt = node.send(tx);
    assert_eq!(receipt.status, TxStatus::Revert);

    assert_eq!(node.ext(forwarder, b"k"), Some(b"kept".to_vec()));
}

#[test]
fn test_static_context_blocks_set_only() {
    let mut node = Node::new();
    let forwarder = node.deploy(hex_fixture(STATIC_FORWARDER_CREATION_HEX));

    let receipt = node.call(forwarder, set_call(b"k", b"v"));
    assert_eq!(receipt.status, TxStatus::PrecompileFailure);
    assert_eq!(node.ext(forwarder, b"k"), None);

    let receipt = node.call(forwarder, get_call(b"k"));
    assert_eq!(receipt.status, TxStatus::Success);
}

#[test]
fn test_value_to_store_is_rejected() {
    let mut node = Node::new();
    let tx = Transaction::call(node.user, SEP101_PRECOMPILE, set_call(b"k", b"v"), node.nonce)
        .with_value(U256::from(5));
    let receipt = node.send(tx);

    assert_eq!(receipt.status, TxStatus::PrecompileFailure);
    assert_eq!(node.ext(node.user, b"k"), None);
    // The value went back with the failed call
    assert_eq!(
        node.executor.get_balance(&SEP101_PRECOMPILE).unwrap(),
        U256::ZERO
    );
}

#[test]
fn test_insufficient_gas_is_out_of_gas_not_failure() {
    let mut node = Node::new();
    let tx = Transaction::call(node.user, SEP101_PRECOMPILE, set_call(b"k", b"v"), node.nonce)
        .with_gas_limit(25_000);
    let receipt = node.send(tx);

    assert_eq!(receipt.status, TxStatus::Revert);
    assert_eq!(receipt.gas_used, 25_000);
    assert_eq!(node.ext(node.user, b"k"), None);
}

#[test]
fn test_later_transactions_see_earlier_writes() {
    let mut node = Node::new();
    let proxy = node.deploy(sep101_proxy_bytecode());

    assert!(node.call(proxy, set_call(b"k", b"one")).is_success());
    assert!(node.call(proxy, set_call(b"k", b"two")).is_success());
    // Overwrite with empty acts as a delete from the contract's view
    assert!(node.call(proxy, set_call(b"j", b"x")).is_success());
    assert!(node.call(proxy, set_call(b"j", b"")).is_success());

    assert_eq!(decode_get(&node.call(proxy, get_call(b"k"))), b"two");
    assert!(decode_get(&node.call(proxy, get_call(b"j"))).is_empty());
    assert_eq!(node.ext(proxy, b"j"), Some(Vec::new()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_direct_round_trip(
        key in testutil::ext_key_strategy(),
        value in testutil::ext_value_strategy(512),
    ) {
        let mut node = Node::new();
        let receipt = node.call(SEP101_PRECOMPILE, set_call(&key, &value));
        prop_assert_eq!(receipt.status, TxStatus::Success);

        let receipt = node.call(SEP101_PRECOMPILE, get_call(&key));
        prop_assert_eq!(receipt.status, TxStatus::Success);
        prop_assert_eq!(decode_get(&receipt), value);
    }

    #[test]
    fn prop_out_of_bounds_key_never_writes(key in testutil::invalid_ext_key_strategy()) {
        let mut node = Node::new();
        let receipt = node.call(SEP101_PRECOMPILE, set_call(&key, b"v"));
        prop_assert_eq!(receipt.status, TxStatus::PrecompileFailure);
        prop_assert!(node.executor.native_state().is_empty());
    }
}
