// EVM types for Sepnode
//
// Transactions as they arrive from consensus, durable account records,
// receipts and the per-block state roots.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

pub use revm::primitives::KECCAK_EMPTY;

/// EVM Transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Sender address
    pub from: Address,
    /// Recipient address (None for contract creation)
    pub to: Option<Address>,
    /// Transaction value in wei
    pub value: U256,
    /// Transaction data/input
    pub data: Bytes,
    /// Gas limit
    pub gas_limit: u64,
    /// Gas price
    pub gas_price: U256,
    /// Transaction nonce
    pub nonce: u64,
    /// Chain ID for replay protection
    pub chain_id: u64,
}

impl Transaction {
    /// Create a simple transfer
    pub fn transfer(from: Address, to: Address, value: U256, nonce: u64) -> Self {
        Self {
            from,
            to: Some(to),
            value,
            data: Bytes::new(),
            gas_limit: 21000,
            gas_price: U256::from(1u64),
            nonce,
            chain_id: 1,
        }
    }

    /// Create a contract deployment transaction
    pub fn deploy(from: Address, bytecode: Bytes, nonce: u64) -> Self {
        Self {
            from,
            to: None,
            value: U256::ZERO,
            data: bytecode,
            gas_limit: 5_000_000,
            gas_price: U256::from(1u64),
            nonce,
            chain_id: 1,
        }
    }

    /// Create a contract call transaction
    pub fn call(from: Address, to: Address, data: Bytes, nonce: u64) -> Self {
        Self {
            from,
            to: Some(to),
            value: U256::ZERO,
            data,
            gas_limit: 1_000_000,
            gas_price: U256::from(1u64),
            nonce,
            chain_id: 1,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Address a deployment from this transaction lands at
    pub fn create_address(&self) -> Option<Address> {
        match self.to {
            Some(_) => None,
            None => Some(self.from.create(self.nonce)),
        }
    }
}

/// Durable account record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Account nonce
    pub nonce: u64,
    /// Account balance in wei
    pub balance: U256,
    /// Code hash (KECCAK_EMPTY for EOAs)
    pub code_hash: B256,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            code_hash: KECCAK_EMPTY,
        }
    }
}

impl Account {
    /// Create a new account with balance
    pub fn with_balance(balance: U256) -> Self {
        Self {
            balance,
            ..Default::default()
        }
    }

    /// Create a contract account
    pub fn with_code(balance: U256, code_hash: B256) -> Self {
        Self {
            balance,
            code_hash,
            ..Default::default()
        }
    }
}

/// How a transaction ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TxStatus {
    Success,
    /// Reverted, halted, or rejected before execution
    Revert,
    /// A native contract rejected its input somewhere in the call tree
    PrecompileFailure,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Revert => "revert",
            Self::PrecompileFailure => "precompile-failure",
        }
    }

    /// Numeric receipt status
    pub fn code(&self) -> u8 {
        match self {
            Self::Success => 1,
            Self::Revert => 0,
            Self::PrecompileFailure => 2,
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction receipt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    /// Transaction hash
    pub transaction_hash: B256,
    /// Sender address
    pub from: Address,
    /// Recipient address (None for contract creation)
    pub to: Option<Address>,
    /// Contract address (for deployments)
    pub contract_address: Option<Address>,
    /// Gas used
    pub gas_used: u64,
    pub status: TxStatus,
    /// Output data
    pub output: Bytes,
    /// Transaction logs
    pub logs: Vec<Log>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == TxStatus::Success
    }
}

/// EVM event log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Log {
    /// Contract address that emitted the log
    pub address: Address,
    /// Log topics
    pub topics: Vec<B256>,
    /// Log data
    pub data: Bytes,
}

/// Roots after a block
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateRoots {
    /// Chained over account and storage changes
    pub account_root: B256,
    /// Chained over extended-store changes
    pub ext_root: B256,
    /// keccak(account_root ++ ext_root)
    pub state_root: B256,
}

impl StateRoots {
    pub fn new(account_root: B256, ext_root: B256) -> Self {
        let mut preimage = [0u8; 64];
        preimage[..32].copy_from_slice(account_root.as_slice());
        preimage[32..].copy_from_slice(ext_root.as_slice());
        Self {
            account_root,
            ext_root,
            state_root: alloy_primitives::keccak256(preimage),
        }
    }
}
