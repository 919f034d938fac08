// Sepnode EVM execution
//
// EVM transaction execution with native contracts, integrated with the
// consensus layer:
// - Transaction execution using revm, native calls intercepted by an inspector
// - SEP101 extended key/value storage and the staking entry point
// - Call journal that undoes native writes exactly where the EVM reverts
// - RocksDB storage adapter and atomic per-block commit
// - StateMachine trait implementation for consensus integration

pub mod block_commit;
pub mod config;
pub mod executor;
pub mod extstore;
pub mod inspector;
pub mod precompiles;
pub mod state_machine;
pub mod storage;
pub mod types;

// Re-exports for convenience
pub use block_commit::{AccountChange, BlockChanges};
pub use config::{ChainConfig, ConfigError, GasSchedule};
pub use executor::EvmExecutor;
pub use extstore::{EntryKey, ExtSnapshot, ExtStore, PendingWrites, StoreError};
pub use inspector::{NativeCallInspector, NativeTxOutcome};
pub use precompiles::{
    CallContext, Precompile, PrecompileError, PrecompileRegistry, PrecompileResult,
    PrecompileStatus, StakingOp, SEP101_PRECOMPILE, STAKING_PRECOMPILE,
};
pub use state_machine::EvmStateMachine;
pub use storage::EvmStorage;
pub use types::{Account, Log, Receipt, StateRoots, Transaction, TxStatus};
