// Native contracts
//
// Reserved addresses are served by Rust handlers instead of bytecode. The
// registry is built once at startup and shared read-only; everything a
// handler may touch is passed in through `CallContext` and `NativeContext`.

use alloy_primitives::{Address, Bytes, U256};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::config::GasSchedule;
use crate::extstore::{BoundsError, JournalError, StoreError};

pub mod context;
pub mod sep101;
pub mod staking;

pub use context::{NativeContext, NativeState, NativeUndo};
pub use sep101::Sep101Precompile;
pub use staking::{StakingOp, StakingPrecompile};

/// Validator staking operations
pub const STAKING_PRECOMPILE: Address = Address::new([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x27, 0x10,
]);
/// SEP101 extended key/value storage
pub const SEP101_PRECOMPILE: Address = Address::new([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x27, 0x12,
]);

/// Who is calling a native contract and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Namespace the call acts on: the contract whose code issued the call,
    /// or the delegating contract for DELEGATECALL/CALLCODE
    pub owner: Address,
    /// Immediate caller of the frame
    pub caller: Address,
    /// Value carried by the call (apparent value for delegated calls)
    pub value: U256,
    pub is_static: bool,
    /// True when the precompile runs in another contract's context
    pub delegated: bool,
}

impl CallContext {
    /// A plain CALL from `caller` with no value
    pub fn direct(caller: Address) -> Self {
        Self {
            owner: caller,
            caller,
            value: U256::ZERO,
            is_static: false,
            delegated: false,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn into_static(mut self) -> Self {
        self.is_static = true;
        self
    }
}

#[derive(Error, Debug)]
pub enum PrecompileError {
    /// Rejected input; the caller sees a failed call
    #[error("precompile failure: {0}")]
    Failure(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    /// The interpreter's state could not be read or written
    #[error("state access failed: {0}")]
    StateAccess(String),
}

impl PrecompileError {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure(reason.into())
    }

    /// Fatal errors abort block processing
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Failure(_))
    }
}

impl From<BoundsError> for PrecompileError {
    fn from(err: BoundsError) -> Self {
        Self::Failure(err.to_string())
    }
}

impl From<alloy_sol_types::Error> for PrecompileError {
    fn from(err: alloy_sol_types::Error) -> Self {
        Self::Failure(format!("abi decode: {err}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecompileStatus {
    Success,
    /// Validation failure: empty output, charged gas consumed
    Failure,
    /// Budget below the required gas; the handler never ran
    OutOfGas,
}

/// Outcome of one native call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecompileResult {
    pub status: PrecompileStatus,
    pub output: Bytes,
    pub gas_used: u64,
}

impl PrecompileResult {
    pub fn success(output: Bytes, gas_used: u64) -> Self {
        Self {
            status: PrecompileStatus::Success,
            output,
            gas_used,
        }
    }

    pub fn failure(gas_used: u64) -> Self {
        Self {
            status: PrecompileStatus::Failure,
            output: Bytes::new(),
            gas_used,
        }
    }

    pub fn out_of_gas(gas_budget: u64) -> Self {
        Self {
            status: PrecompileStatus::OutOfGas,
            output: Bytes::new(),
            gas_used: gas_budget,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PrecompileStatus::Success
    }
}

/// Trait for native contracts
pub trait Precompile: Send + Sync {
    fn name(&self) -> &'static str;

    /// Gas for this input, known before anything executes
    fn required_gas(&self, input: &[u8], gas: &GasSchedule) -> u64;

    /// Execute. State changes go through `native` so they are journaled.
    fn call(
        &self,
        input: &[u8],
        ctx: &CallContext,
        native: &mut NativeContext<'_>,
    ) -> Result<Bytes, PrecompileError>;
}

/// Reserved address -> handler
pub struct PrecompileRegistry {
    handlers: BTreeMap<Address, Box<dyn Precompile>>,
    gas: GasSchedule,
}

impl Default for PrecompileRegistry {
    fn default() -> Self {
        Self::new(GasSchedule::default())
    }
}

impl PrecompileRegistry {
    /// Registry with the node's native contracts
    pub fn new(gas: GasSchedule) -> Self {
        Self::empty(gas)
            .with_precompile(STAKING_PRECOMPILE, Box::new(StakingPrecompile))
            .with_precompile(SEP101_PRECOMPILE, Box::new(Sep101Precompile))
    }

    pub fn empty(gas: GasSchedule) -> Self {
        Self {
            handlers: BTreeMap::new(),
            gas,
        }
    }

    pub fn with_precompile(mut self, address: Address, handler: Box<dyn Precompile>) -> Self {
        self.handlers.insert(address, handler);
        self
    }

    pub fn is_precompile(&self, address: &Address) -> bool {
        self.handlers.contains_key(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.handlers.keys()
    }

    pub fn gas_schedule(&self) -> &GasSchedule {
        &self.gas
    }

    /// Run the handler at `address`.
    ///
    /// Gas is settled before the handler runs. The handler gets its own
    /// journal frame: a failure rolls back whatever it staged and comes back
    /// as `PrecompileStatus::Failure`. An `Err` is always fatal.
    pub fn dispatch(
        &self,
        address: &Address,
        input: &[u8],
        gas_budget: u64,
        ctx: &CallContext,
        native: &mut NativeContext<'_>,
    ) -> Result<PrecompileResult, PrecompileError> {
        let Some(handler) = self.handlers.get(address) else {
            debug!(%address, "no native contract registered");
            return Ok(PrecompileResult::failure(0));
        };

        let required = handler.required_gas(input, &self.gas);
        if required > gas_budget {
            debug!(
                precompile = handler.name(),
                required,
                gas_budget,
                "native call out of gas"
            );
            return Ok(PrecompileResult::out_of_gas(gas_budget));
        }

        native.open_frame();
        match handler.call(input, ctx, native) {
            Ok(output) => {
                native.commit_frame()?;
                trace!(
                    precompile = handler.name(),
                    owner = %ctx.owner,
                    gas_used = required,
                    "native call succeeded"
                );
                Ok(PrecompileResult::success(output, required))
            }
            Err(PrecompileError::Failure(reason)) => {
                native.revert_frame()?;
                debug!(
                    precompile = handler.name(),
                    owner = %ctx.owner,
                    %reason,
                    "native call failed"
                );
                Ok(PrecompileResult::failure(required))
            }
            Err(fatal) => {
                let _ = native.revert_frame();
                error!(precompile = handler.name(), error = %fatal, "native call aborted");
                Err(fatal)
            }
        }
    }
}
