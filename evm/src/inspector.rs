// Native call interception
//
// revm runs the bytecode; this inspector runs alongside it. Every call and
// create opens a journal frame that is committed or reverted when the
// interpreter returns from it, so native writes follow exactly the same
// revert boundaries as contract storage. Calls whose code address is a
// registered native contract are answered here without ever creating an
// interpreter frame; call value is moved here too, under a journal
// checkpoint that is reverted unless the native call succeeds.

use alloy_primitives::{Bytes, U256};
use revm::{
    interpreter::{
        CallInputs, CallOutcome, CallValue, CreateInputs, CreateOutcome, Gas, InstructionResult,
        InterpreterResult,
    },
    Database, EvmContext, Inspector, JournalCheckpoint,
};
use std::fmt::Display;
use tracing::error;

use crate::extstore::{ExtSnapshot, Journal, JournalError};
use crate::precompiles::{
    CallContext, NativeContext, NativeState, NativeUndo, PrecompileError, PrecompileRegistry,
    PrecompileResult, PrecompileStatus,
};

/// Per-transaction bridge between revm frames and the native journal
pub struct NativeCallInspector<'a> {
    registry: &'a PrecompileRegistry,
    snapshot: &'a ExtSnapshot,
    state: &'a mut NativeState,
    journal: Journal<NativeUndo>,
    precompile_failed: bool,
    fatal: Option<PrecompileError>,
}

/// What the native side observed during one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NativeTxOutcome {
    /// Some native call in the tree failed validation
    pub precompile_failed: bool,
}

impl<'a> NativeCallInspector<'a> {
    /// Opens the transaction frame; pair with `finish`
    pub fn new(
        registry: &'a PrecompileRegistry,
        snapshot: &'a ExtSnapshot,
        state: &'a mut NativeState,
    ) -> Self {
        let mut journal = Journal::new();
        journal.open_frame();
        Self {
            registry,
            snapshot,
            state,
            journal,
            precompile_failed: false,
            fatal: None,
        }
    }

    /// Close the transaction frame. With `keep` the transaction's surviving
    /// native writes stay in the block working set; otherwise all are undone.
    /// A fatal error seen during execution always undoes and is returned.
    pub fn finish(mut self, keep: bool) -> Result<NativeTxOutcome, PrecompileError> {
        if let Some(fatal) = self.fatal.take() {
            self.journal.revert_all(&mut *self.state);
            return Err(fatal);
        }
        if self.journal.depth() != 1 {
            let depth = self.journal.depth();
            self.journal.revert_all(&mut *self.state);
            error!(depth, "unbalanced native journal at transaction end");
            return Err(JournalError::Unbalanced(depth).into());
        }

        if keep {
            self.journal.commit_frame()?;
        } else {
            self.journal.revert_frame(&mut *self.state)?;
        }
        Ok(NativeTxOutcome {
            precompile_failed: self.precompile_failed,
        })
    }

    fn record_fatal(&mut self, err: PrecompileError) {
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
    }

    /// Credit the call value to the native contract's account. `Err` ends
    /// the call without dispatching.
    fn transfer_value<DB>(
        &mut self,
        context: &mut EvmContext<DB>,
        inputs: &CallInputs,
    ) -> Result<Option<JournalCheckpoint>, InterpreterResult>
    where
        DB: Database,
        DB::Error: Display,
    {
        let value = match inputs.value {
            CallValue::Transfer(value) if !value.is_zero() => value,
            _ => return Ok(None),
        };

        let inner = &mut context.inner;
        let checkpoint = inner.journaled_state.checkpoint();
        match inner.journaled_state.transfer(
            &inputs.caller,
            &inputs.target_address,
            value,
            &mut inner.db,
        ) {
            Ok(None) => Ok(Some(checkpoint)),
            // Out of funds and the like: a failed call, nothing spent
            Ok(Some(result)) => {
                inner.journaled_state.checkpoint_revert(checkpoint);
                Err(InterpreterResult::new(result, Bytes::new(), Gas::new(inputs.gas_limit)))
            }
            Err(err) => {
                inner.journaled_state.checkpoint_revert(checkpoint);
                error!(error = %err, "value transfer to native contract failed");
                self.record_fatal(PrecompileError::StateAccess(err.to_string()));
                let mut gas = Gas::new(inputs.gas_limit);
                let _ = gas.record_cost(inputs.gas_limit);
                Err(InterpreterResult::new(InstructionResult::PrecompileError, Bytes::new(), gas))
            }
        }
    }

    fn close_frame(&mut self, success: bool) {
        let closed = if success {
            self.journal.commit_frame()
        } else {
            self.journal.revert_frame(&mut *self.state)
        };
        if let Err(err) = closed {
            error!(error = %err, "native journal frame mismatch");
            self.record_fatal(err.into());
        }
    }

    fn to_interpreter_result(&mut self, result: PrecompileResult, gas_limit: u64) -> InterpreterResult {
        let mut gas = Gas::new(gas_limit);
        match result.status {
            PrecompileStatus::Success => {
                let _ = gas.record_cost(result.gas_used);
                InterpreterResult::new(InstructionResult::Return, result.output, gas)
            }
            PrecompileStatus::Failure => {
                self.precompile_failed = true;
                let _ = gas.record_cost(result.gas_used);
                InterpreterResult::new(InstructionResult::Revert, Bytes::new(), gas)
            }
            PrecompileStatus::OutOfGas => {
                let _ = gas.record_cost(gas_limit);
                InterpreterResult::new(InstructionResult::PrecompileOOG, Bytes::new(), gas)
            }
        }
    }
}

/// Owner and call flags as the native contract sees them
pub fn call_context(inputs: &CallInputs) -> CallContext {
    // CALL and STATICCALL run in the precompile's own context
    let delegated = inputs.target_address != inputs.bytecode_address;
    let owner = if delegated {
        inputs.target_address
    } else {
        inputs.caller
    };
    let value = match inputs.value {
        CallValue::Transfer(value) => value,
        CallValue::Apparent(_) => U256::ZERO,
    };
    CallContext {
        owner,
        caller: inputs.caller,
        value,
        is_static: inputs.is_static,
        delegated,
    }
}

impl<DB> Inspector<DB> for NativeCallInspector<'_>
where
    DB: Database,
    DB::Error: Display,
{
    fn call(&mut self, context: &mut EvmContext<DB>, inputs: &mut CallInputs) -> Option<CallOutcome> {
        self.journal.open_frame();
        if !self.registry.is_precompile(&inputs.bytecode_address) {
            return None;
        }

        let checkpoint = match self.transfer_value(context, inputs) {
            Ok(checkpoint) => checkpoint,
            Err(result) => return Some(CallOutcome::new(result, inputs.return_memory_offset.clone())),
        };

        let ctx = call_context(inputs);
        let dispatched = {
            let mut native = NativeContext::new(self.snapshot, &mut *self.state, &mut self.journal);
            self.registry.dispatch(
                &inputs.bytecode_address,
                &inputs.input,
                inputs.gas_limit,
                &ctx,
                &mut native,
            )
        };

        let result = match dispatched {
            Ok(result) => self.to_interpreter_result(result, inputs.gas_limit),
            Err(fatal) => {
                self.record_fatal(fatal);
                let mut gas = Gas::new(inputs.gas_limit);
                let _ = gas.record_cost(inputs.gas_limit);
                InterpreterResult::new(InstructionResult::PrecompileError, Bytes::new(), gas)
            }
        };

        if let Some(checkpoint) = checkpoint {
            if result.result.is_ok() {
                context.journaled_state.checkpoint_commit();
            } else {
                context.journaled_state.checkpoint_revert(checkpoint);
            }
        }
        Some(CallOutcome::new(result, inputs.return_memory_offset.clone()))
    }

    fn call_end(
        &mut self,
        _context: &mut EvmContext<DB>,
        _inputs: &CallInputs,
        outcome: CallOutcome,
    ) -> CallOutcome {
        self.close_frame(outcome.result.result.is_ok());
        outcome
    }

    fn create(
        &mut self,
        _context: &mut EvmContext<DB>,
        _inputs: &mut CreateInputs,
    ) -> Option<CreateOutcome> {
        self.journal.open_frame();
        None
    }

    fn create_end(
        &mut self,
        _context: &mut EvmContext<DB>,
        _inputs: &CreateInputs,
        outcome: CreateOutcome,
    ) -> CreateOutcome {
        self.close_frame(outcome.result.result.is_ok());
        outcome
    }
}
