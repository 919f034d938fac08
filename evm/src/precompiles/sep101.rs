use alloy_primitives::Bytes;
use alloy_sol_types::{sol, SolCall};
use tracing::trace;

use super::{CallContext, NativeContext, Precompile, PrecompileError};
use crate::config::GasSchedule;
use crate::extstore::{check_key, check_value};

sol! {
    /// SEP101 extended key/value storage
    interface ISep101 {
        /// Replace the caller's entry under `key`
        function set(bytes key, bytes value) external;

        /// Read the caller's entry; empty if never written
        function get(bytes key) external returns (bytes value);
    }
}

/// Native key/value storage namespaced by the calling contract
pub struct Sep101Precompile;

impl Sep101Precompile {
    fn set(
        &self,
        input: &[u8],
        ctx: &CallContext,
        native: &mut NativeContext<'_>,
    ) -> Result<Bytes, PrecompileError> {
        if ctx.is_static {
            return Err(PrecompileError::failure("set in static context"));
        }
        let call = ISep101::setCall::abi_decode(input, true)?;
        check_key(&call.key)?;
        check_value(&call.value)?;

        trace!(
            owner = %ctx.owner,
            key_len = call.key.len(),
            value_len = call.value.len(),
            "sep101 set"
        );
        native.ext_put(ctx.owner, call.key.to_vec(), call.value.to_vec())?;
        Ok(Bytes::new())
    }

    fn get(
        &self,
        input: &[u8],
        ctx: &CallContext,
        native: &mut NativeContext<'_>,
    ) -> Result<Bytes, PrecompileError> {
        let call = ISep101::getCall::abi_decode(input, true)?;
        check_key(&call.key)?;

        // Absent and stored-empty read the same from the contract side
        let value = native.ext_get(&ctx.owner, &call.key)?.unwrap_or_default();
        trace!(owner = %ctx.owner, value_len = value.len(), "sep101 get");
        Ok(ISep101::getCall::abi_encode_returns(&(Bytes::from(value),)).into())
    }
}

impl Precompile for Sep101Precompile {
    fn name(&self) -> &'static str {
        "sep101"
    }

    fn required_gas(&self, input: &[u8], gas: &GasSchedule) -> u64 {
        match selector(input) {
            Some(sel) if sel == ISep101::setCall::SELECTOR => {
                match ISep101::setCall::abi_decode(input, true) {
                    Ok(call) => gas.sep101_set(call.key.len(), call.value.len()),
                    // Undecodable; charged the flat base and fails in `call`
                    Err(_) => gas.sep101_set_base,
                }
            }
            _ => gas.sep101_get,
        }
    }

    fn call(
        &self,
        input: &[u8],
        ctx: &CallContext,
        native: &mut NativeContext<'_>,
    ) -> Result<Bytes, PrecompileError> {
        if !ctx.value.is_zero() {
            return Err(PrecompileError::failure("sep101 is not payable"));
        }
        match selector(input) {
            Some(sel) if sel == ISep101::setCall::SELECTOR => self.set(input, ctx, native),
            Some(sel) if sel == ISep101::getCall::SELECTOR => self.get(input, ctx, native),
            Some(sel) => Err(PrecompileError::failure(format!(
                "unknown selector 0x{}",
                hex::encode(sel)
            ))),
            None => Err(PrecompileError::failure("input shorter than a selector")),
        }
    }
}

fn selector(input: &[u8]) -> Option<[u8; 4]> {
    input.get(..4)?.try_into().ok()
}
