use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CallContext, NativeContext, Precompile, PrecompileError};
use crate::config::GasSchedule;

sol! {
    /// Validator staking interface
    interface IStaking {
        /// Register the sender as a validator candidate, staking msg.value
        function createValidator(address rewardTo, bytes32 introduction, bytes32 pubkey) external payable;

        /// Update reward address and introduction, optionally adding stake
        function editValidator(address rewardTo, bytes32 introduction) external payable;

        /// Leave the validator set at the next epoch
        function retire() external;

        /// Vote to raise the chain's minimum gas price
        function increaseMinGasPrice() external;

        /// Vote to lower the chain's minimum gas price
        function decreaseMinGasPrice() external;
    }
}

/// A decoded staking request, queued for the validator manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StakingOp {
    CreateValidator {
        operator: Address,
        reward_to: Address,
        introduction: B256,
        pubkey: B256,
        staked: U256,
    },
    EditValidator {
        operator: Address,
        reward_to: Address,
        introduction: B256,
        staked: U256,
    },
    Retire {
        operator: Address,
    },
    IncreaseMinGasPrice {
        operator: Address,
    },
    DecreaseMinGasPrice {
        operator: Address,
    },
}

impl StakingOp {
    pub fn operator(&self) -> Address {
        match self {
            Self::CreateValidator { operator, .. }
            | Self::EditValidator { operator, .. }
            | Self::Retire { operator }
            | Self::IncreaseMinGasPrice { operator }
            | Self::DecreaseMinGasPrice { operator } => *operator,
        }
    }
}

/// Decodes staking calls; the validator lifecycle itself lives elsewhere
pub struct StakingPrecompile;

impl StakingPrecompile {
    fn decode(&self, input: &[u8], ctx: &CallContext) -> Result<StakingOp, PrecompileError> {
        let operator = ctx.owner;
        let selector: [u8; 4] = input
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| PrecompileError::failure("input shorter than a selector"))?;

        let op = match selector {
            sel if sel == IStaking::createValidatorCall::SELECTOR => {
                let call = IStaking::createValidatorCall::abi_decode(input, true)?;
                if call.pubkey.is_zero() {
                    return Err(PrecompileError::failure("empty validator pubkey"));
                }
                StakingOp::CreateValidator {
                    operator,
                    reward_to: call.rewardTo,
                    introduction: call.introduction,
                    pubkey: call.pubkey,
                    staked: ctx.value,
                }
            }
            sel if sel == IStaking::editValidatorCall::SELECTOR => {
                let call = IStaking::editValidatorCall::abi_decode(input, true)?;
                StakingOp::EditValidator {
                    operator,
                    reward_to: call.rewardTo,
                    introduction: call.introduction,
                    staked: ctx.value,
                }
            }
            sel if sel == IStaking::retireCall::SELECTOR => {
                IStaking::retireCall::abi_decode(input, true)?;
                StakingOp::Retire { operator }
            }
            sel if sel == IStaking::increaseMinGasPriceCall::SELECTOR => {
                IStaking::increaseMinGasPriceCall::abi_decode(input, true)?;
                StakingOp::IncreaseMinGasPrice { operator }
            }
            sel if sel == IStaking::decreaseMinGasPriceCall::SELECTOR => {
                IStaking::decreaseMinGasPriceCall::abi_decode(input, true)?;
                StakingOp::DecreaseMinGasPrice { operator }
            }
            sel => {
                return Err(PrecompileError::failure(format!(
                    "unknown selector 0x{}",
                    hex::encode(sel)
                )))
            }
        };

        let payable = matches!(
            op,
            StakingOp::CreateValidator { .. } | StakingOp::EditValidator { .. }
        );
        if !payable && !ctx.value.is_zero() {
            return Err(PrecompileError::failure("staking operation is not payable"));
        }
        Ok(op)
    }
}

impl Precompile for StakingPrecompile {
    fn name(&self) -> &'static str {
        "staking"
    }

    fn required_gas(&self, _input: &[u8], gas: &GasSchedule) -> u64 {
        gas.staking_op
    }

    fn call(
        &self,
        input: &[u8],
        ctx: &CallContext,
        native: &mut NativeContext<'_>,
    ) -> Result<Bytes, PrecompileError> {
        if ctx.delegated {
            return Err(PrecompileError::failure("staking must be called directly"));
        }
        if ctx.is_static {
            return Err(PrecompileError::failure("staking in static context"));
        }

        let op = self.decode(input, ctx)?;
        debug!(operator = %op.operator(), ?op, "staking operation queued");
        native.push_staking_op(op)?;
        Ok(Bytes::new())
    }
}
