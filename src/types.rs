// src/types.rs
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

pub const DEFAULT_VERIFICATION_GAS_LIMIT: u64 = 300_000;
pub const DEFAULT_PRE_VERIFICATION_GAS: u64 = 21_000;
pub const DEFAULT_MAX_PRIORITY_FEE_PER_GAS: u64 = 1_000_000_000;
pub const DEFAULT_PAYMASTER_VERIFICATION_GAS_LIMIT: u64 = 300_000;
pub const DEFAULT_PAYMASTER_POST_OP_GAS_LIMIT: u64 = 0;

/// Expanded user operation, one field per column.
///
/// Gas limits and fees are carried as `U256` but must fit in 16 bytes once packed.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    /// Zero address when no paymaster sponsors the operation
    pub paymaster: Address,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
    pub paymaster_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// The record unset fields are filled from.
    pub fn defaults() -> Self {
        Self {
            verification_gas_limit: DEFAULT_VERIFICATION_GAS_LIMIT.into(),
            pre_verification_gas: DEFAULT_PRE_VERIFICATION_GAS.into(),
            max_priority_fee_per_gas: DEFAULT_MAX_PRIORITY_FEE_PER_GAS.into(),
            paymaster_verification_gas_limit: DEFAULT_PAYMASTER_VERIFICATION_GAS_LIMIT.into(),
            paymaster_post_op_gas_limit: DEFAULT_PAYMASTER_POST_OP_GAS_LIMIT.into(),
            ..Default::default()
        }
    }

    pub fn has_paymaster(&self) -> bool {
        !self.paymaster.is_zero()
    }
}

/// Operation under construction. `None` fields are resolved by the fill step.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialUserOperation {
    pub sender: Option<Address>,
    pub nonce: Option<U256>,
    pub init_code: Option<Bytes>,
    pub call_data: Option<Bytes>,
    pub call_gas_limit: Option<U256>,
    pub verification_gas_limit: Option<U256>,
    pub pre_verification_gas: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub paymaster: Option<Address>,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
    pub paymaster_data: Option<Bytes>,
    pub signature: Option<Bytes>,
}

/// On-chain shape of a user operation.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    /// verificationGasLimit (16 bytes) ‖ callGasLimit (16 bytes)
    pub account_gas_limits: H256,
    pub pre_verification_gas: U256,
    /// maxPriorityFeePerGas (16 bytes) ‖ maxFeePerGas (16 bytes)
    pub gas_fees: H256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

/// Seconds-since-epoch bounds of a paymaster sponsorship. Each bound is a uint48.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidityWindow {
    pub valid_after: u64,
    pub valid_until: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillAndSignResult {
    pub user_op: UserOperation,
    pub signature: Bytes,
    /// Digest returned by the paymaster
    pub user_op_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillSignPackResult {
    pub user_op: PackedUserOperation,
    pub signature: Bytes,
    pub user_op_hash: H256,
}
