// src/packing.rs
use ethers::types::{Address, Bytes, H256, U256};

use crate::codec::{concat, encode_fixed_width};
use crate::error::EncodingError;
use crate::types::{PackedUserOperation, UserOperation};

const GAS_FIELD_WIDTH: usize = 16;

fn pack_u128_pair(high: U256, low: U256) -> Result<H256, EncodingError> {
    let packed = concat([
        encode_fixed_width(high, GAS_FIELD_WIDTH)?,
        encode_fixed_width(low, GAS_FIELD_WIDTH)?,
    ]);
    Ok(H256::from_slice(&packed))
}

/// `accountGasLimits`: verification gas limit in the high half, call gas limit in the low half.
pub fn pack_gas_limits(
    verification_gas_limit: U256,
    call_gas_limit: U256,
) -> Result<H256, EncodingError> {
    pack_u128_pair(verification_gas_limit, call_gas_limit)
}

/// `gasFees`: priority fee in the high half, max fee in the low half.
pub fn pack_fees(
    max_priority_fee_per_gas: U256,
    max_fee_per_gas: U256,
) -> Result<H256, EncodingError> {
    pack_u128_pair(max_priority_fee_per_gas, max_fee_per_gas)
}

/// Splits a packed pair back into its (high, low) halves.
pub fn unpack_u128_pair(packed: H256) -> (U256, U256) {
    let bytes = packed.as_bytes();
    (
        U256::from_big_endian(&bytes[..GAS_FIELD_WIDTH]),
        U256::from_big_endian(&bytes[GAS_FIELD_WIDTH..]),
    )
}

/// `paymasterAndData`: paymaster ‖ verification gas ‖ post-op gas ‖ context.
///
/// Empty when the paymaster is the zero address.
pub fn pack_paymaster_data(
    paymaster: Address,
    paymaster_verification_gas_limit: U256,
    paymaster_post_op_gas_limit: U256,
    paymaster_data: &[u8],
) -> Result<Bytes, EncodingError> {
    if paymaster.is_zero() {
        return Ok(Bytes::new());
    }

    Ok(concat([
        paymaster.as_bytes().to_vec(),
        encode_fixed_width(paymaster_verification_gas_limit, GAS_FIELD_WIDTH)?,
        encode_fixed_width(paymaster_post_op_gas_limit, GAS_FIELD_WIDTH)?,
        paymaster_data.to_vec(),
    ]))
}

pub fn pack_user_op(op: &UserOperation) -> Result<PackedUserOperation, EncodingError> {
    // verificationGasLimit | callGasLimit, then maxPriorityFeePerGas | maxFeePerGas
    let account_gas_limits = pack_gas_limits(op.verification_gas_limit, op.call_gas_limit)?;
    let gas_fees = pack_fees(op.max_priority_fee_per_gas, op.max_fee_per_gas)?;
    // empty when there is no paymaster
    let paymaster_and_data = pack_paymaster_data(
        op.paymaster,
        op.paymaster_verification_gas_limit,
        op.paymaster_post_op_gas_limit,
        &op.paymaster_data,
    )?;

    Ok(PackedUserOperation {
        sender: op.sender,
        nonce: op.nonce,
        init_code: op.init_code.clone(),
        call_data: op.call_data.clone(),
        account_gas_limits,
        pre_verification_gas: op.pre_verification_gas,
        gas_fees,
        paymaster_and_data,
        signature: op.signature.clone(),
    })
}

impl TryFrom<&UserOperation> for PackedUserOperation {
    type Error = EncodingError;

    fn try_from(op: &UserOperation) -> Result<Self, Self::Error> {
        pack_user_op(op)
    }
}
