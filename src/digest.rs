// src/digest.rs
//! ABI encodings and hashes of a user operation.
//!
//! The hash scheme is the entry point v0.7 one: the inner digest is
//! `keccak256(abi.encode(sender, nonce, keccak(initCode), keccak(callData),
//! accountGasLimits, preVerificationGas, gasFees, keccak(paymasterAndData)))`, and the operation
//! hash is `keccak256(abi.encode(innerDigest, entryPoint, chainId))`. The packed
//! `abi.encodePacked` variant of the domain tuple is not supported.

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;

use crate::error::EncodingError;
use crate::packing::pack_user_op;
use crate::types::{PackedUserOperation, UserOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// Dynamic fields hashed, signature omitted. Input of the operation hash.
    ForSignature,
    /// Dynamic fields and signature embedded raw, for call-data gas estimation.
    ForGasEstimate,
}

pub fn encode_packed_user_op(op: &PackedUserOperation, mode: EncodeMode) -> Bytes {
    let tokens = match mode {
        EncodeMode::ForSignature => vec![
            Token::Address(op.sender),
            Token::Uint(op.nonce),
            Token::FixedBytes(keccak256(&op.init_code).to_vec()),
            Token::FixedBytes(keccak256(&op.call_data).to_vec()),
            Token::FixedBytes(op.account_gas_limits.as_bytes().to_vec()),
            Token::Uint(op.pre_verification_gas),
            Token::FixedBytes(op.gas_fees.as_bytes().to_vec()),
            Token::FixedBytes(keccak256(&op.paymaster_and_data).to_vec()),
        ],
        EncodeMode::ForGasEstimate => vec![
            Token::Address(op.sender),
            Token::Uint(op.nonce),
            Token::Bytes(op.init_code.to_vec()),
            Token::Bytes(op.call_data.to_vec()),
            Token::FixedBytes(op.account_gas_limits.as_bytes().to_vec()),
            Token::Uint(op.pre_verification_gas),
            Token::FixedBytes(op.gas_fees.as_bytes().to_vec()),
            Token::Bytes(op.paymaster_and_data.to_vec()),
            Token::Bytes(op.signature.to_vec()),
        ],
    };

    encode(&tokens).into()
}

/// Packs the operation, then encodes it in the given mode.
pub fn encode_user_op(op: &UserOperation, mode: EncodeMode) -> Result<Bytes, EncodingError> {
    let packed = pack_user_op(op)?;
    Ok(encode_packed_user_op(&packed, mode))
}

/// `keccak256(abi.encode(digest, entryPoint, chainId))`
pub fn domain_hash(digest: H256, entry_point: Address, chain_id: U256) -> H256 {
    keccak256(encode(&[
        Token::FixedBytes(digest.as_bytes().to_vec()),
        Token::Address(entry_point),
        Token::Uint(chain_id),
    ]))
    .into()
}

pub fn packed_user_op_hash(op: &PackedUserOperation, entry_point: Address, chain_id: U256) -> H256 {
    let inner = keccak256(encode_packed_user_op(op, EncodeMode::ForSignature));
    domain_hash(inner.into(), entry_point, chain_id)
}

pub fn user_op_hash(
    op: &UserOperation,
    entry_point: Address,
    chain_id: U256,
) -> Result<H256, EncodingError> {
    let packed = pack_user_op(op)?;
    Ok(packed_user_op_hash(&packed, entry_point, chain_id))
}

/// ABI token of the packed operation as a tuple, the way contracts take it as an argument.
pub fn packed_user_op_token(op: &PackedUserOperation) -> Token {
    Token::Tuple(vec![
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::Bytes(op.init_code.to_vec()),
        Token::Bytes(op.call_data.to_vec()),
        Token::FixedBytes(op.account_gas_limits.as_bytes().to_vec()),
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(op.gas_fees.as_bytes().to_vec()),
        Token::Bytes(op.paymaster_and_data.to_vec()),
        Token::Bytes(op.signature.to_vec()),
    ])
}
