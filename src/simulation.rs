// src/simulation.rs
use ethers::abi::{decode, ParamType, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use ethers::utils::id;
use tracing::debug;

use crate::digest::packed_user_op_token;
use crate::error::UserOpError;
use crate::provider::ProviderLike;
use crate::revert::ErrorRegistry;
use crate::types::{PackedUserOperation, ValidityWindow};

pub const SIMULATE_VALIDATION_SIGNATURE: &str =
    "simulateValidation((address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes))";

/// Aggregator value reported when signature validation failed.
pub const SIG_VALIDATION_FAILED: u64 = 1;

/// `aggregator (20 bytes) | validUntil (6 bytes) | validAfter (6 bytes)`, packed in a uint256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationData {
    pub aggregator: Address,
    pub valid_after: u64,
    /// `u64::MAX` when the packed value is zero
    pub valid_until: u64,
}

impl ValidationData {
    pub fn parse(data: U256) -> Self {
        let mut word = [0u8; 32];
        data.to_big_endian(&mut word);
        let aggregator = Address::from_slice(&word[12..]);

        let mut buf = [0u8; 8];
        buf[2..].copy_from_slice(&word[6..12]);
        let mut valid_until = u64::from_be_bytes(buf);
        if valid_until == 0 {
            valid_until = u64::MAX;
        }

        let mut buf = [0u8; 8];
        buf[2..].copy_from_slice(&word[..6]);
        let valid_after = u64::from_be_bytes(buf);

        Self {
            aggregator,
            valid_after,
            valid_until,
        }
    }

    pub fn signature_valid(&self) -> bool {
        self.aggregator != Address::from_low_u64_be(SIG_VALIDATION_FAILED)
    }

    pub fn window(&self) -> ValidityWindow {
        ValidityWindow {
            valid_after: self.valid_after,
            valid_until: self.valid_until,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StakeInfo {
    pub stake: U256,
    pub unstake_delay_sec: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnInfo {
    pub pre_op_gas: U256,
    pub prefund: U256,
    pub account_validation_data: ValidationData,
    pub paymaster_validation_data: ValidationData,
    pub paymaster_context: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub return_info: ReturnInfo,
    pub sender_info: StakeInfo,
    pub factory_info: StakeInfo,
    pub paymaster_info: StakeInfo,
    pub aggregator: Address,
    pub aggregator_info: StakeInfo,
}

fn stake_info_type() -> ParamType {
    ParamType::Tuple(vec![ParamType::Uint(256), ParamType::Uint(256)])
}

fn validation_result_type() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Tuple(vec![
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Bytes,
        ]),
        stake_info_type(),
        stake_info_type(),
        stake_info_type(),
        ParamType::Tuple(vec![ParamType::Address, stake_info_type()]),
    ])
}

fn parse_stake_info(token: Token) -> Option<StakeInfo> {
    let mut fields = token.into_tuple()?.into_iter();
    Some(StakeInfo {
        stake: fields.next()?.into_uint()?,
        unstake_delay_sec: fields.next()?.into_uint()?,
    })
}

fn parse_validation_result(data: &[u8]) -> Option<ValidationResult> {
    let mut tokens = decode(&[validation_result_type()], data).ok()?;
    let mut fields = tokens.pop()?.into_tuple()?.into_iter();

    let mut return_info = fields.next()?.into_tuple()?.into_iter();
    let return_info = ReturnInfo {
        pre_op_gas: return_info.next()?.into_uint()?,
        prefund: return_info.next()?.into_uint()?,
        account_validation_data: ValidationData::parse(return_info.next()?.into_uint()?),
        paymaster_validation_data: ValidationData::parse(return_info.next()?.into_uint()?),
        paymaster_context: return_info.next()?.into_bytes()?.into(),
    };
    let sender_info = parse_stake_info(fields.next()?)?;
    let factory_info = parse_stake_info(fields.next()?)?;
    let paymaster_info = parse_stake_info(fields.next()?)?;
    let mut aggregator_info = fields.next()?.into_tuple()?.into_iter();
    let aggregator = aggregator_info.next()?.into_address()?;
    let aggregator_info = parse_stake_info(aggregator_info.next()?)?;

    Some(ValidationResult {
        return_info,
        sender_info,
        factory_info,
        paymaster_info,
        aggregator,
        aggregator_info,
    })
}

pub fn simulate_validation_calldata(op: &PackedUserOperation) -> Bytes {
    let mut data = id(SIMULATE_VALIDATION_SIGNATURE).to_vec();
    data.extend(ethers::abi::encode(&[packed_user_op_token(op)]));
    data.into()
}

/// Runs `simulateValidation` against the entry point with its code swapped for the
/// simulation contract's deployed bytecode.
pub async fn simulate_validation<P>(
    provider: &P,
    op: &PackedUserOperation,
    entry_point: Address,
    simulations_code: Bytes,
    registry: &ErrorRegistry,
) -> Result<ValidationResult, UserOpError>
where
    P: ProviderLike + ?Sized,
{
    let tx: TypedTransaction = TransactionRequest::new()
        .to(entry_point)
        .data(simulate_validation_calldata(op))
        .into();

    let ret = provider
        .call_with_code_override(&tx, entry_point, simulations_code)
        .await
        .map_err(|e| UserOpError::Provider(format!("{e:#}")))?;

    match ret {
        Ok(data) => parse_validation_result(&data).ok_or_else(|| {
            UserOpError::Simulation("malformed simulateValidation result".to_string())
        }),
        Err(revert_data) => {
            let reason = registry
                .decode_revert_reason(&revert_data, false)
                .unwrap_or_default();
            debug!("simulateValidation reverted for {:?}: {}", op.sender, reason);
            Err(UserOpError::Simulation(reason))
        }
    }
}
