// src/paymaster.rs
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use ethers::abi::{decode, ParamType, Token};
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::id;
#[cfg(test)]
use mockall::automock;

use crate::codec::{concat, encode_fixed_width};
use crate::digest::packed_user_op_token;
use crate::error::EncodingError;
use crate::types::{PackedUserOperation, ValidityWindow};

const TIMESTAMP_WIDTH: usize = 6;
const MAX_TIMESTAMP: u64 = (1 << 48) - 1;
const ONE_YEAR_SECS: u64 = 60 * 60 * 24 * 365;

pub const GET_HASH_SIGNATURE: &str =
    "getHash((address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes),uint48,uint48)";

impl ValidityWindow {
    /// A window open from one year ago until one year from `now`.
    pub fn around(now: u64) -> Self {
        Self {
            valid_after: now.saturating_sub(ONE_YEAR_SECS),
            valid_until: now.saturating_add(ONE_YEAR_SECS),
        }
    }

    pub fn from_system_time() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::around(now)
    }

    /// `validUntil (6 bytes) ‖ validAfter (6 bytes)`
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        Ok(concat([
            encode_timestamp(self.valid_until)?,
            encode_timestamp(self.valid_after)?,
        ])
        .to_vec())
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 2 * TIMESTAMP_WIDTH {
            return None;
        }
        Some(Self {
            valid_until: read_timestamp(&data[..TIMESTAMP_WIDTH]),
            valid_after: read_timestamp(&data[TIMESTAMP_WIDTH..2 * TIMESTAMP_WIDTH]),
        })
    }
}

fn encode_timestamp(ts: u64) -> Result<Vec<u8>, EncodingError> {
    if ts > MAX_TIMESTAMP {
        return Err(EncodingError::TimestampOverflow(ts));
    }
    encode_fixed_width(ts.into(), TIMESTAMP_WIDTH)
}

fn read_timestamp(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

/// Paymaster context carrying the validity window and the address expected to sign it.
pub fn paymaster_context(window: &ValidityWindow, signer: Address) -> Result<Bytes, EncodingError> {
    Ok(concat([window.encode()?, signer.as_bytes().to_vec()]))
}

/// A deployed paymaster contract that decides which digest must be signed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PaymasterLike: Send + Sync {
    async fn get_hash(
        &self,
        paymaster: Address,
        op: &PackedUserOperation,
        window: ValidityWindow,
    ) -> anyhow::Result<H256>;
}

pub fn get_hash_calldata(op: &PackedUserOperation, window: ValidityWindow) -> Bytes {
    let mut data = id(GET_HASH_SIGNATURE).to_vec();
    data.extend(ethers::abi::encode(&[
        packed_user_op_token(op),
        Token::Uint(window.valid_until.into()),
        Token::Uint(window.valid_after.into()),
    ]));
    data.into()
}

#[async_trait]
impl<M> PaymasterLike for M
where
    M: Middleware + 'static,
    M::Error: 'static,
{
    async fn get_hash(
        &self,
        paymaster: Address,
        op: &PackedUserOperation,
        window: ValidityWindow,
    ) -> anyhow::Result<H256> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(paymaster)
            .data(get_hash_calldata(op, window))
            .into();
        let ret = self
            .call(&tx, None)
            .await
            .context("paymaster should compute user operation digest")?;
        let tokens =
            decode(&[ParamType::FixedBytes(32)], &ret).context("paymaster should return bytes32")?;
        match tokens.into_iter().next() {
            Some(Token::FixedBytes(bytes)) if bytes.len() == 32 => Ok(H256::from_slice(&bytes)),
            _ => anyhow::bail!("paymaster returned malformed digest"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_encoding_layout() {
        let window = ValidityWindow {
            valid_after: 0x0102,
            valid_until: 0xffff_ffff_ffff,
        };
        let encoded = window.encode().unwrap();
        assert_eq!(encoded.len(), 12);
        assert_eq!(&encoded[..6], &[0xff; 6]);
        assert_eq!(&encoded[6..], &[0, 0, 0, 0, 1, 2]);
        assert_eq!(ValidityWindow::decode(&encoded), Some(window));
    }

    #[test]
    fn test_window_rejects_wide_timestamps() {
        let window = ValidityWindow {
            valid_after: 0,
            valid_until: 1 << 48,
        };
        assert_eq!(
            window.encode(),
            Err(EncodingError::TimestampOverflow(1 << 48))
        );
    }

    #[test]
    fn test_inverted_window_still_encodes() {
        let window = ValidityWindow {
            valid_after: 200,
            valid_until: 100,
        };
        assert!(window.encode().is_ok());
    }

    #[test]
    fn test_window_around_now() {
        let window = ValidityWindow::around(10 * ONE_YEAR_SECS);
        assert_eq!(window.valid_after, 9 * ONE_YEAR_SECS);
        assert_eq!(window.valid_until, 11 * ONE_YEAR_SECS);
    }

    #[test]
    fn test_paymaster_context() {
        let signer = Address::repeat_byte(0x22);
        let window = ValidityWindow {
            valid_after: 1,
            valid_until: 2,
        };
        let context = paymaster_context(&window, signer).unwrap();
        assert_eq!(context.len(), 32);
        assert_eq!(&context[12..], signer.as_bytes());
    }

    #[test]
    fn test_get_hash_calldata() {
        let data = get_hash_calldata(&PackedUserOperation::default(), ValidityWindow::around(0));
        assert_eq!(&data[..4], &id(GET_HASH_SIGNATURE));
        // tuple offset, validUntil, validAfter
        assert_eq!(U256::from_big_endian(&data[4..36]), U256::from(96));
        assert_eq!(U256::from_big_endian(&data[36..68]), U256::from(ONE_YEAR_SECS));
        assert_eq!(U256::from_big_endian(&data[68..100]), U256::zero());
    }
}
