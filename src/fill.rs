// src/fill.rs
use std::sync::Arc;

use ethers::abi::{decode, ParamType, Token};
use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use ethers::utils::id;
use tracing::{debug, info, warn};

use crate::digest::domain_hash;
use crate::error::{EncodingError, UserOpError};
use crate::packing::pack_user_op;
use crate::paymaster::PaymasterLike;
use crate::provider::ProviderLike;
use crate::types::{
    FillAndSignResult, FillSignPackResult, PartialUserOperation, UserOperation, ValidityWindow,
    DEFAULT_VERIFICATION_GAS_LIMIT,
};

pub const DEFAULT_NONCE_FUNCTION: &str = "getNonce";
const INIT_CODE_GAS_CAP: u64 = 10_000_000;

/// Merges `op` over `defaults`, field by field.
pub fn fill_user_op_defaults(op: PartialUserOperation, defaults: &UserOperation) -> UserOperation {
    let defaults = defaults.clone();
    UserOperation {
        sender: op.sender.unwrap_or(defaults.sender),
        nonce: op.nonce.unwrap_or(defaults.nonce),
        init_code: op.init_code.unwrap_or(defaults.init_code),
        call_data: op.call_data.unwrap_or(defaults.call_data),
        call_gas_limit: op.call_gas_limit.unwrap_or(defaults.call_gas_limit),
        verification_gas_limit: op
            .verification_gas_limit
            .unwrap_or(defaults.verification_gas_limit),
        pre_verification_gas: op
            .pre_verification_gas
            .unwrap_or(defaults.pre_verification_gas),
        max_fee_per_gas: op.max_fee_per_gas.unwrap_or(defaults.max_fee_per_gas),
        max_priority_fee_per_gas: op
            .max_priority_fee_per_gas
            .unwrap_or(defaults.max_priority_fee_per_gas),
        paymaster: op.paymaster.unwrap_or(defaults.paymaster),
        paymaster_verification_gas_limit: op
            .paymaster_verification_gas_limit
            .unwrap_or(defaults.paymaster_verification_gas_limit),
        paymaster_post_op_gas_limit: op
            .paymaster_post_op_gas_limit
            .unwrap_or(defaults.paymaster_post_op_gas_limit),
        paymaster_data: op.paymaster_data.unwrap_or(defaults.paymaster_data),
        signature: op.signature.unwrap_or(defaults.signature),
    }
}

fn require<'a, P: ?Sized>(provider: Option<&'a P>) -> Result<&'a P, UserOpError> {
    provider.ok_or(UserOpError::Dependency("provider"))
}

fn provider_error(e: anyhow::Error) -> UserOpError {
    UserOpError::Provider(format!("{e:#}"))
}

/// Resolves every unset field, querying the provider where a static default is not enough.
pub async fn fill_user_op<P>(
    op: PartialUserOperation,
    provider: Option<&P>,
    entry_point: Option<Address>,
    nonce_function: &str,
) -> Result<UserOperation, UserOpError>
where
    P: ProviderLike + ?Sized,
{
    let mut op = op;

    if let Some(init_code) = op.init_code.clone().filter(|c| !c.is_empty()) {
        if init_code.len() < 20 {
            return Err(EncodingError::InitCodeTooShort(init_code.len()).into());
        }
        if op.nonce.is_none() {
            op.nonce = Some(U256::zero());
        }
        if op.verification_gas_limit.is_none() {
            let provider = require(provider)?;
            let factory = Address::from_slice(&init_code[..20]);
            let mut request = TransactionRequest::new()
                .to(factory)
                .data(Bytes::from(init_code[20..].to_vec()))
                .gas(INIT_CODE_GAS_CAP);
            if let Some(entry_point) = entry_point {
                request = request.from(entry_point);
            }
            let estimate = provider
                .estimate_gas(&request.into())
                .await
                .map_err(provider_error)?;
            debug!("Estimated init code gas {} for factory {:?}", estimate, factory);
            op.verification_gas_limit =
                Some(U256::from(DEFAULT_VERIFICATION_GAS_LIMIT) + estimate);
        }
    }

    if op.nonce.is_none() {
        let provider = require(provider)?;
        let sender = op.sender.unwrap_or_default();
        op.nonce = Some(get_nonce(provider, sender, nonce_function).await);
    }

    if op.max_fee_per_gas.is_none() {
        let provider = require(provider)?;
        let base_fee = provider
            .latest_base_fee()
            .await
            .map_err(provider_error)?;
        op.max_fee_per_gas = Some(
            base_fee.unwrap_or_else(|| UserOperation::defaults().max_priority_fee_per_gas),
        );
    }

    let filled = fill_user_op_defaults(op, &UserOperation::defaults());
    debug!(
        "Filled user operation for {:?} with nonce {}",
        filled.sender, filled.nonce
    );
    Ok(filled)
}

/// Reads `<nonce_function>() returns (uint256)` from the account, falling back to zero.
async fn get_nonce<P>(provider: &P, sender: Address, nonce_function: &str) -> U256
where
    P: ProviderLike + ?Sized,
{
    let tx: TypedTransaction = TransactionRequest::new()
        .to(sender)
        .data(Bytes::from(id(format!("{nonce_function}()")).to_vec()))
        .into();

    let nonce = match provider.call(&tx).await {
        Ok(ret) => decode(&[ParamType::Uint(256)], &ret).ok().and_then(|tokens| {
            match tokens.into_iter().next() {
                Some(Token::Uint(nonce)) => Some(nonce),
                _ => None,
            }
        }),
        Err(e) => {
            warn!("Nonce lookup on {:?} failed: {:#}", sender, e);
            None
        }
    };
    nonce.unwrap_or_default()
}

/// Fills, has the paymaster compute the digest, and signs user operations.
pub struct UserOpSigner<P: ?Sized, PM: ?Sized, S> {
    provider: Option<Arc<P>>,
    paymaster: Arc<PM>,
    signer: S,
    entry_point: Address,
    nonce_function: String,
}

impl<P, PM, S> UserOpSigner<P, PM, S>
where
    P: ProviderLike + ?Sized,
    PM: PaymasterLike + ?Sized,
    S: Signer,
    S::Error: 'static,
{
    pub fn new(
        provider: Option<Arc<P>>,
        paymaster: Arc<PM>,
        signer: S,
        entry_point: Address,
    ) -> Self {
        Self {
            provider,
            paymaster,
            signer,
            entry_point,
            nonce_function: DEFAULT_NONCE_FUNCTION.to_string(),
        }
    }

    pub fn with_nonce_function(mut self, nonce_function: impl Into<String>) -> Self {
        self.nonce_function = nonce_function.into();
        self
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub async fn fill_user_op(
        &self,
        op: PartialUserOperation,
    ) -> Result<UserOperation, UserOpError> {
        fill_user_op(
            op,
            self.provider.as_deref(),
            Some(self.entry_point),
            &self.nonce_function,
        )
        .await
    }

    pub async fn fill_and_sign(
        &self,
        op: PartialUserOperation,
        valid_until: Option<u64>,
        valid_after: Option<u64>,
    ) -> Result<FillAndSignResult, UserOpError> {
        // 1. Resolve the validity window, both bounds must fit in uint48
        let default_window = ValidityWindow::from_system_time();
        let window = ValidityWindow {
            valid_until: valid_until.unwrap_or(default_window.valid_until),
            valid_after: valid_after.unwrap_or(default_window.valid_after),
        };
        window.encode()?;

        // 2. Fill the operation from the chain
        let user_op = self.fill_user_op(op).await?;
        if !user_op.has_paymaster() {
            return Err(UserOpError::Dependency("paymaster"));
        }
        let provider = require(self.provider.as_deref())?;
        let chain_id = provider.chain_id().await.map_err(provider_error)?;
        let packed = pack_user_op(&user_op)?;

        // 3. Get the paymaster digest and sign it bound to the entry point and chain
        let user_op_hash = self
            .paymaster
            .get_hash(user_op.paymaster, &packed, window)
            .await
            .map_err(|e| UserOpError::signing("Failed to sign message: paymaster digest", e))?;
        let message_hash = domain_hash(user_op_hash, self.entry_point, chain_id);
        let signature = self
            .signer
            .sign_message(message_hash.as_bytes())
            .await
            .map_err(|e| UserOpError::signing("Failed to sign message: signer", e))?;
        let signature = Bytes::from(signature.to_vec());

        info!(
            "Signed user operation for {:?} with paymaster digest {:?}",
            user_op.sender, user_op_hash
        );

        Ok(FillAndSignResult {
            user_op: UserOperation {
                signature: signature.clone(),
                ..user_op
            },
            signature,
            user_op_hash,
        })
    }

    pub async fn fill_sign_and_pack(
        &self,
        op: PartialUserOperation,
        valid_until: Option<u64>,
        valid_after: Option<u64>,
    ) -> Result<FillSignPackResult, UserOpError> {
        let signed = self.fill_and_sign(op, valid_until, valid_after).await?;
        Ok(FillSignPackResult {
            user_op: pack_user_op(&signed.user_op)?,
            signature: signed.signature,
            user_op_hash: signed.user_op_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use ethers::abi::encode;
    use ethers::signers::LocalWallet;
    use ethers::types::{NameOrAddress, RecoveryMessage, Signature, H256};
    use mockall::predicate::{always, eq};

    use super::*;
    use crate::paymaster::MockPaymasterLike;
    use crate::provider::MockProviderLike;
    use crate::types::DEFAULT_MAX_PRIORITY_FEE_PER_GAS;

    const CHAIN_ID: u64 = 1337;

    fn wallet() -> LocalWallet {
        let mut key = [0u8; 32];
        key[31] = 1;
        LocalWallet::from_bytes(&key).unwrap()
    }

    fn uint_return(value: u64) -> Bytes {
        encode(&[Token::Uint(value.into())]).into()
    }

    fn entry_point() -> Address {
        Address::repeat_byte(0xee)
    }

    fn paymaster() -> Address {
        Address::repeat_byte(0x33)
    }

    fn partial() -> PartialUserOperation {
        PartialUserOperation {
            sender: Some(Address::repeat_byte(0x11)),
            paymaster: Some(paymaster()),
            ..Default::default()
        }
    }

    fn provider_with_chain() -> MockProviderLike {
        let mut provider = MockProviderLike::new();
        provider.expect_call().returning(|_| Ok(uint_return(5)));
        provider
            .expect_latest_base_fee()
            .returning(|| Ok(Some(U256::from(7))));
        provider
            .expect_chain_id()
            .returning(|| Ok(U256::from(CHAIN_ID)));
        provider
    }

    #[test]
    fn test_fill_defaults_keeps_set_fields() {
        let op = PartialUserOperation {
            nonce: Some(9.into()),
            call_gas_limit: Some(123.into()),
            ..Default::default()
        };
        let filled = fill_user_op_defaults(op, &UserOperation::defaults());
        assert_eq!(filled.nonce, U256::from(9));
        assert_eq!(filled.call_gas_limit, U256::from(123));
        assert_eq!(filled.verification_gas_limit, U256::from(300_000));
        assert_eq!(filled.pre_verification_gas, U256::from(21_000));
        assert_eq!(
            filled.max_priority_fee_per_gas,
            U256::from(DEFAULT_MAX_PRIORITY_FEE_PER_GAS)
        );
        assert!(filled.paymaster.is_zero());
    }

    #[tokio::test]
    async fn test_fill_without_provider_fails() {
        let err = fill_user_op::<MockProviderLike>(partial(), None, None, DEFAULT_NONCE_FUNCTION)
            .await
            .unwrap_err();
        assert!(matches!(err, UserOpError::Dependency("provider")));
    }

    #[tokio::test]
    async fn test_fill_without_provider_when_nothing_to_query() {
        let op = PartialUserOperation {
            nonce: Some(1.into()),
            max_fee_per_gas: Some(2.into()),
            ..partial()
        };
        let filled = fill_user_op::<MockProviderLike>(op, None, None, DEFAULT_NONCE_FUNCTION)
            .await
            .unwrap();
        assert_eq!(filled.nonce, U256::from(1));
        assert_eq!(filled.max_fee_per_gas, U256::from(2));
    }

    #[tokio::test]
    async fn test_fill_queries_nonce_and_base_fee() {
        let mut provider = MockProviderLike::new();
        let sender = Address::repeat_byte(0x11);
        provider
            .expect_call()
            .withf(move |tx| {
                tx.to() == Some(&NameOrAddress::Address(sender))
                    && tx.data().map(|d| d.to_vec()) == Some(id("getNonce()").to_vec())
            })
            .times(1)
            .returning(|_| Ok(uint_return(5)));
        provider
            .expect_latest_base_fee()
            .times(1)
            .returning(|| Ok(Some(U256::from(7))));

        let filled = fill_user_op(partial(), Some(&provider), None, DEFAULT_NONCE_FUNCTION)
            .await
            .unwrap();
        assert_eq!(filled.nonce, U256::from(5));
        assert_eq!(filled.max_fee_per_gas, U256::from(7));
        assert_eq!(filled.paymaster, paymaster());
        assert_eq!(filled.paymaster_verification_gas_limit, U256::from(300_000));
    }

    #[tokio::test]
    async fn test_fill_falls_back_when_queries_return_nothing() {
        let mut provider = MockProviderLike::new();
        provider
            .expect_call()
            .returning(|_| Err(anyhow::anyhow!("execution reverted")));
        provider.expect_latest_base_fee().returning(|| Ok(None));

        let filled = fill_user_op(partial(), Some(&provider), None, "nonce")
            .await
            .unwrap();
        assert_eq!(filled.nonce, U256::zero());
        assert_eq!(
            filled.max_fee_per_gas,
            U256::from(DEFAULT_MAX_PRIORITY_FEE_PER_GAS)
        );
    }

    #[tokio::test]
    async fn test_fill_estimates_init_code() {
        let factory = Address::repeat_byte(0xfa);
        let mut init_code = factory.as_bytes().to_vec();
        init_code.extend_from_slice(&[1, 2, 3, 4]);

        let mut provider = MockProviderLike::new();
        provider
            .expect_estimate_gas()
            .withf(move |tx| {
                tx.to() == Some(&NameOrAddress::Address(factory))
                    && tx.from() == Some(&entry_point())
                    && tx.data().map(|d| d.to_vec()) == Some(vec![1, 2, 3, 4])
            })
            .times(1)
            .returning(|_| Ok(U256::from(50_000)));
        provider.expect_call().never();
        provider
            .expect_latest_base_fee()
            .returning(|| Ok(Some(U256::from(7))));

        let op = PartialUserOperation {
            init_code: Some(init_code.into()),
            ..partial()
        };
        let filled = fill_user_op(op, Some(&provider), Some(entry_point()), "getNonce")
            .await
            .unwrap();
        assert_eq!(filled.nonce, U256::zero());
        assert_eq!(filled.verification_gas_limit, U256::from(350_000));
    }

    #[tokio::test]
    async fn test_fill_rejects_short_init_code() {
        let op = PartialUserOperation {
            init_code: Some(vec![1u8; 19].into()),
            ..partial()
        };
        let err = fill_user_op::<MockProviderLike>(op, None, None, "getNonce")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UserOpError::Encoding(EncodingError::InitCodeTooShort(19))
        ));
    }

    #[tokio::test]
    async fn test_fill_and_sign() {
        let digest = H256::repeat_byte(0xd1);
        let mut pm = MockPaymasterLike::new();
        pm.expect_get_hash()
            .withf(|address, op, window| {
                *address == paymaster()
                    && op.paymaster_and_data.len() == 52
                    && window.valid_until == 2_000
                    && window.valid_after == 1_000
            })
            .times(1)
            .returning(move |_, _, _| Ok(digest));

        let wallet = wallet();
        let signer = UserOpSigner::new(
            Some(Arc::new(provider_with_chain())),
            Arc::new(pm),
            wallet.clone(),
            entry_point(),
        );
        let result = signer
            .fill_and_sign(partial(), Some(2_000), Some(1_000))
            .await
            .unwrap();

        assert_eq!(result.user_op_hash, digest);
        assert_eq!(result.user_op.signature, result.signature);
        assert_eq!(result.user_op.nonce, U256::from(5));

        let message_hash = domain_hash(digest, entry_point(), CHAIN_ID.into());
        let signature = Signature::try_from(result.signature.as_ref()).unwrap();
        let recovered = signature
            .recover(RecoveryMessage::Data(message_hash.as_bytes().to_vec()))
            .unwrap();
        assert_eq!(recovered, wallet.address());
    }

    #[tokio::test]
    async fn test_fill_and_sign_default_window_is_open() {
        let mut pm = MockPaymasterLike::new();
        pm.expect_get_hash()
            .withf(|_, _, window| window.valid_after < window.valid_until)
            .returning(|_, _, _| Ok(H256::zero()));

        let signer = UserOpSigner::new(
            Some(Arc::new(provider_with_chain())),
            Arc::new(pm),
            wallet(),
            entry_point(),
        );
        assert!(signer.fill_and_sign(partial(), None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_fill_and_sign_wraps_paymaster_failure() {
        let mut pm = MockPaymasterLike::new();
        pm.expect_get_hash()
            .returning(|_, _, _| Err(anyhow::anyhow!("paymaster reverted")));

        let signer = UserOpSigner::new(
            Some(Arc::new(provider_with_chain())),
            Arc::new(pm),
            wallet(),
            entry_point(),
        );
        let err = signer
            .fill_and_sign(partial(), None, None)
            .await
            .unwrap_err();
        match err {
            UserOpError::Signing { source, .. } => {
                assert!(source.to_string().contains("paymaster reverted"))
            }
            other => panic!("expected signing error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fill_and_sign_requires_paymaster() {
        let mut pm = MockPaymasterLike::new();
        pm.expect_get_hash().never();

        let signer = UserOpSigner::new(
            Some(Arc::new(provider_with_chain())),
            Arc::new(pm),
            wallet(),
            entry_point(),
        );
        let op = PartialUserOperation {
            paymaster: None,
            ..partial()
        };
        let err = signer.fill_and_sign(op, None, None).await.unwrap_err();
        assert!(matches!(err, UserOpError::Dependency("paymaster")));
    }

    #[tokio::test]
    async fn test_fill_and_sign_rejects_wide_window() {
        let mut pm = MockPaymasterLike::new();
        pm.expect_get_hash().never();

        let signer = UserOpSigner::new(
            Some(Arc::new(MockProviderLike::new())),
            Arc::new(pm),
            wallet(),
            entry_point(),
        );
        let err = signer
            .fill_and_sign(partial(), Some(1 << 50), Some(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UserOpError::Encoding(EncodingError::TimestampOverflow(value)) if value == 1 << 50
        ));

        let err = signer
            .fill_and_sign(partial(), Some(2_000), Some(1 << 48))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UserOpError::Encoding(EncodingError::TimestampOverflow(_))
        ));
    }

    #[tokio::test]
    async fn test_fill_sign_and_pack() {
        let mut pm = MockPaymasterLike::new();
        pm.expect_get_hash()
            .with(eq(paymaster()), always(), always())
            .returning(|_, _, _| Ok(H256::repeat_byte(1)));

        let signer = UserOpSigner::new(
            Some(Arc::new(provider_with_chain())),
            Arc::new(pm),
            wallet(),
            entry_point(),
        )
        .with_nonce_function("nonce");
        let result = signer
            .fill_sign_and_pack(partial(), None, None)
            .await
            .unwrap();
        assert_eq!(result.signature.len(), 65);
        assert_eq!(result.user_op.signature, result.signature);
        assert_eq!(&result.user_op.paymaster_and_data[..20], paymaster().as_bytes());
        assert_eq!(result.user_op_hash, H256::repeat_byte(1));
    }
}
