// src/rpc.rs
use std::sync::Arc;

use ethers::signers::Signer;
use ethers::types::{Address, Bytes, H256, U256};
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::error::{ErrorObject, ErrorObjectOwned, INVALID_PARAMS_CODE};
use serde_json::Value;
use tracing::{debug, error, info};

use userop_signer::digest::{encode_user_op, user_op_hash, EncodeMode};
use userop_signer::error::{RevertError, UserOpError};
use userop_signer::packing::pack_user_op;
use userop_signer::paymaster::PaymasterLike;
use userop_signer::provider::ProviderLike;
use userop_signer::revert::ErrorRegistry;
use userop_signer::types::{
    FillAndSignResult, FillSignPackResult, PackedUserOperation, PartialUserOperation,
    UserOperation,
};
use userop_signer::UserOpSigner;

const SERVER_ERROR_CODE: i32 = -32000;

#[rpc(server, namespace = "uo")]
pub trait UserOpRpc {
    /// Packs an expanded user operation into its on-chain shape
    #[method(name = "packUserOperation")]
    fn pack_user_operation(&self, user_op: UserOperation) -> RpcResult<PackedUserOperation>;

    #[method(name = "encodeUserOperation")]
    fn encode_user_operation(&self, user_op: UserOperation, for_signature: bool)
        -> RpcResult<Bytes>;

    #[method(name = "getUserOperationHash")]
    fn get_user_operation_hash(
        &self,
        user_op: UserOperation,
        entry_point: Address,
        chain_id: U256,
    ) -> RpcResult<H256>;

    /// Decodes a hex revert payload or an error object carrying one
    #[method(name = "decodeRevertReason")]
    fn decode_revert_reason(
        &self,
        data: Value,
        null_if_no_match: Option<bool>,
    ) -> RpcResult<Option<String>>;

    #[method(name = "fillAndSign")]
    async fn fill_and_sign(
        &self,
        user_op: PartialUserOperation,
        valid_until: Option<u64>,
        valid_after: Option<u64>,
    ) -> RpcResult<FillAndSignResult>;

    #[method(name = "fillSignAndPack")]
    async fn fill_sign_and_pack(
        &self,
        user_op: PartialUserOperation,
        valid_until: Option<u64>,
        valid_after: Option<u64>,
    ) -> RpcResult<FillSignPackResult>;
}

pub struct UserOpRpcImpl<P: ?Sized, PM: ?Sized, S> {
    signer: Arc<UserOpSigner<P, PM, S>>,
    registry: ErrorRegistry,
}

impl<P: ?Sized, PM: ?Sized, S> UserOpRpcImpl<P, PM, S> {
    pub fn new(signer: Arc<UserOpSigner<P, PM, S>>, registry: ErrorRegistry) -> Self {
        Self { signer, registry }
    }
}

fn to_rpc_error(e: UserOpError) -> ErrorObjectOwned {
    error!("User operation request failed: {}", e);
    let code = match e {
        UserOpError::Encoding(_) => INVALID_PARAMS_CODE,
        _ => SERVER_ERROR_CODE,
    };
    ErrorObject::owned(code, format!("User operation error: {}", e), None::<()>)
}

fn revert_to_rpc_error(e: RevertError) -> ErrorObjectOwned {
    error!("Revert decoding failed: {}", e);
    ErrorObject::owned(INVALID_PARAMS_CODE, e.to_string(), None::<()>)
}

#[async_trait]
impl<P, PM, S> UserOpRpcServer for UserOpRpcImpl<P, PM, S>
where
    P: ProviderLike + ?Sized + 'static,
    PM: PaymasterLike + ?Sized + 'static,
    S: Signer + 'static,
    S::Error: 'static,
{
    fn pack_user_operation(&self, user_op: UserOperation) -> RpcResult<PackedUserOperation> {
        pack_user_op(&user_op).map_err(|e| to_rpc_error(e.into()))
    }

    fn encode_user_operation(
        &self,
        user_op: UserOperation,
        for_signature: bool,
    ) -> RpcResult<Bytes> {
        let mode = if for_signature {
            EncodeMode::ForSignature
        } else {
            EncodeMode::ForGasEstimate
        };
        encode_user_op(&user_op, mode).map_err(|e| to_rpc_error(e.into()))
    }

    fn get_user_operation_hash(
        &self,
        user_op: UserOperation,
        entry_point: Address,
        chain_id: U256,
    ) -> RpcResult<H256> {
        user_op_hash(&user_op, entry_point, chain_id).map_err(|e| to_rpc_error(e.into()))
    }

    fn decode_revert_reason(
        &self,
        data: Value,
        null_if_no_match: Option<bool>,
    ) -> RpcResult<Option<String>> {
        self.registry
            .decode_json(&data, null_if_no_match.unwrap_or(true))
            .map_err(revert_to_rpc_error)
    }

    async fn fill_and_sign(
        &self,
        user_op: PartialUserOperation,
        valid_until: Option<u64>,
        valid_after: Option<u64>,
    ) -> RpcResult<FillAndSignResult> {
        debug!("Received fillAndSign request for sender: {:?}", user_op.sender);
        let result = self
            .signer
            .fill_and_sign(user_op, valid_until, valid_after)
            .await
            .map_err(to_rpc_error)?;
        info!("Signed user operation for {:?}", result.user_op.sender);
        Ok(result)
    }

    async fn fill_sign_and_pack(
        &self,
        user_op: PartialUserOperation,
        valid_until: Option<u64>,
        valid_after: Option<u64>,
    ) -> RpcResult<FillSignPackResult> {
        debug!("Received fillSignAndPack request for sender: {:?}", user_op.sender);
        let result = self
            .signer
            .fill_sign_and_pack(user_op, valid_until, valid_after)
            .await
            .map_err(to_rpc_error)?;
        info!("Signed and packed user operation for {:?}", result.user_op.sender);
        Ok(result)
    }
}
