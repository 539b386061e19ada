// src/provider.rs
use anyhow::Context;
use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::call_raw::{spoof, RawCall};
use ethers::providers::RpcError;
use ethers::types::transaction::eip2718::TypedTransaction;
#[cfg(test)]
use mockall::automock;

/// Chain access needed to fill and simulate user operations.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderLike: Send + Sync {
    async fn chain_id(&self) -> anyhow::Result<U256>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> anyhow::Result<U256>;

    /// Base fee of the latest block, if the chain reports one.
    async fn latest_base_fee(&self) -> anyhow::Result<Option<U256>>;

    async fn call(&self, tx: &TypedTransaction) -> anyhow::Result<Bytes>;

    /// `eth_call` at the latest block with `code` installed at `address`.
    ///
    /// A revert is returned as `Ok(Err(revert_data))`.
    async fn call_with_code_override(
        &self,
        tx: &TypedTransaction,
        address: Address,
        code: Bytes,
    ) -> anyhow::Result<Result<Bytes, Bytes>>;
}

#[async_trait]
impl<M> ProviderLike for M
where
    M: Middleware + 'static,
    M::Error: 'static,
{
    async fn chain_id(&self) -> anyhow::Result<U256> {
        self.get_chainid()
            .await
            .context("provider should return chain id")
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> anyhow::Result<U256> {
        Middleware::estimate_gas(self, tx, None)
            .await
            .context("provider should estimate gas")
    }

    async fn latest_base_fee(&self) -> anyhow::Result<Option<U256>> {
        let block = self
            .get_block(BlockNumber::Latest)
            .await
            .context("should load latest block")?
            .context("latest block should exist")?;
        Ok(block.base_fee_per_gas)
    }

    async fn call(&self, tx: &TypedTransaction) -> anyhow::Result<Bytes> {
        Middleware::call(self, tx, None)
            .await
            .context("provider should execute call")
    }

    async fn call_with_code_override(
        &self,
        tx: &TypedTransaction,
        address: Address,
        code: Bytes,
    ) -> anyhow::Result<Result<Bytes, Bytes>> {
        let mut state = spoof::state();
        state.account(address).code(code);
        match self.provider().call_raw(tx).state(&state).await {
            Ok(ret) => Ok(Ok(ret)),
            Err(error) => {
                let revert_data =
                    RpcError::as_error_response(&error).and_then(|e| e.as_revert_data());
                match revert_data {
                    Some(revert_data) => Ok(Err(revert_data)),
                    None => Err(error).context("provider should execute overridden call"),
                }
            }
        }
    }
}
