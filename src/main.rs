// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use ethers::prelude::*;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use userop_signer::revert::ErrorRegistry;
use userop_signer::UserOpSigner;

mod rpc;

use crate::rpc::{UserOpRpcImpl, UserOpRpcServer};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, env = "RPC_SERVER_ADDR", default_value = "127.0.0.1:3000")]
    rpc_server_addr: String,

    #[clap(short, long, env = "PRIVATE_KEY")]
    private_key: String,

    #[clap(short, long, env = "ETH_RPC_URL")]
    eth_rpc_url: String,

    #[clap(long, env = "ENTRY_POINT")]
    entry_point: String,

    #[clap(long, env = "NONCE_FUNCTION", default_value = "getNonce")]
    nonce_function: String,

    /// Extra custom error signatures for revert decoding, e.g. `MyError(uint256,bytes)`
    #[clap(long = "error-signature", env = "ERROR_SIGNATURES", value_delimiter = ';')]
    error_signatures: Vec<String>,

    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Connect to the chain and set up the signing wallet
    let provider = Arc::new(Provider::<Http>::try_from(args.eth_rpc_url.as_str())?);
    let chain_id = provider
        .get_chainid()
        .await
        .context("should fetch chain id from the Ethereum RPC")?;
    let chain_id_u64 = u64::try_from(chain_id)
        .map_err(|_| anyhow::anyhow!("chain id {chain_id} does not fit in 64 bits"))?;
    let wallet = args
        .private_key
        .parse::<LocalWallet>()?
        .with_chain_id(chain_id_u64);
    let entry_point: Address = args
        .entry_point
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid entry point address: {e:?}"))?;

    // Entry point errors plus any configured custom errors
    let mut registry = ErrorRegistry::entry_point();
    for signature in &args.error_signatures {
        registry = registry.with_signature(signature)?;
    }

    info!(
        "Signing user operations as {:?} for entry point {:?} on chain {}",
        wallet.address(),
        entry_point,
        chain_id
    );

    let signer = UserOpSigner::new(Some(provider.clone()), provider, wallet, entry_point)
        .with_nonce_function(args.nonce_function);
    let rpc = UserOpRpcImpl::new(Arc::new(signer), registry);

    // Start the RPC server
    let server_addr: SocketAddr = args.rpc_server_addr.parse()?;
    info!("Starting user operation RPC server on {}", server_addr);

    let server_handle = start_server(server_addr, rpc.into_rpc()).await?;

    tokio::signal::ctrl_c().await?;
    server_handle.stop()?;
    info!("Server stopped");

    Ok(())
}

async fn start_server<Ctx: Send + Sync + 'static>(
    server_addr: SocketAddr,
    module: jsonrpsee::RpcModule<Ctx>,
) -> anyhow::Result<ServerHandle> {
    let server = ServerBuilder::default().build(server_addr).await?;
    Ok(server.start(module))
}
