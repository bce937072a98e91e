use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use vault_kernel::cli::Cli;
use vault_kernel::orchestrator::Orchestrator;
use vault_kernel::rpc::{OutboundHub, RpcServer};
use vault_kernel::services::keyring::InMemoryCredentialStore;
use vault_kernel::services::llm::DemoLlmProvider;
use vault_kernel::workspace::Workspace;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("vault-kernel exited: {err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let workspace = Workspace::open(cli.vault.clone())?;
    let outbound = Arc::new(OutboundHub::new());
    let orchestrator = Orchestrator::initialize(
        workspace,
        Arc::new(DemoLlmProvider),
        Arc::new(InMemoryCredentialStore::new()),
        outbound.clone(),
    )
    .await;

    let server = RpcServer::new(outbound, orchestrator);
    server.serve(cli.ws_port).await
}
