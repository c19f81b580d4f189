use anyhow::Context;
use devnet_node::{DevnetConfig, DevnetState, serve, shutdown_on};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = DevnetConfig::from_env()?;
    info!(
        addr = %cfg.listen_addr,
        start_height = cfg.start_height,
        reward_override = cfg.reward_override,
        coinbase_lock_height = cfg.coinbase_lock_height,
        "devnet node starting"
    );

    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("bind {}", cfg.listen_addr))?;

    let state = DevnetState::new(cfg);
    serve(listener, state.clone(), shutdown_on(tokio::signal::ctrl_c())).await?;

    info!(
        tip = state.tip(),
        accepted = state.accepted_blocks(),
        "devnet node stopped"
    );
    Ok(())
}
