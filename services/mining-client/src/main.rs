use std::sync::Arc;

use anyhow::Context;
use mining_client::{
    BlockTemplateService, ClientConfig, HttpBaseNode, HttpWallet, Miner, logging, status,
};
use mining_protocol::PROTOCOL_VERSION;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ClientConfig::load()?;
    logging::init(&cfg.log_level);

    info!(
        base_node = %cfg.base_node_url,
        wallet = %cfg.wallet_url,
        finalize_block = cfg.finalize_block,
        max_jobs = cfg.max_jobs,
        "mining client starting"
    );

    let base_node = Arc::new(
        HttpBaseNode::new(cfg.base_node_url.clone(), cfg.connect_timeout())
            .context("build base node client")?,
    );
    let wallet = Arc::new(
        HttpWallet::new(cfg.wallet_url.clone(), cfg.connect_timeout())
            .context("build wallet client")?,
    );

    match base_node.get_version().await {
        Ok(v) if v.protocol_version != PROTOCOL_VERSION => warn!(
            version = %v.version,
            node_protocol = v.protocol_version,
            client_protocol = PROTOCOL_VERSION,
            "base node speaks a different protocol version"
        ),
        Ok(v) => info!(version = %v.version, "connected to base node"),
        Err(e) => warn!(error = %e, "base node version probe failed, mining anyway"),
    }

    let miner = Miner::new(base_node, wallet, cfg.miner_settings());

    if let Some(addr) = cfg.status_addr.clone() {
        let shared = miner.status();
        tokio::spawn(async move {
            if let Err(e) = status::serve(addr, shared).await {
                error!(error = ?e, "status server error");
            }
        });
    }

    let stats = miner
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        failed = stats.failed,
        "mining client exiting"
    );
    Ok(())
}
