//! In-memory base node and wallet for local mining runs.
//!
//! Speaks the same HTTP/JSON endpoints as a real node and wallet but keeps
//! nothing beyond a tip height. Submitted blocks get a smoke check only.

use std::env;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use mining_protocol::{
    Block, BlockBody, BlockHeader, COINBASE_KERNEL, COINBASE_OUTPUT, CoinbaseRequest,
    CoinbaseTransaction, GetCoinbaseResponse, GetNewBlockResponse, GetNewBlockTemplateResponse,
    OutputFeatures, PROTOCOL_VERSION, Signature, TransactionKernel, TransactionOutput,
    VersionResponse,
};
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct DevnetConfig {
    pub listen_addr: String,
    /// Tip height at startup; the first template is for the next height.
    pub start_height: u64,
    /// If set, used as the block reward regardless of height.
    pub reward_override: Option<u64>,
    /// Blocks a coinbase output stays locked for.
    pub coinbase_lock_height: u64,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        DevnetConfig {
            listen_addr: "127.0.0.1:18142".to_string(),
            start_height: 0,
            reward_override: None,
            coinbase_lock_height: 6,
        }
    }
}

impl DevnetConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_env_with(|key| env::var(key).ok())
    }

    /// Builds the config from `DEVNET_*` values supplied by `lookup`. A value
    /// that is present but does not parse is an error naming the variable.
    pub fn from_env_with<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = DevnetConfig::default();

        let parse = |key: &str| -> anyhow::Result<Option<u64>> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map(Some)
                    .with_context(|| format!("invalid value for {key}: {raw:?}")),
                None => Ok(None),
            }
        };

        Ok(DevnetConfig {
            listen_addr: lookup("DEVNET_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            start_height: parse("DEVNET_START_HEIGHT")?.unwrap_or(defaults.start_height),
            reward_override: parse("DEVNET_REWARD")?,
            coinbase_lock_height: parse("DEVNET_COINBASE_LOCK_HEIGHT")?
                .unwrap_or(defaults.coinbase_lock_height),
        })
    }
}

/// Block reward in base units: 50 coins at height 0, halving every 210_000
/// blocks.
pub fn block_reward(height: u64) -> u64 {
    let halvings = height / 210_000;
    if halvings >= 64 {
        return 0;
    }
    (50u64 * 100_000_000u64) >> halvings
}

#[derive(Debug)]
struct Chain {
    tip: u64,
    accepted: u64,
    coinbases_issued: u64,
}

#[derive(Clone)]
pub struct DevnetState {
    chain: Arc<Mutex<Chain>>,
    config: Arc<DevnetConfig>,
}

impl DevnetState {
    pub fn new(config: DevnetConfig) -> Self {
        DevnetState {
            chain: Arc::new(Mutex::new(Chain {
                tip: config.start_height,
                accepted: 0,
                coinbases_issued: 0,
            })),
            config: Arc::new(config),
        }
    }

    fn chain(&self) -> MutexGuard<'_, Chain> {
        match self.chain.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn tip(&self) -> u64 {
        self.chain().tip
    }

    pub fn accepted_blocks(&self) -> u64 {
        self.chain().accepted
    }

    fn reward_at(&self, height: u64) -> u64 {
        self.config
            .reward_override
            .unwrap_or_else(|| block_reward(height))
    }
}

pub fn router(state: DevnetState) -> Router {
    Router::new()
        .route("/version", get(get_version))
        .route("/get_new_block_template", post(get_new_block_template))
        .route("/get_new_block", post(get_new_block))
        .route("/submit_block", post(submit_block))
        .route("/get_coinbase", post(get_coinbase))
        .with_state(state)
}

pub async fn serve<F>(
    listener: TcpListener,
    state: DevnetState,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Resolves when `signal` fires. If the signal cannot be listened for, the
/// error is logged and the returned future never resolves.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: format!("devnet-node/{}", env!("CARGO_PKG_VERSION")),
        protocol_version: PROTOCOL_VERSION,
    })
}

async fn get_new_block_template(
    State(state): State<DevnetState>,
) -> Json<GetNewBlockTemplateResponse> {
    let tip = state.tip();
    let height = tip.saturating_add(1);

    let mut extra = Map::new();
    extra.insert("version".to_string(), json!(1));
    extra.insert("prev_hash".to_string(), json!(format!("{tip:064x}")));

    Json(GetNewBlockTemplateResponse {
        new_block_template: Block {
            header: BlockHeader { height, extra },
            body: BlockBody::default(),
        },
        block_reward: state.reward_at(height),
    })
}

async fn get_coinbase(
    State(state): State<DevnetState>,
    Json(req): Json<CoinbaseRequest>,
) -> Json<GetCoinbaseResponse> {
    let serial = {
        let mut chain = state.chain();
        chain.coinbases_issued += 1;
        chain.coinbases_issued
    };
    let value = req.reward.saturating_add(req.fee);

    // Placeholder commitments: unique per coinbase, no cryptography behind them.
    let output = TransactionOutput {
        features: OutputFeatures {
            flags: COINBASE_OUTPUT,
            maturity: req
                .height
                .saturating_add(state.config.coinbase_lock_height),
        },
        commitment: format!("{:016x}{:016x}{:032x}", req.height, value, serial),
        range_proof: String::new(),
    };
    let kernel = TransactionKernel {
        features: COINBASE_KERNEL,
        fee: 0,
        lock_height: 0,
        excess: format!("{:016x}{:048x}", req.height, serial),
        excess_sig: Signature::default(),
    };

    Json(GetCoinbaseResponse {
        transaction: CoinbaseTransaction {
            height: Some(req.height),
            reward: Some(req.reward),
            body: BlockBody {
                inputs: Vec::new(),
                outputs: vec![output],
                kernels: vec![kernel],
            },
        },
    })
}

async fn get_new_block(Json(mut block): Json<Block>) -> Json<GetNewBlockResponse> {
    let outputs = block.body.outputs.len();
    let kernels = block.body.kernels.len();
    block
        .header
        .extra
        .insert("output_mmr_size".to_string(), json!(outputs));
    block
        .header
        .extra
        .insert("kernel_mmr_size".to_string(), json!(kernels));
    Json(GetNewBlockResponse { block })
}

fn check_block(block: &Block, tip: u64) -> Result<(), String> {
    if tip == u64::MAX || block.header.height != tip + 1 {
        return Err(format!(
            "block height {} does not extend tip {}",
            block.header.height, tip
        ));
    }
    if !block.body.outputs.iter().any(TransactionOutput::is_coinbase) {
        return Err("block has no coinbase output".to_string());
    }
    if !block.body.kernels.iter().any(TransactionKernel::is_coinbase) {
        return Err("block has no coinbase kernel".to_string());
    }
    Ok(())
}

async fn submit_block(
    State(state): State<DevnetState>,
    Json(block): Json<Block>,
) -> Json<Value> {
    let mut chain = state.chain();
    match check_block(&block, chain.tip) {
        Ok(()) => {
            chain.tip = block.header.height;
            chain.accepted += 1;
            info!(height = chain.tip, "accepted block");
            Json(json!({ "accepted": true, "height": chain.tip }))
        }
        Err(reason) => {
            warn!(height = block.header.height, %reason, "rejected block");
            Json(json!({ "accepted": false, "reason": reason }))
        }
    }
}
