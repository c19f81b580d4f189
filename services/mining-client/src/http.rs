use std::time::Duration;

use async_trait::async_trait;
use mining_protocol::{
    Block, BlockTemplate, CoinbaseRequest, CoinbaseTransaction, GetCoinbaseResponse,
    GetNewBlockResponse, GetNewBlockTemplateResponse, SubmissionResult, VersionResponse,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::ServiceError;
use crate::service::{BlockTemplateService, CoinbaseService};

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        ServiceError::Transport(e.to_string())
    }
}

fn build_client(connect_timeout: Duration) -> Result<reqwest::Client, ServiceError> {
    // No overall request timeout here: each job step carries its own deadline.
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(ServiceError::from)
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ServiceError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ServiceError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    resp.json::<T>()
        .await
        .map_err(|e| ServiceError::Invalid(e.to_string()))
}

/// Base node reached over HTTP/JSON. One client (and its connection pool) is
/// kept for the lifetime of the adapter.
#[derive(Debug, Clone)]
pub struct HttpBaseNode {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBaseNode {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        Ok(HttpBaseNode {
            client: build_client(connect_timeout)?,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl BlockTemplateService for HttpBaseNode {
    async fn get_version(&self) -> Result<VersionResponse, ServiceError> {
        let url = endpoint(&self.base_url, "version");
        let resp = self.client.get(&url).send().await?;
        read_json(resp).await
    }

    async fn get_new_template(&self) -> Result<BlockTemplate, ServiceError> {
        let url = endpoint(&self.base_url, "get_new_block_template");
        let resp = self.client.post(&url).json(&json!({})).send().await?;
        let tpl: GetNewBlockTemplateResponse = read_json(resp).await?;
        debug!(
            height = tpl.new_block_template.header.height,
            reward = tpl.block_reward,
            "received block template"
        );
        Ok(tpl.into())
    }

    async fn get_new_block(&self, block: Block) -> Result<Block, ServiceError> {
        let url = endpoint(&self.base_url, "get_new_block");
        let resp = self.client.post(&url).json(&block).send().await?;
        let built: GetNewBlockResponse = read_json(resp).await?;
        Ok(built.block)
    }

    async fn submit_block(&self, block: Block) -> Result<SubmissionResult, ServiceError> {
        let url = endpoint(&self.base_url, "submit_block");
        let resp = self.client.post(&url).json(&block).send().await?;
        let raw: Value = read_json(resp).await?;
        Ok(SubmissionResult::from_raw(raw))
    }
}

/// Wallet reached over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpWallet {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWallet {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        Ok(HttpWallet {
            client: build_client(connect_timeout)?,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl CoinbaseService for HttpWallet {
    async fn get_coinbase(
        &self,
        request: CoinbaseRequest,
    ) -> Result<CoinbaseTransaction, ServiceError> {
        let url = endpoint(&self.base_url, "get_coinbase");
        let resp = self.client.post(&url).json(&request).send().await?;
        let cb: GetCoinbaseResponse = read_json(resp).await?;
        Ok(cb.transaction)
    }
}
