use async_trait::async_trait;
use mining_protocol::{
    Block, BlockTemplate, CoinbaseRequest, CoinbaseTransaction, SubmissionResult, VersionResponse,
};

use crate::error::ServiceError;

/// The base node side of a mining job.
///
/// Implementations do not retry; a failed call is reported as is and the
/// job decides what happens next.
#[async_trait]
pub trait BlockTemplateService: Send + Sync {
    async fn get_version(&self) -> Result<VersionResponse, ServiceError>;

    async fn get_new_template(&self) -> Result<BlockTemplate, ServiceError>;

    /// Turns a merged block into a submittable one (e.g. filling commitment
    /// roots in the header). Services that need no such step keep the default.
    async fn get_new_block(&self, block: Block) -> Result<Block, ServiceError> {
        Ok(block)
    }

    async fn submit_block(&self, block: Block) -> Result<SubmissionResult, ServiceError>;
}

/// The wallet side of a mining job.
#[async_trait]
pub trait CoinbaseService: Send + Sync {
    async fn get_coinbase(
        &self,
        request: CoinbaseRequest,
    ) -> Result<CoinbaseTransaction, ServiceError>;
}
