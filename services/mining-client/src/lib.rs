pub mod config;
pub mod error;
pub mod http;
pub mod job;
pub mod logging;
pub mod miner;
pub mod service;
pub mod status;


pub use config::ClientConfig;
pub use error::{JobError, ServiceError, Step};
pub use http::{HttpBaseNode, HttpWallet};
pub use job::{JobConfig, JobState, MiningJob};
pub use miner::{JobStats, Miner, MinerSettings};
pub use service::{BlockTemplateService, CoinbaseService};
