use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{JobError, Step};
use crate::job::{JobConfig, MiningJob};
use crate::service::{BlockTemplateService, CoinbaseService};

const MAX_RECENT_JOBS: usize = 1000;

#[derive(Debug, Clone)]
pub struct MinerSettings {
    pub job: JobConfig,
    /// Pause after a job that reached the base node (accepted or not).
    pub job_interval: Duration,
    /// Pause after a failed job before starting a fresh one.
    pub retry_delay: Duration,
    /// Stop after this many jobs. Runs until shutdown when unset.
    pub max_jobs: Option<u64>,
}

impl Default for MinerSettings {
    fn default() -> Self {
        MinerSettings {
            job: JobConfig::default(),
            job_interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
            max_jobs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: u64,
    pub height: Option<u64>,
    pub accepted: Option<bool>,
    pub reason: Option<String>,
    pub error_kind: Option<&'static str>,
    pub failed_step: Option<Step>,
    pub error: Option<String>,
    pub states: Vec<&'static str>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub attempted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
    pub failures_by_kind: BTreeMap<String, u64>,
    pub last_accepted_height: Option<u64>,
    pub last: Option<JobRecord>,
}

impl JobStats {
    fn record(&mut self, rec: &JobRecord) {
        self.attempted += 1;
        match (rec.accepted, rec.error_kind) {
            (Some(true), _) => {
                self.accepted += 1;
                if rec.height.is_some() {
                    self.last_accepted_height = rec.height;
                }
            }
            (Some(false), _) => self.rejected += 1,
            (None, kind) => {
                self.failed += 1;
                let key = kind.unwrap_or("unknown").to_string();
                *self.failures_by_kind.entry(key).or_insert(0) += 1;
            }
        }
        self.last = Some(rec.clone());
    }
}

#[derive(Debug, Default)]
pub struct MinerStatus {
    pub stats: JobStats,
    pub recent: VecDeque<JobRecord>,
}

pub type SharedStatus = Arc<RwLock<MinerStatus>>;

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Runs mining jobs back to back against one base node and one wallet.
///
/// Every attempt gets a fresh [`MiningJob`]; only the adapters (and their
/// connections) are shared between attempts.
pub struct Miner {
    base_node: Arc<dyn BlockTemplateService>,
    wallet: Arc<dyn CoinbaseService>,
    settings: MinerSettings,
    status: SharedStatus,
}

impl Miner {
    pub fn new(
        base_node: Arc<dyn BlockTemplateService>,
        wallet: Arc<dyn CoinbaseService>,
        settings: MinerSettings,
    ) -> Self {
        Miner {
            base_node,
            wallet,
            settings,
            status: Arc::new(RwLock::new(MinerStatus::default())),
        }
    }

    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    pub fn stats(&self) -> JobStats {
        match self.status.read() {
            Ok(guard) => guard.stats.clone(),
            Err(poisoned) => poisoned.into_inner().stats.clone(),
        }
    }

    fn push_record(&self, rec: JobRecord) {
        let mut guard = match self.status.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.stats.record(&rec);
        guard.recent.push_back(rec);
        if guard.recent.len() > MAX_RECENT_JOBS {
            guard.recent.pop_front();
        }
    }

    /// Mines until `shutdown` resolves or `max_jobs` is reached and returns
    /// the final stats.
    pub async fn run<S>(&self, shutdown: S) -> JobStats
    where
        S: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);
        let mut job_id: u64 = 0;

        loop {
            if let Some(max) = self.settings.max_jobs
                && job_id >= max
            {
                info!(jobs = job_id, "reached max_jobs, stopping");
                break;
            }
            job_id += 1;

            let hint = self.stats().last_accepted_height.map(|h| h + 1);
            let mut job = MiningJob::new(
                Arc::clone(&self.base_node),
                Arc::clone(&self.wallet),
                self.settings.job.clone(),
            );
            let outcome = job.start_job_until(hint, shutdown.as_mut()).await;

            if let Err(JobError::Cancelled(step)) = &outcome {
                info!(job_id, %step, "shutdown requested, abandoning job");
                break;
            }

            let (accepted, reason, error_kind, failed_step, error) = match &outcome {
                Ok(result) => (
                    Some(result.accepted),
                    result.reason().map(str::to_string),
                    None,
                    None,
                    None,
                ),
                Err(e) => (None, None, Some(e.kind()), e.step(), Some(e.to_string())),
            };

            let delay = match accepted {
                Some(true) => {
                    info!(job_id, height = job.template_height(), "block accepted");
                    self.settings.job_interval
                }
                Some(false) => {
                    warn!(
                        job_id,
                        height = job.template_height(),
                        reason = reason.as_deref(),
                        "block rejected"
                    );
                    self.settings.job_interval
                }
                None => self.settings.retry_delay,
            };

            self.push_record(JobRecord {
                job_id,
                height: job.template_height(),
                accepted,
                reason,
                error_kind,
                failed_step,
                error,
                states: job.history().to_vec(),
                timestamp: current_timestamp(),
            });

            let finished = self
                .settings
                .max_jobs
                .is_some_and(|max| job_id >= max);
            if finished {
                continue;
            }

            tokio::select! {
                biased;
                _ = shutdown.as_mut() => {
                    info!("shutdown requested, stopping miner");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let stats = self.stats();
        info!(
            attempted = stats.attempted,
            accepted = stats.accepted,
            rejected = stats.rejected,
            failed = stats.failed,
            "miner stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use mining_protocol::{
        Block, BlockBody, BlockHeader, BlockTemplate, CoinbaseRequest, CoinbaseTransaction,
        SubmissionResult, VersionResponse,
    };
    use serde_json::json;
    use std::sync::Mutex;

    /// Hands out templates at increasing heights; the first `fail_first`
    /// template requests fail.
    struct CountingNode {
        next_height: Mutex<u64>,
        fail_first: Mutex<u32>,
        reject: bool,
    }

    #[async_trait]
    impl BlockTemplateService for CountingNode {
        async fn get_version(&self) -> Result<VersionResponse, ServiceError> {
            Ok(VersionResponse {
                version: "counting".to_string(),
                protocol_version: 1,
            })
        }

        async fn get_new_template(&self) -> Result<BlockTemplate, ServiceError> {
            {
                let mut fails = self.fail_first.lock().unwrap();
                if *fails > 0 {
                    *fails -= 1;
                    return Err(ServiceError::Transport("node restarting".to_string()));
                }
            }
            let mut h = self.next_height.lock().unwrap();
            let height = *h;
            *h += 1;
            Ok(BlockTemplate {
                height,
                reward: 50,
                block: Block {
                    header: BlockHeader::at_height(height),
                    body: BlockBody::default(),
                },
            })
        }

        async fn submit_block(&self, _block: Block) -> Result<SubmissionResult, ServiceError> {
            if self.reject {
                Ok(SubmissionResult::from_raw(json!({ "accepted": false, "reason": "duplicate" })))
            } else {
                Ok(SubmissionResult::from_raw(json!({ "accepted": true })))
            }
        }
    }

    struct EmptyWallet;

    #[async_trait]
    impl CoinbaseService for EmptyWallet {
        async fn get_coinbase(
            &self,
            _request: CoinbaseRequest,
        ) -> Result<CoinbaseTransaction, ServiceError> {
            Ok(CoinbaseTransaction {
                height: None,
                reward: None,
                body: BlockBody::default(),
            })
        }
    }

    fn miner(node: CountingNode, max_jobs: u64) -> Miner {
        let settings = MinerSettings {
            max_jobs: Some(max_jobs),
            job_interval: Duration::from_millis(10),
            retry_delay: Duration::from_millis(10),
            ..MinerSettings::default()
        };
        Miner::new(Arc::new(node), Arc::new(EmptyWallet), settings)
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_max_jobs() {
        let m = miner(
            CountingNode {
                next_height: Mutex::new(10),
                fail_first: Mutex::new(0),
                reject: false,
            },
            3,
        );

        let stats = m.run(std::future::pending()).await;
        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.last_accepted_height, Some(12));

        let status = m.status();
        let status = status.read().unwrap();
        let ids: Vec<u64> = status.recent.iter().map(|r| r.job_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted_by_kind() {
        let m = miner(
            CountingNode {
                next_height: Mutex::new(1),
                fail_first: Mutex::new(2),
                reject: false,
            },
            3,
        );

        let stats = m.run(std::future::pending()).await;
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.failures_by_kind.get("template_error"), Some(&2));

        {
            let status = m.status();
            let status = status.read().unwrap();
            assert_eq!(status.recent[0].failed_step, Some(Step::Template));
            assert_eq!(status.recent[0].height, None);
        }

        let last = stats.last.unwrap();
        assert_eq!(last.accepted, Some(true));
        assert_eq!(last.states.last(), Some(&"done"));
    }

    #[tokio::test(start_paused = true)]
    async fn rejections_are_not_failures() {
        let m = miner(
            CountingNode {
                next_height: Mutex::new(1),
                fail_first: Mutex::new(0),
                reject: true,
            },
            2,
        );

        let stats = m.run(std::future::pending()).await;
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.last_accepted_height, None);
        assert_eq!(stats.last.unwrap().reason.as_deref(), Some("duplicate"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_between_jobs() {
        let m = miner(
            CountingNode {
                next_height: Mutex::new(1),
                fail_first: Mutex::new(0),
                reject: false,
            },
            1_000,
        );
        let settings_interval = Duration::from_millis(10);

        // a couple of jobs fit before the shutdown fires
        let stats = m
            .run(tokio::time::sleep(settings_interval * 3 + Duration::from_millis(5)))
            .await;
        assert!(stats.attempted >= 1);
        assert!(stats.attempted < 1_000);
        assert_eq!(stats.failed, 0);
    }
}
