//! One mining attempt, driven as an explicit state machine:
//!
//! ```text
//! Idle -> AwaitingTemplate -> AwaitingCoinbase -> Merging
//!      -> [Finalizing] -> AwaitingSubmission -> Done
//! ```
//!
//! Any step may instead end in `Failed`. `Done` and `Failed` are terminal until
//! [`MiningJob::reset`] is called.

use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use mining_protocol::{
    BlockTemplate, CoinbaseRequest, CoinbaseTransaction, SubmissionResult, merge_coinbase,
};
use tracing::{debug, info, warn};

use crate::error::{JobError, Mismatch, ServiceError, Step};
use crate::service::{BlockTemplateService, CoinbaseService};

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub template_timeout: Duration,
    pub coinbase_timeout: Duration,
    pub finalize_timeout: Duration,
    pub submit_timeout: Duration,

    /// Fee passed to the wallet with each coinbase request.
    pub coinbase_fee: u64,

    /// Ask the base node to finalize the merged block before submitting it.
    pub finalize_block: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            template_timeout: Duration::from_secs(10),
            coinbase_timeout: Duration::from_secs(10),
            finalize_timeout: Duration::from_secs(10),
            submit_timeout: Duration::from_secs(10),
            coinbase_fee: 0,
            finalize_block: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Idle,
    AwaitingTemplate,
    AwaitingCoinbase,
    Merging,
    Finalizing,
    AwaitingSubmission,
    Done(SubmissionResult),
    Failed(JobError),
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::AwaitingTemplate => "awaiting_template",
            JobState::AwaitingCoinbase => "awaiting_coinbase",
            JobState::Merging => "merging",
            JobState::Finalizing => "finalizing",
            JobState::AwaitingSubmission => "awaiting_submission",
            JobState::Done(_) => "done",
            JobState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done(_) | JobState::Failed(_))
    }
}

/// Checks that a coinbase may be merged into the template's block.
///
/// The request must carry the template's height and reward, and if the
/// wallet reported the context it built the coinbase for, that must agree too.
pub fn verify_coinbase(
    template: &BlockTemplate,
    request: &CoinbaseRequest,
    coinbase: &CoinbaseTransaction,
) -> Result<(), Mismatch> {
    let checks = [
        ("request.reward", template.reward, Some(request.reward)),
        ("request.height", template.height, Some(request.height)),
        ("coinbase.reward", template.reward, coinbase.reward),
        ("coinbase.height", template.height, coinbase.height),
    ];

    for (field, expected, actual) in checks {
        if let Some(actual) = actual
            && actual != expected
        {
            return Err(Mismatch {
                field,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Runs `call` unless the deadline passes or `shutdown` resolves first.
/// The outer error is the job's own (timeout, cancellation); the inner one is
/// whatever the service reported.
async fn bounded<T, S>(
    step: Step,
    limit: Duration,
    shutdown: Pin<&mut S>,
    call: impl Future<Output = Result<T, ServiceError>>,
) -> Result<Result<T, ServiceError>, JobError>
where
    S: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = shutdown => Err(JobError::Cancelled(step)),
        res = tokio::time::timeout(limit, call) => {
            res.map_err(|_| JobError::Timeout { step, after: limit })
        }
    }
}

pub struct MiningJob {
    base_node: Arc<dyn BlockTemplateService>,
    wallet: Arc<dyn CoinbaseService>,
    config: JobConfig,
    state: JobState,
    history: Vec<&'static str>,
    template_height: Option<u64>,
}

impl MiningJob {
    pub fn new(
        base_node: Arc<dyn BlockTemplateService>,
        wallet: Arc<dyn CoinbaseService>,
        config: JobConfig,
    ) -> Self {
        MiningJob {
            base_node,
            wallet,
            config,
            state: JobState::Idle,
            history: vec![JobState::Idle.name()],
            template_height: None,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Names of every state this job has been in, oldest first.
    pub fn history(&self) -> &[&'static str] {
        &self.history
    }

    /// Height of the template this job worked on, once one was received.
    pub fn template_height(&self) -> Option<u64> {
        self.template_height
    }

    /// Drops whatever the last attempt left behind and returns to `Idle`.
    pub fn reset(&mut self) {
        self.state = JobState::Idle;
        self.history = vec![JobState::Idle.name()];
        self.template_height = None;
    }

    /// Runs one attempt to completion. `height_hint` is advisory; the
    /// template's height is always the one used.
    pub async fn start_job(
        &mut self,
        height_hint: Option<u64>,
    ) -> Result<SubmissionResult, JobError> {
        self.start_job_until(height_hint, std::future::pending()).await
    }

    /// Like [`start_job`](Self::start_job), but gives up with
    /// `JobError::Cancelled` if `shutdown` resolves while a pre-submission
    /// call is outstanding. Once the block has been handed to the base node
    /// `shutdown` is no longer observed and the node's answer is awaited.
    pub async fn start_job_until<S>(
        &mut self,
        height_hint: Option<u64>,
        shutdown: S,
    ) -> Result<SubmissionResult, JobError>
    where
        S: Future<Output = ()>,
    {
        if self.state != JobState::Idle {
            return Err(JobError::NotIdle(self.state.name()));
        }

        let mut shutdown = pin!(shutdown);
        let outcome = self.drive(height_hint, shutdown.as_mut()).await;

        match &outcome {
            Ok(result) => {
                info!(
                    height = self.template_height,
                    accepted = result.accepted,
                    reason = result.reason(),
                    "mining job finished"
                );
                self.transition(JobState::Done(result.clone()));
            }
            Err(e) => {
                warn!(
                    height = self.template_height,
                    kind = e.kind(),
                    error = %e,
                    "mining job failed"
                );
                self.transition(JobState::Failed(e.clone()));
            }
        }
        outcome
    }

    fn transition(&mut self, next: JobState) {
        debug!(from = self.state.name(), to = next.name(), "job state");
        self.history.push(next.name());
        self.state = next;
    }

    async fn drive<S>(
        &mut self,
        height_hint: Option<u64>,
        mut shutdown: Pin<&mut S>,
    ) -> Result<SubmissionResult, JobError>
    where
        S: Future<Output = ()>,
    {
        let base_node = Arc::clone(&self.base_node);
        let wallet = Arc::clone(&self.wallet);
        let cfg = self.config.clone();

        self.transition(JobState::AwaitingTemplate);
        let template = bounded(
            Step::Template,
            cfg.template_timeout,
            shutdown.as_mut(),
            base_node.get_new_template(),
        )
        .await?
        .map_err(JobError::Template)?;

        self.template_height = Some(template.height);

        if let Some(hint) = height_hint
            && hint != template.height
        {
            warn!(
                hint,
                height = template.height,
                "template height differs from hint, using template"
            );
        }

        if !template.is_consistent() {
            return Err(JobError::Template(ServiceError::Invalid(format!(
                "template height {} but block header height {}",
                template.height, template.block.header.height
            ))));
        }

        self.transition(JobState::AwaitingCoinbase);
        let request = CoinbaseRequest::for_template(&template, cfg.coinbase_fee);
        let coinbase = bounded(
            Step::Coinbase,
            cfg.coinbase_timeout,
            shutdown.as_mut(),
            wallet.get_coinbase(request),
        )
        .await?
        .map_err(JobError::Coinbase)?;

        verify_coinbase(&template, &request, &coinbase).map_err(JobError::CoinbaseMismatch)?;

        self.transition(JobState::Merging);
        let height = template.height;
        let mut block = merge_coinbase(template.block, coinbase);
        debug!(
            height,
            outputs = block.body.outputs.len(),
            kernels = block.body.kernels.len(),
            "merged coinbase into block"
        );

        if cfg.finalize_block {
            self.transition(JobState::Finalizing);
            block = bounded(
                Step::Finalize,
                cfg.finalize_timeout,
                shutdown.as_mut(),
                base_node.get_new_block(block),
            )
            .await?
            .map_err(JobError::Build)?;

            if block.header.height != height {
                return Err(JobError::Build(ServiceError::Invalid(format!(
                    "finalized block has height {}, expected {}",
                    block.header.height, height
                ))));
            }
        }

        self.transition(JobState::AwaitingSubmission);
        tokio::time::timeout(cfg.submit_timeout, base_node.submit_block(block))
            .await
            .map_err(|_| JobError::Timeout {
                step: Step::Submit,
                after: cfg.submit_timeout,
            })?
            .map_err(JobError::Submission)
    }
}
