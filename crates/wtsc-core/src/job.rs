use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use pocket_client::TxParams;
use tracing::{debug, error, info, warn};

use crate::io;
use crate::logging::error_chain;
use crate::pool::GroupReport;
use crate::resources::Resources;
use crate::schedule::JobFn;
use crate::stake::StakeTask;
use crate::wts::WtsRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTimeouts {
    /// Bound on the recommendation call.
    pub query: Duration,
    /// Bound on each stake broadcast.
    pub broadcast: Duration,
    /// How long dispatch waits for a worker pool that is being rebuilt.
    pub pool_swap: Duration,
}

impl Default for JobTimeouts {
    fn default() -> Self {
        Self {
            query: Duration::from_secs(120),
            broadcast: Duration::from_secs(30),
            pool_swap: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Recommended addresses with no registered signer.
    pub skipped: Vec<String>,
    pub tasks: GroupReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    QueryFailed,
    NoUpdateNeeded,
    DryRun,
    Dispatched(DispatchReport),
}

/// One scheduled evaluation: ask what to stake, then stake it.
pub struct EvaluationJob {
    resources: Arc<Resources>,
    timeouts: JobTimeouts,
}

impl EvaluationJob {
    pub fn new(resources: Arc<Resources>) -> Self {
        Self::with_timeouts(resources, JobTimeouts::default())
    }

    pub fn with_timeouts(resources: Arc<Resources>, timeouts: JobTimeouts) -> Self {
        Self {
            resources,
            timeouts,
        }
    }

    /// Wrap the job for the [`Scheduler`](crate::schedule::Scheduler).
    pub fn into_job_fn(self) -> JobFn {
        let job = Arc::new(self);
        Arc::new(move || {
            let job = Arc::clone(&job);
            async move {
                job.run().await;
            }
            .boxed()
        })
    }

    /// Run once against the current resources. Never fails: every problem
    /// is logged and reflected in the outcome.
    pub async fn run(&self) -> RunOutcome {
        let cfg = self.resources.config();
        let service = self.resources.recommendation();
        let request = WtsRequest::from(cfg.as_ref());

        debug!("querying what-to-stake");
        let response =
            match tokio::time::timeout(self.timeouts.query, service.what_to_stake(&request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    error!(error = %error_chain(&e), "what-to-stake query failed");
                    return RunOutcome::QueryFailed;
                }
                Err(_) => {
                    error!(timeout_ms = self.timeouts.query.as_millis() as u64, "what-to-stake query timed out");
                    return RunOutcome::QueryFailed;
                }
            };

        if let Some(dir) = cfg.results_dir(self.resources.project_root()) {
            match io::write_result(&dir, Utc::now(), &response.raw) {
                Ok(path) => debug!(path = %path.display(), "results saved"),
                Err(e) => warn!(error = %error_chain(&e), dir = %dir.display(), "failed to save results"),
            }
        }

        if cfg.dry_mode {
            info!(
                do_update = response.do_update,
                servicers = response.servicers.len(),
                "dry mode enabled, skipping stake"
            );
            return RunOutcome::DryRun;
        }
        if !response.do_update {
            info!("no update needed");
            return RunOutcome::NoUpdateNeeded;
        }

        let params = TxParams {
            network_id: cfg.network_id.clone(),
            // Validated to be a positive integer on load.
            fee: cfg.tx_fee.amount().unwrap_or_default(),
            memo: cfg.tx_memo.clone(),
        };
        let rpc = self.resources.rpc();
        let mut skipped = Vec::new();
        let mut queue = VecDeque::new();
        for servicer in response.servicers {
            let Some(signer) = self.resources.signers().find(&servicer.address) else {
                warn!(address = %servicer.address, "no signer for recommended servicer, skipping");
                skipped.push(servicer.address);
                continue;
            };
            queue.push_back(StakeTask {
                signer,
                services: servicer.services,
                rpc: Arc::clone(&rpc),
                params: params.clone(),
                broadcast_timeout: self.timeouts.broadcast,
            });
        }

        let tasks = self.dispatch(queue).await;
        info!(
            submitted = tasks.submitted,
            succeeded = tasks.succeeded,
            failed = tasks.failed + tasks.panicked,
            skipped = skipped.len(),
            "evaluation finished"
        );
        RunOutcome::Dispatched(DispatchReport { skipped, tasks })
    }

    /// Submit every task and wait for all of them. A pool stopped for a
    /// rebuild refuses submits; the rest of the batch goes to its
    /// replacement once published.
    async fn dispatch(&self, mut queue: VecDeque<StakeTask>) -> GroupReport {
        let mut report = GroupReport::default();
        let mut pool = self.resources.pool();
        loop {
            let group = pool.group();
            while let Some(task) = queue.pop_front() {
                if let Err(e) = group.submit(task.clone().run()).await {
                    debug!(error = %e, address = %task.signer.address(), "worker pool refused task");
                    queue.push_front(task);
                    break;
                }
            }
            report += group.wait().await;
            if queue.is_empty() {
                return report;
            }

            info!(remaining = queue.len(), "worker pool is being rebuilt, waiting for the replacement");
            match self.resources.accepting_pool(self.timeouts.pool_swap).await {
                Some(next) => pool = next,
                None => {
                    let dropped: Vec<String> =
                        queue.iter().map(|t| t.signer.address().to_string()).collect();
                    error!(
                        waited_ms = self.timeouts.pool_swap.as_millis() as u64,
                        dropped = ?dropped,
                        "no worker pool accepting work, stake tasks not submitted"
                    );
                    return report;
                }
            }
        }
    }
}
