//! Periodic config reload.
//!
//! Each tick re-reads the config file. Fields without a dependent resource
//! take effect on the next run; the rest go through the steps below, in
//! order. A step that is deferred or fails leaves its keys at the old value
//! in the live config, so the same diff comes up again next tick.
//!
//! | step           | keys                                          |
//! |----------------|-----------------------------------------------|
//! | signers        | `servicer_keys`                               |
//! | worker pool    | `max_workers` (deferred while tasks wait)     |
//! | schedule       | `schedule` (deferred while tasks wait)        |
//! | logger         | `log_level`, `log_format`                     |
//! | http client    | `poktscan_api_token`, `max_retries`, `max_timeout` |
//! | pocket rpc     | `pocket_rpc`, `max_retries`, `max_timeout`    |
//! | recommendation | `poktscan_api`, or a rebuilt http client      |

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};

use crate::config::{ChangedKeys, Config, ConfigSource};
use crate::error::{ConfigError, ScheduleError};
use crate::logging::{error_chain, parse_level, LogControl};
use crate::resources::{ResourceFactory, Resources};
use crate::schedule::Scheduler;

pub const DEFAULT_RELOAD_PERIOD: Duration = Duration::from_secs(30);

const SIGNER_KEYS: &[&str] = &["servicer_keys"];
const POOL_KEYS: &[&str] = &["max_workers"];
const SCHEDULE_KEYS: &[&str] = &["schedule"];
const LOGGER_KEYS: &[&str] = &["log_level", "log_format"];
const HTTP_KEYS: &[&str] = &["poktscan_api_token", "max_retries", "max_timeout"];
const RPC_KEYS: &[&str] = &["pocket_rpc", "max_retries", "max_timeout"];
const RECOMMENDATION_KEYS: &[&str] = &["poktscan_api"];

/// Reload period from the `RELOAD_SECONDS` value. Missing, malformed and
/// non-positive values fall back to [`DEFAULT_RELOAD_PERIOD`].
pub fn reload_period(value: Option<&str>) -> Duration {
    match value.map(|v| v.trim().parse::<i64>()) {
        Some(Ok(secs)) if secs > 0 => Duration::from_secs(secs as u64),
        Some(_) => {
            warn!(value = value.unwrap_or_default(), "invalid RELOAD_SECONDS, using default");
            DEFAULT_RELOAD_PERIOD
        }
        None => DEFAULT_RELOAD_PERIOD,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadAction {
    Signers,
    WorkerPool,
    Schedule,
    Logger,
    HttpClient,
    PocketRpc,
    Recommendation,
}

impl fmt::Display for ReloadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReloadAction::Signers => "signers",
            ReloadAction::WorkerPool => "worker_pool",
            ReloadAction::Schedule => "schedule",
            ReloadAction::Logger => "logger",
            ReloadAction::HttpClient => "http_client",
            ReloadAction::PocketRpc => "pocket_rpc",
            ReloadAction::Recommendation => "recommendation",
        })
    }
}

/// What one reload did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub changed: ChangedKeys,
    pub applied: Vec<ReloadAction>,
    /// Skipped because the worker pool had waiting tasks.
    pub deferred: Vec<ReloadAction>,
    pub failed: Vec<ReloadAction>,
}

impl ReloadReport {
    fn outcome(
        &mut self,
        action: ReloadAction,
        held: &mut Vec<&'static str>,
        keys: &[&'static str],
        result: Step,
    ) {
        match result {
            Step::Applied => self.applied.push(action),
            Step::Deferred => {
                self.deferred.push(action);
                held.extend_from_slice(keys);
            }
            Step::Failed => {
                self.failed.push(action);
                held.extend_from_slice(keys);
            }
        }
    }
}

enum Step {
    Applied,
    Deferred,
    Failed,
}

// ---------------------------------------------------------------------------
// ReloadCoordinator
// ---------------------------------------------------------------------------

/// Sole writer of [`Resources`] after startup.
pub struct ReloadCoordinator {
    source: ConfigSource,
    resources: Arc<Resources>,
    factory: Arc<dyn ResourceFactory>,
    scheduler: Scheduler,
    logger: Arc<dyn LogControl>,
    live: Config,
}

impl ReloadCoordinator {
    pub fn new(
        source: ConfigSource,
        resources: Arc<Resources>,
        factory: Arc<dyn ResourceFactory>,
        scheduler: Scheduler,
        logger: Arc<dyn LogControl>,
    ) -> Self {
        let live = resources.config().as_ref().clone();
        Self {
            source,
            resources,
            factory,
            scheduler,
            logger,
            live,
        }
    }

    /// The config currently in effect.
    pub fn live(&self) -> &Config {
        &self.live
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Re-read the config source and apply it. An unreadable or invalid
    /// file is returned as an error and nothing is changed.
    pub async fn reload(&mut self) -> Result<ReloadReport, ConfigError> {
        let next = self.source.load()?;
        Ok(self.apply(next).await)
    }

    /// Apply a validated config.
    pub async fn apply(&mut self, next: Config) -> ReloadReport {
        let changed = self.live.diff(&next);
        let mut report = ReloadReport {
            changed: changed.clone(),
            ..Default::default()
        };
        if changed.is_empty() {
            debug!("config unchanged");
            return report;
        }
        info!(keys = ?changed.as_slice(), "config changed");

        let mut held: Vec<&'static str> = Vec::new();

        if changed.contains_any(SIGNER_KEYS) {
            let step = self.apply_signers(&next);
            report.outcome(ReloadAction::Signers, &mut held, SIGNER_KEYS, step);
        }

        if changed.contains_any(POOL_KEYS) {
            let step = self.apply_pool(&next, &held).await;
            report.outcome(ReloadAction::WorkerPool, &mut held, POOL_KEYS, step);
        }

        if changed.contains_any(SCHEDULE_KEYS) {
            let step = self.apply_schedule(&next);
            report.outcome(ReloadAction::Schedule, &mut held, SCHEDULE_KEYS, step);
        }

        if changed.contains_any(LOGGER_KEYS) {
            let step = self.apply_logger(&next);
            report.outcome(ReloadAction::Logger, &mut held, LOGGER_KEYS, step);
        }

        let mut http_rebuilt = false;
        if changed.contains_any(HTTP_KEYS) {
            let candidate = self.candidate(&next, HTTP_KEYS);
            let step = match self.factory.http_client(&candidate) {
                Ok(http) => {
                    self.resources.replace_http(http);
                    http_rebuilt = true;
                    info!("http client rebuilt");
                    Step::Applied
                }
                Err(e) => {
                    error!(error = %error_chain(&e), "failed to rebuild http client");
                    Step::Failed
                }
            };
            report.outcome(ReloadAction::HttpClient, &mut held, HTTP_KEYS, step);
        }

        if changed.contains_any(RPC_KEYS) {
            let candidate = self.candidate(&next, RPC_KEYS);
            let step = match self.factory.pocket_rpc(&candidate) {
                Ok(rpc) => {
                    self.resources.replace_rpc(rpc);
                    info!(url = %candidate.pocket_rpc, "pocket rpc client rebuilt");
                    Step::Applied
                }
                Err(e) => {
                    error!(error = %error_chain(&e), "failed to rebuild pocket rpc client");
                    Step::Failed
                }
            };
            report.outcome(ReloadAction::PocketRpc, &mut held, RPC_KEYS, step);
        }

        if http_rebuilt || changed.contains_any(RECOMMENDATION_KEYS) {
            let candidate = self.candidate(&next, RECOMMENDATION_KEYS);
            let step = match self
                .factory
                .recommendation(&candidate, self.resources.http())
            {
                Ok(client) => {
                    self.resources.replace_recommendation(client);
                    info!(url = %candidate.poktscan_api, "recommendation client rebuilt");
                    Step::Applied
                }
                Err(e) => {
                    error!(error = %error_chain(&e), "failed to rebuild recommendation client");
                    Step::Failed
                }
            };
            // A failure here also holds back the http keys so both steps rerun.
            let keys: Vec<&'static str> = if http_rebuilt {
                RECOMMENDATION_KEYS.iter().chain(HTTP_KEYS).copied().collect()
            } else {
                RECOMMENDATION_KEYS.to_vec()
            };
            report.outcome(ReloadAction::Recommendation, &mut held, &keys, step);
        }

        for key in changed.iter().filter(|k| !held.contains(k)) {
            self.live.apply_field(&next, key);
        }
        self.resources.publish_config(self.live.clone());

        info!(
            applied = ?report.applied,
            deferred = ?report.deferred,
            failed = ?report.failed,
            "config reloaded"
        );
        report
    }

    /// Reload every `period` until `shutdown` resolves. Returns an error,
    /// leaving the loop, when the config file becomes unreadable or invalid.
    pub async fn run<F>(&mut self, period: Duration, shutdown: F) -> Result<(), ConfigError>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!(period_secs = period.as_secs(), "config reload loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.reload().await?;
                }
            }
        }
    }

    /// Stop scheduling new runs, then drain the worker pool.
    pub async fn shutdown(&mut self) {
        self.scheduler.stop();
        info!("scheduler stopped, waiting for worker pool");
        self.resources.pool().stop_and_wait().await;
        info!("worker pool drained");
    }

    /// The live config with `keys` taken from `next`.
    fn candidate(&self, next: &Config, keys: &[&str]) -> Config {
        let mut candidate = self.live.clone();
        for key in keys {
            candidate.apply_field(next, key);
        }
        candidate
    }

    fn apply_signers(&self, next: &Config) -> Step {
        match self.resources.signers().reconcile(&next.servicer_keys) {
            Ok(_) => Step::Applied,
            Err(e) => {
                error!(error = %error_chain(&e), index = e.index, "servicer keys not applied");
                Step::Failed
            }
        }
    }

    async fn apply_pool(&self, next: &Config, held: &[&str]) -> Step {
        let pool = self.resources.pool();
        let waiting = pool.waiting_tasks();
        if waiting > 0 {
            warn!(waiting, "worker pool busy, deferring max_workers change");
            return Step::Deferred;
        }

        let mut keys = POOL_KEYS.to_vec();
        if !held.contains(&"servicer_keys") {
            keys.extend_from_slice(SIGNER_KEYS);
        }
        let candidate = self.candidate(next, &keys);
        pool.stop_and_wait().await;
        let replacement = self.factory.worker_pool(&candidate);
        info!(
            max_workers = replacement.max_workers(),
            queue = replacement.max_capacity(),
            "worker pool rebuilt"
        );
        self.resources.replace_pool(replacement);
        Step::Applied
    }

    fn apply_schedule(&mut self, next: &Config) -> Step {
        match self
            .scheduler
            .reschedule(&next.schedule, &self.resources.pool())
        {
            Ok(_) => Step::Applied,
            Err(e @ ScheduleError::Busy { .. }) => {
                warn!(error = %e, "deferring schedule change");
                Step::Deferred
            }
            Err(e) => {
                error!(error = %e, "schedule not applied");
                Step::Failed
            }
        }
    }

    fn apply_logger(&self, next: &Config) -> Step {
        let level = parse_level(&next.log_level).unwrap_or(LevelFilter::INFO);
        match self.logger.reconfigure(level, next.log_format()) {
            Ok(()) => {
                info!(level = %level, format = %next.log_format(), "logger reconfigured");
                Step::Applied
            }
            Err(e) => {
                error!(error = %e, "logger not reconfigured");
                Step::Failed
            }
        }
    }
}
