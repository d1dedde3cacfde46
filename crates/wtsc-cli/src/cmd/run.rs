use std::future::Future;
use std::sync::Arc;

use tracing::info;
use tracing::level_filters::LevelFilter;
use wtsc_core::logging::parse_level;
use wtsc_core::{
    reload_period, ConfigSource, DefaultFactory, EvaluationJob, LogControl, LogFormat,
    ReloadCoordinator, Resources, Scheduler,
};

use super::log_config_error;
use crate::logger::Logger;

pub fn run(source: ConfigSource, reload_seconds: Option<String>) -> anyhow::Result<()> {
    let logger = Arc::new(Logger::init(LevelFilter::INFO, LogFormat::Text)?);
    info!(
        version = %std::env::var("VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").into()),
        "starting what-to-stake consumer"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve(source, reload_seconds, logger))
}

async fn serve(
    source: ConfigSource,
    reload_seconds: Option<String>,
    logger: Arc<Logger>,
) -> anyhow::Result<()> {
    let cfg = source.load().inspect_err(log_config_error)?;
    logger.reconfigure(
        parse_level(&cfg.log_level).unwrap_or(LevelFilter::INFO),
        cfg.log_format(),
    )?;

    let factory = Arc::new(DefaultFactory);
    let resources = Arc::new(Resources::build(
        cfg.clone(),
        source.project_root(),
        factory.as_ref(),
    )?);
    if cfg.dry_mode {
        info!("dry mode enabled, transactions will not be broadcast");
    }

    let mut scheduler = Scheduler::new(EvaluationJob::new(Arc::clone(&resources)).into_job_fn());
    scheduler.schedule(&cfg.schedule)?;
    info!(schedule = %cfg.schedule, "scheduler started");

    let mut coordinator = ReloadCoordinator::new(source, resources, factory, scheduler, logger);
    let outcome = coordinator
        .run(reload_period(reload_seconds.as_deref()), shutdown_signal())
        .await;
    if let Err(e) = &outcome {
        log_config_error(e);
    }
    coordinator.shutdown().await;

    info!("stopped");
    Ok(outcome?)
}

/// Resolves on SIGINT or, on unix, SIGTERM. The SIGTERM handler is
/// installed when this is called, not on first poll.
fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());

    async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "unable to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match terminate {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unable to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
    }
}
