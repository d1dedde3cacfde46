//! Engine of the what-to-stake consumer.
//!
//! ```text
//! Scheduler ──fires──▶ EvaluationJob ──query──▶ RecommendationService
//!                           │
//!                           └──Group──▶ WorkerPool ──▶ StakeTask ──▶ NodeRpc
//!
//! ReloadCoordinator ──reads──▶ ConfigSource
//!        └──rebuilds──▶ Resources (http, rpc, recommendation, pool, signers)
//! ```
//!
//! [`Resources`] is the single owner of everything that depends on
//! configuration. The job reads from it; only the [`ReloadCoordinator`]
//! writes to it.

pub mod config;
pub mod error;
pub mod io;
pub mod job;
pub mod logging;
pub mod pool;
pub mod registry;
pub mod reload;
pub mod resources;
pub mod schedule;
pub mod stake;
pub mod validate;
pub mod wts;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ChangedKeys, Config, ConfigSource};
pub use error::{ConfigError, PoolError, RegistryError, Result, ScheduleError, WtscError};
pub use job::{EvaluationJob, RunOutcome};
pub use logging::{LogControl, LogFormat};
pub use pool::{Group, GroupReport, WorkerPool};
pub use registry::SignerRegistry;
pub use reload::{reload_period, ReloadAction, ReloadCoordinator, ReloadReport};
pub use resources::{DefaultFactory, ResourceFactory, Resources};
pub use schedule::{Recurrence, Scheduler};
pub use wts::{PoktscanClient, RecommendationService};
