//! The live, config-dependent resources shared by the scheduled job and the
//! reload loop.
//!
//! Consumers take a snapshot (an `Arc` or a pool handle) per use. Only the
//! reload path swaps members, through the `pub(crate)` setters.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use pocket_client::{HttpClient, NodeRpc, PocketRpc, RetryPolicy};
use tokio::sync::Notify;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::registry::SignerRegistry;
use crate::wts::{PoktscanClient, RecommendationService};

// ---------------------------------------------------------------------------
// ResourceFactory
// ---------------------------------------------------------------------------

/// Builds each resource from its slice of the config.
pub trait ResourceFactory: Send + Sync {
    /// Authenticated client for the recommendation service.
    fn http_client(&self, cfg: &Config) -> Result<Arc<HttpClient>>;

    fn pocket_rpc(&self, cfg: &Config) -> Result<Arc<dyn NodeRpc>>;

    fn recommendation(
        &self,
        cfg: &Config,
        http: Arc<HttpClient>,
    ) -> Result<Arc<dyn RecommendationService>>;

    /// Sized to `max_workers` with one queue slot per servicer key.
    fn worker_pool(&self, cfg: &Config) -> WorkerPool {
        WorkerPool::new(cfg.max_workers, cfg.servicer_keys.len())
    }
}

/// Production factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFactory;

impl ResourceFactory for DefaultFactory {
    fn http_client(&self, cfg: &Config) -> Result<Arc<HttpClient>> {
        let client = HttpClient::new(
            Some(cfg.poktscan_api_token.as_str()),
            RetryPolicy::new(cfg.max_retries),
            cfg.timeout(),
        )?;
        Ok(Arc::new(client))
    }

    fn pocket_rpc(&self, cfg: &Config) -> Result<Arc<dyn NodeRpc>> {
        let rpc = PocketRpc::new(&cfg.pocket_rpc, cfg.max_retries, cfg.timeout())?;
        Ok(Arc::new(rpc))
    }

    fn recommendation(
        &self,
        cfg: &Config,
        http: Arc<HttpClient>,
    ) -> Result<Arc<dyn RecommendationService>> {
        Ok(Arc::new(PoktscanClient::new(&cfg.poktscan_api, http)))
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

pub struct Resources {
    project_root: PathBuf,
    config: RwLock<Arc<Config>>,
    http: RwLock<Arc<HttpClient>>,
    rpc: RwLock<Arc<dyn NodeRpc>>,
    recommendation: RwLock<Arc<dyn RecommendationService>>,
    pool: RwLock<WorkerPool>,
    pool_replaced: Notify,
    signers: SignerRegistry,
}

impl Resources {
    /// Build every resource from a validated config. Signer derivation
    /// failures are returned, not logged.
    pub fn build(cfg: Config, project_root: &Path, factory: &dyn ResourceFactory) -> Result<Self> {
        let signers = SignerRegistry::new();
        signers.reconcile(&cfg.servicer_keys)?;

        let http = factory.http_client(&cfg)?;
        let rpc = factory.pocket_rpc(&cfg)?;
        let recommendation = factory.recommendation(&cfg, Arc::clone(&http))?;
        let pool = factory.worker_pool(&cfg);
        info!(
            signers = signers.len(),
            max_workers = pool.max_workers(),
            queue = pool.max_capacity(),
            "resources ready"
        );

        Ok(Self {
            project_root: project_root.to_path_buf(),
            config: RwLock::new(Arc::new(cfg)),
            http: RwLock::new(http),
            rpc: RwLock::new(rpc),
            recommendation: RwLock::new(recommendation),
            pool: RwLock::new(pool),
            pool_replaced: Notify::new(),
            signers,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn config(&self) -> Arc<Config> {
        load(&self.config)
    }

    pub fn http(&self) -> Arc<HttpClient> {
        load(&self.http)
    }

    pub fn rpc(&self) -> Arc<dyn NodeRpc> {
        load(&self.rpc)
    }

    pub fn recommendation(&self) -> Arc<dyn RecommendationService> {
        load(&self.recommendation)
    }

    pub fn pool(&self) -> WorkerPool {
        load(&self.pool)
    }

    /// The current pool once it accepts work. A pool being rebuilt is
    /// stopped until its replacement is published; gives up after `limit`.
    pub async fn accepting_pool(&self, limit: Duration) -> Option<WorkerPool> {
        let wait = async {
            loop {
                let replaced = self.pool_replaced.notified();
                tokio::pin!(replaced);
                replaced.as_mut().enable();
                let pool = self.pool();
                if !pool.is_stopped() {
                    return pool;
                }
                replaced.await;
            }
        };
        tokio::time::timeout(limit, wait).await.ok()
    }

    pub fn signers(&self) -> &SignerRegistry {
        &self.signers
    }

    pub(crate) fn publish_config(&self, cfg: Config) {
        store(&self.config, Arc::new(cfg));
    }

    pub(crate) fn replace_http(&self, http: Arc<HttpClient>) {
        store(&self.http, http);
    }

    pub(crate) fn replace_rpc(&self, rpc: Arc<dyn NodeRpc>) {
        store(&self.rpc, rpc);
    }

    pub(crate) fn replace_recommendation(&self, recommendation: Arc<dyn RecommendationService>) {
        store(&self.recommendation, recommendation);
    }

    pub(crate) fn replace_pool(&self, pool: WorkerPool) {
        store(&self.pool, pool);
        self.pool_replaced.notify_waiters();
    }
}

fn load<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn store<T>(lock: &RwLock<T>, value: T) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_config;
    use crate::error::WtscError;

    #[tokio::test]
    async fn builds_from_config() {
        let cfg = valid_config();
        let res = Resources::build(cfg.clone(), Path::new("."), &DefaultFactory).unwrap();
        assert_eq!(res.signers().len(), 2);
        assert_eq!(res.pool().max_workers(), 2);
        assert_eq!(res.pool().max_capacity(), 2);
        assert_eq!(*res.config(), cfg);
        assert_eq!(res.http().timeout(), cfg.timeout());
    }

    #[tokio::test]
    async fn bad_key_fails_construction() {
        let mut cfg = valid_config();
        cfg.servicer_keys[1] = "ab".repeat(64);
        let err = Resources::build(cfg, Path::new("."), &DefaultFactory).err().unwrap();
        assert!(matches!(err, WtscError::Registry(ref e) if e.index == 1));
    }

    #[tokio::test]
    async fn snapshots_survive_replacement() {
        let res = Resources::build(valid_config(), Path::new("."), &DefaultFactory).unwrap();
        let before = res.pool();
        res.replace_pool(WorkerPool::new(7, 2));
        assert_eq!(before.max_workers(), 2);
        assert_eq!(res.pool().max_workers(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn accepting_pool_waits_for_the_replacement() {
        let res = Arc::new(Resources::build(valid_config(), Path::new("."), &DefaultFactory).unwrap());
        res.pool().stop_and_wait().await;
        assert!(res.pool().is_stopped());

        let publisher = Arc::clone(&res);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            publisher.replace_pool(WorkerPool::new(3, 2));
        });
        let pool = res.accepting_pool(Duration::from_secs(10)).await.unwrap();
        assert_eq!(pool.max_workers(), 3);
        assert!(!pool.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn accepting_pool_gives_up_without_a_replacement() {
        let res = Resources::build(valid_config(), Path::new("."), &DefaultFactory).unwrap();
        res.pool().stop_and_wait().await;
        assert!(res.accepting_pool(Duration::from_secs(5)).await.is_none());
    }
}
