//! In-memory collaborators for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use pocket_client::key::private_key_from_seed;
use pocket_client::{HttpClient, Node, NodeRpc, PocketError, Signer, TxReceipt};
use serde_json::Value;
use tracing::level_filters::LevelFilter;

use crate::config::Config;
use crate::error::{Result, WtscError};
use crate::logging::{LogControl, LogFormat};
use crate::pool::WorkerPool;
use crate::resources::{DefaultFactory, ResourceFactory};
use crate::wts::{RecommendationService, WtsRequest, WtsResponse};

pub(crate) fn address_of(seed: u8) -> String {
    Signer::from_private_key(&private_key_from_seed([seed; 32]))
        .unwrap()
        .address()
        .to_string()
}

// ---------------------------------------------------------------------------
// FakeRpc
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct FakeRpc {
    no_nodes: bool,
    code: u32,
    delay: Duration,
    broadcasts: Mutex<Vec<(String, String)>>,
}

impl FakeRpc {
    pub(crate) fn without_nodes(mut self) -> Self {
        self.no_nodes = true;
        self
    }

    pub(crate) fn with_code(mut self, code: u32) -> Self {
        self.code = code;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `(address, raw_hex)` of every broadcast so far.
    pub(crate) fn broadcasts(&self) -> Vec<(String, String)> {
        self.broadcasts.lock().unwrap().clone()
    }
}

impl NodeRpc for FakeRpc {
    fn get_node<'a>(&'a self, address: &'a str) -> BoxFuture<'a, pocket_client::Result<Node>> {
        async move {
            if self.no_nodes {
                return Err(PocketError::Status {
                    url: "fake://v1/query/node".into(),
                    status: 404,
                    body: "node not found".into(),
                });
            }
            Ok(Node {
                address: address.to_string(),
                public_key: String::new(),
                chains: vec!["0001".into()],
                service_url: "https://node.example.com:443".into(),
                tokens: "15000000000".into(),
                output_address: "0b6e5bd3a8e5a7a3d3bd8d2e0b2f3e0dcf4b5a11".into(),
                jailed: false,
                status: 2,
            })
        }
        .boxed()
    }

    fn send_raw_tx<'a>(
        &'a self,
        address: &'a str,
        raw_hex: &'a str,
    ) -> BoxFuture<'a, pocket_client::Result<TxReceipt>> {
        async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut sent = self.broadcasts.lock().unwrap();
            sent.push((address.to_string(), raw_hex.to_string()));
            Ok(TxReceipt {
                height: "0".into(),
                txhash: format!("{:064X}", sent.len()),
                code: self.code,
                raw_log: String::new(),
            })
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// FakeWts
// ---------------------------------------------------------------------------

pub(crate) struct FakeWts {
    reply: Option<Value>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeWts {
    pub(crate) fn returning(reply: Value) -> Self {
        Self {
            reply: Some(reply),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            reply: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RecommendationService for FakeWts {
    fn what_to_stake<'a>(&'a self, _request: &'a WtsRequest) -> BoxFuture<'a, Result<WtsResponse>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.reply {
                Some(reply) => WtsResponse::from_value(reply.clone()),
                None => Err(WtscError::Recommendation("service unavailable".into())),
            }
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// CountingFactory
// ---------------------------------------------------------------------------

/// Hands out the shared fakes and counts every build, by kind.
pub(crate) struct CountingFactory {
    pub(crate) rpc: Arc<FakeRpc>,
    pub(crate) wts: Arc<FakeWts>,
    pub(crate) http_builds: AtomicUsize,
    pub(crate) rpc_builds: AtomicUsize,
    pub(crate) wts_builds: AtomicUsize,
    pub(crate) pool_builds: AtomicUsize,
}

impl CountingFactory {
    pub(crate) fn new(rpc: Arc<FakeRpc>, wts: Arc<FakeWts>) -> Self {
        Self {
            rpc,
            wts,
            http_builds: AtomicUsize::new(0),
            rpc_builds: AtomicUsize::new(0),
            wts_builds: AtomicUsize::new(0),
            pool_builds: AtomicUsize::new(0),
        }
    }

    /// `[http, rpc, recommendation, pool]` build counts.
    pub(crate) fn counts(&self) -> [usize; 4] {
        [
            self.http_builds.load(Ordering::SeqCst),
            self.rpc_builds.load(Ordering::SeqCst),
            self.wts_builds.load(Ordering::SeqCst),
            self.pool_builds.load(Ordering::SeqCst),
        ]
    }
}

impl ResourceFactory for CountingFactory {
    fn http_client(&self, cfg: &Config) -> Result<Arc<HttpClient>> {
        self.http_builds.fetch_add(1, Ordering::SeqCst);
        DefaultFactory.http_client(cfg)
    }

    fn pocket_rpc(&self, _cfg: &Config) -> Result<Arc<dyn NodeRpc>> {
        self.rpc_builds.fetch_add(1, Ordering::SeqCst);
        let rpc: Arc<dyn NodeRpc> = self.rpc.clone();
        Ok(rpc)
    }

    fn recommendation(
        &self,
        _cfg: &Config,
        _http: Arc<HttpClient>,
    ) -> Result<Arc<dyn RecommendationService>> {
        self.wts_builds.fetch_add(1, Ordering::SeqCst);
        let wts: Arc<dyn RecommendationService> = self.wts.clone();
        Ok(wts)
    }

    fn worker_pool(&self, cfg: &Config) -> WorkerPool {
        self.pool_builds.fetch_add(1, Ordering::SeqCst);
        WorkerPool::new(cfg.max_workers, cfg.servicer_keys.len())
    }
}

// ---------------------------------------------------------------------------
// RecordingLogger
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct RecordingLogger {
    calls: Mutex<Vec<(LevelFilter, LogFormat)>>,
}

impl RecordingLogger {
    pub(crate) fn calls(&self) -> Vec<(LevelFilter, LogFormat)> {
        self.calls.lock().unwrap().clone()
    }
}

impl LogControl for RecordingLogger {
    fn reconfigure(&self, level: LevelFilter, format: LogFormat) -> Result<()> {
        self.calls.lock().unwrap().push((level, format));
        Ok(())
    }
}
