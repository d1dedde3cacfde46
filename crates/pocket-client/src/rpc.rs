use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;

use crate::http::{HttpClient, RetryPolicy};
use crate::types::{Node, TxReceipt};
use crate::Result;

/// The two Pocket RPC calls a stake submission needs.
///
/// Object-safe so the engine can hold an `Arc<dyn NodeRpc>` and tests can
/// substitute an in-memory fake.
pub trait NodeRpc: Send + Sync {
    /// Current node record at the latest height.
    fn get_node<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Node>>;

    /// Broadcast a signed, hex-encoded transaction.
    fn send_raw_tx<'a>(&'a self, address: &'a str, raw_hex: &'a str)
        -> BoxFuture<'a, Result<TxReceipt>>;
}

// ─── PocketRpc ────────────────────────────────────────────────────────────

/// [`NodeRpc`] over the node's HTTP JSON API.
#[derive(Debug, Clone)]
pub struct PocketRpc {
    base_url: String,
    http: HttpClient,
}

impl PocketRpc {
    /// Connect to `base_url` without credentials, using `max_retries` and a
    /// per-request `timeout`.
    pub fn new(base_url: &str, max_retries: u32, timeout: Duration) -> Result<Self> {
        let http = HttpClient::new(None, RetryPolicy::new(max_retries), timeout)?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn with_client(base_url: &str, http: HttpClient) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl NodeRpc for PocketRpc {
    fn get_node<'a>(&'a self, address: &'a str) -> BoxFuture<'a, Result<Node>> {
        async move {
            let body = json!({ "address": address, "height": 0 });
            self.http.post_for(&self.url("/v1/query/node"), &body).await
        }
        .boxed()
    }

    fn send_raw_tx<'a>(
        &'a self,
        address: &'a str,
        raw_hex: &'a str,
    ) -> BoxFuture<'a, Result<TxReceipt>> {
        async move {
            let body = json!({ "address": address, "raw_hex_bytes": raw_hex });
            self.http.post_for(&self.url("/v1/client/rawtx"), &body).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PocketError;
    use mockito::Matcher;

    fn rpc(server: &mockito::ServerGuard) -> PocketRpc {
        let http = HttpClient::new(
            None,
            RetryPolicy::new(1).with_backoff(Duration::from_millis(1), Duration::from_millis(1)),
            Duration::from_secs(5),
        )
        .unwrap();
        PocketRpc::with_client(&format!("{}/", server.url()), http)
    }

    #[tokio::test]
    async fn get_node_queries_latest_height() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/query/node")
            .match_body(Matcher::Json(json!({"address": "abc", "height": 0})))
            .with_status(200)
            .with_body(r#"{"address":"abc","tokens":"15000","service_url":"https://n:443","output_address":"aa"}"#)
            .create_async()
            .await;

        let node = rpc(&server).get_node("abc").await.unwrap();
        assert_eq!(node.staked_tokens().unwrap(), 15_000);
        assert_eq!(node.service_url, "https://n:443");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn send_raw_tx_posts_hex_bytes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/client/rawtx")
            .match_body(Matcher::Json(json!({"address": "abc", "raw_hex_bytes": "deadbeef"})))
            .with_status(200)
            .with_body(r#"{"height":"0","txhash":"F00D","raw_log":""}"#)
            .create_async()
            .await;

        let receipt = rpc(&server).send_raw_tx("abc", "deadbeef").await.unwrap();
        assert_eq!(receipt.txhash, "F00D");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn undecodable_body_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/query/node")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = rpc(&server).get_node("abc").await.unwrap_err();
        assert!(matches!(err, PocketError::Decode { .. }));
    }
}
