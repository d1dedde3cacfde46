use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use pocket_client::HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{Result, WtscError};

const WHAT_TO_STAKE_QUERY: &str = "query WhatToStake($input: WhatToStakeInput!) {
  whatToStake(input: $input) {
    do_update
    servicers {
      address
      services
    }
  }
}";

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinServiceNodes {
    pub service: String,
    pub min_nodes: u32,
}

/// Policy knobs sent to the recommendation service on each run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WtsRequest {
    pub domain: String,
    pub service_pool: Vec<String>,
    pub stake_weight: u32,
    pub min_increase_percent: f64,
    pub min_service_stake: Vec<MinServiceNodes>,
    pub time_period: u32,
}

impl From<&Config> for WtsRequest {
    fn from(cfg: &Config) -> Self {
        Self {
            domain: cfg.domain.clone(),
            service_pool: cfg.service_pool.clone(),
            stake_weight: cfg.stake_weight,
            min_increase_percent: cfg.min_increase_percent,
            min_service_stake: cfg
                .min_service_stake
                .iter()
                .map(|s| MinServiceNodes {
                    service: s.service.clone(),
                    min_nodes: s.min_node,
                })
                .collect(),
            time_period: cfg.time_period,
        }
    }
}

/// One recommended servicer and the services it should be staked on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WtsServicer {
    pub address: String,
    #[serde(alias = "chains", default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WtsResponse {
    pub do_update: bool,
    pub servicers: Vec<WtsServicer>,
    /// The result exactly as received, for persistence.
    pub raw: Value,
}

impl WtsResponse {
    pub fn from_value(raw: Value) -> Result<Self> {
        #[derive(Deserialize)]
        struct Shape {
            #[serde(default)]
            do_update: bool,
            #[serde(default)]
            servicers: Vec<WtsServicer>,
        }
        let shape: Shape = serde_json::from_value(raw.clone())?;
        Ok(Self {
            do_update: shape.do_update,
            servicers: shape.servicers,
            raw,
        })
    }
}

/// Source of stake recommendations.
pub trait RecommendationService: Send + Sync {
    fn what_to_stake<'a>(&'a self, request: &'a WtsRequest) -> BoxFuture<'a, Result<WtsResponse>>;
}

// ---------------------------------------------------------------------------
// PoktscanClient
// ---------------------------------------------------------------------------

/// [`RecommendationService`] backed by the POKTscan GraphQL API.
#[derive(Debug, Clone)]
pub struct PoktscanClient {
    url: String,
    http: Arc<HttpClient>,
}

impl PoktscanClient {
    pub fn new(url: &str, http: Arc<HttpClient>) -> Self {
        Self {
            url: url.to_string(),
            http,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RecommendationService for PoktscanClient {
    fn what_to_stake<'a>(&'a self, request: &'a WtsRequest) -> BoxFuture<'a, Result<WtsResponse>> {
        async move {
            let body = json!({
                "query": WHAT_TO_STAKE_QUERY,
                "variables": { "input": request },
            });
            let mut reply: Value = self.http.post_for(&self.url, &body).await?;

            if let Some(errors) = reply.get("errors").and_then(Value::as_array) {
                if !errors.is_empty() {
                    let messages: Vec<&str> = errors
                        .iter()
                        .map(|e| e.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
                        .collect();
                    return Err(WtscError::Recommendation(messages.join("; ")));
                }
            }
            match reply.pointer_mut("/data/whatToStake").map(Value::take) {
                Some(result) if !result.is_null() => WtsResponse::from_value(result),
                _ => Err(WtscError::Recommendation(
                    "response has no data.whatToStake".into(),
                )),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::valid_config;
    use mockito::Matcher;
    use pocket_client::RetryPolicy;
    use std::time::Duration;

    fn client(server: &mockito::ServerGuard) -> PoktscanClient {
        let http = HttpClient::new(
            Some("secret"),
            RetryPolicy::new(0),
            Duration::from_secs(5),
        )
        .unwrap();
        PoktscanClient::new(&format!("{}/graphql", server.url()), Arc::new(http))
    }

    #[test]
    fn request_is_built_from_config() {
        let req = WtsRequest::from(&valid_config());
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["domain"], "nodes.example.com");
        assert_eq!(value["min_service_stake"][0]["min_nodes"], 2);
        assert_eq!(value["service_pool"], json!(["0001", "0021"]));
    }

    #[tokio::test]
    async fn parses_recommendation() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .match_header("authorization", "secret")
            .match_body(Matcher::PartialJson(json!({
                "variables": {"input": {"domain": "nodes.example.com", "time_period": 24}}
            })))
            .with_status(200)
            .with_body(
                r#"{"data":{"whatToStake":{"do_update":true,"servicers":[{"address":"aa","services":["0001","0021"]}]}}}"#,
            )
            .create_async()
            .await;

        let req = WtsRequest::from(&valid_config());
        let resp = client(&server).what_to_stake(&req).await.unwrap();
        assert!(resp.do_update);
        assert_eq!(resp.servicers.len(), 1);
        assert_eq!(resp.servicers[0].services, vec!["0001", "0021"]);
        assert_eq!(resp.raw["servicers"][0]["address"], "aa");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn graphql_errors_fail_the_call() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"data":null,"errors":[{"message":"domain not found"}]}"#)
            .create_async()
            .await;

        let req = WtsRequest::from(&valid_config());
        let err = client(&server).what_to_stake(&req).await.unwrap_err();
        assert!(err.to_string().contains("domain not found"));
    }

    #[tokio::test]
    async fn missing_result_fails_the_call() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"data":{}}"#)
            .create_async()
            .await;

        let req = WtsRequest::from(&valid_config());
        assert!(matches!(
            client(&server).what_to_stake(&req).await,
            Err(WtscError::Recommendation(_))
        ));
    }
}
