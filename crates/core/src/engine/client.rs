//! Remote process execution client.
//!
//! A node's work is delegated to its linked service with a
//! `POST <link>/execution` call. Three completion disciplines are supported:
//! an immediate (sync) response, asynchronous completion pushed through the
//! callback registry, and asynchronous completion discovered by polling the
//! job resource named in the `Location` header.

use crate::engine::registry::CallbackRegistry;
use crate::error::{EngineError, EngineResult};
use crate::types::{ExecutionMode, Node, NodeBody, Outputs};
use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Executes one node's unit of work against its resolved body. The DAG
/// engine schedules through this seam; [`ProcessClient`] is the production
/// implementation.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, node: &Node, body: &NodeBody) -> EngineResult<Outputs>;
}

/// Tunables for remote process execution.
#[derive(Debug, Clone)]
pub struct ProcessClientConfig {
    /// How long a subscriber node waits for its completion callback.
    pub callback_timeout: Duration,
    /// Delay between job status polls in async mode.
    pub poll_interval: Duration,
    /// Ceiling on the poll loop; `None` polls until the job settles.
    pub max_poll_duration: Option<Duration>,
}

impl Default for ProcessClientConfig {
    fn default() -> Self {
        Self {
            callback_timeout: Duration::from_millis(80_000),
            poll_interval: Duration::from_millis(500),
            max_poll_duration: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecutionResponse {
    #[serde(default)]
    outputs: Vec<OutputEntry>,
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    id: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    status: String,
    #[serde(default)]
    outputs: Vec<OutputEntry>,
}

/// Converts `[{id, value}, ...]` into `{id: value, ...}`.
fn normalize(outputs: Vec<OutputEntry>) -> Outputs {
    outputs.into_iter().map(|o| (o.id, o.value)).collect()
}

/// Client that executes a single node by POSTing to its execution URL.
pub struct ProcessClient {
    http: reqwest::Client,
    registry: Arc<CallbackRegistry>,
    config: ProcessClientConfig,
}

impl ProcessClient {
    pub fn new(registry: Arc<CallbackRegistry>, config: ProcessClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            registry,
            config,
        }
    }

    /// Executes the node; returns normalized outputs. Async nodes wait for
    /// a callback when a subscriber is present, otherwise they poll.
    pub async fn execute(&self, node: &Node, body: &NodeBody) -> EngineResult<Outputs> {
        let url = format!("{}/execution", node.link.href.trim_end_matches('/'));
        let mode = node.execution.mode;
        debug!(node = %node.id, %url, ?mode, "dispatching execution request");

        let mut request = self.http.post(&url).json(body);
        if mode == ExecutionMode::Async {
            request = request.header("Prefer", "respond-async");
        }
        let response = request.send().await?;

        if mode == ExecutionMode::Sync {
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(EngineError::RemoteExecution {
                    status: status.as_u16(),
                    body,
                });
            }
            let parsed: ExecutionResponse = response
                .json()
                .await
                .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;
            return Ok(normalize(parsed.outputs));
        }

        if response.status() != StatusCode::ACCEPTED {
            return Err(EngineError::UnexpectedStatus(response.status().as_u16()));
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(EngineError::MissingLocation)?;

        // The job identifier is the final path segment of the job resource.
        let job_id = location
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&location)
            .to_string();

        if body.has_subscriber() {
            info!(node = %node.id, %job_id, "waiting for completion callback");
            let payload = self
                .registry
                .wait_for(&job_id, self.config.callback_timeout)
                .await?;
            let parsed: ExecutionResponse = serde_json::from_value(payload)
                .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;
            return Ok(normalize(parsed.outputs));
        }

        self.poll(&location, &job_id).await
    }

    /// Polls the job resource until the job succeeds, fails or is cancelled.
    /// Unknown statuses keep the loop going, bounded only by the configured
    /// maximum poll duration when one is set.
    async fn poll(&self, job_url: &str, job_id: &str) -> EngineResult<Outputs> {
        let started = tokio::time::Instant::now();
        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            if let Some(limit) = self.config.max_poll_duration {
                if started.elapsed() >= limit {
                    return Err(EngineError::JobTimeout {
                        job_id: job_id.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            }

            let job: JobStatusResponse = self
                .http
                .get(job_url)
                .send()
                .await?
                .json()
                .await
                .map_err(|e| EngineError::MalformedResponse(e.to_string()))?;
            debug!(job_id, status = %job.status, "polled job status");

            match job.status.as_str() {
                "successful" => return Ok(normalize(job.outputs)),
                "failed" | "cancelled" => {
                    return Err(EngineError::JobFailed {
                        job_id: job_id.to_string(),
                        detail: job.status,
                    })
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl NodeExecutor for ProcessClient {
    async fn execute(&self, node: &Node, body: &NodeBody) -> EngineResult<Outputs> {
        ProcessClient::execute(self, node, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_node(href: &str, mode: &str, subscriber: bool) -> Node {
        let mut body = json!({ "inputs": { "x": 1 } });
        if subscriber {
            body["subscriber"] = json!("http://me.test/callback");
        }
        serde_json::from_value(json!({
            "id": "n1",
            "link": { "href": href, "title": "test process" },
            "body": body,
            "execution": { "mode": mode },
        }))
        .unwrap()
    }

    fn fast_config() -> ProcessClientConfig {
        ProcessClientConfig {
            callback_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            max_poll_duration: None,
        }
    }

    fn client(config: ProcessClientConfig) -> (ProcessClient, Arc<CallbackRegistry>) {
        let registry = Arc::new(CallbackRegistry::new());
        (ProcessClient::new(registry.clone(), config), registry)
    }

    #[tokio::test]
    async fn sync_execution_normalizes_outputs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/proc/add/execution"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "outputs": [
                    { "id": "sum", "value": 7 },
                    { "id": "carry", "value": false },
                ],
            })))
            .mount(&server)
            .await;

        let node = test_node(&format!("{}/proc/add", server.uri()), "sync", false);
        let (client, _) = client(fast_config());

        let outputs = client.execute(&node, &node.body).await.unwrap();
        assert_eq!(outputs.get("sum"), Some(&json!(7)));
        assert_eq!(outputs.get("carry"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn sync_failure_carries_the_response_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/proc/add/execution"))
            .respond_with(ResponseTemplate::new(500).set_body_string("out of cheese"))
            .mount(&server)
            .await;

        let node = test_node(&format!("{}/proc/add", server.uri()), "sync", false);
        let (client, _) = client(fast_config());

        let err = client.execute(&node, &node.body).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::RemoteExecution { status: 500, body } if body == "out of cheese"
        ));
    }

    #[tokio::test]
    async fn async_requires_202() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/proc/slow/execution"))
            .and(header("Prefer", "respond-async"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let node = test_node(&format!("{}/proc/slow", server.uri()), "async", false);
        let (client, _) = client(fast_config());

        let err = client.execute(&node, &node.body).await.unwrap_err();
        assert!(matches!(err, EngineError::UnexpectedStatus(200)));
    }

    #[tokio::test]
    async fn async_requires_a_location_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/proc/slow/execution"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let node = test_node(&format!("{}/proc/slow", server.uri()), "async", false);
        let (client, _) = client(fast_config());

        let err = client.execute(&node, &node.body).await.unwrap_err();
        assert!(matches!(err, EngineError::MissingLocation));
    }

    #[tokio::test]
    async fn async_polls_until_the_job_succeeds() {
        let server = MockServer::start().await;
        let job_url = format!("{}/jobs/job-42", server.uri());

        Mock::given(method("POST"))
            .and(path("/proc/slow/execution"))
            .respond_with(ResponseTemplate::new(202).insert_header("Location", job_url.as_str()))
            .mount(&server)
            .await;

        // Still running on the first poll, successful afterwards.
        Mock::given(method("GET"))
            .and(path("/jobs/job-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "running" })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/job-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "successful",
                "outputs": [{ "id": "sum", "value": 12 }],
            })))
            .mount(&server)
            .await;

        let node = test_node(&format!("{}/proc/slow", server.uri()), "async", false);
        let (client, _) = client(fast_config());

        let outputs = client.execute(&node, &node.body).await.unwrap();
        assert_eq!(outputs.get("sum"), Some(&json!(12)));
    }

    #[tokio::test]
    async fn async_poll_fails_on_cancelled_job() {
        let server = MockServer::start().await;
        let job_url = format!("{}/jobs/job-9", server.uri());

        Mock::given(method("POST"))
            .and(path("/proc/slow/execution"))
            .respond_with(ResponseTemplate::new(202).insert_header("Location", job_url.as_str()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/job-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "cancelled" })))
            .mount(&server)
            .await;

        let node = test_node(&format!("{}/proc/slow", server.uri()), "async", false);
        let (client, _) = client(fast_config());

        let err = client.execute(&node, &node.body).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::JobFailed { job_id, detail } if job_id == "job-9" && detail == "cancelled"
        ));
    }

    #[tokio::test]
    async fn async_poll_respects_the_configured_ceiling() {
        let server = MockServer::start().await;
        let job_url = format!("{}/jobs/job-13", server.uri());

        Mock::given(method("POST"))
            .and(path("/proc/slow/execution"))
            .respond_with(ResponseTemplate::new(202).insert_header("Location", job_url.as_str()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/job-13"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "accepted" })))
            .mount(&server)
            .await;

        let node = test_node(&format!("{}/proc/slow", server.uri()), "async", false);
        let (client, _) = client(ProcessClientConfig {
            max_poll_duration: Some(Duration::from_millis(50)),
            ..fast_config()
        });

        let err = client.execute(&node, &node.body).await.unwrap_err();
        assert!(matches!(err, EngineError::JobTimeout { job_id, .. } if job_id == "job-13"));
    }

    #[tokio::test]
    async fn subscriber_node_completes_through_the_registry() {
        let server = MockServer::start().await;
        let job_url = format!("{}/jobs/job-77", server.uri());

        Mock::given(method("POST"))
            .and(path("/proc/slow/execution"))
            .respond_with(ResponseTemplate::new(202).insert_header("Location", job_url.as_str()))
            .mount(&server)
            .await;

        let node = test_node(&format!("{}/proc/slow", server.uri()), "async", true);
        let (client, registry) = client(fast_config());

        let signaller = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            signaller
                .success("job-77", json!({ "outputs": [{ "id": "sum", "value": 3 }] }))
                .await;
        });

        let outputs = client.execute(&node, &node.body).await.unwrap();
        assert_eq!(outputs.get("sum"), Some(&json!(3)));
    }
}
