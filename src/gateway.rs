use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use actix_web::HttpResponse;
use bytes::Bytes;
use futures::future::join_all;
use http::Method;

use crate::config::ServeConfig;
use crate::strategy_lb::{StrategyLB, WorkerInfo};

/// How long the gateway waits for spawned workers to answer /ping, and how
/// often it asks. Workers load their artifact during this window.
pub const WORKER_STARTUP_TIMEOUT_SECS: u64 = 300;
pub const WORKER_STARTUP_CHECK_INTERVAL_SECS: u64 = 1;

/// A worker's answer, carried back to the client verbatim.
pub struct ProxyResponse {
    pub status: reqwest::StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn into_http(self) -> Result<HttpResponse, actix_web::Error> {
        let status = actix_web::http::StatusCode::from_u16(self.status.as_u16())
            .map_err(|e| actix_web::error::ErrorBadGateway(format!("invalid status code: {}", e)))?;
        let mut builder = HttpResponse::build(status);
        if let Some(ct) = &self.content_type {
            builder.content_type(ct.as_str());
        }
        Ok(builder.body(self.body))
    }
}

/// Shared state of the reverse-proxy front-end: the worker set, the upstream
/// client with the configured request timeout, and the aggregate readiness
/// flag. The flag is set once when every worker has answered /ping and never
/// reverts.
pub struct GatewayState {
    pub strategy_lb: Arc<StrategyLB>,
    pub client: reqwest::Client,
    pub log_interval: u64,
    ready: AtomicBool,
}

impl GatewayState {
    pub fn new(config: &ServeConfig, workers: Vec<WorkerInfo>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(GatewayState {
            strategy_lb: Arc::new(StrategyLB::new(config.policy, workers)),
            client,
            log_interval: config.log_interval,
            ready: AtomicBool::new(false),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Forwards one request to one worker. The worker's status and body come
    /// back unchanged; transport failures map to 502 and an elapsed deadline
    /// to 504.
    pub async fn route_one(
        &self,
        worker: &WorkerInfo,
        method: Method,
        api_path: &str,
        body: Option<Bytes>,
        content_type: Option<&str>,
    ) -> Result<ProxyResponse, actix_web::Error> {
        let url = worker.api_path(api_path);
        let mut request = self.client.request(method, url);
        if let Some(ct) = content_type {
            request = request.header(http::header::CONTENT_TYPE, ct);
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                actix_web::error::ErrorGatewayTimeout(format!(
                    "worker {} timed out: {}",
                    worker.url, e
                ))
            } else {
                actix_web::error::ErrorBadGateway(format!(
                    "worker {} unreachable: {}",
                    worker.url, e
                ))
            }
        })?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .bytes()
            .await
            .map_err(actix_web::error::ErrorBadGateway)?;
        Ok(ProxyResponse {
            status,
            content_type,
            body,
        })
    }

    pub async fn route_collect(
        &self,
        workers: &[WorkerInfo],
        method: Method,
        api_path: &str,
    ) -> Result<Vec<ProxyResponse>, actix_web::Error> {
        let tasks = workers
            .iter()
            .map(|worker| self.route_one(worker, method.clone(), api_path, None, None));
        join_all(tasks).await.into_iter().collect()
    }

    /// One readiness sweep: true when every worker answers /ping with 2xx.
    pub async fn poll_workers_ready(&self) -> bool {
        let workers = self.strategy_lb.get_all_workers();
        match self.route_collect(&workers, Method::GET, "/ping").await {
            Ok(responses) => responses.iter().all(|resp| resp.status.is_success()),
            Err(_) => false,
        }
    }

    /// Polls until every worker is ready, then sets the readiness flag.
    /// Giving up is fatal to the caller: a gateway whose workers never came
    /// up cannot serve.
    pub async fn wait_until_ready(
        &self,
        timeout_secs: u64,
        interval_secs: u64,
    ) -> anyhow::Result<()> {
        let start = std::time::Instant::now();
        loop {
            if self.poll_workers_ready().await {
                self.mark_ready();
                log::info!("all workers are ready");
                return Ok(());
            }
            if start.elapsed() > Duration::from_secs(timeout_secs) {
                anyhow::bail!(
                    "timeout {}s waiting for workers {:?} to become ready",
                    timeout_secs,
                    self.strategy_lb
                        .get_all_workers()
                        .iter()
                        .map(|w| w.url.clone())
                        .collect::<Vec<_>>()
                );
            }
            log::info!("waiting for workers to become ready");
            tokio::time::sleep(Duration::from_secs(interval_secs)).await;
        }
    }
}
