use crate::config::ServeConfig;
use crate::error::PredictError;
use crate::gateway::GatewayState;
use crate::predictor::Predictor;
use actix_web::http::header::CONTENT_TYPE;
use actix_web::{Error, HttpRequest, HttpResponse, HttpServer, get, post, web};
use futures_util::StreamExt;
use http::Method;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared state of one inference worker: the loaded predictor, the
/// readiness flag, and a served-request counter for status logging.
pub struct WorkerState {
    pub predictor: Arc<Predictor>,
    ready: AtomicBool,
    served: AtomicU64,
}

impl WorkerState {
    pub fn new(predictor: Predictor) -> Self {
        WorkerState {
            predictor: Arc::new(predictor),
            ready: AtomicBool::new(false),
            served: AtomicU64::new(0),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }
}

fn require_csv(req: &HttpRequest) -> Result<(), PredictError> {
    match req.headers().get(CONTENT_TYPE) {
        // No header: the body is treated as CSV.
        None => Ok(()),
        Some(value) => {
            let ct = value.to_str().unwrap_or("");
            if ct.trim().to_ascii_lowercase().starts_with("text/csv") {
                Ok(())
            } else {
                Err(PredictError::UnsupportedContentType(ct.to_string()))
            }
        }
    }
}

#[get("/ping")]
pub async fn ping(state: web::Data<WorkerState>) -> HttpResponse {
    if state.is_ready() {
        HttpResponse::Ok().body("")
    } else {
        HttpResponse::ServiceUnavailable().body("model is not loaded yet")
    }
}

#[post("/invocations")]
pub async fn invocations(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<WorkerState>,
) -> Result<HttpResponse, Error> {
    if !state.is_ready() {
        return Err(PredictError::NotReady.into());
    }
    require_csv(&req)?;
    let output = state.predictor.predict(&body).map_err(|e| {
        log::error!("{}", e);
        e
    })?;
    state.served.fetch_add(1, Ordering::Relaxed);
    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .body(output))
}

#[get("/ping")]
pub async fn gateway_ping(state: web::Data<GatewayState>) -> HttpResponse {
    // Reflects startup success only; per-request failures never unset it.
    if state.is_ready() {
        HttpResponse::Ok().body("")
    } else {
        HttpResponse::ServiceUnavailable().body("workers are still starting")
    }
}

#[post("/invocations")]
pub async fn gateway_invocations(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse, Error> {
    if !state.is_ready() {
        return Err(PredictError::NotReady.into());
    }
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let worker = state.strategy_lb.select();
    state.strategy_lb.begin_request(&worker.url);
    let result = state
        .route_one(&worker, Method::POST, "/invocations", Some(body), content_type)
        .await;
    state.strategy_lb.end_request(&worker.url);
    result?.into_http()
}

/// Default handler for unmatched routes: drain the payload, answer 404.
pub async fn sink_handler(_req: HttpRequest, mut payload: web::Payload) -> Result<HttpResponse, Error> {
    while let Some(chunk) = payload.next().await {
        if let Err(err) = chunk {
            log::warn!("error while draining payload: {:?}", err);
            break;
        }
    }
    Ok(HttpResponse::NotFound().body("no such endpoint"))
}

// default level is info
pub fn init_logging() {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .init();
}

pub async fn periodic_logging_worker(state: web::Data<WorkerState>, interval_secs: u64) {
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
        log::info!("served {} prediction requests since startup", state.served());
    }
}

pub async fn periodic_logging_gateway(state: web::Data<GatewayState>) {
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(state.log_interval)).await;
        let inflight = state
            .strategy_lb
            .inflight_snapshot()
            .into_iter()
            .map(|(url, n)| format!("{}: {}", url, n))
            .collect::<Vec<_>>();
        log::info!(
            "ready: {}; in-flight requests: {}",
            state.is_ready(),
            inflight.join(", ")
        );
    }
}

pub async fn startup_worker(
    config: ServeConfig,
    state: web::Data<WorkerState>,
) -> std::io::Result<()> {
    println!("Starting inference worker at {}:{}", config.host, config.port);

    let workers = config.workers;
    let addr = (config.host.clone(), config.port);
    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(state.clone())
            .service(ping)
            .service(invocations)
            .default_service(web::route().to(sink_handler))
    })
    .workers(workers)
    .bind(addr)?
    .run()
    .await
}

pub async fn startup_gateway(
    config: ServeConfig,
    state: web::Data<GatewayState>,
) -> std::io::Result<()> {
    println!("Starting gateway at {}:{}", config.host, config.port);

    let addr = (config.host.clone(), config.port);
    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(state.clone())
            .service(gateway_ping)
            .service(gateway_invocations)
            .default_service(web::route().to(sink_handler))
    })
    .bind(addr)?
    .run()
    .await
}
