pub mod config;
pub mod error;
pub mod gateway;
pub mod io_struct;
pub mod predictor;
pub mod server;
pub mod strategy_lb;
pub mod worker;

use actix_web::web;
use tokio::signal;

use crate::config::ServeConfig;
use crate::gateway::{
    GatewayState, WORKER_STARTUP_CHECK_INTERVAL_SECS, WORKER_STARTUP_TIMEOUT_SECS,
};
use crate::predictor::Predictor;
use crate::server::WorkerState;

/// Runs the configured serving mode until ctrl-c.
pub fn run(config: ServeConfig) -> anyhow::Result<()> {
    server::init_logging();
    if config.gateway {
        run_gateway(config)
    } else {
        run_worker(config)
    }
}

/// Worker mode: load the artifact, mark ready, serve directly. A load
/// failure propagates out before the listener ever binds.
fn run_worker(config: ServeConfig) -> anyhow::Result<()> {
    let predictor = Predictor::load(&config.model_path)?;
    log::info!(
        "loaded model artifact from {} ({} features)",
        config.model_path.display(),
        predictor.num_features()
    );
    let state = web::Data::new(WorkerState::new(predictor));
    state.mark_ready();

    let log_interval = config.log_interval;
    actix_web::rt::System::new().block_on(async move {
        tokio::select! {
            _ = server::periodic_logging_worker(state.clone(), log_interval) => {
                unreachable!()
            }
            res = server::startup_worker(config, state.clone()) => {
                res?;
                unreachable!()
            }
            _ = signal::ctrl_c() => {
                log::info!("received ctrl-c, shutting down");
                Ok(())
            }
        }
    })
}

/// Gateway mode: spawn the worker processes, serve the proxy immediately
/// (503 until every worker reports ready), and kill the children on exit.
fn run_gateway(config: ServeConfig) -> anyhow::Result<()> {
    actix_web::rt::System::new().block_on(async move {
        // Child processes register with the runtime, so they are spawned
        // inside it.
        let workers = worker::spawn_workers(&config)?;
        let infos = workers.iter().map(|w| w.info.clone()).collect::<Vec<_>>();
        let state = web::Data::new(GatewayState::new(&config, infos)?);

        tokio::select! {
            _ = server::periodic_logging_gateway(state.clone()) => {
                unreachable!()
            }
            res = watch_readiness(state.clone()) => {
                res?;
                unreachable!()
            }
            res = server::startup_gateway(config, state.clone()) => {
                res?;
                unreachable!()
            }
            _ = signal::ctrl_c() => {
                log::info!("received ctrl-c, shutting down {} workers", workers.len());
                Ok(())
            }
        }
    })
}

/// Drives the readiness poll. Success parks the task (readiness never
/// reverts); failure is fatal for the gateway.
async fn watch_readiness(state: web::Data<GatewayState>) -> anyhow::Result<()> {
    state
        .wait_until_ready(WORKER_STARTUP_TIMEOUT_SECS, WORKER_STARTUP_CHECK_INTERVAL_SECS)
        .await?;
    futures::future::pending::<()>().await;
    Ok(())
}
