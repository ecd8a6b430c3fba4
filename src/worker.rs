use anyhow::Context;
use tokio::process::{Child, Command};

use crate::config::ServeConfig;
use crate::strategy_lb::WorkerInfo;

/// A spawned worker process serving one private copy of the model on a
/// loopback port. The child is killed when the handle drops.
pub struct WorkerProcess {
    pub info: WorkerInfo,
    child: Child,
}

impl WorkerProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Port assigned to worker `index`: the gateway port plus one-based offset.
pub fn worker_port(base: u16, index: usize) -> Option<u16> {
    u16::try_from(index + 1)
        .ok()
        .and_then(|offset| base.checked_add(offset))
}

/// Launches `config.workers` copies of this binary in worker mode on the
/// ports following the gateway's. Each child loads the artifact itself, so
/// no model state crosses process boundaries.
pub fn spawn_workers(config: &ServeConfig) -> anyhow::Result<Vec<WorkerProcess>> {
    let exe = std::env::current_exe().context("cannot locate current executable")?;
    let mut workers = Vec::with_capacity(config.workers);
    for index in 0..config.workers {
        let port = worker_port(config.port, index)
            .with_context(|| format!("worker port range overflows past {}", config.port))?;
        let child = Command::new(&exe)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .arg("--model-path")
            .arg(&config.model_path)
            .arg("--workers")
            .arg("1")
            .arg("--timeout-secs")
            .arg(config.timeout_secs.to_string())
            .arg("--log-interval")
            .arg(config.log_interval.to_string())
            // Children must not inherit gateway mode from the environment.
            .env_remove("MODEL_SERVER_GATEWAY")
            .env_remove("MODEL_SERVER_WORKERS")
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn worker on port {}", port))?;
        log::info!(
            "spawned worker pid {:?} on 127.0.0.1:{}",
            child.id(),
            port
        );
        workers.push(WorkerProcess {
            info: WorkerInfo::new(format!("http://127.0.0.1:{}", port)),
            child,
        });
    }
    Ok(workers)
}
