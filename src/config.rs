use std::path::PathBuf;

use clap::Parser;

use crate::strategy_lb::LBPolicy;

pub const DEFAULT_MODEL_PATH: &str = "/opt/ml/model/model.json";

#[derive(Parser, Debug)]
#[command(name = "tabserve")]
#[command(about = "CSV model server - /ping and /invocations over one or more inference workers")]
#[command(long_about = r#"
CSV model server - /ping and /invocations over one or more inference workers

By default one process loads the model artifact and serves predictions
directly. With --gateway the process instead spawns the configured number of
worker processes (each with its own copy of the artifact) on the ports
following --port, and load-balances /invocations across them.

Examples:
  # Single worker serving the default artifact path
  tabserve --port 8080

  # Four workers behind a reverse-proxy gateway, least-connection balancing
  tabserve --gateway --workers 4 --policy least_conn \
    --model-path /opt/ml/model/model.json
"#)]
pub struct CliArgs {
    /// Host address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Path to the unpacked model artifact
    #[arg(long, env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    /// Number of inference workers
    #[arg(long, env = "MODEL_SERVER_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Request timeout in seconds
    #[arg(long, env = "MODEL_SERVER_TIMEOUT", default_value_t = 300)]
    pub timeout_secs: u64,

    /// Front the workers with a reverse-proxy gateway
    #[arg(long, env = "MODEL_SERVER_GATEWAY", default_value_t = false)]
    pub gateway: bool,

    /// Load balancing policy used by the gateway
    #[arg(long, default_value = "round_robin", value_parser = ["round_robin", "least_conn", "random"])]
    pub policy: String,

    /// Interval in seconds between status log lines
    #[arg(long, default_value_t = 60)]
    pub log_interval: u64,
}

/// Resolved configuration, built once at startup and handed to both the
/// front-end and the predictor side. Nothing reads the environment after
/// this point.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub workers: usize,
    pub timeout_secs: u64,
    pub gateway: bool,
    pub policy: LBPolicy,
    pub log_interval: u64,
}

impl ServeConfig {
    pub fn from_args(args: CliArgs) -> anyhow::Result<Self> {
        if args.workers == 0 {
            anyhow::bail!("worker count must be at least 1");
        }
        if args.timeout_secs == 0 {
            anyhow::bail!("request timeout must be at least 1 second");
        }
        if args.log_interval == 0 {
            anyhow::bail!("log interval must be at least 1 second");
        }
        let policy = match args.policy.as_str() {
            "round_robin" => LBPolicy::RoundRobin,
            "least_conn" => LBPolicy::LeastConn,
            "random" => LBPolicy::Random,
            other => anyhow::bail!("invalid policy {:?}", other),
        };
        Ok(ServeConfig {
            host: args.host,
            port: args.port,
            model_path: args.model_path,
            workers: args.workers,
            timeout_secs: args.timeout_secs,
            gateway: args.gateway,
            policy,
            log_interval: args.log_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("tabserve").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_the_serving_contract() {
        let config = ServeConfig::from_args(parse(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.workers, 1);
        assert_eq!(config.timeout_secs, 300);
        assert!(!config.gateway);
        assert_eq!(config.policy, LBPolicy::RoundRobin);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = ServeConfig::from_args(parse(&["--workers", "0"])).unwrap_err();
        assert!(err.to_string().contains("worker count"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(ServeConfig::from_args(parse(&["--timeout-secs", "0"])).is_err());
    }

    #[test]
    fn policy_values_parse() {
        let config = ServeConfig::from_args(parse(&["--policy", "least_conn"])).unwrap();
        assert_eq!(config.policy, LBPolicy::LeastConn);
        let config = ServeConfig::from_args(parse(&["--policy", "random"])).unwrap();
        assert_eq!(config.policy, LBPolicy::Random);
    }

    #[test]
    fn unknown_policy_is_rejected_by_the_cli() {
        assert!(
            CliArgs::try_parse_from(["tabserve", "--policy", "sticky"]).is_err()
        );
    }

    #[test]
    fn gateway_flag_selects_proxy_mode() {
        let config = ServeConfig::from_args(parse(&["--gateway", "--workers", "4"])).unwrap();
        assert!(config.gateway);
        assert_eq!(config.workers, 4);
    }
}
