use clap::Parser;
use tabserve::config::{CliArgs, ServeConfig};

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = ServeConfig::from_args(args)?;

    println!(
        "tabserve starting on {}:{} ({} mode, {} worker{})",
        config.host,
        config.port,
        if config.gateway { "gateway" } else { "worker" },
        config.workers,
        if config.workers == 1 { "" } else { "s" }
    );

    tabserve::run(config)
}
