use anyhow::Result;
use clap::Parser;
use tracing::info;

use synckode_relay::cli::{self, Cli, ProbeOptions};
use synckode_relay::config::Config;
use synckode_relay::telemetry::{self, Telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    if let Some(command) = args.command {
        telemetry::init_tracing("warn")?;
        return cli::run_probe(ProbeOptions::from(command)).await;
    }

    let telemetry = Telemetry::init()?;
    let config = Config::try_from(args.server)?;
    info!(
        listen_addr = %config.listen_addr,
        extra_rooms = config.extra_rooms.len(),
        "starting synckode relay"
    );

    synckode_relay::run(config, Some(telemetry.metrics_handle())).await
}
