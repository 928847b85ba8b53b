use anyhow::Context;
use icyserver::Server;
use icystation::StationRegistry;
use std::sync::Arc;
use tracing::info;

fn config_path() -> String {
    std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = icyconfig::Config::load(config_path()).context("load config")?;
    icyserver::logging::init(&config.logging);

    let registry =
        Arc::new(StationRegistry::from_config(&config).context("build stations")?);
    info!(stations = registry.len(), "Configuration loaded");
    registry.start_all();

    Server::new(&config.listen, registry).run().await
}
