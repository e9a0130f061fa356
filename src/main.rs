use std::net::TcpListener;

use anyhow::Context;
use env_logger::Env;
use harvester::{
    configuration::get_configuration,
    services::Harvester,
    startup::{build_extraction_service, run},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let configuration = get_configuration().context("Failed to read configuration.")?;

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener =
        TcpListener::bind(&address).with_context(|| format!("Failed to bind {}", address))?;

    let service = build_extraction_service(&configuration)?;
    let harvester = Harvester::new(service, configuration.extraction.model_settings());

    log::info!("Lead harvester listening on {}", address);
    run(listener, harvester, &configuration)?.await?;

    Ok(())
}
