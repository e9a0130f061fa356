use std::{net::TcpListener, sync::Arc};

use actix_web::{dev::Server, middleware::Logger, web, App, HttpServer};
use anyhow::Context;

use crate::{
    configuration::{Provider, Settings},
    routes::{default_route, lead_route},
    services::{ExtractionService, GeminiClient, Harvester, OpenaiClient, RunGate},
};

// Exports carry the whole result table back from the client.
const EXPORT_BODY_LIMIT: usize = 8 * 1024 * 1024;

fn required_key(key: &Option<String>, name: &str) -> anyhow::Result<String> {
    key.clone()
        .filter(|k| !k.trim().is_empty())
        .with_context(|| format!("Missing API key: set APP_API_KEYS__{}", name))
}

/// Builds the client for the configured provider.
pub fn build_extraction_service(
    settings: &Settings,
) -> anyhow::Result<Arc<dyn ExtractionService>> {
    let extraction = &settings.extraction;

    let service: Arc<dyn ExtractionService> = match extraction.provider {
        Provider::Gemini => Arc::new(GeminiClient::new(
            required_key(&settings.api_keys.gemini, "GEMINI")?,
            &extraction.base_url,
        )?),
        Provider::Openai => Arc::new(OpenaiClient::new(required_key(
            &settings.api_keys.openai,
            "OPENAI",
        )?)),
    };

    log::info!(
        "Using {:?} extraction with model {}",
        extraction.provider,
        extraction.model
    );

    Ok(service)
}

pub fn run(
    listener: TcpListener,
    harvester: Harvester,
    settings: &Settings,
) -> Result<Server, std::io::Error> {
    let harvester = web::Data::new(harvester);
    let harvest_settings = web::Data::new(settings.harvest.clone());
    let run_gate = web::Data::new(RunGate::new(settings.application.max_concurrent_runs));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .service(default_route::health)
            .service(
                web::scope("/lead")
                    .service(lead_route::harvest_leads)
                    .service(lead_route::stream_leads)
                    .service(lead_route::export_leads),
            )
            .app_data(harvester.clone())
            .app_data(harvest_settings.clone())
            .app_data(run_gate.clone())
            .app_data(web::JsonConfig::default().limit(EXPORT_BODY_LIMIT))
    })
    .listen(listener)?
    .run();

    Ok(server)
}
