//! Read-only HTTP view of the latest published [Snapshot].

pub mod context;
pub mod endpoints;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use dropshot::{ApiDescription, ConfigDropshot, HttpServerStarter};
use tokio::sync::watch;

use crate::{monitor::Snapshot, server::context::Context};

/// Create an API description for the server.
pub fn create_api_description() -> Result<ApiDescription<Arc<Context>>> {
    fn register_error<E: std::fmt::Display>(err: E) -> anyhow::Error {
        anyhow!("failed to register entrypoints: {}", err)
    }

    let mut api = ApiDescription::new();
    api.register(endpoints::ping).map_err(register_error)?;
    api.register(endpoints::api_get_schema).map_err(register_error)?;
    api.register(endpoints::get_status).map_err(register_error)?;
    api.register(endpoints::get_model).map_err(register_error)?;
    api.register(endpoints::get_model_key).map_err(register_error)?;

    Ok(api)
}

/// Get the OpenAPI specification for the server.
pub fn get_openapi(api: &mut ApiDescription<Arc<Context>>) -> Result<serde_json::Value> {
    let version = semver::Version::parse(clap::crate_version!())?;
    let mut definition = api.openapi("rrf-monitor", version);
    definition
        .description("Live view of a RepRapFirmware controller's object model")
        .json()
        .map_err(|e| e.into())
}

/// Start the server on `bind`, serving snapshots from `snapshots`.
pub fn create_server(
    bind: &str,
    logger: slog::Logger,
    snapshots: watch::Receiver<Snapshot>,
) -> Result<(dropshot::HttpServer<Arc<Context>>, Arc<Context>)> {
    let mut api = create_api_description()?;
    let schema = get_openapi(&mut api)?;

    let config_dropshot = ConfigDropshot {
        bind_address: bind.parse()?,
        ..Default::default()
    };

    let dropshot_logger = logger.new(slog::o!("component" => "dropshot"));
    let api_context = Arc::new(Context::new(schema, logger, snapshots));

    let server = HttpServerStarter::new(&config_dropshot, api, api_context.clone(), &dropshot_logger)
        .map_err(|error| anyhow!("failed to create server: {}", error))?
        .start();

    slog::info!(api_context.logger, "listening"; "address" => server.local_addr().to_string());
    Ok((server, api_context))
}
