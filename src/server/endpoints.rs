//! HTTP endpoints.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dropshot::{endpoint, HttpError, HttpResponseOk, Path, RequestContext};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Context;
use crate::monitor::SyncStatus;

/// Return the OpenAPI schema in JSON format.
#[endpoint {
    method = GET,
    path = "/",
    tags = ["meta"],
}]
pub async fn api_get_schema(
    rqctx: RequestContext<Arc<Context>>,
) -> Result<HttpResponseOk<serde_json::Value>, HttpError> {
    Ok(HttpResponseOk(rqctx.context().schema.clone()))
}

/// The response from the `/ping` endpoint.
#[derive(Deserialize, Debug, JsonSchema, Serialize)]
pub struct Pong {
    /// The pong response.
    pub message: String,
}

/** Return pong. */
#[endpoint {
    method = GET,
    path = "/ping",
    tags = ["meta"],
}]
pub async fn ping(_rqctx: RequestContext<Arc<Context>>) -> Result<HttpResponseOk<Pong>, HttpError> {
    Ok(HttpResponseOk(Pong {
        message: "pong".to_string(),
    }))
}

/// Connection and controller status.
#[derive(Clone, Debug, PartialEq, Deserialize, JsonSchema, Serialize)]
pub struct Status {
    /// Connection state.
    pub sync_state: SyncStatus,

    /// Serial device in use.
    pub device: Option<String>,

    /// Machine mode (`FFF`, `CNC`, `Laser`), or empty if not known yet.
    pub machine_mode: String,

    /// Controller status from `state.status`, e.g. `idle` or `processing`.
    pub status: Option<String>,

    /// Seconds since the controller booted.
    pub up_time: Option<u64>,

    /// Whether the latest poll cycle updated every key.
    pub last_cycle_ok: bool,

    /// Poll cycles run.
    pub cycles: u64,

    /// Poll cycles which did not update every key.
    pub failures: u64,

    /// When the monitor last published.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Get the connection and controller status.
#[endpoint {
    method = GET,
    path = "/status",
    tags = ["model"],
}]
pub async fn get_status(rqctx: RequestContext<Arc<Context>>) -> Result<HttpResponseOk<Status>, HttpError> {
    let snapshot = rqctx.context().snapshot();
    Ok(HttpResponseOk(Status {
        sync_state: snapshot.sync_state,
        device: snapshot.device.clone(),
        machine_mode: snapshot.machine_mode.clone(),
        status: snapshot.status().map(str::to_owned),
        up_time: snapshot.up_time(),
        last_cycle_ok: snapshot.last_cycle_ok,
        cycles: snapshot.cycles,
        failures: snapshot.failures,
        updated_at: snapshot.updated_at,
    }))
}

/// Get the whole object model.
#[endpoint {
    method = GET,
    path = "/model",
    tags = ["model"],
}]
pub async fn get_model(
    rqctx: RequestContext<Arc<Context>>,
) -> Result<HttpResponseOk<serde_json::Value>, HttpError> {
    Ok(HttpResponseOk(rqctx.context().snapshot().model))
}

/// The path parameters for reading one object model key.
#[derive(Deserialize, Debug, JsonSchema, Serialize)]
pub struct ModelKeyPathParams {
    /// Top level object model key, e.g. `heat` or `job`.
    pub key: String,
}

/// Get one top level section of the object model.
#[endpoint {
    method = GET,
    path = "/model/{key}",
    tags = ["model"],
}]
pub async fn get_model_key(
    rqctx: RequestContext<Arc<Context>>,
    path_params: Path<ModelKeyPathParams>,
) -> Result<HttpResponseOk<serde_json::Value>, HttpError> {
    let params = path_params.into_inner();
    let mut snapshot = rqctx.context().snapshot();

    match snapshot.model.get_mut(&params.key).map(serde_json::Value::take) {
        Some(value) => Ok(HttpResponseOk(value)),
        None => {
            tracing::debug!(key = %params.key, "object model key not found");
            Err(HttpError::for_not_found(
                None,
                format!("object model key not found: {:?}", &params.key),
            ))
        }
    }
}
