//! Device registry endpoints
//!
//! Every route here sits behind the session middleware and only ever sees
//! devices owned by the session identity. A device owned by someone else is
//! indistinguishable from one that does not exist.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::auth::Owner;
use super::{ApiError, ApiState};
use crate::db::{Device, NewDevice};
use crate::dispatch::InvocationToken;

/// Build the `/device` router (unauthenticated; the caller adds the session layer)
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/device", get(list_devices).put(create_device))
        .route("/device/{id}", get(get_device))
        .route("/device/location/{id}", post(update_location))
        .route(
            "/device/{id}/command",
            get(list_device_commands).put(replace_device_commands),
        )
        .route("/device/{id}/command/{command_id}", post(trigger_command))
        .with_state(state)
}

/// Device as returned to its owner
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub id: i64,
    pub name: String,
    pub endpoint: String,
    pub has_sms_pin: bool,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl From<Device> for DeviceResponse {
    fn from(device: Device) -> Self {
        Self {
            has_sms_pin: device.has_sms_pin(),
            id: device.id,
            name: device.name,
            endpoint: device.endpoint,
            latitude: device.latitude,
            longitude: device.longitude,
            updated_at: device.updated_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Body of `PUT /device`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceRequest {
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub sms_pin: Option<String>,
}

/// Query of `POST /device/location/{id}`
#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    pub latitude: Option<String>,
    pub longitude: Option<String>,
}

/// Command linked to a device, with the URL that triggers it
#[derive(Debug, Serialize)]
pub struct DeviceCommandResponse {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub trigger: String,
}

/// Response of a successful trigger
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub token: InvocationToken,
}

/// Parse a path identifier
fn parse_id(raw: &str, what: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid {what} id '{raw}'")))
}

/// Look up a device by raw path id, scoped to the current owner
fn owned_device(state: &ApiState, raw_id: &str, owner: &str) -> Result<Device, ApiError> {
    let id = parse_id(raw_id, "device")?;
    state
        .dispatcher
        .devices()
        .find_owned(id, owner)?
        .ok_or_else(ApiError::device_not_found)
}

/// List the owner's devices as resource URLs
async fn list_devices(
    State(state): State<Arc<ApiState>>,
    Extension(Owner(owner)): Extension<Owner>,
) -> Result<Json<Vec<String>>, ApiError> {
    let devices = state.dispatcher.devices().list_for_owner(&owner)?;
    Ok(Json(
        devices.iter().map(|d| format!("/device/{}", d.id)).collect(),
    ))
}

/// Register a device for the owner
async fn create_device(
    State(state): State<Arc<ApiState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Json(request): Json<CreateDeviceRequest>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let new = NewDevice {
        owner,
        name: request.name,
        endpoint: request.endpoint,
        sms_pin: request.sms_pin.filter(|pin| !pin.is_empty()),
    };

    // Argon2 hashing and verification are CPU-bound
    let devices = state.dispatcher.devices().clone();
    let device = tokio::task::spawn_blocking(move || devices.create(new))
        .await
        .map_err(|e| ApiError::Internal(format!("device creation task failed: {e}")))??;

    Ok(Json(device.into()))
}

/// Fetch one of the owner's devices
async fn get_device(
    State(state): State<Arc<ApiState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let device = owned_device(&state, &id, &owner)?;
    Ok(Json(device.into()))
}

/// Record the device's last known location
async fn update_location(
    State(state): State<Arc<ApiState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<String>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<DeviceResponse>, ApiError> {
    let device = owned_device(&state, &id, &owner)?;

    let coordinate = |raw: Option<&str>, name: &str| -> Result<f64, ApiError> {
        raw.and_then(|v| v.trim().parse::<f64>().ok())
            .ok_or_else(|| ApiError::BadRequest(format!("missing or invalid {name}")))
    };
    let latitude = coordinate(query.latitude.as_deref(), "latitude")?;
    let longitude = coordinate(query.longitude.as_deref(), "longitude")?;

    let devices = state.dispatcher.devices();
    devices.update_location(device.id, latitude, longitude)?;

    let updated = devices
        .find(device.id)?
        .ok_or_else(ApiError::device_not_found)?;
    Ok(Json(updated.into()))
}

/// Commands linked to the device
async fn list_device_commands(
    State(state): State<Arc<ApiState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DeviceCommandResponse>>, ApiError> {
    let device = owned_device(&state, &id, &owner)?;
    let commands = state.dispatcher.commands_implemented_by(&device)?;

    Ok(Json(
        commands
            .into_iter()
            .map(|c| DeviceCommandResponse {
                trigger: format!("/device/{}/command/{}", device.id, c.id),
                id: c.id,
                name: c.name,
                description: c.description,
            })
            .collect(),
    ))
}

/// Replace the full set of commands linked to the device
async fn replace_device_commands(
    State(state): State<Arc<ApiState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path(id): Path<String>,
    Json(command_ids): Json<Vec<i64>>,
) -> Result<Json<Vec<i64>>, ApiError> {
    let device = owned_device(&state, &id, &owner)?;

    let catalog = state.dispatcher.catalog();
    if let Some(unknown) = command_ids.iter().find(|&&cid| !catalog.contains(cid)) {
        return Err(ApiError::BadRequest(format!("unknown command id {unknown}")));
    }

    let devices = state.dispatcher.devices();
    devices.replace_commands(device.id, &command_ids)?;

    Ok(Json(devices.command_ids(device.id)?))
}

/// Trigger a command on the device
///
/// The optional body is a JSON object of boolean arguments.
async fn trigger_command(
    State(state): State<Arc<ApiState>>,
    Extension(Owner(owner)): Extension<Owner>,
    Path((id, command_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<TriggerResponse>, ApiError> {
    let command_id = parse_id(&command_id, "command")?;
    let device = owned_device(&state, &id, &owner)?;

    let token = state
        .dispatcher
        .trigger(&device, command_id, Some(&body[..]))
        .await?;

    Ok(Json(TriggerResponse { token }))
}
