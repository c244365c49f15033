use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use tracing::{info, warn, instrument};

use crate::error::{AppError, FormErrors, Result};
use crate::models::DeviceId;
use crate::service::DeviceMap;
use super::forms::{ConnectedCpeForm, MapFilterForm};
use super::models::{CpeResponse, FilterFormState, MapPageResponse};

// Metrics recorded by the handlers
pub struct AppMetrics {
    pub request_counter: Counter<u64>,
    pub marker_histogram: Histogram<f64>,
}

// Type alias for our application state
pub type AppState = (Arc<DeviceMap>, Arc<AppMetrics>);

// Create the router for the map endpoints
pub fn map_router(state: AppState) -> Router<AppState> {
    Router::new()
        // Map page context
        .route("/map/", get(map_page))

        // CPE devices cabled to a node device
        .route("/map/connected-cpe/{id}", get(connected_cpe))
        .with_state(state)
}

// Map page
#[instrument(name = "map_page_handler", skip_all)]
async fn map_page(
    State((service, metrics)): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<MapPageResponse>> {
    metrics.request_counter.add(1, &[KeyValue::new("endpoint", "map")]);

    let form = MapFilterForm::from_query(params);
    let filter = match form.validate(service.repository()).await {
        Ok(filter) => filter,
        Err(AppError::Validation { form_errors, .. }) => {
            // Redisplay the form; no map is computed
            warn!("Invalid map filter: {:?}", form_errors);
            return Ok(Json(MapPageResponse {
                filter_form: FilterFormState {
                    values: form,
                    errors: form_errors,
                },
                map_data: None,
                non_geolocated_devices: Vec::new(),
            }));
        }
        Err(e) => return Err(e),
    };

    let outcome = service.map_page(&filter).await?;
    metrics
        .marker_histogram
        .record(outcome.map_data.markers.len() as f64, &[]);

    info!(
        "Serving map with {} markers and {} connections",
        outcome.map_data.markers.len(),
        outcome.map_data.connections.len()
    );

    Ok(Json(MapPageResponse {
        filter_form: FilterFormState {
            values: form,
            errors: FormErrors::new(),
        },
        map_data: Some(outcome.map_data),
        non_geolocated_devices: outcome.non_geolocated_devices,
    }))
}

// Connected CPE lookup
#[instrument(name = "connected_cpe_handler", skip(service, metrics, params), fields(device = %id))]
async fn connected_cpe(
    State((service, metrics)): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<CpeResponse>> {
    metrics.request_counter.add(1, &[KeyValue::new("endpoint", "connected_cpe")]);

    let device = match id.parse::<DeviceId>() {
        Ok(id) => service.repository().get_device(id).await?,
        Err(_) => None,
    };
    let Some(device) = device else {
        warn!("Device not found: {}", id);
        return Err(AppError::NotFound("Device not found".to_string()));
    };

    let vlan = ConnectedCpeForm::from_query(params)
        .validate(service.repository())
        .await
        .inspect_err(|e| warn!("Invalid CPE lookup for device {}: {}", id, e))?;

    let lookup = service
        .connected_cpe(&device, vlan.map(|v| v.id))
        .await?;

    info!("Found {} CPE devices connected to {}", lookup.cpe_devices.len(), device.name);

    Ok(Json(CpeResponse {
        status: true,
        cpe_devices: lookup.cpe_devices,
        device_type: lookup.device_type,
    }))
}
