use serde::Serialize;

use super::forms::MapFilterForm;
use crate::error::FormErrors;
use crate::geomap::MapConfig;
use crate::service::{CpeDevice, DeviceSummary};

// Map page context
#[derive(Debug, Serialize)]
pub struct MapPageResponse {
    pub filter_form: FilterFormState,
    /// Absent when the filter did not validate
    pub map_data: Option<MapConfig>,
    pub non_geolocated_devices: Vec<DeviceSummary>,
}

// Filter form as submitted, plus per-field errors
#[derive(Debug, Serialize)]
pub struct FilterFormState {
    pub values: MapFilterForm,
    pub errors: FormErrors,
}

// Connected CPE lookup response
#[derive(Debug, Serialize)]
pub struct CpeResponse {
    pub status: bool,
    pub cpe_devices: Vec<CpeDevice>,
    pub device_type: String,
}
