//! Device geolocation.
//!
//! A device's position comes from a `"lat, lon"` custom field when that field
//! holds a usable value, otherwise from its site's coordinates.

use tracing::debug;

use crate::models::{Device, LatLon};

/// Resolve the map position of `device`.
///
/// `cf_name` is the custom field consulted first. Malformed field values are
/// ignored and resolution falls through to the site; nothing here errors.
pub fn resolve_location(device: &Device, cf_name: &str) -> Option<LatLon> {
    if let Some(raw) = device.custom_fields.get(cf_name).and_then(|v| v.as_str()) {
        if !raw.trim().is_empty() {
            match parse_lat_lon(raw) {
                Some(position) => return Some(position),
                None => debug!(
                    "Ignoring malformed {} value {:?} on device {}",
                    cf_name, raw, device.id
                ),
            }
        }
    }

    device
        .site
        .as_ref()
        .and_then(|site| site.location())
        .filter(|position| is_valid_position(*position))
}

/// Parse `"lat,lon"`, tolerating whitespace anywhere in the string
pub fn parse_lat_lon(raw: &str) -> Option<LatLon> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let (lat, lon) = compact.split_once(',')?;
    let position = (lat.parse::<f64>().ok()?, lon.parse::<f64>().ok()?);
    is_valid_position(position).then_some(position)
}

pub fn is_valid_position((lat, lon): LatLon) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}
