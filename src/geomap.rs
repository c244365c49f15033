//! Assembly of the payload consumed by the map widget.

use std::collections::{BTreeSet, HashMap};

use ordered_float::OrderedFloat;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::connectivity::Topology;
use crate::location::is_valid_position;
use crate::models::{Device, DeviceId, LatLon, Site, SiteId, VlanId};
use crate::settings::PluginSettings;

pub const DEFAULT_ICON: &str = "default";
pub const UNKNOWN_ROLE: &str = "Unknown";
pub const SITE_ICON: &str = "site";

/// Keys owned by the assembler; display settings may not shadow them.
const RESERVED_KEYS: [&str; 4] = ["map_id", "markers", "connections", "vlan"];

/// Everything the map widget needs to draw one map
#[derive(Debug, Clone, Serialize)]
pub struct MapConfig {
    #[serde(flatten)]
    pub settings: Map<String, Value>,
    pub map_id: String,
    pub markers: Vec<Marker>,
    pub connections: Vec<Connection>,
    pub vlan: Option<VlanId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub position: LatLon,
    pub icon: String,
    #[serde(flatten)]
    pub owner: MarkerOwner,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerOwner {
    Device(DeviceMarker),
    Site(SiteMarker),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceMarker {
    pub id: DeviceId,
    pub name: String,
    pub url: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteMarker {
    pub id: SiteId,
    pub name: String,
    pub url: String,
}

/// A line between two positions; serialized as `[[lat, lon], [lat, lon]]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Connection(pub LatLon, pub LatLon);

type PositionKey = (OrderedFloat<f64>, OrderedFloat<f64>);

fn position_key((lat, lon): LatLon) -> PositionKey {
    (OrderedFloat(lat), OrderedFloat(lon))
}

/// Inputs for [`build_map`]
#[derive(Debug, Clone)]
pub struct MapRequest<'a> {
    pub map_id: &'a str,
    pub devices: &'a [(&'a Device, Option<LatLon>)],
    pub sites: &'a [Site],
    pub calculate_connections: bool,
    /// Restrict connection calculation to interfaces carrying these VLANs
    pub vlans: Option<&'a BTreeSet<VlanId>>,
    /// Selected VLAN, echoed back to the widget
    pub vlan: Option<VlanId>,
}

impl<'a> MapRequest<'a> {
    pub fn new(map_id: &'a str, devices: &'a [(&'a Device, Option<LatLon>)]) -> Self {
        Self {
            map_id,
            devices,
            sites: &[],
            calculate_connections: true,
            vlans: None,
            vlan: None,
        }
    }
}

#[instrument(name = "build_map", skip_all, fields(map_id = %request.map_id, devices = request.devices.len()))]
pub fn build_map(settings: &PluginSettings, topology: &Topology, request: MapRequest<'_>) -> MapConfig {
    let valid: Vec<(&Device, LatLon)> = request
        .devices
        .iter()
        .filter_map(|(device, position)| match position {
            Some(p) if device.id != 0 && is_valid_position(*p) => Some((*device, *p)),
            _ => {
                debug!("Dropping device {} without a usable position", device.id);
                None
            }
        })
        .collect();

    let positions: HashMap<DeviceId, LatLon> = valid.iter().map(|(d, p)| (d.id, *p)).collect();

    let mut markers: Vec<Marker> = valid
        .iter()
        .map(|(device, position)| device_marker(device, *position))
        .collect();

    if settings.show_sites {
        markers.extend(request.sites.iter().filter_map(site_marker));
    }

    let mut edges: BTreeSet<(PositionKey, PositionKey)> = BTreeSet::new();
    if request.calculate_connections {
        for (device, position) in &valid {
            let peers = match request.vlans {
                Some(vlans) => topology.connected_devices_on(device.id, vlans),
                None => topology.connected_devices(device.id, None),
            };
            for peer in peers {
                let Some(peer_position) = positions.get(&peer) else {
                    continue;
                };
                let (a, b) = (position_key(*position), position_key(*peer_position));
                if a == b {
                    continue;
                }
                edges.insert(if a < b { (a, b) } else { (b, a) });
            }
        }
    }

    let connections = edges
        .into_iter()
        .map(|((alat, alon), (blat, blon))| Connection((alat.0, alon.0), (blat.0, blon.0)))
        .collect::<Vec<_>>();

    debug!("Built map with {} markers and {} connections", markers.len(), connections.len());

    let mut display = settings.geomap_settings.clone();
    for key in RESERVED_KEYS {
        display.remove(key);
    }

    MapConfig {
        settings: display,
        map_id: request.map_id.to_string(),
        markers,
        connections,
        vlan: request.vlan,
    }
}

fn device_marker(device: &Device, position: LatLon) -> Marker {
    let icon = device
        .role
        .as_ref()
        .map(|r| r.slug.clone())
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| DEFAULT_ICON.to_string());
    let role = device
        .role_name()
        .unwrap_or(UNKNOWN_ROLE)
        .to_string();

    Marker {
        position,
        icon,
        owner: MarkerOwner::Device(DeviceMarker {
            id: device.id,
            name: device.name.clone(),
            url: device.url(),
            role,
        }),
    }
}

fn site_marker(site: &Site) -> Option<Marker> {
    let position = site.location().filter(|p| is_valid_position(*p))?;
    Some(Marker {
        position,
        icon: SITE_ICON.to_string(),
        owner: MarkerOwner::Site(SiteMarker {
            id: site.id,
            name: site.name.clone(),
            url: site.url(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cable, DeviceRole, Interface};
    use serde_json::json;

    fn device(id: DeviceId, role: Option<(&str, &str)>, interfaces: &[u64]) -> Device {
        Device {
            id,
            name: format!("dev{}", id),
            role: role.map(|(name, slug)| DeviceRole {
                id: 1,
                name: name.to_string(),
                slug: slug.to_string(),
            }),
            interfaces: interfaces
                .iter()
                .map(|i| Interface {
                    id: *i,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_edge_between_cabled_devices() {
        let a = device(1, Some(("Switch", "switch")), &[11]);
        let b = device(2, Some(("Router", "router")), &[21]);
        let cables = vec![Cable::between(100, 11, 21)];
        let topology = Topology::build([&a, &b], &cables);
        let devices = [(&a, Some((10.0, 20.0))), (&b, Some((10.0, 20.1)))];

        let map = build_map(&PluginSettings::default(), &topology, MapRequest::new("geomap", &devices));

        assert_eq!(map.connections, vec![Connection((10.0, 20.0), (10.0, 20.1))]);
        assert_eq!(map.markers.len(), 2);
    }

    #[test]
    fn test_edges_deduplicated_regardless_of_visit_order() {
        let a = device(1, None, &[11]);
        let b = device(2, None, &[21]);
        let cables = vec![Cable::between(100, 11, 21)];
        let topology = Topology::build([&a, &b], &cables);

        let forward = [(&a, Some((1.0, 1.0))), (&b, Some((2.0, 2.0)))];
        let backward = [(&b, Some((2.0, 2.0))), (&a, Some((1.0, 1.0)))];
        let settings = PluginSettings::default();

        let m1 = build_map(&settings, &topology, MapRequest::new("m", &forward));
        let m2 = build_map(&settings, &topology, MapRequest::new("m", &backward));
        assert_eq!(m1.connections.len(), 1);
        assert_eq!(m1.connections, m2.connections);
    }

    #[test]
    fn test_connections_disabled() {
        let a = device(1, None, &[11]);
        let b = device(2, None, &[21]);
        let cables = vec![Cable::between(100, 11, 21)];
        let topology = Topology::build([&a, &b], &cables);
        let devices = [(&a, Some((1.0, 1.0))), (&b, Some((2.0, 2.0)))];

        let mut request = MapRequest::new("m", &devices);
        request.calculate_connections = false;
        let map = build_map(&PluginSettings::default(), &topology, request);
        assert!(map.connections.is_empty());
    }

    #[test]
    fn test_peer_without_position_gets_no_edge() {
        let a = device(1, None, &[11]);
        let b = device(2, None, &[21]);
        let cables = vec![Cable::between(100, 11, 21)];
        let topology = Topology::build([&a, &b], &cables);
        let devices = [(&a, Some((1.0, 1.0))), (&b, None)];

        let map = build_map(&PluginSettings::default(), &topology, MapRequest::new("m", &devices));
        assert_eq!(map.markers.len(), 1);
        assert!(map.connections.is_empty());
    }

    #[test]
    fn test_invalid_entries_are_dropped() {
        let zero = device(0, None, &[]);
        let nan = device(3, None, &[]);
        let ok = device(4, None, &[]);
        let devices = [
            (&zero, Some((1.0, 1.0))),
            (&nan, Some((f64::NAN, 1.0))),
            (&ok, Some((5.0, 5.0))),
        ];
        let map = build_map(&PluginSettings::default(), &Topology::default(), MapRequest::new("m", &devices));
        assert_eq!(map.markers.len(), 1);
        assert_eq!(map.markers[0].position, (5.0, 5.0));
    }

    #[test]
    fn test_marker_icon_and_role_fallbacks() {
        let with_role = device(1, Some(("Core Switch", "core-switch")), &[]);
        let without_role = device(2, None, &[]);
        let devices = [(&with_role, Some((1.0, 1.0))), (&without_role, Some((2.0, 2.0)))];
        let map = build_map(&PluginSettings::default(), &Topology::default(), MapRequest::new("m", &devices));

        assert_eq!(map.markers[0].icon, "core-switch");
        assert_eq!(map.markers[1].icon, DEFAULT_ICON);
        match &map.markers[1].owner {
            MarkerOwner::Device(info) => {
                assert_eq!(info.role, UNKNOWN_ROLE);
                assert_eq!(info.url, "/dcim/devices/2/");
            }
            other => panic!("unexpected owner {:?}", other),
        }
    }

    #[test]
    fn test_colocated_devices_produce_no_degenerate_edge() {
        let a = device(1, None, &[11]);
        let b = device(2, None, &[21]);
        let cables = vec![Cable::between(100, 11, 21)];
        let topology = Topology::build([&a, &b], &cables);
        let devices = [(&a, Some((1.0, 1.0))), (&b, Some((1.0, 1.0)))];

        let map = build_map(&PluginSettings::default(), &topology, MapRequest::new("m", &devices));
        assert!(map.connections.is_empty());
    }

    #[test]
    fn test_site_markers_only_when_enabled() {
        let sites = vec![
            Site {
                id: 7,
                name: "HQ".to_string(),
                latitude: Some(50.0),
                longitude: Some(8.0),
            },
            Site {
                id: 8,
                name: "Nowhere".to_string(),
                latitude: None,
                longitude: Some(8.0),
            },
        ];
        let mut settings = PluginSettings::default();
        let mut request = MapRequest::new("m", &[]);
        request.sites = &sites;

        assert!(build_map(&settings, &Topology::default(), request.clone()).markers.is_empty());

        settings.show_sites = true;
        let map = build_map(&settings, &Topology::default(), request);
        assert_eq!(map.markers.len(), 1);
        assert_eq!(map.markers[0].icon, SITE_ICON);
    }

    #[test]
    fn test_serialized_shape() {
        let a = device(1, Some(("Switch", "switch")), &[11]);
        let b = device(2, None, &[21]);
        let cables = vec![Cable::between(100, 11, 21)];
        let topology = Topology::build([&a, &b], &cables);
        let devices = [(&a, Some((10.0, 20.0))), (&b, Some((10.0, 20.1)))];

        let mut settings = PluginSettings::default();
        settings.geomap_settings.insert("map_id".to_string(), json!("shadowed"));
        let mut request = MapRequest::new("geomap", &devices);
        request.vlan = Some(5);

        let value = serde_json::to_value(build_map(&settings, &topology, request)).unwrap();
        assert_eq!(value["map_id"], "geomap");
        assert_eq!(value["crs"], "EPSG3857");
        assert_eq!(value["vlan"], 5);
        assert_eq!(value["markers"][0]["position"], json!([10.0, 20.0]));
        assert_eq!(value["markers"][0]["device"]["name"], "dev1");
        assert_eq!(value["markers"][0]["device"]["role"], "Switch");
        assert_eq!(value["connections"], json!([[[10.0, 20.0], [10.0, 20.1]]]));
    }
}
