use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use opentelemetry::metrics::MeterProvider;
use serde_json::{json, Value};

use devicemap::api::routes::{map_router, AppMetrics};
use devicemap::repository::{DeviceRepository, InMemoryRepository, Snapshot};
use devicemap::service::DeviceMap;
use devicemap::settings::PluginSettings;

// Inventory used by every test:
//
//   sw-core (HQ 10.0,20.0) --11/21-- rtr-remote (Remote 10.0,20.1)   vlan 5
//   sw-core --12/31-- cpe-a (custom field 10.5,20.5)                  vlan 6
//   sw-core --13/41-- cpe-b (no location)                             vlan 5 on sw-core side
//   sw-core --14/51-- cpe-c (site without coordinates)                vlan 5 on sw-core side
fn snapshot() -> Snapshot {
    serde_json::from_value(json!({
        "sites": [
            {"id": 1, "name": "HQ", "latitude": 10.0, "longitude": 20.0},
            {"id": 2, "name": "Remote", "latitude": 10.0, "longitude": 20.1},
            {"id": 3, "name": "Unmapped"},
            {"id": 4, "name": "Empty Lot", "latitude": 11.0, "longitude": 21.0}
        ],
        "devices": [
            {"id": 1, "name": "sw-core", "site": {"id": 1},
             "role": {"id": 1, "name": "Switch", "slug": "switch"},
             "device_type": {"model": "C9300", "manufacturer": {"name": "Cisco"}},
             "interfaces": [
                {"id": 11, "name": "Gi1/0/1", "tagged_vlans": [5]},
                {"id": 12, "name": "Gi1/0/2", "untagged_vlan": 6},
                {"id": 13, "name": "Gi1/0/3", "untagged_vlan": 5},
                {"id": 14, "name": "Gi1/0/4", "untagged_vlan": 5}
             ]},
            {"id": 2, "name": "rtr-remote", "site": {"id": 2},
             "role": {"id": 3, "name": "Router", "slug": "router"},
             "interfaces": [{"id": 21, "name": "ge-0/0/0", "untagged_vlan": 5}]},
            {"id": 3, "name": "cpe-a", "site": {"id": 3},
             "role": {"id": 2, "name": "CPE", "slug": "cpe"},
             "custom_fields": {"geolocation": "10.5, 20.5"},
             "comments": "Port 10",
             "interfaces": [{"id": 31, "name": "wan"}]},
            {"id": 4, "name": "cpe-b",
             "role": {"id": 2, "name": "CPE", "slug": "cpe"},
             "comments": "Port 2",
             "interfaces": [{"id": 41, "name": "wan"}]},
            {"id": 5, "name": "cpe-c", "site": {"id": 3},
             "role": {"id": 2, "name": "CPE", "slug": "cpe"},
             "comments": "Port 1",
             "interfaces": [{"id": 51, "name": "wan"}]}
        ],
        "cables": [
            {"id": 100,
             "a_terminations": [{"object_type": "dcim.interface", "object_id": 11}],
             "b_terminations": [{"object_type": "dcim.interface", "object_id": 21}]},
            {"id": 101,
             "a_terminations": [{"object_type": "dcim.interface", "object_id": 12}],
             "b_terminations": [{"object_type": "dcim.interface", "object_id": 31}]},
            {"id": 102,
             "a_terminations": [{"object_type": "dcim.interface", "object_id": 13}],
             "b_terminations": [{"object_type": "dcim.interface", "object_id": 41}]},
            {"id": 103,
             "a_terminations": [{"object_type": "dcim.interface", "object_id": 14}],
             "b_terminations": [{"object_type": "dcim.interface", "object_id": 51}]},
            {"id": 104,
             "a_terminations": [{"object_type": "dcim.interface", "object_id": 9999}],
             "b_terminations": []}
        ],
        "vlans": [
            {"id": 5, "vid": 100, "name": "mgmt", "group": 1},
            {"id": 6, "vid": 200, "name": "customers"}
        ],
        "vlan_groups": [
            {"id": 1, "name": "core"},
            {"id": 2, "name": "edge"}
        ]
    }))
    .unwrap()
}

// Helper function to start the map server for testing
async fn start_test_server(settings: PluginSettings) -> (JoinHandle<()>, u16) {
    // Use a random available port
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let repository: Arc<dyn DeviceRepository> = Arc::new(InMemoryRepository::from(snapshot()));
    let service = Arc::new(DeviceMap::new(repository, settings));

    // Create metrics for testing
    let meter = opentelemetry::metrics::noop::NoopMeterProvider::new().meter("test");
    let app_metrics = Arc::new(AppMetrics {
        request_counter: meter.u64_counter("test_requests").init(),
        marker_histogram: meter.f64_histogram("test_markers").init(),
    });

    let app_state = (Arc::clone(&service), Arc::clone(&app_metrics));

    let app = axum::Router::new()
        .merge(map_router(app_state))
        .with_state((service, app_metrics));

    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    sleep(Duration::from_millis(100)).await;

    (server, port)
}

async fn get(port: u16, path: &str) -> (u16, Value) {
    let response = reqwest::get(format!("http://127.0.0.1:{}{}", port, path))
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

fn marker_names(map: &Value) -> Vec<String> {
    map["markers"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["device"]["name"].as_str().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_map_with_connections() {
    let (server, port) = start_test_server(PluginSettings::default()).await;

    let (status, body) = get(port, "/map/").await;
    assert_eq!(status, 200);

    let map = &body["map_data"];
    assert_eq!(map["map_id"], "geomap");
    assert_eq!(map["crs"], "EPSG3857");
    assert_eq!(marker_names(map), vec!["cpe-a", "rtr-remote", "sw-core"]);

    let connections = map["connections"].as_array().unwrap();
    assert_eq!(connections.len(), 2);
    assert!(connections.contains(&json!([[10.0, 20.0], [10.0, 20.1]])));
    assert!(connections.contains(&json!([[10.0, 20.0], [10.5, 20.5]])));

    let unlocated: Vec<&str> = body["non_geolocated_devices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(unlocated, vec!["cpe-b", "cpe-c"]);
    assert!(body["filter_form"]["errors"].as_object().unwrap().is_empty());

    server.abort();
}

#[tokio::test]
async fn test_map_without_connections() {
    let (server, port) = start_test_server(PluginSettings::default()).await;

    let (status, body) = get(port, "/map/?calculate_connections=false").await;
    assert_eq!(status, 200);
    assert_eq!(body["map_data"]["markers"].as_array().unwrap().len(), 3);
    assert!(body["map_data"]["connections"].as_array().unwrap().is_empty());

    server.abort();
}

#[tokio::test]
async fn test_map_filtered_by_vlan() {
    let (server, port) = start_test_server(PluginSettings::default()).await;

    let (status, body) = get(port, "/map/?vlan=5").await;
    assert_eq!(status, 200);

    let map = &body["map_data"];
    assert_eq!(map["vlan"], 5);
    assert_eq!(marker_names(map), vec!["rtr-remote", "sw-core"]);
    assert_eq!(map["connections"], json!([[[10.0, 20.0], [10.0, 20.1]]]));
    assert!(body["non_geolocated_devices"].as_array().unwrap().is_empty());

    server.abort();
}

#[tokio::test]
async fn test_role_filter_excludes_connected_devices() {
    let (server, port) = start_test_server(PluginSettings::default()).await;

    let (status, body) = get(port, "/map/?device_roles=2").await;
    assert_eq!(status, 200);

    let map = &body["map_data"];
    assert_eq!(marker_names(map), vec!["cpe-a"]);
    assert!(map["connections"].as_array().unwrap().is_empty());
    assert_eq!(body["non_geolocated_devices"].as_array().unwrap().len(), 2);

    server.abort();
}

#[tokio::test]
async fn test_vlan_outside_group_is_empty_not_an_error() {
    let (server, port) = start_test_server(PluginSettings::default()).await;

    let (status, body) = get(port, "/map/?vlan_group=2&vlan=5").await;
    assert_eq!(status, 200);
    assert!(body["map_data"]["markers"].as_array().unwrap().is_empty());
    assert!(body["map_data"]["connections"].as_array().unwrap().is_empty());
    assert!(body["non_geolocated_devices"].as_array().unwrap().is_empty());

    server.abort();
}

#[tokio::test]
async fn test_invalid_filter_redisplays_form() {
    let (server, port) = start_test_server(PluginSettings::default()).await;

    let (status, body) = get(port, "/map/?vlan=abc&device_roles=1").await;
    assert_eq!(status, 200);
    assert!(body["map_data"].is_null());
    assert!(body["filter_form"]["errors"]["vlan"].is_array());
    assert_eq!(body["filter_form"]["values"]["vlan"], "abc");
    assert_eq!(body["filter_form"]["values"]["device_roles"], json!(["1"]));

    server.abort();
}

#[tokio::test]
async fn test_site_markers_when_enabled() {
    let settings = PluginSettings {
        show_sites: true,
        ..Default::default()
    };
    let (server, port) = start_test_server(settings).await;

    let (_, body) = get(port, "/map/").await;
    let sites: Vec<&str> = body["map_data"]["markers"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["site"]["name"].as_str())
        .collect();
    assert_eq!(sites, vec!["HQ", "Remote", "Empty Lot"]);

    server.abort();
}

#[tokio::test]
async fn test_connected_cpe_sorted_numerically() {
    let (server, port) = start_test_server(PluginSettings::default()).await;

    let (status, body) = get(port, "/map/connected-cpe/1").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], true);
    assert_eq!(body["device_type"], "Cisco C9300");

    let comments: Vec<&str> = body["cpe_devices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["comments"].as_str().unwrap())
        .collect();
    assert_eq!(comments, vec!["Port 1", "Port 2", "Port 10"]);
    assert_eq!(body["cpe_devices"][0]["url"], "/dcim/devices/5/");

    server.abort();
}

#[tokio::test]
async fn test_connected_cpe_filtered_by_vlan() {
    let (server, port) = start_test_server(PluginSettings::default()).await;

    let (_, body) = get(port, "/map/connected-cpe/1?vlan=6").await;
    let names: Vec<&str> = body["cpe_devices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["cpe-a"]);

    let (_, body) = get(port, "/map/connected-cpe/1?vlan=5").await;
    let names: Vec<&str> = body["cpe_devices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["cpe-c", "cpe-b"]);

    server.abort();
}

#[tokio::test]
async fn test_connected_cpe_errors() {
    let (server, port) = start_test_server(PluginSettings::default()).await;

    let (status, body) = get(port, "/map/connected-cpe/999").await;
    assert_eq!(status, 404);
    assert_eq!(body, json!({"status": false, "error": "Device not found"}));

    let (status, _) = get(port, "/map/connected-cpe/not-a-number").await;
    assert_eq!(status, 404);

    let (status, body) = get(port, "/map/connected-cpe/1?vlan=77").await;
    assert_eq!(status, 400);
    assert_eq!(body["status"], false);
    assert_eq!(body["error"], "Form fields filled out incorrectly");
    assert!(body["form_errors"]["vlan"].is_array());

    server.abort();
}
