use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::get,
    response::IntoResponse,
};
use opentelemetry::{global, KeyValue};
use opentelemetry::metrics::{MeterProvider, Unit};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{self, Sampler},
    Resource,
};
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, instrument};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use devicemap::api::routes::{self, AppMetrics};
use devicemap::config::AppConfig;
use devicemap::repository;
use devicemap::service::DeviceMap;
use devicemap::settings::PluginSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize OpenTelemetry tracing
    let tracer = init_tracer()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(tracer) = tracer {
        Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .with(OpenTelemetryLayer::new(tracer))
            .init();
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    // Load configuration
    let config = AppConfig::load()?;
    info!("Loaded configuration: port={}, source={}", config.port, config.source.backend);

    let settings = PluginSettings::from_config(&config.plugin);
    info!(
        "Geolocation custom field: {}, CPE role: {}",
        settings.device_geolocation_cf, settings.cpe_device_role
    );

    // Open the inventory source
    let repository = repository::open(&config).await?;
    let service = Arc::new(DeviceMap::new(repository, settings));

    // Initialize OpenTelemetry metrics with Prometheus
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter().with_registry(registry.clone())
        .build()?;
    let meter_provider = opentelemetry_sdk::metrics::MeterProvider::builder()
        .with_resource(Resource::new(vec![
            KeyValue::new("service.name", "devicemap"),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]))
        .with_reader(exporter)
        .build();
    let meter = meter_provider.meter("devicemap");

    let request_counter = meter
        .u64_counter("http_requests_total")
        .with_description("Total number of HTTP requests")
        .with_unit(Unit::new("requests"))
        .init();

    let marker_histogram = meter
        .f64_histogram("map_markers")
        .with_description("Markers per rendered map")
        .with_unit(Unit::new("markers"))
        .init();

    let app_metrics = Arc::new(AppMetrics {
        request_counter,
        marker_histogram,
    });

    let app_state = (Arc::clone(&service), Arc::clone(&app_metrics));

    let metrics_registry = registry.clone();

    let app = Router::new()
        .route("/metrics", get(move || metrics_handler(metrics_registry.clone())))
        .merge(routes::map_router(app_state))
        .with_state((service, app_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting devicemapd server on {}", addr);
    info!("Metrics available at http://{}:{}/metrics", addr.ip(), addr.port());

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shut down OpenTelemetry tracer provider
    global::shutdown_tracer_provider();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

// OTLP export is enabled by OTEL_EXPORTER_OTLP_ENDPOINT
fn init_tracer() -> anyhow::Result<Option<trace::Tracer>> {
    let Ok(otlp_endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok(None);
    };

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(otlp_endpoint)
        )
        .with_trace_config(
            trace::config()
                .with_sampler(Sampler::AlwaysOn)
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", "devicemap"),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ]))
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    Ok(Some(tracer))
}

// Metrics endpoint handler for Prometheus scraping
#[instrument(name = "metrics_handler", skip_all)]
async fn metrics_handler(registry: prometheus::Registry) -> impl IntoResponse {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match String::from_utf8(buffer) {
        Ok(metrics_string) => metrics_string.into_response(),
        Err(e) => {
            warn!("Failed to convert metrics to string: {}", e);
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "Failed to convert metrics to string").into_response()
        }
    }
}
