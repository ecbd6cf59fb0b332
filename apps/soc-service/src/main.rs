use anyhow::{Context, Result};
use futures::future;
use soc_service::config::Config;
use soc_service::http::{router, HttpState};
use soc_service::ingest::SocIngestor;
use soc_service::model::SocPredictor;
use soc_service::mqtt;
use soc_service::stats::IngestStats;
use std::sync::Arc;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,soc_service=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(normalize_otlp_http_endpoint(endpoint));
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "soc-service"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let predictor = Arc::new(SocPredictor::load(config.model_backend, &config.model_path));
    let stats = Arc::new(IngestStats::new());
    let ingestor = SocIngestor::new(predictor, config.window_size, config.history_size, stats);
    tracing::info!(
        window_size = config.window_size,
        history_size = config.history_size,
        backend = %config.model_backend,
        "soc-service starting"
    );

    let mqtt_handle = if config.enable_mqtt_listener {
        let settings = config.mqtt.clone();
        let default_device_id = config.default_device_id.clone();
        let ingestor_clone = ingestor.clone();
        Some(tokio::spawn(async move {
            mqtt::run_listener(settings, default_device_id, ingestor_clone).await
        }))
    } else {
        tracing::info!("MQTT listener disabled");
        None
    };

    let app = router(HttpState {
        ingestor,
        upload_max_rows: config.upload_max_rows,
        upload_max_bytes: config.upload_max_bytes,
        default_device_id: config.default_device_id.clone(),
        upload_device_id: config.upload_device_id.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("failed to bind {}", config.http_bind))?;
    tracing::info!(addr = %config.http_bind, "HTTP API listening");
    let http_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::select! {
        res = http_handle => {
            match res {
                Ok(Err(err)) => tracing::error!(error=%err, "HTTP server exited"),
                Err(err) => tracing::error!(error=%err, "HTTP task failed"),
                Ok(Ok(())) => {}
            }
        }
        _ = async {
            if let Some(handle) = mqtt_handle {
                match handle.await {
                    Ok(Err(err)) => tracing::warn!(error=%err, "MQTT listener exited"),
                    Err(err) => tracing::warn!(error=%err, "MQTT task failed"),
                    Ok(Ok(())) => {}
                }
            } else {
                future::pending::<()>().await;
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
