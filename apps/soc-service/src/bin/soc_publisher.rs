use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, QoS};
use serde::Serialize;
use soc_service::config::PublisherConfig;
use soc_service::ingest::{epoch_seconds, Sample};
use soc_service::mqtt::mqtt_options;
use soc_service::upload::{read_samples, ColumnDefaults, TabularFormat};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const DISCONNECT_FLUSH: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct TelemetryOut<'a> {
    device_id: &'a str,
    #[serde(rename = "Voltage")]
    voltage: f64,
    #[serde(rename = "Current")]
    current: f64,
    #[serde(rename = "Temperature")]
    temperature: f64,
    ts: f64,
}

impl<'a> TelemetryOut<'a> {
    fn new(device_id: &'a str, sample: &Sample, ts: f64) -> Self {
        Self {
            device_id,
            voltage: sample.voltage,
            current: sample.current,
            temperature: sample.temperature,
            ts,
        }
    }
}

/// The poller stops once the DISCONNECT packet has been written to the broker.
fn is_disconnect_sent(event: &Event) -> bool {
    matches!(event, Event::Outgoing(Outgoing::Disconnect))
}

fn spawn_poller(mut eventloop: EventLoop) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        loop {
            let event = eventloop.poll().await.map_err(|err| anyhow!(err))?;
            if is_disconnect_sent(&event) {
                return Ok(());
            }
        }
    })
}

async fn publish_all(
    client: &AsyncClient,
    config: &PublisherConfig,
    samples: &[Sample],
) -> Result<()> {
    for (idx, sample) in samples.iter().enumerate() {
        let ts = epoch_seconds::to_f64(&Utc::now());
        let message = TelemetryOut::new(&config.device_id, sample, ts);
        let payload = serde_json::to_vec(&message)?;
        client
            .publish(config.mqtt.topic.clone(), QoS::AtMostOnce, false, payload)
            .await
            .with_context(|| format!("failed to publish row {}", idx + 1))?;
        tracing::debug!(row = idx + 1, ?message, "published sample");
        sleep(config.interval).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,soc_publisher=info".into()),
        )
        .init();

    let config = PublisherConfig::from_env()?;
    let format = TabularFormat::from_filename(&config.csv_path.to_string_lossy())?;
    let bytes = std::fs::read(&config.csv_path)
        .with_context(|| format!("failed to open {}", config.csv_path.display()))?;
    let samples = read_samples(format, bytes, ColumnDefaults::REPLAY, config.max_rows)
        .with_context(|| format!("failed to read {}", config.csv_path.display()))?;
    if samples.is_empty() {
        bail!("{} has no rows to publish", config.csv_path.display());
    }

    let (client, eventloop) = AsyncClient::new(mqtt_options(&config.mqtt), 32);
    let mut poller = spawn_poller(eventloop);
    tracing::info!(
        host = %config.mqtt.host,
        port = config.mqtt.port,
        topic = %config.mqtt.topic,
        rows = samples.len(),
        file = %config.csv_path.display(),
        "publishing recorded discharge"
    );

    let mut poller_finished = false;
    let outcome = tokio::select! {
        res = publish_all(&client, &config, &samples) => res,
        res = &mut poller => {
            poller_finished = true;
            match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.context("MQTT connection failed")),
                Err(err) => Err(err.into()),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("stopped by user");
            Ok(())
        }
    };

    if !poller_finished {
        match client.disconnect().await {
            Ok(()) => match timeout(DISCONNECT_FLUSH, &mut poller).await {
                Ok(Ok(Err(err))) => {
                    tracing::debug!(error=%err, "event loop ended during disconnect")
                }
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("DISCONNECT not flushed in time");
                    poller.abort();
                }
            },
            Err(err) => {
                tracing::debug!(error=%err, "disconnect failed");
                poller.abort();
            }
        }
    }
    tracing::info!("disconnected");
    outcome
}
