use crate::config::MqttSettings;
use crate::ingest::{PredictionRecord, SocIngestor};
use crate::model::SocEstimator;
use crate::telemetry::parse_telemetry_payload;
use anyhow::Result;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::time::sleep;

pub fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.host.clone(),
        settings.port,
    );
    options.set_keep_alive(settings.keepalive());
    if let Some(username) = &settings.username {
        options.set_credentials(
            username.clone(),
            settings.password.clone().unwrap_or_default(),
        );
    }
    options
}

/// Subscribe to the telemetry topic and feed every decodable message into `ingestor`.
/// Reconnects forever; a broker outage only pauses ingestion. Messages are observed one
/// at a time on the blocking pool, so per-device order follows delivery order.
pub async fn run_listener<E>(
    settings: MqttSettings,
    default_device_id: String,
    ingestor: SocIngestor<E>,
) -> Result<()>
where
    E: SocEstimator + 'static,
{
    let stats = ingestor.stats();
    loop {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(&settings), 32);

        if let Err(err) = client
            .subscribe(settings.topic.clone(), QoS::AtMostOnce)
            .await
        {
            tracing::warn!(error=%err, "failed to subscribe to MQTT; retrying");
            stats.set_mqtt_connected(false);
            sleep(settings.reconnect_delay()).await;
            continue;
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    tracing::info!(
                        host = %settings.host,
                        port = settings.port,
                        topic = %settings.topic,
                        "connected to MQTT broker"
                    );
                    stats.set_mqtt_connected(true);
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let ingestor = ingestor.clone();
                    let default_device_id = default_device_id.clone();
                    let handled = tokio::task::spawn_blocking(move || {
                        let mut payload = publish.payload.to_vec();
                        let topic = publish.topic.as_str();
                        handle_message(&ingestor, &default_device_id, topic, &mut payload);
                    })
                    .await;
                    if let Err(err) = handled {
                        tracing::error!(error=%err, "MQTT message handler failed");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    stats.set_mqtt_connected(false);
                    stats.record_error(err.to_string());
                    tracing::warn!(error=%err, "MQTT connection dropped; reconnecting");
                    break;
                }
            }
        }

        sleep(settings.reconnect_delay()).await;
    }
}

/// Decode and observe one bus message. Malformed payloads are counted and skipped.
pub fn handle_message<E: SocEstimator>(
    ingestor: &SocIngestor<E>,
    default_device_id: &str,
    topic: &str,
    payload: &mut [u8],
) -> Option<PredictionRecord> {
    match parse_telemetry_payload(payload, default_device_id) {
        Ok(message) => Some(ingestor.observe(&message.device_id, message.sample)),
        Err(err) => {
            tracing::warn!(error=%err, topic=%topic, "failed to decode MQTT payload");
            ingestor
                .stats()
                .record_dropped(format!("{topic}: {err}"));
            None
        }
    }
}
