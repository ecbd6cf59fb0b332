use crate::model::ModelBackend;
use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Whole recordings are uploaded and cut down to the row cap afterwards.
pub const DEFAULT_UPLOAD_MAX_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keepalive_secs: u64,
    pub reconnect_secs: u64,
}

impl MqttSettings {
    fn from_lookup<F>(lookup: &F, client_prefix: &str) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let reconnect_secs = parse_or(lookup, &["SOC_MQTT_RECONNECT_SECS"], 5u64)?;
        if reconnect_secs == 0 {
            bail!("SOC_MQTT_RECONNECT_SECS must be at least 1");
        }
        Ok(Self {
            host: string_or(lookup, &["SOC_MQTT_HOST", "MQTT_HOST"], "broker.emqx.io"),
            port: parse_or(lookup, &["SOC_MQTT_PORT", "MQTT_PORT"], 1883u16)?,
            topic: string_or(lookup, &["SOC_MQTT_TOPIC"], "bms/demo"),
            username: optional(lookup, &["SOC_MQTT_USERNAME"]),
            password: optional(lookup, &["SOC_MQTT_PASSWORD"]),
            client_id: string_or(
                lookup,
                &["SOC_MQTT_CLIENT_ID"],
                &format!("{client_prefix}-{}", std::process::id()),
            ),
            keepalive_secs: parse_or(lookup, &["SOC_MQTT_KEEPALIVE_SECS"], 60u64)?,
            reconnect_secs,
        })
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub window_size: usize,
    pub history_size: usize,
    pub mqtt: MqttSettings,
    pub enable_mqtt_listener: bool,
    pub http_bind: String,
    pub model_backend: ModelBackend,
    pub model_path: PathBuf,
    pub upload_max_rows: usize,
    pub upload_max_bytes: usize,
    pub default_device_id: String,
    pub upload_device_id: String,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let window_size = parse_or(&lookup, &["SOC_WINDOW_SIZE", "SEQ_LEN"], 15usize)?;
        if window_size == 0 {
            bail!("SOC_WINDOW_SIZE must be at least 1");
        }
        let history_size = parse_or(&lookup, &["SOC_HISTORY_SIZE"], 200usize)?;
        if history_size == 0 {
            bail!("SOC_HISTORY_SIZE must be at least 1");
        }
        let upload_max_rows = parse_or(&lookup, &["SOC_UPLOAD_MAX_ROWS"], 100usize)?;
        if upload_max_rows == 0 {
            bail!("SOC_UPLOAD_MAX_ROWS must be at least 1");
        }
        let upload_max_bytes =
            parse_or(&lookup, &["SOC_UPLOAD_MAX_BYTES"], DEFAULT_UPLOAD_MAX_BYTES)?;
        if upload_max_bytes == 0 {
            bail!("SOC_UPLOAD_MAX_BYTES must be at least 1");
        }

        let model_backend = parse_or(
            &lookup,
            &["SOC_MODEL_BACKEND", "MODEL_BACKEND"],
            ModelBackend::Lstm,
        )?;
        let model_path = PathBuf::from(string_or(
            &lookup,
            &["SOC_MODEL_PATH", "MODEL_PATH"],
            "soc_model.json",
        ));

        Ok(Self {
            window_size,
            history_size,
            mqtt: MqttSettings::from_lookup(&lookup, "soc-service")?,
            enable_mqtt_listener: parse_bool_or(&lookup, "SOC_ENABLE_MQTT", true)?,
            http_bind: string_or(&lookup, &["SOC_HTTP_BIND"], "0.0.0.0:8000"),
            model_backend,
            model_path,
            upload_max_rows,
            upload_max_bytes,
            default_device_id: string_or(&lookup, &["SOC_DEFAULT_DEVICE_ID"], "sim"),
            upload_device_id: string_or(&lookup, &["SOC_UPLOAD_DEVICE_ID"], "file"),
            otlp_endpoint: optional(&lookup, &["OTEL_EXPORTER_OTLP_ENDPOINT"]),
        })
    }
}

/// Settings for the `soc-publisher` replay tool.
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    pub mqtt: MqttSettings,
    pub csv_path: PathBuf,
    pub device_id: String,
    pub interval: Duration,
    pub max_rows: usize,
}

impl PublisherConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let interval_secs: f64 =
            parse_or(&lookup, &["SOC_PUBLISHER_SLEEP_SEC", "SLEEP_SEC"], 1.0f64)?;
        let interval = Duration::try_from_secs_f64(interval_secs)
            .map_err(|err| anyhow!("invalid SOC_PUBLISHER_SLEEP_SEC {interval_secs}: {err}"))?;

        Ok(Self {
            mqtt: MqttSettings::from_lookup(&lookup, "soc-publisher")?,
            csv_path: PathBuf::from(string_or(
                &lookup,
                &["SOC_PUBLISHER_CSV", "CSV_B0006"],
                "B0006_discharge_clean.csv",
            )),
            device_id: string_or(&lookup, &["SOC_PUBLISHER_DEVICE_ID"], "B0006"),
            interval,
            max_rows: parse_or(&lookup, &["SOC_PUBLISHER_MAX_ROWS"], 200usize)?,
        })
    }
}

/// First non-blank value among `keys`, with the key it came from.
fn lookup_first<F>(lookup: &F, keys: &[&str]) -> Option<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter().find_map(|key| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| (key.to_string(), v))
    })
}

fn optional<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_first(lookup, keys).map(|(_, value)| value)
}

fn string_or<F>(lookup: &F, keys: &[&str], default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, keys).unwrap_or_else(|| default.to_string())
}

fn parse_or<F, T>(lookup: &F, keys: &[&str], default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup_first(lookup, keys) {
        Some((key, raw)) => raw
            .parse::<T>()
            .map_err(|err| anyhow!("{err}"))
            .with_context(|| format!("invalid {key}={raw:?}")),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match optional(lookup, &[key]) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("invalid {key}={raw:?}")),
        },
        None => Ok(default),
    }
}
