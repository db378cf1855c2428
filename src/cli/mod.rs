pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::broker::ReconnectPolicy;
use crate::native::LogFormat;
use config::{Config, StorageBackend};

#[derive(Parser)]
#[command(name = "sensorbridge")]
#[command(about = "Bridge MQTT sensor traffic to WebSocket clients and InfluxDB")]
#[command(version)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text", env = "LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bridge and its HTTP/WebSocket server
    Serve(ConfigArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
    /// Stream live messages from a running bridge
    Tail(TailArgs),
    /// Publish one message through a running bridge
    Publish(PublishArgs),
}

/// Configuration sources. Flags and environment variables override the
/// config file, which overrides built-in defaults.
#[derive(clap::Args, Debug, Default)]
pub struct ConfigArgs {
    /// Path to a TOML config file
    #[arg(long, env = "SENSORBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long, env = "BIND_ADDR")]
    pub bind: Option<String>,

    /// MQTT broker host
    #[arg(long, env = "MQTT_HOST")]
    pub mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT")]
    pub mqtt_port: Option<u16>,

    /// Seconds to wait before resubscribing after a broker failure
    #[arg(long, env = "RECONNECT_DELAY_SECS")]
    pub reconnect_delay_secs: Option<u64>,

    /// Reconnect delay policy
    #[arg(long, value_enum)]
    pub reconnect_policy: Option<ReconnectPolicy>,

    /// Time-series backend
    #[arg(long, value_enum, env = "STORAGE_BACKEND")]
    pub storage_backend: Option<StorageBackend>,

    /// InfluxDB base URL
    #[arg(long, env = "INFLUX_URL")]
    pub influx_url: Option<String>,

    /// InfluxDB API token
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,

    /// InfluxDB organization
    #[arg(long, env = "INFLUX_ORG")]
    pub influx_org: Option<String>,

    /// InfluxDB bucket
    #[arg(long, env = "INFLUX_BUCKET")]
    pub influx_bucket: Option<String>,
}

impl ConfigArgs {
    pub fn resolve(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut Config) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut config.server.bind, &self.bind);
        set(&mut config.mqtt.host, &self.mqtt_host);
        set(&mut config.mqtt.port, &self.mqtt_port);
        set(&mut config.mqtt.reconnect.delay_secs, &self.reconnect_delay_secs);
        set(&mut config.mqtt.reconnect.policy, &self.reconnect_policy);
        set(&mut config.storage.backend, &self.storage_backend);
        set(&mut config.storage.influx.url, &self.influx_url);
        set(&mut config.storage.influx.token, &self.influx_token);
        set(&mut config.storage.influx.org, &self.influx_org);
        set(&mut config.storage.influx.bucket, &self.influx_bucket);
    }
}

#[derive(clap::Args)]
pub struct TailArgs {
    /// WebSocket URL of the bridge
    #[arg(long, default_value = "ws://127.0.0.1:8000/ws")]
    pub url: String,

    /// Only print messages whose topic starts with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
}

#[derive(clap::Args)]
pub struct PublishArgs {
    /// Topic to publish to
    pub topic: String,

    /// Payload text
    pub payload: String,

    /// WebSocket URL of the bridge
    #[arg(long, default_value = "ws://127.0.0.1:8000/ws")]
    pub url: String,
}
