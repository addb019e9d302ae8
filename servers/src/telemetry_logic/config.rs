use anyhow::{Context, Result, bail};
use clap::Parser;
use lib_telemetry::HubOptions;
use lib_telemetry::ingestors::SerialOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_telemetry.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Home telemetry ingestion and WebSocket broadcast server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TELEMETRY_HOST", help = "Address to listen on for subscribers.")]
    pub host: Option<String>,

    #[clap(long, env = "TELEMETRY_PORT", help = "Port to listen on for subscribers.")]
    pub port: Option<u16>,

    #[clap(long, env = "TELEMETRY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TELEMETRY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TELEMETRY_SOURCE", help = "Frame source: serial or mock.")]
    pub source: Option<String>,

    #[clap(long, env = "TELEMETRY_SERIAL_PORT", help = "Serial device path or port name.")]
    pub serial_port: Option<String>,

    #[clap(long, env = "TELEMETRY_BAUD_RATE", help = "Serial line speed.")]
    pub baud_rate: Option<u32>,

    #[clap(long, env = "TELEMETRY_SERIAL_TIMEOUT_MS", help = "Upper bound in milliseconds on one serial read.")]
    pub serial_timeout_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_SERIAL_SETTLE_MS", help = "Pause in milliseconds after opening the serial port.")]
    pub serial_settle_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_MOCK_INTERVAL_MS", help = "Emission interval in milliseconds of the mock feed.")]
    pub mock_interval_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_MOCK_SEED", help = "Seed for a reproducible mock feed.")]
    pub mock_seed: Option<u64>,

    #[clap(long, env = "TELEMETRY_POLL_INTERVAL_MS", help = "Pause in milliseconds after a cycle without a reading.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_STORAGE_URL", help = "Store connection string (postgres://... or file://...).")]
    pub storage_url: Option<String>,

    #[clap(long, env = "TELEMETRY_STORAGE_TABLE", help = "Table name for the PostgreSQL store.")]
    pub storage_table: Option<String>,

    #[clap(long, env = "TELEMETRY_STORAGE_TIMEOUT_MS", help = "Milliseconds allowed for one store write.")]
    pub storage_timeout_ms: Option<u64>,

    #[clap(long, env = "TELEMETRY_INCLUDE_ELECTRICITY_USAGE", help = "Include ElectricityUsage in broadcasts (true/false).")]
    pub include_electricity_usage: Option<bool>,

    #[clap(long, env = "TELEMETRY_SUBSCRIBER_QUEUE", help = "Pending messages allowed per subscriber before it is dropped.")]
    pub subscriber_queue: Option<usize>,

    #[clap(long, env = "TELEMETRY_SEND_TIMEOUT_MS", help = "Milliseconds allowed for one socket write to a subscriber.")]
    pub send_timeout_ms: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            source: other.source.or(self.source),
            serial_port: other.serial_port.or(self.serial_port),
            baud_rate: other.baud_rate.or(self.baud_rate),
            serial_timeout_ms: other.serial_timeout_ms.or(self.serial_timeout_ms),
            serial_settle_ms: other.serial_settle_ms.or(self.serial_settle_ms),
            mock_interval_ms: other.mock_interval_ms.or(self.mock_interval_ms),
            mock_seed: other.mock_seed.or(self.mock_seed),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            storage_url: other.storage_url.or(self.storage_url),
            storage_table: other.storage_table.or(self.storage_table),
            storage_timeout_ms: other.storage_timeout_ms.or(self.storage_timeout_ms),
            include_electricity_usage: other.include_electricity_usage.or(self.include_electricity_usage),
            subscriber_queue: other.subscriber_queue.or(self.subscriber_queue),
            send_timeout_ms: other.send_timeout_ms.or(self.send_timeout_ms),
        }
    }

    fn defaults() -> Config {
        Config {
            host: Some("127.0.0.1".to_string()),
            port: Some(3002),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            source: Some("serial".to_string()),
            serial_port: Some("/dev/ttyUSB0".to_string()),
            baud_rate: Some(9600),
            serial_timeout_ms: Some(100),
            serial_settle_ms: Some(2000),
            mock_interval_ms: Some(1000),
            storage_url: Some("file://./data/readings.jsonl".to_string()),
            storage_table: Some("readings".to_string()),
            storage_timeout_ms: Some(5000),
            subscriber_queue: Some(64),
            send_timeout_ms: Some(2000),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Serial,
    Mock,
}

/// Fully resolved settings; every knob has a value.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub source: SourceKind,
    pub serial: SerialOptions,
    pub mock_interval: Duration,
    pub mock_seed: Option<u64>,
    pub poll_interval: Duration,
    pub storage_url: String,
    pub storage_table: String,
    pub append_timeout: Duration,
    pub hub: HubOptions,
    pub send_timeout: Duration,
}

/// Settings plus what happened while loading them, logged once logging is up.
pub struct LoadedConfig {
    pub settings: Settings,
    pub notes: Vec<String>,
}

pub fn load_config() -> Result<LoadedConfig> {
    // CLI args already include env vars (clap `env`), so one parse covers both.
    let cli = Config::parse();
    let mut notes = Vec::new();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let file_config = if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("Failed to read config file {}", config_file_path.display()))?;
        let parsed = serde_json::from_str::<Config>(&config_str)
            .with_context(|| format!("Failed to parse config file {}", config_file_path.display()))?;
        notes.push(format!("Loaded config file {}", config_file_path.display()));
        Some(parsed)
    } else {
        notes.push(format!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        ));
        None
    };

    let settings = resolve(file_config, cli)?;
    Ok(LoadedConfig { settings, notes })
}

/// Layers defaults <- file <- CLI/env and validates the result.
pub fn resolve(file_config: Option<Config>, cli: Config) -> Result<Settings> {
    let mut merged = Config::defaults();
    if let Some(file_config) = file_config {
        merged = merged.merge(file_config);
    }
    let merged = merged.merge(cli);

    let source = match merged.source.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("serial") => SourceKind::Serial,
        Some("mock") => SourceKind::Mock,
        other => bail!("Unknown frame source {:?}, expected `serial` or `mock`", other.unwrap_or("")),
    };

    if merged.storage_timeout_ms == Some(0) {
        bail!("storageTimeoutMs must be at least 1");
    }

    let queue_capacity = merged.subscriber_queue.unwrap_or(64);
    if queue_capacity == 0 {
        bail!("subscriberQueue must be at least 1");
    }

    // The serial pipeline always published electricity usage, the mock one never did.
    let include_electricity_usage = merged
        .include_electricity_usage
        .unwrap_or(source == SourceKind::Serial);

    let poll_interval_ms = merged.poll_interval_ms.unwrap_or(match source {
        SourceKind::Serial => 100,
        SourceKind::Mock => 1000,
    });

    let defaults = SerialOptions::default();
    let serial = SerialOptions {
        path: merged.serial_port.unwrap_or(defaults.path),
        baud_rate: merged.baud_rate.unwrap_or(defaults.baud_rate),
        read_timeout: merged.serial_timeout_ms.map(Duration::from_millis).unwrap_or(defaults.read_timeout),
        settle_delay: merged.serial_settle_ms.map(Duration::from_millis).unwrap_or(defaults.settle_delay),
    };

    Ok(Settings {
        bind_addr: format!(
            "{}:{}",
            merged.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            merged.port.unwrap_or(3002)
        ),
        log_dir: merged.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
        log_level: merged.log_level.unwrap_or_else(|| "info".to_string()),
        source,
        serial,
        mock_interval: Duration::from_millis(merged.mock_interval_ms.unwrap_or(1000)),
        mock_seed: merged.mock_seed,
        poll_interval: Duration::from_millis(poll_interval_ms),
        storage_url: merged
            .storage_url
            .unwrap_or_else(|| "file://./data/readings.jsonl".to_string()),
        storage_table: merged.storage_table.unwrap_or_else(|| "readings".to_string()),
        append_timeout: Duration::from_millis(merged.storage_timeout_ms.unwrap_or(5000)),
        hub: HubOptions {
            include_electricity_usage,
            queue_capacity,
        },
        send_timeout: Duration::from_millis(merged.send_timeout_ms.unwrap_or(2000)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Config {
        let mut argv = vec!["server_telemetry"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn mock_defaults_hide_electricity_and_poll_every_second() {
        let settings = resolve(None, cli(&["--source", "mock"])).unwrap();
        assert_eq!(settings.source, SourceKind::Mock);
        assert!(!settings.hub.include_electricity_usage);
        assert_eq!(settings.poll_interval, Duration::from_millis(1000));
        assert_eq!(settings.bind_addr, "127.0.0.1:3002");
    }

    #[test]
    fn serial_defaults_publish_electricity() {
        let settings = resolve(None, cli(&["--source", "serial"])).unwrap();
        assert_eq!(settings.source, SourceKind::Serial);
        assert!(settings.hub.include_electricity_usage);
        assert_eq!(settings.serial.baud_rate, 9600);
        assert_eq!(settings.serial.settle_delay, Duration::from_secs(2));
    }

    #[test]
    fn cli_overrides_file_overrides_defaults() {
        let file: Config = serde_json::from_str(
            r#"{"port": 4000, "source": "mock", "includeElectricityUsage": true, "storageUrl": "file:///tmp/x.jsonl"}"#,
        )
        .unwrap();
        let settings = resolve(Some(file), cli(&["--port", "5000"])).unwrap();

        assert_eq!(settings.bind_addr, "127.0.0.1:5000");
        assert_eq!(settings.source, SourceKind::Mock);
        assert!(settings.hub.include_electricity_usage);
        assert_eq!(settings.storage_url, "file:///tmp/x.jsonl");
    }

    #[test]
    fn unknown_source_is_rejected() {
        assert!(resolve(None, cli(&["--source", "bluetooth"])).is_err());
    }

    #[test]
    fn storage_writes_are_bounded_by_default() {
        let settings = resolve(None, cli(&["--source", "mock"])).unwrap();
        assert_eq!(settings.append_timeout, Duration::from_secs(5));

        let settings = resolve(None, cli(&["--storage-timeout-ms", "250"])).unwrap();
        assert_eq!(settings.append_timeout, Duration::from_millis(250));
        assert!(resolve(None, cli(&["--storage-timeout-ms", "0"])).is_err());
    }

    #[test]
    fn zero_queue_is_rejected() {
        assert!(resolve(None, cli(&["--subscriber-queue", "0"])).is_err());
    }
}
