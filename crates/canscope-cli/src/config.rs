//! Configuration file handling for canscope
//!
//! ```toml
//! [session]
//! endpoint = "virtual://bench"
//! mode = "fd"
//! bit_rate = 500000
//! features = "ERROR_COUNTERS | BUS_USAGE"
//!
//! [[periodic]]
//! id = "0x100"
//! data = "01 02 03"
//! period_ms = 100
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use canscope_core::{Features, FrameEntry, PeriodicItem, ProtocolMode, SessionConfig};
use clap::Args;
use serde::{Deserialize, Serialize};

/// Contents of the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session defaults
    pub session: Option<SessionConfig>,
    /// Repeating transmissions for `monitor --periodic`
    pub periodic: Vec<PeriodicEntry>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

/// One `[[periodic]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicEntry {
    #[serde(flatten)]
    pub frame: FrameEntry,
    pub period_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Config {
    /// Load the default config file, if there is one
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("canscope");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge command-line session flags over the `[session]` table
    pub fn session(&self, args: &SessionArgs) -> Result<SessionConfig> {
        let mut config = match (&args.endpoint, self.session.clone()) {
            (Some(endpoint), Some(mut config)) => {
                config.endpoint = endpoint.clone();
                config
            }
            (Some(endpoint), None) => SessionConfig::new(endpoint.clone()),
            (None, Some(config)) => config,
            (None, None) => {
                bail!("No endpoint given (use --endpoint or a [session] table in the config file)")
            }
        };

        if args.fd {
            config.mode = ProtocolMode::Fd;
        }
        if let Some(bit_rate) = args.bitrate {
            config.bit_rate = bit_rate;
        }
        if let Some(data_bit_rate) = args.data_bitrate {
            config.data_bit_rate = data_bit_rate;
        }
        if args.listen_only {
            config.listen_only = true;
        }
        if args.error_frames {
            config.features |= Features::ERROR_FRAME;
        }
        if args.error_counters {
            config.features |= Features::ERROR_COUNTERS;
        }
        if args.bus_usage {
            config.features |= Features::BUS_USAGE;
        }
        if let Some(interval) = args.telemetry_ms {
            config.telemetry_interval_ms = interval;
        }
        Ok(config)
    }

    /// Build the `[[periodic]]` items for a session in `mode`
    pub fn periodic_items(&self, mode: ProtocolMode) -> Result<Vec<PeriodicItem>> {
        self.periodic
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let frame = entry.frame.build(mode).with_context(|| {
                    format!("Invalid periodic entry #{} ({})", i + 1, entry.frame.id)
                })?;
                let item = PeriodicItem::new(frame, Duration::from_millis(entry.period_ms));
                Ok(if entry.enabled { item } else { item.disabled() })
            })
            .collect()
    }
}

/// Session flags shared by the commands that open a bus
#[derive(Debug, Clone, Default, Args)]
pub struct SessionArgs {
    /// Bus endpoint, e.g. virtual://bench or socketcan://can0
    #[arg(short, long, env = "CANSCOPE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Open the bus in CAN FD mode
    #[arg(long)]
    pub fd: bool,

    /// Nominal bit rate in bits per second
    #[arg(long)]
    pub bitrate: Option<u32>,

    /// Data-phase bit rate in bits per second (FD only)
    #[arg(long)]
    pub data_bitrate: Option<u32>,

    /// Receive only, never drive the bus
    #[arg(long)]
    pub listen_only: bool,

    /// Report bus error frames
    #[arg(long)]
    pub error_frames: bool,

    /// Poll transmit/receive error counters
    #[arg(long)]
    pub error_counters: bool,

    /// Poll bus usage
    #[arg(long)]
    pub bus_usage: bool,

    /// Telemetry poll interval in milliseconds (0 disables polling)
    #[arg(long)]
    pub telemetry_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_session_and_periodic_tables() {
        let file = write_config(
            r#"
[session]
endpoint = "virtual://bench"
mode = "fd"
bit_rate = 250000
features = "ERROR_COUNTERS | BUS_USAGE"
telemetry_interval_ms = 1000

[[session.filters]]
kind = "range"
from = 0x100
to = 0x1FF

[[periodic]]
id = "0x100"
data = "01 02 03"
period_ms = 100

[[periodic]]
id = "0x18DAF110"
extended = true
fd = true
data = "aa"
period_ms = 0
enabled = false
"#,
        );
        let config = Config::load_from(file.path()).unwrap();
        let session = config.session.clone().unwrap();
        assert_eq!(session.mode, ProtocolMode::Fd);
        assert_eq!(session.bit_rate, 250_000);
        assert_eq!(session.data_bit_rate, 2_000_000);
        assert_eq!(session.features, Features::ERROR_COUNTERS | Features::BUS_USAGE);
        assert_eq!(session.filters.rules().len(), 1);

        let items = config.periodic_items(session.mode).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].period, Duration::from_millis(100));
        assert!(items[0].enabled);
        assert!(items[1].frame.is_fd());
        assert!(!items[1].enabled);
        assert_eq!(items[1].period, Duration::from_millis(1));
    }

    #[test]
    fn flags_override_file_values() {
        let config = Config {
            session: Some(SessionConfig::new("virtual://file")),
            ..Config::default()
        };
        let args = SessionArgs {
            endpoint: Some("virtual://flag".to_string()),
            fd: true,
            bitrate: Some(1_000_000),
            bus_usage: true,
            telemetry_ms: Some(0),
            ..SessionArgs::default()
        };
        let session = config.session(&args).unwrap();
        assert_eq!(session.endpoint, "virtual://flag");
        assert!(session.is_fd());
        assert_eq!(session.bit_rate, 1_000_000);
        assert_eq!(session.features, Features::BUS_USAGE);
        assert_eq!(session.telemetry_interval(), None);
    }

    #[test]
    fn endpoint_is_required() {
        let err = Config::default()
            .session(&SessionArgs::default())
            .unwrap_err();
        assert!(err.to_string().contains("No endpoint given"));
    }

    #[test]
    fn fd_periodic_entry_needs_fd_session() {
        let file = write_config(
            r#"
[[periodic]]
id = "0x10"
fd = true
period_ms = 10
"#,
        );
        let config = Config::load_from(file.path()).unwrap();
        let err = config.periodic_items(ProtocolMode::Classic).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid periodic entry #1"));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let file = write_config("[session\nendpoint = 1");
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse config file"));
    }
}
