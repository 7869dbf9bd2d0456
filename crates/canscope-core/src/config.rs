//! Session configuration and device capabilities
//!
//! A [`SessionConfig`] is built once per connect attempt and never
//! mutated afterwards; the session keeps its own copy.

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::filter::FilterSet;
use crate::frame::Frame;

bitflags! {
    /// Device / session feature mask
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Features: u32 {
        const CLASSIC = 1 << 0;
        const FD = 1 << 1;
        const FILTERS = 1 << 2;
        const LISTEN_ONLY = 1 << 3;
        const ERROR_FRAME = 1 << 4;
        const ERROR_COUNTERS = 1 << 5;
        const BUS_USAGE = 1 << 6;
        const CYCLIC_TX = 1 << 7;
    }
}

/// Protocol mode of the bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolMode {
    #[default]
    Classic,
    Fd,
}

impl ProtocolMode {
    pub fn label(self) -> &'static str {
        match self {
            ProtocolMode::Classic => "CAN 2.0",
            ProtocolMode::Fd => "CAN FD",
        }
    }
}

/// Configuration of one bus session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Endpoint string, resolved entirely by the driver
    pub endpoint: String,
    /// Classic or FD
    #[serde(default)]
    pub mode: ProtocolMode,
    /// Nominal bit rate in bits per second
    #[serde(default = "default_bit_rate")]
    pub bit_rate: u32,
    /// Data-phase bit rate (FD only)
    #[serde(default = "default_data_bit_rate")]
    pub data_bit_rate: u32,
    /// Acceptance filters
    #[serde(default)]
    pub filters: FilterSet,
    /// Receive without ever transmitting (including ACK bits)
    #[serde(default)]
    pub listen_only: bool,
    /// Requested features
    #[serde(default)]
    pub features: Features,
    /// Telemetry poll interval in milliseconds (0 disables polling)
    #[serde(default = "default_poll_interval")]
    pub telemetry_interval_ms: u64,
}

fn default_bit_rate() -> u32 {
    500_000
}

fn default_data_bit_rate() -> u32 {
    2_000_000
}

fn default_poll_interval() -> u64 {
    5000
}

impl SessionConfig {
    /// Configuration for `endpoint` with default timing and no features
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            mode: ProtocolMode::Classic,
            bit_rate: default_bit_rate(),
            data_bit_rate: default_data_bit_rate(),
            filters: FilterSet::default(),
            listen_only: false,
            features: Features::empty(),
            telemetry_interval_ms: default_poll_interval(),
        }
    }

    pub fn is_fd(&self) -> bool {
        self.mode == ProtocolMode::Fd
    }

    /// Telemetry interval, `None` when polling is disabled
    pub fn telemetry_interval(&self) -> Option<Duration> {
        (self.telemetry_interval_ms > 0).then(|| Duration::from_millis(self.telemetry_interval_ms))
    }

    /// Checks that need no knowledge of the endpoint
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.endpoint.trim().is_empty() {
            return Err(SessionError::config("endpoint is empty"));
        }
        if self.bit_rate == 0 {
            return Err(SessionError::config("bit rate must be non-zero"));
        }
        if self.is_fd() && self.data_bit_rate == 0 {
            return Err(SessionError::config("FD mode requires a data bit rate"));
        }
        self.filters.validate()
    }

    /// Features the configuration actually needs from the endpoint
    pub fn required_features(&self) -> Features {
        let mut required = self.features & !Features::CLASSIC & !Features::FD;
        required |= match self.mode {
            ProtocolMode::Classic => Features::CLASSIC,
            ProtocolMode::Fd => Features::FD,
        };
        if !self.filters.is_empty() {
            required |= Features::FILTERS;
        }
        if self.listen_only {
            required |= Features::LISTEN_ONLY;
        }
        required
    }

    /// Check the configuration against what the endpoint supports
    pub fn check_capabilities(&self, caps: &DeviceCapabilities) -> Result<(), SessionError> {
        let missing = self.required_features() - caps.features;
        if missing.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = missing.iter_names().map(|(name, _)| name).collect();
        Err(SessionError::config(format!(
            "endpoint '{}' does not support: {}",
            self.endpoint,
            names.join(", ")
        )))
    }

    /// Status line announced once the bus is open
    pub fn describe(&self) -> String {
        match self.mode {
            ProtocolMode::Classic => format!(
                "Listening on '{}' @ {} bps, mode={}...",
                self.endpoint,
                self.bit_rate,
                self.mode.label()
            ),
            ProtocolMode::Fd => format!(
                "Listening on '{}' @ {} bps:{} bps, mode={}...",
                self.endpoint,
                self.bit_rate,
                self.data_bit_rate,
                self.mode.label()
            ),
        }
    }
}

/// What an endpoint supports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub bit_rates: Vec<u32>,
    pub data_bit_rates: Vec<u32>,
    pub features: Features,
}

/// Bit rates offered when a driver has no discrete timing table
pub const PRESET_BIT_RATES: [u32; 6] = [50_000, 100_000, 125_000, 250_000, 500_000, 1_000_000];
/// Data bit rates offered when a driver has no discrete timing table
pub const PRESET_DATA_BIT_RATES: [u32; 6] =
    [500_000, 1_000_000, 2_000_000, 4_000_000, 5_000_000, 8_000_000];

impl DeviceCapabilities {
    /// Capabilities with the preset bit-rate tables
    pub fn with_presets(features: Features) -> Self {
        Self {
            bit_rates: PRESET_BIT_RATES.to_vec(),
            data_bit_rates: PRESET_DATA_BIT_RATES.to_vec(),
            features,
        }
    }

    pub fn supports_classic(&self) -> bool {
        self.features.contains(Features::CLASSIC)
    }

    pub fn supports_fd(&self) -> bool {
        self.features.contains(Features::FD)
    }

    pub fn supports_listen_only(&self) -> bool {
        self.features.contains(Features::LISTEN_ONLY)
    }

    pub fn supports_error_counters(&self) -> bool {
        self.features.contains(Features::ERROR_COUNTERS)
    }

    pub fn supports_error_frames(&self) -> bool {
        self.features.contains(Features::ERROR_FRAME)
    }

    pub fn supports_bus_usage(&self) -> bool {
        self.features.contains(Features::BUS_USAGE)
    }
}

/// A repeating transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicItem {
    pub frame: Frame,
    pub period: Duration,
    pub enabled: bool,
}

/// Shortest accepted period
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

impl PeriodicItem {
    /// Enabled item; periods below one millisecond are clamped
    pub fn new(frame: Frame, period: Duration) -> Self {
        Self {
            frame,
            period: period.max(MIN_PERIOD),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Transmit and receive error counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounters {
    pub tx: u32,
    pub rx: u32,
}

/// Format a bit rate for display: `"500 kbps"`, `"2.5 Mbps"`, `"800 bps"`
pub fn format_bitrate(bps: u32) -> String {
    let bps = bps as f64;
    let (value, unit) = if bps < 1_000.0 {
        (bps, "bps")
    } else if bps < 1_000_000.0 {
        (bps / 1_000.0, "kbps")
    } else {
        (bps / 1_000_000.0, "Mbps")
    };
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", text, unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterRule, IdType};
    use pretty_assertions::assert_eq;

    #[test]
    fn blank_endpoint_is_rejected() {
        let config = SessionConfig::new("   ");
        assert!(matches!(config.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn required_features_follow_config() {
        let mut config = SessionConfig::new("virtual://a");
        config.mode = ProtocolMode::Fd;
        config.listen_only = true;
        config.features = Features::ERROR_FRAME | Features::CLASSIC;
        config.filters = vec![FilterRule::Range {
            from: 1,
            to: 2,
            id_type: IdType::Standard,
        }]
        .into();
        assert_eq!(
            config.required_features(),
            Features::FD | Features::LISTEN_ONLY | Features::ERROR_FRAME | Features::FILTERS
        );
    }

    #[test]
    fn capability_check_names_missing_features() {
        let mut config = SessionConfig::new("virtual://a");
        config.listen_only = true;
        let caps = DeviceCapabilities::with_presets(Features::CLASSIC);
        let err = config.check_capabilities(&caps).unwrap_err();
        assert!(err.to_string().contains("LISTEN_ONLY"));

        let caps = DeviceCapabilities::with_presets(Features::CLASSIC | Features::LISTEN_ONLY);
        assert!(config.check_capabilities(&caps).is_ok());
    }

    #[test]
    fn telemetry_interval_zero_disables() {
        let mut config = SessionConfig::new("x");
        config.telemetry_interval_ms = 0;
        assert_eq!(config.telemetry_interval(), None);
        config.telemetry_interval_ms = 250;
        assert_eq!(config.telemetry_interval(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn describe_mentions_mode() {
        let mut config = SessionConfig::new("virtual://bench");
        assert_eq!(
            config.describe(),
            "Listening on 'virtual://bench' @ 500000 bps, mode=CAN 2.0..."
        );
        config.mode = ProtocolMode::Fd;
        assert_eq!(
            config.describe(),
            "Listening on 'virtual://bench' @ 500000 bps:2000000 bps, mode=CAN FD..."
        );
    }

    #[test]
    fn periodic_period_is_clamped() {
        let frame = Frame::classic(1, &[], false).unwrap();
        let item = PeriodicItem::new(frame, Duration::ZERO);
        assert_eq!(item.period, MIN_PERIOD);
        assert!(!item.disabled().enabled);
    }

    #[test]
    fn bitrate_formatting() {
        assert_eq!(format_bitrate(800), "800 bps");
        assert_eq!(format_bitrate(500_000), "500 kbps");
        assert_eq!(format_bitrate(2_000_000), "2 Mbps");
        assert_eq!(format_bitrate(83_333), "83.33 kbps");
    }

    #[test]
    fn loads_from_toml() {
        let config: SessionConfig = toml::from_str(
            r#"
            endpoint = "virtual://bench"
            mode = "fd"
            features = "ERROR_FRAME | ERROR_COUNTERS"
            filters = [{ kind = "mask", code = 0x100, mask = 0x700 }]
            "#,
        )
        .unwrap();
        assert!(config.is_fd());
        assert_eq!(config.bit_rate, 500_000);
        assert_eq!(
            config.features,
            Features::ERROR_FRAME | Features::ERROR_COUNTERS
        );
        assert_eq!(config.filters.rules().len(), 1);
        assert_eq!(config.telemetry_interval_ms, 5000);
    }
}
