//! Display row for one identifier

use std::time::{Duration, Instant};

use canscope_core::frame::format_data;
use canscope_core::{Direction, IdKey, ReceivedFrame};
use chrono::{DateTime, Local};
use serde::Serialize;

/// Inter-arrival samples kept in the running average before it starts
/// behaving like a sliding window
pub const PERIOD_SAMPLE_CAP: u32 = 1000;

/// Period shown before a second frame has arrived
pub const NO_PERIOD: &str = "—";

/// When a frame was processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedAt {
    /// Monotonic time, used for inter-arrival periods
    pub instant: Instant,
    /// Wall-clock time, shown when the driver has no timestamp
    pub wall: DateTime<Local>,
}

impl ObservedAt {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Local::now(),
        }
    }
}

/// Presentation row: latest fields of one identifier plus arrival
/// statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRow {
    time: String,
    direction: Direction,
    fd: bool,
    id: IdKey,
    dlc: u8,
    data: String,
    count: u64,
    avg_period_ms: Option<f64>,
    period_samples: u32,
    #[serde(skip)]
    last_seen: Option<Instant>,
}

impl FrameRow {
    /// Row for a first observation
    pub fn new(frame: &ReceivedFrame, at: ObservedAt) -> Self {
        let mut row = Self {
            time: String::new(),
            direction: frame.direction,
            fd: frame.frame.is_fd(),
            id: frame.frame.key(),
            dlc: 0,
            data: String::new(),
            count: 0,
            avg_period_ms: None,
            period_samples: 0,
            last_seen: None,
        };
        row.update(frame, at);
        row
    }

    /// Apply a further observation of the same identifier
    pub fn update(&mut self, frame: &ReceivedFrame, at: ObservedAt) {
        self.time = match frame.driver_timestamp() {
            Some(ts) => trim_decimals(millis(ts), 4),
            None => at.wall.format("%H:%M:%S").to_string(),
        };
        self.direction = frame.direction;
        self.fd = frame.frame.is_fd();
        self.id = frame.frame.key();
        self.dlc = frame.frame.dlc();
        self.data = format_data(frame.frame.data());

        if let Some(last) = self.last_seen {
            let ms = millis(at.instant.saturating_duration_since(last));
            let n = self.period_samples.min(PERIOD_SAMPLE_CAP) as f64;
            let avg = self.avg_period_ms.unwrap_or(0.0);
            self.avg_period_ms = Some((avg * n + ms) / (n + 1.0));
            if self.period_samples < PERIOD_SAMPLE_CAP {
                self.period_samples += 1;
            }
        }
        self.last_seen = Some(at.instant);
        self.count += 1;
    }

    /// Driver timestamp in milliseconds, or wall-clock `HH:MM:SS`
    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// `"Tx"` or `"Rx"`
    pub fn dir(&self) -> &'static str {
        self.direction.label()
    }

    /// `"FD"` or `"2.0"`
    pub fn kind(&self) -> &'static str {
        if self.fd {
            "FD"
        } else {
            "2.0"
        }
    }

    pub fn id(&self) -> &IdKey {
        &self.id
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn avg_period_ms(&self) -> Option<f64> {
        self.avg_period_ms
    }

    pub fn period_samples(&self) -> u32 {
        self.period_samples
    }

    /// Average inter-arrival period, or [`NO_PERIOD`]
    pub fn period(&self) -> String {
        match self.avg_period_ms {
            Some(avg) => format!("{} ms", trim_decimals(avg, 3)),
            None => NO_PERIOD.to_string(),
        }
    }

    /// `"Time Dir Kind ID DLC Data"` for the clipboard
    pub fn copy_text(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.time,
            self.dir(),
            self.kind(),
            self.id,
            self.dlc,
            self.data
        )
        .trim()
        .to_string()
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

fn trim_decimals(value: f64, places: usize) -> String {
    let text = format!("{:.*}", places, value);
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}
