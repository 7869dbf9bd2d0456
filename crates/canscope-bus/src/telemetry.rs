//! Background sampling of error counters and bus usage

use std::sync::Arc;
use std::time::Duration;

use canscope_core::{Features, Observers};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::BusHandle;

/// Samples the enabled metrics of an open bus at a fixed interval
pub struct TelemetryPoller {
    handle: Arc<dyn BusHandle>,
    observers: Arc<Observers>,
    counters: bool,
    bus_usage: bool,
}

impl TelemetryPoller {
    /// Poller for the metrics enabled in `features`, or `None` when no
    /// metric is enabled
    pub fn new(
        handle: Arc<dyn BusHandle>,
        observers: Arc<Observers>,
        features: Features,
    ) -> Option<Self> {
        let counters = features.contains(Features::ERROR_COUNTERS);
        let bus_usage = features.contains(Features::BUS_USAGE);
        (counters || bus_usage).then_some(Self {
            handle,
            observers,
            counters,
            bus_usage,
        })
    }

    /// Take one sample of each enabled metric. A failing metric does not
    /// prevent sampling the other.
    pub fn sample(&self) {
        if self.counters {
            match self.handle.error_counters() {
                Ok(counters) => self.observers.counters(counters),
                Err(e) => debug!(error = %e, "Error counter sample failed"),
            }
        }
        if self.bus_usage {
            match self.handle.bus_usage() {
                Ok(percent) => self.observers.bus_usage(percent),
                Err(e) => debug!(error = %e, "Bus usage sample failed"),
            }
        }
    }

    /// Run until `cancel` fires, sampling immediately and then once per
    /// `interval`. Returns `None` without spawning when `interval` is `None`.
    pub fn spawn(
        self,
        interval: Option<Duration>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let interval = interval?;
        debug!(interval_ms = interval.as_millis() as u64, "Telemetry poller started");

        Some(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                self.sample();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("Telemetry poller stopped");
        }))
    }
}
