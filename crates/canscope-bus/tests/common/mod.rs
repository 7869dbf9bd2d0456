//! Shared helpers for session integration tests

#![allow(dead_code)]

use std::sync::Arc;

use canscope_bus::driver::virtual_bus::{VirtualBus, VirtualDriver};
use canscope_bus::{BusSession, Features, Observers, SessionConfig};
use canscope_core::{ErrorCounters, ReceivedFrame, SessionObserver, StatusMessage};
use parking_lot::Mutex;

/// Observer that records everything it sees
#[derive(Default)]
pub struct Recorder {
    pub frames: Mutex<Vec<ReceivedFrame>>,
    pub messages: Mutex<Vec<String>>,
    pub counters: Mutex<Vec<ErrorCounters>>,
    pub usage: Mutex<Vec<f32>>,
}

impl Recorder {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn count_message(&self, text: &str) -> usize {
        self.messages.lock().iter().filter(|m| *m == text).count()
    }

    pub fn frames(&self) -> Vec<ReceivedFrame> {
        self.frames.lock().clone()
    }
}

impl SessionObserver for Recorder {
    fn on_frame(&self, frame: &ReceivedFrame) {
        self.frames.lock().push(frame.clone());
    }

    fn on_message(&self, message: &StatusMessage) {
        self.messages.lock().push(message.to_string());
    }

    fn on_counters(&self, counters: ErrorCounters) {
        self.counters.lock().push(counters);
    }

    fn on_bus_usage(&self, percent: f32) {
        self.usage.lock().push(percent);
    }
}

pub struct Harness {
    pub driver: VirtualDriver,
    pub bus: Arc<VirtualBus>,
    pub observers: Arc<Observers>,
    pub recorder: Arc<Recorder>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_capabilities(Features::all())
    }

    pub fn with_capabilities(features: Features) -> Self {
        let driver = VirtualDriver::new(features);
        let bus = driver.bus();
        let observers = Observers::new();
        let recorder = Arc::new(Recorder::default());
        observers.subscribe(recorder.clone());
        Self {
            driver,
            bus,
            observers,
            recorder,
        }
    }

    pub fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::new("virtual://bench");
        config.telemetry_interval_ms = 0;
        config
    }

    pub async fn open(&self, config: SessionConfig) -> BusSession {
        BusSession::open(&self.driver, config, self.observers.clone())
            .await
            .expect("session should open")
    }
}
