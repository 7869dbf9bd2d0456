//! Command implementations for canscope

pub mod caps;
pub mod monitor;
pub mod send;

pub use caps::caps;
pub use monitor::{monitor, LogView, MonitorOptions};
pub use send::send;
