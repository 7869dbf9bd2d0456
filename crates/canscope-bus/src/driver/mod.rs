//! Driver layer for CAN bus access
//!
//! Drivers are selected by the scheme of the endpoint string:
//! - `virtual://<name>` - in-process virtual bus for testing and demos
//! - `socketcan://<iface>` - Linux SocketCAN (requires the `socketcan` feature)
//!
//! # Example
//!
//! ```ignore
//! use canscope_bus::driver::create_driver;
//!
//! let driver = create_driver("virtual://bench")?;
//! let caps = driver.capabilities("virtual://bench")?;
//! ```

mod adapter;
pub mod error;
pub mod virtual_bus;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use adapter::{BusDriver, BusHandle, DriverEvent, ErrorFrameEvent, ErrorFrameKind};
pub use error::DriverError;

use std::sync::Arc;

use canscope_core::Features;

/// Split `scheme://rest`; endpoints without a scheme return `None`
pub fn endpoint_scheme(endpoint: &str) -> Option<(&str, &str)> {
    endpoint.trim().split_once("://")
}

/// Create a driver for an endpoint string
pub fn create_driver(endpoint: &str) -> Result<Arc<dyn BusDriver>, DriverError> {
    let Some((scheme, _)) = endpoint_scheme(endpoint) else {
        return Err(DriverError::InvalidEndpoint(format!(
            "'{}' has no driver scheme (expected e.g. virtual://name)",
            endpoint
        )));
    };

    match scheme {
        "virtual" => Ok(Arc::new(virtual_bus::VirtualDriver::new(Features::all()))),
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        "socketcan" => Ok(Arc::new(socketcan::SocketCanDriver::new())),
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        "socketcan" => Err(DriverError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
        other => Err(DriverError::Unsupported(format!(
            "no driver for scheme '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_driver_by_scheme() {
        assert!(create_driver("virtual://bench").is_ok());
        assert!(matches!(
            create_driver("pcan://usb1"),
            Err(DriverError::Unsupported(_))
        ));
        assert!(matches!(
            create_driver("can0"),
            Err(DriverError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn splits_scheme() {
        assert_eq!(endpoint_scheme("socketcan://can0"), Some(("socketcan", "can0")));
        assert_eq!(endpoint_scheme("can0"), None);
    }
}
