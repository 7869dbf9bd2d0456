//! Caps command - show what an endpoint supports

use anyhow::{Context, Result};
use canscope_bus::create_driver;
use canscope_core::{format_bitrate, DeviceCapabilities};

use crate::output::OutputContext;

/// Query and print the capabilities of `endpoint`
pub fn caps(endpoint: &str, ctx: &OutputContext) -> Result<()> {
    let driver = create_driver(endpoint)?;
    let caps = driver
        .capabilities(endpoint)
        .with_context(|| format!("Failed to query capabilities of '{}'", endpoint))?;

    ctx.print_kv(&describe(endpoint, &caps));
    Ok(())
}

fn describe(endpoint: &str, caps: &DeviceCapabilities) -> Vec<(&'static str, String)> {
    vec![
        ("Endpoint", endpoint.to_string()),
        ("CAN 2.0", yes_no(caps.supports_classic())),
        ("CAN FD", yes_no(caps.supports_fd())),
        ("Bit rates", rates(&caps.bit_rates)),
        ("Data bit rates", rates(&caps.data_bit_rates)),
        ("Listen only", yes_no(caps.supports_listen_only())),
        ("Error frames", yes_no(caps.supports_error_frames())),
        ("Error counters", yes_no(caps.supports_error_counters())),
        ("Bus usage", yes_no(caps.supports_bus_usage())),
    ]
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

fn rates(rates: &[u32]) -> String {
    if rates.is_empty() {
        return "-".to_string();
    }
    rates
        .iter()
        .map(|&bps| format_bitrate(bps))
        .collect::<Vec<_>>()
        .join(", ")
}
