//! Send command - transmit a single frame

use std::sync::Arc;

use anyhow::{Context, Result};
use canscope_bus::{create_driver, BusSession};
use canscope_core::{FrameEntry, Observers, SessionConfig};
use tracing::debug;

use crate::output::{OutputContext, StatusPrinter};

/// Open `config`, transmit `entry` once and close the session
pub async fn send(config: SessionConfig, entry: &FrameEntry, ctx: &OutputContext) -> Result<()> {
    let frame = entry
        .build(config.mode)
        .with_context(|| format!("Invalid frame '{}'", entry.id))?;
    let driver = create_driver(&config.endpoint)?;

    let observers = Observers::new();
    observers.subscribe(Arc::new(StatusPrinter::new(ctx.quiet)));
    let session = BusSession::open(driver.as_ref(), config, observers)
        .await
        .context("Failed to open bus session")?;

    let accepted = session.transmit(&frame);
    debug!(id = %frame.key(), accepted, "Frame sent");
    session.stop();

    if accepted == 0 {
        ctx.warn(&format!("Frame {} was not accepted by the driver", frame.key()));
    } else {
        ctx.success(&format!("Sent {} frame(s) with ID {}", accepted, frame.key()));
    }
    Ok(())
}
