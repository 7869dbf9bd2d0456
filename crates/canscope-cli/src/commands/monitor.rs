//! Monitor command - live view of the bus

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use canscope_bus::{create_driver, BusSession};
use canscope_core::{IdKey, Observers, PeriodicItem, SessionConfig};
use canscope_view::{FrameAggregator, FrameRow, LogNotification};
use clap::ValueEnum;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::output::{FrameRowView, OutputContext, StatusPrinter};

/// Which projection the monitor prints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogView {
    /// Latest state per identifier, reprinted on every refresh
    #[default]
    Table,
    /// Every frame in arrival order, printed as each flush lands
    Log,
}

/// Options of one monitor run
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub view: LogView,
    pub detail: Option<IdKey>,
    pub refresh: Duration,
    pub duration: Option<Duration>,
    pub periodic: Vec<PeriodicItem>,
}

/// Open the bus and print what it sees until Ctrl+C or `duration` elapses
pub async fn monitor(
    config: SessionConfig,
    options: MonitorOptions,
    ctx: &OutputContext,
) -> Result<()> {
    let driver = create_driver(&config.endpoint)?;

    let observers = Observers::new();
    let aggregator = FrameAggregator::new();
    aggregator.attach(&observers);
    observers.subscribe(Arc::new(StatusPrinter::new(ctx.quiet)));

    let session = BusSession::open(driver.as_ref(), config, observers)
        .await
        .context("Failed to open bus session")?;

    let cancel = session.cancel_token();
    let flusher = aggregator.start(cancel.clone());
    let detail = options
        .detail
        .clone()
        .map(|key| aggregator.open_detail(key, &cancel));

    if !options.periodic.is_empty() {
        let started = session.start_periodic(&options.periodic)?;
        debug!(started, "Periodic items started");
    }

    ctx.info("Press Ctrl+C to stop");

    let mut refresh = tokio::time::interval(options.refresh);
    let mut flushes = BroadcastStream::new(aggregator.log().subscribe());
    let shutdown = shutdown_signal(options.duration);
    tokio::pin!(shutdown);

    let run = session.run();
    tokio::pin!(run);
    let mut stop_requested = false;

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = &mut shutdown, if !stop_requested => {
                stop_requested = true;
                ctx.info("\nStopping session...");
                session.stop();
            }
            _ = refresh.tick(), if options.view == LogView::Table => {
                print_table(&aggregator.table_rows(), ctx);
                if let Some(detail) = &detail {
                    print_detail(detail.key(), detail.row(), detail.log().len(), ctx);
                }
            }
            Some(event) = flushes.next(), if options.view == LogView::Log => {
                match event {
                    Ok(notification) => print_flush(&aggregator, notification, ctx),
                    Err(e) => debug!(error = %e, "Log notifications lagged"),
                }
            }
        }
    };

    if let Err(e) = flusher.await {
        debug!(error = %e, "Flush task ended abnormally");
    }
    drop(detail);

    ctx.info(&format!(
        "Observed {} identifier(s), {} log row(s)",
        aggregator.table_len(),
        aggregator.log().len()
    ));

    result?;
    ctx.success("Session stopped");
    Ok(())
}

async fn shutdown_signal(duration: Option<Duration>) {
    let elapsed = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                debug!(error = %e, "Ctrl+C handler unavailable");
                std::future::pending::<()>().await;
            }
        }
        _ = elapsed => {}
    }
}

fn print_table(rows: &[FrameRow], ctx: &OutputContext) {
    let views: Vec<FrameRowView> = rows.iter().map(FrameRowView::from).collect();
    ctx.print(&views);
}

fn print_detail(key: &IdKey, row: Option<FrameRow>, logged: usize, ctx: &OutputContext) {
    match row {
        Some(row) => ctx.info(&format!(
            "Detail {}: count={} period={} logged={} last=[{}]",
            key,
            row.count(),
            row.period(),
            logged,
            row.data()
        )),
        None => ctx.info(&format!("Detail {}: not seen yet", key)),
    }
}

fn print_flush(aggregator: &FrameAggregator, notification: LogNotification, ctx: &OutputContext) {
    let LogNotification::Reset {
        appended, dropped, ..
    } = notification;
    if dropped > 0 {
        ctx.warn(&format!("{} log row(s) dropped under load", dropped));
    }
    for row in aggregator.log().tail(appended) {
        ctx.print_line(&FrameRowView::from(&row), &row.copy_text());
    }
}
