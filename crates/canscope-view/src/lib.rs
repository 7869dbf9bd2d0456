//! canscope-view - Frame aggregation for live CAN sessions
//!
//! A [`FrameAggregator`] subscribes to a session's observers and keeps
//! two projections of the frame stream:
//!
//! - the **latest-state table**: one [`FrameRow`] per identifier key,
//!   updated in place with a running average inter-arrival period
//! - the **sequential log**: one row snapshot per frame, queued in a
//!   bounded drop-oldest buffer and applied in batches by a flush timer
//!
//! ```text
//!   frames ──▶ FrameAggregator ──▶ LatestStateTable   (loss-free per key)
//!                   │
//!                   ├──▶ DropOldestQueue ──(250 ms flush)──▶ SequentialLog ──▶ Reset
//!                   │
//!                   └──▶ DetailView (one key, own queue and flush)
//! ```

pub mod aggregator;
pub mod detail;
pub mod log;
pub mod queue;
pub mod row;
pub mod table;

pub use aggregator::{AggregatorConfig, FrameAggregator};
pub use detail::{DetailHandle, DetailView};
pub use log::{
    LogNotification, SequentialLog, DEFAULT_RETAIN, DETAIL_CAPACITY, FLUSH_INTERVAL, LOG_CAPACITY,
};
pub use queue::DropOldestQueue;
pub use row::{FrameRow, ObservedAt, NO_PERIOD, PERIOD_SAMPLE_CAP};
pub use table::LatestStateTable;
