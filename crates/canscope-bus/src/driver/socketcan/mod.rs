//! SocketCAN driver (Linux only)

mod adapter;

pub use adapter::{SocketCanDriver, SocketCanHandle};
