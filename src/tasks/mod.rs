//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is alive.
//!
//! # Tasks
//! - Refresh drain: reloads stale keys queued by reads
//! - Store maintenance: removes expired entries and enforces capacity
//! - Clock ticker: keeps the coarse clock close to wall time

mod clock;
mod maintenance;
mod refresh;

pub use clock::spawn_clock_task;
pub use maintenance::spawn_maintenance_task;
pub(crate) use refresh::spawn_refresh_task;
