//! Clock Ticker Task

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::Clock;

/// Spawns a task that calls [`Clock::tick`] every `period`.
pub fn spawn_clock_task(clock: Clock, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting clock ticker with interval of {} ms", period.as_millis());

        loop {
            tokio::time::sleep(period).await;
            clock.tick();
        }
    })
}
