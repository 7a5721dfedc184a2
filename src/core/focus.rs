use std::time::Duration;

use tokio::task::JoinHandle;

use crate::shared::events::{EventSender, OverlayEvent};

/// Bounded focus retry for one overlay cycle.
///
/// Posts `FocusAttempt` for attempts `2..=max_attempts` (the first attempt is
/// made synchronously by the manager), one per interval. Dropping it stops
/// any attempts not yet posted.
pub struct FocusRetry {
    cycle: u64,
    task: JoinHandle<()>,
}

impl FocusRetry {
    pub fn spawn(cycle: u64, max_attempts: u32, interval: Duration, events: EventSender) -> Self {
        let task = tokio::spawn(async move {
            for attempt in 2..=max_attempts {
                tokio::time::sleep(interval).await;
                events.publish(OverlayEvent::FocusAttempt { cycle, attempt });
            }
        });
        Self { cycle, task }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}

impl Drop for FocusRetry {
    fn drop(&mut self) {
        self.task.abort();
    }
}
