//! Pre-recording countdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Counter value the countdown starts from
pub const COUNTDOWN_START: u32 = 3;

/// Time between ticks
pub const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

/// A running countdown
///
/// Each tick decrements the counter and reports the remaining value; the tick
/// that finds the counter at or below one reports zero and fires completion.
/// Once `cancel` returns no further callback runs. Dropping the handle
/// detaches the countdown without cancelling it.
pub struct Countdown {
    handle: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

impl Countdown {
    /// Start a countdown on the current tokio runtime
    pub fn start<T, C>(initial: u32, period: Duration, on_tick: T, on_complete: C) -> Self
    where
        T: Fn(u32) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let handle = tokio::spawn(async move {
            let mut counter = initial;
            loop {
                tokio::time::sleep(period).await;
                if flag.load(Ordering::SeqCst) {
                    return;
                }
                if counter <= 1 {
                    on_tick(0);
                    on_complete();
                    return;
                }
                counter -= 1;
                on_tick(counter);
            }
        });

        Self { handle, cancelled }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
