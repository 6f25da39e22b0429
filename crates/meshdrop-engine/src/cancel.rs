use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Shared flag the owning session flips to abort a poll loop or download between ticks.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Cancelled,
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> SleepOutcome;
}

/// Blocks the calling thread, waking early once the token is cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> SleepOutcome {
        let deadline = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return SleepOutcome::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return SleepOutcome::Elapsed;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
