use std::time::Duration;
use tokio::time::Instant;

/// Partial deliveries are surfaced at most this often.
pub const COALESCE_INTERVAL: Duration = Duration::from_millis(33);

/// Latest-value throttle for partial text.
///
/// The first partial after a flush arms a deadline; later partials only
/// replace the pending text, so a steady stream still surfaces once per
/// interval.
#[derive(Debug)]
pub(crate) struct Coalescer {
    interval: Duration,
    pending: Option<String>,
    deadline: Option<Instant>,
}

impl Coalescer {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            deadline: None,
        }
    }

    pub(crate) fn push(&mut self, text: String, now: Instant) {
        self.pending = Some(text);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the pending text and disarm the timer.
    pub(crate) fn flush(&mut self) -> Option<String> {
        self.deadline = None;
        self.pending.take()
    }

    pub(crate) fn reset(&mut self) {
        self.deadline = None;
        self.pending = None;
    }
}
