use std::time::{Duration, Instant};

/// Per-loop timer state driving the tick callback.
///
/// Armed at loop start so the first tick runs immediately. After each tick
/// the callback's returned delay rearms it; no delay disarms it for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticker {
    next: Option<Instant>,
}

impl Ticker {
    pub fn armed_at(now: Instant) -> Self {
        Self { next: Some(now) }
    }

    pub fn disarmed() -> Self {
        Self { next: None }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.next, Some(deadline) if deadline <= now)
    }

    /// How long the poller may block before the next tick is due.
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        self.next
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn schedule(&mut self, now: Instant, delay: Option<Duration>) {
        self.next = delay.map(|delay| now + delay);
    }

    pub fn disarm(&mut self) {
        self.next = None;
    }
}
