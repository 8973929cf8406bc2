use std::time::{Duration, Instant};

/// Lets an action through at most once per `min_interval`.
#[derive(Debug)]
pub struct IntervalGate {
    last: Option<Instant>,
    min_interval: Duration,
}

impl IntervalGate {
    pub fn new(min_interval: Duration) -> Self {
        Self { last: None, min_interval }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        if !self.due(now) {
            return false;
        }
        self.last = Some(now);
        true
    }

    /// Like [`ready`](Self::ready) but leaves the gate untouched; pair with
    /// [`stamp`](Self::stamp) when the interval counts from the end of the action.
    pub fn due(&self, now: Instant) -> bool {
        self.last.map_or(true, |t| now.saturating_duration_since(t) >= self.min_interval)
    }

    pub fn stamp(&mut self, at: Instant) {
        self.last = Some(at);
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
