use std::time::Duration;

const BASE_MS: u64 = 100;
const MAX_SHIFT: u32 = 4;

/// Retry pacing for one relay direction: 100 ms doubling per consecutive
/// failure, capped at 1.6 s, back to zero after a success.
#[derive(Debug, Clone, Default)]
pub struct LinkHealth {
    pub consecutive_failures: u32,
}

impl LinkHealth {
    pub fn on_failure(&mut self) -> Duration {
        let shift = self.consecutive_failures.min(MAX_SHIFT);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        Duration::from_millis(BASE_MS << shift)
    }

    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
    }
}
