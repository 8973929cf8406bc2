use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Searching,
    Connected,
}

#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub state: LinkState,
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub last_heartbeat: Option<Instant>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            port: None,
            baud: None,
            last_heartbeat: None,
        }
    }
}

impl LinkStatus {
    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }
}
