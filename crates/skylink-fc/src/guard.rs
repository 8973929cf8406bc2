//! Administrator authority over the pilot.
//!
//! The three boolean flags share one atomic word so that each flag can be
//! flipped independently while the emergency transition still publishes
//! "controls off, video off, locked" to readers in a single store.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use skylink_proto::authority::AuthorityStatus;
use tracing::{error, info, warn};

const CONTROLS: u8 = 1 << 0;
const VIDEO: u8 = 1 << 1;
const LOCKED: u8 = 1 << 2;

pub const EMERGENCY_MESSAGE: &str = "EMERGENCY STOP";

#[derive(Debug)]
pub struct AccessGuard {
    flags: AtomicU8,
    message: RwLock<String>,
    emergency_seq: Mutex<()>,
}

impl Default for AccessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessGuard {
    /// Pilot starts with video and controls unlocked.
    pub fn new() -> Self {
        Self {
            flags: AtomicU8::new(CONTROLS | VIDEO),
            message: RwLock::new(String::new()),
            emergency_seq: Mutex::new(()),
        }
    }

    pub fn controls_allowed(&self) -> bool {
        self.flags.load(Ordering::Acquire) & CONTROLS != 0
    }

    pub fn video_allowed(&self) -> bool {
        self.flags.load(Ordering::Acquire) & VIDEO != 0
    }

    pub fn emergency_locked(&self) -> bool {
        self.flags.load(Ordering::Acquire) & LOCKED != 0
    }

    pub fn operator_message(&self) -> String {
        self.message.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_controls(&self, enabled: bool) {
        self.set_flag(CONTROLS, enabled, "controls");
    }

    pub fn set_video(&self, enabled: bool) {
        self.set_flag(VIDEO, enabled, "video");
    }

    pub fn set_message(&self, text: impl Into<String>) {
        let text = text.into();
        info!("guard: operator message set to {:?}", text);
        *self.message.write().unwrap_or_else(PoisonError::into_inner) = text;
    }

    /// Latches the emergency stop. `disarm` runs first and to completion;
    /// only then do readers observe the lock.
    pub fn trigger_emergency<F: FnOnce()>(&self, disarm: F) {
        let _seq = self.emergency_seq.lock().unwrap_or_else(PoisonError::into_inner);
        disarm();
        self.flags.store(LOCKED, Ordering::Release);
        *self.message.write().unwrap_or_else(PoisonError::into_inner) = EMERGENCY_MESSAGE.to_string();
        error!("guard: EMERGENCY STOP latched; pilot controls and video revoked");
    }

    pub fn status(&self) -> AuthorityStatus {
        let flags = self.flags.load(Ordering::Acquire);
        AuthorityStatus {
            controls: flags & CONTROLS != 0,
            video: flags & VIDEO != 0,
            emergency: flags & LOCKED != 0,
            message: self.operator_message(),
        }
    }

    fn set_flag(&self, bit: u8, enabled: bool, name: &str) {
        let res = self.flags.fetch_update(Ordering::AcqRel, Ordering::Acquire, |f| {
            if !enabled {
                Some(f & !bit)
            } else if f & LOCKED != 0 {
                None
            } else {
                Some(f | bit)
            }
        });
        match res {
            Ok(_) => info!("guard: {} {}", name, if enabled { "UNLOCKED" } else { "LOCKED" }),
            Err(_) => warn!("guard: refusing to unlock {} while emergency stop is latched", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unlocked() {
        let g = AccessGuard::new();
        assert!(g.controls_allowed());
        assert!(g.video_allowed());
        assert!(!g.emergency_locked());
        assert_eq!(g.operator_message(), "");
    }

    #[test]
    fn set_video_is_idempotent() {
        let g = AccessGuard::new();
        g.set_video(false);
        g.set_video(true);
        let once = g.status();
        g.set_video(true);
        assert_eq!(g.status(), once);
        assert!(g.video_allowed());
    }

    #[test]
    fn flags_are_independent() {
        let g = AccessGuard::new();
        g.set_controls(false);
        assert!(!g.controls_allowed());
        assert!(g.video_allowed());
        g.set_video(false);
        g.set_controls(true);
        assert!(g.controls_allowed());
        assert!(!g.video_allowed());
    }

    #[test]
    fn emergency_runs_disarm_before_lock_is_visible() {
        let g = AccessGuard::new();
        let mut seen_locked = None;
        g.trigger_emergency(|| seen_locked = Some(g.emergency_locked()));
        assert_eq!(seen_locked, Some(false));

        let st = g.status();
        assert!(st.emergency);
        assert!(!st.controls);
        assert!(!st.video);
        assert_eq!(st.message, EMERGENCY_MESSAGE);
    }

    #[test]
    fn emergency_latch_survives_unlock_attempts() {
        let g = AccessGuard::new();
        g.trigger_emergency(|| {});
        g.set_controls(true);
        g.set_video(true);
        assert!(g.emergency_locked());
        assert!(!g.controls_allowed());
        assert!(!g.video_allowed());
    }

    #[test]
    fn message_can_change_after_emergency() {
        let g = AccessGuard::new();
        g.trigger_emergency(|| {});
        g.set_message("landing crew on site");
        assert_eq!(g.operator_message(), "landing crew on site");
        assert!(g.emergency_locked());
    }

    #[test]
    fn concurrent_readers_never_see_lock_with_controls_on() {
        use std::sync::Arc;
        use std::thread;

        let g = Arc::new(AccessGuard::new());
        let reader = {
            let g = g.clone();
            thread::spawn(move || {
                for _ in 0..100_000 {
                    let st = g.status();
                    if st.emergency {
                        assert!(!st.controls && !st.video);
                        return;
                    }
                }
            })
        };
        g.trigger_emergency(|| {});
        reader.join().unwrap();
    }
}
