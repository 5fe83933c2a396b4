use std::time::{SystemTime, UNIX_EPOCH};

/// Source of epoch seconds for timeout and liveness arithmetic.
///
/// Tasks persist `start` and `ping` as epoch seconds, so the clock is a
/// seam rather than a direct `SystemTime` call.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    }
}

pub fn elapsed_secs(now: u64, since: u64) -> u64 {
    now.saturating_sub(since)
}
