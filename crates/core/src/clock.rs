use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time as milliseconds since Unix epoch.
/// A clock set before the epoch reads as 0.
pub fn physical_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Millisecond timestamps that never go backwards and never repeat, so
/// modifications recorded within the same millisecond still order correctly.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_ms: i64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { last_ms: 0 }
    }

    pub fn tick(&mut self) -> i64 {
        let now = physical_now();
        self.last_ms = if now > self.last_ms { now } else { self.last_ms + 1 };
        self.last_ms
    }
}
