//! Clock helpers bridging the timer clock and wall time

use chrono::{DateTime, Utc};
use std::sync::OnceLock;
use tokio::time::Instant;

/// Process start, on both clocks
static SERVER_START: OnceLock<(Instant, DateTime<Utc>)> = OnceLock::new();

/// Record the process start (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(|| (Instant::now(), Utc::now()));
}

/// Server uptime in seconds, 0 before `init_server_time`
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|(start, _)| start.elapsed().as_secs())
        .unwrap_or(0)
}

pub fn started_at() -> Option<DateTime<Utc>> {
    SERVER_START.get().map(|(_, wall)| *wall)
}

/// Wall-clock reading of a timer-clock instant.
///
/// Match timestamps are taken on the tokio clock so paused-time tests can
/// drive them; this maps them back for display.
pub fn wall_time(at: Instant) -> DateTime<Utc> {
    let now = Instant::now();
    let wall = Utc::now();
    if at <= now {
        wall - to_delta(now - at)
    } else {
        wall + to_delta(at - now)
    }
}

fn to_delta(span: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(span).unwrap_or_else(|_| chrono::Duration::zero())
}
