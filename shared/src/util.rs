use chrono::{DateTime, Utc};

/// Current UTC time truncated to milliseconds
///
/// Values written by the in-memory store and read back from PostgreSQL
/// compare equal at this precision.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
