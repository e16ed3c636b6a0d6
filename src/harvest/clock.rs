use chrono::{NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;

/// On-disk timestamp layout: second precision, no offset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const BUCKET_FORMAT: &str = "%Y%m%d-%H%M";

/// Wall-clock time in the feed's jurisdiction, truncated to whole seconds.
pub fn local_now(tz: Tz) -> NaiveDateTime {
    let now = Utc::now().with_timezone(&tz).naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Snapshot key requested from the archive, e.g. `20240101-1005`.
pub fn time_bucket(t: NaiveDateTime) -> String {
    t.format(BUCKET_FORMAT).to_string()
}

pub fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}
