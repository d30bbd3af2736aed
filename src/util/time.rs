//! Time formatting utilities.

use chrono::{DateTime, Utc};

fn plural(n: i64) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Countdown from `now` to a future reset time.
#[must_use]
pub fn format_countdown(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = target.signed_duration_since(now);
    if remaining.num_seconds() <= 0 {
        return "now".to_string();
    }

    let days = remaining.num_days();
    let hours = remaining.num_hours() % 24;
    let minutes = remaining.num_minutes() % 60;

    if days > 0 {
        format!("in {days}d {hours}h")
    } else if hours > 0 {
        format!("in {hours}h {minutes}m")
    } else if minutes > 0 {
        format!("in {minutes}m")
    } else {
        format!("in {}s", remaining.num_seconds())
    }
}

/// How long ago `at` was, relative to `now`.
#[must_use]
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(at);
    if age.num_seconds() < 60 {
        return "just now".to_string();
    }
    let days = age.num_days();
    let hours = age.num_hours();
    let minutes = age.num_minutes();
    if days > 0 {
        format!("{days} day{} ago", plural(days))
    } else if hours > 0 {
        format!("{hours} hour{} ago", plural(hours))
    } else {
        format!("{minutes} minute{} ago", plural(minutes))
    }
}

/// Local wall-clock rendering of a UTC timestamp.
#[must_use]
pub fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn countdown_units() {
        assert_eq!(format_countdown(now() + Duration::minutes(210), now()), "in 3h 30m");
        assert_eq!(format_countdown(now() + Duration::hours(75), now()), "in 3d 3h");
        assert_eq!(format_countdown(now() + Duration::minutes(4), now()), "in 4m");
        assert_eq!(format_countdown(now() + Duration::seconds(9), now()), "in 9s");
        assert_eq!(format_countdown(now() - Duration::minutes(1), now()), "now");
    }

    #[test]
    fn age_units() {
        assert_eq!(format_age(now(), now()), "just now");
        assert_eq!(format_age(now() - Duration::minutes(1), now()), "1 minute ago");
        assert_eq!(format_age(now() - Duration::hours(5), now()), "5 hours ago");
        assert_eq!(format_age(now() - Duration::days(2), now()), "2 days ago");
    }
}
