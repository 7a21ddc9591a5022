use chrono::{DateTime, Utc};

/// A subject counts as online while its last fix is younger than this.
pub const ONLINE_THRESHOLD_SECS: i64 = 5 * 60;

pub fn is_online(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_seen.is_some_and(|ts| (now - ts).num_seconds() < ONLINE_THRESHOLD_SECS)
}

/// Human label for the age of the last fix.
pub fn last_seen_label(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(ts) = last_seen else {
        return "No location yet".to_owned();
    };
    let minutes = (now - ts).num_minutes();
    if minutes < 5 {
        return "Online now".to_owned();
    }
    if minutes < 60 {
        return format!("Last seen {minutes} min ago");
    }
    format!("Last seen {}h ago", minutes / 60)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn no_fix_is_offline() {
        assert!(!is_online(None, now()));
        assert_eq!(last_seen_label(None, now()), "No location yet");
    }

    #[test]
    fn recent_fix_is_online() {
        let ts = now() - Duration::seconds(299);
        assert!(is_online(Some(ts), now()));
        assert_eq!(last_seen_label(Some(ts), now()), "Online now");
    }

    #[test]
    fn five_minutes_is_offline() {
        let ts = now() - Duration::minutes(5);
        assert!(!is_online(Some(ts), now()));
        assert_eq!(last_seen_label(Some(ts), now()), "Last seen 5 min ago");
    }

    #[test]
    fn hours_are_floored() {
        let ts = now() - Duration::minutes(179);
        assert_eq!(last_seen_label(Some(ts), now()), "Last seen 2h ago");
    }

    #[test]
    fn future_timestamps_count_as_online() {
        let ts = now() + Duration::minutes(2);
        assert!(is_online(Some(ts), now()));
    }
}
