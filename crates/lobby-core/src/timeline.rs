use chrono::{DateTime, FixedOffset, Locale, NaiveDate, Utc};

use lobby_types::models::Message;
use lobby_types::view::{Timeline, TimelineEntry};

use crate::clock::local_day;

/// Separator label for the calendar day of `local`, as seen on `today`.
fn day_label(local: &DateTime<FixedOffset>, today: NaiveDate) -> String {
    let day = local.date_naive();
    if day == today {
        "Aujourd'hui".to_string()
    } else if today.pred_opt() == Some(day) {
        "Hier".to_string()
    } else {
        local.format_localized("%A %-d %B", Locale::fr_FR).to_string()
    }
}

/// Messages in ascending `createdAt` order, with a day separator ahead of the
/// first message and between every pair of messages on different local days.
pub fn build_timeline(mut messages: Vec<Message>, now: DateTime<Utc>, offset: FixedOffset) -> Timeline {
    messages.sort_by_key(|m| m.created_at);
    let today = local_day(now, offset);

    let mut entries = Vec::with_capacity(messages.len() + 1);
    let mut current: Option<NaiveDate> = None;
    for message in messages {
        let local = message.created_at.with_timezone(&offset);
        let day = local.date_naive();
        if current != Some(day) {
            entries.push(TimelineEntry::DaySeparator {
                date: day,
                label: day_label(&local, today),
            });
            current = Some(day);
        }
        entries.push(TimelineEntry::Message {
            time_label: local.format("%H:%M").to_string(),
            message,
        });
    }

    Timeline { entries }
}

/// Inbox time label, by whole days elapsed since `at`.
pub fn relative_label(at: DateTime<Utc>, now: DateTime<Utc>, offset: FixedOffset) -> String {
    let local = at.with_timezone(&offset);
    match (now - at).num_days() {
        i64::MIN..=0 => local.format("%H:%M").to_string(),
        1 => "Hier".to_string(),
        2..=6 => local.format_localized("%a", Locale::fr_FR).to_string(),
        _ => local.format_localized("%-d %b", Locale::fr_FR).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn msg(id: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: id.into(),
            chat_id: "c1".into(),
            sender_id: "u1".into(),
            sender_name: "Léa".into(),
            sender_photo: None,
            text: format!("message {id}"),
            created_at: at,
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_same_day_gets_one_separator() {
        let base = Utc.with_ymd_and_hms(2026, 10, 12, 8, 0, 0).unwrap();
        let messages = (0..5)
            .map(|i| msg(&i.to_string(), base + Duration::minutes(i * 10)))
            .rev()
            .collect();

        let timeline = build_timeline(messages, base + Duration::hours(1), utc());
        assert_eq!(timeline.separator_count(), 1);
        let ids: Vec<_> = timeline.messages().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_separator_only_between_days() {
        let d1 = Utc.with_ymd_and_hms(2026, 10, 10, 22, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2026, 10, 11, 9, 0, 0).unwrap();
        let d3 = Utc.with_ymd_and_hms(2026, 10, 12, 9, 0, 0).unwrap();
        let messages = vec![
            msg("a", d1),
            msg("b", d1 + Duration::minutes(5)),
            msg("c", d2),
            msg("d", d3),
            msg("e", d3 + Duration::minutes(1)),
        ];

        let timeline = build_timeline(messages, d3 + Duration::hours(1), utc());
        let kinds: Vec<&str> = timeline
            .entries
            .iter()
            .map(|e| match e {
                TimelineEntry::DaySeparator { .. } => "|",
                TimelineEntry::Message { message, .. } => message.id.as_str(),
            })
            .collect();
        assert_eq!(kinds, vec!["|", "a", "b", "|", "c", "|", "d", "e"]);

        let labels: Vec<&str> = timeline
            .entries
            .iter()
            .filter_map(|e| match e {
                TimelineEntry::DaySeparator { label, .. } => Some(label.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["samedi 10 octobre", "Hier", "Aujourd'hui"]);
    }

    #[test]
    fn test_days_follow_local_offset() {
        // 21:30 and 22:30 UTC straddle midnight at UTC+2, not at UTC+1
        let a = Utc.with_ymd_and_hms(2026, 10, 10, 21, 30, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 10, 10, 22, 30, 0).unwrap();
        let paris = FixedOffset::east_opt(2 * 3600).unwrap();

        let local = build_timeline(vec![msg("a", a), msg("b", b)], b, paris);
        assert_eq!(local.separator_count(), 2);

        let shifted = FixedOffset::east_opt(3600).unwrap();
        let local = build_timeline(vec![msg("a", a), msg("b", b)], b, shifted);
        assert_eq!(local.separator_count(), 1);
    }

    #[test]
    fn test_time_label() {
        let at = Utc.with_ymd_and_hms(2026, 10, 12, 7, 5, 0).unwrap();
        let timeline = build_timeline(vec![msg("a", at)], at, utc());
        match &timeline.entries[1] {
            TimelineEntry::Message { time_label, .. } => assert_eq!(time_label, "07:05"),
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn test_relative_label() {
        let now = Utc.with_ymd_and_hms(2026, 10, 12, 18, 0, 0).unwrap();
        assert_eq!(relative_label(now - Duration::hours(3), now, utc()), "15:00");
        assert_eq!(relative_label(now - Duration::hours(30), now, utc()), "Hier");
        assert_eq!(
            relative_label(now - Duration::days(10), now, utc()),
            "2 oct."
        );
    }

    #[test]
    fn test_relative_label_counts_elapsed_days() {
        // Yesterday evening but under 24h ago
        let now = Utc.with_ymd_and_hms(2026, 10, 12, 8, 0, 0).unwrap();
        assert_eq!(relative_label(now - Duration::hours(9), now, utc()), "23:00");
        assert_eq!(relative_label(now - Duration::hours(47), now, utc()), "Hier");
    }
}
