//! Next-run computation and the self-healing duty predicate.
//!
//! All wall-clock arithmetic happens in the user's home timezone; results
//! are stored as UTC. Duties have no stored next_run at all: whether one is
//! due falls out of `last_run` versus today's scheduled instant, so missed
//! days recover on their own.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use steward_core::time::parse_iso;

/// Gap reported for a duty that has never run; treated as "run immediately".
pub const NEVER_RAN_GAP_DAYS: i64 = 999;

fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

fn weekday_index(name: &str) -> Option<u32> {
    // chrono: Monday = 0 via num_days_from_monday.
    match name.to_lowercase().as_str() {
        "mon" | "monday" => Some(0),
        "tue" | "tuesday" => Some(1),
        "wed" | "wednesday" => Some(2),
        "thu" | "thursday" => Some(3),
        "fri" | "friday" => Some(4),
        "sat" | "saturday" => Some(5),
        "sun" | "sunday" => Some(6),
        _ => None,
    }
}

/// Next run for a `time` schedule: today at HH:MM local, pushed to tomorrow
/// if already passed, then advanced until the weekday is allowed. Returns a
/// UTC ISO timestamp.
pub fn next_time_run(
    schedule_time: &str,
    schedule_days: &[String],
    from_local: DateTime<Tz>,
) -> String {
    let (hour, minute) = parse_hhmm(schedule_time).unwrap_or((6, 0));

    let mut candidate = from_local
        .date_naive()
        .and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default());
    if from_local
        .timezone()
        .from_local_datetime(&candidate)
        .earliest()
        .map(|c| c <= from_local)
        .unwrap_or(true)
    {
        candidate += Duration::days(1);
    }

    if !schedule_days.is_empty() {
        let allowed: Vec<u32> = schedule_days
            .iter()
            .filter_map(|d| weekday_index(d))
            .collect();
        if !allowed.is_empty() {
            let mut guard = 0;
            while !allowed.contains(&candidate.weekday().num_days_from_monday()) && guard < 8 {
                candidate += Duration::days(1);
                guard += 1;
            }
        }
    }

    local_to_utc_iso(from_local.timezone(), candidate)
}

/// Next run for a 5-field cron expression (`min hour dom mon dow`), `*` or
/// integer literals per field. Walks forward day by day until all date
/// fields match. Unparseable expressions fall back to tomorrow 06:00 local.
pub fn next_cron_run(cron: &str, from_local: DateTime<Tz>) -> String {
    match try_next_cron_run(cron, from_local) {
        Some(ts) => ts,
        None => {
            warn!(cron, "unparseable cron expression, falling back to tomorrow 06:00");
            let tomorrow = (from_local + Duration::days(1))
                .date_naive()
                .and_time(NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default());
            local_to_utc_iso(from_local.timezone(), tomorrow)
        }
    }
}

fn try_next_cron_run(cron: &str, from_local: DateTime<Tz>) -> Option<String> {
    let parts: Vec<&str> = cron.split_whitespace().collect();
    if parts.len() < 5 {
        return None;
    }

    let field = |s: &str| -> Option<Option<u32>> {
        if s == "*" {
            Some(None)
        } else {
            s.parse::<u32>().ok().map(Some)
        }
    };
    let minute = field(parts[0])?.unwrap_or(0);
    let hour = field(parts[1])?.unwrap_or(0);
    let dom = field(parts[2])?;
    let month = field(parts[3])?;
    let dow = field(parts[4])?;

    let mut candidate = from_local
        .date_naive()
        .and_time(NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0)?);
    if from_local
        .timezone()
        .from_local_datetime(&candidate)
        .earliest()
        .map(|c| c <= from_local)
        .unwrap_or(true)
    {
        candidate += Duration::days(1);
    }

    // Walk forward until day-of-month, month, and weekday all match.
    // Cron weekday numbering: 0 = Sunday.
    for _ in 0..=366 {
        let dom_ok = dom.map_or(true, |d| candidate.day() == d);
        let month_ok = month.map_or(true, |m| candidate.month() == m);
        let dow_ok = dow.map_or(true, |d| {
            candidate.weekday().num_days_from_sunday() == d % 7
        });
        if dom_ok && month_ok && dow_ok {
            return Some(local_to_utc_iso(from_local.timezone(), candidate));
        }
        candidate += Duration::days(1);
    }
    None
}

/// Dispatch on schedule_type. `None` for triggered/manual missions.
pub fn compute_next_run(
    schedule_type: Option<&str>,
    schedule_time: Option<&str>,
    schedule_days: &[String],
    schedule_cron: Option<&str>,
    from_local: DateTime<Tz>,
) -> Option<String> {
    match (schedule_type, schedule_time, schedule_cron) {
        (Some("time"), Some(time), _) => Some(next_time_run(time, schedule_days, from_local)),
        (Some("cron"), _, Some(cron)) => Some(next_cron_run(cron, from_local)),
        _ => None,
    }
}

fn local_to_utc_iso(tz: Tz, naive_local: chrono::NaiveDateTime) -> String {
    tz.from_local_datetime(&naive_local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}

/// Self-healing due predicate: a duty is due when today's scheduled instant
/// has passed and the last run happened before it.
///
/// Robust by construction: never ran → due; missed while offline → due at
/// startup; failed yesterday → due again tomorrow (last_run was still
/// written); corrupt last_run → due.
pub fn duty_is_due(schedule_time: &str, last_run: Option<&str>, now_local: DateTime<Tz>) -> bool {
    let (hour, minute) = match parse_hhmm(schedule_time) {
        Some(hm) => hm,
        None => return false,
    };
    let today_scheduled = match now_local
        .with_hour(hour)
        .and_then(|t| t.with_minute(minute))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
    {
        Some(t) => t,
        None => return false,
    };

    if now_local < today_scheduled {
        return false;
    }

    match last_run.and_then(parse_iso) {
        Some(last) => last.with_timezone(&now_local.timezone()) < today_scheduled,
        None => true,
    }
}

/// Days of schedule the duty has missed, for catch-up wording. A duty that
/// never ran reports [`NEVER_RAN_GAP_DAYS`].
pub fn duty_gap_days(schedule_time: &str, last_run: Option<&str>, now_local: DateTime<Tz>) -> i64 {
    let (hour, minute) = parse_hhmm(schedule_time).unwrap_or((6, 0));
    let today_scheduled = now_local
        .with_hour(hour)
        .and_then(|t| t.with_minute(minute))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now_local);

    let Some(last) = last_run.and_then(parse_iso) else {
        return NEVER_RAN_GAP_DAYS;
    };
    let last_local = last.with_timezone(&now_local.timezone());

    let expected_date = if now_local >= today_scheduled {
        today_scheduled.date_naive()
    } else {
        (today_scheduled - Duration::days(1)).date_naive()
    };

    (expected_date - last_local.date_naive()).num_days().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Los_Angeles;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Tz> {
        Los_Angeles
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn time_run_later_today() {
        // 09:30 local, schedule 18:00 → today 18:00 local.
        let next = next_time_run("18:00", &[], local(2026, 3, 10, 9, 30));
        let parsed = parse_iso(&next).unwrap().with_timezone(&Los_Angeles);
        assert_eq!(parsed.hour(), 18);
        assert_eq!(parsed.day(), 10);
    }

    #[test]
    fn time_run_passed_rolls_to_tomorrow() {
        let next = next_time_run("06:00", &[], local(2026, 3, 10, 9, 30));
        let parsed = parse_iso(&next).unwrap().with_timezone(&Los_Angeles);
        assert_eq!(parsed.day(), 11);
        assert_eq!(parsed.hour(), 6);
    }

    #[test]
    fn time_run_respects_weekday_set() {
        // 2026-03-10 is a Tuesday; next sunday-only run is the 15th.
        let next = next_time_run("10:00", &["sun".into()], local(2026, 3, 10, 9, 0));
        let parsed = parse_iso(&next).unwrap().with_timezone(&Los_Angeles);
        assert_eq!(parsed.day(), 15);
        assert_eq!(parsed.weekday(), chrono::Weekday::Sun);
    }

    #[test]
    fn cron_daily_at_six() {
        let next = next_cron_run("0 6 * * *", local(2026, 3, 10, 9, 30));
        let parsed = parse_iso(&next).unwrap().with_timezone(&Los_Angeles);
        assert_eq!(parsed.hour(), 6);
        assert_eq!(parsed.day(), 11);
    }

    #[test]
    fn cron_weekday_sunday() {
        // 0 = Sunday in cron numbering.
        let next = next_cron_run("0 10 * * 0", local(2026, 3, 10, 9, 0));
        let parsed = parse_iso(&next).unwrap().with_timezone(&Los_Angeles);
        assert_eq!(parsed.weekday(), chrono::Weekday::Sun);
        assert_eq!(parsed.hour(), 10);
    }

    #[test]
    fn cron_garbage_falls_back_to_tomorrow_six() {
        let next = next_cron_run("whenever", local(2026, 3, 10, 9, 30));
        let parsed = parse_iso(&next).unwrap().with_timezone(&Los_Angeles);
        assert_eq!(parsed.day(), 11);
        assert_eq!(parsed.hour(), 6);
    }

    #[test]
    fn duty_not_due_before_schedule_time() {
        assert!(!duty_is_due("06:00", None, local(2026, 3, 10, 5, 59)));
    }

    #[test]
    fn duty_due_when_never_ran() {
        assert!(duty_is_due("06:00", None, local(2026, 3, 10, 6, 1)));
        assert_eq!(
            duty_gap_days("06:00", None, local(2026, 3, 10, 6, 1)),
            NEVER_RAN_GAP_DAYS
        );
    }

    #[test]
    fn duty_self_heals_across_missed_days() {
        // Last ran three days ago at 06:00; the duty is due and the gap is 3.
        let now = local(2026, 1, 13, 9, 30);
        let last_run = "2026-01-10T14:00:00+00:00"; // 06:00 Pacific
        assert!(duty_is_due("06:00", Some(last_run), now));
        assert_eq!(duty_gap_days("06:00", Some(last_run), now), 3);
    }

    #[test]
    fn duty_not_redispatched_same_day() {
        // Ran today at 06:05 local; no longer due.
        let now = local(2026, 1, 13, 9, 30);
        let last_run = "2026-01-13T14:05:00+00:00";
        assert!(!duty_is_due("06:00", Some(last_run), now));
        assert_eq!(duty_gap_days("06:00", Some(last_run), now), 0);
    }

    #[test]
    fn duty_corrupt_last_run_counts_as_due() {
        assert!(duty_is_due(
            "06:00",
            Some("garbage"),
            local(2026, 1, 13, 9, 30)
        ));
    }

    #[test]
    fn failed_run_still_advances_last_run() {
        // A failure yesterday wrote last_run; today's 06:00 passes → due once.
        let now = local(2026, 1, 14, 7, 0);
        let last_run = "2026-01-13T14:00:00+00:00";
        assert!(duty_is_due("06:00", Some(last_run), now));
        assert_eq!(duty_gap_days("06:00", Some(last_run), now), 1);
    }
}
