//! Config matching and deadline arithmetic.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use convoy_config::BusinessHours;
use convoy_core::{Priority, SlaConfig};

/// Pick the most specific active config for `(priority, tier)`:
/// a tier-specific config beats the priority default.
#[must_use]
pub fn match_config<'a>(
    configs: &'a [SlaConfig],
    priority: Priority,
    tier: Option<&str>,
) -> Option<&'a SlaConfig> {
    let mut fallback = None;
    for config in configs.iter().filter(|c| c.active && c.priority == priority) {
        match (&config.customer_tier, tier) {
            (Some(config_tier), Some(tier)) if config_tier == tier => return Some(config),
            (None, _) => fallback = fallback.or(Some(config)),
            _ => {}
        }
    }
    fallback
}

/// Compute a deadline `minutes` after `start`, counting only business
/// hours when `hours` is given.
#[must_use]
pub fn deadline_for(
    start: DateTime<Utc>,
    minutes: u32,
    hours: Option<&BusinessHours>,
) -> DateTime<Utc> {
    match hours {
        None => start + Duration::minutes(i64::from(minutes)),
        Some(hours) => add_business_minutes(start, minutes, hours),
    }
}

/// Walk forward from `start`, consuming `minutes` only while inside
/// the business-hours window.
#[must_use]
pub fn add_business_minutes(
    start: DateTime<Utc>,
    minutes: u32,
    hours: &BusinessHours,
) -> DateTime<Utc> {
    let mut current = start;
    let mut remaining = i64::from(minutes);

    // Hard bound on the walk: broken configs (empty weekday set) must
    // not spin forever.
    for _ in 0..(366 * 2) {
        if remaining <= 0 {
            return current;
        }
        if !is_business_day(current, hours) || current.hour() >= hours.end_hour {
            current = next_day_start(current, hours);
            continue;
        }
        if current.hour() < hours.start_hour {
            current = day_at_hour(current, hours.start_hour);
            continue;
        }

        let window_end = day_at_hour(current, hours.end_hour);
        let available = (window_end - current).num_minutes();
        if available >= remaining {
            return current + Duration::minutes(remaining);
        }
        remaining -= available;
        current = next_day_start(current, hours);
    }
    current
}

fn is_business_day(at: DateTime<Utc>, hours: &BusinessHours) -> bool {
    let day = u8::try_from(at.weekday().num_days_from_monday()).unwrap_or(6);
    hours.weekdays.contains(&day)
}

fn day_at_hour(at: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), hour, 0, 0)
        .single()
        .unwrap_or(at)
}

fn next_day_start(at: DateTime<Utc>, hours: &BusinessHours) -> DateTime<Utc> {
    let mut next = day_at_hour(at + Duration::days(1), hours.start_hour);
    // Skip to the next counted weekday.
    for _ in 0..14 {
        if is_business_day(next, hours) {
            break;
        }
        next += Duration::days(1);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: i64, priority: Priority, tier: Option<&str>) -> SlaConfig {
        SlaConfig {
            id,
            name: format!("c{id}"),
            priority,
            customer_tier: tier.map(str::to_string),
            first_response_mins: 15,
            resolution_mins: 240,
            escalation_mins: 60,
            business_hours_only: false,
            active: true,
        }
    }

    #[test]
    fn tier_specific_beats_default() {
        let configs = vec![
            config(1, Priority::High, None),
            config(2, Priority::High, Some("enterprise")),
        ];

        assert_eq!(
            match_config(&configs, Priority::High, Some("enterprise")).map(|c| c.id),
            Some(2)
        );
        assert_eq!(
            match_config(&configs, Priority::High, Some("starter")).map(|c| c.id),
            Some(1)
        );
        assert_eq!(
            match_config(&configs, Priority::High, None).map(|c| c.id),
            Some(1)
        );
        assert_eq!(match_config(&configs, Priority::Low, None), None);
    }

    #[test]
    fn inactive_configs_never_match() {
        let mut inactive = config(1, Priority::High, None);
        inactive.active = false;
        assert_eq!(match_config(&[inactive], Priority::High, None), None);
    }

    #[test]
    fn wall_clock_deadline_is_plain_addition() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).single().unwrap();
        assert_eq!(
            deadline_for(start, 90, None),
            start + Duration::minutes(90)
        );
    }

    #[test]
    fn business_minutes_pause_overnight() {
        let hours = BusinessHours::default(); // 9..17, Mon-Fri
        // Monday 16:30 + 60 business minutes: 30 tonight, 30 tomorrow
        // from 09:00 -> Tuesday 09:30.
        let monday = Utc.with_ymd_and_hms(2026, 3, 2, 16, 30, 0).single().unwrap();
        let deadline = add_business_minutes(monday, 60, &hours);
        let tuesday = Utc.with_ymd_and_hms(2026, 3, 3, 9, 30, 0).single().unwrap();
        assert_eq!(deadline, tuesday);
    }

    #[test]
    fn business_minutes_skip_weekends() {
        let hours = BusinessHours::default();
        // Friday 16:00 + 120 business minutes: 60 Friday, 60 Monday.
        let friday = Utc.with_ymd_and_hms(2026, 3, 6, 16, 0, 0).single().unwrap();
        let deadline = add_business_minutes(friday, 120, &hours);
        let monday = Utc.with_ymd_and_hms(2026, 3, 9, 10, 0, 0).single().unwrap();
        assert_eq!(deadline, monday);
    }

    #[test]
    fn start_before_opening_counts_from_opening() {
        let hours = BusinessHours::default();
        let early = Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).single().unwrap();
        let deadline = add_business_minutes(early, 30, &hours);
        let expected = Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).single().unwrap();
        assert_eq!(deadline, expected);
    }
}
