//! Delivery calendar: which review folder date a recording belongs to.
//!
//! Recordings made before the cutoff go into today's folder. Later ones go
//! to the next working day, skipping weekends, public holidays and studio
//! closures configured in the settings.

pub mod holidays;

pub use holidays::HolidayRegion;

use crate::error::ResolutionError;
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use reviewrec_common::config::{DeliverySettings, DEFAULT_CUTOFF};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// A configured studio closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedDates {
    Single(NaiveDate),
    /// Inclusive on both ends, `start <= end`.
    Range(NaiveDate, NaiveDate),
}

impl ClosedDates {
    /// Every date covered by the closure.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let (start, end) = match *self {
            ClosedDates::Single(day) => (day, day),
            ClosedDates::Range(start, end) => (start, end),
        };
        start.iter_days().take_while(move |day| *day <= end)
    }
}

/// Parse one settings entry: `YYYY-MM-DD` or `YYYY-MM-DD, YYYY-MM-DD`.
///
/// Quotes around the dates are tolerated.
pub fn parse_closed_dates(entry: &str) -> Result<ClosedDates, String> {
    let cleaned = entry.replace(['\'', '"'], "");
    let tokens: Vec<&str> = cleaned
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    let parse = |token: &str| {
        NaiveDate::parse_from_str(token, "%Y-%m-%d")
            .map_err(|e| format!("invalid date {:?}: {}", token, e))
    };

    match tokens.as_slice() {
        [single] => Ok(ClosedDates::Single(parse(single)?)),
        [start, end] => {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(format!("range ends before it starts: {} > {}", start, end));
            }
            Ok(ClosedDates::Range(start, end))
        }
        [] => Err("empty entry".to_string()),
        more => Err(format!("expected 1 or 2 dates, found {}", more.len())),
    }
}

/// Parse all settings entries, skipping malformed ones with a warning.
pub fn parse_closures(entries: &[String]) -> Vec<ClosedDates> {
    entries
        .iter()
        .filter_map(|entry| match parse_closed_dates(entry) {
            Ok(closed) => Some(closed),
            Err(e) => {
                warn!("Skipping excluded-date entry {:?}: {}", entry, e);
                None
            }
        })
        .collect()
}

/// Rules used to pick a delivery day.
#[derive(Debug, Clone)]
pub struct DeliveryRules {
    /// Recordings strictly before this time are delivered the same day.
    pub cutoff: NaiveTime,
    pub holiday_region: HolidayRegion,
    pub closed_dates: Vec<ClosedDates>,
    /// How far ahead weekends are computed.
    pub weekend_window_months: u32,
}

impl Default for DeliveryRules {
    fn default() -> Self {
        Self {
            cutoff: default_cutoff(),
            holiday_region: HolidayRegion::default(),
            closed_dates: Vec::new(),
            weekend_window_months: reviewrec_common::config::DEFAULT_WEEKEND_WINDOW_MONTHS,
        }
    }
}

fn default_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN)
}

impl DeliveryRules {
    /// Build rules from a settings snapshot. Unusable values fall back to defaults.
    pub fn from_settings(delivery: &DeliverySettings, excluded_dates: &[String]) -> Self {
        let cutoff = NaiveTime::parse_from_str(delivery.cutoff.trim(), "%H:%M").unwrap_or_else(|e| {
            warn!(
                "Invalid cutoff {:?} ({}), using {}",
                delivery.cutoff, e, DEFAULT_CUTOFF
            );
            default_cutoff()
        });

        let holiday_region =
            HolidayRegion::from_str(&delivery.holiday_region).unwrap_or_else(|| {
                warn!(
                    "Unknown holiday region {:?}, using {}",
                    delivery.holiday_region,
                    HolidayRegion::default().as_str()
                );
                HolidayRegion::default()
            });

        Self {
            cutoff,
            holiday_region,
            closed_dates: parse_closures(excluded_dates),
            weekend_window_months: delivery.weekend_window_months.max(1),
        }
    }

    fn window_end(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_add_months(Months::new(self.weekend_window_months.max(1)))
            .unwrap_or(NaiveDate::MAX)
    }
}

/// Non-working days assembled from closures, public holidays and weekends.
#[derive(Debug, Clone, Default)]
pub struct ExclusionCalendar {
    days: BTreeSet<NaiveDate>,
}

impl ExclusionCalendar {
    /// Build the calendar for a query made on `today`.
    ///
    /// Weekends are computed from `today` through the forward window;
    /// holidays for every year the window touches.
    pub fn build(today: NaiveDate, rules: &DeliveryRules) -> Self {
        let end = rules.window_end(today);
        let mut calendar = Self::default();

        for closure in &rules.closed_dates {
            calendar.days.extend(closure.days());
        }
        for year in today.year()..=end.year() {
            calendar.days.extend(rules.holiday_region.holidays(year));
        }
        calendar.days.extend(
            today
                .iter_days()
                .take_while(|day| *day <= end)
                .filter(|day| is_weekend(*day)),
        );

        debug!(
            "Exclusion calendar has {} day(s) through {}",
            calendar.len(),
            end
        );
        calendar
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.days.contains(&day)
    }

    fn len(&self) -> usize {
        self.days.len()
    }
}

/// Saturday or Sunday (weekday index above 4 with Monday = 0).
pub fn is_weekend(day: NaiveDate) -> bool {
    day.weekday().num_days_from_monday() > 4
}

/// Pick the delivery day for a recording finished at `now`.
///
/// Before the cutoff the answer is `now`'s date. Otherwise the first day after
/// `now` that is not excluded. The scan is bounded to twice the weekend
/// window; running past it is a [`ResolutionError`].
pub fn resolve_delivery_date(
    now: NaiveDateTime,
    rules: &DeliveryRules,
) -> Result<NaiveDate, ResolutionError> {
    let today = now.date();
    if now.time() < rules.cutoff {
        info!("Recording is for the same day");
        return Ok(today);
    }

    let calendar = ExclusionCalendar::build(today, rules);
    let window_days = (rules.window_end(today) - today).num_days().max(1) as u32;
    let limit = window_days * 2;

    let mut candidate = today + Duration::days(1);
    for _ in 0..limit {
        // Weekends past the window are not in the calendar
        if !is_weekend(candidate) && !calendar.contains(candidate) {
            info!("Date found: {}", candidate);
            return Ok(candidate);
        }
        debug!("Trying next day after {}", candidate);
        candidate += Duration::days(1);
    }

    Err(ResolutionError {
        start: today,
        days_scanned: limit,
    })
}

/// Folder name for a delivery day.
pub fn delivery_folder_name(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(day: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
        day.and_hms_opt(hour, minute, 0).unwrap()
    }

    fn plain_rules() -> DeliveryRules {
        DeliveryRules {
            holiday_region: HolidayRegion::None,
            ..DeliveryRules::default()
        }
    }

    #[test]
    fn test_before_cutoff_is_same_day() {
        let now = at(date(2024, 6, 3), 9, 0);
        assert_eq!(resolve_delivery_date(now, &plain_rules()).unwrap(), date(2024, 6, 3));
    }

    #[test]
    fn test_after_cutoff_is_next_day() {
        let now = at(date(2024, 6, 3), 11, 0);
        assert_eq!(resolve_delivery_date(now, &plain_rules()).unwrap(), date(2024, 6, 4));
    }

    #[test]
    fn test_exactly_at_cutoff_moves_on() {
        let now = at(date(2024, 6, 3), 10, 0);
        assert_eq!(resolve_delivery_date(now, &plain_rules()).unwrap(), date(2024, 6, 4));
    }

    #[test]
    fn test_friday_afternoon_skips_weekend() {
        let now = at(date(2024, 6, 7), 11, 0);
        assert_eq!(resolve_delivery_date(now, &plain_rules()).unwrap(), date(2024, 6, 10));
    }

    #[test]
    fn test_holiday_is_skipped() {
        // Thursday before Good Friday and the Easter weekend.
        let rules = DeliveryRules::default();
        let now = at(date(2024, 3, 28), 15, 30);
        assert_eq!(resolve_delivery_date(now, &rules).unwrap(), date(2024, 4, 2));
    }

    #[test]
    fn test_closure_range_is_skipped() {
        let mut rules = plain_rules();
        rules.closed_dates = parse_closures(&["2024-06-04, 2024-06-06".to_string()]);
        let now = at(date(2024, 6, 3), 12, 0);
        assert_eq!(resolve_delivery_date(now, &rules).unwrap(), date(2024, 6, 7));
    }

    #[test]
    fn test_result_is_never_excluded() {
        let mut rules = DeliveryRules::default();
        rules.closed_dates = parse_closures(&[
            "2024-12-23, 2024-12-31".to_string(),
            "'2025-01-02'".to_string(),
        ]);
        let mut day = date(2024, 12, 1);
        while day < date(2025, 2, 1) {
            let now = at(day, 18, 0);
            let found = resolve_delivery_date(now, &rules).unwrap();
            let calendar = ExclusionCalendar::build(day, &rules);
            assert!(found > day);
            assert!(!is_weekend(found));
            assert!(!calendar.contains(found), "{} excluded", found);
            day += Duration::days(1);
        }
    }

    #[test]
    fn test_new_year_uses_next_years_holidays() {
        // Dec 31 2024 is a Tuesday; Jan 1 2025 is a public holiday.
        let now = at(date(2024, 12, 31), 12, 0);
        let found = resolve_delivery_date(now, &DeliveryRules::default()).unwrap();
        assert_eq!(found, date(2025, 1, 2));
    }

    #[test]
    fn test_exhausted_scan_is_an_error() {
        let mut rules = plain_rules();
        rules.weekend_window_months = 1;
        rules.closed_dates = vec![ClosedDates::Range(date(2024, 6, 1), date(2024, 12, 31))];
        let err = resolve_delivery_date(at(date(2024, 6, 3), 12, 0), &rules).unwrap_err();
        assert_eq!(err.start, date(2024, 6, 3));
        assert_eq!(err.days_scanned, 60);
    }

    #[test]
    fn test_scan_past_window_still_skips_weekends() {
        // Closures run to the end of the weekend window (Sat Sep 7);
        // the next two days fall outside it and Sep 8 is a Sunday.
        let mut rules = plain_rules();
        rules.closed_dates = vec![ClosedDates::Range(date(2024, 6, 8), date(2024, 9, 7))];
        let found = resolve_delivery_date(at(date(2024, 6, 7), 11, 0), &rules).unwrap();
        assert_eq!(found, date(2024, 9, 9));
        assert!(!is_weekend(found));
    }

    #[test]
    fn test_parse_closed_dates() {
        assert_eq!(
            parse_closed_dates("2024-08-19").unwrap(),
            ClosedDates::Single(date(2024, 8, 19))
        );
        assert_eq!(
            parse_closed_dates("'2024-12-24', '2024-12-27'").unwrap(),
            ClosedDates::Range(date(2024, 12, 24), date(2024, 12, 27))
        );
        assert!(parse_closed_dates("2024-13-01").is_err());
        assert!(parse_closed_dates("2024-12-27, 2024-12-24").is_err());
        assert!(parse_closed_dates("2024-01-01, 2024-01-02, 2024-01-03").is_err());
        assert!(parse_closed_dates("  ").is_err());
    }

    #[test]
    fn test_malformed_closures_are_skipped() {
        let closures = parse_closures(&[
            "garbage".to_string(),
            "2024-08-19".to_string(),
            "2024-09-02, 2024-09-01".to_string(),
        ]);
        assert_eq!(closures, vec![ClosedDates::Single(date(2024, 8, 19))]);
    }

    #[test]
    fn test_range_expands_inclusive() {
        let days: Vec<_> = ClosedDates::Range(date(2024, 2, 28), date(2024, 3, 1))
            .days()
            .collect();
        assert_eq!(days, vec![date(2024, 2, 28), date(2024, 2, 29), date(2024, 3, 1)]);
    }

    #[test]
    fn test_calendar_deduplicates_sources() {
        let mut rules = DeliveryRules::default();
        // Saturday that is also configured as a closure.
        rules.closed_dates = vec![ClosedDates::Single(date(2024, 6, 8))];
        let with_dup = ExclusionCalendar::build(date(2024, 6, 3), &rules);
        rules.closed_dates.clear();
        let without = ExclusionCalendar::build(date(2024, 6, 3), &rules);
        assert_eq!(with_dup.len(), without.len());
    }

    #[test]
    fn test_rules_from_settings_fall_back() {
        let settings = DeliverySettings {
            cutoff: "noon".to_string(),
            holiday_region: "mars".to_string(),
            weekend_window_months: 0,
        };
        let rules = DeliveryRules::from_settings(&settings, &["bad".to_string()]);
        assert_eq!(rules.cutoff, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(rules.holiday_region, HolidayRegion::Hungary);
        assert!(rules.closed_dates.is_empty());
        assert_eq!(rules.weekend_window_months, 1);
    }

    #[test]
    fn test_folder_name() {
        assert_eq!(delivery_folder_name(date(2024, 6, 4)), "2024-06-04");
    }
}
