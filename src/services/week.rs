//! IST week kernel.
//!
//! Every week is Monday-anchored on the Asia/Kolkata calendar. Date keys are
//! `YYYY-MM-DD` strings of IST calendar dates; ISO week strings are
//! `YYYY-Www`, numbered by the Thursday of the week.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use serde::Serialize;

pub const IST_TIMEZONE: &str = "Asia/Kolkata";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekDescriptor {
    pub key: String,
    pub start_date: String,
    pub end_date: String,
    pub week_start_date_utc: DateTime<Utc>,
    pub week_end_date_utc: DateTime<Utc>,
    pub iso_week: String,
    pub timezone: String,
}

impl WeekDescriptor {
    pub fn monday(&self) -> NaiveDate {
        self.week_start_date_utc.date_naive()
    }

    pub fn sunday(&self) -> NaiveDate {
        self.monday() + Duration::days(6)
    }

    /// The seven calendar dates of the week, Monday first.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let monday = self.monday();
        (0..7).map(|offset| monday + Duration::days(offset)).collect()
    }

    pub fn date_keys(&self) -> Vec<String> {
        self.dates().into_iter().map(format_date_key).collect()
    }
}

/// IST calendar date of an instant (timezone conversion, not clock offset).
pub fn ist_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&Kolkata).date_naive()
}

pub fn today_ist() -> NaiveDate {
    ist_date(Utc::now())
}

pub fn format_date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Date key of the UTC calendar day of a stored week boundary.
pub fn format_utc_date_key(instant: DateTime<Utc>) -> String {
    format_date_key(instant.date_naive())
}

pub fn parse_date_key(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// ISO-8601 (year, week): shift to the Thursday of the same week; that
/// Thursday's year owns the week and its ordinal fixes the number.
pub fn iso_year_week(date: NaiveDate) -> (i32, u32) {
    let thursday = monday_of(date) + Duration::days(3);
    (thursday.year(), thursday.ordinal0() / 7 + 1)
}

pub fn iso_week_number(date: NaiveDate) -> u32 {
    iso_year_week(date).1
}

pub fn iso_week_label(date: NaiveDate) -> String {
    let (year, week) = iso_year_week(date);
    format!("{year:04}-W{week:02}")
}

pub fn weeks_in_iso_year(year: i32) -> u32 {
    NaiveDate::from_ymd_opt(year, 12, 28)
        .map(iso_week_number)
        .unwrap_or(52)
}

pub fn parse_iso_week(raw: &str) -> Option<(i32, u32)> {
    let trimmed = raw.trim();
    let (year_part, week_part) = trimmed.split_once('-')?;
    let week_digits = week_part
        .strip_prefix('W')
        .or_else(|| week_part.strip_prefix('w'))?;
    if year_part.len() != 4 || week_digits.is_empty() || week_digits.len() > 2 {
        return None;
    }
    if !year_part.bytes().all(|b| b.is_ascii_digit())
        || !week_digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let year = year_part.parse::<i32>().ok()?;
    let week = week_digits.parse::<u32>().ok()?;
    if week == 0 || week > weeks_in_iso_year(year) {
        return None;
    }
    Some((year, week))
}

pub fn week_from_monday(monday: NaiveDate) -> WeekDescriptor {
    let sunday = monday + Duration::days(6);
    let start_utc = Utc.from_utc_datetime(&monday.and_time(NaiveTime::MIN));
    let end_utc = Utc.from_utc_datetime(&(sunday + Duration::days(1)).and_time(NaiveTime::MIN))
        - Duration::milliseconds(1);
    let key = format_date_key(monday);
    WeekDescriptor {
        start_date: key.clone(),
        key,
        end_date: format_date_key(sunday),
        week_start_date_utc: start_utc,
        week_end_date_utc: end_utc,
        iso_week: iso_week_label(monday),
        timezone: IST_TIMEZONE.to_string(),
    }
}

pub fn week_containing(date: NaiveDate) -> WeekDescriptor {
    week_from_monday(monday_of(date))
}

pub fn get_week_parts(instant: DateTime<Utc>) -> WeekDescriptor {
    week_containing(ist_date(instant))
}

/// Week for a date key; a non-Monday key resolves to the week containing it.
pub fn get_week_from_key(raw: &str) -> Option<WeekDescriptor> {
    parse_date_key(raw).map(week_containing)
}

pub fn get_week_from_iso_week(raw: &str) -> Option<WeekDescriptor> {
    let (year, week) = parse_iso_week(raw)?;
    let jan4 = NaiveDate::from_ymd_opt(year, 1, 4)?;
    let first_monday = monday_of(jan4);
    Some(week_from_monday(
        first_monday + Duration::weeks(i64::from(week) - 1),
    ))
}

/// ISO-week syntax first, then a date key; blank input means the current
/// IST week. `None` when the input is neither.
pub fn resolve_week_from_query(raw: Option<&str>, today: NaiveDate) -> Option<WeekDescriptor> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Some(week_containing(today));
    }
    get_week_from_iso_week(trimmed).or_else(|| get_week_from_key(trimmed))
}

/// Either syntax, resolved to the week that contains it.
pub fn week_from_date_or_iso(raw: &str) -> Option<WeekDescriptor> {
    get_week_from_iso_week(raw).or_else(|| get_week_from_key(raw))
}

pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(raw: &str) -> NaiveDate {
        parse_date_key(raw).expect("valid date key")
    }

    #[test]
    fn week_key_round_trips_through_utc_start() {
        let mut monday = date("2019-12-30");
        for _ in 0..400 {
            let key = format_date_key(monday);
            let week = get_week_from_key(&key).expect("week resolves");
            assert_eq!(format_utc_date_key(week.week_start_date_utc), key);
            assert_eq!(get_week_from_key(&week.start_date), Some(week.clone()));
            assert_eq!(get_week_from_iso_week(&week.iso_week), Some(week));
            monday += Duration::weeks(1);
        }
    }

    #[test]
    fn thursday_anchoring_matches_chrono_iso_weeks() {
        let mut day = date("2014-12-20");
        while day < date("2027-01-10") {
            let iso = day.iso_week();
            assert_eq!(iso_year_week(day), (iso.year(), iso.week()), "{day}");
            day += Duration::days(1);
        }
    }

    #[test]
    fn handles_year_boundaries() {
        assert_eq!(iso_week_label(date("2020-12-31")), "2020-W53");
        assert_eq!(iso_week_label(date("2021-01-03")), "2020-W53");
        assert_eq!(iso_week_label(date("2024-12-30")), "2025-W01");
        let week = get_week_from_iso_week("2026-W01").expect("week resolves");
        assert_eq!(week.start_date, "2025-12-29");
        assert_eq!(week.end_date, "2026-01-04");
        assert!(get_week_from_iso_week("2021-W53").is_none());
        assert!(get_week_from_iso_week("2020-W53").is_some());
    }

    #[test]
    fn sunday_belongs_to_the_preceding_monday() {
        let week = get_week_from_key("2026-02-08").expect("week resolves");
        assert_eq!(week.key, "2026-02-02");
        assert_eq!(week.iso_week, "2026-W06");
    }

    #[test]
    fn week_parts_use_the_ist_calendar() {
        // 2026-02-08 19:00 UTC is already Monday 00:30 in IST.
        let instant = Utc
            .with_ymd_and_hms(2026, 2, 8, 19, 0, 0)
            .single()
            .expect("valid instant");
        assert_eq!(get_week_parts(instant).key, "2026-02-09");
        let earlier = Utc
            .with_ymd_and_hms(2026, 2, 8, 18, 0, 0)
            .single()
            .expect("valid instant");
        assert_eq!(get_week_parts(earlier).key, "2026-02-02");
    }

    #[test]
    fn resolves_week_queries_in_precedence_order() {
        let today = date("2026-03-04");
        assert_eq!(
            resolve_week_from_query(None, today).map(|week| week.key),
            Some("2026-03-02".to_string())
        );
        assert_eq!(
            resolve_week_from_query(Some("2026-W07"), today).map(|week| week.key),
            Some("2026-02-09".to_string())
        );
        assert_eq!(
            resolve_week_from_query(Some("2026-02-11"), today).map(|week| week.key),
            Some("2026-02-09".to_string())
        );
        assert!(resolve_week_from_query(Some("next week"), today).is_none());
        assert!(resolve_week_from_query(Some("2026-13-01"), today).is_none());
    }

    #[test]
    fn week_end_is_last_millisecond_of_sunday() {
        let week = get_week_from_key("2026-02-02").expect("week resolves");
        assert_eq!(format_utc_date_key(week.week_end_date_utc), "2026-02-08");
        assert_eq!(week.date_keys().len(), 7);
        assert_eq!(week.date_keys()[6], "2026-02-08");
    }
}
