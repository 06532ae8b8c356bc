//! Query → concrete reporting interval. Precedence is `week`, then `month`,
//! then `from`/`to`, then the default lookback. Every violation is a
//! `BadRequest`; nothing here panics on user input.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

use super::metrics::non_empty_opt;
use super::week::{
    format_date_key, get_week_from_iso_week, parse_date_key, resolve_week_from_query,
    week_containing, week_from_date_or_iso, week_from_monday, WeekDescriptor, IST_TIMEZONE,
};

pub const DEFAULT_LOOKBACK_DAYS: i64 = 83;
pub const MAX_RANGE_DAYS: i64 = 370;
pub const DEFAULT_LOOKBACK_WEEKS: i64 = 12;
pub const MAX_RANGE_WEEKS: i64 = 52;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeQuery {
    pub week: Option<String>,
    pub month: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeMode {
    Week,
    Month,
    Custom,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub mode: RangeMode,
    pub label: String,
    pub timezone: String,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from_date && date <= self.to_date
    }

    pub fn span_days(&self) -> i64 {
        (self.to_date - self.from_date).num_days() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekRange {
    pub from_week: WeekDescriptor,
    pub to_week: WeekDescriptor,
    pub weeks: Vec<WeekDescriptor>,
    pub mode: RangeMode,
    pub label: String,
    pub timezone: String,
}

impl WeekRange {
    pub fn from_date(&self) -> NaiveDate {
        self.from_week.monday()
    }

    pub fn to_date(&self) -> NaiveDate {
        self.to_week.sunday()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from_date() && date <= self.to_date()
    }
}

/// Stage 1 (plan vs actual).
pub fn resolve_stage1_range(query: &RangeQuery, today: NaiveDate) -> AppResult<DateRange> {
    resolve_date_range(query, today)
}

/// Stage 2 works on a single week: `week`, else the week containing `from`,
/// else the current IST week.
pub fn resolve_stage2_range(query: &RangeQuery, today: NaiveDate) -> AppResult<DateRange> {
    let raw = non_empty_opt(query.week.as_deref()).or_else(|| non_empty_opt(query.from.as_deref()));
    let week = resolve_week_from_query(raw.as_deref(), today).ok_or_else(|| {
        AppError::BadRequest("Invalid week. Use YYYY-Www or YYYY-MM-DD.".to_string())
    })?;
    Ok(single_week_range(&week))
}

/// Stage 3 (planned but not visited).
pub fn resolve_stage3_range(query: &RangeQuery, today: NaiveDate) -> AppResult<DateRange> {
    resolve_date_range(query, today)
}

/// Stage 4 reuses the weekly insights window.
pub fn resolve_stage4_range(query: &RangeQuery, today: NaiveDate) -> AppResult<WeekRange> {
    resolve_insights_range(query, today)
}

/// Stage 5 reuses the weekly insights window.
pub fn resolve_stage5_range(query: &RangeQuery, today: NaiveDate) -> AppResult<WeekRange> {
    resolve_insights_range(query, today)
}

pub fn resolve_date_range(query: &RangeQuery, today: NaiveDate) -> AppResult<DateRange> {
    if let Some(raw_week) = non_empty_opt(query.week.as_deref()) {
        let week = get_week_from_iso_week(&raw_week).ok_or_else(|| {
            AppError::BadRequest(format!("Invalid week '{raw_week}'. Use YYYY-Www."))
        })?;
        return Ok(single_week_range(&week));
    }

    if let Some(raw_month) = non_empty_opt(query.month.as_deref()) {
        let (first, last) = parse_month(&raw_month)?;
        return Ok(DateRange {
            from_date: first,
            to_date: last,
            mode: RangeMode::Month,
            label: first.format("%B %Y").to_string(),
            timezone: IST_TIMEZONE.to_string(),
        });
    }

    let raw_from = non_empty_opt(query.from.as_deref());
    let raw_to = non_empty_opt(query.to.as_deref());
    if raw_from.is_none() && raw_to.is_none() {
        let to_date = week_containing(today).sunday();
        let from_date = to_date - Duration::days(DEFAULT_LOOKBACK_DAYS);
        return Ok(DateRange {
            from_date,
            to_date,
            mode: RangeMode::Default,
            label: format!("Last {DEFAULT_LOOKBACK_WEEKS} weeks"),
            timezone: IST_TIMEZONE.to_string(),
        });
    }

    let to_date = match raw_to.as_deref() {
        Some(raw) => range_bound(raw, "to", Bound::End)?,
        None => today,
    };
    let from_date = match raw_from.as_deref() {
        Some(raw) => range_bound(raw, "from", Bound::Start)?,
        None => to_date - Duration::days(DEFAULT_LOOKBACK_DAYS),
    };
    if from_date > to_date {
        return Err(AppError::BadRequest(
            "'from' must be on or before 'to'.".to_string(),
        ));
    }
    let range = DateRange {
        from_date,
        to_date,
        mode: RangeMode::Custom,
        label: format!(
            "{} to {}",
            format_date_key(from_date),
            format_date_key(to_date)
        ),
        timezone: IST_TIMEZONE.to_string(),
    };
    if range.span_days() > MAX_RANGE_DAYS {
        return Err(AppError::BadRequest(format!(
            "Date range cannot exceed {MAX_RANGE_DAYS} days (requested {}).",
            range.span_days()
        )));
    }
    Ok(range)
}

pub fn resolve_insights_range(query: &RangeQuery, today: NaiveDate) -> AppResult<WeekRange> {
    if let Some(raw_week) = non_empty_opt(query.week.as_deref()) {
        let week = get_week_from_iso_week(&raw_week).ok_or_else(|| {
            AppError::BadRequest(format!("Invalid week '{raw_week}'. Use YYYY-Www."))
        })?;
        let label = format!("Week {}", week.iso_week);
        return build_week_range(week.clone(), week, RangeMode::Week, label);
    }

    if let Some(raw_month) = non_empty_opt(query.month.as_deref()) {
        let (first, last) = parse_month(&raw_month)?;
        return build_week_range(
            week_containing(first),
            week_containing(last),
            RangeMode::Month,
            first.format("%B %Y").to_string(),
        );
    }

    let raw_from = non_empty_opt(query.from.as_deref());
    let raw_to = non_empty_opt(query.to.as_deref());
    if raw_from.is_none() && raw_to.is_none() {
        let to_week = week_containing(today);
        let from_week =
            week_from_monday(to_week.monday() - Duration::weeks(DEFAULT_LOOKBACK_WEEKS - 1));
        return build_week_range(
            from_week,
            to_week,
            RangeMode::Default,
            format!("Last {DEFAULT_LOOKBACK_WEEKS} weeks"),
        );
    }

    let to_week = match raw_to.as_deref() {
        Some(raw) => week_from_date_or_iso(raw).ok_or_else(|| invalid_bound("to", raw))?,
        None => week_containing(today),
    };
    let from_week = match raw_from.as_deref() {
        Some(raw) => week_from_date_or_iso(raw).ok_or_else(|| invalid_bound("from", raw))?,
        None => week_from_monday(to_week.monday() - Duration::weeks(DEFAULT_LOOKBACK_WEEKS - 1)),
    };
    let label = format!("{} to {}", from_week.iso_week, to_week.iso_week);
    build_week_range(from_week, to_week, RangeMode::Custom, label)
}

fn build_week_range(
    from_week: WeekDescriptor,
    to_week: WeekDescriptor,
    mode: RangeMode,
    label: String,
) -> AppResult<WeekRange> {
    if from_week.monday() > to_week.monday() {
        return Err(AppError::BadRequest(
            "'from' must be on or before 'to'.".to_string(),
        ));
    }
    let week_count = (to_week.monday() - from_week.monday()).num_weeks() + 1;
    if week_count > MAX_RANGE_WEEKS {
        return Err(AppError::BadRequest(format!(
            "Week range cannot exceed {MAX_RANGE_WEEKS} weeks (requested {week_count})."
        )));
    }
    let weeks = (0..week_count)
        .map(|offset| week_from_monday(from_week.monday() + Duration::weeks(offset)))
        .collect();
    Ok(WeekRange {
        from_week,
        to_week,
        weeks,
        mode,
        label,
        timezone: IST_TIMEZONE.to_string(),
    })
}

fn single_week_range(week: &WeekDescriptor) -> DateRange {
    DateRange {
        from_date: week.monday(),
        to_date: week.sunday(),
        mode: RangeMode::Week,
        label: format!(
            "Week {} ({} to {})",
            week.iso_week, week.start_date, week.end_date
        ),
        timezone: IST_TIMEZONE.to_string(),
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// A date key, or an ISO week widened to its first/last day.
fn range_bound(raw: &str, field: &str, bound: Bound) -> AppResult<NaiveDate> {
    if let Some(date) = parse_date_key(raw) {
        return Ok(date);
    }
    let week = get_week_from_iso_week(raw).ok_or_else(|| invalid_bound(field, raw))?;
    Ok(match bound {
        Bound::Start => week.monday(),
        Bound::End => week.sunday(),
    })
}

fn invalid_bound(field: &str, raw: &str) -> AppError {
    AppError::BadRequest(format!(
        "Invalid '{field}' value '{raw}'. Use YYYY-MM-DD or YYYY-Www."
    ))
}

/// `YYYY-MM` → first and last calendar day of the month.
pub fn parse_month(raw: &str) -> AppResult<(NaiveDate, NaiveDate)> {
    let invalid = || AppError::BadRequest(format!("Invalid month '{raw}'. Use YYYY-MM."));
    let (year_part, month_part) = raw.trim().split_once('-').ok_or_else(invalid)?;
    if year_part.len() != 4 || month_part.len() != 2 {
        return Err(invalid());
    }
    let year = year_part.parse::<i32>().map_err(|_| invalid())?;
    let month = month_part.parse::<u32>().map_err(|_| invalid())?;
    if !(1..=12).contains(&month) {
        return Err(invalid());
    }
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;
    Ok((first, next_first - Duration::days(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        parse_date_key("2026-03-04").expect("valid date")
    }

    fn query(
        week: Option<&str>,
        month: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
    ) -> RangeQuery {
        RangeQuery {
            week: week.map(str::to_string),
            month: month.map(str::to_string),
            from: from.map(str::to_string),
            to: to.map(str::to_string),
        }
    }

    #[test]
    fn default_date_range_is_twelve_weeks_ending_this_sunday() {
        let range = resolve_stage1_range(&RangeQuery::default(), today()).expect("range");
        assert_eq!(range.mode, RangeMode::Default);
        assert_eq!(format_date_key(range.to_date), "2026-03-08");
        assert_eq!(format_date_key(range.from_date), "2025-12-15");
        assert_eq!(range.span_days(), 84);
    }

    #[test]
    fn week_takes_precedence_over_month_and_from_to() {
        let range = resolve_stage1_range(
            &query(Some("2026-W06"), Some("2026-01"), Some("2025-01-01"), None),
            today(),
        )
        .expect("range");
        assert_eq!(range.mode, RangeMode::Week);
        assert_eq!(format_date_key(range.from_date), "2026-02-02");
        assert_eq!(format_date_key(range.to_date), "2026-02-08");
    }

    #[test]
    fn month_ranges_cover_leap_februaries() {
        let range = resolve_stage3_range(&query(None, Some("2024-02"), None, None), today())
            .expect("range");
        assert_eq!(format_date_key(range.to_date), "2024-02-29");
        let range = resolve_stage3_range(&query(None, Some("2025-12"), None, None), today())
            .expect("range");
        assert_eq!(format_date_key(range.to_date), "2025-12-31");
        assert!(resolve_stage3_range(&query(None, Some("2025-13"), None, None), today()).is_err());
        assert!(resolve_stage3_range(&query(None, Some("2025-00"), None, None), today()).is_err());
    }

    #[test]
    fn rejects_inverted_and_oversized_ranges() {
        let inverted = resolve_stage1_range(
            &query(None, None, Some("2026-02-10"), Some("2026-02-01")),
            today(),
        );
        assert!(inverted.is_err());

        let at_cap = resolve_stage1_range(
            &query(None, None, Some("2025-01-01"), Some("2026-01-05")),
            today(),
        )
        .expect("370 days is allowed");
        assert_eq!(at_cap.span_days(), 370);

        let oversized = resolve_stage1_range(
            &query(None, None, Some("2025-01-01"), Some("2026-01-06")),
            today(),
        );
        assert!(oversized.is_err());
    }

    #[test]
    fn from_to_accept_iso_weeks() {
        let range = resolve_stage1_range(
            &query(None, None, Some("2026-W05"), Some("2026-W06")),
            today(),
        )
        .expect("range");
        assert_eq!(format_date_key(range.from_date), "2026-01-26");
        assert_eq!(format_date_key(range.to_date), "2026-02-08");
    }

    #[test]
    fn insights_default_is_twelve_weeks() {
        let range = resolve_insights_range(&RangeQuery::default(), today()).expect("range");
        assert_eq!(range.weeks.len(), 12);
        assert_eq!(range.to_week.key, "2026-03-02");
        assert_eq!(range.from_week.key, "2025-12-15");
    }

    #[test]
    fn insights_month_spans_overlapping_weeks() {
        let range = resolve_insights_range(&query(None, Some("2026-02"), None, None), today())
            .expect("range");
        assert_eq!(range.from_week.key, "2026-01-26");
        assert_eq!(range.to_week.key, "2026-02-23");
        assert_eq!(range.weeks.len(), 5);
    }

    #[test]
    fn insights_caps_at_fifty_two_weeks() {
        let ok = resolve_insights_range(
            &query(None, None, Some("2025-W10"), Some("2026-W09")),
            today(),
        );
        assert_eq!(ok.map(|range| range.weeks.len()).ok(), Some(52));
        let too_long = resolve_insights_range(
            &query(None, None, Some("2025-W09"), Some("2026-W09")),
            today(),
        );
        assert!(too_long.is_err());
    }

    #[test]
    fn stage2_resolves_a_single_week() {
        let range = resolve_stage2_range(&query(None, None, Some("2026-02-04"), None), today())
            .expect("range");
        assert_eq!(format_date_key(range.from_date), "2026-02-02");
        assert_eq!(range.span_days(), 7);
        assert!(resolve_stage2_range(&query(Some("garbage"), None, None, None), today()).is_err());
    }
}
