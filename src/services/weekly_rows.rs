//! Write-time normaliser for the seven planning / actual-output rows of a
//! weekly report. Everything stored in a report passes through here.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{AppError, AppResult},
    models::{
        ActualOutputRow, ContactType, CustomerType, PlanningRow, ReasonCategory, UnknownLabels,
        Visited, WeeklyReport,
    },
};

use super::week::{format_date_key, iso_week_number, parse_date_key, WeekDescriptor};

pub const ROWS_PER_WEEK: usize = 7;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanningRowInput {
    pub date: String,
    pub customer_name: String,
    pub location_area: String,
    pub customer_type: String,
    pub contact_type: String,
    pub jsv_with_whom: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActualOutputRowInput {
    pub date: String,
    pub visited: String,
    pub not_visited_reason: String,
    pub not_visited_reason_category: String,
    pub enquiries_received: Option<Value>,
    pub shipments_converted: Option<Value>,
}

pub struct PlanningRowOptions<'a> {
    pub admin_ids: &'a BTreeSet<String>,
    /// Rows currently stored for the week, the baseline for legacy checks.
    pub existing_rows: &'a [PlanningRow],
    pub allow_legacy_unchanged: bool,
}

pub struct ActualRowOptions<'a> {
    pub existing_rows: &'a [ActualOutputRow],
    pub allow_legacy_unchanged: bool,
}

pub fn default_planning_rows(week: &WeekDescriptor) -> Vec<PlanningRow> {
    week.dates()
        .into_iter()
        .map(|date| PlanningRow {
            date: format_date_key(date),
            iso_week: iso_week_number(date),
            ..PlanningRow::default()
        })
        .collect()
}

pub fn default_actual_rows(week: &WeekDescriptor) -> Vec<ActualOutputRow> {
    week.dates()
        .into_iter()
        .map(|date| ActualOutputRow {
            date: format_date_key(date),
            iso_week: iso_week_number(date),
            ..ActualOutputRow::default()
        })
        .collect()
}

/// All-blank report materialised the first time a salesperson opens a week.
pub fn empty_weekly_report(salesman_id: &str, week: &WeekDescriptor) -> WeeklyReport {
    WeeklyReport {
        salesman_id: salesman_id.to_string(),
        week_key: week.key.clone(),
        week_start_date_utc: Some(week.week_start_date_utc),
        week_end_date_utc: Some(week.week_end_date_utc),
        planning_rows: default_planning_rows(week),
        actual_output_rows: default_actual_rows(week),
        submitted_at: None,
        updated_at: None,
        current_status: "draft".to_string(),
    }
}

pub fn normalize_planning_rows(
    rows: &[PlanningRowInput],
    week: &WeekDescriptor,
    options: &PlanningRowOptions<'_>,
) -> AppResult<Vec<PlanningRow>> {
    check_envelope("planningRows", rows.len())?;
    let dates = check_dates(rows.iter().map(|row| row.date.as_str()), week)?;

    let mut parsed = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let customer_type = CustomerType::parse(&row.customer_type).ok_or_else(|| {
            invalid_enum(index, "customerType", &row.customer_type)
        })?;
        let contact_type = ContactType::parse(&row.contact_type)
            .ok_or_else(|| invalid_enum(index, "contactType", &row.contact_type))?;
        parsed.push((customer_type, contact_type));
    }

    let existing = index_by_date(options.existing_rows, |row| row.date.as_str());
    let mut normalized = BTreeMap::new();
    for (index, (row, (customer_type, contact_type))) in rows.iter().zip(parsed).enumerate() {
        let date_key = dates[index].clone();
        let mut jsv_with_whom = row.jsv_with_whom.trim().to_string();
        if contact_type == ContactType::Jsv {
            let known_admin = options.admin_ids.contains(&jsv_with_whom);
            let legacy_unchanged = options.allow_legacy_unchanged
                && existing.get(date_key.as_str()).is_some_and(|stored| {
                    stored.contact_type == ContactType::Jsv && stored.jsv_with_whom == jsv_with_whom
                });
            if !known_admin && !legacy_unchanged {
                return Err(AppError::BadRequest(format!(
                    "Row {} ({date_key}): jsvWithWhom must reference an admin for JSV visits.",
                    index + 1
                )));
            }
        } else {
            jsv_with_whom.clear();
        }

        let date = parse_date_key(&date_key).unwrap_or_else(|| week.monday());
        normalized.insert(
            date_key.clone(),
            PlanningRow {
                date: date_key,
                iso_week: iso_week_number(date),
                customer_name: row.customer_name.trim().to_string(),
                location_area: row.location_area.trim().to_string(),
                customer_type,
                contact_type,
                jsv_with_whom,
                unknown_labels: UnknownLabels::default(),
            },
        );
    }

    Ok(default_planning_rows(week)
        .into_iter()
        .map(|blank| normalized.remove(&blank.date).unwrap_or(blank))
        .collect())
}

pub fn normalize_actual_output_rows(
    rows: &[ActualOutputRowInput],
    week: &WeekDescriptor,
    options: &ActualRowOptions<'_>,
) -> AppResult<Vec<ActualOutputRow>> {
    check_envelope("actualOutputRows", rows.len())?;
    let dates = check_dates(rows.iter().map(|row| row.date.as_str()), week)?;

    let mut parsed = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let visited = Visited::parse(&row.visited)
            .ok_or_else(|| invalid_enum(index, "visited", &row.visited))?;
        let category = ReasonCategory::parse(&row.not_visited_reason_category).ok_or_else(|| {
            invalid_enum(
                index,
                "notVisitedReasonCategory",
                &row.not_visited_reason_category,
            )
        })?;
        parsed.push((visited, category));
    }

    let existing = index_by_date(options.existing_rows, |row| row.date.as_str());
    let mut reasons = Vec::with_capacity(rows.len());
    for (index, (row, (visited, category))) in rows.iter().zip(&parsed).enumerate() {
        let date_key = dates[index].as_str();
        let mut reason = row.not_visited_reason.trim().to_string();
        let mut reason_category = *category;
        if *visited == Visited::No {
            if reason.is_empty() {
                return Err(AppError::BadRequest(format!(
                    "Row {} ({date_key}): notVisitedReason is required when visited is 'no'.",
                    index + 1
                )));
            }
            if reason_category.is_blank() {
                let legacy_unchanged = options.allow_legacy_unchanged
                    && existing.get(date_key).is_some_and(|stored| {
                        stored.visited == Visited::No
                            && stored.not_visited_reason_category.is_blank()
                            && stored.not_visited_reason == reason
                    });
                if !legacy_unchanged {
                    return Err(AppError::BadRequest(format!(
                        "Row {} ({date_key}): notVisitedReasonCategory is required when visited is 'no'.",
                        index + 1
                    )));
                }
            }
        } else {
            reason.clear();
            reason_category = ReasonCategory::Blank;
        }
        reasons.push((reason, reason_category));
    }

    // Counts are checked only once every row has passed the conditional rules.
    let mut normalized = BTreeMap::new();
    for (index, ((row, (visited, _)), (reason, reason_category))) in
        rows.iter().zip(parsed).zip(reasons).enumerate()
    {
        let date_key = dates[index].clone();
        let enquiries = parse_count(row.enquiries_received.as_ref())
            .ok_or_else(|| invalid_count(index, "enquiriesReceived"))?;
        let shipments = parse_count(row.shipments_converted.as_ref())
            .ok_or_else(|| invalid_count(index, "shipmentsConverted"))?;

        let date = parse_date_key(&date_key).unwrap_or_else(|| week.monday());
        normalized.insert(
            date_key.clone(),
            ActualOutputRow {
                date: date_key,
                iso_week: iso_week_number(date),
                visited,
                not_visited_reason: reason,
                not_visited_reason_category: reason_category,
                enquiries_received: enquiries,
                shipments_converted: shipments,
            },
        );
    }

    Ok(default_actual_rows(week)
        .into_iter()
        .map(|blank| normalized.remove(&blank.date).unwrap_or(blank))
        .collect())
}

fn check_envelope(field: &str, len: usize) -> AppResult<()> {
    if len != ROWS_PER_WEEK {
        return Err(AppError::BadRequest(format!(
            "{field} must contain exactly {ROWS_PER_WEEK} rows (received {len})."
        )));
    }
    Ok(())
}

/// Canonical date keys in input order; each must be a distinct day of the week.
fn check_dates<'a>(
    raw_dates: impl Iterator<Item = &'a str>,
    week: &WeekDescriptor,
) -> AppResult<Vec<String>> {
    let allowed = week.date_keys();
    let mut seen = BTreeSet::new();
    let mut dates = Vec::with_capacity(ROWS_PER_WEEK);
    for (index, raw) in raw_dates.enumerate() {
        let key = raw.trim();
        if !allowed.iter().any(|allowed_key| allowed_key == key) {
            return Err(AppError::BadRequest(format!(
                "Row {}: date '{key}' is not part of week {} ({} to {}).",
                index + 1,
                week.iso_week,
                week.start_date,
                week.end_date
            )));
        }
        if !seen.insert(key.to_string()) {
            return Err(AppError::BadRequest(format!(
                "Row {}: duplicate date '{key}'.",
                index + 1
            )));
        }
        dates.push(key.to_string());
    }
    Ok(dates)
}

fn index_by_date<T>(rows: &[T], date_of: impl Fn(&T) -> &str) -> BTreeMap<&str, &T> {
    rows.iter().map(|row| (date_of(row), row)).collect()
}

fn invalid_enum(index: usize, field: &str, raw: &str) -> AppError {
    AppError::BadRequest(format!(
        "Row {}: invalid {field} '{}'.",
        index + 1,
        raw.trim()
    ))
}

fn invalid_count(index: usize, field: &str) -> AppError {
    AppError::BadRequest(format!(
        "Row {}: {field} must be a non-negative integer.",
        index + 1
    ))
}

/// Absent, null and blank read as zero; anything else must be a whole,
/// non-negative number.
fn parse_count(value: Option<&Value>) -> Option<u32> {
    match value {
        None | Some(Value::Null) => Some(0),
        Some(Value::Number(number)) => {
            if let Some(count) = number.as_u64() {
                return u32::try_from(count).ok();
            }
            let float = number.as_f64()?;
            let whole = float.is_finite() && float >= 0.0 && float.fract() == 0.0;
            if whole && float <= f64::from(u32::MAX) {
                Some(float as u32)
            } else {
                None
            }
        }
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Some(0)
            } else {
                trimmed.parse::<u32>().ok()
            }
        }
        Some(_) => None,
    }
}
