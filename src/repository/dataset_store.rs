//! In-memory dataset of users, weekly reports and exception cases, loaded
//! from (and optionally written back to) a JSON snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::{ExceptionCase, ExceptionStatus, User, WeeklyReport};
use crate::services::directory::UserDirectory;
use crate::services::exceptions::{
    apply_status_transition, open_case, refresh_case, rule_from_case_key, ExceptionCandidate,
};
use crate::services::week::{format_utc_date_key, WeekDescriptor};
use crate::services::weekly_rows::{
    empty_weekly_report, normalize_actual_output_rows, normalize_planning_rows,
    ActualOutputRowInput, ActualRowOptions, PlanningRowInput, PlanningRowOptions,
};

/// On-disk snapshot layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dataset {
    pub users: Vec<User>,
    pub weekly_reports: Vec<WeeklyReport>,
    pub exception_cases: Vec<ExceptionCase>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetCounts {
    pub users: usize,
    pub weekly_reports: usize,
    pub exception_cases: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Default)]
struct StoreInner {
    users: Vec<User>,
    reports: BTreeMap<(String, String), WeeklyReport>,
    cases: BTreeMap<String, ExceptionCase>,
}

impl StoreInner {
    fn from_dataset(dataset: Dataset) -> Self {
        let reports = dataset
            .weekly_reports
            .into_iter()
            .filter(|report| !report.salesman_id.trim().is_empty())
            .map(|mut report| {
                // Older snapshots may only carry the UTC week boundary.
                if report.week_key.trim().is_empty() {
                    if let Some(start) = report.week_start_date_utc {
                        report.week_key = format_utc_date_key(start);
                    }
                }
                report
            })
            .filter(|report| !report.week_key.trim().is_empty())
            .map(|report| ((report.salesman_id.clone(), report.week_key.clone()), report))
            .collect();
        let cases = dataset
            .exception_cases
            .into_iter()
            .filter(|case| !case.case_key.trim().is_empty())
            // An unknown stored ruleId decodes as EX-01; the key carries the real rule.
            .filter_map(|mut case| match rule_from_case_key(&case.case_key) {
                Some(rule) => {
                    if case.rule_id != rule {
                        case.rule_id = rule;
                        case.rule_label = rule.label().to_string();
                    }
                    Some(case)
                }
                None => {
                    tracing::warn!(
                        case_key = %case.case_key,
                        "Skipping exception case with an unknown rule"
                    );
                    None
                }
            })
            .map(|case| (case.case_key.clone(), case))
            .collect();
        Self {
            users: dataset.users,
            reports,
            cases,
        }
    }

    fn to_dataset(&self) -> Dataset {
        Dataset {
            users: self.users.clone(),
            weekly_reports: self.reports.values().cloned().collect(),
            exception_cases: self.cases.values().cloned().collect(),
        }
    }

    fn report_or_empty(&self, salesman_id: &str, week: &WeekDescriptor) -> WeeklyReport {
        self.reports
            .get(&(salesman_id.to_string(), week.key.clone()))
            .cloned()
            .unwrap_or_else(|| empty_weekly_report(salesman_id, week))
    }

    fn store_report(&mut self, mut report: WeeklyReport, now: DateTime<Utc>) -> WeeklyReport {
        report.updated_at = Some(now);
        if report.submitted_at.is_none() {
            report.submitted_at = Some(now);
        }
        report.current_status = "submitted".to_string();
        self.reports.insert(
            (report.salesman_id.clone(), report.week_key.clone()),
            report.clone(),
        );
        report
    }
}

pub struct DataStore {
    inner: RwLock<StoreInner>,
    snapshot_path: Option<PathBuf>,
    autosave: bool,
}

impl DataStore {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            inner: RwLock::new(StoreInner::from_dataset(dataset)),
            snapshot_path: None,
            autosave: false,
        }
    }

    /// A missing snapshot starts an empty store; a malformed one is an error.
    pub async fn load(path: Option<&Path>, autosave: bool) -> AppResult<Self> {
        let dataset = match path {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(raw) => serde_json::from_str::<Dataset>(&raw).map_err(|error| {
                    AppError::Internal(format!(
                        "Could not parse dataset snapshot {}: {error}",
                        path.display()
                    ))
                })?,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(path = %path.display(), "Dataset snapshot not found, starting empty");
                    Dataset::default()
                }
                Err(error) => {
                    return Err(AppError::Internal(format!(
                        "Could not read dataset snapshot {}: {error}",
                        path.display()
                    )))
                }
            },
            None => Dataset::default(),
        };

        let store = Self {
            inner: RwLock::new(StoreInner::from_dataset(dataset)),
            snapshot_path: path.map(Path::to_path_buf),
            autosave,
        };
        let counts = store.counts().await;
        tracing::info!(
            users = counts.users,
            weekly_reports = counts.weekly_reports,
            exception_cases = counts.exception_cases,
            autosave,
            "Dataset loaded"
        );
        Ok(store)
    }

    pub async fn counts(&self) -> DatasetCounts {
        let inner = self.inner.read().await;
        DatasetCounts {
            users: inner.users.len(),
            weekly_reports: inner.reports.len(),
            exception_cases: inner.cases.len(),
        }
    }

    pub async fn users(&self) -> Vec<User> {
        self.inner.read().await.users.clone()
    }

    pub async fn reports(&self) -> Vec<WeeklyReport> {
        self.inner.read().await.reports.values().cloned().collect()
    }

    pub async fn reports_for_salesman(&self, salesman_id: &str) -> Vec<WeeklyReport> {
        self.inner
            .read()
            .await
            .reports
            .values()
            .filter(|report| report.salesman_id == salesman_id)
            .cloned()
            .collect()
    }

    pub async fn cases(&self) -> Vec<ExceptionCase> {
        self.inner.read().await.cases.values().cloned().collect()
    }

    /// Stored report for the week, or the all-blank default when none exists.
    pub async fn report_or_empty(&self, salesman_id: &str, week: &WeekDescriptor) -> WeeklyReport {
        self.inner.read().await.report_or_empty(salesman_id, week)
    }

    pub async fn save_planning_rows(
        &self,
        salesman_id: &str,
        week: &WeekDescriptor,
        rows: &[PlanningRowInput],
        allow_legacy_unchanged: bool,
        now: DateTime<Utc>,
    ) -> AppResult<WeeklyReport> {
        let saved = self
            .commit(|inner| {
                let mut report = inner.report_or_empty(salesman_id, week);
                let admin_ids = UserDirectory::new(&inner.users).admin_ids();
                report.planning_rows = normalize_planning_rows(
                    rows,
                    week,
                    &PlanningRowOptions {
                        admin_ids: &admin_ids,
                        existing_rows: &report.planning_rows,
                        allow_legacy_unchanged,
                    },
                )?;
                Ok(inner.store_report(report, now))
            })
            .await?;
        tracing::info!(salesman_id, week_key = %week.key, "Planning rows saved");
        Ok(saved)
    }

    pub async fn save_actual_output_rows(
        &self,
        salesman_id: &str,
        week: &WeekDescriptor,
        rows: &[ActualOutputRowInput],
        allow_legacy_unchanged: bool,
        now: DateTime<Utc>,
    ) -> AppResult<WeeklyReport> {
        let saved = self
            .commit(|inner| {
                let mut report = inner.report_or_empty(salesman_id, week);
                report.actual_output_rows = normalize_actual_output_rows(
                    rows,
                    week,
                    &ActualRowOptions {
                        existing_rows: &report.actual_output_rows,
                        allow_legacy_unchanged,
                    },
                )?;
                Ok(inner.store_report(report, now))
            })
            .await?;
        tracing::info!(salesman_id, week_key = %week.key, "Actual output rows saved");
        Ok(saved)
    }

    /// Inserts new case keys as open cases and refreshes the evidence of
    /// existing ones.
    pub async fn upsert_candidates(
        &self,
        candidates: Vec<ExceptionCandidate>,
        now: DateTime<Utc>,
    ) -> AppResult<SyncOutcome> {
        let outcome = self
            .commit(|inner| {
                let mut outcome = SyncOutcome::default();
                for candidate in candidates {
                    match inner.cases.get_mut(&candidate.case_key) {
                        Some(case) => {
                            refresh_case(case, candidate, now);
                            outcome.updated += 1;
                        }
                        None => {
                            let case = open_case(candidate, now);
                            inner.cases.insert(case.case_key.clone(), case);
                            outcome.inserted += 1;
                        }
                    }
                }
                Ok(outcome)
            })
            .await?;
        tracing::info!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            "Exception candidates synced"
        );
        Ok(outcome)
    }

    pub async fn transition_case(
        &self,
        case_key: &str,
        next: ExceptionStatus,
        changed_by: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<ExceptionCase> {
        let (updated, change) = self
            .commit(|inner| {
                let case = inner.cases.get_mut(case_key).ok_or_else(|| {
                    AppError::NotFound(format!("Exception case '{case_key}' not found."))
                })?;
                let change = apply_status_transition(case, next, changed_by, note, now)
                    .map_err(|error| {
                        tracing::warn!(case_key, error = %error, "Rejected status transition");
                        error
                    })?;
                Ok((case.clone(), change))
            })
            .await?;
        tracing::info!(
            case_key,
            from = change.from.as_str(),
            to = change.to.as_str(),
            changed_by,
            "Exception status changed"
        );
        Ok(updated)
    }

    fn snapshot_target(&self) -> Option<&Path> {
        if self.autosave {
            self.snapshot_path.as_deref()
        } else {
            None
        }
    }

    /// Runs `mutate` under the write lock. With autosave on, the mutation is
    /// staged on a copy and only replaces the live state once the snapshot
    /// has been written.
    async fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut StoreInner) -> AppResult<T>,
    ) -> AppResult<T> {
        let mut inner = self.inner.write().await;
        let Some(path) = self.snapshot_target() else {
            return mutate(&mut *inner);
        };
        let mut staged = inner.clone();
        let result = mutate(&mut staged)?;
        write_snapshot(path, &staged.to_dataset()).await?;
        *inner = staged;
        Ok(result)
    }
}

/// Writes next to the snapshot and renames over it, so a crash mid-write
/// leaves the previous snapshot intact.
async fn write_snapshot(path: &Path, dataset: &Dataset) -> AppResult<()> {
    let raw = serde_json::to_vec_pretty(dataset)
        .map_err(|error| AppError::Internal(format!("Could not encode dataset: {error}")))?;
    let temp_path = temp_snapshot_path(path);
    let written = match tokio::fs::write(&temp_path, raw).await {
        Ok(()) => tokio::fs::rename(&temp_path, path).await,
        Err(error) => Err(error),
    };
    if let Err(error) = written {
        tracing::error!(path = %path.display(), error = %error, "Dataset snapshot write failed");
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(AppError::Internal(
            "Could not write dataset snapshot.".to_string(),
        ));
    }
    Ok(())
}

fn temp_snapshot_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tokio::sync::RwLock;
    use uuid::Uuid;

    use super::{temp_snapshot_path, DataStore, Dataset, StoreInner};
    use crate::error::AppError;
    use crate::models::{ContactType, ExceptionRule, ExceptionStatus, Visited};
    use crate::services::directory::fixtures::{admin, reports_for, salesman, visit};
    use crate::services::exceptions::{build_stage5_candidates, Stage5CandidateInput};
    use crate::services::ranges::{resolve_stage5_range, RangeQuery};
    use crate::services::week::{get_week_from_key, parse_date_key};
    use crate::services::weekly_rows::PlanningRowInput;

    fn planning_input(week_key: &str) -> Vec<PlanningRowInput> {
        let week = get_week_from_key(week_key).expect("week");
        week.date_keys()
            .into_iter()
            .map(|date| PlanningRowInput {
                date,
                ..PlanningRowInput::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn saving_planning_rows_materialises_and_stamps_the_report() {
        let store = DataStore::new(Dataset {
            users: vec![salesman("u1", "Asha", "North"), admin("a1", "Meera")],
            ..Dataset::default()
        });
        let week = get_week_from_key("2026-02-02").expect("week");
        let now = Utc.with_ymd_and_hms(2026, 2, 2, 6, 0, 0).unwrap();

        let blank = store.report_or_empty("u1", &week).await;
        assert_eq!(blank.current_status, "draft");
        assert_eq!(store.counts().await.weekly_reports, 0);

        let mut rows = planning_input("2026-02-02");
        rows[0].customer_name = "Acme".to_string();
        rows[0].contact_type = "jsv".to_string();
        rows[0].jsv_with_whom = "a1".to_string();
        let saved = store
            .save_planning_rows("u1", &week, &rows, true, now)
            .await
            .expect("save");
        assert_eq!(saved.current_status, "submitted");
        assert_eq!(saved.submitted_at, Some(now));
        assert_eq!(saved.planning_rows[0].contact_type, ContactType::Jsv);
        assert_eq!(store.counts().await.weekly_reports, 1);

        rows[0].jsv_with_whom = "u1".to_string();
        let rejected = store.save_planning_rows("u1", &week, &rows, true, now).await;
        assert!(matches!(rejected, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn sync_is_idempotent_and_transitions_are_validated() {
        let users = vec![salesman("u1", "Asha", "North"), admin("a1", "Meera")];
        let reports = reports_for("u1", &[visit("2026-02-02", "Acme", Visited::Yes)]);
        let store = DataStore::new(Dataset {
            users: users.clone(),
            weekly_reports: reports.clone(),
            ..Dataset::default()
        });
        let range = resolve_stage5_range(
            &RangeQuery {
                week: Some("2026-W06".to_string()),
                ..RangeQuery::default()
            },
            parse_date_key("2026-03-04").expect("date"),
        )
        .expect("range");
        let now = Utc.with_ymd_and_hms(2026, 2, 9, 6, 0, 0).unwrap();
        let candidates = || {
            build_stage5_candidates(Stage5CandidateInput {
                users: &users,
                reports: &reports,
                range: &range,
            })
            .candidates
        };

        let first = store.upsert_candidates(candidates(), now).await.expect("sync");
        assert_eq!((first.inserted, first.updated), (1, 0));
        let second = store.upsert_candidates(candidates(), now).await.expect("sync");
        assert_eq!((second.inserted, second.updated), (0, 1));
        assert_eq!(store.counts().await.exception_cases, 1);

        let case = store
            .transition_case("EX-01|u1|acme", ExceptionStatus::Ignored, "a1", None, now)
            .await
            .expect("open -> ignored");
        assert_eq!(case.status, ExceptionStatus::Ignored);
        let rejected = store
            .transition_case("EX-01|u1|acme", ExceptionStatus::Resolved, "a1", None, now)
            .await;
        assert!(matches!(rejected, Err(AppError::Conflict(_))));
        let missing = store
            .transition_case("EX-09|u1|acme", ExceptionStatus::Open, "a1", None, now)
            .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        store.upsert_candidates(candidates(), now).await.expect("sync");
        assert_eq!(store.cases().await[0].status, ExceptionStatus::Ignored);
    }

    fn autosaving_store(dataset: Dataset, path: PathBuf) -> DataStore {
        DataStore {
            inner: RwLock::new(StoreInner::from_dataset(dataset)),
            snapshot_path: Some(path),
            autosave: true,
        }
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_state_untouched() {
        let path = std::env::temp_dir()
            .join(format!("field-activity-missing-{}", Uuid::new_v4()))
            .join("dataset.json");
        let users = vec![salesman("u1", "Asha", "North"), admin("a1", "Meera")];
        let reports = reports_for("u1", &[visit("2026-02-02", "Acme", Visited::Yes)]);
        let store = autosaving_store(
            Dataset {
                users: users.clone(),
                weekly_reports: reports.clone(),
                ..Dataset::default()
            },
            path,
        );
        let week = get_week_from_key("2026-02-09").expect("week");
        let now = Utc.with_ymd_and_hms(2026, 2, 9, 6, 0, 0).unwrap();

        let saved = store
            .save_planning_rows("u1", &week, &planning_input("2026-02-09"), true, now)
            .await;
        assert!(matches!(saved, Err(AppError::Internal(_))));
        assert_eq!(store.counts().await.weekly_reports, 1);

        let range = resolve_stage5_range(
            &RangeQuery {
                week: Some("2026-W06".to_string()),
                ..RangeQuery::default()
            },
            parse_date_key("2026-03-04").expect("date"),
        )
        .expect("range");
        let candidates = build_stage5_candidates(Stage5CandidateInput {
            users: &users,
            reports: &reports,
            range: &range,
        })
        .candidates;
        let synced = store.upsert_candidates(candidates, now).await;
        assert!(matches!(synced, Err(AppError::Internal(_))));
        assert_eq!(store.counts().await.exception_cases, 0);
    }

    #[tokio::test]
    async fn snapshot_is_replaced_and_reloads() {
        let dir = std::env::temp_dir().join(format!("field-activity-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.expect("temp dir");
        let path = dir.join("dataset.json");
        let store = autosaving_store(
            Dataset {
                users: vec![salesman("u1", "Asha", "North")],
                ..Dataset::default()
            },
            path.clone(),
        );
        let week = get_week_from_key("2026-02-02").expect("week");
        let now = Utc.with_ymd_and_hms(2026, 2, 2, 6, 0, 0).unwrap();
        store
            .save_planning_rows("u1", &week, &planning_input("2026-02-02"), true, now)
            .await
            .expect("save");

        assert!(!tokio::fs::try_exists(temp_snapshot_path(&path))
            .await
            .expect("stat"));
        let reloaded = DataStore::load(Some(&path), false).await.expect("reload");
        assert_eq!(reloaded.counts().await.weekly_reports, 1);
        assert_eq!(reloaded.counts().await.users, 1);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn cases_take_their_rule_from_the_case_key() {
        let dataset: Dataset = serde_json::from_value(json!({
            "exceptionCases": [
                { "caseKey": "EX-03|u1|acme", "ruleId": "EX-7", "status": "open" },
                { "caseKey": "EX-09|u1|birla", "ruleId": "EX-09", "status": "open" },
                { "caseKey": "EX-02|u1|cipla", "ruleId": "EX-02", "status": "in_review" }
            ]
        }))
        .expect("dataset");
        let store = DataStore::new(dataset);

        let cases = store.cases().await;
        let rules = cases
            .iter()
            .map(|case| (case.case_key.as_str(), case.rule_id))
            .collect::<Vec<_>>();
        assert_eq!(
            rules,
            vec![
                ("EX-02|u1|cipla", ExceptionRule::RepeatVisitNoEnquiry),
                ("EX-03|u1|acme", ExceptionRule::RepeatVisitNoJsv),
            ]
        );
        assert_eq!(cases[1].rule_label, "Repeat Visit No JSV");
    }
}
