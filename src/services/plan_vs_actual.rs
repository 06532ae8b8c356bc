//! Stage 1: planned call volume against actually-visited volume.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{User, Visited, WeeklyReport};

use super::directory::{label_matches, FilterOptions, SalesProfile, ScopeFilters, UserDirectory};
use super::metrics::{non_empty_opt, Accumulator, VisitTally};
use super::ranges::DateRange;
use super::week::{iso_week_label, parse_date_key};

pub const RANKING_MIN_PLANNED_VISITS: u32 = 3;
pub const RANKING_SIZE: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stage1Filters {
    #[serde(flatten)]
    pub scope: ScopeFilters,
    /// `nc`, `fc`, `sc`, `jsv` or `unknown`.
    pub call_type: Option<String>,
    /// `targeted_budgeted`, `existing` or `unknown`.
    pub customer_type: Option<String>,
}

impl Stage1Filters {
    pub fn normalized(&self) -> Self {
        Self {
            scope: self.scope.normalized(),
            call_type: non_empty_opt(self.call_type.as_deref()),
            customer_type: non_empty_opt(self.customer_type.as_deref()),
        }
    }
}

pub struct Stage1Input<'a> {
    pub users: &'a [User],
    pub reports: &'a [WeeklyReport],
    pub range: &'a DateRange,
    pub filters: &'a Stage1Filters,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitMetrics {
    pub planned_visits: u32,
    pub actual_visits: u32,
    pub variance: i64,
    pub achievement_rate: f64,
}

impl From<VisitTally> for VisitMetrics {
    fn from(tally: VisitTally) -> Self {
        Self {
            planned_visits: tally.planned_visits,
            actual_visits: tally.actual_visits,
            variance: tally.variance(),
            achievement_rate: tally.achievement_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMetrics {
    pub key: String,
    #[serde(flatten)]
    pub metrics: VisitMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalespersonMetrics {
    pub salesman_id: String,
    pub salesman_name: String,
    pub main_team: String,
    pub team: String,
    pub sub_team: String,
    #[serde(flatten)]
    pub metrics: VisitMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rankings {
    pub min_planned_visits: u32,
    pub over_achievers: Vec<SalespersonMetrics>,
    pub under_achievers: Vec<SalespersonMetrics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage1DrilldownRow {
    pub date: String,
    pub iso_week: String,
    pub salesman_id: String,
    pub salesman_name: String,
    pub team: String,
    pub customer_name: String,
    pub location_area: String,
    pub call_type: String,
    pub customer_type: String,
    pub visited: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage1Payload {
    pub range: DateRange,
    pub filters: Stage1Filters,
    pub totals: VisitMetrics,
    pub daily: Vec<BucketMetrics>,
    pub weekly: Vec<BucketMetrics>,
    pub monthly: Vec<BucketMetrics>,
    pub by_salesperson: Vec<SalespersonMetrics>,
    pub by_main_team: Vec<BucketMetrics>,
    pub by_team: Vec<BucketMetrics>,
    pub by_sub_team: Vec<BucketMetrics>,
    pub by_call_type: Vec<BucketMetrics>,
    pub by_customer_type: Vec<BucketMetrics>,
    pub rankings: Rankings,
    pub drilldown: Vec<Stage1DrilldownRow>,
    pub filter_options: FilterOptions,
}

#[derive(Default)]
struct Buckets {
    total: VisitTally,
    daily: Accumulator<String, VisitTally>,
    weekly: Accumulator<String, VisitTally>,
    monthly: Accumulator<String, VisitTally>,
    salesperson: Accumulator<String, VisitTally>,
    main_team: Accumulator<String, VisitTally>,
    team: Accumulator<String, VisitTally>,
    sub_team: Accumulator<String, VisitTally>,
    call_type: Accumulator<String, VisitTally>,
    customer_type: Accumulator<String, VisitTally>,
}

pub fn build_stage1_payload(input: Stage1Input<'_>) -> Stage1Payload {
    let directory = UserDirectory::new(input.users);
    let filters = input.filters.normalized();
    let mut buckets = Buckets::default();
    let mut profiles: BTreeMap<String, SalesProfile> = BTreeMap::new();
    let mut drilldown = Vec::new();

    for report in input.reports {
        let profile = directory.profile(&report.salesman_id);
        if !filters.scope.matches(&profile) {
            continue;
        }
        for row in &report.planning_rows {
            if !row.is_meaningful() {
                continue;
            }
            let Some(date) = parse_date_key(&row.date) else {
                continue;
            };
            if !input.range.contains(date) {
                continue;
            }
            let call_type = row.contact_type.bucket();
            let customer_type = row.customer_type.bucket();
            if !label_matches(filters.call_type.as_deref(), call_type)
                || !label_matches(filters.customer_type.as_deref(), customer_type)
            {
                continue;
            }

            let visited = report
                .actual_row_for(&row.date)
                .is_some_and(|actual| actual.visited == Visited::Yes);
            let iso_week = iso_week_label(date);
            let month = row.date.get(..7).unwrap_or_default().to_string();

            buckets.total.record(visited);
            buckets.daily.entry(row.date.clone()).record(visited);
            buckets.weekly.entry(iso_week.clone()).record(visited);
            buckets.monthly.entry(month).record(visited);
            buckets
                .salesperson
                .entry(profile.id.clone())
                .record(visited);
            buckets
                .main_team
                .entry(profile.main_team.clone())
                .record(visited);
            buckets.team.entry(profile.team.clone()).record(visited);
            buckets.sub_team.entry(profile.sub_team.clone()).record(visited);
            buckets.call_type.entry(call_type.to_string()).record(visited);
            buckets
                .customer_type
                .entry(customer_type.to_string())
                .record(visited);

            drilldown.push(Stage1DrilldownRow {
                date: row.date.clone(),
                iso_week,
                salesman_id: profile.id.clone(),
                salesman_name: profile.name.clone(),
                team: profile.team.clone(),
                customer_name: row.customer_name.clone(),
                location_area: row.location_area.clone(),
                call_type: call_type.to_string(),
                customer_type: customer_type.to_string(),
                visited,
            });
        }
        profiles
            .entry(profile.id.clone())
            .or_insert_with(|| profile.clone());
    }

    let mut by_salesperson = buckets.salesperson.finalize(|id, tally| {
        let profile = profiles
            .get(&id)
            .cloned()
            .unwrap_or_else(|| directory.profile(&id));
        SalespersonMetrics {
            salesman_id: profile.id,
            salesman_name: profile.name,
            main_team: profile.main_team,
            team: profile.team,
            sub_team: profile.sub_team,
            metrics: tally.into(),
        }
    });
    by_salesperson.sort_by(|left, right| {
        left.salesman_name
            .cmp(&right.salesman_name)
            .then_with(|| left.salesman_id.cmp(&right.salesman_id))
    });

    drilldown.sort_by(|left, right| {
        left.date
            .cmp(&right.date)
            .then_with(|| left.salesman_name.cmp(&right.salesman_name))
            .then_with(|| left.salesman_id.cmp(&right.salesman_id))
            .then_with(|| left.customer_name.cmp(&right.customer_name))
    });

    Stage1Payload {
        range: input.range.clone(),
        filters,
        totals: buckets.total.into(),
        daily: bucket_view(buckets.daily),
        weekly: bucket_view(buckets.weekly),
        monthly: bucket_view(buckets.monthly),
        rankings: rank_salespeople(&by_salesperson),
        by_salesperson,
        by_main_team: bucket_view(buckets.main_team),
        by_team: bucket_view(buckets.team),
        by_sub_team: bucket_view(buckets.sub_team),
        by_call_type: bucket_view(buckets.call_type),
        by_customer_type: bucket_view(buckets.customer_type),
        drilldown,
        filter_options: directory.filter_options(),
    }
}

fn bucket_view(buckets: Accumulator<String, VisitTally>) -> Vec<BucketMetrics> {
    buckets.finalize(|key, tally| BucketMetrics {
        key,
        metrics: tally.into(),
    })
}

/// Top over/under achievers among salespeople with enough planned visits.
/// Ties on rate go to the larger plan, then name, then id.
pub fn rank_salespeople(rows: &[SalespersonMetrics]) -> Rankings {
    let eligible = rows
        .iter()
        .filter(|row| row.metrics.planned_visits >= RANKING_MIN_PLANNED_VISITS)
        .cloned()
        .collect::<Vec<_>>();

    let tie_break = |left: &SalespersonMetrics, right: &SalespersonMetrics| -> Ordering {
        right
            .metrics
            .planned_visits
            .cmp(&left.metrics.planned_visits)
            .then_with(|| left.salesman_name.cmp(&right.salesman_name))
            .then_with(|| left.salesman_id.cmp(&right.salesman_id))
    };

    let mut over = eligible.clone();
    over.sort_by(|left, right| {
        right
            .metrics
            .achievement_rate
            .total_cmp(&left.metrics.achievement_rate)
            .then_with(|| tie_break(left, right))
    });
    over.truncate(RANKING_SIZE);

    let mut under = eligible;
    under.sort_by(|left, right| {
        left.metrics
            .achievement_rate
            .total_cmp(&right.metrics.achievement_rate)
            .then_with(|| tie_break(left, right))
    });
    under.truncate(RANKING_SIZE);

    Rankings {
        min_planned_visits: RANKING_MIN_PLANNED_VISITS,
        over_achievers: over,
        under_achievers: under,
    }
}

#[cfg(test)]
mod tests {
    use super::{build_stage1_payload, Stage1Filters, Stage1Input};
    use crate::models::{ContactType, CustomerType, Visited, WeeklyReport};
    use crate::services::directory::fixtures::{reports_for, salesman, visit};
    use crate::services::directory::ScopeFilters;
    use crate::services::ranges::{resolve_stage1_range, RangeQuery};
    use crate::services::week::parse_date_key;

    fn range() -> crate::services::ranges::DateRange {
        let query = RangeQuery {
            week: Some("2026-W06".to_string()),
            ..RangeQuery::default()
        };
        resolve_stage1_range(&query, parse_date_key("2026-03-04").expect("date")).expect("range")
    }

    fn worked_example() -> Vec<WeeklyReport> {
        let mut reports = reports_for(
            "u1",
            &[
                visit("2026-02-02", "Acme", Visited::Yes),
                visit("2026-02-03", "Birla", Visited::Yes).contact(ContactType::Fc),
                visit("2026-02-04", "Cipla", Visited::No),
                visit("2026-02-05", "Dabur", Visited::Yes).contact(ContactType::Sc),
            ],
        );
        reports.extend(reports_for(
            "u2",
            &[
                visit("2026-02-02", "Emami", Visited::Yes)
                    .customer_type(CustomerType::TargetedBudgeted),
                visit("2026-02-03", "Futura", Visited::Blank),
            ],
        ));
        reports
    }

    #[test]
    fn totals_match_the_worked_example() {
        let users = vec![salesman("u1", "Asha", "North"), salesman("u2", "Bala", "South")];
        let reports = worked_example();
        let payload = build_stage1_payload(Stage1Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &Stage1Filters::default(),
        });
        assert_eq!(payload.totals.planned_visits, 6);
        assert_eq!(payload.totals.actual_visits, 4);
        assert_eq!(payload.totals.variance, 2);
        assert_eq!(payload.totals.achievement_rate, 0.6667);
        assert_eq!(payload.drilldown.len(), 6);
        assert_eq!(payload.by_salesperson[0].salesman_name, "Asha");
        assert_eq!(payload.by_salesperson[0].metrics.achievement_rate, 0.75);
        assert_eq!(payload.weekly.len(), 1);
        assert_eq!(payload.weekly[0].key, "2026-W06");
        assert_eq!(payload.monthly[0].key, "2026-02");
    }

    #[test]
    fn blank_rows_and_out_of_range_dates_are_ignored() {
        let users = vec![salesman("u1", "Asha", "North")];
        let mut reports = reports_for(
            "u1",
            &[
                visit("2026-02-02", "Acme", Visited::Yes),
                visit("2026-02-09", "Outside", Visited::Yes),
            ],
        );
        reports[0].planning_rows[3].customer_name = "  ".to_string();
        let payload = build_stage1_payload(Stage1Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &Stage1Filters::default(),
        });
        assert_eq!(payload.totals.planned_visits, 1);
        assert_eq!(payload.daily.len(), 1);
    }

    #[test]
    fn visited_uses_the_exact_date_only() {
        let users = vec![salesman("u1", "Asha", "North")];
        let mut reports = reports_for("u1", &[visit("2026-02-02", "Acme", Visited::Blank)]);
        reports[0].actual_output_rows[1].visited = Visited::Yes;
        let payload = build_stage1_payload(Stage1Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &Stage1Filters::default(),
        });
        assert_eq!(payload.totals.actual_visits, 0);
    }

    #[test]
    fn filters_by_team_and_call_type() {
        let users = vec![salesman("u1", "Asha", "North"), salesman("u2", "Bala", "South")];
        let reports = worked_example();
        let filters = Stage1Filters {
            scope: ScopeFilters {
                team: Some("North".to_string()),
                ..ScopeFilters::default()
            },
            call_type: Some("nc".to_string()),
            customer_type: None,
        };
        let payload = build_stage1_payload(Stage1Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &filters,
        });
        assert_eq!(payload.totals.planned_visits, 2);
        assert_eq!(payload.totals.actual_visits, 1);
        assert_eq!(payload.by_call_type.len(), 1);
        assert_eq!(payload.by_call_type[0].key, "nc");
    }

    #[test]
    fn rankings_require_three_planned_visits() {
        let users = vec![salesman("u1", "Asha", "North"), salesman("u2", "Bala", "South")];
        let reports = worked_example();
        let payload = build_stage1_payload(Stage1Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &Stage1Filters::default(),
        });
        assert_eq!(payload.rankings.over_achievers.len(), 1);
        assert_eq!(payload.rankings.over_achievers[0].salesman_id, "u1");
        assert_eq!(payload.rankings.under_achievers[0].salesman_id, "u1");
    }

    #[test]
    fn ranking_ties_prefer_larger_plans() {
        let users = vec![salesman("u1", "Asha", "North"), salesman("u2", "Bala", "South")];
        let mut reports = reports_for(
            "u1",
            &[
                visit("2026-02-02", "A", Visited::Yes),
                visit("2026-02-03", "B", Visited::Yes),
                visit("2026-02-04", "C", Visited::Yes),
            ],
        );
        reports.extend(reports_for(
            "u2",
            &[
                visit("2026-02-02", "A", Visited::Yes),
                visit("2026-02-03", "B", Visited::Yes),
                visit("2026-02-04", "C", Visited::Yes),
                visit("2026-02-05", "D", Visited::Yes),
            ],
        ));
        let payload = build_stage1_payload(Stage1Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &Stage1Filters::default(),
        });
        let over = payload
            .rankings
            .over_achievers
            .iter()
            .map(|row| row.salesman_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(over, vec!["u2", "u1"]);
    }

    #[test]
    fn output_is_deterministic() {
        let users = vec![salesman("u1", "Asha", "North"), salesman("u2", "Bala", "South")];
        let reports = worked_example();
        let mut reversed = reports.clone();
        reversed.reverse();
        let render = |reports: &[WeeklyReport]| {
            serde_json::to_string(&build_stage1_payload(Stage1Input {
                users: &users,
                reports,
                range: &range(),
                filters: &Stage1Filters::default(),
            }))
            .expect("payload serializes")
        };
        assert_eq!(render(&reports), render(&reversed));
    }

    #[test]
    fn rankings_keep_five_and_skip_plans_below_three() {
        let dates = ["2026-02-02", "2026-02-03", "2026-02-04"];
        let plans = [
            ("s1", 3),
            ("s2", 3),
            ("s3", 2),
            ("s4", 2),
            ("s5", 1),
            ("s6", 1),
            ("s7", 0),
        ];
        let mut users = Vec::new();
        let mut reports = Vec::new();
        for (id, visited) in plans {
            users.push(salesman(id, &format!("Rep {id}"), "North"));
            let visits = dates
                .into_iter()
                .enumerate()
                .map(|(index, date)| {
                    let outcome = if index < visited {
                        Visited::Yes
                    } else {
                        Visited::No
                    };
                    visit(date, "Acme", outcome)
                })
                .collect::<Vec<_>>();
            reports.extend(reports_for(id, &visits));
        }
        users.push(salesman("s8", "Rep s8", "North"));
        reports.extend(reports_for(
            "s8",
            &[
                visit("2026-02-02", "Acme", Visited::Yes),
                visit("2026-02-03", "Acme", Visited::Yes),
            ],
        ));

        let payload = build_stage1_payload(Stage1Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &Stage1Filters::default(),
        });

        let ids = |rows: &[super::SalespersonMetrics]| {
            rows.iter()
                .map(|row| row.salesman_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(payload.rankings.min_planned_visits, 3);
        assert_eq!(
            ids(&payload.rankings.over_achievers),
            vec!["s1", "s2", "s3", "s4", "s5"]
        );
        assert_eq!(
            ids(&payload.rankings.under_achievers),
            vec!["s7", "s5", "s6", "s3", "s4"]
        );
        assert!(payload
            .by_salesperson
            .iter()
            .any(|row| row.salesman_id == "s8" && row.metrics.planned_visits == 2));
    }
}
