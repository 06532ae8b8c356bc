//! Stage 2: weekly call volume per salesperson and JSV-target compliance per
//! admin.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{ContactType, User, Visited, WeeklyReport};

use super::directory::{FilterOptions, SalesProfile, ScopeFilters, UserDirectory};
use super::metrics::non_empty_opt;
use super::ranges::DateRange;
use super::week::parse_date_key;

/// Compliance needs more than 5 JSVs in the week, i.e. at least 6.
pub const DEFAULT_JSV_WEEKLY_TARGET: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage2Config {
    pub jsv_target: u32,
}

impl Default for Stage2Config {
    fn default() -> Self {
        Self {
            jsv_target: DEFAULT_JSV_WEEKLY_TARGET,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stage2Filters {
    #[serde(flatten)]
    pub scope: ScopeFilters,
    pub admin_id: Option<String>,
}

impl Stage2Filters {
    pub fn normalized(&self) -> Self {
        Self {
            scope: self.scope.normalized(),
            admin_id: non_empty_opt(self.admin_id.as_deref()),
        }
    }
}

pub struct Stage2Input<'a> {
    pub users: &'a [User],
    pub reports: &'a [WeeklyReport],
    pub range: &'a DateRange,
    pub filters: &'a Stage2Filters,
    pub config: Stage2Config,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCounts {
    pub total_calls: u32,
    pub nc_count: u32,
    pub fc_count: u32,
    pub sc_count: u32,
    pub jsv_count: u32,
}

impl CallCounts {
    fn record(&mut self, contact_type: ContactType) {
        self.total_calls += 1;
        match contact_type {
            ContactType::Nc => self.nc_count += 1,
            ContactType::Fc => self.fc_count += 1,
            ContactType::Sc => self.sc_count += 1,
            ContactType::Jsv => self.jsv_count += 1,
            ContactType::Blank => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalespersonActivity {
    pub salesman_id: String,
    pub salesman_name: String,
    pub main_team: String,
    pub team: String,
    pub sub_team: String,
    #[serde(flatten)]
    pub counts: CallCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsvContributor {
    pub salesman_id: String,
    pub salesman_name: String,
    pub jsv_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceAlert {
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminComplianceCard {
    pub admin_id: String,
    pub admin_name: String,
    pub email: String,
    pub jsv_count: u32,
    pub target: u32,
    pub shortfall: u32,
    pub compliant: bool,
    pub contributors: Vec<JsvContributor>,
    pub alerts: Vec<ComplianceAlert>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage2Summary {
    pub admins_total: u32,
    pub compliant_admins: u32,
    pub non_compliant_admins: u32,
    pub total_calls: u32,
    pub total_jsv_visits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage2Payload {
    pub range: DateRange,
    pub filters: Stage2Filters,
    pub jsv_target: u32,
    pub summary: Stage2Summary,
    pub admin_cards: Vec<AdminComplianceCard>,
    pub salespeople: Vec<SalespersonActivity>,
    pub filter_options: FilterOptions,
}

pub fn build_stage2_payload(input: Stage2Input<'_>) -> Stage2Payload {
    let directory = UserDirectory::new(input.users);
    let filters = input.filters.normalized();
    let target = input.config.jsv_target;

    let mut activity: BTreeMap<String, (SalesProfile, CallCounts)> = BTreeMap::new();
    for user in directory.salespeople() {
        let profile = directory.profile(&user.id);
        if filters.scope.matches(&profile) {
            activity.insert(profile.id.clone(), (profile, CallCounts::default()));
        }
    }

    // admin id -> salesman id -> JSV visits together
    let mut contributions: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();

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
            let visited = report
                .actual_row_for(&row.date)
                .is_some_and(|actual| actual.visited == Visited::Yes);
            if !visited {
                continue;
            }

            // Only directory salespeople get an activity row.
            if let Some((_, counts)) = activity.get_mut(&profile.id) {
                counts.record(row.contact_type);
            }

            let admin_id = row.jsv_with_whom.trim();
            if row.contact_type == ContactType::Jsv && !admin_id.is_empty() {
                *contributions
                    .entry(admin_id.to_string())
                    .or_default()
                    .entry(profile.id.clone())
                    .or_default() += 1;
            }
        }
    }

    let mut summary = Stage2Summary::default();
    let mut admin_cards = Vec::new();
    for admin in directory.admins() {
        if filters
            .admin_id
            .as_deref()
            .is_some_and(|wanted| wanted != admin.id)
        {
            continue;
        }
        let mut contributors = contributions
            .get(&admin.id)
            .map(|by_salesman| {
                by_salesman
                    .iter()
                    .map(|(salesman_id, count)| JsvContributor {
                        salesman_id: salesman_id.clone(),
                        salesman_name: directory.display_name(salesman_id),
                        jsv_count: *count,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        contributors.sort_by(|left, right| {
            right
                .jsv_count
                .cmp(&left.jsv_count)
                .then_with(|| left.salesman_name.cmp(&right.salesman_name))
                .then_with(|| left.salesman_id.cmp(&right.salesman_id))
        });
        let jsv_count = contributors.iter().map(|item| item.jsv_count).sum::<u32>();
        let card = compliance_card(admin, jsv_count, target, contributors);

        summary.admins_total += 1;
        if card.compliant {
            summary.compliant_admins += 1;
        } else {
            summary.non_compliant_admins += 1;
        }
        admin_cards.push(card);
    }

    let mut salespeople = activity
        .into_values()
        .map(|(profile, counts)| SalespersonActivity {
            salesman_id: profile.id,
            salesman_name: profile.name,
            main_team: profile.main_team,
            team: profile.team,
            sub_team: profile.sub_team,
            counts,
        })
        .collect::<Vec<_>>();
    salespeople.sort_by(|left, right| {
        right
            .counts
            .total_calls
            .cmp(&left.counts.total_calls)
            .then_with(|| left.salesman_name.cmp(&right.salesman_name))
            .then_with(|| left.salesman_id.cmp(&right.salesman_id))
    });
    for person in &salespeople {
        summary.total_calls += person.counts.total_calls;
        summary.total_jsv_visits += person.counts.jsv_count;
    }

    Stage2Payload {
        range: input.range.clone(),
        filters,
        jsv_target: target,
        summary,
        admin_cards,
        salespeople,
        filter_options: directory.filter_options(),
    }
}

fn compliance_card(
    admin: &User,
    jsv_count: u32,
    target: u32,
    contributors: Vec<JsvContributor>,
) -> AdminComplianceCard {
    let compliant = jsv_count >= target;
    let shortfall = target.saturating_sub(jsv_count);
    let alerts = if compliant {
        Vec::new()
    } else {
        vec![ComplianceAlert {
            severity: "critical".to_string(),
            message: format!(
                "{} has {jsv_count} JSV visit(s) this week; the target is more than {} (at least {target}). Short by {shortfall}.",
                admin.display_name(),
                target.saturating_sub(1)
            ),
        }]
    };
    AdminComplianceCard {
        admin_id: admin.id.clone(),
        admin_name: admin.display_name().to_string(),
        email: admin.email.clone(),
        jsv_count,
        target,
        shortfall,
        compliant,
        contributors,
        alerts,
    }
}

#[cfg(test)]
mod tests {
    use super::{build_stage2_payload, Stage2Config, Stage2Filters, Stage2Input};
    use crate::models::{ContactType, Visited, WeeklyReport};
    use crate::services::directory::fixtures::{admin, reports_for, salesman, visit};
    use crate::services::ranges::{resolve_stage2_range, DateRange, RangeQuery};
    use crate::services::week::parse_date_key;

    fn range() -> DateRange {
        let query = RangeQuery {
            week: Some("2026-W06".to_string()),
            ..RangeQuery::default()
        };
        resolve_stage2_range(&query, parse_date_key("2026-03-04").expect("date")).expect("range")
    }

    fn jsv_week(salesman_id: &str, admin_id: &'static str, visited: usize) -> Vec<WeeklyReport> {
        let dates = [
            "2026-02-02",
            "2026-02-03",
            "2026-02-04",
            "2026-02-05",
            "2026-02-06",
            "2026-02-07",
            "2026-02-08",
        ];
        let visits = dates
            .iter()
            .enumerate()
            .map(|(index, date)| {
                let outcome = if index < visited {
                    Visited::Yes
                } else {
                    Visited::No
                };
                visit(date, "Acme", outcome).jsv_with(admin_id)
            })
            .collect::<Vec<_>>();
        reports_for(salesman_id, &visits)
    }

    #[test]
    fn six_jsv_visits_are_compliant_and_five_are_not() {
        let users = vec![
            salesman("u1", "Asha", "North"),
            salesman("u2", "Bala", "North"),
            admin("a1", "Meera"),
            admin("a2", "Nikhil"),
        ];
        let mut reports = jsv_week("u1", "a1", 4);
        reports.extend(jsv_week("u2", "a1", 2));
        reports.extend(jsv_week("u2", "a2", 0));
        let mut a2_reports = jsv_week("u1", "a2", 5);
        a2_reports[0].salesman_id = "u3".to_string();
        reports.extend(a2_reports);

        let payload = build_stage2_payload(Stage2Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &Stage2Filters::default(),
            config: Stage2Config::default(),
        });

        let meera = &payload.admin_cards[0];
        assert_eq!(meera.admin_id, "a1");
        assert_eq!(meera.jsv_count, 6);
        assert!(meera.compliant);
        assert_eq!(meera.shortfall, 0);
        assert!(meera.alerts.is_empty());
        assert_eq!(meera.contributors[0].salesman_id, "u1");
        assert_eq!(meera.contributors[0].jsv_count, 4);

        let nikhil = &payload.admin_cards[1];
        assert_eq!(nikhil.jsv_count, 5);
        assert!(!nikhil.compliant);
        assert_eq!(nikhil.shortfall, 1);
        assert_eq!(nikhil.alerts.len(), 1);
        assert_eq!(nikhil.alerts[0].severity, "critical");
        assert!(nikhil.alerts[0].message.contains('5'));
        assert_eq!(payload.summary.non_compliant_admins, 1);
    }

    #[test]
    fn counts_visited_calls_per_contact_type() {
        let users = vec![salesman("u1", "Asha", "North"), salesman("u2", "Bala", "South")];
        let reports = reports_for(
            "u1",
            &[
                visit("2026-02-02", "Acme", Visited::Yes),
                visit("2026-02-03", "Birla", Visited::Yes).contact(ContactType::Fc),
                visit("2026-02-04", "Cipla", Visited::Yes).contact(ContactType::Sc),
                visit("2026-02-05", "Dabur", Visited::No),
            ],
        );
        let payload = build_stage2_payload(Stage2Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &Stage2Filters::default(),
            config: Stage2Config::default(),
        });
        assert_eq!(payload.salespeople.len(), 2);
        let asha = &payload.salespeople[0];
        assert_eq!(asha.salesman_id, "u1");
        assert_eq!(asha.counts.total_calls, 3);
        assert_eq!(asha.counts.nc_count, 1);
        assert_eq!(asha.counts.fc_count, 1);
        assert_eq!(asha.counts.sc_count, 1);
        assert_eq!(payload.salespeople[1].counts.total_calls, 0);
    }

    #[test]
    fn target_is_configurable() {
        let users = vec![salesman("u1", "Asha", "North"), admin("a1", "Meera")];
        let reports = jsv_week("u1", "a1", 3);
        let payload = build_stage2_payload(Stage2Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &Stage2Filters::default(),
            config: Stage2Config { jsv_target: 3 },
        });
        assert!(payload.admin_cards[0].compliant);
    }

    #[test]
    fn contributors_tie_break_on_name_then_id() {
        let users = vec![
            salesman("u1", "Bala", "North"),
            salesman("u2", "Asha", "North"),
            salesman("u3", "Asha", "South"),
            salesman("u4", "Chitra", "South"),
            admin("a1", "Meera"),
        ];
        let mut reports = jsv_week("u1", "a1", 2);
        reports.extend(jsv_week("u2", "a1", 2));
        reports.extend(jsv_week("u3", "a1", 2));
        reports.extend(jsv_week("u4", "a1", 3));

        let payload = build_stage2_payload(Stage2Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &Stage2Filters::default(),
            config: Stage2Config::default(),
        });

        let order = payload.admin_cards[0]
            .contributors
            .iter()
            .map(|contributor| contributor.salesman_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["u4", "u2", "u3", "u1"]);
        assert_eq!(payload.admin_cards[0].jsv_count, 9);
    }

    #[test]
    fn salespeople_list_ignores_admin_and_unknown_owners() {
        let users = vec![salesman("u1", "Asha", "North"), admin("a1", "Meera")];
        let mut reports = reports_for("u1", &[visit("2026-02-02", "Acme", Visited::Yes)]);
        reports.extend(reports_for("a1", &[visit("2026-02-03", "Birla", Visited::Yes)]));
        reports.extend(reports_for("ghost", &[visit("2026-02-04", "Cipla", Visited::Yes)]));

        let payload = build_stage2_payload(Stage2Input {
            users: &users,
            reports: &reports,
            range: &range(),
            filters: &Stage2Filters::default(),
            config: Stage2Config::default(),
        });

        let ids = payload
            .salespeople
            .iter()
            .map(|person| person.salesman_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["u1"]);
        assert_eq!(payload.summary.total_calls, 1);
    }
}
