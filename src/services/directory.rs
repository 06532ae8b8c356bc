//! User lookups and the salesperson/team scope filters shared by every stage.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{team_label, User};

use super::metrics::non_empty_opt;

/// Denormalised identity of the salesperson owning a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesProfile {
    pub id: String,
    pub name: String,
    pub main_team: String,
    pub team: String,
    pub sub_team: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonOption {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub salespeople: Vec<PersonOption>,
    pub admins: Vec<PersonOption>,
    pub main_teams: Vec<String>,
    pub teams: Vec<String>,
    pub sub_teams: Vec<String>,
}

pub struct UserDirectory<'a> {
    by_id: BTreeMap<&'a str, &'a User>,
}

impl<'a> UserDirectory<'a> {
    pub fn new(users: &'a [User]) -> Self {
        let by_id = users
            .iter()
            .filter(|user| !user.id.trim().is_empty())
            .map(|user| (user.id.as_str(), user))
            .collect();
        Self { by_id }
    }

    pub fn get(&self, id: &str) -> Option<&'a User> {
        self.by_id.get(id).copied()
    }

    pub fn is_admin(&self, id: &str) -> bool {
        self.get(id).is_some_and(User::is_admin)
    }

    pub fn admin_ids(&self) -> BTreeSet<String> {
        self.by_id
            .values()
            .filter(|user| user.is_admin())
            .map(|user| user.id.clone())
            .collect()
    }

    pub fn admins(&self) -> Vec<&'a User> {
        let mut admins = self
            .by_id
            .values()
            .copied()
            .filter(|user| user.is_admin())
            .collect::<Vec<_>>();
        admins.sort_by(|left, right| {
            left.display_name()
                .cmp(right.display_name())
                .then_with(|| left.id.cmp(&right.id))
        });
        admins
    }

    pub fn salespeople(&self) -> Vec<&'a User> {
        let mut people = self
            .by_id
            .values()
            .copied()
            .filter(|user| !user.is_admin())
            .collect::<Vec<_>>();
        people.sort_by(|left, right| {
            left.display_name()
                .cmp(right.display_name())
                .then_with(|| left.id.cmp(&right.id))
        });
        people
    }

    /// Profile for a report owner; unknown ids keep their raw id as name
    /// and land in the `Unassigned` teams.
    pub fn profile(&self, id: &str) -> SalesProfile {
        match self.get(id) {
            Some(user) => SalesProfile {
                id: user.id.clone(),
                name: user.display_name().to_string(),
                main_team: team_label(&user.main_team),
                team: team_label(&user.team),
                sub_team: team_label(&user.sub_team),
            },
            None => SalesProfile {
                id: id.to_string(),
                name: id.to_string(),
                main_team: team_label(""),
                team: team_label(""),
                sub_team: team_label(""),
            },
        }
    }

    pub fn display_name(&self, id: &str) -> String {
        self.get(id)
            .map(|user| user.display_name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn filter_options(&self) -> FilterOptions {
        let salespeople = self.salespeople();
        let mut main_teams = BTreeSet::new();
        let mut teams = BTreeSet::new();
        let mut sub_teams = BTreeSet::new();
        for user in &salespeople {
            main_teams.insert(team_label(&user.main_team));
            teams.insert(team_label(&user.team));
            sub_teams.insert(team_label(&user.sub_team));
        }
        FilterOptions {
            salespeople: salespeople.iter().map(|user| person_option(user)).collect(),
            admins: self.admins().iter().map(|user| person_option(user)).collect(),
            main_teams: main_teams.into_iter().collect(),
            teams: teams.into_iter().collect(),
            sub_teams: sub_teams.into_iter().collect(),
        }
    }
}

fn person_option(user: &User) -> PersonOption {
    PersonOption {
        id: user.id.clone(),
        name: user.display_name().to_string(),
    }
}

/// Salesperson and team scope; every label compares case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScopeFilters {
    pub salesman_id: Option<String>,
    pub main_team: Option<String>,
    pub team: Option<String>,
    pub sub_team: Option<String>,
}

impl ScopeFilters {
    /// Drops blank values so the echoed filters only show what applied.
    pub fn normalized(&self) -> Self {
        Self {
            salesman_id: non_empty_opt(self.salesman_id.as_deref()),
            main_team: non_empty_opt(self.main_team.as_deref()),
            team: non_empty_opt(self.team.as_deref()),
            sub_team: non_empty_opt(self.sub_team.as_deref()),
        }
    }

    pub fn matches(&self, profile: &SalesProfile) -> bool {
        label_matches(self.salesman_id.as_deref(), &profile.id)
            && label_matches(self.main_team.as_deref(), &profile.main_team)
            && label_matches(self.team.as_deref(), &profile.team)
            && label_matches(self.sub_team.as_deref(), &profile.sub_team)
    }
}

pub fn label_matches(filter: Option<&str>, value: &str) -> bool {
    match filter.map(str::trim).filter(|item| !item.is_empty()) {
        Some(expected) => expected.eq_ignore_ascii_case(value.trim()),
        None => true,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::models::{ContactType, CustomerType, ReasonCategory, Role, User, Visited, WeeklyReport};
    use crate::services::week::get_week_from_key;
    use crate::services::weekly_rows::empty_weekly_report;

    pub fn user(id: &str, name: &str, role: Role, team: &str) -> User {
        User {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{id}@example.com"),
            role,
            main_team: "Sales".to_string(),
            team: team.to_string(),
            sub_team: String::new(),
        }
    }

    pub fn salesman(id: &str, name: &str, team: &str) -> User {
        user(id, name, Role::Salesman, team)
    }

    pub fn admin(id: &str, name: &str) -> User {
        user(id, name, Role::Admin, "Leadership")
    }

    /// One planned customer visit and its outcome on a single day.
    #[derive(Debug, Clone)]
    pub struct Visit {
        pub date: &'static str,
        pub customer: &'static str,
        pub contact: ContactType,
        pub customer_type: CustomerType,
        pub location: &'static str,
        pub jsv_with: &'static str,
        pub visited: Visited,
        pub reason: ReasonCategory,
        pub enquiries: u32,
        pub shipments: u32,
    }

    pub fn visit(date: &'static str, customer: &'static str, visited: Visited) -> Visit {
        Visit {
            date,
            customer,
            contact: ContactType::Nc,
            customer_type: CustomerType::Existing,
            location: "",
            jsv_with: "",
            visited,
            reason: ReasonCategory::Blank,
            enquiries: 0,
            shipments: 0,
        }
    }

    impl Visit {
        pub fn contact(mut self, contact: ContactType) -> Self {
            self.contact = contact;
            self
        }

        pub fn jsv_with(mut self, admin_id: &'static str) -> Self {
            self.contact = ContactType::Jsv;
            self.jsv_with = admin_id;
            self
        }

        pub fn customer_type(mut self, customer_type: CustomerType) -> Self {
            self.customer_type = customer_type;
            self
        }

        pub fn location(mut self, location: &'static str) -> Self {
            self.location = location;
            self
        }

        pub fn reason(mut self, reason: ReasonCategory) -> Self {
            self.reason = reason;
            self
        }

        pub fn outcome(mut self, enquiries: u32, shipments: u32) -> Self {
            self.enquiries = enquiries;
            self.shipments = shipments;
            self
        }
    }

    /// Weekly reports for one salesperson; visits are grouped by the week
    /// containing their date and unused days stay blank.
    pub fn reports_for(salesman_id: &str, visits: &[Visit]) -> Vec<WeeklyReport> {
        let mut reports: Vec<WeeklyReport> = Vec::new();
        for visit in visits {
            let week = get_week_from_key(visit.date).expect("fixture date is valid");
            let position = match reports.iter().position(|report| report.week_key == week.key) {
                Some(position) => position,
                None => {
                    reports.push(blank_report(salesman_id, &week.key));
                    reports.len() - 1
                }
            };
            let report = &mut reports[position];
            let slot = report
                .planning_rows
                .iter()
                .position(|row| row.date == visit.date)
                .expect("date inside week");
            let planning = &mut report.planning_rows[slot];
            planning.customer_name = visit.customer.to_string();
            planning.contact_type = visit.contact;
            planning.customer_type = visit.customer_type;
            planning.location_area = visit.location.to_string();
            planning.jsv_with_whom = visit.jsv_with.to_string();
            let actual = &mut report.actual_output_rows[slot];
            actual.visited = visit.visited;
            actual.not_visited_reason_category = visit.reason;
            if visit.visited == Visited::No {
                actual.not_visited_reason = "Could not make it".to_string();
            }
            actual.enquiries_received = visit.enquiries;
            actual.shipments_converted = visit.shipments;
        }
        reports
    }

    pub fn blank_report(salesman_id: &str, week_key: &str) -> WeeklyReport {
        let week = get_week_from_key(week_key).expect("fixture week is valid");
        empty_weekly_report(salesman_id, &week)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{admin, salesman};
    use super::{ScopeFilters, UserDirectory};

    #[test]
    fn unknown_owner_gets_unassigned_profile() {
        let users = vec![salesman("u1", "Asha", "North")];
        let directory = UserDirectory::new(&users);
        let profile = directory.profile("ghost");
        assert_eq!(profile.name, "ghost");
        assert_eq!(profile.team, "Unassigned");
        assert_eq!(directory.profile("u1").team, "North");
    }

    #[test]
    fn scope_filters_compare_case_insensitively() {
        let users = vec![salesman("u1", "Asha", "North")];
        let directory = UserDirectory::new(&users);
        let profile = directory.profile("u1");
        let filters = ScopeFilters {
            team: Some(" north ".to_string()),
            ..ScopeFilters::default()
        };
        assert!(filters.matches(&profile));
        let other = ScopeFilters {
            team: Some("South".to_string()),
            ..ScopeFilters::default()
        };
        assert!(!other.matches(&profile));
    }

    #[test]
    fn filter_options_split_admins_from_salespeople() {
        let users = vec![
            salesman("u2", "Zed", "South"),
            salesman("u1", "Asha", "North"),
            admin("a1", "Meera"),
        ];
        let options = UserDirectory::new(&users).filter_options();
        assert_eq!(
            options
                .salespeople
                .iter()
                .map(|person| person.id.as_str())
                .collect::<Vec<_>>(),
            vec!["u1", "u2"]
        );
        assert_eq!(options.admins.len(), 1);
        assert_eq!(options.teams, vec!["North".to_string(), "South".to_string()]);
    }
}
