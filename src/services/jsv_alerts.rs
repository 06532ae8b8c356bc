//! Repeat-JSV alert: a salesperson sending many joint visits to the same
//! customer.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{ContactType, WeeklyReport};

use super::metrics::normalize_customer_name;

pub const DEFAULT_JSV_REPEAT_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatedJsvCustomer {
    pub customer_name: String,
    pub normalized_customer: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsvRepeatAlert {
    pub active: bool,
    pub customers: Vec<RepeatedJsvCustomer>,
    pub message: String,
}

impl JsvRepeatAlert {
    /// `{active: false, customers: [], message: ""}`
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// One alert per salesperson across all of their reports. A customer is
/// included when its JSV count is strictly greater than `threshold`.
pub fn build_jsv_repeat_alerts_by_salesman(
    reports: &[WeeklyReport],
    threshold: u32,
) -> BTreeMap<String, JsvRepeatAlert> {
    let mut ordered = reports.iter().collect::<Vec<_>>();
    ordered.sort_by(|left, right| {
        left.salesman_id
            .cmp(&right.salesman_id)
            .then_with(|| left.week_key.cmp(&right.week_key))
    });

    // salesman -> normalized customer -> (first seen display name, count)
    let mut counts: BTreeMap<&str, BTreeMap<String, (String, u32)>> = BTreeMap::new();
    for report in ordered {
        let per_customer = counts.entry(report.salesman_id.as_str()).or_default();
        let mut rows = report.planning_rows.iter().collect::<Vec<_>>();
        rows.sort_by(|left, right| left.date.cmp(&right.date));
        for row in rows {
            if row.contact_type != ContactType::Jsv {
                continue;
            }
            let normalized = normalize_customer_name(&row.customer_name);
            if normalized.is_empty() {
                continue;
            }
            per_customer
                .entry(normalized)
                .or_insert_with(|| (row.customer_name.trim().to_string(), 0))
                .1 += 1;
        }
    }

    counts
        .into_iter()
        .map(|(salesman_id, per_customer)| {
            let mut customers = per_customer
                .into_iter()
                .filter(|(_, (_, count))| *count > threshold)
                .map(|(normalized_customer, (customer_name, count))| RepeatedJsvCustomer {
                    customer_name,
                    normalized_customer,
                    count,
                })
                .collect::<Vec<_>>();
            customers.sort_by(|left, right| {
                right
                    .count
                    .cmp(&left.count)
                    .then_with(|| left.customer_name.cmp(&right.customer_name))
                    .then_with(|| left.normalized_customer.cmp(&right.normalized_customer))
            });
            (salesman_id.to_string(), alert_for(customers, threshold))
        })
        .collect()
}

fn alert_for(customers: Vec<RepeatedJsvCustomer>, threshold: u32) -> JsvRepeatAlert {
    if customers.is_empty() {
        return JsvRepeatAlert::inactive();
    }
    let listed = customers
        .iter()
        .map(|customer| format!("{} ({})", customer.customer_name, customer.count))
        .collect::<Vec<_>>()
        .join(", ");
    JsvRepeatAlert {
        active: true,
        message: format!(
            "More than {threshold} JSV visits planned with the same customer: {listed}. Spread joint visits across more customers."
        ),
        customers,
    }
}

#[cfg(test)]
mod tests {
    use super::build_jsv_repeat_alerts_by_salesman;
    use crate::models::Visited;
    use crate::services::directory::fixtures::{reports_for, visit};

    #[test]
    fn spellings_of_one_customer_collapse() {
        let reports = reports_for(
            "u1",
            &[
                visit("2026-02-02", " Acme  Corp ", Visited::Yes).jsv_with("a1"),
                visit("2026-02-03", "acme corp", Visited::Yes).jsv_with("a1"),
                visit("2026-02-04", "ACME CORP", Visited::No).jsv_with("a1"),
                visit("2026-02-09", "Acme Corp", Visited::Yes).jsv_with("a1"),
                visit("2026-02-10", "Birla", Visited::Yes).jsv_with("a1"),
            ],
        );
        let alerts = build_jsv_repeat_alerts_by_salesman(&reports, 3);
        let alert = &alerts["u1"];
        assert!(alert.active);
        assert_eq!(alert.customers.len(), 1);
        assert_eq!(alert.customers[0].count, 4);
        assert_eq!(alert.customers[0].normalized_customer, "acme corp");
        assert_eq!(alert.customers[0].customer_name, "Acme  Corp");
        assert!(alert.message.contains("(4)"));
    }

    #[test]
    fn exactly_threshold_stays_inactive() {
        let reports = reports_for(
            "u1",
            &[
                visit("2026-02-02", "Acme", Visited::Yes).jsv_with("a1"),
                visit("2026-02-03", "Acme", Visited::Yes).jsv_with("a1"),
                visit("2026-02-04", "Acme", Visited::Yes).jsv_with("a1"),
                visit("2026-02-05", "Acme", Visited::Yes),
            ],
        );
        let alerts = build_jsv_repeat_alerts_by_salesman(&reports, 3);
        let alert = &alerts["u1"];
        assert!(!alert.active);
        assert!(alert.customers.is_empty());
        assert_eq!(alert.message, "");
    }

    #[test]
    fn customers_sort_by_count_then_name() {
        let mut visits = Vec::new();
        for date in ["2026-02-02", "2026-02-03", "2026-02-04", "2026-02-05"] {
            visits.push(visit(date, "Zenith", Visited::Yes).jsv_with("a1"));
        }
        for date in ["2026-02-09", "2026-02-10", "2026-02-11", "2026-02-12"] {
            visits.push(visit(date, "Birla", Visited::Yes).jsv_with("a1"));
        }
        visits.push(visit("2026-02-13", "Zenith", Visited::Yes).jsv_with("a1"));
        let alerts = build_jsv_repeat_alerts_by_salesman(&reports_for("u1", &visits), 3);
        let names = alerts["u1"]
            .customers
            .iter()
            .map(|customer| customer.customer_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Zenith", "Birla"]);
    }
}
