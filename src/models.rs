//! Records exchanged with the storage adapter: users, weekly reports with
//! their planning/actual rows, and persisted exception cases.
//!
//! Enum fields decode leniently so historical documents saved under older
//! rules still load: unknown values become the blank variant and legacy
//! spellings map onto the canonical ones. Strict parsing (`parse`) is only
//! used by the row normaliser at write time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const UNASSIGNED_TEAM: &str = "Unassigned";

macro_rules! label_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = Option::<String>::deserialize(deserializer)?;
                Ok(Self::from_stored(raw.as_deref().unwrap_or_default()))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    #[default]
    Salesman,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Salesman => "salesman",
            Self::Admin => "admin",
        }
    }

    fn from_stored(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("admin") {
            Self::Admin
        } else {
            Self::Salesman
        }
    }
}

label_serde!(Role);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CustomerType {
    #[default]
    Blank,
    TargetedBudgeted,
    Existing,
}

impl CustomerType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" => Some(Self::Blank),
            "targeted_budgeted" => Some(Self::TargetedBudgeted),
            "existing" => Some(Self::Existing),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blank => "",
            Self::TargetedBudgeted => "targeted_budgeted",
            Self::Existing => "existing",
        }
    }

    /// Group-by label; blank rows land in `unknown`.
    pub fn bucket(self) -> &'static str {
        match self {
            Self::Blank => "unknown",
            other => other.as_str(),
        }
    }

    pub fn is_blank(self) -> bool {
        self == Self::Blank
    }

    fn from_stored(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "targeted_budgeted" | "targeted/budgeted" | "targeted budgeted" | "targeted"
            | "budgeted" | "new" | "new_customer" | "new customer" => Self::TargetedBudgeted,
            "existing" | "existing_customer" | "existing customer" => Self::Existing,
            _ => Self::Blank,
        }
    }
}

label_serde!(CustomerType);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContactType {
    #[default]
    Blank,
    Nc,
    Fc,
    Sc,
    Jsv,
}

impl ContactType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" => Some(Self::Blank),
            "nc" => Some(Self::Nc),
            "fc" => Some(Self::Fc),
            "sc" => Some(Self::Sc),
            "jsv" => Some(Self::Jsv),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blank => "",
            Self::Nc => "nc",
            Self::Fc => "fc",
            Self::Sc => "sc",
            Self::Jsv => "jsv",
        }
    }

    pub fn bucket(self) -> &'static str {
        match self {
            Self::Blank => "unknown",
            other => other.as_str(),
        }
    }

    pub fn is_blank(self) -> bool {
        self == Self::Blank
    }

    pub fn is_followup(self) -> bool {
        matches!(self, Self::Fc | Self::Sc)
    }

    fn from_stored(raw: &str) -> Self {
        Self::parse(&raw.trim().to_ascii_lowercase()).unwrap_or_default()
    }
}

label_serde!(ContactType);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visited {
    #[default]
    Blank,
    Yes,
    No,
}

impl Visited {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" => Some(Self::Blank),
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blank => "",
            Self::Yes => "yes",
            Self::No => "no",
        }
    }

    fn from_stored(raw: &str) -> Self {
        Self::parse(&raw.trim().to_ascii_lowercase()).unwrap_or_default()
    }
}

label_serde!(Visited);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReasonCategory {
    #[default]
    Blank,
    ClientUnavailable,
    NoResponse,
    InternalEngagement,
    TravelLogisticsIssue,
}

impl ReasonCategory {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" => Some(Self::Blank),
            "client_unavailable" => Some(Self::ClientUnavailable),
            "no_response" => Some(Self::NoResponse),
            "internal_engagement" => Some(Self::InternalEngagement),
            "travel_logistics_issue" => Some(Self::TravelLogisticsIssue),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blank => "",
            Self::ClientUnavailable => "client_unavailable",
            Self::NoResponse => "no_response",
            Self::InternalEngagement => "internal_engagement",
            Self::TravelLogisticsIssue => "travel_logistics_issue",
        }
    }

    pub fn bucket(self) -> &'static str {
        match self {
            Self::Blank => "uncategorized",
            other => other.as_str(),
        }
    }

    pub fn is_blank(self) -> bool {
        self == Self::Blank
    }

    fn from_stored(raw: &str) -> Self {
        Self::parse(&raw.trim().to_ascii_lowercase()).unwrap_or_default()
    }
}

label_serde!(ReasonCategory);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExceptionStatus {
    #[default]
    Open,
    InReview,
    Resolved,
    Ignored,
}

impl ExceptionStatus {
    pub const ALL: [Self; 4] = [Self::Open, Self::InReview, Self::Resolved, Self::Ignored];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "open" => Some(Self::Open),
            "in_review" => Some(Self::InReview),
            "resolved" => Some(Self::Resolved),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InReview => "in_review",
            Self::Resolved => "resolved",
            Self::Ignored => "ignored",
        }
    }

    /// Cases still waiting on an admin.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Open | Self::InReview)
    }

    fn from_stored(raw: &str) -> Self {
        Self::parse(&raw.trim().to_ascii_lowercase()).unwrap_or_default()
    }
}

label_serde!(ExceptionStatus);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExceptionRule {
    #[default]
    SingleVisitNoFollowup,
    RepeatVisitNoEnquiry,
    RepeatVisitNoJsv,
    FollowupStagnation,
}

impl ExceptionRule {
    pub const ALL: [Self; 4] = [
        Self::SingleVisitNoFollowup,
        Self::RepeatVisitNoEnquiry,
        Self::RepeatVisitNoJsv,
        Self::FollowupStagnation,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "EX-01" => Some(Self::SingleVisitNoFollowup),
            "EX-02" => Some(Self::RepeatVisitNoEnquiry),
            "EX-03" => Some(Self::RepeatVisitNoJsv),
            "EX-04" => Some(Self::FollowupStagnation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleVisitNoFollowup => "EX-01",
            Self::RepeatVisitNoEnquiry => "EX-02",
            Self::RepeatVisitNoJsv => "EX-03",
            Self::FollowupStagnation => "EX-04",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SingleVisitNoFollowup => "Single Visit No Follow-up",
            Self::RepeatVisitNoEnquiry => "Repeat Visit No Enquiry",
            Self::RepeatVisitNoJsv => "Repeat Visit No JSV",
            Self::FollowupStagnation => "Follow-up Stagnation",
        }
    }

    fn from_stored(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_default()
    }
}

label_serde!(ExceptionRule);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub main_team: String,
    pub team: String,
    pub sub_team: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn display_name(&self) -> &str {
        let name = self.name.trim();
        if name.is_empty() {
            self.id.as_str()
        } else {
            name
        }
    }
}

pub fn team_label(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        UNASSIGNED_TEAM.to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredPlanningRow", into = "StoredPlanningRow")]
pub struct PlanningRow {
    pub date: String,
    pub iso_week: u32,
    pub customer_name: String,
    pub location_area: String,
    pub customer_type: CustomerType,
    pub contact_type: ContactType,
    pub jsv_with_whom: String,
    /// Stored labels that decode to no known variant. They are written back
    /// unchanged and still mark the row as filled in.
    pub unknown_labels: UnknownLabels,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownLabels {
    pub customer_type: Option<String>,
    pub contact_type: Option<String>,
}

impl UnknownLabels {
    pub fn is_empty(&self) -> bool {
        self.customer_type.is_none() && self.contact_type.is_none()
    }
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct StoredPlanningRow {
    date: String,
    #[serde(deserialize_with = "lenient_count")]
    iso_week: u32,
    customer_name: String,
    location_area: String,
    #[serde(deserialize_with = "lenient_label")]
    customer_type: String,
    #[serde(deserialize_with = "lenient_label")]
    contact_type: String,
    jsv_with_whom: String,
}

impl From<StoredPlanningRow> for PlanningRow {
    fn from(stored: StoredPlanningRow) -> Self {
        let customer_type = CustomerType::from_stored(&stored.customer_type);
        let contact_type = ContactType::from_stored(&stored.contact_type);
        let unknown = |raw: String, decoded_blank: bool| {
            (decoded_blank && !raw.trim().is_empty()).then_some(raw)
        };
        Self {
            date: stored.date,
            iso_week: stored.iso_week,
            customer_name: stored.customer_name,
            location_area: stored.location_area,
            unknown_labels: UnknownLabels {
                customer_type: unknown(stored.customer_type, customer_type.is_blank()),
                contact_type: unknown(stored.contact_type, contact_type.is_blank()),
            },
            customer_type,
            contact_type,
            jsv_with_whom: stored.jsv_with_whom,
        }
    }
}

impl From<PlanningRow> for StoredPlanningRow {
    fn from(row: PlanningRow) -> Self {
        Self {
            date: row.date,
            iso_week: row.iso_week,
            customer_name: row.customer_name,
            location_area: row.location_area,
            customer_type: row
                .unknown_labels
                .customer_type
                .unwrap_or_else(|| row.customer_type.as_str().to_string()),
            contact_type: row
                .unknown_labels
                .contact_type
                .unwrap_or_else(|| row.contact_type.as_str().to_string()),
            jsv_with_whom: row.jsv_with_whom,
        }
    }
}

impl PlanningRow {
    pub fn is_meaningful(&self) -> bool {
        !self.customer_name.trim().is_empty()
            || !self.contact_type.is_blank()
            || !self.location_area.trim().is_empty()
            || !self.customer_type.is_blank()
            || !self.jsv_with_whom.trim().is_empty()
            || !self.unknown_labels.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActualOutputRow {
    pub date: String,
    #[serde(deserialize_with = "lenient_count")]
    pub iso_week: u32,
    pub visited: Visited,
    pub not_visited_reason: String,
    pub not_visited_reason_category: ReasonCategory,
    #[serde(deserialize_with = "lenient_count")]
    pub enquiries_received: u32,
    #[serde(deserialize_with = "lenient_count")]
    pub shipments_converted: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeeklyReport {
    pub salesman_id: String,
    pub week_key: String,
    pub week_start_date_utc: Option<DateTime<Utc>>,
    pub week_end_date_utc: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "null_as_default")]
    pub planning_rows: Vec<PlanningRow>,
    #[serde(deserialize_with = "null_as_default")]
    pub actual_output_rows: Vec<ActualOutputRow>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub current_status: String,
}

impl WeeklyReport {
    /// Actual-output row recorded for exactly this date, if any.
    pub fn actual_row_for(&self, date: &str) -> Option<&ActualOutputRow> {
        self.actual_output_rows.iter().find(|row| row.date == date)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JourneyMetrics {
    pub total_visited: u32,
    pub total_enquiries: u32,
    pub total_shipments: u32,
    pub jsv_count: u32,
    pub followup_visit_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JourneyVisit {
    pub date: String,
    pub week_key: String,
    pub contact_type: ContactType,
    pub customer_type: CustomerType,
    pub location_area: String,
    pub jsv_with_whom: String,
    pub enquiries: u32,
    pub shipments: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusChange {
    pub from: ExceptionStatus,
    pub to: ExceptionStatus,
    pub changed_by: String,
    pub note: String,
    pub changed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExceptionCase {
    pub case_key: String,
    pub rule_id: ExceptionRule,
    pub rule_label: String,
    pub salesman_id: String,
    pub salesman_name: String,
    pub main_team: String,
    pub team: String,
    pub sub_team: String,
    pub customer_name: String,
    pub normalized_customer: String,
    pub status: ExceptionStatus,
    pub owner_admin_id: Option<String>,
    pub metrics: JourneyMetrics,
    pub timeline: Vec<JourneyVisit>,
    pub first_seen_date: String,
    pub last_seen_date: String,
    pub status_history: Vec<StatusChange>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts integers, numeric strings and null; anything negative or
/// malformed reads as zero.
fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(number)) => number
            .as_u64()
            .map(|count| count.min(u64::from(u32::MAX)) as u32)
            .unwrap_or(0),
        Some(serde_json::Value::String(text)) => text.trim().parse::<u32>().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_label<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::{
        ActualOutputRow, ContactType, CustomerType, ExceptionRule, PlanningRow, Role, User,
        Visited, WeeklyReport,
    };
    use serde_json::json;

    #[test]
    fn decodes_legacy_customer_type_spellings() {
        let row: PlanningRow = serde_json::from_value(json!({
            "date": "2026-02-02",
            "customerName": "Acme",
            "customerType": "New",
            "contactType": "NC"
        }))
        .expect("row decodes");
        assert_eq!(row.customer_type, CustomerType::TargetedBudgeted);
        assert_eq!(row.contact_type, ContactType::Nc);
    }

    #[test]
    fn unknown_stored_values_fall_back_to_blank() {
        let row: ActualOutputRow = serde_json::from_value(json!({
            "date": "2026-02-02",
            "visited": "maybe",
            "enquiriesReceived": "3",
            "shipmentsConverted": -2
        }))
        .expect("row decodes");
        assert_eq!(row.visited, Visited::Blank);
        assert_eq!(row.enquiries_received, 3);
        assert_eq!(row.shipments_converted, 0);
    }

    #[test]
    fn missing_row_arrays_default_to_empty() {
        let report: WeeklyReport = serde_json::from_value(json!({
            "salesmanId": "u1",
            "weekKey": "2026-02-02",
            "actualOutputRows": null
        }))
        .expect("report decodes");
        assert_eq!(report.salesman_id, "u1");
        assert!(report.planning_rows.is_empty());
        assert!(report.actual_output_rows.is_empty());
    }

    #[test]
    fn blank_rows_are_not_meaningful() {
        let blank = PlanningRow {
            date: "2026-02-02".to_string(),
            customer_name: "   ".to_string(),
            ..PlanningRow::default()
        };
        assert!(!blank.is_meaningful());

        let located = PlanningRow {
            location_area: "Pune".to_string(),
            ..blank.clone()
        };
        assert!(located.is_meaningful());
    }

    #[test]
    fn unrecognized_labels_keep_a_row_meaningful() {
        let stored = json!({
            "date": "2026-02-02",
            "isoWeek": 6,
            "customerName": "",
            "locationArea": "",
            "customerType": "",
            "contactType": "visit-legacy",
            "jsvWithWhom": ""
        });
        let row: PlanningRow = serde_json::from_value(stored.clone()).expect("row decodes");
        assert_eq!(row.contact_type, ContactType::Blank);
        assert_eq!(row.unknown_labels.contact_type.as_deref(), Some("visit-legacy"));
        assert!(row.is_meaningful());
        assert_eq!(serde_json::to_value(&row).ok(), Some(stored));

        let padded: PlanningRow =
            serde_json::from_value(json!({"date": "2026-02-02", "customerType": "  "}))
                .expect("row decodes");
        assert!(padded.unknown_labels.is_empty());
        assert!(!padded.is_meaningful());
    }

    #[test]
    fn enums_serialize_as_wire_labels() {
        assert_eq!(
            serde_json::to_value(ExceptionRule::RepeatVisitNoJsv).ok(),
            Some(json!("EX-03"))
        );
        let user: User = serde_json::from_value(json!({"id": "a1", "role": "ADMIN"}))
            .expect("user decodes");
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.display_name(), "a1");
    }
}
