use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;
use crate::services::activity_compliance::Stage2Filters;
use crate::services::directory::ScopeFilters;
use crate::services::enquiry_effectiveness::{Stage4Filters, Stage4ThresholdOverrides};
use crate::services::exceptions::Stage5Filters;
use crate::services::plan_vs_actual::Stage1Filters;
use crate::services::ranges::RangeQuery;
use crate::services::weekly_rows::{ActualOutputRowInput, PlanningRowInput};

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SalesmanPath {
    pub salesman_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CasePath {
    pub case_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WeekQuery {
    pub week: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct JsvAlertQuery {
    #[validate(range(max = 1000))]
    pub threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SavePlanningRowsInput {
    pub planning_rows: Vec<PlanningRowInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaveActualOutputRowsInput {
    pub actual_output_rows: Vec<ActualOutputRowInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Stage1Query {
    #[serde(flatten)]
    pub range: RangeQuery,
    #[serde(flatten)]
    pub filters: Stage1Filters,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Stage2Query {
    #[serde(flatten)]
    pub range: RangeQuery,
    #[serde(flatten)]
    pub filters: Stage2Filters,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScopedRangeQuery {
    #[serde(flatten)]
    pub range: RangeQuery,
    #[serde(flatten)]
    pub filters: ScopeFilters,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Stage4Query {
    #[serde(flatten)]
    pub range: RangeQuery,
    #[serde(flatten)]
    pub filters: Stage4Filters,
    #[serde(flatten)]
    pub thresholds: Stage4ThresholdOverrides,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Stage5Query {
    #[serde(flatten)]
    pub range: RangeQuery,
    #[serde(flatten)]
    pub filters: Stage5Filters,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncExceptionsInput {
    #[validate(length(max = 32))]
    pub week: Option<String>,
    #[validate(length(max = 7))]
    pub month: Option<String>,
    #[validate(length(max = 32))]
    pub from: Option<String>,
    #[validate(length(max = 32))]
    pub to: Option<String>,
}

impl SyncExceptionsInput {
    pub fn range_query(&self) -> RangeQuery {
        RangeQuery {
            week: self.week.clone(),
            month: self.month.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransitionInput {
    #[validate(length(min = 1, max = 32))]
    pub status: String,
    #[validate(length(min = 1, max = 128))]
    pub changed_by: String,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}
