pub mod activity_compliance;
pub mod directory;
pub mod enquiry_effectiveness;
pub mod exceptions;
pub mod insights;
pub mod jsv_alerts;
pub mod metrics;
pub mod non_visits;
pub mod plan_vs_actual;
pub mod ranges;
pub mod week;
pub mod weekly_rows;
