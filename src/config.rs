use std::env;
use std::path::PathBuf;

use crate::services::activity_compliance::{Stage2Config, DEFAULT_JSV_WEEKLY_TARGET};
use crate::services::enquiry_effectiveness::{
    Stage4Thresholds, DEFAULT_MIN_ENQUIRIES_FOR_LOW_CONVERSION, DEFAULT_MIN_ENQUIRY_PER_VISIT,
    DEFAULT_MIN_SHIPMENT_CONVERSION, DEFAULT_MIN_VISITS_FOR_LOW_ENQUIRY,
};
use crate::services::jsv_alerts::DEFAULT_JSV_REPEAT_THRESHOLD;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub request_timeout_seconds: u64,
    pub dataset_path: Option<PathBuf>,
    pub dataset_autosave: bool,
    pub jsv_repeat_threshold: u32,
    pub jsv_weekly_target: u32,
    pub stage4_thresholds: Stage4Thresholds,
    pub allow_legacy_unchanged: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Field Activity API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            request_timeout_seconds: env_parse_or("REQUEST_TIMEOUT_SECONDS", 30),
            dataset_path: env_opt("DATASET_PATH").map(PathBuf::from),
            dataset_autosave: env_parse_bool_or("DATASET_AUTOSAVE", false),
            jsv_repeat_threshold: env_parse_or(
                "JSV_REPEAT_THRESHOLD",
                DEFAULT_JSV_REPEAT_THRESHOLD,
            ),
            jsv_weekly_target: env_parse_or("JSV_WEEKLY_TARGET", DEFAULT_JSV_WEEKLY_TARGET),
            stage4_thresholds: Stage4Thresholds {
                min_visits_for_low_enquiry: env_non_negative_or(
                    "STAGE4_MIN_VISITS_FOR_LOW_ENQUIRY",
                    DEFAULT_MIN_VISITS_FOR_LOW_ENQUIRY,
                ),
                min_enquiry_per_visit: env_non_negative_or(
                    "STAGE4_MIN_ENQUIRY_PER_VISIT",
                    DEFAULT_MIN_ENQUIRY_PER_VISIT,
                ),
                min_enquiries_for_low_conversion: env_non_negative_or(
                    "STAGE4_MIN_ENQUIRIES_FOR_LOW_CONVERSION",
                    DEFAULT_MIN_ENQUIRIES_FOR_LOW_CONVERSION,
                ),
                min_shipment_conversion: env_non_negative_or(
                    "STAGE4_MIN_SHIPMENT_CONVERSION",
                    DEFAULT_MIN_SHIPMENT_CONVERSION,
                ),
            },
            allow_legacy_unchanged: env_parse_bool_or("ALLOW_LEGACY_UNCHANGED", true),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn stage2_config(&self) -> Stage2Config {
        Stage2Config {
            jsv_target: self.jsv_weekly_target,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_non_negative_or(key: &str, default: f64) -> f64 {
    let value = env_parse_or(key, default);
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        default
    }
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, parse_csv};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "/v1");
    }

    #[test]
    fn csv_drops_blank_entries() {
        assert_eq!(
            parse_csv(" http://a.test , ,http://b.test"),
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );
    }
}
