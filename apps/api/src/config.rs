use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Everything except the database location has a default; the LLM key is optional.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// `None` (or empty) runs the service in scripted fallback mode.
    pub anthropic_api_key: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub template_dir: Option<PathBuf>,
    pub interview: InterviewConfig,
}

/// Thresholds and wording knobs for the hardcoded interview script.
/// Built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct InterviewConfig {
    pub position_title: String,
    /// Budget ceiling. Salaries above it go to negotiation.
    pub max_salary: f64,
    /// Exclusive lower bound of the salary sanity band.
    pub salary_floor: f64,
    /// Exclusive upper bound of the salary sanity band.
    pub salary_ceiling: f64,
    pub license_timeline_max_months: u32,
    /// `experience_details` completes on an answer longer than this many characters.
    /// 0 accepts any non-empty answer.
    pub experience_details_min_chars: usize,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            position_title: "Registered Nurse".to_string(),
            max_salary: 72_000.0,
            salary_floor: 20_000.0,
            salary_ceiling: 200_000.0,
            license_timeline_max_months: 6,
            experience_details_min_chars: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = InterviewConfig::default();
        let interview = InterviewConfig {
            position_title: std::env::var("POSITION_TITLE").unwrap_or(defaults.position_title),
            max_salary: parse_env("MAX_SALARY", defaults.max_salary)?,
            salary_floor: parse_env("SALARY_FLOOR", defaults.salary_floor)?,
            salary_ceiling: parse_env("SALARY_CEILING", defaults.salary_ceiling)?,
            license_timeline_max_months: parse_env(
                "LICENSE_TIMELINE_MAX_MONTHS",
                defaults.license_timeline_max_months,
            )?,
            experience_details_min_chars: parse_env(
                "EXPERIENCE_DETAILS_MIN_CHARS",
                defaults.experience_details_min_chars,
            )?,
        };

        if interview.salary_floor >= interview.salary_ceiling {
            anyhow::bail!("SALARY_FLOOR must be lower than SALARY_CEILING");
        }

        Ok(Config {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://screener.db?mode=rwc".to_string()),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            template_dir: std::env::var("TEMPLATE_DIR").ok().map(PathBuf::from),
            interview,
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interview_defaults_match_budget() {
        let cfg = InterviewConfig::default();
        assert_eq!(cfg.max_salary, 72_000.0);
        assert!(cfg.salary_floor < cfg.max_salary && cfg.max_salary < cfg.salary_ceiling);
        assert_eq!(cfg.license_timeline_max_months, 6);
    }

    #[test]
    fn test_parse_env_falls_back_to_default_when_unset() {
        let value: u32 = parse_env("SCREENER_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}
