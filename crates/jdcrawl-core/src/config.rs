use std::path::PathBuf;

use crate::app_config::{AppConfig, RetrySettings};
use crate::ConfigError;

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.2420.81",
];

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Every variable is optional; the lookup indirection keeps parsing testable
/// with a plain `HashMap`.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u8 = |var: &str, default: &str| -> Result<u8, ConfigError> {
        or_default(var, default)
            .parse::<u8>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_nonzero_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let value = parse_u32(var, default)?;
        if value == 0 {
            return Err(invalid(var, "must be greater than zero".to_string()));
        }
        Ok(value)
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_f64 = |var: &str, default: &str| -> Result<f64, ConfigError> {
        let value = or_default(var, default)
            .parse::<f64>()
            .map_err(|e| invalid(var, e.to_string()))?;
        if !value.is_finite() || value < 0.0 {
            return Err(invalid(var, "must be a finite, non-negative number".to_string()));
        }
        Ok(value)
    };

    let data_dir = PathBuf::from(or_default("JDCRAWL_DATA_DIR", "./data"));
    let database_url = lookup("JDCRAWL_DATABASE_URL").unwrap_or_else(|_| {
        format!("sqlite://{}?mode=rwc", data_dir.join("jdcrawl.db").display())
    });
    let ids_dir = lookup("JDCRAWL_IDS_DIR").map_or_else(|_| data_dir.join("ids"), PathBuf::from);
    let output_dir =
        lookup("JDCRAWL_OUTPUT_DIR").map_or_else(|_| data_dir.join("output"), PathBuf::from);
    let keywords_path = PathBuf::from(or_default("JDCRAWL_KEYWORDS_PATH", "./config/keywords.yaml"));
    let log_level = or_default("JDCRAWL_LOG_LEVEL", "info");

    let request_timeout_secs = parse_u64("JDCRAWL_REQUEST_TIMEOUT_SECS", "30")?;
    let user_agents = match lookup("JDCRAWL_USER_AGENTS") {
        Ok(raw) => {
            let agents: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
            if agents.is_empty() {
                return Err(invalid(
                    "JDCRAWL_USER_AGENTS",
                    "must list at least one user agent".to_string(),
                ));
            }
            agents
        }
        Err(_) => DEFAULT_USER_AGENTS.iter().map(|s| (*s).to_owned()).collect(),
    };

    let max_concurrent_pairs = parse_usize("JDCRAWL_MAX_CONCURRENT_PAIRS", "3")?.max(1);
    let inter_request_delay_ms = parse_u64("JDCRAWL_INTER_REQUEST_DELAY_MS", "3000")?;
    let inter_request_jitter_ms = parse_u64("JDCRAWL_INTER_REQUEST_JITTER_MS", "2000")?;

    let retry = RetrySettings {
        max_attempts: parse_nonzero_u32("JDCRAWL_MAX_ATTEMPTS", "5")?,
        backoff_base_ms: parse_u64("JDCRAWL_BACKOFF_BASE_MS", "1000")?,
        backoff_multiplier: parse_f64("JDCRAWL_BACKOFF_MULTIPLIER", "2.0")?,
        backoff_jitter: parse_f64("JDCRAWL_BACKOFF_JITTER", "0.25")?,
        backoff_max_ms: parse_u64("JDCRAWL_BACKOFF_MAX_MS", "60000")?,
    };
    if retry.backoff_jitter > 1.0 {
        return Err(invalid(
            "JDCRAWL_BACKOFF_JITTER",
            "must be between 0.0 and 1.0".to_string(),
        ));
    }

    let review_page_cap = parse_nonzero_u32("JDCRAWL_REVIEW_PAGE_CAP", "100")?;
    let qa_page_cap = parse_nonzero_u32("JDCRAWL_QA_PAGE_CAP", "50")?;
    let search_page_cap = parse_nonzero_u32("JDCRAWL_SEARCH_PAGE_CAP", "100")?;

    let review_score = parse_u8("JDCRAWL_REVIEW_SCORE", "0")?;
    if review_score > 3 {
        return Err(invalid(
            "JDCRAWL_REVIEW_SCORE",
            "must be 0 (all), 1 (negative), 2 (neutral) or 3 (positive)".to_string(),
        ));
    }
    let review_sort = parse_u8("JDCRAWL_REVIEW_SORT", "6")?;
    let review_page_size = parse_nonzero_u32("JDCRAWL_REVIEW_PAGE_SIZE", "10")?;

    let cookie = lookup("JDCRAWL_COOKIE").ok().filter(|c| !c.trim().is_empty());
    let cookie_file = lookup("JDCRAWL_COOKIE_FILE").ok().map(PathBuf::from);
    let auth_wait_secs = parse_u64("JDCRAWL_AUTH_WAIT_SECS", "600")?;

    let api_base_url = or_default("JDCRAWL_API_BASE_URL", "https://api.m.jd.com");
    let search_base_url = or_default("JDCRAWL_SEARCH_BASE_URL", "https://search.jd.com");

    Ok(AppConfig {
        data_dir,
        database_url,
        ids_dir,
        output_dir,
        keywords_path,
        log_level,
        request_timeout_secs,
        user_agents,
        max_concurrent_pairs,
        inter_request_delay_ms,
        inter_request_jitter_ms,
        retry,
        review_page_cap,
        qa_page_cap,
        search_page_cap,
        review_score,
        review_sort,
        review_page_size,
        cookie,
        cookie_file,
        auth_wait_secs,
        api_base_url,
        search_base_url,
    })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
