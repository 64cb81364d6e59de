use std::collections::HashMap;
use std::env::VarError;
use std::path::PathBuf;

use super::*;

fn lookup_from_map<'a>(
    map: &'a HashMap<&'a str, &'a str>,
) -> impl Fn(&str) -> Result<String, VarError> + 'a {
    move |key| {
        map.get(key)
            .map(|v| (*v).to_string())
            .ok_or(VarError::NotPresent)
    }
}

#[test]
fn build_app_config_succeeds_with_empty_env() {
    let map: HashMap<&str, &str> = HashMap::new();
    let cfg = build_app_config(lookup_from_map(&map)).expect("defaults should be valid");

    assert_eq!(cfg.data_dir, PathBuf::from("./data"));
    assert_eq!(cfg.ids_dir, PathBuf::from("./data/ids"));
    assert_eq!(cfg.output_dir, PathBuf::from("./data/output"));
    assert_eq!(cfg.database_url, "sqlite://./data/jdcrawl.db?mode=rwc");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.max_concurrent_pairs, 3);
    assert_eq!(cfg.retry.max_attempts, 5);
    assert_eq!(cfg.review_page_cap, 100);
    assert_eq!(cfg.qa_page_cap, 50);
    assert_eq!(cfg.review_score, 0);
    assert_eq!(cfg.review_sort, 6);
    assert!(cfg.cookie.is_none());
    assert!(!cfg.user_agents.is_empty());
}

#[test]
fn data_dir_drives_derived_paths() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_DATA_DIR", "/var/lib/jdcrawl");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();

    assert_eq!(cfg.ids_dir, PathBuf::from("/var/lib/jdcrawl/ids"));
    assert_eq!(cfg.output_dir, PathBuf::from("/var/lib/jdcrawl/output"));
    assert_eq!(
        cfg.database_url,
        "sqlite:///var/lib/jdcrawl/jdcrawl.db?mode=rwc"
    );
}

#[test]
fn explicit_paths_override_data_dir() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_IDS_DIR", "/tmp/ids");
    map.insert("JDCRAWL_DATABASE_URL", "sqlite::memory:");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();

    assert_eq!(cfg.ids_dir, PathBuf::from("/tmp/ids"));
    assert_eq!(cfg.database_url, "sqlite::memory:");
}

#[test]
fn zero_page_cap_is_rejected() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_REVIEW_PAGE_CAP", "0");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "JDCRAWL_REVIEW_PAGE_CAP"),
        "expected InvalidEnvVar(JDCRAWL_REVIEW_PAGE_CAP), got: {result:?}"
    );
}

#[test]
fn zero_max_attempts_is_rejected() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_MAX_ATTEMPTS", "0");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "JDCRAWL_MAX_ATTEMPTS")
    );
}

#[test]
fn non_numeric_delay_is_rejected() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_INTER_REQUEST_DELAY_MS", "soon");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "JDCRAWL_INTER_REQUEST_DELAY_MS")
    );
}

#[test]
fn jitter_above_one_is_rejected() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_BACKOFF_JITTER", "1.5");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "JDCRAWL_BACKOFF_JITTER")
    );
}

#[test]
fn review_score_outside_filter_range_is_rejected() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_REVIEW_SCORE", "4");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "JDCRAWL_REVIEW_SCORE")
    );
}

#[test]
fn user_agents_are_split_and_trimmed() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_USER_AGENTS", " ua-one , ,ua-two ");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    assert_eq!(cfg.user_agents, vec!["ua-one".to_string(), "ua-two".to_string()]);
}

#[test]
fn blank_user_agent_list_is_rejected() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_USER_AGENTS", " , ");
    assert!(build_app_config(lookup_from_map(&map)).is_err());
}

#[test]
fn blank_cookie_is_treated_as_absent() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_COOKIE", "   ");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    assert!(cfg.cookie.is_none());
}

#[test]
fn debug_output_redacts_cookie() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_COOKIE", "thor=secret-session");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    let rendered = format!("{cfg:?}");
    assert!(!rendered.contains("secret-session"));
    assert!(rendered.contains("[redacted]"));
}

#[test]
fn max_concurrent_pairs_is_at_least_one() {
    let mut map = HashMap::new();
    map.insert("JDCRAWL_MAX_CONCURRENT_PAIRS", "0");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    assert_eq!(cfg.max_concurrent_pairs, 1);
}
