use std::path::PathBuf;

/// Backoff policy knobs for the retry controller.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_jitter: f64,
    pub backoff_max_ms: u64,
}

#[derive(Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub database_url: String,
    pub ids_dir: PathBuf,
    pub output_dir: PathBuf,
    pub keywords_path: PathBuf,
    pub log_level: String,
    pub request_timeout_secs: u64,
    pub user_agents: Vec<String>,
    pub max_concurrent_pairs: usize,
    pub inter_request_delay_ms: u64,
    pub inter_request_jitter_ms: u64,
    pub retry: RetrySettings,
    pub review_page_cap: u32,
    pub qa_page_cap: u32,
    pub search_page_cap: u32,
    pub review_score: u8,
    pub review_sort: u8,
    pub review_page_size: u32,
    pub cookie: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub auth_wait_secs: u64,
    pub api_base_url: String,
    pub search_base_url: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("data_dir", &self.data_dir)
            .field("database_url", &self.database_url)
            .field("ids_dir", &self.ids_dir)
            .field("output_dir", &self.output_dir)
            .field("keywords_path", &self.keywords_path)
            .field("log_level", &self.log_level)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agents", &self.user_agents.len())
            .field("max_concurrent_pairs", &self.max_concurrent_pairs)
            .field("inter_request_delay_ms", &self.inter_request_delay_ms)
            .field("inter_request_jitter_ms", &self.inter_request_jitter_ms)
            .field("retry", &self.retry)
            .field("review_page_cap", &self.review_page_cap)
            .field("qa_page_cap", &self.qa_page_cap)
            .field("search_page_cap", &self.search_page_cap)
            .field("review_score", &self.review_score)
            .field("review_sort", &self.review_sort)
            .field("review_page_size", &self.review_page_size)
            .field("cookie", &self.cookie.as_ref().map(|_| "[redacted]"))
            .field("cookie_file", &self.cookie_file)
            .field("auth_wait_secs", &self.auth_wait_secs)
            .field("api_base_url", &self.api_base_url)
            .field("search_base_url", &self.search_base_url)
            .finish()
    }
}
