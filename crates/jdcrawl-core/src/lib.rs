pub mod app_config;
pub mod config;
pub mod keywords;
pub mod types;

pub use app_config::{AppConfig, RetrySettings};
pub use config::{build_app_config, load_app_config, load_app_config_from_env};
pub use keywords::{keyword_slug, load_keywords, KeywordsFile};
pub use types::{
    CoreError, CrawlJob, Cursor, FeedType, JobStatus, Page, Pair, ProductId, Record, RecordDetail,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read keywords file {path}: {source}")]
    KeywordsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse keywords file: {0}")]
    KeywordsFileParse(#[source] serde_yaml::Error),

    #[error("config validation failed: {0}")]
    Validation(String),
}
