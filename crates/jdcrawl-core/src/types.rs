//! Domain types shared by every crate in the workspace.
//!
//! A crawl is organised around **pairs**: one product crossed with one feed
//! type. Each pair owns exactly one [`Cursor`] and one [`CrawlJob`]; records
//! are identified by `(product_id, external_record_id)`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid product id \"{0}\": must be non-empty and contain no whitespace")]
    InvalidProductId(String),

    #[error("unknown feed type: {0}")]
    UnknownFeedType(String),

    #[error("unknown job status: {0}")]
    UnknownJobStatus(String),
}

/// Opaque identifier of a crawlable product (the site's SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(String);

impl ProductId {
    /// Validates and wraps a raw product identifier. Surrounding whitespace is
    /// trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidProductId`] if the trimmed value is empty or
    /// contains interior whitespace.
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidProductId(raw));
        }
        Ok(Self(trimmed.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProductId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProductId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProductId> for String {
    fn from(value: ProductId) -> Self {
        value.0
    }
}

/// The paginated feeds a product exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Reviews,
    Qa,
}

impl FeedType {
    pub const ALL: [FeedType; 2] = [FeedType::Reviews, FeedType::Qa];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FeedType::Reviews => "reviews",
            FeedType::Qa => "qa",
        }
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reviews" | "review" | "comments" => Ok(FeedType::Reviews),
            "qa" | "questions" => Ok(FeedType::Qa),
            other => Err(CoreError::UnknownFeedType(other.to_owned())),
        }
    }
}

/// One unit of crawl work: a product crossed with a feed type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pair {
    pub product_id: ProductId,
    pub feed_type: FeedType,
}

impl Pair {
    #[must_use]
    pub fn new(product_id: ProductId, feed_type: FeedType) -> Self {
        Self {
            product_id,
            feed_type,
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.product_id, self.feed_type)
    }
}

/// Durable pointer to the next unfetched page of a pair.
///
/// `next_page_index` never decreases over the cursor's lifetime. A cursor
/// that has never been advanced has `last_updated_at == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub product_id: ProductId,
    pub feed_type: FeedType,
    pub next_page_index: u32,
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl Cursor {
    /// A zero cursor for a pair that has never been crawled.
    #[must_use]
    pub fn fresh(product_id: ProductId, feed_type: FeedType) -> Self {
        Self {
            product_id,
            feed_type,
            next_page_index: 0,
            last_updated_at: None,
        }
    }
}

/// Feed-specific fields carried alongside the common record columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordDetail {
    Review {
        author: Option<String>,
        score: Option<u8>,
        location: Option<String>,
        product_name: Option<String>,
    },
    /// One answer to a question, or the bare question when it has no answers
    /// (`answer_id == None`).
    Answer {
        question_id: String,
        question_content: String,
        question_created: String,
        answer_id: Option<String>,
        location: Option<String>,
    },
}

/// A single review or QA entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub product_id: ProductId,
    pub feed_type: FeedType,
    pub external_record_id: String,
    pub content: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub detail: RecordDetail,
}

impl Record {
    /// The dedup identity of this record.
    #[must_use]
    pub fn identity(&self) -> (&ProductId, &str) {
        (&self.product_id, self.external_record_id.as_str())
    }
}

/// One fetched page of a product feed. Transient: produced by the paginator,
/// consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub product_id: ProductId,
    pub feed_type: FeedType,
    pub page_index: u32,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    Failed(String),
}

impl JobStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Done => "done",
            JobStatus::Failed(_) => "failed",
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, JobStatus::Done)
    }

    /// The failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            JobStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Rebuilds a status from its stored `(status, reason)` columns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownJobStatus`] for an unrecognised status string.
    pub fn from_parts(status: &str, reason: Option<&str>) -> Result<Self, CoreError> {
        match status {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed(reason.unwrap_or_default().to_owned())),
            other => Err(CoreError::UnknownJobStatus(other.to_owned())),
        }
    }

    /// Whether a job in this status may move to `next`.
    ///
    /// Failed jobs stay resumable: they re-enter `Pending` (or go straight to
    /// `InProgress` when a new run picks them up). `InProgress` may fall back
    /// to `Pending` when a pair is paused or stopped mid-feed.
    #[must_use]
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending | JobStatus::Failed(_), JobStatus::InProgress)
                | (
                    JobStatus::InProgress,
                    JobStatus::Done | JobStatus::Failed(_) | JobStatus::Pending
                )
                | (JobStatus::Failed(_), JobStatus::Pending)
                | (JobStatus::InProgress, JobStatus::InProgress)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Crawl bookkeeping for one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    pub product_id: ProductId,
    pub feed_type: FeedType,
    pub status: JobStatus,
}
