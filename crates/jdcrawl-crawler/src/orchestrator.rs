//! The crawl driver.
//!
//! [`Orchestrator::run`] crosses product IDs with feed types into pairs and
//! crawls every pair that is not already done, several at a time. For each
//! page of a pair the records are written to the sink first and the cursor
//! is advanced second, so a crash between the two re-fetches at most that
//! one page and the sink drops its duplicates.
//!
//! Failure handling per pair:
//!
//! | page fetch result                 | job status after | run continues |
//! |-----------------------------------|------------------|---------------|
//! | end of feed                       | done             | yes           |
//! | exhausted / schema / fatal / sink | failed(reason)   | yes           |
//! | authentication required           | pending (paused) | yes           |
//! | stop requested                    | pending          | yes, winding down |
//! | stale cursor advance              | in progress      | no, run aborts |

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, StreamExt};
use jdcrawl_core::{AppConfig, CrawlJob, FeedType, JobStatus, Page, Pair, ProductId, Record};
use jdcrawl_db::RunTotals;
use jdcrawl_scraper::{ErrorKind, FeedFetcher, FeedSource, Pacing, PageSource, Paginator};
use sqlx::SqlitePool;

use crate::error::OrchestratorError;
use crate::locks::PairLocks;
use crate::sink::RecordSink;
use crate::stop::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub max_concurrent_pairs: usize,
    pub review_page_cap: u32,
    pub qa_page_cap: u32,
    pub pacing: Pacing,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pairs: 3,
            review_page_cap: 100,
            qa_page_cap: 50,
            pacing: Pacing::none(),
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_concurrent_pairs: config.max_concurrent_pairs.max(1),
            review_page_cap: config.review_page_cap,
            qa_page_cap: config.qa_page_cap,
            pacing: Pacing::from_millis(
                config.inter_request_delay_ms,
                config.inter_request_jitter_ms,
            ),
        }
    }

    #[must_use]
    pub fn page_cap(&self, feed_type: FeedType) -> u32 {
        match feed_type {
            FeedType::Reviews => self.review_page_cap,
            FeedType::Qa => self.qa_page_cap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    /// Reached end of feed during this run.
    Done,
    /// Already done before this run started; nothing fetched.
    AlreadyDone,
    Failed(String),
    /// Waiting for an operator to re-authenticate the session.
    Paused(String),
    /// Stopped by the stop signal; resumes on the next run.
    Stopped,
    /// Another worker holds the pair.
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairReport {
    pub pair: Pair,
    pub outcome: PairOutcome,
    pub pages_fetched: u32,
    /// Records newly written to the sink; replayed duplicates are not counted.
    pub records_written: usize,
}

impl PairReport {
    fn new(pair: Pair) -> Self {
        Self {
            pair,
            outcome: PairOutcome::Stopped,
            pages_fetched: 0,
            records_written: 0,
        }
    }

    fn finish(mut self, outcome: PairOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Option<i64>,
    pub reports: Vec<PairReport>,
}

impl RunSummary {
    fn count(&self, predicate: impl Fn(&PairOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| predicate(&r.outcome)).count()
    }

    #[must_use]
    pub fn done(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Done | PairOutcome::AlreadyDone))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Failed(_)))
    }

    #[must_use]
    pub fn paused(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Paused(_)))
    }

    #[must_use]
    pub fn stopped(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Stopped | PairOutcome::Busy))
    }

    #[must_use]
    pub fn records_written(&self) -> usize {
        self.reports.iter().map(|r| r.records_written).sum()
    }

    #[must_use]
    pub fn report(&self, pair: &Pair) -> Option<&PairReport> {
        self.reports.iter().find(|r| &r.pair == pair)
    }

    #[must_use]
    pub fn totals(&self) -> RunTotals {
        let as_i64 = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        RunTotals {
            pairs_total: as_i64(self.reports.len()),
            pairs_done: as_i64(self.done()),
            pairs_failed: as_i64(self.failed()),
            pairs_paused: as_i64(self.paused()),
            records_emitted: as_i64(self.records_written()),
        }
    }
}

pub struct Orchestrator<'a, F, S> {
    fetcher: &'a F,
    pool: &'a SqlitePool,
    sink: &'a S,
    config: OrchestratorConfig,
    locks: PairLocks,
    stop: StopSignal,
    aborted: AtomicBool,
}

impl<'a, F: FeedFetcher, S: RecordSink> Orchestrator<'a, F, S> {
    #[must_use]
    pub fn new(fetcher: &'a F, pool: &'a SqlitePool, sink: &'a S, config: OrchestratorConfig) -> Self {
        Self {
            fetcher,
            pool,
            sink,
            config,
            locks: PairLocks::new(),
            stop: StopSignal::new(),
            aborted: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub fn with_locks(mut self, locks: PairLocks) -> Self {
        self.locks = locks;
        self
    }

    fn should_halt(&self) -> bool {
        self.stop.is_triggered() || self.aborted.load(Ordering::SeqCst)
    }

    /// Crawls every `(product, feed)` pair that is not already done, recording
    /// the invocation as a crawl run started by `trigger_source`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::StaleAdvance`] if a cursor advance is
    /// rejected, or [`OrchestratorError::Db`] if job or run bookkeeping
    /// cannot be written. Per-pair crawl failures are not errors; they are
    /// reported in the returned [`RunSummary`].
    pub async fn run(
        &self,
        product_ids: &[ProductId],
        feed_types: &[FeedType],
        trigger_source: &str,
    ) -> Result<RunSummary, OrchestratorError> {
        self.aborted.store(false, Ordering::SeqCst);
        let pairs = expand_pairs(product_ids, feed_types);
        jdcrawl_db::enqueue_jobs(self.pool, &pairs).await?;

        let run = jdcrawl_db::create_crawl_run(self.pool, trigger_source).await?;
        jdcrawl_db::start_crawl_run(self.pool, run.id).await?;
        tracing::info!(
            run_id = run.id,
            pairs = pairs.len(),
            max_concurrent = self.config.max_concurrent_pairs,
            "crawl run started"
        );

        let max_concurrent = self.config.max_concurrent_pairs.max(1);
        let mut results = stream::iter(pairs)
            .map(|pair| self.crawl_pair(pair))
            .buffer_unordered(max_concurrent);

        let mut summary = RunSummary {
            run_id: Some(run.id),
            reports: Vec::new(),
        };
        let mut first_error: Option<OrchestratorError> = None;

        while let Some(result) = results.next().await {
            match result {
                Ok(report) => summary.reports.push(report),
                Err(err) => {
                    tracing::error!(run_id = run.id, error = %err, "aborting crawl run");
                    self.aborted.store(true, Ordering::SeqCst);
                    first_error.get_or_insert(err);
                }
            }
        }
        drop(results);
        summary.reports.sort_by(|a, b| a.pair.cmp(&b.pair));

        if let Some(err) = first_error {
            fail_run_best_effort(self.pool, run.id, &err.to_string()).await;
            return Err(err);
        }

        if let Err(err) = jdcrawl_db::complete_crawl_run(self.pool, run.id, summary.totals()).await
        {
            fail_run_best_effort(self.pool, run.id, &err.to_string()).await;
            return Err(err.into());
        }

        if summary.paused() > 0 {
            tracing::warn!(
                run_id = run.id,
                paused = summary.paused(),
                "pairs paused waiting for authentication; re-run after logging in"
            );
        }
        tracing::info!(
            run_id = run.id,
            done = summary.done(),
            failed = summary.failed(),
            paused = summary.paused(),
            stopped = summary.stopped(),
            records = summary.records_written(),
            "crawl run finished"
        );
        Ok(summary)
    }

    async fn crawl_pair(&self, pair: Pair) -> Result<PairReport, OrchestratorError> {
        let report = PairReport::new(pair.clone());
        if self.should_halt() {
            return Ok(report.finish(PairOutcome::Stopped));
        }

        let Some(_guard) = self.locks.try_claim(&pair) else {
            tracing::warn!(pair = %pair, "pair is held by another worker, skipping");
            return Ok(report.finish(PairOutcome::Busy));
        };

        if let Some(row) = jdcrawl_db::get_job(self.pool, &pair).await? {
            let job = CrawlJob::try_from(&row)?;
            if job.status.is_done() {
                tracing::debug!(pair = %pair, "pair already done");
                return Ok(report.finish(PairOutcome::AlreadyDone));
            }
            if let JobStatus::Failed(reason) = &job.status {
                tracing::info!(
                    pair = %pair,
                    previous_failure = %reason,
                    attempts = row.attempts,
                    "retrying failed pair"
                );
            }
        }

        jdcrawl_db::mark_job(self.pool, &pair, &JobStatus::InProgress).await?;
        let cursor = jdcrawl_db::get_cursor(self.pool, &pair).await?;
        let page_cap = self.config.page_cap(pair.feed_type);
        tracing::info!(
            pair = %pair,
            start_page = cursor.next_page_index,
            page_cap,
            "crawling pair"
        );

        let source = FeedSource::new(self.fetcher, &pair.product_id, pair.feed_type);
        let mut paginator =
            Paginator::new(source, cursor.next_page_index, page_cap).with_pacing(self.config.pacing);

        let result = self
            .drive(&pair, &mut paginator, cursor.next_page_index, report)
            .await;
        self.sink.release(&pair);
        result
    }

    async fn drive<P>(
        &self,
        pair: &Pair,
        paginator: &mut Paginator<P>,
        start_index: u32,
        mut report: PairReport,
    ) -> Result<PairReport, OrchestratorError>
    where
        P: PageSource<Item = Record>,
    {
        loop {
            if self.should_halt() {
                jdcrawl_db::mark_job(self.pool, pair, &JobStatus::Pending).await?;
                tracing::warn!(pair = %pair, pages = report.pages_fetched, "pair stopped, will resume");
                return Ok(report.finish(PairOutcome::Stopped));
            }

            let page = match paginator.next_page().await {
                None => {
                    jdcrawl_db::mark_job(self.pool, pair, &JobStatus::Done).await?;
                    tracing::info!(
                        pair = %pair,
                        pages = report.pages_fetched,
                        records = report.records_written,
                        "pair done"
                    );
                    return Ok(report.finish(PairOutcome::Done));
                }
                Some(Ok(page)) => page,
                Some(Err(err)) => {
                    if err.kind() == ErrorKind::AuthRequired {
                        let reason = err.to_string();
                        jdcrawl_db::mark_job(self.pool, pair, &JobStatus::Pending).await?;
                        tracing::warn!(pair = %pair, reason = %reason, "authentication required, pausing pair");
                        return Ok(report.finish(PairOutcome::Paused(reason)));
                    }
                    let page_index = start_index + report.pages_fetched;
                    let reason = format!("page {page_index}: {err}");
                    jdcrawl_db::mark_job(self.pool, pair, &JobStatus::Failed(reason.clone()))
                        .await?;
                    tracing::error!(
                        product_id = %pair.product_id,
                        feed_type = %pair.feed_type,
                        page_index,
                        kind = ?err.kind(),
                        error = %err,
                        "pair failed"
                    );
                    return Ok(report.finish(PairOutcome::Failed(reason)));
                }
            };

            let page = Page {
                product_id: pair.product_id.clone(),
                feed_type: pair.feed_type,
                page_index: page.page_index,
                records: page.items,
            };

            let written = match self.sink.append(&page).await {
                Ok(written) => written,
                Err(err) => {
                    let reason = format!("page {}: record sink: {err}", page.page_index);
                    jdcrawl_db::mark_job(self.pool, pair, &JobStatus::Failed(reason.clone()))
                        .await?;
                    tracing::error!(pair = %pair, page_index = page.page_index, error = %err, "failed to write records");
                    return Ok(report.finish(PairOutcome::Failed(reason)));
                }
            };

            jdcrawl_db::advance_cursor(self.pool, pair, page.page_index).await?;
            report.pages_fetched += 1;
            report.records_written += written;
            tracing::debug!(
                pair = %pair,
                page_index = page.page_index,
                records = page.records.len(),
                written,
                "page checkpointed"
            );
        }
    }
}

/// Crosses products with feeds, dropping duplicates. The result is sorted so
/// runs schedule pairs in a stable order.
fn expand_pairs(product_ids: &[ProductId], feed_types: &[FeedType]) -> Vec<Pair> {
    let pairs: BTreeSet<Pair> = product_ids
        .iter()
        .flat_map(|id| feed_types.iter().map(|feed| Pair::new(id.clone(), *feed)))
        .collect();
    pairs.into_iter().collect()
}

async fn fail_run_best_effort(pool: &SqlitePool, run_id: i64, message: &str) {
    if let Err(err) = jdcrawl_db::fail_crawl_run(pool, run_id, message).await {
        tracing::error!(run_id, error = %err, "failed to mark crawl run as failed");
    }
}
