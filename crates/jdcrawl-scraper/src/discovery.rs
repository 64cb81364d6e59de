//! Keyword search → product ID discovery.
//!
//! Discovery walks a keyword's search result pages with a [`Paginator`] and
//! folds every SKU into a set. Persisting the set is delegated to an
//! [`IdSink`], which must treat writes as a set union: running discovery
//! twice for the same keyword never loses IDs found the first time.

use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::future::Future;

use jdcrawl_core::ProductId;
use thiserror::Error;

use crate::error::CrawlError;
use crate::pagination::{Pacing, Paginator};
use crate::source::{SearchFetcher, SearchSource};

/// Durable storage for discovered product IDs.
pub trait IdSink {
    type Error: StdError + Send + Sync + 'static;

    /// Merges `ids` into the set already stored for `keyword` and returns the
    /// number of IDs that were not stored before.
    fn persist(
        &self,
        keyword: &str,
        ids: &BTreeSet<ProductId>,
    ) -> impl Future<Output = Result<usize, Self::Error>>;
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("search for \"{keyword}\" failed: {source}")]
    Crawl {
        keyword: String,
        #[source]
        source: CrawlError,
    },

    #[error("failed to persist ids for \"{keyword}\": {source}")]
    Store {
        keyword: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Outcome of discovering one keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub keyword: String,
    pub ids: BTreeSet<ProductId>,
    pub pages_fetched: u32,
    /// IDs newly added to the sink; `0` when nothing was persisted.
    pub newly_stored: usize,
    /// Set when a later page failed and the result set is partial.
    pub truncated: Option<String>,
}

pub struct DiscoveryEngine<F> {
    fetcher: F,
    page_cap: u32,
    pacing: Pacing,
}

impl<F: SearchFetcher> DiscoveryEngine<F> {
    #[must_use]
    pub fn new(fetcher: F, page_cap: u32) -> Self {
        Self {
            fetcher,
            page_cap,
            pacing: Pacing::none(),
        }
    }

    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Collects the set of product IDs listed for `keyword`.
    ///
    /// A failure on the first page is an error. A failure on a later page
    /// keeps what was collected so far and records the reason in
    /// [`DiscoveryReport::truncated`].
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Crawl`] if the first page cannot be fetched.
    pub async fn discover(&self, keyword: &str) -> Result<DiscoveryReport, DiscoveryError> {
        let source = SearchSource::new(&self.fetcher, keyword);
        let mut paginator = Paginator::new(source, 0, self.page_cap).with_pacing(self.pacing);

        let mut ids = BTreeSet::new();
        let mut pages_fetched = 0u32;
        let mut truncated = None;

        while let Some(page) = paginator.next_page().await {
            match page {
                Ok(page) => {
                    pages_fetched += 1;
                    ids.extend(page.items.into_iter().map(|hit| hit.product_id));
                }
                Err(source) if pages_fetched == 0 => {
                    return Err(DiscoveryError::Crawl {
                        keyword: keyword.to_owned(),
                        source,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        keyword,
                        pages_fetched,
                        error = %err,
                        "search pagination failed, keeping partial results"
                    );
                    truncated = Some(err.to_string());
                }
            }
        }

        tracing::info!(keyword, pages_fetched, ids = ids.len(), "keyword discovery finished");

        Ok(DiscoveryReport {
            keyword: keyword.to_owned(),
            ids,
            pages_fetched,
            newly_stored: 0,
            truncated,
        })
    }

    /// Discovers `keyword` and merges the result into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Crawl`] as for [`Self::discover`], or
    /// [`DiscoveryError::Store`] if the sink write fails.
    pub async fn discover_into<S: IdSink>(
        &self,
        keyword: &str,
        sink: &S,
    ) -> Result<DiscoveryReport, DiscoveryError> {
        let mut report = self.discover(keyword).await?;
        report.newly_stored =
            sink.persist(keyword, &report.ids)
                .await
                .map_err(|e| DiscoveryError::Store {
                    keyword: keyword.to_owned(),
                    source: Box::new(e),
                })?;
        Ok(report)
    }
}
