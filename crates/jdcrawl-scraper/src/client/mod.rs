//! HTTP client for the JD review, QA, and keyword search endpoints.

mod urls;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use jdcrawl_core::{AppConfig, FeedType, ProductId, Record};

use crate::auth::ConfiguredAuthenticator;
use crate::error::CrawlError;
use crate::pagination::FetchedPage;
use crate::parse::{parse_qa_page, parse_review_page, parse_search_page, parse_search_tail};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::session::{Authenticator, PageRequest, SessionManager};
use crate::source::{FeedFetcher, SearchFetcher};
use crate::types::SearchHit;

/// Base URLs of the two hosts the crawler talks to. Overridable so tests can
/// point the client at a local mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base: String,
    pub search_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: "https://api.m.jd.com".to_owned(),
            search_base: "https://search.jd.com".to_owned(),
        }
    }
}

/// Query parameters of the review endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewParams {
    /// 0 all, 1 negative, 2 neutral, 3 positive.
    pub score: u8,
    /// 5 recommended, 6 newest first.
    pub sort_type: u8,
    pub page_size: u32,
}

impl Default for ReviewParams {
    fn default() -> Self {
        Self {
            score: 0,
            sort_type: 6,
            page_size: 10,
        }
    }
}

/// Fetches and parses pages through a shared [`SessionManager`].
///
/// Every request goes through [`retry_with_backoff`]; an expired session is
/// refreshed once for all workers before the failed request is retried.
/// Parsing happens after the retry loop, so a malformed body is reported as
/// a schema error instead of being re-requested.
pub struct JdClient<A> {
    session: SessionManager<A>,
    policy: RetryPolicy,
    endpoints: Endpoints,
    review_params: ReviewParams,
}

impl JdClient<ConfiguredAuthenticator> {
    /// Builds a client from application configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn from_config(config: &AppConfig) -> Result<Self, CrawlError> {
        let authenticator = ConfiguredAuthenticator::from_config(config);
        tracing::debug!(auth = authenticator.describe(), "building JD client");
        let session = SessionManager::new(
            authenticator,
            config.user_agents.clone(),
            config.request_timeout_secs,
        )?;
        Ok(Self::new(session, RetryPolicy::from_settings(&config.retry))
            .with_endpoints(Endpoints {
                api_base: config.api_base_url.clone(),
                search_base: config.search_base_url.clone(),
            })
            .with_review_params(ReviewParams {
                score: config.review_score,
                sort_type: config.review_sort,
                page_size: config.review_page_size,
            }))
    }
}

impl<A: Authenticator> JdClient<A> {
    #[must_use]
    pub fn new(session: SessionManager<A>, policy: RetryPolicy) -> Self {
        Self {
            session,
            policy,
            endpoints: Endpoints::default(),
            review_params: ReviewParams::default(),
        }
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    #[must_use]
    pub fn with_review_params(mut self, review_params: ReviewParams) -> Self {
        self.review_params = review_params;
        self
    }

    #[must_use]
    pub fn session(&self) -> &SessionManager<A> {
        &self.session
    }

    /// Issues `request` with retries and returns the response body.
    ///
    /// # Errors
    ///
    /// - [`CrawlError::Exhausted`]: every attempt failed with a transient error.
    /// - [`CrawlError::AuthRequired`]: the session could not be refreshed.
    /// - any non-retriable error from the first attempt that hit it.
    pub async fn get_text(&self, request: &PageRequest) -> Result<String, CrawlError> {
        let observed_generation = AtomicU64::new(0);

        retry_with_backoff(
            &self.policy,
            |attempt| {
                let observed_generation = &observed_generation;
                async move {
                    let handle = self.session.acquire().await?;
                    observed_generation.store(handle.generation(), Ordering::SeqCst);
                    tracing::debug!(attempt, url = %request.url, "requesting page");
                    handle.execute(request).await
                }
            },
            || {
                self.session
                    .reauthenticate(observed_generation.load(Ordering::SeqCst))
            },
        )
        .await
    }

    /// Fetches one page of a product's reviews.
    ///
    /// # Errors
    ///
    /// See [`Self::get_text`]; parse failures surface as
    /// [`CrawlError::Schema`] or [`CrawlError::Deserialize`].
    pub async fn fetch_reviews_page(
        &self,
        product_id: &ProductId,
        page_index: u32,
    ) -> Result<FetchedPage<Record>, CrawlError> {
        let url = urls::review_url(&self.endpoints, &self.review_params, product_id, page_index)?;
        let request = PageRequest::new(url).with_referer(urls::item_referer(product_id));
        let body = self.get_text(&request).await?;
        let page = parse_review_page(product_id, page_index, &body)?;
        tracing::info!(
            product_id = %product_id,
            page_index,
            records = page.items.len(),
            "fetched reviews page"
        );
        Ok(page)
    }

    /// Fetches one page of a product's questions and answers.
    ///
    /// # Errors
    ///
    /// See [`Self::fetch_reviews_page`].
    pub async fn fetch_qa_page(
        &self,
        product_id: &ProductId,
        page_index: u32,
    ) -> Result<FetchedPage<Record>, CrawlError> {
        let url = urls::qa_url(&self.endpoints, product_id, page_index)?;
        let request = PageRequest::new(url).with_referer(urls::item_referer(product_id));
        let body = self.get_text(&request).await?;
        let page = parse_qa_page(product_id, page_index, &body)?;
        tracing::info!(
            product_id = %product_id,
            page_index,
            records = page.items.len(),
            "fetched qa page"
        );
        Ok(page)
    }

    /// Fetches one page of keyword search results: the first half-page, and
    /// the lazily loaded second half when the first one had hits. Hits are
    /// merged in page order with repeated SKUs dropped.
    ///
    /// # Errors
    ///
    /// See [`Self::fetch_reviews_page`].
    pub async fn fetch_search_results(
        &self,
        keyword: &str,
        page_index: u32,
    ) -> Result<FetchedPage<SearchHit>, CrawlError> {
        let url = urls::search_url(&self.endpoints, keyword, page_index)?;
        let request = PageRequest::new(url.clone());
        let body = self.get_text(&request).await?;
        let mut page = parse_search_page(page_index, &body)?;

        if !page.items.is_empty() {
            let tail_url = urls::search_tail_url(&self.endpoints, keyword, page_index)?;
            let tail_request = PageRequest::new(tail_url).with_referer(url);
            let tail_body = self.get_text(&tail_request).await?;
            let mut seen: HashSet<ProductId> =
                page.items.iter().map(|h| h.product_id.clone()).collect();
            let tail: Vec<SearchHit> = parse_search_tail(&tail_body)
                .into_iter()
                .filter(|hit| seen.insert(hit.product_id.clone()))
                .collect();
            tracing::debug!(keyword, page_index, hits = tail.len(), "fetched search tail");
            page.items.extend(tail);
        }

        tracing::info!(
            keyword,
            page_index,
            hits = page.items.len(),
            "fetched search page"
        );
        Ok(page)
    }
}

impl<A: Authenticator> FeedFetcher for JdClient<A> {
    async fn fetch_feed_page(
        &self,
        product_id: &ProductId,
        feed_type: FeedType,
        page_index: u32,
    ) -> Result<FetchedPage<Record>, CrawlError> {
        match feed_type {
            FeedType::Reviews => self.fetch_reviews_page(product_id, page_index).await,
            FeedType::Qa => self.fetch_qa_page(product_id, page_index).await,
        }
    }
}

impl<A: Authenticator> SearchFetcher for JdClient<A> {
    async fn fetch_search_page(
        &self,
        keyword: &str,
        page_index: u32,
    ) -> Result<FetchedPage<SearchHit>, CrawlError> {
        self.fetch_search_results(keyword, page_index).await
    }
}
