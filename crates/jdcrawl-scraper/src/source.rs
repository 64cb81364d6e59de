//! Fetcher traits at the seam between the HTTP client and the crawl logic,
//! plus adapters that turn a fetcher into a [`PageSource`] for one feed.

use std::future::Future;

use jdcrawl_core::{FeedType, ProductId, Record};

use crate::error::CrawlError;
use crate::pagination::{FetchedPage, PageSource};
use crate::types::SearchHit;

/// Fetches pages of a product feed. Implemented by
/// [`JdClient`](crate::JdClient); tests substitute scripted fakes.
pub trait FeedFetcher {
    fn fetch_feed_page(
        &self,
        product_id: &ProductId,
        feed_type: FeedType,
        page_index: u32,
    ) -> impl Future<Output = Result<FetchedPage<Record>, CrawlError>>;
}

/// Fetches pages of keyword search results.
pub trait SearchFetcher {
    fn fetch_search_page(
        &self,
        keyword: &str,
        page_index: u32,
    ) -> impl Future<Output = Result<FetchedPage<SearchHit>, CrawlError>>;
}

impl<T: FeedFetcher> FeedFetcher for &T {
    fn fetch_feed_page(
        &self,
        product_id: &ProductId,
        feed_type: FeedType,
        page_index: u32,
    ) -> impl Future<Output = Result<FetchedPage<Record>, CrawlError>> {
        (**self).fetch_feed_page(product_id, feed_type, page_index)
    }
}

impl<T: SearchFetcher> SearchFetcher for &T {
    fn fetch_search_page(
        &self,
        keyword: &str,
        page_index: u32,
    ) -> impl Future<Output = Result<FetchedPage<SearchHit>, CrawlError>> {
        (**self).fetch_search_page(keyword, page_index)
    }
}

/// One product feed viewed as a [`PageSource`].
pub struct FeedSource<'a, F> {
    fetcher: &'a F,
    product_id: &'a ProductId,
    feed_type: FeedType,
}

impl<'a, F: FeedFetcher> FeedSource<'a, F> {
    #[must_use]
    pub fn new(fetcher: &'a F, product_id: &'a ProductId, feed_type: FeedType) -> Self {
        Self {
            fetcher,
            product_id,
            feed_type,
        }
    }
}

impl<F: FeedFetcher> PageSource for FeedSource<'_, F> {
    type Item = Record;

    fn fetch_page(
        &self,
        page_index: u32,
    ) -> impl Future<Output = Result<FetchedPage<Record>, CrawlError>> {
        self.fetcher
            .fetch_feed_page(self.product_id, self.feed_type, page_index)
    }
}

/// Search results for one keyword viewed as a [`PageSource`].
pub struct SearchSource<'a, F> {
    fetcher: &'a F,
    keyword: &'a str,
}

impl<'a, F: SearchFetcher> SearchSource<'a, F> {
    #[must_use]
    pub fn new(fetcher: &'a F, keyword: &'a str) -> Self {
        Self { fetcher, keyword }
    }
}

impl<F: SearchFetcher> PageSource for SearchSource<'_, F> {
    type Item = SearchHit;

    fn fetch_page(
        &self,
        page_index: u32,
    ) -> impl Future<Output = Result<FetchedPage<SearchHit>, CrawlError>> {
        self.fetcher.fetch_search_page(self.keyword, page_index)
    }
}
