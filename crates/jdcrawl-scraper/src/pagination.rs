//! Lazy, resumable pagination over a single feed.
//!
//! A [`Paginator`] walks page indexes `start, start + 1, ...` of one
//! [`PageSource`] and stops at the first of:
//!
//! - a page the source marks as the last one,
//! - an empty page,
//! - the page cap (indexes `>= cap` are never requested),
//! - an error, which is yielded once before the paginator goes quiet.
//!
//! Pages are only fetched when the caller asks for the next one, so a caller
//! can persist each page before the following request is issued.

use std::future::Future;
use std::time::Duration;


use crate::error::CrawlError;

/// What a [`PageSource`] returns for one page index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage<T> {
    pub items: Vec<T>,
    /// The response explicitly said no further pages exist.
    pub last_page: bool,
}

impl<T> FetchedPage<T> {
    #[must_use]
    pub fn more(items: Vec<T>) -> Self {
        Self {
            items,
            last_page: false,
        }
    }

    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            last_page: true,
        }
    }
}

/// Anything that can fetch a page of items by 0-based index.
pub trait PageSource {
    type Item;

    fn fetch_page(
        &self,
        page_index: u32,
    ) -> impl Future<Output = Result<FetchedPage<Self::Item>, CrawlError>>;
}

/// A page handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage<T> {
    pub page_index: u32,
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginatorState {
    /// Nothing fetched yet; the first request will be for this index.
    Start(u32),
    /// At least one page fetched; the next request will be for this index.
    HasMore(u32),
    EndOfFeed,
    Failed,
}

impl PaginatorState {
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, PaginatorState::EndOfFeed | PaginatorState::Failed)
    }
}

/// Delay between consecutive page requests: `base` plus a uniform random
/// amount in `[0, jitter]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pacing {
    pub base: Duration,
    pub jitter: Duration,
}

impl Pacing {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_millis(base_ms: u64, jitter_ms: u64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            jitter: Duration::from_millis(jitter_ms),
        }
    }

    #[must_use]
    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        self.base + self.jitter.mul_f64(rand::random::<f64>())
    }

    pub async fn wait(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

pub struct Paginator<S> {
    source: S,
    state: PaginatorState,
    page_cap: u32,
    pacing: Pacing,
}

impl<S: PageSource> Paginator<S> {
    /// Starts at `start_index` (a cursor's `next_page_index`). `page_cap` is
    /// the number of page indexes the feed may ever use.
    #[must_use]
    pub fn new(source: S, start_index: u32, page_cap: u32) -> Self {
        let state = if start_index >= page_cap {
            PaginatorState::EndOfFeed
        } else {
            PaginatorState::Start(start_index)
        };
        Self {
            source,
            state,
            page_cap,
            pacing: Pacing::none(),
        }
    }

    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    #[must_use]
    pub fn state(&self) -> PaginatorState {
        self.state
    }

    /// Fetches the next page.
    ///
    /// Returns `None` once the feed has ended or after an error has been
    /// returned.
    pub async fn next_page(&mut self) -> Option<Result<FeedPage<S::Item>, CrawlError>> {
        let index = match self.state {
            PaginatorState::Start(index) => index,
            PaginatorState::HasMore(index) => {
                self.pacing.wait().await;
                index
            }
            PaginatorState::EndOfFeed | PaginatorState::Failed => return None,
        };

        let fetched = match self.source.fetch_page(index).await {
            Ok(fetched) => fetched,
            Err(err) => {
                self.state = PaginatorState::Failed;
                return Some(Err(err));
            }
        };

        if fetched.items.is_empty() {
            tracing::debug!(page_index = index, "empty page, feed ended");
            self.state = PaginatorState::EndOfFeed;
            return None;
        }

        let next = index.saturating_add(1);
        self.state = if fetched.last_page || next >= self.page_cap {
            PaginatorState::EndOfFeed
        } else {
            PaginatorState::HasMore(next)
        };

        Some(Ok(FeedPage {
            page_index: index,
            items: fetched.items,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    async fn drain<S: PageSource>(
        mut paginator: Paginator<S>,
    ) -> Vec<Result<FeedPage<S::Item>, CrawlError>> {
        let mut pages = Vec::new();
        while let Some(page) = paginator.next_page().await {
            pages.push(page);
        }
        pages
    }

    /// Serves `pages[i]` for index `i`, empty past the end.
    struct ScriptedSource {
        pages: Vec<Vec<u32>>,
        explicit_end: bool,
        fail_at: Option<u32>,
        requested: RefCell<Vec<u32>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Vec<u32>>) -> Self {
            Self {
                pages,
                explicit_end: false,
                fail_at: None,
                requested: RefCell::new(Vec::new()),
            }
        }
    }

    impl PageSource for &ScriptedSource {
        type Item = u32;

        async fn fetch_page(&self, page_index: u32) -> Result<FetchedPage<u32>, CrawlError> {
            self.requested.borrow_mut().push(page_index);
            if self.fail_at == Some(page_index) {
                return Err(CrawlError::schema("test", "boom"));
            }
            let idx = page_index as usize;
            let items = self.pages.get(idx).cloned().unwrap_or_default();
            let last = self.explicit_end && idx + 1 == self.pages.len();
            Ok(FetchedPage {
                items,
                last_page: last,
            })
        }
    }

    #[tokio::test]
    async fn stops_on_empty_page() {
        let source = ScriptedSource::new(vec![vec![1, 2], vec![3]]);
        let pages = drain(Paginator::new(&source, 0, 100)).await;

        assert_eq!(pages.len(), 2);
        assert_eq!(*source.requested.borrow(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn explicit_last_page_avoids_extra_request() {
        let mut source = ScriptedSource::new(vec![vec![1], vec![2], vec![3]]);
        source.explicit_end = true;
        let mut paginator = Paginator::new(&source, 0, 100);

        let mut indexes = Vec::new();
        while let Some(page) = paginator.next_page().await {
            indexes.push(page.unwrap().page_index);
        }

        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(*source.requested.borrow(), vec![0, 1, 2]);
        assert_eq!(paginator.state(), PaginatorState::EndOfFeed);
    }

    #[tokio::test]
    async fn never_requests_pages_at_or_past_cap() {
        let source = ScriptedSource::new(vec![vec![1]; 50]);
        let pages: Vec<_> = drain(Paginator::new(&source, 0, 5)).await;

        assert_eq!(pages.len(), 5);
        assert_eq!(*source.requested.borrow(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn resumes_from_start_index() {
        let source = ScriptedSource::new(vec![vec![1], vec![2], vec![3]]);
        let mut paginator = Paginator::new(&source, 1, 100);

        let first = paginator.next_page().await.unwrap().unwrap();
        assert_eq!(first.page_index, 1);
        assert_eq!(first.items, vec![2]);
        assert_eq!(source.requested.borrow()[0], 1);
    }

    #[tokio::test]
    async fn start_at_cap_fetches_nothing() {
        let source = ScriptedSource::new(vec![vec![1]]);
        let mut paginator = Paginator::new(&source, 5, 5);

        assert!(paginator.next_page().await.is_none());
        assert!(source.requested.borrow().is_empty());
    }

    #[tokio::test]
    async fn error_is_yielded_once_then_stream_ends() {
        let mut source = ScriptedSource::new(vec![vec![1], vec![2], vec![3]]);
        source.fail_at = Some(1);
        let mut paginator = Paginator::new(&source, 0, 100);

        assert!(paginator.next_page().await.unwrap().is_ok());
        assert!(paginator.next_page().await.unwrap().is_err());
        assert!(paginator.next_page().await.is_none());
        assert_eq!(paginator.state(), PaginatorState::Failed);
        assert_eq!(*source.requested.borrow(), vec![0, 1]);
    }

    #[test]
    fn pacing_jitter_is_bounded() {
        let pacing = Pacing::from_millis(3_000, 2_000);
        for _ in 0..100 {
            let d = pacing.next_delay();
            assert!(d >= Duration::from_millis(3_000) && d <= Duration::from_millis(5_000));
        }
        assert_eq!(Pacing::none().next_delay(), Duration::ZERO);
    }
}
