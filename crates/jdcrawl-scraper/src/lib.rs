pub mod auth;
pub mod client;
pub mod discovery;
pub mod error;
pub mod pagination;
pub mod parse;
pub mod retry;
pub mod session;
pub mod source;
pub mod types;

pub use auth::{
    AnonymousAuthenticator, ConfiguredAuthenticator, CookieFileAuthenticator,
    StaticCookieAuthenticator,
};
pub use client::{Endpoints, JdClient, ReviewParams};
pub use discovery::{DiscoveryEngine, DiscoveryError, DiscoveryReport, IdSink};
pub use error::{CrawlError, ErrorKind};
pub use pagination::{FeedPage, FetchedPage, PageSource, Pacing, Paginator, PaginatorState};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use session::{Authenticator, PageRequest, SessionCredentials, SessionHandle, SessionManager};
pub use source::{FeedFetcher, FeedSource, SearchFetcher, SearchSource};
pub use types::SearchHit;
