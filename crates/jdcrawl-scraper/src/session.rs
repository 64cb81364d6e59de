//! Shared HTTP session: one cookie jar and header set for every worker.
//!
//! Workers borrow the session through [`SessionManager::acquire`], which
//! returns a scoped [`SessionHandle`]. Re-authentication is single-flight:
//! concurrent callers that all observed the same expired session wait on one
//! login step instead of each running their own.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::header::{self, HeaderValue};
use reqwest::{Client, StatusCode};
use tokio::sync::{Mutex, RwLock};

use crate::error::CrawlError;

/// Fallback when no user agents are configured.
pub(crate) const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Credentials attached to every request of a session.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionCredentials {
    pub cookie: Option<String>,
}

impl SessionCredentials {
    #[must_use]
    pub fn anonymous() -> Self {
        Self { cookie: None }
    }

    #[must_use]
    pub fn with_cookie(cookie: impl Into<String>) -> Self {
        Self {
            cookie: Some(cookie.into()),
        }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("cookie", &self.cookie.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Produces session credentials.
///
/// `previous_generation` is `0` for the initial login and the generation of
/// the rejected session on every later call. Implementations that cannot
/// recover without a human return [`CrawlError::AuthRequired`].
pub trait Authenticator {
    fn authenticate(
        &self,
        previous_generation: u64,
    ) -> impl Future<Output = Result<SessionCredentials, CrawlError>>;
}

/// A single GET request issued through a [`SessionHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub referer: Option<String>,
}

impl PageRequest {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            referer: None,
        }
    }

    #[must_use]
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

#[derive(Default)]
struct SessionState {
    credentials: Option<SessionCredentials>,
    /// Bumped on every successful (re-)authentication. `0` means never
    /// authenticated.
    generation: u64,
}

pub struct SessionManager<A> {
    client: Client,
    authenticator: A,
    user_agents: Vec<String>,
    state: RwLock<SessionState>,
    reauth_lock: Mutex<()>,
    active_handles: AtomicUsize,
}

impl<A: Authenticator> SessionManager<A> {
    /// Builds a session with its own `reqwest` client.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Http`] if the client cannot be constructed.
    pub fn new(
        authenticator: A,
        user_agents: Vec<String>,
        timeout_secs: u64,
    ) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, authenticator, user_agents))
    }

    #[must_use]
    pub fn with_client(client: Client, authenticator: A, user_agents: Vec<String>) -> Self {
        Self {
            client,
            authenticator,
            user_agents,
            state: RwLock::new(SessionState::default()),
            reauth_lock: Mutex::new(()),
            active_handles: AtomicUsize::new(0),
        }
    }

    /// Borrows the session, logging in first if nobody has yet.
    ///
    /// # Errors
    ///
    /// Propagates the authenticator's error when the initial login fails.
    pub async fn acquire(&self) -> Result<SessionHandle<'_>, CrawlError> {
        if let Some(handle) = self.current_handle().await {
            return Ok(handle);
        }

        let _guard = self.reauth_lock.lock().await;
        if let Some(handle) = self.current_handle().await {
            return Ok(handle);
        }

        let credentials = self.authenticator.authenticate(0).await?;
        {
            let mut state = self.state.write().await;
            state.credentials = Some(credentials);
            state.generation += 1;
            tracing::info!(generation = state.generation, "session established");
        }

        self.current_handle().await.ok_or_else(|| CrawlError::AuthRequired {
            reason: "session was cleared during login".to_owned(),
        })
    }

    /// Replaces the session whose generation is `observed_generation`.
    ///
    /// If another worker already refreshed the session since that generation
    /// was observed, this returns immediately without logging in again.
    ///
    /// # Errors
    ///
    /// Propagates the authenticator's error, typically
    /// [`CrawlError::AuthRequired`].
    pub async fn reauthenticate(&self, observed_generation: u64) -> Result<(), CrawlError> {
        let _guard = self.reauth_lock.lock().await;

        let current = self.state.read().await.generation;
        if current != observed_generation {
            tracing::debug!(
                observed_generation,
                current,
                "session already refreshed by another worker"
            );
            return Ok(());
        }

        tracing::warn!(
            generation = current,
            active_handles = self.active_handles(),
            "re-authenticating expired session"
        );
        let credentials = self.authenticator.authenticate(current).await?;

        let mut state = self.state.write().await;
        state.credentials = Some(credentials);
        state.generation += 1;
        tracing::info!(generation = state.generation, "session refreshed");
        Ok(())
    }

    /// Generation of the current session; `0` before the first login.
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Number of handles currently borrowed.
    #[must_use]
    pub fn active_handles(&self) -> usize {
        self.active_handles.load(Ordering::SeqCst)
    }

    async fn current_handle(&self) -> Option<SessionHandle<'_>> {
        let state = self.state.read().await;
        let credentials = state.credentials.clone()?;
        self.active_handles.fetch_add(1, Ordering::SeqCst);
        Some(SessionHandle {
            client: &self.client,
            user_agents: &self.user_agents,
            credentials,
            generation: state.generation,
            active_handles: &self.active_handles,
        })
    }
}

/// A borrowed view of the session, released on drop.
pub struct SessionHandle<'a> {
    client: &'a Client,
    user_agents: &'a [String],
    credentials: SessionCredentials,
    generation: u64,
    active_handles: &'a AtomicUsize,
}

impl SessionHandle<'_> {
    /// Generation of the session this handle was taken from.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Issues `request` and returns the response body.
    ///
    /// A random user agent from the configured list is sent with every
    /// request.
    ///
    /// # Errors
    ///
    /// - [`CrawlError::SessionExpired`]: HTTP 401, or the request was
    ///   redirected to a login page.
    /// - [`CrawlError::RateLimited`]: HTTP 429.
    /// - [`CrawlError::ServerError`]: any 5xx.
    /// - [`CrawlError::UnexpectedStatus`]: any other non-2xx.
    /// - [`CrawlError::Http`]: network or TLS failure.
    pub async fn execute(&self, request: &PageRequest) -> Result<String, CrawlError> {
        let mut builder = self
            .client
            .get(&request.url)
            .header(header::USER_AGENT, self.pick_user_agent())
            .header(
                header::ACCEPT,
                "application/json,text/html;q=0.9,*/*;q=0.8",
            )
            .header(header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8");

        if let Some(referer) = &request.referer {
            builder = builder.header(header::REFERER, referer);
        }
        if let Some(cookie) = &self.credentials.cookie {
            let value = HeaderValue::from_str(cookie).map_err(|e| CrawlError::AuthRequired {
                reason: format!("configured cookie is not a valid header value: {e}"),
            })?;
            builder = builder.header(header::COOKIE, value);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || is_login_redirect(response.url()) {
            return Err(CrawlError::SessionExpired {
                url: request.url.clone(),
            });
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            return Err(CrawlError::RateLimited {
                url: request.url.clone(),
                retry_after_secs,
            });
        }

        if status.is_server_error() {
            return Err(CrawlError::ServerError {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        if !status.is_success() {
            return Err(CrawlError::UnexpectedStatus {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        Ok(response.text().await?)
    }

    fn pick_user_agent(&self) -> &str {
        if self.user_agents.is_empty() {
            return DEFAULT_USER_AGENT;
        }
        let idx = rand::random_range(0..self.user_agents.len());
        &self.user_agents[idx]
    }
}

impl Drop for SessionHandle<'_> {
    fn drop(&mut self) {
        self.active_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

fn is_login_redirect(url: &reqwest::Url) -> bool {
    let host_is_passport = url
        .host_str()
        .is_some_and(|host| host.starts_with("passport."));
    host_is_passport || url.path().contains("/login")
}
