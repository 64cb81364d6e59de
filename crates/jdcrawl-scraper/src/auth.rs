//! [`Authenticator`] implementations.
//!
//! None of these can complete an interactive login on their own. When a
//! session is rejected they either pick up fresh credentials an operator
//! dropped on disk, or report [`CrawlError::AuthRequired`] so the
//! orchestrator can pause the affected pairs.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use jdcrawl_core::AppConfig;

use crate::error::CrawlError;
use crate::session::{Authenticator, SessionCredentials};

/// No cookie at all. Works for the public feeds until the site starts
/// demanding a login.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousAuthenticator;

impl Authenticator for AnonymousAuthenticator {
    async fn authenticate(
        &self,
        previous_generation: u64,
    ) -> Result<SessionCredentials, CrawlError> {
        if previous_generation == 0 {
            return Ok(SessionCredentials::anonymous());
        }
        Err(CrawlError::AuthRequired {
            reason: "anonymous session was rejected; configure JDCRAWL_COOKIE or JDCRAWL_COOKIE_FILE"
                .to_owned(),
        })
    }
}

/// A cookie string supplied once through configuration.
#[derive(Clone)]
pub struct StaticCookieAuthenticator {
    cookie: String,
}

impl StaticCookieAuthenticator {
    #[must_use]
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
        }
    }
}

impl std::fmt::Debug for StaticCookieAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCookieAuthenticator")
            .field("cookie", &"[redacted]")
            .finish()
    }
}

impl Authenticator for StaticCookieAuthenticator {
    async fn authenticate(
        &self,
        previous_generation: u64,
    ) -> Result<SessionCredentials, CrawlError> {
        if previous_generation == 0 {
            return Ok(SessionCredentials::with_cookie(self.cookie.clone()));
        }
        Err(CrawlError::AuthRequired {
            reason: "configured cookie was rejected; log in again and update JDCRAWL_COOKIE"
                .to_owned(),
        })
    }
}

/// Reads the cookie from a file an operator keeps up to date.
///
/// On re-authentication the file is polled until its modification time moves
/// past the one last read, or `wait` elapses.
#[derive(Debug)]
pub struct CookieFileAuthenticator {
    path: PathBuf,
    wait: Duration,
    poll_interval: Duration,
    last_modified: Mutex<Option<SystemTime>>,
}

impl CookieFileAuthenticator {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, wait: Duration) -> Self {
        Self {
            path: path.into(),
            wait,
            poll_interval: Duration::from_secs(5),
            last_modified: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified())
            .ok()
    }

    fn seen(&self) -> Option<SystemTime> {
        self.last_modified
            .lock()
            .map(|guard| *guard)
            .unwrap_or_default()
    }

    async fn read_cookie(&self) -> Result<SessionCredentials, CrawlError> {
        let modified = self.modified().await;
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CrawlError::AuthRequired {
                reason: format!("cannot read cookie file {}: {e}", self.path.display()),
            })?;
        let cookie = raw.trim();
        if cookie.is_empty() {
            return Err(CrawlError::AuthRequired {
                reason: format!("cookie file {} is empty", self.path.display()),
            });
        }
        if let Ok(mut guard) = self.last_modified.lock() {
            *guard = modified;
        }
        Ok(SessionCredentials::with_cookie(cookie))
    }
}

impl Authenticator for CookieFileAuthenticator {
    async fn authenticate(
        &self,
        previous_generation: u64,
    ) -> Result<SessionCredentials, CrawlError> {
        if previous_generation == 0 {
            return self.read_cookie().await;
        }

        let seen = self.seen();
        tracing::warn!(
            path = %self.path.display(),
            wait_secs = self.wait.as_secs(),
            "session rejected; waiting for the cookie file to be refreshed"
        );

        let deadline = tokio::time::Instant::now() + self.wait;
        loop {
            let current = self.modified().await;
            if current.is_some() && current > seen {
                tracing::info!(path = %self.path.display(), "cookie file refreshed");
                return self.read_cookie().await;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CrawlError::AuthRequired {
                    reason: format!(
                        "cookie file {} was not refreshed within {}s",
                        self.path.display(),
                        self.wait.as_secs()
                    ),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// The authenticator selected by configuration: a cookie file wins over a
/// static cookie, which wins over anonymous access.
#[derive(Debug)]
pub enum ConfiguredAuthenticator {
    Anonymous(AnonymousAuthenticator),
    StaticCookie(StaticCookieAuthenticator),
    CookieFile(CookieFileAuthenticator),
}

impl ConfiguredAuthenticator {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        if let Some(path) = &config.cookie_file {
            return Self::CookieFile(CookieFileAuthenticator::new(
                path.clone(),
                Duration::from_secs(config.auth_wait_secs),
            ));
        }
        if let Some(cookie) = &config.cookie {
            return Self::StaticCookie(StaticCookieAuthenticator::new(cookie.clone()));
        }
        Self::Anonymous(AnonymousAuthenticator)
    }

    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Anonymous(_) => "anonymous",
            Self::StaticCookie(_) => "static cookie",
            Self::CookieFile(_) => "cookie file",
        }
    }
}

impl Authenticator for ConfiguredAuthenticator {
    async fn authenticate(
        &self,
        previous_generation: u64,
    ) -> Result<SessionCredentials, CrawlError> {
        match self {
            Self::Anonymous(inner) => inner.authenticate(previous_generation).await,
            Self::StaticCookie(inner) => inner.authenticate(previous_generation).await,
            Self::CookieFile(inner) => inner.authenticate(previous_generation).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn anonymous_cannot_recover_from_rejection() {
        let auth = AnonymousAuthenticator;
        assert_eq!(auth.authenticate(0).await.unwrap().cookie, None);
        assert!(matches!(
            auth.authenticate(1).await,
            Err(CrawlError::AuthRequired { .. })
        ));
    }

    #[tokio::test]
    async fn static_cookie_is_used_once() {
        let auth = StaticCookieAuthenticator::new("pin=abc");
        assert_eq!(
            auth.authenticate(0).await.unwrap().cookie.as_deref(),
            Some("pin=abc")
        );
        assert!(auth.authenticate(1).await.is_err());
        assert!(!format!("{auth:?}").contains("abc"));
    }

    #[tokio::test]
    async fn cookie_file_is_read_and_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  pin=abc; thor=xyz  ").unwrap();

        let auth = CookieFileAuthenticator::new(file.path(), Duration::from_secs(1));
        let creds = auth.authenticate(0).await.unwrap();
        assert_eq!(creds.cookie.as_deref(), Some("pin=abc; thor=xyz"));
    }

    #[tokio::test]
    async fn missing_cookie_file_requires_auth() {
        let dir = tempfile::tempdir().unwrap();
        let auth = CookieFileAuthenticator::new(dir.path().join("absent"), Duration::ZERO);
        assert!(matches!(
            auth.authenticate(0).await,
            Err(CrawlError::AuthRequired { .. })
        ));
    }

    #[tokio::test]
    async fn unchanged_cookie_file_times_out() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pin=abc").unwrap();

        let auth = CookieFileAuthenticator::new(file.path(), Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(10));
        auth.authenticate(0).await.unwrap();

        let err = auth.authenticate(1).await.unwrap_err();
        assert!(err.to_string().contains("was not refreshed"));
    }

    #[test]
    fn configured_prefers_cookie_file() {
        let mut config =
            jdcrawl_core::build_app_config(|_| Err(std::env::VarError::NotPresent)).unwrap();
        assert_eq!(
            ConfiguredAuthenticator::from_config(&config).describe(),
            "anonymous"
        );

        config.cookie = Some("pin=abc".to_owned());
        assert_eq!(
            ConfiguredAuthenticator::from_config(&config).describe(),
            "static cookie"
        );

        config.cookie_file = Some(PathBuf::from("/tmp/jd-cookie"));
        assert_eq!(
            ConfiguredAuthenticator::from_config(&config).describe(),
            "cookie file"
        );
    }
}
