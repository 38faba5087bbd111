// ABOUTME: Scoped page leasing on top of pool checkout
//
// A session leases one browser from the pool, opens an isolated context and a
// primary page in it, tracks every popup the browser reports, and on release
// closes all of them in reverse order before handing the browser back.
//
// Key components:
// - browser: capability traits implemented over a real browser driver
// - rules: hook applied once per page
// - lease: the Session handle and its teardown
// - manager: SessionManager (acquire_session, with_session, fetch_content)

pub mod browser;
pub mod config;
pub mod lease;
pub mod manager;
pub mod rules;

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::pool::{BoxError, PoolError};

// Re-exports for convenient access
pub use browser::{Browser, BrowserContext, Page, PopupReceiver};
pub use config::SessionConfig;
pub use lease::{PageOf, Session, SessionId, SessionState};
pub use manager::SessionManager;
pub use rules::{FnRuleHook, NoRules, RuleHook, RuleOptions};

// === Session Errors ===

/// Errors that can occur while leasing or using a session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Error from the underlying pool
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// The browser could not create an isolated context
    #[error("Failed to create isolated context: {0}")]
    Context(#[source] BoxError),

    /// The primary page could not be opened
    #[error("Failed to open page: {0}")]
    Page(#[source] BoxError),

    /// The rule hook failed on the primary page
    #[error("Failed to apply rules: {0}")]
    Rules(#[source] BoxError),

    /// Navigation or content extraction failed
    #[error("Navigation failed: {0}")]
    Navigation(#[source] BoxError),

    /// The navigation target is not an absolute URL
    #[error("Invalid navigation target '{target}': {source}")]
    InvalidTarget {
        /// The rejected target
        target: String,
        /// Why it was rejected
        source: url::ParseError,
    },

    /// The background setup or teardown task panicked or was cancelled
    #[error("Session task failed: {0}")]
    Task(#[source] tokio::task::JoinError),

    /// The session is releasing or already released
    #[error("Session is closed")]
    Closed,

    /// One or more teardown steps failed; the browser still went back to the pool
    #[error(transparent)]
    Teardown(#[from] TeardownErrors),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

// === Teardown Errors ===

/// Which teardown step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    /// Closing the page at this index (0 = primary page)
    Page(usize),
    /// Closing the isolated context
    Context,
    /// Returning the browser to the pool
    Pool,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(index) => write!(f, "page {index}"),
            Self::Context => write!(f, "context"),
            Self::Pool => write!(f, "pool release"),
        }
    }
}

/// A single failed teardown step
#[derive(Debug, Error)]
#[error("{step} teardown failed: {source}")]
pub struct TeardownFailure {
    /// The step that failed
    pub step: TeardownStep,
    /// The collaborator's error
    #[source]
    pub source: BoxError,
}

/// Every teardown failure collected during one release
#[derive(Debug, Default)]
pub struct TeardownErrors {
    /// Failures in the order they happened
    pub failures: Vec<TeardownFailure>,
}

impl TeardownErrors {
    /// Steps that failed, in order
    pub fn steps(&self) -> Vec<TeardownStep> {
        self.failures.iter().map(|failure| failure.step).collect()
    }
}

impl fmt::Display for TeardownErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} teardown step(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownErrors {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|failure| failure as &(dyn std::error::Error + 'static))
    }
}

/// Lock a session mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
