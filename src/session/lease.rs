// ABOUTME: Session handle for one leased browser and the pages opened during the lease
// ABOUTME: Tracks popups via an explicit subscription and tears everything down in reverse order

//! Session lease
//!
//! A `Session` wraps one checked out browser. The browser itself is never
//! modified; the pool-specific capabilities (`setup_rules`, `release`) live
//! on this wrapper.
//!
//! State machine:
//!
//! ```text
//! Acquired ──rules──▶ Active ──release()──▶ Releasing ──▶ Released
//!                       │
//!                       └─ popups appended while active
//! ```
//!
//! Teardown order on release:
//! 1. Stop the popup listener (popups already reported are still tracked)
//! 2. Close pages newest first, primary page last
//! 3. Close the isolated context, if one was created
//! 4. Return the browser to the pool
//!
//! Every step runs even if an earlier one fails. The teardown runs in its
//! own task, so a cancelled `release()` still returns the browser.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::browser::{Browser, BrowserContext, Page, PopupReceiver};
use super::rules::{RuleHook, RuleOptions};
use super::{lock, SessionError, SessionResult, TeardownErrors, TeardownFailure, TeardownStep};
use crate::pool::{ManagedResource, Pool, ResourceFactory};

/// Page type of the browsers produced by factory `F`
pub type PageOf<F> = <<F as ResourceFactory>::Resource as Browser>::Page;

type ContextOf<F> = <<F as ResourceFactory>::Resource as Browser>::Context;

type PageList<P> = Arc<Mutex<Vec<Arc<P>>>>;

/// Unique identifier of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Browser checked out, pages being set up
    Acquired,
    /// Ready for use; popups are being tracked
    Active,
    /// Teardown in progress
    Releasing,
    /// Browser returned to the pool
    Released,
}

impl SessionState {
    /// Whether operations on the session are still allowed
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Acquired | Self::Active)
    }
}

// === Popup Listener ===

/// Background task appending popups to the session's page list
struct PopupListener {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl PopupListener {
    fn spawn<P: Page>(
        session: SessionId,
        mut popups: PopupReceiver<P>,
        pages: PageList<P>,
        rules: Arc<dyn RuleHook<P>>,
        options: Option<RuleOptions>,
    ) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    popup = popups.recv() => match popup {
                        Some(page) => Self::track(session, page, &*pages, &*rules, options.as_ref()).await,
                        None => {
                            debug!(session = %session, "Popup subscription closed by browser");
                            return;
                        }
                    },
                    _ = &mut stopped => break,
                }
            }

            // Popups reported before the stop are part of the lease
            popups.close();
            while let Some(page) = popups.recv().await {
                Self::track(session, page, &*pages, &*rules, options.as_ref()).await;
            }
        });

        Self { stop, handle }
    }

    async fn track<P: Page>(
        session: SessionId,
        page: P,
        pages: &Mutex<Vec<Arc<P>>>,
        rules: &dyn RuleHook<P>,
        options: Option<&RuleOptions>,
    ) {
        let page = Arc::new(page);
        let index = {
            let mut pages = lock(pages);
            pages.push(Arc::clone(&page));
            pages.len() - 1
        };
        debug!(session = %session, index, "Tracking popup");

        if let Some(options) = options {
            if let Err(e) = rules.apply(&page, options).await {
                warn!(session = %session, index, error = %e, "Failed to apply rules to popup");
            }
        }
    }

    /// Stop listening and wait for in-flight popups to be tracked
    async fn stop(self, session: SessionId) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            warn!(session = %session, error = %e, "Popup listener ended abnormally");
        }
    }
}

// === Teardown ===

/// Everything a session owns, moved out for teardown
struct Teardown<F: ResourceFactory>
where
    F::Resource: Browser,
{
    session: SessionId,
    state: Arc<Mutex<SessionState>>,
    pool: Pool<F>,
    listener: Option<PopupListener>,
    pages: PageList<PageOf<F>>,
    context: Option<ContextOf<F>>,
    browser: Option<ManagedResource<F::Resource>>,
}

impl<F: ResourceFactory> Teardown<F>
where
    F::Resource: Browser,
{
    async fn run(self) -> Vec<TeardownFailure> {
        let mut failures = Vec::new();

        if let Some(listener) = self.listener {
            listener.stop(self.session).await;
        }

        let pages = std::mem::take(&mut *lock(&self.pages));
        for (index, page) in pages.iter().enumerate().rev() {
            match page.close().await {
                Ok(()) => debug!(session = %self.session, index, "Page closed"),
                Err(e) => {
                    warn!(session = %self.session, index, error = %e, "Failed to close page");
                    failures.push(TeardownFailure {
                        step: TeardownStep::Page(index),
                        source: e,
                    });
                }
            }
        }

        if let Some(context) = self.context {
            if let Err(e) = context.close().await {
                warn!(session = %self.session, error = %e, "Failed to close isolated context");
                failures.push(TeardownFailure {
                    step: TeardownStep::Context,
                    source: e,
                });
            }
        }

        if let Some(browser) = self.browser {
            if let Err(e) = self.pool.release(browser).await {
                failures.push(TeardownFailure {
                    step: TeardownStep::Pool,
                    source: Box::new(e),
                });
            }
        }

        *lock(&self.state) = SessionState::Released;
        failures
    }
}

// === Session ===

/// A leased browser with its isolated context and pages
///
/// Obtain one from `SessionManager::acquire_session` and call `release()`
/// when done. A session dropped without release is torn down in the
/// background, with a warning.
pub struct Session<F: ResourceFactory>
where
    F::Resource: Browser,
{
    id: SessionId,
    pool: Pool<F>,
    rules: Arc<dyn RuleHook<PageOf<F>>>,
    state: Arc<Mutex<SessionState>>,
    browser: Mutex<Option<ManagedResource<F::Resource>>>,
    context: Mutex<Option<ContextOf<F>>>,
    primary: Arc<PageOf<F>>,
    pages: PageList<PageOf<F>>,
    listener: Mutex<Option<PopupListener>>,
    acquired_at: Instant,
}

impl<F: ResourceFactory> fmt::Debug for Session<F>
where
    F::Resource: Browser,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("page_count", &self.page_count())
            .finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> Session<F>
where
    F::Resource: Browser,
{
    /// Assemble an active session around an already configured primary page
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn activate(
        id: SessionId,
        pool: Pool<F>,
        rules: Arc<dyn RuleHook<PageOf<F>>>,
        browser: ManagedResource<F::Resource>,
        context: Option<ContextOf<F>>,
        primary: PageOf<F>,
        popups: PopupReceiver<PageOf<F>>,
        popup_rules: Option<RuleOptions>,
    ) -> Self {
        let primary = Arc::new(primary);
        let pages = Arc::new(Mutex::new(vec![Arc::clone(&primary)]));
        let listener = PopupListener::spawn(id, popups, Arc::clone(&pages), Arc::clone(&rules), popup_rules);

        Self {
            id,
            pool,
            rules,
            state: Arc::new(Mutex::new(SessionState::Active)),
            browser: Mutex::new(Some(browser)),
            context: Mutex::new(context),
            primary,
            pages,
            listener: Mutex::new(Some(listener)),
            acquired_at: Instant::now(),
        }
    }

    /// Session identifier
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Time since the session was handed out
    pub fn age(&self) -> std::time::Duration {
        self.acquired_at.elapsed()
    }

    /// The primary page
    pub fn page(&self) -> SessionResult<Arc<PageOf<F>>> {
        self.ensure_open()?;
        Ok(Arc::clone(&self.primary))
    }

    /// Every tracked page in creation order, primary page first
    pub fn pages(&self) -> SessionResult<Vec<Arc<PageOf<F>>>> {
        self.ensure_open()?;
        Ok(lock(&self.pages).clone())
    }

    /// Number of tracked pages
    pub fn page_count(&self) -> usize {
        lock(&self.pages).len()
    }

    /// Apply the rule hook to the primary page
    ///
    /// The hook is not required to be idempotent; call this at most once per
    /// set of options.
    pub async fn setup_rules(&self, options: &RuleOptions) -> SessionResult<()> {
        self.ensure_open()?;
        self.rules
            .apply(&self.primary, options)
            .await
            .map_err(SessionError::Rules)
    }

    /// Close every page and the context, then return the browser to the pool
    ///
    /// # Errors
    ///
    /// - `SessionError::Closed` if the session was already released
    /// - `SessionError::Teardown` if any step failed; the remaining steps
    ///   still ran and the browser is back in the pool
    pub async fn release(&self) -> SessionResult<()> {
        {
            let mut state = lock(&self.state);
            if !state.is_open() {
                return Err(SessionError::Closed);
            }
            *state = SessionState::Releasing;
        }

        debug!(session = %self.id, pages = self.page_count(), "Releasing session");
        let failures = match tokio::spawn(self.take_teardown().run()).await {
            Ok(failures) => failures,
            Err(e) => {
                *lock(&self.state) = SessionState::Released;
                vec![TeardownFailure {
                    step: TeardownStep::Pool,
                    source: Box::new(e),
                }]
            }
        };

        if failures.is_empty() {
            info!(session = %self.id, held_ms = %self.age().as_millis(), "Session released");
            Ok(())
        } else {
            let errors = TeardownErrors { failures };
            error!(session = %self.id, error = %errors, "Session released with teardown failures");
            Err(SessionError::Teardown(errors))
        }
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.state().is_open() {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    fn take_teardown(&self) -> Teardown<F> {
        Teardown {
            session: self.id,
            state: Arc::clone(&self.state),
            pool: self.pool.clone(),
            listener: lock(&self.listener).take(),
            pages: Arc::clone(&self.pages),
            context: lock(&self.context).take(),
            browser: lock(&self.browser).take(),
        }
    }
}

impl<F: ResourceFactory> Drop for Session<F>
where
    F::Resource: Browser,
{
    fn drop(&mut self) {
        if !self.state().is_open() {
            return;
        }

        warn!(session = %self.id, "Session dropped without release, tearing down in background");
        let teardown = self.take_teardown();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for failure in teardown.run().await {
                        warn!(session = %id, step = %failure.step, error = %failure.source, "Background teardown step failed");
                    }
                });
            }
            Err(_) => {
                error!(session = %self.id, "No runtime available, leased browser leaked");
            }
        }
    }
}
