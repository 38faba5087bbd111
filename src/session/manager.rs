// ABOUTME: Session manager turning pool checkouts into scoped page leases
// ABOUTME: acquire_session / with_session / fetch_content on top of Pool::acquire

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};
use url::Url;

use super::browser::{Browser, BrowserContext, Page, PopupReceiver};
use super::config::SessionConfig;
use super::lease::{PageOf, Session, SessionId};
use super::rules::{NoRules, RuleHook};
use super::{SessionError, SessionResult};
use crate::pool::{ManagedResource, Pool, PoolConfig, ResourceFactory};

type ContextOf<F> = <<F as ResourceFactory>::Resource as Browser>::Context;

type Popups<F> = PopupReceiver<PageOf<F>>;

/// Hands out sessions backed by a browser pool
pub struct SessionManager<F: ResourceFactory>
where
    F::Resource: Browser,
{
    pool: Pool<F>,
    rules: Arc<dyn RuleHook<PageOf<F>>>,
}

impl<F: ResourceFactory> Clone for SessionManager<F>
where
    F::Resource: Browser,
{
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            rules: Arc::clone(&self.rules),
        }
    }
}

impl<F: ResourceFactory> SessionManager<F>
where
    F::Resource: Browser,
{
    /// Manager over an existing pool; rule options are accepted but ignored
    pub fn new(pool: Pool<F>) -> Self {
        Self::with_rules(pool, NoRules)
    }

    /// Manager applying `rules` to session pages
    pub fn with_rules<H>(pool: Pool<F>, rules: H) -> Self
    where
        H: RuleHook<PageOf<F>>,
    {
        Self {
            pool,
            rules: Arc::new(rules),
        }
    }

    /// Build a pool from `factory` and wrap it
    ///
    /// With `config.autostart` this needs a running tokio runtime.
    pub fn create_pool(factory: F, config: PoolConfig) -> Self {
        Self::new(Pool::new(factory, config))
    }

    /// The underlying pool
    pub const fn pool(&self) -> &Pool<F> {
        &self.pool
    }

    /// Lease a browser and set up its context and primary page
    ///
    /// On a setup failure the partial pages and context are closed and the
    /// browser is destroyed rather than returned to the pool.
    ///
    /// Setup runs in its own task once the browser is checked out. If this
    /// future is dropped mid-setup, the task still finishes and the unclaimed
    /// session is torn down, so the checked out browser always goes back.
    pub async fn acquire_session(&self, config: &SessionConfig) -> SessionResult<Session<F>> {
        let browser = self.pool.acquire().await?;
        let manager = self.clone();
        let config = config.clone();

        tokio::spawn(async move { manager.setup(browser, &config).await })
            .await
            .map_err(SessionError::Task)?
    }

    /// Run `op` inside a session and release it afterwards
    ///
    /// Release runs exactly once whether or not `op` fails. Teardown errors
    /// are logged and never replace the result of `op`.
    ///
    /// ```ignore
    /// let title = manager
    ///     .with_session(&SessionConfig::default(), |session| {
    ///         async move {
    ///             let page = session.page()?;
    ///             page.goto("https://example.com/").await.map_err(SessionError::Navigation)?;
    ///             page.content().await.map_err(SessionError::Navigation)
    ///         }
    ///         .boxed()
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_session<T, E, Op>(&self, config: &SessionConfig, op: Op) -> Result<T, E>
    where
        Op: for<'s> FnOnce(&'s Session<F>) -> BoxFuture<'s, Result<T, E>>,
        E: From<SessionError>,
    {
        let session = self.acquire_session(config).await?;
        let result = op(&session).await;

        match session.release().await {
            Ok(()) => {}
            Err(SessionError::Closed) => {
                debug!(session = %session.id(), "Session already released by the operation");
            }
            Err(e) => {
                error!(session = %session.id(), error = %e, "Session teardown failed");
            }
        }

        result
    }

    /// Navigate a fresh session's primary page to `target` and return its content
    pub async fn fetch_content(&self, config: &SessionConfig, target: &str) -> SessionResult<String> {
        let url = Url::parse(target).map_err(|source| SessionError::InvalidTarget {
            target: target.to_string(),
            source,
        })?;

        self.with_session(config, move |session| {
            async move {
                let page = session.page()?;
                debug!(session = %session.id(), url = %url, "Fetching content");
                page.goto(url.as_str()).await.map_err(SessionError::Navigation)?;
                page.content().await.map_err(SessionError::Navigation)
            }
            .boxed()
        })
        .await
    }

    // === Internal helpers ===

    /// Turn a checked out browser into an active session, or destroy it
    async fn setup(
        &self,
        browser: ManagedResource<F::Resource>,
        config: &SessionConfig,
    ) -> SessionResult<Session<F>> {
        let id = SessionId::new();
        let mut popups = browser.subscribe_popups();

        let prepared = self.prepare(id, &browser, config, &mut popups).await;
        match prepared {
            Ok((context, primary)) => {
                info!(
                    session = %id,
                    resource = %browser.id(),
                    incognito = config.incognito,
                    "Session acquired"
                );
                Ok(Session::activate(
                    id,
                    self.pool.clone(),
                    Arc::clone(&self.rules),
                    browser,
                    context,
                    primary,
                    popups,
                    config.popup_rules(),
                ))
            }
            Err(e) => {
                warn!(session = %id, resource = %browser.id(), error = %e, "Session setup failed, destroying browser");
                if let Err(destroy_err) = self.pool.destroy(browser).await {
                    warn!(session = %id, error = %destroy_err, "Failed to destroy half-configured browser");
                }
                Err(e)
            }
        }
    }

    /// Create the context and primary page, applying rules to the page
    ///
    /// On error, closes everything it created, plus any popup already
    /// reported, before returning.
    async fn prepare(
        &self,
        id: SessionId,
        browser: &ManagedResource<F::Resource>,
        config: &SessionConfig,
        popups: &mut Popups<F>,
    ) -> SessionResult<(Option<ContextOf<F>>, PageOf<F>)> {
        let context = if config.incognito {
            match browser.create_incognito_context().await {
                Ok(context) => Some(context),
                Err(e) => {
                    Self::abandon(id, popups, None, None).await;
                    return Err(SessionError::Context(e));
                }
            }
        } else {
            None
        };

        let opened = match &context {
            Some(context) => context.new_page().await,
            None => browser.new_page().await,
        };

        let primary = match opened {
            Ok(page) => page,
            Err(e) => {
                Self::abandon(id, popups, None, context).await;
                return Err(SessionError::Page(e));
            }
        };

        if let Some(options) = &config.rule_options {
            if let Err(e) = self.rules.apply(&primary, options).await {
                Self::abandon(id, popups, Some(primary), context).await;
                return Err(SessionError::Rules(e));
            }
            debug!(session = %id, "Rules applied to primary page");
        }

        Ok((context, primary))
    }

    /// Close in reverse creation order: popups, primary page, context
    async fn abandon(id: SessionId, popups: &mut Popups<F>, page: Option<PageOf<F>>, context: Option<ContextOf<F>>) {
        popups.close();
        let mut buffered = Vec::new();
        while let Some(popup) = popups.recv().await {
            buffered.push(popup);
        }
        for popup in buffered.into_iter().rev() {
            if let Err(e) = popup.close().await {
                warn!(session = %id, error = %e, "Failed to close popup after setup failure");
            }
        }

        if let Some(page) = page {
            if let Err(e) = page.close().await {
                warn!(session = %id, error = %e, "Failed to close primary page after setup failure");
            }
        }
        if let Some(context) = context {
            if let Err(e) = context.close().await {
                warn!(session = %id, error = %e, "Failed to close context after setup failure");
            }
        }
    }

}
