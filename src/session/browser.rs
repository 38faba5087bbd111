// ABOUTME: Capability traits for pooled browsers, their contexts and pages
//
// The pool never talks to a browser engine directly. Library users implement
// these traits over their driver of choice (CDP client, WebDriver, ...).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::pool::BoxError;

/// Receiving end of a popup subscription
///
/// Dropping the receiver deregisters the subscription.
pub type PopupReceiver<P> = mpsc::UnboundedReceiver<P>;

/// A remote browser instance held by the pool
#[async_trait]
pub trait Browser: Send + Sync + 'static {
    /// Page type produced by this browser
    type Page: Page;

    /// Isolated (incognito) context type
    type Context: BrowserContext<Page = Self::Page>;

    /// Create a fresh isolated context
    async fn create_incognito_context(&self) -> Result<Self::Context, BoxError>;

    /// Open a page in the browser's default context
    async fn new_page(&self) -> Result<Self::Page, BoxError>;

    /// Subscribe to pages the browser opens on its own (popups, `window.open`)
    ///
    /// Pages created through `new_page` are not reported.
    fn subscribe_popups(&self) -> PopupReceiver<Self::Page>;
}

/// An isolated browsing context
#[async_trait]
pub trait BrowserContext: Send + Sync + 'static {
    /// Page type opened in this context
    type Page: Page;

    /// Open a page inside this context
    async fn new_page(&self) -> Result<Self::Page, BoxError>;

    /// Close the context and anything left in it
    async fn close(&self) -> Result<(), BoxError>;
}

/// A single page (tab)
#[async_trait]
pub trait Page: Send + Sync + 'static {
    /// Navigate to `url` and wait for the load to finish
    async fn goto(&self, url: &str) -> Result<(), BoxError>;

    /// Serialized document content
    async fn content(&self) -> Result<String, BoxError>;

    /// Close the page
    async fn close(&self) -> Result<(), BoxError>;
}
