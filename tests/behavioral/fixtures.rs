// ABOUTME: Shared test fixtures and utilities for behavioral tests
//
// Provides:
// - FakeFactory: in-memory browser factory recording every call in an event log
// - FakeBrowser / FakeContext / FakePage: browser capability fakes
// - recording_rules(): rule hook that logs each page it is applied to
// - settle(): let spawned pool and listener tasks run

#![allow(dead_code)]

use async_trait::async_trait;
use browser_pool::pool::{BoxError, PoolConfig, ResourceFactory};
use browser_pool::session::{Browser, BrowserContext, FnRuleHook, Page, PopupReceiver, RuleOptions};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// State shared by the factory and everything it creates
#[derive(Default)]
pub struct Shared {
    events: Mutex<Vec<String>>,
    /// Every non-popup page opens one popup when navigated
    pub popup_on_goto: AtomicBool,
    /// Every non-popup page opens one popup as soon as it is created
    pub popup_on_open: AtomicBool,
    /// Fail `create()`
    pub fail_create: AtomicBool,
    /// Fail opening the primary page
    pub fail_new_page: AtomicBool,
    /// Fail closing the isolated context
    pub fail_context_close: AtomicBool,
    /// Page names whose `close()` fails
    pub fail_page_close: Mutex<HashSet<String>>,
    /// Delay before an isolated context is ready
    pub context_delay: Mutex<Option<Duration>>,
    /// Delay inside every page `close()`
    pub page_close_delay: Mutex<Option<Duration>>,
}

impl Shared {
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    /// Snapshot of the event log
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Events starting with `prefix`
    pub fn events_with(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.starts_with(prefix))
            .collect()
    }

    pub fn fail_close_of(&self, page: &str) {
        self.fail_page_close.lock().unwrap().insert(page.to_string());
    }

    pub fn slow_context(&self, delay: Option<Duration>) {
        *self.context_delay.lock().unwrap() = delay;
    }

    pub fn slow_page_close(&self, delay: Option<Duration>) {
        *self.page_close_delay.lock().unwrap() = delay;
    }
}

/// Factory producing fake browsers named b0, b1, ...
#[derive(Default)]
pub struct FakeFactory {
    pub shared: Arc<Shared>,
    next: AtomicUsize,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }
}

#[async_trait]
impl ResourceFactory for FakeFactory {
    type Resource = FakeBrowser;

    async fn create(&self) -> Result<FakeBrowser, BoxError> {
        if self.shared.fail_create.load(Ordering::SeqCst) {
            self.shared.record("create-failed");
            return Err("chrome failed to launch".into());
        }

        let id = self.next.fetch_add(1, Ordering::SeqCst);
        let browser = FakeBrowser::new(id, Arc::clone(&self.shared));
        self.shared.record(format!("create {}", browser.name()));
        Ok(browser)
    }

    async fn destroy(&self, browser: FakeBrowser) -> Result<(), BoxError> {
        self.shared.record(format!("destroy {}", browser.name()));
        Ok(())
    }
}

struct BrowserInner {
    id: usize,
    shared: Arc<Shared>,
    popups: Mutex<Option<mpsc::UnboundedSender<FakePage>>>,
    page_seq: AtomicUsize,
}

impl BrowserInner {
    fn open_page(self: &Arc<Self>, kind: &str, popup: bool) -> FakePage {
        let seq = self.page_seq.fetch_add(1, Ordering::SeqCst);
        let name = format!("b{}-{kind}{seq}", self.id);
        self.shared.record(format!("open {name}"));
        let page = FakePage {
            name,
            popup,
            browser: Arc::clone(self),
        };

        if !popup && self.shared.popup_on_open.load(Ordering::SeqCst) {
            self.report_popup();
        }
        page
    }

    fn report_popup(self: &Arc<Self>) {
        let popup = self.open_page("popup", true);
        let sender = self.popups.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(popup);
        }
    }
}

/// A fake browser instance
pub struct FakeBrowser {
    inner: Arc<BrowserInner>,
}

impl FakeBrowser {
    fn new(id: usize, shared: Arc<Shared>) -> Self {
        Self {
            inner: Arc::new(BrowserInner {
                id,
                shared,
                popups: Mutex::new(None),
                page_seq: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> String {
        format!("b{}", self.inner.id)
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    type Page = FakePage;
    type Context = FakeContext;

    async fn create_incognito_context(&self) -> Result<FakeContext, BoxError> {
        self.inner.shared.record(format!("context {}", self.name()));
        let delay = *self.inner.shared.context_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(FakeContext {
            browser: Arc::clone(&self.inner),
        })
    }

    async fn new_page(&self) -> Result<FakePage, BoxError> {
        if self.inner.shared.fail_new_page.load(Ordering::SeqCst) {
            return Err("target closed".into());
        }
        Ok(self.inner.open_page("p", false))
    }

    fn subscribe_popups(&self) -> PopupReceiver<FakePage> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.popups.lock().unwrap() = Some(tx);
        rx
    }
}

/// A fake isolated context
pub struct FakeContext {
    browser: Arc<BrowserInner>,
}

#[async_trait]
impl BrowserContext for FakeContext {
    type Page = FakePage;

    async fn new_page(&self) -> Result<FakePage, BoxError> {
        if self.browser.shared.fail_new_page.load(Ordering::SeqCst) {
            return Err("target closed".into());
        }
        Ok(self.browser.open_page("p", false))
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.browser.shared.record(format!("close-context b{}", self.browser.id));
        if self.browser.shared.fail_context_close.load(Ordering::SeqCst) {
            return Err("context already gone".into());
        }
        Ok(())
    }
}

/// A fake page
pub struct FakePage {
    name: String,
    popup: bool,
    browser: Arc<BrowserInner>,
}

impl FakePage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_popup(&self) -> bool {
        self.popup
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str) -> Result<(), BoxError> {
        let shared = &self.browser.shared;
        shared.record(format!("goto {} {url}", self.name));

        if !self.popup && shared.popup_on_goto.load(Ordering::SeqCst) {
            self.browser.report_popup();
        }
        Ok(())
    }

    async fn content(&self) -> Result<String, BoxError> {
        Ok(format!("<html><title>{}</title></html>", self.name))
    }

    async fn close(&self) -> Result<(), BoxError> {
        let shared = &self.browser.shared;
        shared.record(format!("close {}", self.name));
        let delay = *shared.page_close_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if shared.fail_page_close.lock().unwrap().contains(&self.name) {
            return Err(format!("{} crashed", self.name).into());
        }
        Ok(())
    }
}

/// Rule hook recording `rules <page>` for every application
pub fn recording_rules(
    shared: Arc<Shared>,
) -> FnRuleHook<FakePage, impl Fn(&FakePage, &RuleOptions) -> Result<(), BoxError> + Send + Sync + 'static> {
    FnRuleHook::new(move |page: &FakePage, _options: &RuleOptions| {
        shared.record(format!("rules {}", page.name()));
        Ok(())
    })
}

/// Pool config with the given bounds
pub fn pool_config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        min,
        max,
        ..PoolConfig::default()
    }
}

/// Let spawned pool and listener tasks run to completion
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
