// ABOUTME: Behavioral tests for session leasing, popup tracking and teardown order
// Drives SessionManager against the in-memory fake browser and checks the event log

use super::fixtures::{pool_config, recording_rules, settle, FakeFactory, FakePage};
use async_trait::async_trait;
use browser_pool::pool::{BoxError, Pool};
use browser_pool::session::{
    Page, RuleHook, RuleOptions, SessionConfig, SessionError, SessionManager, SessionState, TeardownStep,
};
use futures_util::FutureExt;
use mockall::mock;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn manager(max: usize) -> (SessionManager<FakeFactory>, Arc<super::fixtures::Shared>) {
    let factory = FakeFactory::new();
    let shared = factory.shared();
    let pool = Pool::new(factory, pool_config(0, max));
    let manager = SessionManager::with_rules(pool, recording_rules(Arc::clone(&shared)));
    (manager, shared)
}

fn with_rules() -> SessionConfig {
    SessionConfig::default().with_rules(RuleOptions::new(json!({"block": ["ads.example"]})))
}

/// Release closes pages newest first, then the context, then returns the browser
///
/// A queued session only gets the browser from the pool release, so its setup
/// events must follow the context close.
#[tokio::test]
async fn test_release_closes_pages_in_reverse_order() {
    let (manager, shared) = manager(1);
    shared.popup_on_goto.store(true, Ordering::SeqCst);

    let session = manager.acquire_session(&SessionConfig::default()).await.unwrap();
    let primary = session.page().unwrap();
    primary.goto("https://one.example/").await.unwrap();
    settle().await;
    primary.goto("https://two.example/").await.unwrap();
    settle().await;

    let names: Vec<String> = session
        .pages()
        .unwrap()
        .iter()
        .map(|page| page.name().to_string())
        .collect();
    assert_eq!(names, vec!["b0-p0", "b0-popup1", "b0-popup2"]);

    let queued = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.acquire_session(&SessionConfig::default()).await })
    };
    settle().await;
    assert_eq!(manager.pool().status().waiting, 1);

    session.release().await.unwrap();
    assert_eq!(session.state(), SessionState::Released);
    let next = queued.await.unwrap().unwrap();

    let events = shared.events();
    assert_eq!(
        events[events.len() - 6..].to_vec(),
        vec![
            "close b0-popup2",
            "close b0-popup1",
            "close b0-p0",
            "close-context b0",
            "context b0",
            "open b0-p3",
        ]
    );

    next.release().await.unwrap();
    let status = manager.pool().status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 1);
}

#[tokio::test]
async fn test_without_incognito_uses_default_context() {
    let (manager, shared) = manager(1);
    let config = SessionConfig {
        incognito: false,
        ..SessionConfig::default()
    };

    let session = manager.acquire_session(&config).await.unwrap();
    session.release().await.unwrap();

    assert!(shared.events_with("context").is_empty());
    assert!(shared.events_with("close-context").is_empty());
    assert_eq!(shared.events_with("close "), vec!["close b0-p0"]);
}

/// with_session releases exactly once and returns the operation's error afterwards
#[tokio::test]
async fn test_with_session_releases_once_on_error() {
    let (manager, shared) = manager(1);

    let result: Result<(), SessionError> = manager
        .with_session(&SessionConfig::default(), |session| {
            async move {
                assert_eq!(session.state(), SessionState::Active);
                Err(SessionError::Navigation("net::ERR_NAME_NOT_RESOLVED".into()))
            }
            .boxed()
        })
        .await;

    assert!(matches!(result, Err(SessionError::Navigation(_))));
    assert_eq!(shared.events_with("close-context"), vec!["close-context b0"]);
    assert_eq!(manager.pool().status().idle, 1);
    assert_eq!(manager.pool().metrics().snapshot().released, 1);
}

#[tokio::test]
async fn test_with_session_tolerates_release_inside_operation() {
    let (manager, shared) = manager(1);

    let value = manager
        .with_session(&SessionConfig::default(), |session| {
            async move {
                session.release().await?;
                Ok::<_, SessionError>(42)
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(shared.events_with("close-context").len(), 1);
    assert_eq!(manager.pool().metrics().snapshot().released, 1);
}

/// With max = 1 the second session waits for the first to be released
#[tokio::test]
async fn test_second_session_waits_for_release() {
    let (manager, _shared) = manager(1);
    let first = manager.acquire_session(&SessionConfig::default()).await.unwrap();

    let second = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.acquire_session(&SessionConfig::default()).await })
    };
    settle().await;
    assert!(!second.is_finished());
    assert_eq!(manager.pool().status().waiting, 1);

    first.release().await.unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(second.state(), SessionState::Active);
    second.release().await.unwrap();

    let status = manager.pool().status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.size(), 1);
    assert_eq!(manager.pool().metrics().snapshot().created, 1);
}

/// Rules hit the primary page before navigation and the popup it opens
#[tokio::test]
async fn test_fetch_content_applies_rules_to_primary_and_popup() {
    let (manager, shared) = manager(1);
    shared.popup_on_goto.store(true, Ordering::SeqCst);

    let content = manager
        .fetch_content(&with_rules(), "https://example.com/")
        .await
        .unwrap();
    assert_eq!(content, "<html><title>b0-p0</title></html>");

    let events = shared.events();
    let rules = shared.events_with("rules");
    assert_eq!(rules, vec!["rules b0-p0", "rules b0-popup1"]);

    let primary_rules = events.iter().position(|e| e == "rules b0-p0").unwrap();
    let navigation = events
        .iter()
        .position(|e| e == "goto b0-p0 https://example.com/")
        .unwrap();
    assert!(primary_rules < navigation);
    assert_eq!(manager.pool().status().idle, 1);
}

#[tokio::test]
async fn test_popup_rules_can_be_disabled() {
    let (manager, shared) = manager(1);
    shared.popup_on_goto.store(true, Ordering::SeqCst);
    let config = SessionConfig {
        apply_rules_to_popups: false,
        ..with_rules()
    };

    manager.fetch_content(&config, "https://example.com/").await.unwrap();
    assert_eq!(shared.events_with("rules"), vec!["rules b0-p0"]);
    assert_eq!(shared.events_with("close b0-popup1").len(), 1);
}

#[tokio::test]
async fn test_fetch_content_rejects_relative_target() {
    let (manager, shared) = manager(1);

    let err = manager
        .fetch_content(&SessionConfig::default(), "/relative/path")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidTarget { .. }));
    assert!(shared.events().is_empty(), "no browser is leased for an invalid target");
}

#[tokio::test]
async fn test_operations_after_release_are_closed() {
    let (manager, _shared) = manager(1);
    let session = manager.acquire_session(&SessionConfig::default()).await.unwrap();
    session.release().await.unwrap();

    assert!(matches!(session.page(), Err(SessionError::Closed)));
    assert!(matches!(session.pages(), Err(SessionError::Closed)));
    assert!(matches!(
        session.setup_rules(&RuleOptions::new(json!({}))).await,
        Err(SessionError::Closed)
    ));
    assert!(matches!(session.release().await, Err(SessionError::Closed)));
    assert_eq!(manager.pool().metrics().snapshot().released, 1);
}

#[tokio::test]
async fn test_setup_rules_applies_to_primary_page() {
    let (manager, shared) = manager(1);
    let session = manager.acquire_session(&SessionConfig::default()).await.unwrap();
    assert!(shared.events_with("rules").is_empty());

    session.setup_rules(&RuleOptions::new(json!({}))).await.unwrap();
    assert_eq!(shared.events_with("rules"), vec!["rules b0-p0"]);
    session.release().await.unwrap();
}

/// A failed page close is reported but the context still closes and the browser returns
#[tokio::test]
async fn test_teardown_failure_still_returns_browser() {
    let (manager, shared) = manager(1);
    shared.fail_close_of("b0-p0");
    shared.fail_context_close.store(true, Ordering::SeqCst);

    let session = manager.acquire_session(&SessionConfig::default()).await.unwrap();
    let err = session.release().await.unwrap_err();

    match err {
        SessionError::Teardown(errors) => {
            assert_eq!(errors.steps(), vec![TeardownStep::Page(0), TeardownStep::Context]);
        }
        other => panic!("expected teardown error, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Released);
    assert_eq!(manager.pool().status().idle, 1);
}

#[tokio::test]
async fn test_page_failure_destroys_browser() {
    let (manager, shared) = manager(1);
    shared.fail_new_page.store(true, Ordering::SeqCst);

    let err = manager
        .acquire_session(&SessionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Page(_)));

    assert_eq!(shared.events_with("close-context"), vec!["close-context b0"]);
    assert_eq!(shared.events_with("destroy"), vec!["destroy b0"]);
    assert_eq!(manager.pool().status().size(), 0);
}

/// Dropping acquire_session mid-setup still hands the browser back
#[tokio::test(start_paused = true)]
async fn test_cancelled_acquire_session_returns_browser() {
    let (manager, shared) = manager(1);
    shared.slow_context(Some(Duration::from_millis(100)));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(10),
        manager.acquire_session(&SessionConfig::default()),
    )
    .await;
    assert!(cancelled.is_err());

    tokio::time::sleep(Duration::from_millis(500)).await;
    let status = manager.pool().status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 1);
    assert_eq!(shared.events_with("close"), vec!["close b0-p0", "close-context b0"]);

    shared.slow_context(None);
    let session = manager.acquire_session(&SessionConfig::default()).await.unwrap();
    session.release().await.unwrap();
    assert_eq!(manager.pool().metrics().snapshot().created, 1);
}

/// A release cut short by the caller still finishes the teardown
#[tokio::test(start_paused = true)]
async fn test_cancelled_release_still_returns_browser() {
    let (manager, shared) = manager(1);
    let session = manager.acquire_session(&SessionConfig::default()).await.unwrap();
    shared.slow_page_close(Some(Duration::from_millis(100)));

    let cancelled = tokio::time::timeout(Duration::from_millis(10), session.release()).await;
    assert!(cancelled.is_err());
    assert_eq!(session.state(), SessionState::Releasing);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.state(), SessionState::Released);
    drop(session);

    let status = manager.pool().status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 1);
    assert_eq!(shared.events_with("close"), vec!["close b0-p0", "close-context b0"]);

    shared.slow_page_close(None);
    let next = manager.acquire_session(&SessionConfig::default()).await.unwrap();
    next.release().await.unwrap();
    assert_eq!(manager.pool().metrics().snapshot().created, 1);
}

#[tokio::test]
async fn test_dropped_session_is_torn_down() {
    let (manager, shared) = manager(1);
    let session = manager.acquire_session(&SessionConfig::default()).await.unwrap();
    drop(session);
    settle().await;

    assert_eq!(shared.events_with("close-context"), vec!["close-context b0"]);
    assert_eq!(manager.pool().status().idle, 1);
}

// ==================== Rule Hook Expectations ====================

mock! {
    pub Rules {}

    #[async_trait]
    impl RuleHook<FakePage> for Rules {
        async fn apply(&self, page: &FakePage, options: &RuleOptions) -> Result<(), BoxError>;
    }
}

#[tokio::test]
async fn test_rule_failure_cleans_up_and_destroys_browser() {
    let factory = FakeFactory::new();
    let shared = factory.shared();
    let pool = Pool::new(factory, pool_config(0, 1));

    let mut rules = MockRules::new();
    rules
        .expect_apply()
        .withf(|page: &FakePage, options: &RuleOptions| {
            page.name() == "b0-p0" && options.get("block").is_some()
        })
        .times(1)
        .returning(|_, _| Err("blocked by policy".into()));
    let manager = SessionManager::with_rules(pool, rules);

    let err = manager.acquire_session(&with_rules()).await.unwrap_err();
    assert!(matches!(err, SessionError::Rules(_)));

    assert_eq!(
        shared.events(),
        vec![
            "create b0",
            "context b0",
            "open b0-p0",
            "close b0-p0",
            "close-context b0",
            "destroy b0",
        ]
    );
    assert_eq!(manager.pool().status().size(), 0);
}

/// Popups reported before the rule failure are closed ahead of the primary page
#[tokio::test]
async fn test_rule_failure_closes_buffered_popups() {
    let factory = FakeFactory::new();
    let shared = factory.shared();
    shared.popup_on_open.store(true, Ordering::SeqCst);
    let pool = Pool::new(factory, pool_config(0, 1));

    let mut rules = MockRules::new();
    rules
        .expect_apply()
        .times(1)
        .returning(|_, _| Err("blocked by policy".into()));
    let manager = SessionManager::with_rules(pool, rules);

    let err = manager.acquire_session(&with_rules()).await.unwrap_err();
    assert!(matches!(err, SessionError::Rules(_)));

    assert_eq!(
        shared.events(),
        vec![
            "create b0",
            "context b0",
            "open b0-p0",
            "open b0-popup1",
            "close b0-popup1",
            "close b0-p0",
            "close-context b0",
            "destroy b0",
        ]
    );
    assert_eq!(manager.pool().status().size(), 0);
}
