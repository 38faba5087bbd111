// ABOUTME: Library crate for browser-pool exposing the pool, session leasing and config API

//! Bounded pool of remote browser instances with scoped page leasing.
//!
//! - [`pool`]: generic `Pool` over any `ResourceFactory` (FIFO acquire,
//!   min/max sizing, freshness validation, eviction, drain)
//! - [`session`]: `SessionManager` leasing a browser with an isolated
//!   context, tracking popups and tearing pages down in reverse order
//! - [`shutdown`]: process-wide hook that drains the pool on SIGINT/SIGTERM
//! - [`config`]: TOML configuration loading
//!
//! ```ignore
//! let manager = SessionManager::create_pool(MyBrowserFactory::new(), PoolConfig::default());
//! manager.pool().register_shutdown_drain(Duration::from_secs(10))?;
//! // On SIGINT/SIGTERM: drain the pool, then exit with 130/143
//! shutdown::listen_for_signals();
//!
//! let html = manager
//!     .fetch_content(&SessionConfig::default(), "https://example.com/")
//!     .await?;
//! ```

#![allow(missing_docs)]

pub mod cli;
pub mod config;
pub mod pool;
pub mod session;
pub mod shutdown;

pub use pool::{ManagedResource, Pool, PoolConfig, PoolError, ResourceFactory};
pub use session::{Session, SessionConfig, SessionError, SessionManager};
