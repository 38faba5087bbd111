// ABOUTME: Process-wide shutdown hook run once on SIGINT/SIGTERM
//
// A single hook (normally the pool drain registered by
// `Pool::register_shutdown_drain`) is stored in a global coordinator. The
// signal listener runs it once and then exits the process, since installing
// a tokio signal handler replaces the default terminate behaviour.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use futures_util::future::BoxFuture;
use lazy_static::lazy_static;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

lazy_static! {
    /// Coordinator shared by the whole process
    static ref GLOBAL: ShutdownCoordinator = ShutdownCoordinator::new();
}

/// Errors from the shutdown coordinator
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShutdownError {
    /// A hook is already registered
    #[error("A shutdown hook is already registered")]
    AlreadyRegistered,
}

/// Holds one shutdown hook and runs it at most once
pub struct ShutdownCoordinator {
    hook: Mutex<Option<ShutdownHook>>,
    registered: AtomicBool,
    fired: AtomicBool,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("registered", &self.is_registered())
            .field("fired", &self.has_fired())
            .finish()
    }
}

impl ShutdownCoordinator {
    /// Coordinator with no hook
    pub fn new() -> Self {
        Self {
            hook: Mutex::new(None),
            registered: AtomicBool::new(false),
            fired: AtomicBool::new(false),
        }
    }

    /// Register the shutdown hook
    ///
    /// Only one hook is accepted for the lifetime of the coordinator.
    pub fn register<H>(&self, hook: H) -> Result<(), ShutdownError>
    where
        H: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        if self.registered.swap(true, Ordering::SeqCst) {
            warn!("Shutdown hook already registered, ignoring second registration");
            return Err(ShutdownError::AlreadyRegistered);
        }

        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
        debug!("Shutdown hook registered");
        Ok(())
    }

    /// Run the hook if it has not run yet
    ///
    /// Returns `false` when this call did nothing because the hook already
    /// ran or none was registered yet. A call made before registration does
    /// not prevent the hook from running later.
    pub async fn run(&self) -> bool {
        let hook = self.hook.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(hook) = hook else {
            if self.has_fired() {
                debug!("Shutdown hook already ran");
            } else {
                debug!("No shutdown hook registered");
            }
            return false;
        };

        self.fired.store(true, Ordering::SeqCst);
        info!("Running shutdown hook");
        hook().await;
        info!("Shutdown hook finished");
        true
    }

    /// Whether a hook was ever registered
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Whether the hook was taken by `run()`
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// The process-wide coordinator
pub fn global() -> &'static ShutdownCoordinator {
    &GLOBAL
}

/// Termination signal that triggered shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl ShutdownSignal {
    /// Conventional exit status for a process ended by this signal
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Interrupt => 130,
            Self::Terminate => 143,
        }
    }
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Wait for Ctrl-C (and SIGTERM on Unix), then run the global hook
///
/// Returns the signal once the hook finished. The caller owns process exit;
/// use `listen_for_signals` to get the default exit behaviour back.
pub async fn wait_for_shutdown() -> ShutdownSignal {
    let signal = wait_for_signal().await;
    info!(signal = %signal, "Shutdown signal received");
    global().run().await;
    signal
}

/// Spawn a task that runs the global hook on Ctrl-C (and SIGTERM on Unix)
/// and then exits the process with the signal's conventional status
pub fn listen_for_signals() -> JoinHandle<()> {
    tokio::spawn(async {
        let signal = wait_for_shutdown().await;
        info!(code = signal.exit_code(), "Exiting after shutdown hook");
        std::process::exit(signal.exit_code());
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> ShutdownSignal {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to listen for Ctrl-C");
                    }
                    ShutdownSignal::Interrupt
                }
                _ = terminate.recv() => ShutdownSignal::Terminate,
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl-C only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            ShutdownSignal::Interrupt
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> ShutdownSignal {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
    }
    ShutdownSignal::Interrupt
}
