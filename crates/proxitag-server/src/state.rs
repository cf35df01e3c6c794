//! Application state shared across handlers.

use std::sync::Arc;

use proxitag_core::{Config, ProximityStore, SessionHandle};
use tokio::sync::watch;

/// Shared application state handle.
pub type SharedState = Arc<AppState>;

/// Application state.
///
/// The proximity state itself is owned by the session worker; handlers only
/// read it through the store and change it through session commands.
#[derive(Debug)]
pub struct AppState {
    /// Command handle for the proximity session.
    pub session: SessionHandle,

    /// Configuration the server was started with.
    pub config: Config,

    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(session: SessionHandle, config: Config) -> SharedState {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            session,
            config,
            shutdown,
        })
    }

    /// Observable proximity state.
    #[must_use]
    pub const fn store(&self) -> &ProximityStore {
        self.session.store()
    }

    /// Signal long-lived responses (event streams) to finish.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Receiver that flips to `true` once shutdown begins.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
