//! Coordination client facade.
//!
//! Owns the session against the backing service, exposes plain read/write
//! operations and standing watches, and runs the session liveness
//! machinery: a pump task that folds the service's connection events into
//! a single observable state, and a [`SessionMonitor`] that turns loss of
//! contact into an expiry decision.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::{Backend, BackendSession};
use crate::config::ClientConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::session::{ExpiryHandler, SessionMonitor, SessionTransition};
use crate::types::{CreateMode, NodeMetadata, SessionState};
use crate::watch::{
    ChildrenOp, ChildrenWatch, ExistsOp, ExistsWatch, NodeOp, NodeWatch, Watch, WatchOp,
    spawn as spawn_watch_driver,
};

struct ClientShared {
    session: Arc<dyn BackendSession>,
    transitions: watch::Receiver<SessionTransition>,
    /// Pump, monitor, and standing-watch driver tasks; aborted on
    /// shutdown, which implicitly voids all pending watches.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Client facade over a backing coordination service.
///
/// Cheap to clone; all clones share one session. Construction blocks
/// until the session reaches `Connected` (success) or `Expired` /
/// timeout (failure), which is the facade's only suspension point outside
/// the operations themselves.
#[derive(Clone)]
pub struct CoordinationClient {
    inner: Arc<ClientShared>,
}

impl CoordinationClient {
    /// Establish a session and start liveness monitoring.
    ///
    /// `on_expiry` is invoked exactly once if the session is ever
    /// determined expired; when `None`, expiry terminates the process.
    pub async fn connect(
        backend: Arc<dyn Backend>,
        config: ClientConfig,
        on_expiry: Option<ExpiryHandler>,
    ) -> CoordinationResult<Self> {
        let (session, mut events) = backend.connect(&config).await?;

        let (tx, transitions) =
            watch::channel(SessionTransition::now(SessionState::Connecting));
        let pump = tokio::spawn(async move {
            while let Some(state) = events.recv().await {
                debug!(?state, "session state transition");
                if tx.send(SessionTransition::now(state)).is_err() {
                    return;
                }
                if state == SessionState::Expired {
                    // Terminal: the session never transitions again.
                    return;
                }
            }
        });

        if let Err(err) =
            Self::await_session(transitions.clone(), config.connect_timeout).await
        {
            pump.abort();
            session.close().await;
            return Err(err);
        }

        let session_timeout = session.negotiated_timeout();
        let monitor = SessionMonitor::new(
            transitions.clone(),
            session_timeout,
            config.monitor_poll_interval,
            on_expiry,
        )
        .spawn();
        info!(
            session_id = session.session_id(),
            session_timeout_ms = session_timeout.as_millis() as u64,
            "coordination session established"
        );

        Ok(Self {
            inner: Arc::new(ClientShared {
                session,
                transitions,
                tasks: Mutex::new(vec![pump, monitor]),
            }),
        })
    }

    /// Wait for the session to first reach `Connected` or `Expired`.
    async fn await_session(
        mut transitions: watch::Receiver<SessionTransition>,
        timeout: Option<Duration>,
    ) -> CoordinationResult<()> {
        let wait = async move {
            loop {
                match transitions.borrow_and_update().state {
                    SessionState::Connected => return Ok(()),
                    SessionState::Expired => return Err(CoordinationError::SessionExpired),
                    SessionState::Connecting | SessionState::Disconnected => {}
                }
                if transitions.changed().await.is_err() {
                    return Err(CoordinationError::NotConnected(
                        "connection lost before the session was established".into(),
                    ));
                }
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                CoordinationError::Timeout(format!(
                    "session not established within {limit:?}"
                ))
            })?,
            None => wait.await,
        }
    }

    /// Current session state as last reported by the service.
    pub fn session_state(&self) -> SessionState {
        self.inner.transitions.borrow().state
    }

    /// Identifier the service assigned to this session.
    pub fn session_id(&self) -> u64 {
        self.inner.session.session_id()
    }

    /// Session timeout negotiated with the service.
    pub fn session_timeout(&self) -> Duration {
        self.inner.session.negotiated_timeout()
    }

    /// Read a node's value and metadata.
    pub async fn get_node(&self, path: &str) -> CoordinationResult<(Vec<u8>, NodeMetadata)> {
        let (result, _) = self.inner.session.get_node(path, false).await;
        result
    }

    /// List a node's direct children (names only).
    pub async fn get_children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        let (result, _) = self.inner.session.get_children(path, false).await;
        result
    }

    /// Check a node's existence, returning its metadata when present.
    pub async fn exists(&self, path: &str) -> CoordinationResult<Option<NodeMetadata>> {
        let (result, _) = self.inner.session.exists(path, false).await;
        result
    }

    /// Create a node, returning the assigned path (which differs from the
    /// requested one for sequential modes).
    pub async fn create(
        &self,
        path: &str,
        value: &[u8],
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        self.inner.session.create(path, value, mode).await
    }

    /// Overwrite a node's value; `-1` writes unconditionally.
    pub async fn set_node(
        &self,
        path: &str,
        value: &[u8],
        version: i32,
    ) -> CoordinationResult<NodeMetadata> {
        self.inner.session.set_node(path, value, version).await
    }

    /// Delete a node; `-1` deletes unconditionally.
    pub async fn delete_node(&self, path: &str, version: i32) -> CoordinationResult<()> {
        self.inner.session.delete_node(path, version).await
    }

    /// Establish a standing watch on a node's value. Returns immediately;
    /// deliveries (starting with the initial read) arrive on the stream.
    pub fn watch_node(&self, path: &str) -> NodeWatch {
        self.spawn_watch::<NodeOp>(path)
    }

    /// Establish a standing watch on a node's child list.
    pub fn watch_children(&self, path: &str) -> ChildrenWatch {
        self.spawn_watch::<ChildrenOp>(path)
    }

    /// Establish a standing watch on a node's existence.
    pub fn watch_exists(&self, path: &str) -> ExistsWatch {
        self.spawn_watch::<ExistsOp>(path)
    }

    fn spawn_watch<O: WatchOp>(&self, path: &str) -> Watch<O::Output> {
        let (stream, driver) =
            spawn_watch_driver::<O>(Arc::clone(&self.inner.session), path.to_string());
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .expect("client task list lock poisoned");
        // Drop handles of drivers that already delivered their terminal
        // event, so watch churn does not grow the list without bound.
        tasks.retain(|task| !task.is_finished());
        tasks.push(driver);
        stream
    }

    /// Tear the client down: stop the monitor and watch drivers, then
    /// close the session (removing its ephemeral nodes and voiding its
    /// watches on the service side).
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = {
            let mut guard = self
                .inner
                .tasks
                .lock()
                .expect("client task list lock poisoned");
            guard.drain(..).collect()
        };
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        self.inner.session.close().await;
        info!("coordination client shut down");
    }
}

impl std::fmt::Debug for CoordinationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationClient")
            .field("session_id", &self.inner.session.session_id())
            .field("session_state", &self.session_state())
            .finish_non_exhaustive()
    }
}
