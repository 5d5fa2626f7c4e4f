//! Standing watches and their re-arming state machine.
//!
//! Each standing watch is driven by exactly one spawned task that owns its
//! [`WatchContext`]. The task issues the read, delivers the result,
//! waits for the one-shot notification, and re-issues the read for the
//! event kinds that re-arm. Because the context is owned by the task and
//! the task ends on every terminal path, the exactly-once teardown
//! contract is enforced by move semantics: there is no code path that can
//! touch a context after its task has returned, and none that can end the
//! task twice.
//!
//! Re-arming happens strictly from inside the handling of the previous
//! notification, so no two re-arm attempts for one context are ever in
//! flight concurrently, and deliveries on one watch preserve the
//! service's event order.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::backend::{BackendSession, WatchEventRx};
use crate::error::{CoordinationError, CoordinationResult};
use crate::types::{NodeMetadata, WatchEventKind};

/// One delivery on a standing watch.
///
/// A watch stream is zero or more `Update`s followed by at most one
/// terminal delivery (`Deleted` or `Canceled`), after which the stream
/// ends. A stream that ends without a terminal delivery means the client
/// was shut down.
#[derive(Debug)]
pub enum WatchDelivery<T> {
    /// A fresh read of the watched state (the first delivery is the
    /// initial read, later ones follow change notifications).
    Update(T),
    /// The watched node was deleted. Terminal.
    Deleted,
    /// The watch is void: the initial read failed, a re-issue failed, or
    /// the service reported it could not keep watching. Terminal; whether
    /// to re-establish the watch is the caller's decision.
    Canceled(CoordinationError),
}

/// Consumer end of a standing watch.
#[derive(Debug)]
pub struct Watch<T> {
    path: String,
    rx: mpsc::UnboundedReceiver<WatchDelivery<T>>,
}

/// Standing watch on a node's value.
pub type NodeWatch = Watch<(Vec<u8>, NodeMetadata)>;
/// Standing watch on a node's child list.
pub type ChildrenWatch = Watch<Vec<String>>;
/// Standing watch on a node's existence.
pub type ExistsWatch = Watch<Option<NodeMetadata>>;

impl<T> Watch<T> {
    /// The watched path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Receive the next delivery. `None` means the stream has ended.
    pub async fn next(&mut self) -> Option<WatchDelivery<T>> {
        self.rx.recv().await
    }
}

/// The read operation a standing watch keeps re-issuing.
#[async_trait]
pub(crate) trait WatchOp: Send + Sync + 'static {
    type Output: Send + 'static;
    const KIND: &'static str;

    async fn issue(
        session: &dyn BackendSession,
        path: &str,
    ) -> (CoordinationResult<Self::Output>, Option<WatchEventRx>);

    /// Event kinds that re-arm this watch rather than terminate it.
    fn rearms_on(kind: WatchEventKind) -> bool;
}

pub(crate) struct NodeOp;

#[async_trait]
impl WatchOp for NodeOp {
    type Output = (Vec<u8>, NodeMetadata);
    const KIND: &'static str = "node";

    async fn issue(
        session: &dyn BackendSession,
        path: &str,
    ) -> (CoordinationResult<Self::Output>, Option<WatchEventRx>) {
        session.get_node(path, true).await
    }

    fn rearms_on(kind: WatchEventKind) -> bool {
        kind == WatchEventKind::Changed
    }
}

pub(crate) struct ChildrenOp;

#[async_trait]
impl WatchOp for ChildrenOp {
    type Output = Vec<String>;
    const KIND: &'static str = "children";

    async fn issue(
        session: &dyn BackendSession,
        path: &str,
    ) -> (CoordinationResult<Self::Output>, Option<WatchEventRx>) {
        session.get_children(path, true).await
    }

    fn rearms_on(kind: WatchEventKind) -> bool {
        kind == WatchEventKind::ChildrenChanged
    }
}

pub(crate) struct ExistsOp;

#[async_trait]
impl WatchOp for ExistsOp {
    type Output = Option<NodeMetadata>;
    const KIND: &'static str = "exists";

    async fn issue(
        session: &dyn BackendSession,
        path: &str,
    ) -> (CoordinationResult<Self::Output>, Option<WatchEventRx>) {
        session.exists(path, true).await
    }

    fn rearms_on(kind: WatchEventKind) -> bool {
        matches!(kind, WatchEventKind::Created | WatchEventKind::Changed)
    }
}

/// State owned by a standing watch's driver task: the target path, the
/// session to re-issue reads against, and the delivery channel standing in
/// for the caller's continuation.
pub(crate) struct WatchContext<O: WatchOp> {
    path: String,
    session: Arc<dyn BackendSession>,
    tx: mpsc::UnboundedSender<WatchDelivery<O::Output>>,
    _op: PhantomData<O>,
}

/// Register a standing watch, returning the consumer end and the driver
/// task handle (aborted on client shutdown, which voids the watch).
pub(crate) fn spawn<O: WatchOp>(
    session: Arc<dyn BackendSession>,
    path: String,
) -> (Watch<O::Output>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let context = WatchContext::<O> {
        path: path.clone(),
        session,
        tx,
        _op: PhantomData,
    };
    let driver = tokio::spawn(context.run());
    (Watch { path, rx }, driver)
}

impl<O: WatchOp> WatchContext<O> {
    async fn run(self) {
        let mut pending = O::issue(self.session.as_ref(), &self.path).await;
        loop {
            let (result, events) = pending;
            match result {
                Ok(output) => {
                    if self.tx.send(WatchDelivery::Update(output)).is_err() {
                        // Caller dropped the watch; nothing left to serve.
                        debug!(path = %self.path, "{} watch receiver dropped", O::KIND);
                        return;
                    }
                }
                Err(err) => {
                    // A failed read leaves nothing armed; the watch is void.
                    let _ = self.tx.send(WatchDelivery::Canceled(err));
                    return;
                }
            }
            let Some(events) = events else {
                let _ = self.tx.send(WatchDelivery::Canceled(CoordinationError::Transport(
                    format!("service armed no watch for '{}'", self.path),
                )));
                return;
            };
            match events.await {
                Ok(event) if O::rearms_on(event.kind) => {
                    debug!(path = %self.path, kind = ?event.kind, "re-arming {} watch", O::KIND);
                    pending = O::issue(self.session.as_ref(), &self.path).await;
                }
                Ok(event) if event.kind == WatchEventKind::Deleted => {
                    let _ = self.tx.send(WatchDelivery::Deleted);
                    return;
                }
                Ok(event) => {
                    // NotWatching, or a kind this operation cannot act on.
                    let _ = self.tx.send(WatchDelivery::Canceled(CoordinationError::Transport(
                        format!("watch on '{}' voided by {:?} event", self.path, event.kind),
                    )));
                    return;
                }
                Err(_) => {
                    let _ = self.tx.send(WatchDelivery::Canceled(
                        CoordinationError::NotConnected(format!(
                            "connection closed while watching '{}'",
                            self.path
                        )),
                    ));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::config::ClientConfig;
    use crate::memory::MemoryBackend;
    use crate::types::CreateMode;

    async fn session(backend: &MemoryBackend) -> Arc<dyn BackendSession> {
        let (session, _events) = backend
            .connect(&ClientConfig::default())
            .await
            .expect("connect");
        session
    }

    #[tokio::test]
    async fn test_node_watch_rearms_until_deleted() {
        let backend = MemoryBackend::new();
        let session = session(&backend).await;
        session
            .create("/app", b"v1", CreateMode::Persistent)
            .await
            .expect("create");

        let (mut watch, _driver) = spawn::<NodeOp>(Arc::clone(&session), "/app".into());
        assert_eq!(watch.path(), "/app");

        let Some(WatchDelivery::Update((value, _))) = watch.next().await else {
            panic!("expected initial read");
        };
        assert_eq!(value, b"v1");

        session.set_node("/app", b"v2", -1).await.expect("set");
        let Some(WatchDelivery::Update((value, meta))) = watch.next().await else {
            panic!("expected re-armed read");
        };
        assert_eq!(value, b"v2");
        assert_eq!(meta.version, 1);

        session.delete_node("/app", -1).await.expect("delete");
        assert!(matches!(watch.next().await, Some(WatchDelivery::Deleted)));
        // Terminal delivery closes the stream: the context is gone.
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_on_absent_node_is_canceled() {
        let backend = MemoryBackend::new();
        let session = session(&backend).await;

        let (mut watch, _driver) = spawn::<NodeOp>(session, "/missing".into());
        match watch.next().await {
            Some(WatchDelivery::Canceled(err)) => assert!(err.is_not_found()),
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_children_watch_tracks_membership() {
        let backend = MemoryBackend::new();
        let session = session(&backend).await;
        session
            .create("/group", b"", CreateMode::Persistent)
            .await
            .expect("create");

        let (mut watch, _driver) = spawn::<ChildrenOp>(Arc::clone(&session), "/group".into());
        let Some(WatchDelivery::Update(names)) = watch.next().await else {
            panic!("expected initial listing");
        };
        assert!(names.is_empty());

        session
            .create("/group/node-", b"", CreateMode::EphemeralSequential)
            .await
            .expect("create");
        let Some(WatchDelivery::Update(names)) = watch.next().await else {
            panic!("expected refreshed listing");
        };
        assert_eq!(names, vec!["node-0000000001".to_string()]);
    }

    #[tokio::test]
    async fn test_not_watching_cancels() {
        let backend = MemoryBackend::new();
        let session = session(&backend).await;
        session
            .create("/group", b"", CreateMode::Persistent)
            .await
            .expect("create");

        let (mut watch, _driver) = spawn::<ChildrenOp>(session, "/group".into());
        assert!(matches!(watch.next().await, Some(WatchDelivery::Update(_))));

        backend.lose_watches("/group");
        match watch.next().await {
            Some(WatchDelivery::Canceled(err)) => assert!(err.is_retryable()),
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_exists_watch_spans_creation_and_deletion() {
        let backend = MemoryBackend::new();
        let session = session(&backend).await;

        let (mut watch, _driver) = spawn::<ExistsOp>(Arc::clone(&session), "/flag".into());
        let Some(WatchDelivery::Update(meta)) = watch.next().await else {
            panic!("expected initial probe");
        };
        assert!(meta.is_none());

        session
            .create("/flag", b"", CreateMode::Persistent)
            .await
            .expect("create");
        let Some(WatchDelivery::Update(meta)) = watch.next().await else {
            panic!("expected probe after creation");
        };
        assert!(meta.is_some());

        session.delete_node("/flag", -1).await.expect("delete");
        assert!(matches!(watch.next().await, Some(WatchDelivery::Deleted)));
        assert!(watch.next().await.is_none());
    }
}
