//! In-process backend with full namespace semantics.
//!
//! One [`MemoryBackend`] is a namespace shared by any number of sessions,
//! which makes it suitable for multi-client scenarios (each connected
//! client is an independent session over the same tree). Ephemeral
//! ownership, per-parent sequential counters, and one-shot watches follow
//! the backing-service contract in [`crate::backend`].
//!
//! Test-oriented controls expose the failure modes the facade has to
//! survive: [`MemoryBackend::expire_session`],
//! [`MemoryBackend::disconnect`] / [`MemoryBackend::reconnect`],
//! [`MemoryBackend::lose_watches`], and
//! [`MemoryBackend::fail_next_create_reply`] (the create is applied
//! server-side but reported as a transport failure, which is exactly the
//! ambiguous outcome that forces value-based node identification).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::backend::{Backend, BackendSession, SessionEventRx, WatchEventRx};
use crate::config::ClientConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::types::{CreateMode, NodeMetadata, SessionState, WatchEvent, WatchEventKind};

/// Shared in-memory namespace acting as the backing service.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Namespace>>,
}

#[derive(Debug, Default)]
struct Namespace {
    nodes: BTreeMap<String, NodeEntry>,
    next_session_id: u64,
    sessions: HashMap<u64, SessionEntry>,
    data_watches: WatchMap,
    child_watches: WatchMap,
    exists_watches: WatchMap,
    /// Number of upcoming creates to apply but report as failed.
    fail_create_replies: u32,
}

type WatchMap = HashMap<String, Vec<oneshot::Sender<WatchEvent>>>;

#[derive(Debug)]
struct NodeEntry {
    value: Vec<u8>,
    version: i32,
    ephemeral_owner: Option<u64>,
    /// Counter backing the sequential suffixes of this node's children.
    next_sequence: u64,
}

impl NodeEntry {
    fn new(value: Vec<u8>, ephemeral_owner: Option<u64>) -> Self {
        Self {
            value,
            version: 0,
            ephemeral_owner,
            next_sequence: 1,
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    events: mpsc::UnboundedSender<SessionState>,
    alive: bool,
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

fn validate_path(path: &str) -> CoordinationResult<()> {
    if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) || path.contains("//") {
        return Err(CoordinationError::Config(format!(
            "invalid path: '{path}'"
        )));
    }
    Ok(())
}

fn fire(map: &mut WatchMap, path: &str, kind: WatchEventKind) {
    if let Some(senders) = map.remove(path) {
        for tx in senders {
            // Receiver may already be gone; a voided watch is not an error.
            let _ = tx.send(WatchEvent {
                kind,
                path: path.to_string(),
            });
        }
    }
}

fn register(map: &mut WatchMap, path: &str) -> WatchEventRx {
    let (tx, rx) = oneshot::channel();
    map.entry(path.to_string()).or_default().push(tx);
    rx
}

impl Namespace {
    fn check_alive(&self, session_id: u64) -> CoordinationResult<()> {
        match self.sessions.get(&session_id) {
            Some(entry) if entry.alive => Ok(()),
            Some(_) => Err(CoordinationError::SessionExpired),
            None => Err(CoordinationError::NotConnected(format!(
                "unknown session {session_id}"
            ))),
        }
    }

    fn child_names(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let name = &key[prefix.len()..];
                (!name.is_empty() && !name.contains('/')).then(|| name.to_string())
            })
            .collect()
    }

    fn metadata(&self, path: &str, entry: &NodeEntry) -> NodeMetadata {
        NodeMetadata {
            version: entry.version,
            data_len: entry.value.len(),
            num_children: self.child_names(path).len(),
            ephemeral_owner: entry.ephemeral_owner,
        }
    }

    /// Remove a node and fire every watch that observes the removal.
    fn remove_node(&mut self, path: &str) {
        self.nodes.remove(path);
        fire(&mut self.data_watches, path, WatchEventKind::Deleted);
        fire(&mut self.exists_watches, path, WatchEventKind::Deleted);
        fire(&mut self.child_watches, path, WatchEventKind::Deleted);
        let parent = parent_of(path);
        fire(
            &mut self.child_watches,
            &parent,
            WatchEventKind::ChildrenChanged,
        );
    }

    /// Remove all ephemeral nodes owned by a session, firing watches.
    fn reap_ephemerals(&mut self, session_id: u64) {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, entry)| entry.ephemeral_owner == Some(session_id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            debug!(%path, session_id, "reaping ephemeral node");
            self.remove_node(&path);
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), NodeEntry::new(Vec::new(), None));
        Self {
            inner: Arc::new(Mutex::new(Namespace {
                nodes,
                ..Namespace::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Namespace> {
        self.inner.lock().expect("memory namespace lock poisoned")
    }

    /// Expire a session: the service notifies it and removes its
    /// ephemeral nodes.
    pub fn expire_session(&self, session_id: u64) {
        let mut ns = self.lock();
        if let Some(entry) = ns.sessions.get_mut(&session_id) {
            entry.alive = false;
            let _ = entry.events.send(SessionState::Expired);
        }
        ns.reap_ephemerals(session_id);
    }

    /// Report a connection drop to a session without expiring it.
    pub fn disconnect(&self, session_id: u64) {
        let ns = self.lock();
        if let Some(entry) = ns.sessions.get(&session_id)
            && entry.alive
        {
            let _ = entry.events.send(SessionState::Disconnected);
        }
    }

    /// Report a successful reconnect to a session.
    pub fn reconnect(&self, session_id: u64) {
        let ns = self.lock();
        if let Some(entry) = ns.sessions.get(&session_id)
            && entry.alive
        {
            let _ = entry.events.send(SessionState::Connected);
        }
    }

    /// Void every pending watch on a path with a `NotWatching` event.
    pub fn lose_watches(&self, path: &str) {
        let mut ns = self.lock();
        fire(&mut ns.data_watches, path, WatchEventKind::NotWatching);
        fire(&mut ns.child_watches, path, WatchEventKind::NotWatching);
        fire(&mut ns.exists_watches, path, WatchEventKind::NotWatching);
    }

    /// Make the next create apply server-side but report a transport
    /// failure to the caller.
    pub fn fail_next_create_reply(&self) {
        self.lock().fail_create_replies += 1;
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn connect(
        &self,
        config: &ClientConfig,
    ) -> CoordinationResult<(Arc<dyn BackendSession>, SessionEventRx)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = {
            let mut ns = self.lock();
            let session_id = ns.next_session_id;
            ns.next_session_id += 1;
            ns.sessions.insert(
                session_id,
                SessionEntry {
                    events: tx.clone(),
                    alive: true,
                },
            );
            session_id
        };
        let _ = tx.send(SessionState::Connected);
        debug!(session_id, "memory backend session established");
        let session = MemorySession {
            session_id,
            inner: Arc::clone(&self.inner),
            negotiated_timeout: config.session_timeout,
        };
        Ok((Arc::new(session), rx))
    }
}

/// One session over a [`MemoryBackend`] namespace.
#[derive(Debug)]
pub struct MemorySession {
    session_id: u64,
    inner: Arc<Mutex<Namespace>>,
    negotiated_timeout: Duration,
}

impl MemorySession {
    fn lock(&self) -> std::sync::MutexGuard<'_, Namespace> {
        self.inner.lock().expect("memory namespace lock poisoned")
    }
}

#[async_trait]
impl BackendSession for MemorySession {
    async fn get_node(
        &self,
        path: &str,
        watch: bool,
    ) -> (CoordinationResult<(Vec<u8>, NodeMetadata)>, Option<WatchEventRx>) {
        let mut ns = self.lock();
        if let Err(err) = ns.check_alive(self.session_id) {
            return (Err(err), None);
        }
        // Failed reads arm no watch.
        let Some(entry) = ns.nodes.get(path) else {
            return (Err(CoordinationError::NotFound(path.to_string())), None);
        };
        let result = (entry.value.clone(), ns.metadata(path, entry));
        let rx = watch.then(|| register(&mut ns.data_watches, path));
        (Ok(result), rx)
    }

    async fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> (CoordinationResult<Vec<String>>, Option<WatchEventRx>) {
        let mut ns = self.lock();
        if let Err(err) = ns.check_alive(self.session_id) {
            return (Err(err), None);
        }
        if !ns.nodes.contains_key(path) {
            return (Err(CoordinationError::NotFound(path.to_string())), None);
        }
        let names = ns.child_names(path);
        let rx = watch.then(|| register(&mut ns.child_watches, path));
        (Ok(names), rx)
    }

    async fn exists(
        &self,
        path: &str,
        watch: bool,
    ) -> (CoordinationResult<Option<NodeMetadata>>, Option<WatchEventRx>) {
        let mut ns = self.lock();
        if let Err(err) = ns.check_alive(self.session_id) {
            return (Err(err), None);
        }
        let meta = ns.nodes.get(path).map(|entry| ns.metadata(path, entry));
        // Existence watches arm on absence too: Created is meaningful.
        let rx = watch.then(|| register(&mut ns.exists_watches, path));
        (Ok(meta), rx)
    }

    async fn create(
        &self,
        path: &str,
        value: &[u8],
        mode: CreateMode,
    ) -> CoordinationResult<String> {
        let mut ns = self.lock();
        ns.check_alive(self.session_id)?;
        validate_path(path)?;
        if path == "/" {
            return Err(CoordinationError::AlreadyExists(path.to_string()));
        }

        let parent = parent_of(path);
        let Some(parent_entry) = ns.nodes.get_mut(&parent) else {
            return Err(CoordinationError::NotFound(parent));
        };
        if parent_entry.ephemeral_owner.is_some() {
            return Err(CoordinationError::EphemeralParent(parent));
        }

        let assigned = if mode.is_sequential() {
            let sequence = parent_entry.next_sequence;
            parent_entry.next_sequence += 1;
            format!("{path}{sequence:010}")
        } else {
            if ns.nodes.contains_key(path) {
                return Err(CoordinationError::AlreadyExists(path.to_string()));
            }
            path.to_string()
        };

        let owner = mode.is_ephemeral().then_some(self.session_id);
        ns.nodes
            .insert(assigned.clone(), NodeEntry::new(value.to_vec(), owner));
        fire(&mut ns.exists_watches, &assigned, WatchEventKind::Created);
        fire(
            &mut ns.child_watches,
            &parent,
            WatchEventKind::ChildrenChanged,
        );

        if ns.fail_create_replies > 0 {
            ns.fail_create_replies -= 1;
            debug!(path = %assigned, "create applied but reply dropped");
            return Err(CoordinationError::Transport(format!(
                "create reply lost for '{path}'"
            )));
        }
        Ok(assigned)
    }

    async fn set_node(
        &self,
        path: &str,
        value: &[u8],
        version: i32,
    ) -> CoordinationResult<NodeMetadata> {
        let mut ns = self.lock();
        ns.check_alive(self.session_id)?;
        let Some(entry) = ns.nodes.get_mut(path) else {
            return Err(CoordinationError::NotFound(path.to_string()));
        };
        if version != -1 && version != entry.version {
            return Err(CoordinationError::Transport(format!(
                "version mismatch for '{path}': node at {}, write expected {version}",
                entry.version
            )));
        }
        entry.value = value.to_vec();
        entry.version += 1;
        let (version, data_len, ephemeral_owner) =
            (entry.version, entry.value.len(), entry.ephemeral_owner);
        let meta = NodeMetadata {
            version,
            data_len,
            num_children: ns.child_names(path).len(),
            ephemeral_owner,
        };
        fire(&mut ns.data_watches, path, WatchEventKind::Changed);
        fire(&mut ns.exists_watches, path, WatchEventKind::Changed);
        Ok(meta)
    }

    async fn delete_node(&self, path: &str, version: i32) -> CoordinationResult<()> {
        let mut ns = self.lock();
        ns.check_alive(self.session_id)?;
        let Some(entry) = ns.nodes.get(path) else {
            return Err(CoordinationError::NotFound(path.to_string()));
        };
        if version != -1 && version != entry.version {
            return Err(CoordinationError::Transport(format!(
                "version mismatch for '{path}': node at {}, delete expected {version}",
                entry.version
            )));
        }
        if !ns.child_names(path).is_empty() {
            return Err(CoordinationError::NotEmpty(path.to_string()));
        }
        ns.remove_node(path);
        Ok(())
    }

    fn session_id(&self) -> u64 {
        self.session_id
    }

    fn negotiated_timeout(&self) -> Duration {
        self.negotiated_timeout
    }

    async fn close(&self) {
        let mut ns = self.lock();
        if let Some(entry) = ns.sessions.get_mut(&self.session_id) {
            entry.alive = false;
        }
        ns.reap_ephemerals(self.session_id);
        debug!(session_id = self.session_id, "memory backend session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn session(backend: &MemoryBackend) -> (Arc<dyn BackendSession>, SessionEventRx) {
        backend
            .connect(&ClientConfig::default())
            .await
            .expect("connect")
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/a"), "/");
        assert_eq!(parent_of("/a/b"), "/a");
        assert_eq!(parent_of("/a/b/node-"), "/a/b");
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;

        let path = session
            .create("/app", b"v1", CreateMode::Persistent)
            .await
            .expect("create");
        assert_eq!(path, "/app");

        let (result, _) = session.get_node("/app", false).await;
        let (value, meta) = result.expect("get");
        assert_eq!(value, b"v1");
        assert_eq!(meta.version, 0);
        assert_eq!(meta.ephemeral_owner, None);
    }

    #[tokio::test]
    async fn test_create_missing_parent() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;

        let err = session
            .create("/a/b", b"", CreateMode::Persistent)
            .await
            .expect_err("parent absent");
        assert!(matches!(err, CoordinationError::NotFound(p) if p == "/a"));
    }

    #[tokio::test]
    async fn test_duplicate_create() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;

        session
            .create("/app", b"", CreateMode::Persistent)
            .await
            .expect("create");
        let err = session
            .create("/app", b"", CreateMode::Persistent)
            .await
            .expect_err("duplicate");
        assert!(matches!(err, CoordinationError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_sequential_suffixes() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;

        session
            .create("/group", b"", CreateMode::Persistent)
            .await
            .expect("parent");
        let first = session
            .create("/group/node-", b"a", CreateMode::EphemeralSequential)
            .await
            .expect("create");
        let second = session
            .create("/group/node-", b"b", CreateMode::EphemeralSequential)
            .await
            .expect("create");
        assert_eq!(first, "/group/node-0000000001");
        assert_eq!(second, "/group/node-0000000002");

        let (children, _) = session.get_children("/group", false).await;
        assert_eq!(
            children.expect("children"),
            vec!["node-0000000001".to_string(), "node-0000000002".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_not_empty() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;

        session
            .create("/a", b"", CreateMode::Persistent)
            .await
            .expect("create");
        session
            .create("/a/b", b"", CreateMode::Persistent)
            .await
            .expect("create");
        let err = session.delete_node("/a", -1).await.expect_err("not empty");
        assert!(matches!(err, CoordinationError::NotEmpty(_)));

        session.delete_node("/a/b", -1).await.expect("delete leaf");
        session.delete_node("/a", -1).await.expect("delete parent");
    }

    #[tokio::test]
    async fn test_set_versioning() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;

        session
            .create("/app", b"v1", CreateMode::Persistent)
            .await
            .expect("create");
        let meta = session.set_node("/app", b"v2", 0).await.expect("set");
        assert_eq!(meta.version, 1);

        let err = session
            .set_node("/app", b"v3", 0)
            .await
            .expect_err("stale version");
        assert!(err.is_retryable());

        let meta = session.set_node("/app", b"v3", -1).await.expect("unconditional");
        assert_eq!(meta.version, 2);
    }

    #[tokio::test]
    async fn test_ephemeral_cannot_have_children() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;

        session
            .create("/worker", b"", CreateMode::Ephemeral)
            .await
            .expect("create");
        let err = session
            .create("/worker/task", b"", CreateMode::Persistent)
            .await
            .expect_err("ephemeral parent");
        // Permanent condition: callers must not retry it.
        assert!(!err.is_retryable());
        assert!(matches!(err, CoordinationError::EphemeralParent(p) if p == "/worker"));
    }

    #[tokio::test]
    async fn test_expire_reaps_ephemerals_and_notifies() {
        let backend = MemoryBackend::new();
        let (session, mut events) = session(&backend).await;
        assert_eq!(events.recv().await, Some(SessionState::Connected));

        session
            .create("/group", b"", CreateMode::Persistent)
            .await
            .expect("parent");
        session
            .create("/group/node-", b"", CreateMode::EphemeralSequential)
            .await
            .expect("ephemeral");

        let (_, child_watch) = session.get_children("/group", true).await;
        let child_watch = child_watch.expect("armed");

        backend.expire_session(session.session_id());
        assert_eq!(events.recv().await, Some(SessionState::Expired));

        let event = child_watch.await.expect("fired");
        assert_eq!(event.kind, WatchEventKind::ChildrenChanged);

        let (children, _) = {
            let (other, _events) = backend
                .connect(&ClientConfig::default())
                .await
                .expect("connect");
            other.get_children("/group", false).await
        };
        assert!(children.expect("children").is_empty());
    }

    #[tokio::test]
    async fn test_data_watch_is_one_shot() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;

        session
            .create("/app", b"v1", CreateMode::Persistent)
            .await
            .expect("create");
        let (_, rx) = session.get_node("/app", true).await;
        let rx = rx.expect("armed");

        session.set_node("/app", b"v2", -1).await.expect("set");
        let event = rx.await.expect("fired");
        assert_eq!(event.kind, WatchEventKind::Changed);

        // The registration is spent; a second set fires nothing further.
        session.set_node("/app", b"v3", -1).await.expect("set");
    }

    #[tokio::test]
    async fn test_exists_watch_arms_on_absence() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;

        let (present, rx) = session.exists("/pending", true).await;
        assert_eq!(present.expect("exists"), None);
        let rx = rx.expect("armed");

        session
            .create("/pending", b"", CreateMode::Persistent)
            .await
            .expect("create");
        let event = rx.await.expect("fired");
        assert_eq!(event.kind, WatchEventKind::Created);
    }

    #[tokio::test]
    async fn test_failed_create_reply_still_applies() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;

        session
            .create("/group", b"", CreateMode::Persistent)
            .await
            .expect("parent");
        backend.fail_next_create_reply();
        let err = session
            .create("/group/node-", b"id-a", CreateMode::EphemeralSequential)
            .await
            .expect_err("reply dropped");
        assert!(err.is_retryable());

        let (children, _) = session.get_children("/group", false).await;
        assert_eq!(children.expect("children").len(), 1);
    }

    #[tokio::test]
    async fn test_lose_watches_fires_not_watching() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;

        session
            .create("/group", b"", CreateMode::Persistent)
            .await
            .expect("create");
        let (_, rx) = session.get_children("/group", true).await;
        let rx = rx.expect("armed");

        backend.lose_watches("/group");
        let event = rx.await.expect("fired");
        assert_eq!(event.kind, WatchEventKind::NotWatching);
    }

    #[tokio::test]
    async fn test_operations_fail_after_expiry() {
        let backend = MemoryBackend::new();
        let (session, _events) = session(&backend).await;
        backend.expire_session(session.session_id());

        let (result, rx) = session.get_node("/", true).await;
        assert!(matches!(result, Err(CoordinationError::SessionExpired)));
        assert!(rx.is_none());
    }
}
