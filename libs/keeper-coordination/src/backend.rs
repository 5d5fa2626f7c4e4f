//! Boundary traits for the backing coordination service.
//!
//! The facade consumes the service exclusively through [`Backend`] and
//! [`BackendSession`]; everything behind this boundary (wire protocol,
//! storage, consensus) is the service's concern. [`crate::memory`]
//! provides an in-process implementation with full namespace semantics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::config::ClientConfig;
use crate::error::CoordinationResult;
use crate::types::{CreateMode, NodeMetadata, SessionState, WatchEvent};

/// Receiver for session-state transitions, delivered asynchronously by
/// the service's connection machinery. Session events travel only on this
/// channel, never through per-path watch registrations.
pub type SessionEventRx = mpsc::UnboundedReceiver<SessionState>;

/// Receiver for a single one-shot watch notification. A registration is
/// spent once it fires; re-arming means issuing the read again.
pub type WatchEventRx = oneshot::Receiver<WatchEvent>;

/// Connection factory for a backing coordination service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Establish a session. The returned receiver reports session-state
    /// transitions; the service is expected to deliver `Connected` once
    /// the session is live, and `Expired` at most once, as its final
    /// event.
    async fn connect(
        &self,
        config: &ClientConfig,
    ) -> CoordinationResult<(Arc<dyn BackendSession>, SessionEventRx)>;
}

/// An established session against the backing service.
///
/// Read operations optionally arm a one-shot watch. Arming follows the
/// service's rules: `get_node` and `get_children` arm only when the read
/// succeeds, while `exists` arms on both presence and absence (a later
/// `Created` event is meaningful for an existence watch).
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Read a node's value and metadata.
    async fn get_node(
        &self,
        path: &str,
        watch: bool,
    ) -> (CoordinationResult<(Vec<u8>, NodeMetadata)>, Option<WatchEventRx>);

    /// List a node's direct children (names only, no path prefix).
    async fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> (CoordinationResult<Vec<String>>, Option<WatchEventRx>);

    /// Check a node's existence, returning its metadata when present.
    async fn exists(
        &self,
        path: &str,
        watch: bool,
    ) -> (CoordinationResult<Option<NodeMetadata>>, Option<WatchEventRx>);

    /// Create a node, returning the assigned path. For sequential modes
    /// the service appends a zero-padded, monotonically increasing
    /// 10-digit suffix to `path`; fixed suffix width is a documented
    /// precondition that keeps lexicographic child-name order equal to
    /// creation order.
    async fn create(
        &self,
        path: &str,
        value: &[u8],
        mode: CreateMode,
    ) -> CoordinationResult<String>;

    /// Overwrite a node's value. `version` of `-1` writes unconditionally;
    /// any other value must match the node's current data version.
    async fn set_node(
        &self,
        path: &str,
        value: &[u8],
        version: i32,
    ) -> CoordinationResult<NodeMetadata>;

    /// Delete a node. `version` semantics as for [`Self::set_node`].
    async fn delete_node(&self, path: &str, version: i32) -> CoordinationResult<()>;

    /// Identifier the service assigned to this session. Ephemeral nodes
    /// record it as their owner.
    fn session_id(&self) -> u64;

    /// Session timeout negotiated with the service at connect time.
    fn negotiated_timeout(&self) -> Duration;

    /// Tear the session down. Ephemeral nodes owned by it are removed and
    /// all of its pending watches are implicitly voided.
    async fn close(&self);
}
