//! Core data types shared across the facade: session states, node
//! metadata, create modes, and watch notifications.

/// Session state as reported by the backing service's connection events.
///
/// Owned by [`crate::client::CoordinationClient`]; once `Expired` is
/// observed the session never transitions again for the lifetime of the
/// client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection attempt in progress (initial or after a drop).
    Connecting,
    /// Session established and heartbeating normally.
    Connected,
    /// Connection lost; the session may still be recoverable server-side.
    Disconnected,
    /// The service declared the session dead. Terminal.
    Expired,
}

/// Service-maintained node attributes, used for optimistic conditional
/// writes and for distinguishing ephemeral nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeMetadata {
    /// Data version, incremented on every successful set.
    pub version: i32,
    /// Length of the stored value in bytes.
    pub data_len: usize,
    /// Number of direct children.
    pub num_children: usize,
    /// Owning session id when the node is ephemeral.
    pub ephemeral_owner: Option<u64>,
}

/// Node creation mode selecting ephemeral and/or sequential semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    PersistentSequential,
    Ephemeral,
    EphemeralSequential,
}

impl CreateMode {
    /// True if nodes created with this mode are removed when their owning
    /// session ends.
    pub fn is_ephemeral(self) -> bool {
        matches!(
            self,
            CreateMode::Ephemeral | CreateMode::EphemeralSequential
        )
    }

    /// True if the service appends a monotonically increasing, zero-padded
    /// numeric suffix to the requested path.
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Kind of a per-path watch notification.
///
/// Session-level events are not represented here: they are delivered only
/// on the dedicated session-event channel (see [`crate::backend::Backend`]),
/// never through per-path watch registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// The watched path came into existence (existence watches only).
    Created,
    /// The watched node's data or metadata changed.
    Changed,
    /// The watched node was deleted.
    Deleted,
    /// The watched node's child list changed.
    ChildrenChanged,
    /// The service could not keep the watch armed; it is void.
    NotWatching,
}

/// A one-shot watch notification for a specific path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: String,
}
