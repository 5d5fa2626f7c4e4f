//! # keeper-coordination
//!
//! Client facade over a remote, hierarchical, watch-capable namespace
//! service: paths with byte-string values, ephemeral/sequential node
//! semantics, and session-based liveness.
//!
//! This library provides:
//! - **Typed errors** distinguishing absent nodes, conflicting creates,
//!   non-empty deletes, and transient transport failures.
//! - **Backend boundary** as a trait pair, so the facade is independent of
//!   any particular coordination service implementation.
//! - **In-memory backend** with full namespace semantics (ephemeral
//!   ownership, sequential naming, one-shot watches) for tests and local
//!   development.
//! - **Coordination client** with plain read/write operations and standing
//!   watches that re-arm themselves until a terminal notification.
//! - **Session monitor** that detects expiry both from explicit service
//!   notification and from a disconnect-timeout heuristic.
//!
//! ## Design Principles
//!
//! - One owning task per standing watch; terminal deliveries close the
//!   stream, so a watch's resources are released exactly once.
//! - Session liveness is observed on a dedicated channel, never mixed into
//!   per-path watch notifications.
//! - Session loss is fatal by default; recovery is an explicit opt-in via
//!   a caller-supplied expiry handler.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod session;
pub mod types;
pub mod watch;

// Re-export key types for convenient access
pub use backend::{Backend, BackendSession, SessionEventRx, WatchEventRx};
pub use client::CoordinationClient;
pub use config::ClientConfig;
pub use error::{CoordinationError, CoordinationResult};
pub use memory::MemoryBackend;
pub use session::ExpiryHandler;
pub use types::{CreateMode, NodeMetadata, SessionState, WatchEvent, WatchEventKind};
pub use watch::{ChildrenWatch, ExistsWatch, NodeWatch, Watch, WatchDelivery};
