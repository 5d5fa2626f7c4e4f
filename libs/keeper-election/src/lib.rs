//! # keeper-election
//!
//! Distributed leader election among a fluctuating set of peer processes,
//! built on the keeper-coordination facade.
//!
//! Each participant registers an ephemeral, sequentially numbered node
//! under a well-known parent path and watches the sibling list. The
//! lexicographically smallest sibling is the leader candidate; a
//! participant declares itself leader only after reading the candidate's
//! stored value and finding its own identity there. Comparing paths
//! instead would misfire after a create whose reply was lost: the blind
//! retry leaves two nodes for one process, and the path reported by the
//! retried call is not necessarily the one that sorts first.
//!
//! Leadership is never voluntarily relinquished. A leader only loses its
//! role through session expiry, which removes its ephemeral node and
//! terminates the process via the session monitor's expiry handler.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use keeper_coordination::{
    CoordinationClient, CoordinationError, CreateMode, WatchDelivery,
};

pub mod identity;

pub use identity::ElectionIdentity;

/// Default maximum retry attempts for reading the leader candidate's value.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound on the backoff between rejoin attempts.
const MAX_JOIN_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Retry policy for transiently failing election reads.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retries (actual delay uses exponential backoff).
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Election configuration.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Well-known parent path. Must be provisioned out of band; its
    /// absence is a fatal misconfiguration.
    pub parent_path: String,
    /// Common name prefix for member nodes; the service appends the
    /// sequential suffix.
    pub node_prefix: String,
    /// Retry policy for candidate value reads.
    pub retry: RetryPolicy,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            parent_path: "/leader_follower".to_string(),
            node_prefix: "node-".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Role of this participant in the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Registering the member node; no children listing evaluated yet.
    Joining,
    /// A smaller sibling holds the leadership.
    Follower,
    /// This process is the leader.
    Leader,
}

/// Observable election state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionStatus {
    pub role: Role,
    /// Full path of the current leader candidate, once one was observed.
    pub leader_path: Option<String>,
}

/// Errors terminating an election run.
#[derive(Debug, Error)]
pub enum ElectionError {
    /// The parent path is missing or was deleted. Operators provision it
    /// out of band, so this is a configuration error, not a retry case.
    #[error("election parent '{0}' does not exist; it must be provisioned before startup")]
    ParentMissing(String),

    /// A sequential create reported a name collision, which the service's
    /// unique-suffix guarantee rules out. Indicates a logic error.
    #[error("sequential create reported an existing node under '{0}'")]
    DuplicateSequentialNode(String),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}

/// One participant in a leader election group.
pub struct LeaderElection {
    client: CoordinationClient,
    identity: ElectionIdentity,
    config: ElectionConfig,
    status_tx: watch::Sender<ElectionStatus>,
}

impl LeaderElection {
    pub fn new(
        client: CoordinationClient,
        identity: ElectionIdentity,
        config: ElectionConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(ElectionStatus {
            role: Role::Joining,
            leader_path: None,
        });
        Self {
            client,
            identity,
            config,
            status_tx,
        }
    }

    /// This participant's identity value.
    pub fn identity(&self) -> &ElectionIdentity {
        &self.identity
    }

    /// Subscribe to role changes.
    pub fn status(&self) -> watch::Receiver<ElectionStatus> {
        self.status_tx.subscribe()
    }

    /// Run the election protocol.
    ///
    /// Returns `Ok(())` once this participant has become leader (the
    /// children watch is dropped then: new followers joining never demote
    /// a leader) or when the client shuts down. Any returned error is
    /// fatal to the participant.
    pub async fn run(&self) -> Result<(), ElectionError> {
        let node_path = self.join().await?;
        info!(node = %node_path, identity = %self.identity, "joined election group");

        let mut siblings = self.client.watch_children(&self.config.parent_path);
        self.publish(Role::Follower, None);

        while let Some(delivery) = siblings.next().await {
            match delivery {
                WatchDelivery::Update(names) => {
                    if self.evaluate(names).await? {
                        return Ok(());
                    }
                }
                WatchDelivery::Deleted => {
                    return Err(ElectionError::ParentMissing(self.config.parent_path.clone()));
                }
                WatchDelivery::Canceled(err) if err.is_retryable() => {
                    // Required for progress: a void watch would otherwise
                    // leave this participant blind to membership changes.
                    warn!(error = %err, "children watch lost, re-registering");
                    siblings = self.client.watch_children(&self.config.parent_path);
                }
                WatchDelivery::Canceled(CoordinationError::NotFound(_)) => {
                    return Err(ElectionError::ParentMissing(self.config.parent_path.clone()));
                }
                WatchDelivery::Canceled(err) => return Err(err.into()),
            }
        }
        debug!("client shut down, election run ending");
        Ok(())
    }

    /// Create this participant's ephemeral sequential node, retrying
    /// transient failures indefinitely. A lost reply may leave an extra
    /// node behind; the identity-based confirmation in [`Self::evaluate`]
    /// makes that harmless.
    async fn join(&self) -> Result<String, ElectionError> {
        let prefix = format!("{}/{}", self.config.parent_path, self.config.node_prefix);
        let mut attempt: u32 = 0;
        loop {
            match self
                .client
                .create(&prefix, self.identity.as_bytes(), CreateMode::EphemeralSequential)
                .await
            {
                Ok(path) => return Ok(path),
                Err(CoordinationError::NotFound(_)) => {
                    return Err(ElectionError::ParentMissing(self.config.parent_path.clone()));
                }
                Err(CoordinationError::AlreadyExists(path)) => {
                    return Err(ElectionError::DuplicateSequentialNode(path));
                }
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    let delay = (self.config.retry.base_delay
                        * 2u32.saturating_pow(attempt.min(8)))
                    .min(MAX_JOIN_RETRY_DELAY);
                    warn!(
                        error = %err,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "member node create failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Evaluate one children listing. Returns true once this participant
    /// is the leader.
    async fn evaluate(&self, mut names: Vec<String>) -> Result<bool, ElectionError> {
        if names.is_empty() {
            // This process holds a live member node, so an empty listing
            // can only be a stale view.
            warn!("children listing empty despite own membership, awaiting next notification");
            return Ok(false);
        }
        names.sort_unstable();
        let candidate = format!("{}/{}", self.config.parent_path, names[0]);

        let Some(value) = self.read_candidate(&candidate).await? else {
            // Candidate vanished between listing and read; its deletion
            // already queued the next children notification.
            return Ok(false);
        };

        if value == self.identity.as_bytes() {
            info!(leader = %candidate, identity = %self.identity, "elected leader");
            self.publish(Role::Leader, Some(candidate));
            Ok(true)
        } else {
            debug!(leader = %candidate, "following");
            self.publish(Role::Follower, Some(candidate));
            Ok(false)
        }
    }

    /// Read the candidate node's stored identity, retrying transient
    /// failures under the configured policy. `None` means the candidate
    /// no longer exists.
    async fn read_candidate(&self, path: &str) -> Result<Option<Vec<u8>>, ElectionError> {
        let mut attempt: u32 = 0;
        loop {
            match self.client.get_node(path).await {
                Ok((value, _)) => return Ok(Some(value)),
                Err(err) if err.is_not_found() => {
                    debug!(%path, "leader candidate disappeared before its value was read");
                    return Ok(None);
                }
                Err(err) if err.is_retryable() && attempt < self.config.retry.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry.base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(error = %err, attempt, "candidate value read failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn publish(&self, role: Role, leader_path: Option<String>) {
        self.status_tx.send_replace(ElectionStatus { role, leader_path });
    }
}

impl std::fmt::Debug for LeaderElection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElection")
            .field("identity", &self.identity)
            .field("parent_path", &self.config.parent_path)
            .finish_non_exhaustive()
    }
}
