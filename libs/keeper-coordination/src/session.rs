//! Session liveness monitoring.
//!
//! The service's own `Expired` notification can lag behind reality (or
//! race with disconnect/reconnect cycles), so the monitor combines two
//! signals: the explicit state reported on the session-event channel, and
//! a local timeout heuristic that declares the session dead once it has
//! been out of `Connected` for longer than the negotiated session
//! timeout. This bounds detection latency even when the service is slow
//! to notify.
//!
//! The monitor wakes on state transitions and otherwise re-checks the
//! heuristic on a fixed interval; it fires the expiry handler exactly
//! once and then stops permanently.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::types::SessionState;

/// Invoked once when the session is determined to be expired.
///
/// The default handler terminates the process: losing the coordination
/// session invalidates every ephemeral node and watch this client owns,
/// and recovery is an explicit opt-in by the caller.
pub type ExpiryHandler = Box<dyn FnOnce() + Send + 'static>;

/// A session-state transition and the instant it was observed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionTransition {
    pub state: SessionState,
    pub at: Instant,
}

impl SessionTransition {
    pub(crate) fn now(state: SessionState) -> Self {
        Self {
            state,
            at: Instant::now(),
        }
    }
}

fn default_expiry_handler() {
    error!("coordination session expired, terminating process");
    std::process::exit(1);
}

pub(crate) struct SessionMonitor {
    transitions: watch::Receiver<SessionTransition>,
    session_timeout: Duration,
    poll_interval: Duration,
    on_expiry: ExpiryHandler,
}

impl SessionMonitor {
    pub(crate) fn new(
        transitions: watch::Receiver<SessionTransition>,
        session_timeout: Duration,
        poll_interval: Duration,
        on_expiry: Option<ExpiryHandler>,
    ) -> Self {
        Self {
            transitions,
            session_timeout,
            poll_interval,
            on_expiry: on_expiry.unwrap_or_else(|| Box::new(default_expiry_handler)),
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                changed = self.transitions.changed() => {
                    if changed.is_err() {
                        // Client shut down; nothing left to monitor.
                        debug!("session transition channel closed, monitor stopping");
                        return;
                    }
                }
                _ = ticker.tick() => {}
            }
            let transition = *self.transitions.borrow_and_update();
            let expired = match transition.state {
                SessionState::Expired => true,
                SessionState::Connected => false,
                // Out of contact: the session is gone once the service can
                // no longer have kept it alive.
                _ => transition.at.elapsed() > self.session_timeout,
            };
            if expired {
                error!(state = ?transition.state, "session determined expired");
                (self.on_expiry)();
                return;
            }
        }
    }
}
