//! Scheduler states and startup reconciliation.
//!
//! # Cycle
//!
//! ```text
//! Idle ──window elapsed──▶ Applying ──version committed──▶ Submitting
//!  ▲                                                           │
//!  └──────────── confirmed ◀──── Confirming ◀──── included ────┘
//! ```
//!
//! Any state may move to `Halted` on a fatal error. Nothing here survives a
//! restart; [`reconcile`] rebuilds the starting state from the ledger and the
//! local store.

use crate::error::{Result, SchedulerError};
use crate::ledger::LedgerClient;
use repmine_core::{Digest, VersionId, VersionedStore};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    /// Waiting for the ledger window to elapse.
    Idle {
        /// Last observed window-open timestamp, if polled yet.
        window_opened_at: Option<u64>,
    },
    /// Folding the pending change log into a new version.
    Applying,
    /// Publishing the root of `version`.
    Submitting { version: VersionId, root: Digest },
    /// Confirming the root of `version`.
    Confirming {
        version: VersionId,
        root: Digest,
        /// Nonce of the submit transaction; unknown after a restart.
        submit_nonce: Option<u64>,
    },
    /// Stopped on a fatal error; needs an operator.
    Halted { reason: String },
}

impl SchedulerState {
    pub fn idle() -> Self {
        SchedulerState::Idle {
            window_opened_at: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchedulerState::Idle { .. } => "idle",
            SchedulerState::Applying => "applying",
            SchedulerState::Submitting { .. } => "submitting",
            SchedulerState::Confirming { .. } => "confirming",
            SchedulerState::Halted { .. } => "halted",
        }
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, SchedulerState::Halted { .. })
    }

    /// Whether the cycle permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &SchedulerState) -> bool {
        use SchedulerState::*;
        match (self, next) {
            (Halted { .. }, _) => false,
            (_, Halted { .. }) => true,
            (Idle { .. }, Idle { .. } | Applying) => true,
            (Applying, Submitting { .. }) => true,
            (Submitting { .. }, Confirming { .. }) => true,
            (Confirming { .. }, Idle { .. }) => true,
            _ => false,
        }
    }

    /// Checked transition.
    pub fn transition(self, next: SchedulerState) -> Result<SchedulerState> {
        if !self.can_transition_to(&next) {
            return Err(SchedulerError::InvalidStateTransition {
                from: self.name().to_string(),
                to: next.name().to_string(),
            });
        }
        Ok(next)
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Derive the starting state from durable facts.
///
/// - ledger root equals the local head root: `Idle`
/// - local head ahead and already submitted by us: `Confirming` with unknown nonce
/// - local head ahead and not submitted: `Submitting`
/// - ledger root never committed locally: `Diverged`
pub async fn reconcile<L: LedgerClient + ?Sized>(
    store: &Arc<VersionedStore>,
    ledger: &L,
) -> Result<SchedulerState> {
    let head = store.latest()?;
    let ledger_root = ledger.current_root().await?;

    if ledger_root == head.root() {
        info!(version = head.version(), root = %ledger_root, "Ledger matches local head");
        return Ok(SchedulerState::idle());
    }

    let lookup = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.version_for_root(&ledger_root))
            .await
            .map_err(|e| SchedulerError::Task(e.to_string()))??
    };

    let ledger_version = match lookup {
        Some(version) => version,
        None => {
            error!(
                ledger_root = %ledger_root,
                head_root = %head.root(),
                "Ledger root was never committed locally"
            );
            return Err(SchedulerError::Diverged { ledger_root });
        }
    };

    let submitted = ledger.submitted_root().await?;
    let state = if submitted == Some(head.root()) {
        SchedulerState::Confirming {
            version: head.version(),
            root: head.root(),
            submit_nonce: None,
        }
    } else {
        SchedulerState::Submitting {
            version: head.version(),
            root: head.root(),
        }
    };

    info!(
        ledger_version,
        head = head.version(),
        state = %state,
        "Local head is ahead of the ledger; resuming publication"
    );
    Ok(state)
}
