//! The submission control loop.
//!
//! One cooperative task walks the state machine in [`crate::state`]. Each
//! step may suspend on the ledger; a transient ledger failure re-runs the
//! current step after the poll interval, never the whole cycle. Fatal errors
//! (overflow, divergence, rejected or failed transactions, store corruption)
//! publish `Halted` and end the loop.

use crate::error::{Result, SchedulerError};
use crate::ledger::{LedgerClient, LedgerError, Receipt, TxHandle};
use crate::state::{reconcile, SchedulerState};
use repmine_core::{ApplyOutcome, ChangeLogApplier, Digest, SchedulerConfig, VersionId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Dispute round confirmed at the end of every cycle.
const CONFIRM_ROUND: u64 = 0;

pub struct SubmissionScheduler<L: LedgerClient> {
    ledger: Arc<L>,
    applier: Arc<ChangeLogApplier>,
    config: SchedulerConfig,
    state_tx: watch::Sender<SchedulerState>,
}

impl<L: LedgerClient> SubmissionScheduler<L> {
    pub fn new(ledger: Arc<L>, applier: Arc<ChangeLogApplier>, config: SchedulerConfig) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::idle());
        Self {
            ledger,
            applier,
            config,
            state_tx,
        }
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SchedulerState {
        self.state_tx.borrow().clone()
    }

    fn publish(&self, state: &SchedulerState) {
        self.state_tx.send_replace(state.clone());
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    fn halt(&self, err: &SchedulerError) {
        error!(error = %err, "Submission scheduler halted");
        self.publish(&SchedulerState::Halted {
            reason: err.to_string(),
        });
    }

    /// Reconcile, then cycle until a fatal error or `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run_forever() => result,
            _ = shutdown => {
                info!(state = %self.state(), "Submission scheduler shutting down");
                Ok(())
            }
        }
    }

    async fn run_forever(&self) -> Result<()> {
        let mut state = loop {
            match reconcile(self.applier.store(), self.ledger.as_ref()).await {
                Ok(state) => break state,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Ledger unavailable during reconciliation; retrying");
                    tokio::time::sleep(self.poll_interval()).await;
                }
                Err(e) => {
                    self.halt(&e);
                    return Err(e);
                }
            }
        };
        self.publish(&state);
        info!(state = %state, "Submission scheduler started");

        loop {
            match self.step(&state).await {
                Ok(next) => {
                    if next != state {
                        debug!(from = %state, to = %next, "Scheduler transition");
                    }
                    state = match state.transition(next) {
                        Ok(state) => state,
                        Err(e) => {
                            self.halt(&e);
                            return Err(e);
                        }
                    };
                    self.publish(&state);
                }
                Err(e) if e.is_transient() => {
                    warn!(state = %state, error = %e, "Transient ledger error; retrying step");
                    tokio::time::sleep(self.poll_interval()).await;
                }
                Err(e) => {
                    self.halt(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Run one step of the cycle from `state` and return the next state.
    pub async fn step(&self, state: &SchedulerState) -> Result<SchedulerState> {
        match state {
            SchedulerState::Idle { .. } => self.check_window().await,
            SchedulerState::Applying => self.apply_pending().await,
            SchedulerState::Submitting { version, root } => self.submit(*version, *root).await,
            SchedulerState::Confirming {
                version,
                root,
                submit_nonce,
            } => self.confirm(*version, *root, *submit_nonce).await,
            SchedulerState::Halted { reason } => Err(SchedulerError::InvalidStateTransition {
                from: format!("halted ({})", reason),
                to: "any".to_string(),
            }),
        }
    }

    async fn check_window(&self) -> Result<SchedulerState> {
        let opened_at = self.ledger.window_open_timestamp().await?;
        let now = self.ledger.current_block_timestamp().await?;
        let elapsed = now.saturating_sub(opened_at);

        if elapsed > self.config.window_secs {
            info!(opened_at, now, elapsed, "Submission window elapsed");
            return Ok(SchedulerState::Applying);
        }

        debug!(
            opened_at,
            now,
            remaining = self.config.window_secs - elapsed,
            "Window still open; polling again"
        );
        tokio::time::sleep(self.poll_interval()).await;
        Ok(SchedulerState::Idle {
            window_opened_at: Some(opened_at),
        })
    }

    async fn apply_pending(&self) -> Result<SchedulerState> {
        let watermark = self.applier.store().latest()?.watermark();
        let entries = self.ledger.pending_change_log(watermark).await?;
        let count = entries.len();

        let applier = self.applier.clone();
        let outcome = tokio::task::spawn_blocking(move || applier.apply_batch(&entries))
            .await
            .map_err(|e| SchedulerError::Task(e.to_string()))??;

        let head = self.applier.store().latest()?;
        match outcome {
            ApplyOutcome::Committed { applied, .. } => info!(
                version = head.version(),
                root = %head.root(),
                applied,
                "Change log applied; root ready for submission"
            ),
            ApplyOutcome::Unchanged { .. } => info!(
                version = head.version(),
                received = count,
                "No new change-log entries; resubmitting head root"
            ),
        }

        Ok(SchedulerState::Submitting {
            version: head.version(),
            root: head.root(),
        })
    }

    async fn submit(&self, version: VersionId, root: Digest) -> Result<SchedulerState> {
        // A retried step may find its earlier broadcast already accepted.
        if self.ledger.submitted_root().await? == Some(root) {
            info!(version, %root, "Root already submitted; moving to confirmation");
            return Ok(SchedulerState::Confirming {
                version,
                root,
                submit_nonce: None,
            });
        }

        let key_count = self.applier.store().version_record(version)?.key_count;
        let tx = self.ledger.submit_root(root, key_count).await?;
        info!(version, %root, tx = %tx.hash, nonce = tx.nonce, "Root submitted");

        self.await_inclusion(&tx, "submit").await?;

        Ok(SchedulerState::Confirming {
            version,
            root,
            submit_nonce: Some(tx.nonce),
        })
    }

    async fn confirm(
        &self,
        version: VersionId,
        root: Digest,
        submit_nonce: Option<u64>,
    ) -> Result<SchedulerState> {
        // A retried step may find its earlier confirm already included: the
        // ledger publishes our root and our submission is no longer pending.
        // The pending check matters when the same root is resubmitted.
        if self.ledger.current_root().await? == root
            && self.ledger.submitted_root().await? != Some(root)
        {
            info!(version, %root, "Root already confirmed; cycle complete");
            return Ok(self.settle_after_confirm().await);
        }

        // Issue the confirm at submit nonce + 1 so a lagging relay that has
        // not seen the submit yet cannot reuse its nonce.
        let nonce = match submit_nonce {
            Some(nonce) => nonce + 1,
            None => self.ledger.next_nonce().await?,
        };

        let tx = match self.ledger.confirm_root(CONFIRM_ROUND, Some(nonce)).await {
            Ok(tx) => tx,
            Err(LedgerError::NonceConflict(detail)) => {
                let fresh = self.ledger.next_nonce().await?;
                warn!(nonce, fresh, detail = %detail, "Confirm nonce already used; retrying once");
                self.ledger.confirm_root(CONFIRM_ROUND, Some(fresh)).await?
            }
            Err(e) => return Err(e.into()),
        };
        info!(version, %root, tx = %tx.hash, nonce = tx.nonce, "Root confirmation sent");

        self.await_inclusion(&tx, "confirm").await?;
        info!(version, %root, "Root confirmed; cycle complete");

        Ok(self.settle_after_confirm().await)
    }

    /// Hold for one poll before re-checking the window, so a relay that lags
    /// behind the confirm does not report the previous window as elapsed.
    async fn settle_after_confirm(&self) -> SchedulerState {
        tokio::time::sleep(self.poll_interval()).await;
        SchedulerState::idle()
    }

    /// Wait for `tx` with no timeout, warning while it is outstanding.
    async fn await_inclusion(&self, tx: &TxHandle, phase: &'static str) -> Result<Receipt> {
        let started = Instant::now();
        let alarm_every = self.config.stuck_alarm().max(Duration::from_secs(1));
        let mut alarm = interval_at(started + alarm_every, alarm_every);

        loop {
            let wait = self.ledger.wait_for_inclusion(tx);
            tokio::pin!(wait);

            let result = loop {
                tokio::select! {
                    result = &mut wait => break result,
                    _ = alarm.tick() => warn!(
                        phase,
                        tx = %tx.hash,
                        elapsed_secs = started.elapsed().as_secs(),
                        "Transaction still not included"
                    ),
                }
            };

            match result {
                Ok(receipt) if receipt.success => {
                    debug!(phase, tx = %tx.hash, block = receipt.block_number, "Transaction included");
                    return Ok(receipt);
                }
                Ok(receipt) => {
                    return Err(SchedulerError::TransactionFailed {
                        tx_hash: receipt.tx_hash,
                    })
                }
                Err(e) if e.is_transient() => {
                    warn!(phase, tx = %tx.hash, error = %e, "Inclusion check failed; retrying");
                    tokio::time::sleep(self.poll_interval()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
