use crate::collaborators::{Ledger, LedgerError};
use crate::config::CallPolicy;
use crate::error::ScoreResult;
use crate::storage::HistoryStorage;
use crate::weights::WeightTable;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitterConfig {
    pub subnet_id: u16,
    pub min_interval_secs: u64,
    pub retry: CallPolicy,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            subnet_id: 0,
            min_interval_secs: 0,
            retry: CallPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub round_id: String,
    pub table: WeightTable,
    pub created_at: u64,
    #[serde(default)]
    pub failed_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct SubmitterState {
    pending: Option<PendingSubmission>,
    last_submitted_round: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Submitted { round_id: String, attempts: u32 },
    AlreadySubmitted { round_id: String },
    TooSoon { retry_in: Duration },
    NothingPending,
    Failed { round_id: String, error: LedgerError },
}

impl SubmissionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SubmissionOutcome::Submitted { .. } => "submitted",
            SubmissionOutcome::AlreadySubmitted { .. } => "duplicate",
            SubmissionOutcome::TooSoon { .. } => "too_soon",
            SubmissionOutcome::NothingPending => "nothing_pending",
            SubmissionOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct WeightSubmitter {
    ledger: Arc<dyn Ledger>,
    config: SubmitterConfig,
    storage: Option<HistoryStorage>,
    state: SubmitterState,
    last_submit_at: Option<Instant>,
}

impl WeightSubmitter {
    pub fn new(ledger: Arc<dyn Ledger>, config: SubmitterConfig) -> Self {
        Self {
            ledger,
            config,
            storage: None,
            state: SubmitterState::default(),
            last_submit_at: None,
        }
    }

    /// Persists submitter state in `storage` and restores whatever a
    /// previous run left pending.
    pub fn with_storage(mut self, storage: HistoryStorage) -> ScoreResult<Self> {
        if let Some(state) = storage.load_pending::<SubmitterState>()? {
            if let Some(pending) = &state.pending {
                tracing::info!(
                    round_id = %pending.round_id,
                    failed_attempts = pending.failed_attempts,
                    "Restored pending weight table"
                );
            }
            self.state = state;
        }
        self.storage = Some(storage);
        Ok(self)
    }

    pub fn pending(&self) -> Option<&PendingSubmission> {
        self.state.pending.as_ref()
    }

    pub fn last_submitted_round(&self) -> Option<&str> {
        self.state.last_submitted_round.as_deref()
    }

    /// Stage `table` for `round_id`, replacing any older pending table.
    /// Returns `false` when that round was already written.
    pub fn stage(&mut self, round_id: &str, table: WeightTable) -> ScoreResult<bool> {
        if self.state.last_submitted_round.as_deref() == Some(round_id) {
            tracing::debug!(round_id, "Round already submitted, not staging");
            return Ok(false);
        }

        if let Some(previous) = &self.state.pending {
            if previous.round_id != round_id {
                tracing::warn!(
                    superseded = %previous.round_id,
                    round_id,
                    "Replacing unsubmitted weight table"
                );
            }
        }

        self.state.pending = Some(PendingSubmission {
            round_id: round_id.to_string(),
            table,
            created_at: current_timestamp(),
            failed_attempts: 0,
        });
        self.persist()?;
        Ok(true)
    }

    pub async fn submit(&mut self) -> SubmissionOutcome {
        let Some(pending) = self.state.pending.clone() else {
            return SubmissionOutcome::NothingPending;
        };

        if self.state.last_submitted_round.as_deref() == Some(pending.round_id.as_str()) {
            self.state.pending = None;
            self.persist_or_warn();
            return SubmissionOutcome::AlreadySubmitted {
                round_id: pending.round_id,
            };
        }

        if let Some(retry_in) = self.interval_remaining() {
            return SubmissionOutcome::TooSoon { retry_in };
        }

        let policy = self.config.retry.clone();
        let mut attempt = 0u32;

        loop {
            let result = match tokio::time::timeout(
                policy.timeout(),
                self.ledger
                    .set_weights(&pending.round_id, &pending.table, self.config.subnet_id),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LedgerError::Transient(format!(
                    "set_weights timed out after {:?}",
                    policy.timeout()
                ))),
            };
            attempt += 1;

            match result {
                Ok(()) => {
                    tracing::info!(
                        round_id = %pending.round_id,
                        entries = pending.table.len(),
                        attempts = attempt,
                        "Weights submitted"
                    );
                    self.state.pending = None;
                    self.state.last_submitted_round = Some(pending.round_id.clone());
                    self.last_submit_at = Some(Instant::now());
                    self.persist_or_warn();
                    return SubmissionOutcome::Submitted {
                        round_id: pending.round_id,
                        attempts: attempt,
                    };
                }
                Err(LedgerError::Transient(reason)) if attempt <= policy.max_retries => {
                    let delay = policy.backoff(attempt);
                    let jitter_ms = {
                        let max = (delay.as_millis() as u64 / 4).max(1);
                        rand::thread_rng().gen_range(0..=max)
                    };
                    tracing::warn!(
                        round_id = %pending.round_id,
                        attempt,
                        reason = %reason,
                        "Weight submission failed, retrying"
                    );
                    tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
                }
                Err(error) => {
                    tracing::error!(
                        round_id = %pending.round_id,
                        attempts = attempt,
                        error = %error,
                        "Weight submission failed, keeping table pending"
                    );
                    if let Some(kept) = self.state.pending.as_mut() {
                        kept.failed_attempts += attempt;
                    }
                    self.persist_or_warn();
                    return SubmissionOutcome::Failed {
                        round_id: pending.round_id,
                        error,
                    };
                }
            }
        }
    }

    fn interval_remaining(&self) -> Option<Duration> {
        let min_interval = Duration::from_secs(self.config.min_interval_secs);
        let elapsed = self.last_submit_at?.elapsed();
        (elapsed < min_interval).then(|| min_interval - elapsed)
    }

    fn persist(&self) -> ScoreResult<()> {
        match &self.storage {
            Some(storage) => storage.save_pending(&self.state),
            None => Ok(()),
        }
    }

    fn persist_or_warn(&self) {
        if let Err(e) = self.persist() {
            tracing::warn!(error = %e, "Failed to persist submitter state");
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
