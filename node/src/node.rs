use crate::clients::{build_collaborators, build_http_client, HttpLedger};
use crate::config::NodeConfig;
use crate::dashboard::{Dashboard, DashboardState, NodeStatus};
use crate::error::{NodeError, NodeResult};
use crate::metrics::NodeMetrics;
use crate::spool::{read_round_file, SpoolSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use veriscore_core::storage::write_json_atomic;
use veriscore_core::{
    GuardedCollaborators, HistoryConfig, HistoryStorage, HistoryTracker, ListSnapshot,
    MinerUid, RoundEngine, RoundReport, RoundSource, SubmissionOutcome, WeightSubmitter,
};

const UPTIME_TICK: Duration = Duration::from_secs(5);

pub async fn run(config_path: impl AsRef<Path>) -> NodeResult<()> {
    tracing::info!("Starting Veriscore node...");

    let config = NodeConfig::load(config_path)?;
    tracing::info!(
        validator_uid = ?config.node.validator_uid,
        burn_uid = config.scoring.burn_uid,
        ledger = config.ledger.enabled,
        "Loaded configuration"
    );

    let storage = HistoryStorage::with_path(config.data_dir())?;
    let engine = build_engine(&config, &storage)?;

    let submitter = if config.ledger.enabled {
        let ledger = HttpLedger::new(
            &config.ledger,
            build_http_client(&config.collaborators.user_agent)?,
        );
        let submitter = WeightSubmitter::new(Arc::new(ledger), config.ledger.submitter_config())
            .with_storage(storage.clone())?;
        if let Some(pending) = submitter.pending() {
            tracing::info!(round_id = %pending.round_id, "Restored pending weights");
        }
        Some(submitter)
    } else {
        tracing::warn!("Ledger disabled, weights will be computed but not submitted");
        None
    };

    let spool = SpoolSource::new(config.spool_dir())?;
    tracing::info!("Reading rounds from {}", spool.dir().display());

    let metrics = Arc::new(NodeMetrics::new());
    let dashboard = Dashboard::new(&config);
    let dashboard_state = dashboard.state();
    {
        let mut data = dashboard_state.write().await;
        data.status.participants_tracked = engine.history().len();
        data.pending = submitter.as_ref().and_then(|s| s.pending().cloned());
        data.status.last_submitted_round =
            submitter.as_ref().and_then(|s| s.last_submitted_round().map(String::from));
    }

    let shutdown_token = CancellationToken::new();

    let validator = ValidatorLoop {
        config: config.clone(),
        engine,
        submitter,
        spool,
        storage,
        metrics,
        dashboard_state,
    };

    let loop_token = shutdown_token.clone();
    let validator_handle = tokio::spawn(async move { validator.run(loop_token).await });

    let dashboard_handle = config
        .dashboard
        .enabled
        .then(|| tokio::spawn(async move { dashboard.start().await }));

    tracing::info!("Node started. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received...");
        }
        Err(err) => {
            tracing::error!("Error waiting for shutdown signal: {}", err);
        }
    }
    shutdown_token.cancel();

    match validator_handle.await {
        Ok(Err(e)) => tracing::error!("Validator loop exited with error: {}", e),
        Err(e) => tracing::error!("Validator loop panicked: {}", e),
        Ok(Ok(())) => {}
    }

    if let Some(handle) = dashboard_handle {
        handle.abort();
        let _ = handle.await;
    }

    tracing::info!("Node stopped.");
    Ok(())
}

fn build_engine(config: &NodeConfig, storage: &HistoryStorage) -> NodeResult<RoundEngine> {
    let histories = storage.load_histories()?;
    if !histories.is_empty() {
        tracing::info!("Loaded {} participant histories", histories.len());
    }
    let tracker =
        HistoryTracker::from_histories(HistoryConfig::from(&config.scoring), histories);

    let collaborators = GuardedCollaborators::new(
        build_collaborators(&config.collaborators)?,
        &config.collaborators.policies,
    );

    Ok(RoundEngine::new(config.scoring.clone(), collaborators, tracker)?
        .with_validator_uid(config.node.validator_uid.map(MinerUid::new)))
}

struct ValidatorLoop {
    config: NodeConfig,
    engine: RoundEngine,
    submitter: Option<WeightSubmitter>,
    spool: SpoolSource,
    storage: HistoryStorage,
    metrics: Arc<NodeMetrics>,
    dashboard_state: DashboardState,
}

impl ValidatorLoop {
    async fn run(mut self, shutdown_token: CancellationToken) -> NodeResult<()> {
        let mut uptime_interval = tokio::time::interval(UPTIME_TICK);
        let mut round_interval = tokio::time::interval(self.config.round_interval());
        let mut submit_interval = tokio::time::interval(self.config.submit_interval());

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    tracing::info!("Validator loop shutting down...");
                    break;
                }

                _ = uptime_interval.tick() => {
                    self.metrics.update_uptime();
                    self.dashboard_state.write().await.status.uptime_seconds =
                        self.metrics.uptime_seconds();
                }

                _ = round_interval.tick() => {
                    self.drain_spool().await;
                }

                _ = submit_interval.tick() => {
                    self.submit_pending().await;
                }
            }
        }

        Ok(())
    }

    async fn drain_spool(&mut self) {
        loop {
            // Lists are read before a file is taken so a bad lists file
            // leaves the spool untouched.
            let lists = match self.config.lists.load() {
                Ok(lists) => ListSnapshot::capture(&lists),
                Err(e) => {
                    tracing::error!("Failed to load lists, leaving rounds queued: {}", e);
                    break;
                }
            };

            let input = match self.spool.next_round().await {
                Ok(Some(input)) => input,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read spool: {}", e);
                    break;
                }
            };

            let round_id = input.round_id.clone();
            let settled = match self.engine.run_round(input, &lists).await {
                Ok(report) => {
                    self.record_round(&report).await;
                    self.spool.complete(&round_id).await
                }
                Err(e) => {
                    tracing::error!(round_id = %round_id, "Round failed: {}", e);
                    self.metrics.record_round_failure();
                    self.dashboard_state.write().await.status.round_failures += 1;
                    self.spool.fail(&round_id).await
                }
            };

            if let Err(e) = settled {
                tracing::error!(round_id = %round_id, "Failed to settle spool file: {}", e);
            }
        }
    }

    /// Stage weights first, then persist. A failing step is logged and does
    /// not stop the ones after it.
    async fn record_round(&mut self, report: &RoundReport) {
        let pending = match self.submitter.as_mut() {
            Some(submitter) => {
                match submitter.stage(&report.round_id, report.weights.clone()) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(round_id = %report.round_id, "Weights for round already submitted")
                    }
                    Err(e) => {
                        tracing::error!(round_id = %report.round_id, "Failed to persist pending weights: {}", e)
                    }
                }
                submitter.pending().cloned()
            }
            None => None,
        };

        if let Err(e) = self.storage.save_histories(&self.engine.history().snapshot()) {
            tracing::error!(round_id = %report.round_id, "Failed to save histories: {}", e);
        }

        if self.config.node.keep_reports {
            if let Err(e) = save_report(&self.config.reports_dir(), report) {
                tracing::error!(round_id = %report.round_id, "Failed to save report: {}", e);
            }
        }

        self.metrics.record_round(report);

        let mut data = self.dashboard_state.write().await;
        data.apply_report(report);
        data.pending = pending;
    }

    async fn submit_pending(&mut self) {
        let Some(submitter) = self.submitter.as_mut() else {
            return;
        };

        let outcome = submitter.submit().await;
        self.metrics.record_submission(&outcome);

        match &outcome {
            SubmissionOutcome::Submitted { round_id, attempts } => {
                tracing::info!(round_id = %round_id, attempts, "Weights submitted");
            }
            SubmissionOutcome::TooSoon { retry_in } => {
                tracing::debug!("Submission deferred for {:?}", retry_in);
            }
            SubmissionOutcome::Failed { round_id, error } => {
                tracing::warn!(round_id = %round_id, "Submission failed: {}", error);
            }
            SubmissionOutcome::AlreadySubmitted { .. } | SubmissionOutcome::NothingPending => {}
        }

        let mut data = self.dashboard_state.write().await;
        data.status.last_submission_outcome = Some(outcome.label().to_string());
        data.status.last_submitted_round = submitter.last_submitted_round().map(String::from);
        data.pending = submitter.pending().cloned();
    }
}

fn report_path(dir: &Path, round_id: &str) -> PathBuf {
    let name: String = round_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{}.json", name))
}

fn save_report(dir: &Path, report: &RoundReport) -> NodeResult<()> {
    std::fs::create_dir_all(dir)?;
    write_json_atomic(&report_path(dir, &report.round_id), report)?;
    Ok(())
}

pub async fn score(round_file: PathBuf, config_path: Option<PathBuf>, save: bool) -> NodeResult<()> {
    let config = match config_path {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    let input = read_round_file(&round_file)?;
    let storage = HistoryStorage::with_path(config.data_dir())?;
    let mut engine = build_engine(&config, &storage)?;

    let lists = ListSnapshot::capture(&config.lists.load()?);
    let report = engine.run_round(input, &lists).await?;

    if save {
        storage.save_histories(&engine.history().snapshot())?;
        save_report(&config.reports_dir(), &report)?;
        tracing::info!("Saved histories to {}", storage.history_path().display());
    }

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| NodeError::Scoring(e.into()))?;
    println!("{}", json);
    Ok(())
}

pub async fn status(endpoint: String) -> NodeResult<()> {
    let url = format!("{}/api/status", endpoint.trim_end_matches('/'));

    let client = reqwest::Client::new();
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| NodeError::Client(format!("Failed to connect: {}", e)))?;

    if !response.status().is_success() {
        return Err(NodeError::Client(format!(
            "Status check failed: {}",
            response.status()
        )));
    }

    let status: NodeStatus = response
        .json()
        .await
        .map_err(|e| NodeError::Client(format!("Failed to parse response: {}", e)))?;

    println!("Node Status:");
    println!("  Version: {}", status.version);
    println!(
        "  Validator UID: {}",
        status
            .validator_uid
            .map(|uid| uid.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  Uptime: {}s", status.uptime_seconds);
    println!("  Rounds: {} ({} failed)", status.rounds_completed, status.round_failures);
    println!("  Last round: {}", status.last_round_id.as_deref().unwrap_or("none"));
    println!("  Participants: {} tracked, {} ranked", status.participants_tracked, status.ranked_participants);
    println!("  Ledger: {}", if status.ledger_enabled { "enabled" } else { "disabled" });
    println!(
        "  Last submitted round: {}",
        status.last_submitted_round.as_deref().unwrap_or("none")
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_path_is_sanitized() {
        let dir = Path::new("/tmp/reports");
        assert_eq!(report_path(dir, "round-7"), dir.join("round-7.json"));
        assert_eq!(report_path(dir, "../etc/x"), dir.join("___etc_x.json"));
    }

    #[tokio::test]
    async fn test_score_replay_saves_history() {
        let dir = tempfile::tempdir().unwrap();
        let round_file = dir.path().join("round.json");
        std::fs::write(
            &round_file,
            r#"{"round_id": "r1", "registry": [{"uid": 5, "hotkey": "hk5", "role": "miner"}],
                "responses": [{"uid": 5, "status": "unreachable"}]}"#,
        )
        .unwrap();

        let mut config = NodeConfig::default();
        config.node.data_dir = dir.path().join("data").display().to_string();
        let config_file = dir.path().join("node.toml");
        std::fs::write(&config_file, config.to_toml().unwrap()).unwrap();

        score(round_file, Some(config_file), true).await.unwrap();

        let storage = HistoryStorage::with_path(config.data_dir()).unwrap();
        let histories = storage.load_histories().unwrap();
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].uid, MinerUid::new(5));
        assert!(config.reports_dir().join("r1.json").exists());
    }

    const ROUND_FILE: &str = r#"{"round_id": "r1",
        "registry": [{"uid": 5, "hotkey": "hk5", "role": "miner"}],
        "responses": [{"uid": 5, "status": "unreachable"}]}"#;

    fn validator_loop(root: &Path) -> ValidatorLoop {
        let mut config = NodeConfig::default();
        config.node.data_dir = root.join("data").display().to_string();
        config.node.spool_dir = root.join("spool").display().to_string();
        config.lists.file = Some(root.join("lists.json").display().to_string());

        let storage = HistoryStorage::with_path(config.data_dir()).unwrap();
        let engine = build_engine(&config, &storage).unwrap();
        let spool = SpoolSource::new(config.spool_dir()).unwrap();
        let dashboard_state = Dashboard::new(&config).state();

        ValidatorLoop {
            config,
            engine,
            submitter: None,
            spool,
            storage,
            metrics: Arc::new(NodeMetrics::new()),
            dashboard_state,
        }
    }

    #[tokio::test]
    async fn test_round_waits_in_spool_until_lists_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut validator = validator_loop(dir.path());
        let spool_dir = validator.config.spool_dir();
        std::fs::write(spool_dir.join("001.json"), ROUND_FILE).unwrap();

        // lists.json does not exist yet.
        validator.drain_spool().await;
        assert!(spool_dir.join("001.json").exists());
        assert!(validator.engine.history().is_empty());
        assert!(!validator.storage.has_history());

        std::fs::write(dir.path().join("lists.json"), "{}").unwrap();
        validator.drain_spool().await;

        assert!(spool_dir.join("processed").join("001.json").exists());
        assert_eq!(validator.storage.load_histories().unwrap().len(), 1);
        let data = validator.dashboard_state.read().await;
        assert_eq!(data.status.rounds_completed, 1);
        assert_eq!(data.status.last_round_id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_rejected_round_moves_to_failed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lists.json"), "{}").unwrap();
        let mut validator = validator_loop(dir.path());
        let spool_dir = validator.config.spool_dir();

        std::fs::write(spool_dir.join("001.json"), ROUND_FILE).unwrap();
        validator.drain_spool().await;

        // Same round id again.
        std::fs::write(spool_dir.join("002.json"), ROUND_FILE).unwrap();
        validator.drain_spool().await;

        assert!(spool_dir.join("processed").join("001.json").exists());
        assert!(spool_dir.join("failed").join("002.json").exists());
        assert_eq!(
            validator.dashboard_state.read().await.status.round_failures,
            1
        );
        assert_eq!(
            validator.engine.history().get(MinerUid::new(5)).unwrap().request_count,
            1
        );
    }
}
