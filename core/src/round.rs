use crate::collaborators::GuardedCollaborators;
use crate::config::ScoringConfig;
use crate::error::{Error, ScoreResult};
use crate::lists::ListSnapshot;
use crate::reputation::{HistoryConfig, HistoryTracker, Ranker, Ranking, RegistrySync};
use crate::scoring::ResponseAggregator;
use crate::types::{MinerResponse, MinerScoreRecord, MinerUid, RegisteredNeuron, RejectionReason, RoundInput};
use crate::weights::{WeightAllocator, WeightTable};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round_id: String,
    pub validator_uid: Option<MinerUid>,
    pub timestamp: u64,
    pub list_version: String,
    pub scores: Vec<MinerScoreRecord>,
    pub ignored_responses: usize,
    pub registry_sync: RegistrySync,
    pub moving_scores: BTreeMap<MinerUid, f64>,
    pub ranking: Ranking,
    pub weights: WeightTable,
    pub validator_uids: Vec<MinerUid>,
    pub burn_uid: MinerUid,
    pub duration_ms: u64,
}

impl RoundReport {
    pub fn final_score(&self, uid: MinerUid) -> Option<f64> {
        self.scores
            .iter()
            .find(|r| r.uid == uid)
            .map(|r| r.final_score)
    }

    pub fn rejection_counts(&self) -> HashMap<RejectionReason, usize> {
        let mut counts = HashMap::new();
        for reason in self
            .scores
            .iter()
            .flat_map(|r| r.snippets.iter())
            .filter_map(|s| s.verdict.rejection_reason)
        {
            *counts.entry(reason).or_insert(0) += 1;
        }
        counts
    }

    pub fn passed_snippets(&self) -> usize {
        self.scores
            .iter()
            .flat_map(|r| r.snippets.iter())
            .filter(|s| s.verdict.passed)
            .count()
    }
}

/// Runs rounds against the participant histories it owns. Taking `&mut self`
/// per round keeps a single writer for the histories.
pub struct RoundEngine {
    config: ScoringConfig,
    aggregator: ResponseAggregator,
    ranker: Ranker,
    allocator: WeightAllocator,
    collaborators: GuardedCollaborators,
    history: HistoryTracker,
    validator_uid: Option<MinerUid>,
    last_round_id: Option<String>,
}

impl RoundEngine {
    pub fn new(
        config: ScoringConfig,
        collaborators: GuardedCollaborators,
        history: HistoryTracker,
    ) -> ScoreResult<Self> {
        config.validate()?;

        Ok(Self {
            aggregator: ResponseAggregator::new(&config),
            ranker: Ranker::new(config.burn_uid()),
            allocator: WeightAllocator::from_config(&config),
            collaborators,
            history,
            validator_uid: None,
            last_round_id: None,
            config,
        })
    }

    pub fn empty_history(config: &ScoringConfig) -> HistoryTracker {
        HistoryTracker::new(HistoryConfig::from(config))
    }

    pub fn with_validator_uid(mut self, uid: Option<MinerUid>) -> Self {
        self.validator_uid = uid;
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryTracker {
        &self.history
    }

    pub fn last_round_id(&self) -> Option<&str> {
        self.last_round_id.as_deref()
    }

    pub async fn run_round(
        &mut self,
        input: RoundInput,
        lists: &ListSnapshot,
    ) -> ScoreResult<RoundReport> {
        let started = Instant::now();

        if input.round_id.trim().is_empty() {
            return Err(Error::Round("round id must not be empty".to_string()));
        }
        // An empty registry would deregister every participant.
        if input.registry.is_empty() {
            return Err(Error::Round(format!(
                "round {} has an empty registry",
                input.round_id
            )));
        }
        if self.last_round_id.as_deref() == Some(input.round_id.as_str()) {
            return Err(Error::Round(format!(
                "round {} was already processed",
                input.round_id
            )));
        }

        tracing::info!(
            round_id = %input.round_id,
            registered = input.registry.len(),
            responses = input.responses.len(),
            list_version = %lists.version(),
            "Starting round"
        );

        let registry_sync = self.history.sync_registry(&input.registry);

        let (eligible, ignored_responses) =
            self.eligible_responses(&input.registry, &input.responses, lists);

        let scores = self
            .score_responses(&input.round_id, &eligible, lists)
            .await;

        // Every final score is known; fold them into the histories.
        let hotkeys: HashMap<MinerUid, &str> = input
            .registry
            .iter()
            .map(|n| (n.uid, n.hotkey.as_str()))
            .collect();
        for record in &scores {
            if let Some(hotkey) = hotkeys.get(&record.uid) {
                self.history.bind_hotkey(record.uid, hotkey);
            }
            self.history.update(record.uid, record.final_score);
        }

        let ranking = self.ranker.rank(&input.registry, &self.history, lists);
        let weights = self.allocator.allocate(&ranking);

        let validator_uids: Vec<MinerUid> = input
            .registry
            .iter()
            .filter(|n| n.is_validator())
            .map(|n| n.uid)
            .collect();

        let report = RoundReport {
            round_id: input.round_id.clone(),
            validator_uid: self.validator_uid,
            timestamp: current_timestamp(),
            list_version: lists.version().to_string(),
            scores,
            ignored_responses,
            registry_sync,
            moving_scores: self.history.moving_scores(),
            ranking,
            weights,
            validator_uids,
            burn_uid: self.config.burn_uid(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.last_round_id = Some(input.round_id);

        tracing::info!(
            round_id = %report.round_id,
            scored = report.scores.len(),
            ignored = report.ignored_responses,
            ranked = report.ranking.len(),
            duration_ms = report.duration_ms,
            "Round complete"
        );

        Ok(report)
    }

    fn eligible_responses<'a>(
        &self,
        registry: &[RegisteredNeuron],
        responses: &'a [MinerResponse],
        lists: &ListSnapshot,
    ) -> (Vec<&'a MinerResponse>, usize) {
        let neurons: HashMap<MinerUid, &RegisteredNeuron> =
            registry.iter().map(|n| (n.uid, n)).collect();
        let mut seen = HashSet::new();

        let eligible: Vec<&MinerResponse> = responses
            .iter()
            .filter(|response| {
                let Some(neuron) = neurons.get(&response.uid) else {
                    tracing::debug!(uid = response.uid.as_u16(), "Ignoring response from unregistered uid");
                    return false;
                };
                if !self.ranker.is_eligible(neuron, lists) {
                    return false;
                }
                if !seen.insert(response.uid) {
                    tracing::debug!(uid = response.uid.as_u16(), "Ignoring duplicate response");
                    return false;
                }
                true
            })
            .collect();

        let ignored = responses.len() - eligible.len();
        (eligible, ignored)
    }

    async fn score_responses(
        &self,
        round_id: &str,
        responses: &[&MinerResponse],
        lists: &ListSnapshot,
    ) -> Vec<MinerScoreRecord> {
        let aggregator = &self.aggregator;
        let collaborators = &self.collaborators;

        // Futures are built up front (they are lazy and run only when
        // polled) so the stream is not generic over a closure lifetime,
        // which would otherwise break the `Send` proof for spawned callers.
        let futures: Vec<_> = responses
            .iter()
            .map(|&response| aggregator.score_response(collaborators, lists, round_id, response))
            .collect();

        stream::iter(futures)
            .buffered(self.config.max_concurrent_responses.max(1))
            .collect()
            .await
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
