use crate::config::ScoringConfig;
use crate::types::{MinerUid, RegisteredNeuron};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerHistory {
    pub uid: MinerUid,
    #[serde(default)]
    pub hotkey: Option<String>,
    pub moving_average: f64,
    pub request_count: u64,
    #[serde(default)]
    pub last_updated: u64,
}

impl MinerHistory {
    pub fn new(uid: MinerUid) -> Self {
        Self {
            uid,
            hotkey: None,
            moving_average: 0.0,
            request_count: 0,
            last_updated: 0,
        }
    }
}

/// `Immunity` weights new scores more heavily until `request_count` reaches
/// the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Immunity,
    Established,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub immunity_request_threshold: u64,
    pub immunity_weight: f64,
    pub established_weight: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            immunity_request_threshold: 100,
            immunity_weight: 0.5,
            established_weight: 0.3,
        }
    }
}

impl From<&ScoringConfig> for HistoryConfig {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            immunity_request_threshold: config.immunity_request_threshold,
            immunity_weight: config.immunity_weight,
            established_weight: config.established_weight,
        }
    }
}

impl HistoryConfig {
    pub fn regime(&self, request_count: u64) -> Regime {
        if request_count < self.immunity_request_threshold {
            Regime::Immunity
        } else {
            Regime::Established
        }
    }

    pub fn weight_for(&self, regime: Regime) -> f64 {
        match regime {
            Regime::Immunity => self.immunity_weight,
            Regime::Established => self.established_weight,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySync {
    pub reset: Vec<MinerUid>,
    pub dropped: Vec<MinerUid>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryTracker {
    config: HistoryConfig,
    histories: BTreeMap<MinerUid, MinerHistory>,
}

impl HistoryTracker {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            histories: BTreeMap::new(),
        }
    }

    pub fn from_histories(config: HistoryConfig, histories: Vec<MinerHistory>) -> Self {
        Self {
            config,
            histories: histories.into_iter().map(|h| (h.uid, h)).collect(),
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn get(&self, uid: MinerUid) -> Option<&MinerHistory> {
        self.histories.get(&uid)
    }

    pub fn regime_of(&self, uid: MinerUid) -> Regime {
        let count = self.get(uid).map(|h| h.request_count).unwrap_or(0);
        self.config.regime(count)
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    pub fn histories(&self) -> impl Iterator<Item = &MinerHistory> {
        self.histories.values()
    }

    pub fn snapshot(&self) -> Vec<MinerHistory> {
        self.histories.values().cloned().collect()
    }

    pub fn moving_scores(&self) -> BTreeMap<MinerUid, f64> {
        self.histories
            .iter()
            .map(|(uid, h)| (*uid, h.moving_average))
            .collect()
    }

    /// Fold one round's final score into the participant's moving average.
    /// A participant without history starts from zero.
    pub fn update(&mut self, uid: MinerUid, final_score: f64) -> &MinerHistory {
        let final_score = if final_score.is_finite() {
            final_score
        } else {
            tracing::warn!(uid = uid.as_u16(), "Non-finite final score treated as 0");
            0.0
        };

        let config = &self.config;
        let history = self
            .histories
            .entry(uid)
            .or_insert_with(|| MinerHistory::new(uid));

        let regime = config.regime(history.request_count);
        let weight = config.weight_for(regime);
        let previous = history.moving_average;

        history.moving_average = previous * (1.0 - weight) + final_score * weight;
        history.request_count += 1;
        history.last_updated = current_timestamp();

        if history.request_count == config.immunity_request_threshold {
            tracing::info!(
                uid = uid.as_u16(),
                moving_average = history.moving_average,
                "Participant left the immunity period"
            );
        }

        tracing::trace!(
            uid = uid.as_u16(),
            regime = ?regime,
            previous,
            final_score,
            moving_average = history.moving_average,
            "Updated moving average"
        );

        history
    }

    /// Align histories with the current registry: a slot whose hotkey
    /// changed belongs to a new participant and starts over, and slots no
    /// longer registered are dropped.
    pub fn sync_registry(&mut self, registry: &[RegisteredNeuron]) -> RegistrySync {
        let registered: HashMap<MinerUid, &str> = registry
            .iter()
            .map(|n| (n.uid, n.hotkey.as_str()))
            .collect();

        let mut sync = RegistrySync::default();

        self.histories.retain(|uid, _| {
            let keep = registered.contains_key(uid);
            if !keep {
                sync.dropped.push(*uid);
            }
            keep
        });

        for (uid, history) in self.histories.iter_mut() {
            let Some(hotkey) = registered.get(uid) else {
                continue;
            };

            match &history.hotkey {
                Some(known) if known != hotkey => {
                    *history = MinerHistory::new(*uid);
                    history.hotkey = Some(hotkey.to_string());
                    sync.reset.push(*uid);
                }
                Some(_) => {}
                None => history.hotkey = Some(hotkey.to_string()),
            }
        }

        if !sync.reset.is_empty() || !sync.dropped.is_empty() {
            tracing::info!(
                reset = sync.reset.len(),
                dropped = sync.dropped.len(),
                "Synchronized histories with registry"
            );
        }

        sync
    }

    pub fn bind_hotkey(&mut self, uid: MinerUid, hotkey: &str) {
        let history = self
            .histories
            .entry(uid)
            .or_insert_with(|| MinerHistory::new(uid));
        if history.hotkey.is_none() {
            history.hotkey = Some(hotkey.to_string());
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> HistoryTracker {
        HistoryTracker::new(HistoryConfig::default())
    }

    #[test]
    fn test_first_update_bootstraps_from_zero() {
        let mut tracker = tracker();
        let history = tracker.update(MinerUid::new(1), 1.65);

        assert!((history.moving_average - 0.825).abs() < 1e-12);
        assert_eq!(history.request_count, 1);
    }

    #[test]
    fn test_update_is_convex_combination() {
        let mut tracker = tracker();
        let uid = MinerUid::new(2);
        let scores = [3.0, -10.0, 0.5, 7.25, -5.0, 0.0, 1.65];

        tracker.update(uid, 2.0);
        for score in scores {
            let previous = tracker.get(uid).unwrap().moving_average;
            let current = tracker.update(uid, score).moving_average;
            let (lo, hi) = if previous <= score {
                (previous, score)
            } else {
                (score, previous)
            };
            assert!(current >= lo - 1e-12 && current <= hi + 1e-12);
        }
    }

    #[test]
    fn test_regime_switch_at_hundredth_request() {
        let mut tracker = tracker();
        let uid = MinerUid::new(5);

        for i in 0..100 {
            assert_eq!(tracker.regime_of(uid), Regime::Immunity, "request {}", i);
            tracker.update(uid, 1.0);
        }

        assert_eq!(tracker.get(uid).unwrap().request_count, 100);
        assert_eq!(tracker.regime_of(uid), Regime::Established);

        let before = tracker.get(uid).unwrap().moving_average;
        let after = tracker.update(uid, 0.0).moving_average;
        assert!((after - before * 0.7).abs() < 1e-12);

        for _ in 0..50 {
            tracker.update(uid, -10.0);
            assert_eq!(tracker.regime_of(uid), Regime::Established);
        }
    }

    #[test]
    fn test_hundredth_update_still_uses_immunity_weight() {
        let mut tracker = tracker();
        let uid = MinerUid::new(6);
        for _ in 0..99 {
            tracker.update(uid, 0.0);
        }
        let history = tracker.update(uid, 2.0);
        assert!((history.moving_average - 1.0).abs() < 1e-12);
        assert_eq!(history.request_count, 100);
    }

    #[test]
    fn test_non_finite_score_treated_as_zero() {
        let mut tracker = tracker();
        let history = tracker.update(MinerUid::new(9), f64::NAN);
        assert_eq!(history.moving_average, 0.0);
        assert_eq!(history.request_count, 1);
    }

    #[test]
    fn test_sync_registry_resets_reregistered_slot() {
        let mut tracker = tracker();
        tracker.bind_hotkey(MinerUid::new(1), "hk_old");
        tracker.update(MinerUid::new(1), 4.0);
        tracker.bind_hotkey(MinerUid::new(2), "hk_two");
        tracker.update(MinerUid::new(2), 4.0);
        tracker.update(MinerUid::new(3), 4.0);

        let registry = vec![
            RegisteredNeuron::miner(1, "hk_new"),
            RegisteredNeuron::miner(2, "hk_two"),
        ];
        let sync = tracker.sync_registry(&registry);

        assert_eq!(sync.reset, vec![MinerUid::new(1)]);
        assert_eq!(sync.dropped, vec![MinerUid::new(3)]);

        let reset = tracker.get(MinerUid::new(1)).unwrap();
        assert_eq!(reset.request_count, 0);
        assert_eq!(reset.moving_average, 0.0);
        assert_eq!(reset.hotkey.as_deref(), Some("hk_new"));

        assert_eq!(tracker.get(MinerUid::new(2)).unwrap().request_count, 1);
        assert!(tracker.get(MinerUid::new(3)).is_none());
    }

    #[test]
    fn test_history_serialization() {
        let mut tracker = tracker();
        tracker.update(MinerUid::new(4), 1.0);

        let json = serde_json::to_string(&tracker.snapshot()).unwrap();
        let restored: Vec<MinerHistory> = serde_json::from_str(&json).unwrap();
        let restored = HistoryTracker::from_histories(HistoryConfig::default(), restored);

        assert_eq!(restored.get(MinerUid::new(4)), tracker.get(MinerUid::new(4)));
    }
}
