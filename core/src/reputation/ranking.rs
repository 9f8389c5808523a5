use super::history::HistoryTracker;
use crate::lists::ListSnapshot;
use crate::types::{MinerUid, RegisteredNeuron};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedParticipant {
    pub uid: MinerUid,
    pub moving_average: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub entries: Vec<RankedParticipant>,
}

impl Ranking {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn uids(&self) -> impl Iterator<Item = MinerUid> + '_ {
        self.entries.iter().map(|e| e.uid)
    }

    pub fn position(&self, uid: MinerUid) -> Option<usize> {
        self.entries.iter().position(|e| e.uid == uid)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ranker {
    burn_uid: MinerUid,
}

impl Ranker {
    pub fn new(burn_uid: MinerUid) -> Self {
        Self { burn_uid }
    }

    /// Validators, the burn identifier and banned hotkeys are left out.
    /// Registered miners without history rank with a moving average of 0.
    pub fn rank(
        &self,
        registry: &[RegisteredNeuron],
        histories: &HistoryTracker,
        lists: &ListSnapshot,
    ) -> Ranking {
        let mut entries: Vec<RankedParticipant> = registry
            .iter()
            .filter(|n| self.is_eligible(n, lists))
            .map(|n| RankedParticipant {
                uid: n.uid,
                moving_average: histories
                    .get(n.uid)
                    .map(|h| h.moving_average)
                    .unwrap_or(0.0),
            })
            .collect();

        entries.sort_by(compare_entries);
        entries.dedup_by_key(|e| e.uid);

        Ranking { entries }
    }

    pub fn is_eligible(&self, neuron: &RegisteredNeuron, lists: &ListSnapshot) -> bool {
        if neuron.is_validator() || neuron.uid == self.burn_uid {
            return false;
        }

        if lists.is_banned(&neuron.hotkey) {
            tracing::debug!(uid = neuron.uid.as_u16(), "Excluding banned hotkey from ranking");
            return false;
        }

        true
    }
}

fn compare_entries(a: &RankedParticipant, b: &RankedParticipant) -> Ordering {
    sort_key(b.moving_average)
        .total_cmp(&sort_key(a.moving_average))
        .then_with(|| a.uid.cmp(&b.uid))
}

fn sort_key(value: f64) -> f64 {
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}
