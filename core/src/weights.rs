use crate::config::ScoringConfig;
use crate::reputation::Ranking;
use crate::types::MinerUid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightTable {
    pub weights: BTreeMap<MinerUid, u16>,
}

impl WeightTable {
    pub fn get(&self, uid: MinerUid) -> u16 {
        self.weights.get(&uid).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.weights.values().map(|w| *w as u64).sum()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// `(uids, weights)` in uid order, the shape a ledger extrinsic takes.
    pub fn to_vectors(&self) -> (Vec<u16>, Vec<u16>) {
        self.weights
            .iter()
            .map(|(uid, weight)| (uid.as_u16(), *weight))
            .unzip()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightAllocator {
    total_weight: u16,
    burn_fraction: f64,
    decay: f64,
    burn_uid: MinerUid,
}

impl WeightAllocator {
    pub fn new(total_weight: u16, burn_fraction: f64, decay: f64, burn_uid: MinerUid) -> Self {
        Self {
            total_weight,
            burn_fraction: burn_fraction.clamp(0.0, 1.0),
            decay,
            burn_uid,
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(
            config.total_weight,
            config.emission_control_fraction,
            config.rank_decay,
            config.burn_uid(),
        )
    }

    pub fn total_weight(&self) -> u16 {
        self.total_weight
    }

    /// `round(T × r)`, half away from zero.
    pub fn burn_weight(&self) -> u64 {
        let total = self.total_weight as f64;
        ((total * self.burn_fraction).round() as u64).min(self.total_weight as u64)
    }

    pub fn raw_shares(&self, pool: u64, n: usize) -> Vec<f64> {
        let pool = pool as f64;
        (1..=n)
            .map(|rank| {
                let exponent = if rank < n { rank } else { n - 1 };
                pool * self.decay.powi(exponent as i32)
            })
            .collect()
    }

    // Rank i of N gets pool / 2^i and the last rank pool / 2^(N-1). Floored
    // shares are topped up by largest remainder so the table sums to the total.
    pub fn allocate(&self, ranking: &Ranking) -> WeightTable {
        let total = self.total_weight as u64;
        let n = ranking.len();

        let mut weights = BTreeMap::new();

        if n == 0 {
            weights.insert(self.burn_uid, self.total_weight);
            return WeightTable { weights };
        }

        let burn = self.burn_weight();
        let pool = total - burn;

        let raw = self.raw_shares(pool, n);
        let mut units: Vec<u64> = raw.iter().map(|s| s.floor() as u64).collect();

        // Floored shares may already exceed the pool only through float
        // error; clip from the tail before handing out the remainder.
        let mut assigned: u64 = units.iter().sum();
        let mut idx = n;
        while assigned > pool && idx > 0 {
            idx -= 1;
            let take = (assigned - pool).min(units[idx]);
            units[idx] -= take;
            assigned -= take;
        }

        let leftover = pool - assigned;
        if leftover > 0 {
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by(|&a, &b| {
                let ra = raw[a] - raw[a].floor();
                let rb = raw[b] - raw[b].floor();
                rb.total_cmp(&ra).then_with(|| a.cmp(&b))
            });

            for &i in order.iter().cycle().take(leftover as usize) {
                units[i] += 1;
            }
        }

        for (entry, share) in ranking.entries.iter().zip(units) {
            weights.insert(entry.uid, share as u16);
        }
        let burn_entry = weights.entry(self.burn_uid).or_insert(0);
        *burn_entry = burn_entry.saturating_add(burn as u16);

        let table = WeightTable { weights };
        debug_assert_eq!(table.total(), total);

        tracing::debug!(
            ranked = n,
            burn_weight = burn,
            pool,
            leftover,
            "Allocated weight table"
        );

        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::RankedParticipant;

    fn ranking(n: u16) -> Ranking {
        Ranking {
            entries: (1..=n)
                .map(|i| RankedParticipant {
                    uid: MinerUid::new(i),
                    moving_average: (n - i) as f64,
                })
                .collect(),
        }
    }

    fn allocator() -> WeightAllocator {
        WeightAllocator::from_config(&ScoringConfig::default())
    }

    #[test]
    fn test_sum_is_exact_for_any_participant_count() {
        let allocator = allocator();
        for n in [0u16, 1, 2, 3, 7, 50, 64, 100, 255] {
            let table = allocator.allocate(&ranking(n));
            assert_eq!(table.total(), 65535, "n = {}", n);
        }
    }

    #[test]
    fn test_no_participants_burns_everything() {
        let table = allocator().allocate(&ranking(0));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(MinerUid::new(0)), 65535);
    }

    #[test]
    fn test_single_participant_takes_pool() {
        let table = allocator().allocate(&ranking(1));
        assert_eq!(table.get(MinerUid::new(0)), 32768);
        assert_eq!(table.get(MinerUid::new(1)), 32767);
    }

    #[test]
    fn test_three_participant_example() {
        let allocator = allocator();
        assert_eq!(allocator.burn_weight(), 32768);

        let raw = allocator.raw_shares(32767, 3);
        assert_eq!(raw, vec![16383.5, 8191.75, 8191.75]);

        let table = allocator.allocate(&ranking(3));
        assert_eq!(table.get(MinerUid::new(0)), 32768);
        assert_eq!(table.get(MinerUid::new(1)), 16383);
        assert_eq!(table.get(MinerUid::new(2)), 8192);
        assert_eq!(table.get(MinerUid::new(3)), 8192);
        assert_eq!(table.total(), 65535);
    }

    #[test]
    fn test_weights_non_increasing_by_rank() {
        let table = allocator().allocate(&ranking(50));
        let by_rank: Vec<u16> = (1..=50).map(|i| table.get(MinerUid::new(i))).collect();
        for pair in by_rank.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        assert_eq!(table.len(), 51);
    }

    #[test]
    fn test_zero_burn_fraction() {
        let allocator = WeightAllocator::new(65535, 0.0, 0.5, MinerUid::new(0));
        let table = allocator.allocate(&ranking(2));
        assert_eq!(table.get(MinerUid::new(0)), 0);
        assert_eq!(table.total(), 65535);

        let empty = allocator.allocate(&ranking(0));
        assert_eq!(empty.get(MinerUid::new(0)), 65535);
    }

    #[test]
    fn test_to_vectors_orders_by_uid() {
        let table = allocator().allocate(&ranking(2));
        let (uids, weights) = table.to_vectors();
        assert_eq!(uids, vec![0, 1, 2]);
        assert_eq!(weights.iter().map(|w| *w as u64).sum::<u64>(), 65535);
    }
}
