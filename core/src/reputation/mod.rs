mod history;
mod ranking;

pub use history::{HistoryConfig, HistoryTracker, MinerHistory, Regime, RegistrySync};
pub use ranking::{RankedParticipant, Ranker, Ranking};
