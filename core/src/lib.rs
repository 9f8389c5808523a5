pub mod types;
pub mod config;
pub mod domain;
pub mod lists;
pub mod collaborators;
pub mod scoring;
pub mod reputation;
pub mod weights;
pub mod round;
pub mod storage;
pub mod ledger;
pub mod error;

pub use types::{
    MinerResponse, MinerScoreRecord, MinerUid, RegisteredNeuron, RejectionReason,
    ResponseOutcome, ResponseStatus, Role, RoundInput, ScoredSnippet, Snippet,
    SnippetVerdict, StatementEvidence,
};
pub use config::{CallPolicy, PenaltyConfig, ScoringConfig};
pub use domain::{extract_domain, SourceUrl};
pub use lists::{DomainLists, ListSnapshot};
pub use collaborators::{
    CallGuard, ClassProbabilities, Classifier, CollaboratorError, CollaboratorPolicies,
    Collaborators, DomainInfo, DomainRegistry, FabricationDetector, Fetcher,
    GuardedCollaborators, Ledger, LedgerError, RoundSource, SimilarityDetector,
};
pub use scoring::{QualityScorer, ResponseAggregator, SnippetValidator};
pub use reputation::{HistoryConfig, HistoryTracker, MinerHistory, Ranker, Ranking, Regime};
pub use weights::{WeightAllocator, WeightTable};
pub use round::{RoundEngine, RoundReport};
pub use storage::HistoryStorage;
pub use ledger::{PendingSubmission, SubmissionOutcome, SubmitterConfig, WeightSubmitter};
pub use error::{Error, ScoreResult as Result};
