use serde::{Deserialize, Serialize};
use std::fmt;

/// Slot identifier on the network. Participants, validators and the burn
/// identifier all live in the same uid space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinerUid(u16);

impl MinerUid {
    pub const fn new(uid: u16) -> Self {
        Self(uid)
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for MinerUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for MinerUid {
    fn from(uid: u16) -> Self {
        Self(uid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Miner,
    Validator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredNeuron {
    pub uid: MinerUid,
    pub hotkey: String,
    pub role: Role,
}

impl RegisteredNeuron {
    pub fn miner(uid: u16, hotkey: impl Into<String>) -> Self {
        Self {
            uid: MinerUid::new(uid),
            hotkey: hotkey.into(),
            role: Role::Miner,
        }
    }

    pub fn validator(uid: u16, hotkey: impl Into<String>) -> Self {
        Self {
            uid: MinerUid::new(uid),
            hotkey: hotkey.into(),
            role: Role::Validator,
        }
    }

    pub fn is_validator(&self) -> bool {
        self.role == Role::Validator
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub source_url: String,
    pub excerpt: String,
}

impl Snippet {
    pub fn new(source_url: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            excerpt: excerpt.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementEvidence {
    pub statement: String,
    #[serde(default)]
    pub snippets: Vec<Snippet>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    #[default]
    Ok,
    Unreachable,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerResponse {
    pub uid: MinerUid,
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub statements: Vec<StatementEvidence>,
    #[serde(default)]
    pub response_time_seconds: f64,
}

impl MinerResponse {
    pub fn unreachable(uid: MinerUid) -> Self {
        Self {
            uid,
            status: ResponseStatus::Unreachable,
            statements: Vec::new(),
            response_time_seconds: 0.0,
        }
    }

    pub fn flattened_snippets(&self) -> impl Iterator<Item = (&str, &Snippet)> {
        self.statements.iter().flat_map(|evidence| {
            evidence
                .snippets
                .iter()
                .map(move |snippet| (evidence.statement.as_str(), snippet))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    InsecureScheme,
    Blacklisted,
    SearchEngine,
    MalformedExcerpt,
    TooSimilar,
    NotFoundOnPage,
    Fabricated,
    ClassifierUnavailable,
}

impl RejectionReason {
    pub const ALL: [RejectionReason; 8] = [
        RejectionReason::InsecureScheme,
        RejectionReason::Blacklisted,
        RejectionReason::SearchEngine,
        RejectionReason::MalformedExcerpt,
        RejectionReason::TooSimilar,
        RejectionReason::NotFoundOnPage,
        RejectionReason::Fabricated,
        RejectionReason::ClassifierUnavailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::InsecureScheme => "insecure_scheme",
            RejectionReason::Blacklisted => "blacklisted",
            RejectionReason::SearchEngine => "search_engine",
            RejectionReason::MalformedExcerpt => "malformed_excerpt",
            RejectionReason::TooSimilar => "too_similar",
            RejectionReason::NotFoundOnPage => "not_found_on_page",
            RejectionReason::Fabricated => "fabricated",
            RejectionReason::ClassifierUnavailable => "classifier_unavailable",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetVerdict {
    pub passed: bool,
    pub rejection_reason: Option<RejectionReason>,
    pub point_penalty: f64,
    pub local_score: f64,
    pub is_approved_domain: bool,
    pub domain: Option<String>,
}

impl SnippetVerdict {
    pub fn accepted(domain: String, is_approved_domain: bool, local_score: f64) -> Self {
        Self {
            passed: true,
            rejection_reason: None,
            point_penalty: 0.0,
            local_score: local_score.clamp(0.0, 2.0),
            is_approved_domain,
            domain: Some(domain),
        }
    }

    pub fn rejected(reason: RejectionReason, penalty: f64, domain: Option<String>) -> Self {
        Self {
            passed: false,
            rejection_reason: Some(reason),
            point_penalty: penalty,
            local_score: 0.0,
            is_approved_domain: false,
            domain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSnippet {
    pub source_url: String,
    pub verdict: SnippetVerdict,
    pub domain_factor: f64,
    pub snippet_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOutcome {
    Scored,
    Unreachable,
    Empty,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerScoreRecord {
    pub uid: MinerUid,
    pub round_id: String,
    pub outcome: ResponseOutcome,
    pub final_score: f64,
    pub sum_of_snippets: f64,
    pub speed_factor: f64,
    pub snippets: Vec<ScoredSnippet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundInput {
    pub round_id: String,
    pub registry: Vec<RegisteredNeuron>,
    #[serde(default)]
    pub responses: Vec<MinerResponse>,
}
