#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use veriscore_core::{
    CallPolicy, ClassProbabilities, Classifier, CollaboratorError, CollaboratorPolicies,
    Collaborators, DomainInfo, DomainRegistry, FabricationDetector, Fetcher,
    GuardedCollaborators, Ledger, LedgerError, SimilarityDetector, WeightTable,
};
use veriscore_core::scoring::normalize_text;

pub const DEFAULT_PROBABILITIES: ClassProbabilities = ClassProbabilities {
    contradiction: 0.1,
    neutral: 0.2,
    entailment: 0.7,
};

/// Probabilities keyed by excerpt. Excerpts containing "unclassifiable"
/// fail.
#[derive(Default)]
pub struct MockClassifier {
    pub by_excerpt: HashMap<String, ClassProbabilities>,
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(
        &self,
        _statement: &str,
        excerpt: &str,
    ) -> Result<ClassProbabilities, CollaboratorError> {
        if excerpt.contains("unclassifiable") {
            return Err(CollaboratorError::Unavailable("model offline".to_string()));
        }
        Ok(self
            .by_excerpt
            .get(excerpt)
            .copied()
            .unwrap_or(DEFAULT_PROBABILITIES))
    }
}

#[derive(Default)]
pub struct MockFetcher {
    pub pages: HashMap<String, String>,
    pub fetches: AtomicUsize,
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, CollaboratorError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| CollaboratorError::Unavailable(format!("404 {}", url)))
    }
}

/// 1.0 for texts equal after normalization, 0.1 otherwise.
pub struct ExactSimilarity;

#[async_trait]
impl SimilarityDetector for ExactSimilarity {
    async fn similarity(&self, a: &str, b: &str) -> Result<f64, CollaboratorError> {
        if normalize_text(a) == normalize_text(b) {
            Ok(1.0)
        } else {
            Ok(0.1)
        }
    }
}

/// Flags excerpts containing "miracle".
pub struct KeywordFabrication;

#[async_trait]
impl FabricationDetector for KeywordFabrication {
    async fn is_fabricated(&self, _statement: &str, excerpt: &str) -> Result<bool, CollaboratorError> {
        Ok(excerpt.contains("miracle"))
    }
}

pub struct FailingRegistry;

#[async_trait]
impl DomainRegistry for FailingRegistry {
    async fn lookup(&self, _domain: &str) -> Result<DomainInfo, CollaboratorError> {
        Err(CollaboratorError::Unavailable("registry down".to_string()))
    }
}

#[derive(Default)]
pub struct StaticRegistry {
    pub domains: HashMap<String, DomainInfo>,
}

#[async_trait]
impl DomainRegistry for StaticRegistry {
    async fn lookup(&self, domain: &str) -> Result<DomainInfo, CollaboratorError> {
        Ok(self.domains.get(domain).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct RecordingLedger {
    pub writes: Mutex<Vec<WeightTable>>,
    pub fail_fatally: Mutex<bool>,
}

#[async_trait]
impl Ledger for RecordingLedger {
    async fn set_weights(
        &self,
        _round_id: &str,
        table: &WeightTable,
        _subnet_id: u16,
    ) -> Result<(), LedgerError> {
        if *self.fail_fatally.lock().unwrap() {
            return Err(LedgerError::Fatal("extrinsic rejected".to_string()));
        }
        self.writes.lock().unwrap().push(table.clone());
        Ok(())
    }
}

pub fn fast_policies() -> CollaboratorPolicies {
    let policy = CallPolicy {
        timeout_ms: 500,
        max_retries: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        max_concurrent_calls: 4,
    };
    CollaboratorPolicies {
        classifier: policy.clone(),
        fetcher: policy.clone(),
        registry: policy.clone(),
        detectors: policy,
    }
}

pub fn collaborators(
    fetcher: Arc<MockFetcher>,
    classifier: MockClassifier,
    registry: Option<Arc<dyn DomainRegistry>>,
) -> GuardedCollaborators {
    GuardedCollaborators::new(
        Collaborators {
            classifier: Arc::new(classifier),
            fetcher,
            registry,
            fabrication: Arc::new(KeywordFabrication),
            similarity: Arc::new(ExactSimilarity),
        },
        &fast_policies(),
    )
}

pub fn probs(contradiction: f64, neutral: f64, entailment: f64) -> ClassProbabilities {
    ClassProbabilities {
        contradiction,
        neutral,
        entailment,
    }
}
