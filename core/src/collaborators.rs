use crate::config::CallPolicy;
use crate::types::RoundInput;
use crate::weights::WeightTable;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Timeout(_) | CollaboratorError::Transient(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("transient ledger failure: {0}")]
    Transient(String),

    #[error("fatal ledger failure: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub contradiction: f64,
    pub neutral: f64,
    pub entailment: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainInfo {
    #[serde(default)]
    pub is_blacklisted: bool,
    #[serde(default)]
    pub is_approved: bool,
    #[serde(default)]
    pub is_search_engine: bool,
    #[serde(default)]
    pub registration_age_days: Option<u32>,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        statement: &str,
        excerpt: &str,
    ) -> Result<ClassProbabilities, CollaboratorError>;
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait DomainRegistry: Send + Sync {
    async fn lookup(&self, domain: &str) -> Result<DomainInfo, CollaboratorError>;
}

#[async_trait]
pub trait FabricationDetector: Send + Sync {
    async fn is_fabricated(&self, statement: &str, excerpt: &str)
        -> Result<bool, CollaboratorError>;
}

#[async_trait]
pub trait SimilarityDetector: Send + Sync {
    async fn similarity(&self, a: &str, b: &str) -> Result<f64, CollaboratorError>;
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// `round_id` identifies the write; repeating it must not apply twice.
    async fn set_weights(
        &self,
        round_id: &str,
        table: &WeightTable,
        subnet_id: u16,
    ) -> Result<(), LedgerError>;
}

/// Supplies round inputs. Returns `None` when no round is ready. A round
/// handed out stays owned by the source until it is completed or failed.
#[async_trait]
pub trait RoundSource: Send + Sync {
    async fn next_round(&mut self) -> crate::error::ScoreResult<Option<RoundInput>>;

    async fn complete(&mut self, _round_id: &str) -> crate::error::ScoreResult<()> {
        Ok(())
    }

    async fn fail(&mut self, _round_id: &str) -> crate::error::ScoreResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorPolicies {
    pub classifier: CallPolicy,
    pub fetcher: CallPolicy,
    pub registry: CallPolicy,
    pub detectors: CallPolicy,
}

impl CollaboratorPolicies {
    pub fn validate(&self) -> crate::error::ScoreResult<()> {
        self.classifier.validate()?;
        self.fetcher.validate()?;
        self.registry.validate()?;
        self.detectors.validate()
    }
}

#[derive(Debug, Clone)]
pub struct CallGuard {
    name: &'static str,
    policy: CallPolicy,
    permits: Arc<Semaphore>,
}

impl CallGuard {
    pub fn new(name: &'static str, policy: CallPolicy) -> Self {
        let permits = Arc::new(Semaphore::new(policy.max_concurrent_calls.max(1)));
        Self {
            name,
            policy,
            permits,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, CollaboratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let mut attempt = 0u32;

        loop {
            let result = {
                let _permit = self.permits.acquire().await.map_err(|_| {
                    CollaboratorError::Unavailable(format!("{} guard closed", self.name))
                })?;

                match tokio::time::timeout(self.policy.timeout(), op()).await {
                    Ok(result) => result,
                    Err(_) => Err(CollaboratorError::Timeout(self.policy.timeout())),
                }
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.backoff(attempt);
                    let jitter_ms = {
                        let max = (delay.as_millis() as u64 / 4).max(1);
                        rand::thread_rng().gen_range(0..=max)
                    };
                    tracing::debug!(
                        collaborator = self.name,
                        attempt = attempt,
                        error = %e,
                        "Retrying collaborator call"
                    );
                    tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
                }
                Err(e) => {
                    tracing::warn!(
                        collaborator = self.name,
                        attempts = attempt + 1,
                        error = %e,
                        "Collaborator call failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn Classifier>,
    pub fetcher: Arc<dyn Fetcher>,
    pub registry: Option<Arc<dyn DomainRegistry>>,
    pub fabrication: Arc<dyn FabricationDetector>,
    pub similarity: Arc<dyn SimilarityDetector>,
}

#[derive(Clone)]
pub struct GuardedCollaborators {
    inner: Collaborators,
    classifier_guard: CallGuard,
    fetcher_guard: CallGuard,
    registry_guard: CallGuard,
    detector_guard: CallGuard,
}

impl GuardedCollaborators {
    pub fn new(inner: Collaborators, policies: &CollaboratorPolicies) -> Self {
        Self {
            inner,
            classifier_guard: CallGuard::new("classifier", policies.classifier.clone()),
            fetcher_guard: CallGuard::new("fetcher", policies.fetcher.clone()),
            registry_guard: CallGuard::new("registry", policies.registry.clone()),
            detector_guard: CallGuard::new("detector", policies.detectors.clone()),
        }
    }

    pub async fn classify(
        &self,
        statement: &str,
        excerpt: &str,
    ) -> Result<ClassProbabilities, CollaboratorError> {
        let classifier = self.inner.classifier.as_ref();
        self.classifier_guard
            .call(move || classifier.classify(statement, excerpt))
            .await
    }

    pub async fn fetch(&self, url: &str) -> Result<String, CollaboratorError> {
        let fetcher = self.inner.fetcher.as_ref();
        self.fetcher_guard.call(move || fetcher.fetch(url)).await
    }

    /// `Ok(None)` when no registry is configured.
    pub async fn lookup(&self, domain: &str) -> Result<Option<DomainInfo>, CollaboratorError> {
        match &self.inner.registry {
            Some(registry) => {
                let registry = registry.as_ref();
                self.registry_guard
                    .call(move || registry.lookup(domain))
                    .await
                    .map(Some)
            }
            None => Ok(None),
        }
    }

    pub async fn is_fabricated(
        &self,
        statement: &str,
        excerpt: &str,
    ) -> Result<bool, CollaboratorError> {
        let detector = self.inner.fabrication.as_ref();
        self.detector_guard
            .call(move || detector.is_fabricated(statement, excerpt))
            .await
    }

    pub async fn similarity(&self, a: &str, b: &str) -> Result<f64, CollaboratorError> {
        let detector = self.inner.similarity.as_ref();
        self.detector_guard
            .call(move || detector.similarity(a, b))
            .await
    }
}
