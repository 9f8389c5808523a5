use crate::collaborators::{ClassProbabilities, CollaboratorError, GuardedCollaborators};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QualityError {
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),
}

#[derive(Debug, Clone)]
pub struct QualityScorer {
    probability_tolerance: f64,
}

impl QualityScorer {
    pub fn new(probability_tolerance: f64) -> Self {
        Self {
            probability_tolerance,
        }
    }

    pub async fn score(
        &self,
        collaborators: &GuardedCollaborators,
        statement: &str,
        excerpt: &str,
    ) -> Result<f64, QualityError> {
        let probabilities = collaborators
            .classify(statement, excerpt)
            .await
            .map_err(|e| QualityError::ClassifierUnavailable(e.to_string()))?;

        self.local_score(&probabilities)
            .map_err(|e| QualityError::ClassifierUnavailable(e.to_string()))
    }

    /// `contradiction + entailment`, i.e. everything but the neutral mass.
    pub fn local_score(&self, p: &ClassProbabilities) -> Result<f64, CollaboratorError> {
        let values = [p.contradiction, p.neutral, p.entailment];

        if values
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0 || *v > 1.0)
        {
            return Err(CollaboratorError::Malformed(format!(
                "probability out of range: {:?}",
                p
            )));
        }

        let sum: f64 = values.iter().sum();
        if (sum - 1.0).abs() > self.probability_tolerance {
            return Err(CollaboratorError::Malformed(format!(
                "probabilities sum to {:.4}",
                sum
            )));
        }

        Ok((p.contradiction + p.entailment).clamp(0.0, 2.0))
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(0.05)
    }
}
