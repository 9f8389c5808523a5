use super::quality::QualityScorer;
use super::validator::{SnippetValidator, Validation};
use crate::collaborators::GuardedCollaborators;
use crate::config::{PenaltyConfig, ScoringConfig};
use crate::lists::ListSnapshot;
use crate::types::{
    MinerResponse, MinerScoreRecord, RejectionReason, ResponseOutcome, ResponseStatus,
    ScoredSnippet, Snippet, SnippetVerdict,
};
use futures::future::join_all;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ResponseAggregator {
    validator: SnippetValidator,
    quality: QualityScorer,
    penalties: PenaltyConfig,
    max_snippets: usize,
    approved_multiplier: f64,
    speed_window_secs: f64,
}

impl ResponseAggregator {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            validator: SnippetValidator::new(config),
            quality: QualityScorer::new(config.probability_tolerance),
            penalties: config.penalties.clone(),
            max_snippets: config.max_snippets_per_response,
            approved_multiplier: config.approved_domain_multiplier,
            speed_window_secs: config.speed_factor_window_seconds,
        }
    }

    pub async fn score_response(
        &self,
        collaborators: &GuardedCollaborators,
        lists: &ListSnapshot,
        round_id: &str,
        response: &MinerResponse,
    ) -> MinerScoreRecord {
        if let Some((outcome, score)) = self.response_guard(response) {
            tracing::debug!(
                uid = response.uid.as_u16(),
                outcome = ?outcome,
                score,
                "Response settled without snippet scoring"
            );
            return MinerScoreRecord {
                uid: response.uid,
                round_id: round_id.to_string(),
                outcome,
                final_score: score,
                sum_of_snippets: score,
                speed_factor: 1.0,
                snippets: Vec::new(),
            };
        }

        let snippets: Vec<(&str, &Snippet)> = response
            .flattened_snippets()
            .take(self.max_snippets)
            .collect();

        let verdicts = join_all(snippets.iter().map(|(statement, snippet)| {
            self.evaluate_snippet(collaborators, lists, statement, snippet)
        }))
        .await;

        let judged: Vec<(String, SnippetVerdict)> = snippets
            .iter()
            .map(|(_, snippet)| snippet.source_url.clone())
            .zip(verdicts)
            .collect();

        let (scored, sum_of_snippets) = self.combine(judged);
        let speed_factor = self.speed_factor(response.response_time_seconds);
        let final_score = sum_of_snippets * speed_factor;

        tracing::debug!(
            uid = response.uid.as_u16(),
            snippets = scored.len(),
            sum_of_snippets,
            speed_factor,
            final_score,
            "Scored response"
        );

        MinerScoreRecord {
            uid: response.uid,
            round_id: round_id.to_string(),
            outcome: ResponseOutcome::Scored,
            final_score,
            sum_of_snippets,
            speed_factor,
            snippets: scored,
        }
    }

    async fn evaluate_snippet(
        &self,
        collaborators: &GuardedCollaborators,
        lists: &ListSnapshot,
        statement: &str,
        snippet: &Snippet,
    ) -> SnippetVerdict {
        let validated = match self
            .validator
            .validate(collaborators, lists, statement, snippet)
            .await
        {
            Validation::Passed(validated) => validated,
            Validation::Rejected(verdict) => return verdict,
        };

        match self
            .quality
            .score(collaborators, statement, &snippet.excerpt)
            .await
        {
            Ok(local_score) => SnippetVerdict::accepted(
                validated.domain,
                validated.is_approved_domain,
                local_score,
            ),
            Err(e) => {
                tracing::debug!(url = %snippet.source_url, error = %e, "Quality scoring failed");
                SnippetVerdict::rejected(
                    RejectionReason::ClassifierUnavailable,
                    self.penalties.classifier_unavailable,
                    Some(validated.domain),
                )
            }
        }
    }

    fn response_guard(&self, response: &MinerResponse) -> Option<(ResponseOutcome, f64)> {
        match response.status {
            ResponseStatus::Unreachable => {
                Some((ResponseOutcome::Unreachable, self.penalties.unreachable))
            }
            ResponseStatus::Malformed => Some((ResponseOutcome::Malformed, self.penalties.malformed)),
            ResponseStatus::Ok if response.statements.is_empty() => {
                Some((ResponseOutcome::Empty, self.penalties.empty))
            }
            ResponseStatus::Ok => None,
        }
    }

    /// Applies domain deduplication and the approved-domain multiplier to
    /// passing snippets and adds rejected snippets' penalties as-is.
    pub fn combine(&self, judged: Vec<(String, SnippetVerdict)>) -> (Vec<ScoredSnippet>, f64) {
        let factors = domain_factors(judged.iter().map(|(_, v)| v.domain.as_deref()));

        let scored: Vec<ScoredSnippet> = judged
            .into_iter()
            .zip(factors)
            .map(|((source_url, verdict), domain_factor)| {
                let snippet_score = if verdict.passed {
                    let multiplier = if verdict.is_approved_domain {
                        self.approved_multiplier
                    } else {
                        1.0
                    };
                    verdict.local_score * domain_factor * multiplier
                } else {
                    verdict.point_penalty
                };

                ScoredSnippet {
                    source_url,
                    verdict,
                    domain_factor,
                    snippet_score,
                }
            })
            .collect();

        let sum = scored.iter().map(|s| s.snippet_score).sum();
        (scored, sum)
    }

    /// `max(1, 2 - t / window)`: 2.0 for an instant answer, falling linearly
    /// to 1.0 at the window boundary.
    pub fn speed_factor(&self, response_time_seconds: f64) -> f64 {
        if !response_time_seconds.is_finite() {
            return 1.0;
        }

        let t = response_time_seconds.max(0.0);
        (2.0 - t / self.speed_window_secs).clamp(1.0, 2.0)
    }
}

/// `2^-(k-1)` for the k-th occurrence of each domain, in order. Entries
/// without a domain get 1.0.
pub fn domain_factors<'a>(domains: impl Iterator<Item = Option<&'a str>>) -> Vec<f64> {
    let mut seen: HashMap<&'a str, i32> = HashMap::new();

    domains
        .map(|domain| match domain {
            Some(domain) => {
                let count = seen.entry(domain).or_insert(0);
                *count += 1;
                0.5f64.powi(*count - 1)
            }
            None => 1.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> ResponseAggregator {
        ResponseAggregator::new(&ScoringConfig::default())
    }

    fn pass(domain: &str, local: f64, approved: bool) -> (String, SnippetVerdict) {
        (
            format!("https://{}/page", domain),
            SnippetVerdict::accepted(domain.to_string(), approved, local),
        )
    }

    #[test]
    fn test_domain_factor_halves_per_repeat() {
        let domains = ["x.com", "x.com", "y.com", "x.com", "x.com"];
        let factors = domain_factors(domains.iter().map(|d| Some(*d)));
        assert_eq!(factors, vec![1.0, 0.5, 1.0, 0.25, 0.125]);
    }

    #[test]
    fn test_speed_factor_bounds_and_linearity() {
        let agg = aggregator();
        assert_eq!(agg.speed_factor(0.0), 2.0);
        assert_eq!(agg.speed_factor(-5.0), 2.0);
        assert_eq!(agg.speed_factor(30.0), 1.0);
        assert_eq!(agg.speed_factor(120.0), 1.0);
        assert_eq!(agg.speed_factor(15.0), 1.5);
        assert_eq!(agg.speed_factor(f64::NAN), 1.0);

        let mut previous = agg.speed_factor(0.0);
        for step in 1..30 {
            let current = agg.speed_factor(step as f64);
            assert!(current < previous);
            assert!((previous - current - 1.0 / 30.0).abs() < 1e-12);
            previous = current;
        }
    }

    #[test]
    fn test_two_snippets_same_domain_example() {
        let agg = aggregator();
        let (scored, sum) = agg.combine(vec![pass("x.com", 0.8, false), pass("x.com", 0.6, false)]);

        assert!((scored[0].snippet_score - 0.8).abs() < 1e-9);
        assert_eq!(scored[1].domain_factor, 0.5);
        assert!((scored[1].snippet_score - 0.3).abs() < 1e-9);
        assert!((sum - 1.1).abs() < 1e-9);

        let final_score = sum * agg.speed_factor(15.0);
        assert!((final_score - 1.65).abs() < 1e-9);
    }

    #[test]
    fn test_approved_domain_multiplier() {
        let agg = aggregator();
        let (_, sum) = agg.combine(vec![pass("nature.com", 0.5, true)]);
        assert!((sum - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_rejected_snippet_penalty_is_unscaled() {
        let agg = aggregator();
        let rejected = (
            "https://x.com/b".to_string(),
            SnippetVerdict::rejected(RejectionReason::NotFoundOnPage, -1.0, Some("x.com".into())),
        );
        let (scored, sum) = agg.combine(vec![pass("x.com", 1.0, true), rejected]);

        assert_eq!(scored[1].domain_factor, 0.5);
        assert_eq!(scored[1].snippet_score, -1.0);
        assert!((sum - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejected_snippet_counts_as_domain_occurrence() {
        let agg = aggregator();
        let rejected = (
            "https://x.com/a".to_string(),
            SnippetVerdict::rejected(RejectionReason::Fabricated, -5.0, Some("x.com".into())),
        );
        let (scored, sum) = agg.combine(vec![rejected, pass("x.com", 0.8, false)]);

        assert_eq!(scored[1].domain_factor, 0.5);
        assert!((sum - (-5.0 + 0.4)).abs() < 1e-9);
    }

    #[test]
    fn test_response_guard_outcomes() {
        let agg = aggregator();
        let uid = crate::types::MinerUid::new(3);

        let unreachable = MinerResponse::unreachable(uid);
        assert_eq!(
            agg.response_guard(&unreachable),
            Some((ResponseOutcome::Unreachable, -10.0))
        );

        let empty = MinerResponse {
            uid,
            status: ResponseStatus::Ok,
            statements: vec![],
            response_time_seconds: 1.0,
        };
        assert_eq!(agg.response_guard(&empty), Some((ResponseOutcome::Empty, -5.0)));

        let malformed = MinerResponse {
            status: ResponseStatus::Malformed,
            ..empty
        };
        assert_eq!(
            agg.response_guard(&malformed),
            Some((ResponseOutcome::Malformed, -10.0))
        );
    }
}
