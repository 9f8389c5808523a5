use crate::error::{Error, ScoreResult};
use crate::types::MinerUid;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TOTAL_WEIGHT: u16 = u16::MAX;
pub const DEFAULT_BURN_UID: u16 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub emission_control_fraction: f64,
    pub total_weight: u16,
    pub burn_uid: u16,
    pub rank_decay: f64,

    pub immunity_request_threshold: u64,
    pub immunity_weight: f64,
    pub established_weight: f64,

    pub max_snippets_per_response: usize,
    pub approved_domain_multiplier: f64,
    pub speed_factor_window_seconds: f64,

    pub min_excerpt_words: usize,
    pub max_excerpt_chars: usize,
    pub too_similar_threshold: f64,
    pub page_match_threshold: f64,
    pub max_page_windows: usize,
    pub probability_tolerance: f64,

    pub max_concurrent_responses: usize,

    pub penalties: PenaltyConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            emission_control_fraction: 0.5,
            total_weight: DEFAULT_TOTAL_WEIGHT,
            burn_uid: DEFAULT_BURN_UID,
            rank_decay: 0.5,

            immunity_request_threshold: 100,
            immunity_weight: 0.5,
            established_weight: 0.3,

            max_snippets_per_response: 5,
            approved_domain_multiplier: 3.0,
            speed_factor_window_seconds: 30.0,

            min_excerpt_words: 5,
            max_excerpt_chars: 4000,
            too_similar_threshold: 0.90,
            page_match_threshold: 0.95,
            max_page_windows: 200,
            probability_tolerance: 0.05,

            max_concurrent_responses: 16,

            penalties: PenaltyConfig::default(),
        }
    }
}

impl ScoringConfig {
    pub fn burn_uid(&self) -> MinerUid {
        MinerUid::new(self.burn_uid)
    }

    pub fn validate(&self) -> ScoreResult<()> {
        if !(0.0..=1.0).contains(&self.emission_control_fraction) {
            return Err(Error::Config(
                "emission_control_fraction must be within [0, 1]".to_string(),
            ));
        }

        if self.total_weight == 0 {
            return Err(Error::Config("total_weight must be > 0".to_string()));
        }

        if !(self.rank_decay > 0.0 && self.rank_decay < 1.0) {
            return Err(Error::Config("rank_decay must be within (0, 1)".to_string()));
        }

        for (name, weight) in [
            ("immunity_weight", self.immunity_weight),
            ("established_weight", self.established_weight),
        ] {
            if !(weight > 0.0 && weight < 1.0) {
                return Err(Error::Config(format!("{} must be within (0, 1)", name)));
            }
        }

        if self.max_snippets_per_response == 0 {
            return Err(Error::Config(
                "max_snippets_per_response must be > 0".to_string(),
            ));
        }

        if !(self.speed_factor_window_seconds > 0.0) {
            return Err(Error::Config(
                "speed_factor_window_seconds must be > 0".to_string(),
            ));
        }

        if self.approved_domain_multiplier < 1.0 {
            return Err(Error::Config(
                "approved_domain_multiplier must be >= 1".to_string(),
            ));
        }

        if self.max_concurrent_responses == 0 {
            return Err(Error::Config(
                "max_concurrent_responses must be > 0".to_string(),
            ));
        }

        self.penalties.validate()
    }
}

/// Fixed scores applied when a response or snippet is excluded. All values
/// are expected to be <= 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    pub unreachable: f64,
    pub empty: f64,
    pub malformed: f64,

    pub insecure_scheme: f64,
    pub blacklisted: f64,
    pub search_engine: f64,
    pub malformed_excerpt: f64,
    pub too_similar: f64,
    pub not_found_on_page: f64,
    pub fabricated: f64,
    pub classifier_unavailable: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            unreachable: -10.0,
            empty: -5.0,
            malformed: -10.0,

            insecure_scheme: -2.0,
            blacklisted: -5.0,
            search_engine: -5.0,
            malformed_excerpt: -5.0,
            too_similar: -5.0,
            not_found_on_page: -1.0,
            fabricated: -5.0,
            classifier_unavailable: -5.0,
        }
    }
}

impl PenaltyConfig {
    pub fn for_reason(&self, reason: crate::types::RejectionReason) -> f64 {
        use crate::types::RejectionReason::*;

        match reason {
            InsecureScheme => self.insecure_scheme,
            Blacklisted => self.blacklisted,
            SearchEngine => self.search_engine,
            MalformedExcerpt => self.malformed_excerpt,
            TooSimilar => self.too_similar,
            NotFoundOnPage => self.not_found_on_page,
            Fabricated => self.fabricated,
            ClassifierUnavailable => self.classifier_unavailable,
        }
    }

    fn validate(&self) -> ScoreResult<()> {
        let values = [
            self.unreachable,
            self.empty,
            self.malformed,
            self.insecure_scheme,
            self.blacklisted,
            self.search_engine,
            self.malformed_excerpt,
            self.too_similar,
            self.not_found_on_page,
            self.fabricated,
            self.classifier_unavailable,
        ];

        if values.iter().any(|v| !v.is_finite() || *v > 0.0) {
            return Err(Error::Config(
                "penalties must be finite and <= 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicy {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_concurrent_calls: usize,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            max_concurrent_calls: 8,
        }
    }
}

impl CallPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based), doubling from the
    /// initial backoff and capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    pub fn validate(&self) -> ScoreResult<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be > 0".to_string()));
        }
        if self.max_concurrent_calls == 0 {
            return Err(Error::Config("max_concurrent_calls must be > 0".to_string()));
        }
        Ok(())
    }
}
