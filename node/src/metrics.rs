use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};
use std::time::Instant;
use veriscore_core::{RoundReport, SubmissionOutcome};

lazy_static! {
    pub static ref NODE_UPTIME_SECONDS: Gauge =
        register_gauge!("veriscore_node_uptime_seconds", "Node uptime in seconds").unwrap();
    pub static ref ROUNDS_TOTAL: IntCounter =
        register_int_counter!("veriscore_rounds_total", "Total scoring rounds completed").unwrap();
    pub static ref ROUND_FAILURES: IntCounter = register_int_counter!(
        "veriscore_round_failures_total",
        "Rounds that could not be processed"
    )
    .unwrap();
    pub static ref RESPONSES_SCORED: IntCounter = register_int_counter!(
        "veriscore_responses_scored_total",
        "Participant responses scored"
    )
    .unwrap();
    pub static ref RESPONSES_IGNORED: IntCounter = register_int_counter!(
        "veriscore_responses_ignored_total",
        "Responses dropped as unregistered, ineligible or duplicate"
    )
    .unwrap();
    pub static ref SNIPPET_VERDICTS: IntCounterVec = register_int_counter_vec!(
        "veriscore_snippet_verdicts_total",
        "Snippet verdicts by outcome (passed or rejection reason)",
        &["verdict"]
    )
    .unwrap();
    pub static ref COLLABORATOR_FAILURES: IntCounterVec = register_int_counter_vec!(
        "veriscore_collaborator_failures_total",
        "Failed calls to external collaborators",
        &["collaborator"]
    )
    .unwrap();
    pub static ref SUBMISSIONS: IntCounterVec = register_int_counter_vec!(
        "veriscore_weight_submissions_total",
        "Weight submission attempts by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref RANKED_PARTICIPANTS: IntGauge = register_int_gauge!(
        "veriscore_ranked_participants",
        "Participants ranked in the last round"
    )
    .unwrap();
    pub static ref BURN_WEIGHT: IntGauge = register_int_gauge!(
        "veriscore_burn_weight",
        "Weight assigned to the burn identifier in the last round"
    )
    .unwrap();
    pub static ref ROUND_DURATION: Histogram = register_histogram!(
        "veriscore_round_duration_seconds",
        "Wall-clock duration of a scoring round",
        vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();
}

pub struct NodeMetrics {
    start_time: Instant,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn update_uptime(&self) {
        NODE_UPTIME_SECONDS.set(self.start_time.elapsed().as_secs_f64());
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn record_round(&self, report: &RoundReport) {
        ROUNDS_TOTAL.inc();
        RESPONSES_SCORED.inc_by(report.scores.len() as u64);
        RESPONSES_IGNORED.inc_by(report.ignored_responses as u64);

        SNIPPET_VERDICTS
            .with_label_values(&["passed"])
            .inc_by(report.passed_snippets() as u64);
        for (reason, count) in report.rejection_counts() {
            SNIPPET_VERDICTS
                .with_label_values(&[reason.as_str()])
                .inc_by(count as u64);
        }

        RANKED_PARTICIPANTS.set(report.ranking.len() as i64);
        BURN_WEIGHT.set(report.weights.get(report.burn_uid) as i64);
        ROUND_DURATION.observe(report.duration_ms as f64 / 1000.0);
    }

    pub fn record_round_failure(&self) {
        ROUND_FAILURES.inc();
    }

    pub fn record_submission(&self, outcome: &SubmissionOutcome) {
        SUBMISSIONS.with_label_values(&[outcome.label()]).inc();
    }

    pub fn record_collaborator_failure(collaborator: &str) {
        COLLABORATOR_FAILURES
            .with_label_values(&[collaborator])
            .inc();
    }

    pub fn gather() -> Vec<u8> {
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
