use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use veriscore_core::{PendingSubmission, RoundReport, WeightTable};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::metrics::NodeMetrics;

pub type DashboardState = Arc<RwLock<DashboardData>>;

#[derive(Debug, Clone, Default)]
pub struct DashboardData {
    pub status: NodeStatus,
    pub last_report: Option<RoundReport>,
    pub pending: Option<PendingSubmission>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    pub version: String,
    pub validator_uid: Option<u16>,
    pub uptime_seconds: u64,
    pub rounds_completed: u64,
    pub round_failures: u64,
    pub last_round_id: Option<String>,
    pub last_round_at: Option<u64>,
    pub list_version: Option<String>,
    pub participants_tracked: usize,
    pub ranked_participants: usize,
    pub ledger_enabled: bool,
    pub last_submitted_round: Option<String>,
    pub last_submission_outcome: Option<String>,
}

impl DashboardData {
    pub fn apply_report(&mut self, report: &RoundReport) {
        self.status.rounds_completed += 1;
        self.status.last_round_id = Some(report.round_id.clone());
        self.status.last_round_at = Some(report.timestamp);
        self.status.list_version = Some(report.list_version.clone());
        self.status.participants_tracked = report.moving_scores.len();
        self.status.ranked_participants = report.ranking.len();
        self.last_report = Some(report.clone());
    }
}

pub struct Dashboard {
    state: DashboardState,
    addr: SocketAddr,
    metrics_endpoint: Option<String>,
}

impl Dashboard {
    pub fn new(config: &NodeConfig) -> Self {
        let state = Arc::new(RwLock::new(DashboardData {
            status: NodeStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                validator_uid: config.node.validator_uid,
                ledger_enabled: config.ledger.enabled,
                ..Default::default()
            },
            ..Default::default()
        }));

        Self {
            state,
            addr: config.dashboard_socket(),
            metrics_endpoint: config
                .metrics
                .enabled
                .then(|| config.metrics.endpoint.clone()),
        }
    }

    pub fn state(&self) -> DashboardState {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(index))
            .route("/health", get(health))
            .route("/api/status", get(api_status))
            .route("/api/report", get(api_report))
            .route("/api/weights", get(api_weights))
            .route("/api/pending", get(api_pending));

        if let Some(endpoint) = &self.metrics_endpoint {
            router = router.route(endpoint, get(metrics));
        }

        router
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn start(self) -> Result<(), NodeError> {
        let app = self.router();

        tracing::info!("Dashboard listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| NodeError::Dashboard(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, app)
            .await
            .map_err(|e| NodeError::Dashboard(format!("Server error: {}", e)))?;

        Ok(())
    }
}

async fn index(State(state): State<DashboardState>) -> Html<String> {
    let data = state.read().await;
    Html(render_html(&data))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn api_status(State(state): State<DashboardState>) -> Json<NodeStatus> {
    Json(state.read().await.status.clone())
}

async fn api_report(State(state): State<DashboardState>) -> Response {
    match state.read().await.last_report.clone() {
        Some(report) => Json(report).into_response(),
        None => (StatusCode::NOT_FOUND, "No round completed yet").into_response(),
    }
}

async fn api_weights(State(state): State<DashboardState>) -> Response {
    let weights: Option<WeightTable> = state
        .read()
        .await
        .last_report
        .as_ref()
        .map(|r| r.weights.clone());

    match weights {
        Some(weights) => Json(weights).into_response(),
        None => (StatusCode::NOT_FOUND, "No weights computed yet").into_response(),
    }
}

async fn api_pending(State(state): State<DashboardState>) -> Json<Option<PendingSubmission>> {
    Json(state.read().await.pending.clone())
}

async fn metrics() -> impl IntoResponse {
    let metrics = NodeMetrics::gather();
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], metrics)
}

fn render_html(data: &DashboardData) -> String {
    let status = &data.status;

    let ranking_rows: String = data
        .last_report
        .as_ref()
        .map(|report| {
            report
                .ranking
                .entries
                .iter()
                .take(20)
                .enumerate()
                .map(|(i, entry)| {
                    format!(
                        "<tr><td>{}</td><td>{}</td><td>{:.4}</td><td>{}</td></tr>",
                        i + 1,
                        entry.uid,
                        entry.moving_average,
                        report.weights.get(entry.uid)
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Veriscore Node</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; background: #0f172a; color: #e2e8f0; padding: 2rem; }}
        .card {{ background: #1e293b; border-radius: 12px; padding: 1.5rem; border: 1px solid #334155; margin-bottom: 1.5rem; }}
        .stat {{ display: flex; justify-content: space-between; padding: 0.4rem 0; border-bottom: 1px solid #334155; }}
        table {{ width: 100%; border-collapse: collapse; }}
        td, th {{ text-align: left; padding: 0.3rem; border-bottom: 1px solid #334155; }}
        .mono {{ font-family: monospace; font-size: 0.75rem; word-break: break-all; }}
    </style>
</head>
<body>
    <h1>Veriscore Node</h1>
    <p>v{version}</p>
    <div class="card">
        <div class="stat"><span>Uptime</span><span>{uptime}</span></div>
        <div class="stat"><span>Rounds completed</span><span>{rounds}</span></div>
        <div class="stat"><span>Last round</span><span>{last_round}</span></div>
        <div class="stat"><span>Participants tracked</span><span>{tracked}</span></div>
        <div class="stat"><span>Ranked</span><span>{ranked}</span></div>
        <div class="stat"><span>Pending weights</span><span>{pending}</span></div>
        <div class="stat"><span>List version</span><span class="mono">{list_version}</span></div>
    </div>
    <div class="card">
        <table>
            <tr><th>Rank</th><th>UID</th><th>Moving average</th><th>Weight</th></tr>
            {ranking_rows}
        </table>
    </div>
    <p><a href="/api/status">/api/status</a> &bull; <a href="/api/report">/api/report</a> &bull; <a href="/api/weights">/api/weights</a> &bull; <a href="/health">/health</a></p>
    <script>setTimeout(() => location.reload(), 10000);</script>
</body>
</html>"#,
        version = status.version,
        uptime = format_uptime(status.uptime_seconds),
        rounds = status.rounds_completed,
        last_round = status.last_round_id.as_deref().unwrap_or("none"),
        tracked = status.participants_tracked,
        ranked = status.ranked_participants,
        pending = data
            .pending
            .as_ref()
            .map(|p| p.round_id.as_str())
            .unwrap_or("none"),
        list_version = status.list_version.as_deref().unwrap_or("-"),
        ranking_rows = ranking_rows,
    )
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, mins)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else {
        format!("{}m", mins)
    }
}
