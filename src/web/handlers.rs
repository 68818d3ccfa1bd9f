//! HTTP request handlers.

use super::AppState;
use crate::config::Target;
use crate::metrics;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
};

pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let targets = state.config.read().await.targets.clone();
    let results = state.scheduler.store().get_all_results().await;

    match metrics::render(&targets, &results) {
        Ok(body) => ([(header::CONTENT_TYPE, metrics::content_type())], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn handle_healthy() -> impl IntoResponse {
    (StatusCode::OK, "OK\n")
}

pub async fn handle_reload(State(state): State<AppState>) -> impl IntoResponse {
    match state.reload().await {
        Ok(_) => (StatusCode::OK, "Configuration reloaded successfully\n".to_string()),
        Err(e) => {
            tracing::error!(error = %e, "Failed to reload configuration");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to reload: {}\n", e),
            )
        }
    }
}

pub async fn handle_index(State(state): State<AppState>) -> impl IntoResponse {
    let targets = state.config.read().await.targets.clone();
    Html(render_index(&state.metrics_path, &targets))
}

fn render_index(metrics_path: &str, targets: &[Target]) -> String {
    let rows: String = targets
        .iter()
        .map(|t| {
            format!(
                "<li><strong>{}</strong> ({}) - Interval: {:?}, Max Hops: {}</li>\n",
                escape_html(&t.name),
                escape_html(&t.host),
                t.interval,
                t.max_hops
            )
        })
        .collect();

    format!(
        r#"<html>
<head><title>NextTrace Exporter</title></head>
<body>
<h1>NextTrace Exporter</h1>
<p><a href="{metrics}">Metrics</a></p>
<h2>Configured Targets</h2>
<ul>
{rows}</ul>
<h2>Endpoints</h2>
<ul>
<li><a href="/-/healthy">Health Check</a></li>
<li><a href="/-/reload">Reload Configuration</a> (POST)</li>
</ul>
</body>
</html>"#,
        metrics = escape_html(metrics_path),
        rows = rows
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
