//! Read-only spectator HTTP surface over the subscriber cache and the
//! replication store.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::model::Sport;
use crate::replication::{replication_key, ReplicationChannel};
use crate::stream::StreamSubscriber;

#[derive(Clone)]
pub struct AppState {
    pub subscriber: Arc<StreamSubscriber>,
    pub replication: ReplicationChannel,
}

/// Build the Axum router for the scoreboard.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/matches", get(matches_handler))
        .route("/api/matches/:id", get(match_handler))
        .route("/api/connection", get(connection_handler))
        .route("/api/replication/:sport/:id", get(replication_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Serve the embedded scoreboard page.
async fn index_handler() -> impl IntoResponse {
    Html(SCOREBOARD_HTML)
}

/// GET /api/matches — latest cached update for every followed match.
async fn matches_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut matches = state.subscriber.snapshot().await;
    matches.sort_by_key(|m| m.match_id);
    Json(matches)
}

/// GET /api/matches/{id}
async fn match_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .subscriber
        .latest(id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /api/connection — the subscriber's health, for the status dot.
async fn connection_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.subscriber.connection_state().await)
}

/// GET /api/replication/{sport}/{id} — the same-device view of a match, as
/// last written by a local operator console.
async fn replication_handler(
    State(state): State<Arc<AppState>>,
    Path((sport, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let sport =
        parse_sport_tag(&sport).map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    let key = replication_key(sport, Some(id));
    match state.replication.read(&key).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("no record at {key}"))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// Resolve a URL path segment to a sport. The wire decoder maps unrecognized
/// tags to `Unknown` so a live stream never stalls on new sports, but here
/// the tag was typed by a caller: a tag we cannot name is their mistake.
fn parse_sport_tag(tag: &str) -> Result<Sport, String> {
    match tag.parse() {
        Ok(Sport::Unknown) | Err(_) => Err(format!("unknown sport tag: {tag:?}")),
        Ok(sport) => Ok(sport),
    }
}


/// Embedded single-file scoreboard (HTML + CSS + JS)
const SCOREBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Live Scoreboard</title>
<style>
  :root { --bg: #0f1117; --card: #1a1d27; --border: #2a2d3a; --green: #00c896; --red: #ff4f6a; --text: #e0e0e0; --muted: #8888aa; }
  * { box-sizing: border-box; margin: 0; padding: 0; }
  body { background: var(--bg); color: var(--text); font-family: 'Segoe UI', system-ui, sans-serif; }
  header { display: flex; align-items: center; gap: 1rem; padding: 1rem 2rem; border-bottom: 1px solid var(--border); }
  header h1 { font-size: 1.4rem; font-weight: 700; }
  .status-dot { width: 10px; height: 10px; border-radius: 50%; background: var(--red); display: inline-block; }
  .status-dot.ok { background: var(--green); animation: pulse 1.5s infinite; }
  @keyframes pulse { 0%,100% { opacity: 1; } 50% { opacity: .3; } }
  main { padding: 1.5rem 2rem; display: grid; grid-template-columns: repeat(auto-fill, minmax(260px, 1fr)); gap: 1rem; }
  .match { background: var(--card); border: 1px solid var(--border); border-radius: 10px; padding: 1.2rem; }
  .match .sport { color: var(--muted); font-size: .75rem; text-transform: uppercase; letter-spacing: .06em; }
  .match .score { font-size: 1.8rem; font-weight: 700; margin-top: .4rem; }
  .match .teams { color: var(--muted); font-size: .85rem; margin-top: .2rem; }
  .changed { color: var(--green); transition: color .2s; }
  .empty { color: var(--muted); padding: 2rem; }
</style>
</head>
<body>
<header>
  <h1>Live Scoreboard</h1>
  <span id="dot" class="status-dot"></span>
  <span id="conn" class="teams">connecting…</span>
</header>
<main id="board"><div class="empty">Waiting for score updates…</div></main>
<script>
const prev = {};
function cell(m, field) {
  const v = m.data[field] ?? 0;
  const was = (prev[m.match_id] || {})[field];
  const cls = was !== undefined && was !== v ? 'changed' : '';
  return `<span class="${cls}">${v}</span>`;
}
async function refresh() {
  try {
    const [matches, conn] = await Promise.all([
      fetch('/api/matches').then(r => r.json()),
      fetch('/api/connection').then(r => r.json()),
    ]);
    document.getElementById('dot').className = 'status-dot' + (conn.is_connected ? ' ok' : '');
    document.getElementById('conn').textContent = conn.is_connected ? 'live'
      : conn.is_connecting ? 'connecting…' : `reconnecting (retry #${conn.retry_count})`;
    if (matches.length) {
      document.getElementById('board').innerHTML = matches.map(m => `
        <div class="match">
          <div class="sport">${m.sport} · match ${m.match_id}</div>
          <div class="score">${cell(m, 'score1')} : ${cell(m, 'score2')}</div>
          <div class="teams">${m.data.team1 ?? 'Team 1'} vs ${m.data.team2 ?? 'Team 2'}</div>
        </div>`).join('');
      matches.forEach(m => prev[m.match_id] = m.data);
    }
  } catch (e) { /* keep last good render */ }
}
setInterval(refresh, 1000);
refresh();
</script>
</body>
</html>
"#;
