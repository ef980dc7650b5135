//! Push-based live-score stream subscriber.
//!
//! One long-lived SSE connection multiplexes updates for a set of match ids.
//! A background task owns the connection and keeps the latest update per
//! match in a shared snapshot map; readers never touch the network.
//!
//! ```text
//!  Score server ──push──▶ subscriber task
//!                            │  SSE frames → MatchScoreUpdate
//!                            │  stores in shared snapshot map
//!                            ▼
//!            latest() / snapshot()  +  updates() broadcast
//! ```
//!
//! Transport failures never surface as faults: the task reconnects forever
//! with bounded exponential backoff and exposes a `ConnectionState` the UI
//! can render as a "reconnecting" indicator.

pub mod backoff;
pub mod sse;


pub use backoff::{Backoff, ConnectionState};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::model::MatchScoreUpdate;
use sse::{SseParser, StreamEvent};

/// Configuration for a stream subscriber. Retry timing constants are
/// compiled-in defaults; only the base URL comes from the environment.
#[derive(Debug, Clone)]
pub struct StreamSubscriberConfig {
    /// Base URL of the score API, e.g. `http://localhost:8000/api`.
    pub base_url: String,
    pub initial_retry_delay: Duration,
    pub backoff_factor: f64,
    pub max_retry_delay: Duration,
}

impl StreamSubscriberConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        StreamSubscriberConfig {
            base_url: base_url.into(),
            initial_retry_delay: backoff::INITIAL_RETRY_DELAY,
            backoff_factor: backoff::BACKOFF_FACTOR,
            max_retry_delay: backoff::MAX_RETRY_DELAY,
        }
    }
}

enum Command {
    SetMatchIds(Vec<i64>),
    SetEnabled(bool),
    Reconnect,
    Shutdown,
}

enum Effect {
    None,
    /// Tear down the current connection (and pending retry) and re-evaluate.
    Rebuild,
    Shutdown,
}

type Cache = Arc<RwLock<HashMap<i64, MatchScoreUpdate>>>;

/// Handle to a running subscriber. Dropping it shuts the background task
/// down, closing the connection and cancelling any pending retry.
pub struct StreamSubscriber {
    cache: Cache,
    state: Arc<RwLock<ConnectionState>>,
    updates_tx: broadcast::Sender<MatchScoreUpdate>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl StreamSubscriber {
    /// Spawn the background connection task, enabled and subscribed to
    /// `match_ids`. An empty set leaves the subscriber idle until ids arrive.
    pub fn spawn(config: StreamSubscriberConfig, match_ids: Vec<i64>) -> Result<Self> {
        // The stream is long-lived, so only the connect phase gets a timeout.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        let cache: Cache = Arc::new(RwLock::new(HashMap::new()));
        let state = Arc::new(RwLock::new(ConnectionState::default()));
        let (updates_tx, _) = broadcast::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(subscriber_loop(
            config,
            client,
            match_ids,
            Arc::clone(&cache),
            Arc::clone(&state),
            updates_tx.clone(),
            cmd_rx,
        ));

        Ok(StreamSubscriber {
            cache,
            state,
            updates_tx,
            cmd_tx,
        })
    }

    /// Latest known update for one match, if any has been received.
    pub async fn latest(&self, match_id: i64) -> Option<MatchScoreUpdate> {
        self.cache.read().await.get(&match_id).cloned()
    }

    /// Snapshot of the latest update for every cached match.
    pub async fn snapshot(&self) -> Vec<MatchScoreUpdate> {
        self.cache.read().await.values().cloned().collect()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    /// Live feed of updates as they arrive. Each receiver is independently
    /// cancellable by dropping it; lagging receivers skip to the newest data.
    pub fn updates(&self) -> broadcast::Receiver<MatchScoreUpdate> {
        self.updates_tx.subscribe()
    }

    /// Replace the subscription set. A changed set tears the connection down
    /// and opens a new one scoped to the new ids; an identical set is a no-op.
    pub fn set_match_ids(&self, match_ids: Vec<i64>) {
        let _ = self.cmd_tx.send(Command::SetMatchIds(match_ids));
    }

    /// Enable or disable the subscriber. Disabling closes the connection and
    /// cancels any pending retry; re-enabling connects with a fresh backoff.
    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.cmd_tx.send(Command::SetEnabled(enabled));
    }

    /// Force a reconnect now: close the current connection, reset the retry
    /// delay, connect immediately.
    pub fn reconnect(&self) {
        let _ = self.cmd_tx.send(Command::Reconnect);
    }
}

impl Drop for StreamSubscriber {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

fn apply_command(
    cmd: Command,
    match_ids: &mut Vec<i64>,
    enabled: &mut bool,
    backoff: &mut Backoff,
) -> Effect {
    match cmd {
        Command::SetMatchIds(ids) => {
            if ids == *match_ids {
                Effect::None
            } else {
                *match_ids = ids;
                Effect::Rebuild
            }
        }
        Command::SetEnabled(e) => {
            if e == *enabled {
                Effect::None
            } else {
                *enabled = e;
                if e {
                    backoff.reset();
                }
                Effect::Rebuild
            }
        }
        Command::Reconnect => {
            backoff.reset();
            Effect::Rebuild
        }
        Command::Shutdown => Effect::Shutdown,
    }
}

fn stream_url(base: &str, match_ids: &[i64]) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!(
        "{}/live-scores/stream",
        base.trim_end_matches('/')
    ))?;
    let joined = match_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    url.query_pairs_mut().append_pair("match_ids", &joined);
    Ok(url)
}

/// Apply one decoded event body to the cache and fan it out to observers.
/// Malformed payloads are dropped locally; the connection is unaffected.
async fn apply_body(body: &str, cache: &Cache, updates_tx: &broadcast::Sender<MatchScoreUpdate>) {
    match sse::decode_event(body) {
        Ok(StreamEvent::KeepAlive) => {}
        Ok(StreamEvent::Update(update)) => {
            cache
                .write()
                .await
                .insert(update.match_id, update.clone());
            // No receivers is fine; the cache is the fallback read path.
            let _ = updates_tx.send(update);
        }
        Err(e) => warn!("Dropping malformed stream event: {}", e),
    }
}

/// Supervisor: owns the subscription set, the enabled flag, and the backoff,
/// and drives connect / read / retry sessions until shutdown.
async fn subscriber_loop(
    config: StreamSubscriberConfig,
    client: Client,
    mut match_ids: Vec<i64>,
    cache: Cache,
    state: Arc<RwLock<ConnectionState>>,
    updates_tx: broadcast::Sender<MatchScoreUpdate>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut enabled = true;
    let mut backoff = Backoff::new(
        config.initial_retry_delay,
        config.backoff_factor,
        config.max_retry_delay,
    );

    'supervisor: loop {
        if !enabled || match_ids.is_empty() {
            state.write().await.idle();
            let Some(cmd) = cmd_rx.recv().await else { return };
            match apply_command(cmd, &mut match_ids, &mut enabled, &mut backoff) {
                Effect::Shutdown => return,
                _ => continue 'supervisor,
            }
        }

        let url = match stream_url(&config.base_url, &match_ids) {
            Ok(url) => url,
            Err(e) => {
                // Same path as a transport failure: commands (disable,
                // shutdown) must still be serviced while waiting out the
                // delay.
                warn!("Invalid stream base URL {:?}: {}", config.base_url, e);
                let reason = format!("invalid stream URL: {e}");
                if !retry_after_failure(reason, &state, &mut backoff, &mut cmd_rx,
                    &mut match_ids, &mut enabled).await { return; }
                continue 'supervisor;
            }
        };

        state.write().await.connecting();
        debug!("Connecting to score stream: {}", url);

        // Connect phase. Commands may tear the attempt down mid-flight.
        let connect = client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send();
        tokio::pin!(connect);

        let response = loop {
            tokio::select! {
                maybe_cmd = cmd_rx.recv() => {
                    let Some(cmd) = maybe_cmd else { return };
                    match apply_command(cmd, &mut match_ids, &mut enabled, &mut backoff) {
                        Effect::Shutdown => { state.write().await.idle(); return; }
                        Effect::Rebuild => continue 'supervisor,
                        Effect::None => {}
                    }
                }
                res = &mut connect => {
                    match res {
                        Ok(resp) if resp.status().is_success() => break resp,
                        Ok(resp) => {
                            let reason = format!("stream endpoint returned {}", resp.status());
                            if !retry_after_failure(reason, &state, &mut backoff, &mut cmd_rx,
                                &mut match_ids, &mut enabled).await { return; }
                            continue 'supervisor;
                        }
                        Err(e) => {
                            if !retry_after_failure(e.to_string(), &state, &mut backoff, &mut cmd_rx,
                                &mut match_ids, &mut enabled).await { return; }
                            continue 'supervisor;
                        }
                    }
                }
            }
        };

        info!("Score stream connected ({} match ids)", match_ids.len());
        state.write().await.connected();
        backoff.reset();

        // Read phase: feed chunks through the SSE splitter until the
        // transport fails or a command rebuilds the connection.
        let mut body_stream = response.bytes_stream();
        let mut parser = SseParser::new();

        let reason = loop {
            tokio::select! {
                maybe_cmd = cmd_rx.recv() => {
                    let Some(cmd) = maybe_cmd else { return };
                    match apply_command(cmd, &mut match_ids, &mut enabled, &mut backoff) {
                        Effect::Shutdown => { state.write().await.idle(); return; }
                        Effect::Rebuild => continue 'supervisor,
                        Effect::None => {}
                    }
                }
                chunk = body_stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            for event_body in parser.push(&bytes) {
                                apply_body(&event_body, &cache, &updates_tx).await;
                            }
                        }
                        Some(Err(e)) => break e.to_string(),
                        None => break "stream closed by server".to_string(),
                    }
                }
            }
        };

        if !retry_after_failure(reason, &state, &mut backoff, &mut cmd_rx, &mut match_ids, &mut enabled)
            .await
        {
            return;
        }
    }
}

/// Record a transport failure and wait out the backoff delay, still servicing
/// commands (disable must cancel the pending retry). Returns false on
/// shutdown.
async fn retry_after_failure(
    reason: String,
    state: &Arc<RwLock<ConnectionState>>,
    backoff: &mut Backoff,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    match_ids: &mut Vec<i64>,
    enabled: &mut bool,
) -> bool {
    let delay = backoff.next_delay();
    {
        let mut st = state.write().await;
        st.disconnected(reason.clone());
        warn!(
            "Score stream disconnected ({}), retry #{} in {:?}",
            reason, st.retry_count, delay
        );
    }

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            maybe_cmd = cmd_rx.recv() => {
                let Some(cmd) = maybe_cmd else { return false };
                match apply_command(cmd, match_ids, enabled, backoff) {
                    Effect::Shutdown => { state.write().await.idle(); return false; }
                    // Rebuild abandons the scheduled retry; the supervisor
                    // re-evaluates immediately.
                    Effect::Rebuild => return true,
                    Effect::None => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_stream_url_joins_ids() {
        let url = stream_url("http://localhost:8000/api/", &[1, 2, 3]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/live-scores/stream?match_ids=1%2C2%2C3"
        );
        assert_eq!(url.query(), Some("match_ids=1%2C2%2C3"));
    }

    #[test]
    fn test_same_match_ids_is_a_no_op() {
        let mut ids = vec![1, 2];
        let mut enabled = true;
        let mut b = Backoff::default();
        assert!(matches!(
            apply_command(Command::SetMatchIds(vec![1, 2]), &mut ids, &mut enabled, &mut b),
            Effect::None
        ));
        assert!(matches!(
            apply_command(Command::SetMatchIds(vec![2, 3]), &mut ids, &mut enabled, &mut b),
            Effect::Rebuild
        ));
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_disable_and_reconnect_rebuild() {
        let mut ids = vec![1];
        let mut enabled = true;
        let mut b = Backoff::default();
        assert!(matches!(
            apply_command(Command::SetEnabled(false), &mut ids, &mut enabled, &mut b),
            Effect::Rebuild
        ));
        assert!(!enabled);
        assert!(matches!(
            apply_command(Command::SetEnabled(false), &mut ids, &mut enabled, &mut b),
            Effect::None
        ));
        assert!(matches!(
            apply_command(Command::Reconnect, &mut ids, &mut enabled, &mut b),
            Effect::Rebuild
        ));
    }

    #[tokio::test]
    async fn test_apply_body_last_write_wins_per_match() {
        let cache: Cache = Arc::new(RwLock::new(HashMap::new()));
        let (tx, mut rx) = broadcast::channel(16);

        let ev = |id: i64, score: i64| {
            serde_json::to_string(&MatchScoreUpdate {
                match_id: id,
                sport: crate::model::Sport::Football,
                timestamp: Utc::now(),
                data: [("score1".to_string(), json!(score))].into_iter().collect(),
            })
            .unwrap()
        };

        for (id, score) in [(1, 0), (2, 0), (1, 1), (3, 2), (2, 5), (1, 3)] {
            apply_body(&ev(id, score), &cache, &tx).await;
        }

        let cache = cache.read().await;
        assert_eq!(cache.len(), 3);
        assert_eq!(cache[&1].data["score1"], 3);
        assert_eq!(cache[&2].data["score1"], 5);
        assert_eq!(cache[&3].data["score1"], 2);
        // All six valid events were fanned out in order.
        let mut seen = 0;
        while rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 6);
    }

    #[tokio::test]
    async fn test_apply_body_keep_alives_and_garbage_change_nothing() {
        let cache: Cache = Arc::new(RwLock::new(HashMap::new()));
        let (tx, mut rx) = broadcast::channel(16);

        for body in ["", "   ", ": heartbeat", r#"{"heartbeat":true}"#, "{broken"] {
            apply_body(body, &cache, &tx).await;
        }

        assert!(cache.read().await.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
