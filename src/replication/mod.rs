//! Same-device replication channel between operator consoles and viewers.
//!
//! A console writes the full match payload to a namespaced key on every local
//! edit; any viewer sharing the store sees it without a network round trip.
//! Delivery is belt-and-braces: best-effort change notifications from the
//! store, plus a fixed-interval poll that re-reads the key and compares
//! structural equality, catching every notification the bus missed.

pub mod store;

pub use store::{MemoryStore, ReplicationStore, SqliteStore, StoreError};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::model::{diff_fields, ReplicationRecord, Sport};

/// Derive the store key for one match: `live<Sport>Match_<matchId>`.
///
/// `match_id: None` selects the legacy single-slot key `live<Sport>Match`
/// ("the current match of this sport"). It is kept for compatibility with
/// consoles that predate per-match keys; new callers should always pass an
/// id. Console and viewer must agree on the key — a mismatch silently means
/// no updates, by contract.
pub fn replication_key(sport: Sport, match_id: Option<i64>) -> String {
    match match_id {
        Some(id) => format!("live{}Match_{}", sport.key_component(), id),
        None => format!("live{}Match", sport.key_component()),
    }
}

/// One delivery from a watched key: the latest record plus which fields
/// changed since the previous delivery, for transient highlight animations.
/// The first delivery reports every present field as changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationUpdate {
    pub record: ReplicationRecord,
    pub changed: BTreeSet<String>,
}

/// Replication channel over an injected store backend.
#[derive(Clone)]
pub struct ReplicationChannel {
    store: Arc<dyn ReplicationStore>,
}

impl ReplicationChannel {
    pub fn new(store: Arc<dyn ReplicationStore>) -> Self {
        ReplicationChannel { store }
    }

    /// Console side: publish the latest full payload for a key. The store's
    /// own notification does not loop back usefully to the writer; a console
    /// that renders its own edits reads back what it just wrote.
    pub async fn write(&self, key: &str, record: &ReplicationRecord) -> Result<(), StoreError> {
        self.store.write(key, record).await
    }

    pub async fn read(&self, key: &str) -> Result<Option<ReplicationRecord>, StoreError> {
        self.store.read(key).await
    }

    /// Viewer side: watch one key, merging change notifications with a poll
    /// every `poll_interval` (see `Sport::poll_interval` for the per-sport
    /// defaults). Deliveries are deduplicated by structural equality, so a
    /// notification followed by the poll observing the same value emits once.
    /// The watcher stops when the returned receiver is dropped.
    pub fn watch(&self, key: &str, poll_interval: Duration) -> mpsc::Receiver<ReplicationUpdate> {
        let (tx, rx) = mpsc::channel(64);
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        tokio::spawn(watch_loop(store, key, poll_interval, tx));
        rx
    }

    /// Convenience: watch a match under the standard key scheme with the
    /// sport's default poll interval.
    pub fn watch_match(
        &self,
        sport: Sport,
        match_id: Option<i64>,
    ) -> mpsc::Receiver<ReplicationUpdate> {
        self.watch(&replication_key(sport, match_id), sport.poll_interval())
    }
}

async fn watch_loop(
    store: Arc<dyn ReplicationStore>,
    key: String,
    poll_interval: Duration,
    tx: mpsc::Sender<ReplicationUpdate>,
) {
    let mut notifications = store.subscribe();
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last: Option<ReplicationRecord> = None;

    loop {
        // Store failures degrade to "no update from this source" and the
        // next tick tries again; the watcher never dies from them.
        match store.read(&key).await {
            Ok(Some(record)) => {
                let changed = match &last {
                    Some(prev) => diff_fields(&prev.fields, &record.fields),
                    None => record.fields.keys().cloned().collect(),
                };
                if last.as_ref() != Some(&record) {
                    last = Some(record.clone());
                    if tx.send(ReplicationUpdate { record, changed }).await.is_err() {
                        return;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Replication read failed for {:?}: {}", key, e),
        }

        // Sleep until either a notification for our key or the next poll.
        loop {
            tokio::select! {
                _ = poll.tick() => break,
                note = notifications.recv() => match note {
                    Ok(changed_key) if changed_key == key => break,
                    Ok(_) => {}
                    // Lagged or closed bus: the poll net still covers us.
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => {
                        tokio::select! {
                            _ = tokio::time::sleep(poll_interval) => {}
                            _ = tx.closed() => return,
                        }
                        break;
                    }
                },
                _ = tx.closed() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, i64)]) -> ReplicationRecord {
        ReplicationRecord::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), json!(v)))
                .collect(),
        )
    }

    #[test]
    fn test_replication_key_scheme() {
        assert_eq!(
            replication_key(Sport::Football, Some(42)),
            "liveFootballMatch_42"
        );
        assert_eq!(
            replication_key(Sport::TableTennis, Some(7)),
            "liveTableTennisMatch_7"
        );
        // Legacy single-slot fallback.
        assert_eq!(replication_key(Sport::Football, None), "liveFootballMatch");
    }

    #[tokio::test]
    async fn test_watch_delivers_initial_value_and_changes() {
        let store = Arc::new(MemoryStore::new());
        let channel = ReplicationChannel::new(store);
        let key = replication_key(Sport::Football, Some(7));

        channel
            .write(&key, &record(&[("score1", 1), ("score2", 0)]))
            .await
            .unwrap();

        let mut rx = channel.watch(&key, Duration::from_millis(20));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.record.fields["score1"], 1);
        // Initial delivery flags every present field.
        assert!(first.changed.contains("score1") && first.changed.contains("score2"));

        channel
            .write(&key, &record(&[("score1", 2), ("score2", 0)]))
            .await
            .unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.record.fields["score1"], 2);
        assert_eq!(second.changed.iter().collect::<Vec<_>>(), vec!["score1"]);
    }

    /// Delegates to an inner store but never delivers change notifications,
    /// modelling the environments where the native storage event is lost.
    struct SilentStore {
        inner: MemoryStore,
        dead_bus: tokio::sync::broadcast::Sender<String>,
    }

    impl SilentStore {
        fn new(inner: MemoryStore) -> Self {
            let (dead_bus, _) = tokio::sync::broadcast::channel(1);
            SilentStore { inner, dead_bus }
        }
    }

    #[async_trait::async_trait]
    impl ReplicationStore for SilentStore {
        async fn write(&self, key: &str, value: &ReplicationRecord) -> Result<(), StoreError> {
            self.inner.write(key, value).await
        }

        async fn read(&self, key: &str) -> Result<Option<ReplicationRecord>, StoreError> {
            self.inner.read(key).await
        }

        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<String> {
            self.dead_bus.subscribe()
        }
    }

    #[tokio::test]
    async fn test_poll_fallback_covers_missed_notifications() {
        // Context A (console) writes to the shared map; context B (viewer)
        // watches through a channel whose notifications never arrive.
        let shared = MemoryStore::new();
        let console = ReplicationChannel::new(Arc::new(shared.clone()));
        let viewer = ReplicationChannel::new(Arc::new(SilentStore::new(shared)));
        let key = replication_key(Sport::Football, Some(42));

        let poll = Duration::from_millis(50);
        let mut rx = viewer.watch(&key, poll);

        console.write(&key, &record(&[("score1", 3)])).await.unwrap();

        let got = tokio::time::timeout(poll * 3, rx.recv())
            .await
            .expect("value must arrive within one poll interval")
            .unwrap();
        assert_eq!(got.record.fields["score1"], 3);
    }

    #[tokio::test]
    async fn test_operator_edit_reaches_spectator_with_score1_flag_only() {
        // Console and viewer share only the SQLite file: two separate store
        // handles, so no in-process notification path exists between them.
        let path = std::env::temp_dir().join(format!(
            "livescore-repl-test-{}.db",
            std::process::id()
        ));
        let path = path.to_str().unwrap().to_string();
        let _ = std::fs::remove_file(&path);

        let console = ReplicationChannel::new(Arc::new(SqliteStore::open(&path).unwrap()));
        let viewer = ReplicationChannel::new(Arc::new(SqliteStore::open(&path).unwrap()));
        let key = replication_key(Sport::Football, Some(7));

        console
            .write(&key, &record(&[("score1", 1), ("score2", 0)]))
            .await
            .unwrap();

        let poll = Duration::from_millis(100);
        let mut rx = viewer.watch(&key, poll);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.record.fields["score1"], 1);

        // Operator increments Team A's score; only score1 may be flagged.
        console
            .write(&key, &record(&[("score1", 2), ("score2", 0)]))
            .await
            .unwrap();

        let second = tokio::time::timeout(poll * 3, rx.recv())
            .await
            .expect("spectator must see the edit within one poll interval")
            .unwrap();
        assert_eq!(second.record.fields["score1"], 2);
        assert_eq!(second.record.fields["score2"], 0);
        assert_eq!(second.changed.iter().collect::<Vec<_>>(), vec!["score1"]);

        drop(rx);
        let _ = std::fs::remove_file(&path);
    }

    /// Counts reads and hands out receivers whose sender is already gone, so
    /// every `recv` reports a closed bus.
    struct ClosedBusStore {
        inner: MemoryStore,
        reads: std::sync::atomic::AtomicUsize,
    }

    impl ClosedBusStore {
        fn new() -> Self {
            ClosedBusStore {
                inner: MemoryStore::new(),
                reads: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ReplicationStore for ClosedBusStore {
        async fn write(&self, key: &str, value: &ReplicationRecord) -> Result<(), StoreError> {
            self.inner.write(key, value).await
        }

        async fn read(&self, key: &str) -> Result<Option<ReplicationRecord>, StoreError> {
            self.reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.read(key).await
        }

        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<String> {
            let (bus, rx) = tokio::sync::broadcast::channel(1);
            drop(bus);
            rx
        }
    }

    #[tokio::test]
    async fn test_dropped_watcher_stops_reading_despite_closed_bus() {
        let store = Arc::new(ClosedBusStore::new());
        let channel = ReplicationChannel::new(Arc::clone(&store) as Arc<dyn ReplicationStore>);

        let poll = Duration::from_millis(100);
        let rx = channel.watch("liveChessMatch_1", poll);
        drop(rx);

        // With the bus closed the watcher falls back to interval pacing; a
        // dropped receiver must end it before the next read, not one poll
        // interval later.
        tokio::time::sleep(poll * 4).await;
        let reads = store.reads.load(std::sync::atomic::Ordering::SeqCst);
        assert!(reads <= 2, "watcher kept reading after receiver drop: {reads} reads");
    }

    #[tokio::test]
    async fn test_watch_dedups_unchanged_rewrites() {
        let store = Arc::new(MemoryStore::new());
        let channel = ReplicationChannel::new(store);
        let key = replication_key(Sport::Handball, Some(3));

        channel.write(&key, &record(&[("score1", 4)])).await.unwrap();
        let mut rx = channel.watch(&key, Duration::from_millis(10));
        assert_eq!(rx.recv().await.unwrap().record.fields["score1"], 4);

        // Same value rewritten: notification fires, poll fires, no delivery.
        channel.write(&key, &record(&[("score1", 4)])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
    }
}
