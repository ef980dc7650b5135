use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sports supported by the tournament. The tag decides which payload fields
/// are meaningful; unknown tags from newer servers decode as `Unknown` rather
/// than failing the whole event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sport {
    Football,
    Basketball,
    Volleyball,
    Handball,
    TableTennis,
    Badminton,
    Darts,
    Chess,
    #[serde(other)]
    Unknown,
}

impl Sport {
    /// CamelCase component used in replication keys ("liveFootballMatch_7").
    pub fn key_component(&self) -> &'static str {
        match self {
            Sport::Football => "Football",
            Sport::Basketball => "Basketball",
            Sport::Volleyball => "Volleyball",
            Sport::Handball => "Handball",
            Sport::TableTennis => "TableTennis",
            Sport::Badminton => "Badminton",
            Sport::Darts => "Darts",
            Sport::Chess => "Chess",
            Sport::Unknown => "Unknown",
        }
    }

    /// Replication poll fallback interval. Fast-scoring sports re-read the
    /// store much more often so a missed change notification is invisible to
    /// spectators; turn-based sports can afford a slow sweep.
    pub fn poll_interval(&self) -> Duration {
        match self {
            Sport::Basketball => Duration::from_millis(80),
            Sport::Handball | Sport::TableTennis | Sport::Badminton => {
                Duration::from_millis(500)
            }
            _ => Duration::from_millis(2000),
        }
    }
}

impl std::str::FromStr for Sport {
    type Err = serde_json::Error;

    /// Accepts the wire tag ("table_tennis"); anything unrecognized decodes
    /// as `Unknown`, mirroring the wire behavior.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
    }
}

impl std::fmt::Display for Sport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key_component())
    }
}

/// A point-in-time snapshot of one match's live state as delivered by the
/// stream. `data` is an open, sport-dependent mapping (scores, sets, cards,
/// clock, current thrower, ...); absent fields mean "renderer default",
/// never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScoreUpdate {
    pub match_id: i64,
    pub sport: Sport,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// The replication channel's persisted value for one match — the same payload
/// shape as `MatchScoreUpdate::data`, stored under a namespaced key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicationRecord {
    pub fields: Map<String, Value>,
}

impl ReplicationRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        ReplicationRecord { fields }
    }
}

/// Field-by-field structural diff between two payloads. Returns the names of
/// fields whose value changed (including fields added or removed), which
/// drives the transient "changed" highlight on individual scoreboard cells.
pub fn diff_fields(prev: &Map<String, Value>, curr: &Map<String, Value>) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();
    for key in prev.keys().chain(curr.keys()) {
        if prev.get(key) != curr.get(key) {
            changed.insert(key.clone());
        }
    }
    changed
}
