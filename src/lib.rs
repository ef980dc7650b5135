//! Live score distribution for a multi-sport tournament.
//!
//! Two cooperating mechanisms feed the same "latest match state" shape:
//!
//! - [`stream`]: one long-lived server-push connection multiplexing score
//!   updates for a set of match ids, with a per-match cache and bounded
//!   exponential-backoff reconnection.
//! - [`replication`]: a same-device channel between an operator console and
//!   spectator views, backed by a shared key-value store with change
//!   notifications plus a polling safety net.
//!
//! [`scoreboard`] is a small read-only HTTP surface over both, and
//! [`model`] holds the shared data shapes and change-detection helpers.

pub mod config;
pub mod model;
pub mod replication;
pub mod scoreboard;
pub mod stream;
