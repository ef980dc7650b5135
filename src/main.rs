use anyhow::Result;
use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use livescore_hub::config::Config;
use livescore_hub::model::{diff_fields, ReplicationRecord};
use livescore_hub::replication::{replication_key, ReplicationChannel, SqliteStore};
use livescore_hub::scoreboard::{self, AppState};
use livescore_hub::stream::{StreamSubscriber, StreamSubscriberConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    // Open the replication store shared with same-device consoles
    let store = SqliteStore::open(&config.store_path)?;
    let replication = ReplicationChannel::new(Arc::new(store));
    info!("Replication store opened: {}", config.store_path);

    // Start the stream subscriber
    let subscriber = Arc::new(StreamSubscriber::spawn(
        StreamSubscriberConfig::new(&config.api_base_url),
        config.match_ids.clone(),
    )?);
    if config.stream_disabled {
        subscriber.set_enabled(false);
        info!("Stream subscriber disabled, serving local replication only");
    } else {
        info!(
            "Following {} match(es) at {}",
            config.match_ids.len(),
            config.api_base_url
        );
    }

    // Relay authoritative stream updates into the local store, so viewers on
    // this device keep rendering even if their own network path drops.
    {
        let mut updates = subscriber.updates();
        let relay = replication.clone();
        tokio::spawn(async move {
            let mut prev: HashMap<i64, serde_json::Map<String, serde_json::Value>> =
                HashMap::new();
            loop {
                let update = match updates.recv().await {
                    Ok(u) => u,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Relay lagged, skipped {} updates", n);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                };

                if let Some(old) = prev.get(&update.match_id) {
                    let changed = diff_fields(old, &update.data);
                    if !changed.is_empty() {
                        info!(
                            "Score change match {} ({}): {:?}",
                            update.match_id, update.sport, changed
                        );
                    }
                }

                let key = replication_key(update.sport, Some(update.match_id));
                let record = ReplicationRecord::new(update.data.clone());
                if let Err(e) = relay.write(&key, &record).await {
                    // Degraded mode: the stream cache still feeds the UI.
                    warn!("Replication write failed for {:?}: {}", key, e);
                }
                prev.insert(update.match_id, update.data);
            }
        });
    }

    // Run the scoreboard server (blocks until shutdown)
    let app = scoreboard::router(AppState {
        subscriber: Arc::clone(&subscriber),
        replication,
    });
    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("Scoreboard listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
