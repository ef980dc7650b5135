use clap::Parser;
use url::Url;

/// Live score distribution hub: stream subscriber + scoreboard server
#[derive(Parser, Debug, Clone)]
#[command(name = "livescore-hub", version, about)]
pub struct Config {
    /// Base URL of the tournament score API (the stream endpoint host)
    #[arg(long, env = "API_BASE_URL", default_value = "http://localhost:8000/api")]
    pub api_base_url: String,

    /// Match ids to follow on the live stream (comma-separated)
    #[arg(long, env = "MATCH_IDS", value_delimiter = ',')]
    pub match_ids: Vec<i64>,

    /// Scoreboard listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Path of the SQLite replication store shared with local consoles
    #[arg(long, env = "STORE_PATH", default_value = "livescores.db")]
    pub store_path: String,

    /// Start with the stream subscriber disabled (replication-only mode)
    #[arg(long, env = "STREAM_DISABLED", default_value = "false")]
    pub stream_disabled: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.api_base_url)
            .map_err(|e| anyhow::anyhow!("API_BASE_URL is not a valid URL: {e}"))?;
        if self.match_ids.iter().any(|id| *id < 0) {
            anyhow::bail!("match ids must be non-negative");
        }
        Ok(())
    }
}
