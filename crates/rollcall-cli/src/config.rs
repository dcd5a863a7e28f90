use std::path::PathBuf;

use rollcall_core::MatchingConfig;

/// CLI configuration, loaded from environment variables.
pub struct CliConfig {
    /// Path to the gallery JSON file (the storage collaborator).
    pub gallery_path: PathBuf,
    /// Optional engine configuration JSON; defaults apply when unset.
    pub engine_config_path: Option<PathBuf>,
    /// Per-face top-N diagnostic trace depth (0 disables).
    pub trace_top_n: usize,
    /// Queue depth for the batch session channel.
    pub session_queue: usize,
}

impl CliConfig {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            gallery_path: std::env::var("ROLLCALL_GALLERY")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("gallery.json")),
            engine_config_path: std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from),
            trace_top_n: env_usize("ROLLCALL_TRACE_TOP_N", 0),
            session_queue: env_usize("ROLLCALL_SESSION_QUEUE", 8),
        }
    }

    /// Engine configuration: the JSON file when configured, otherwise
    /// the built-in defaults, with the trace depth applied on top.
    pub fn engine_config(&self) -> anyhow::Result<MatchingConfig> {
        let mut cfg = match &self.engine_config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            None => MatchingConfig::default(),
        };
        if self.trace_top_n > 0 {
            cfg.trace_top_n = self.trace_top_n;
        }
        Ok(cfg)
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
