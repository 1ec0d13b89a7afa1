//! Connection settings for the queue engine.

use std::path::PathBuf;

/// Default location of the engine's Lua core when `FOREMAN_SCRIPT_PATH`
/// is not set. The script ships with the engine distribution; the client
/// only loads it and installs it by SHA.
pub const DEFAULT_SCRIPT_PATH: &str = "qless-core/qless.lua";

/// Settings used to reach the queue engine.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Redis URL of the engine, e.g. `redis://127.0.0.1:6379/`.
    pub url: String,
    /// Path to the engine's Lua core on disk.
    pub script_path: PathBuf,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            script_path: default_script_path(),
        }
    }

    pub fn with_script_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_path = path.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("redis://127.0.0.1:6379/")
    }
}

fn default_script_path() -> PathBuf {
    std::env::var_os("FOREMAN_SCRIPT_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRIPT_PATH))
}
