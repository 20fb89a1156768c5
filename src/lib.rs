// servcore - request-servicing core for a connection-oriented server:
// a bounded cache engine, a thread-pool connection scheduler, and a
// connection-channel registry for sockets that outlive their request.

pub mod cache;
pub mod connchan;
pub mod driver;
pub mod error;
pub mod scheduler;

pub use error::{CoreError, Result};

/// Top-level tunables shared by every subsystem in this crate. Individual
/// caches and pools can still be constructed with their own configs; this
/// is only the convenience bundle a process-level bootstrap loads once.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub server_name: String,
    pub default_pool: scheduler::PoolConfig,
    pub cache: cache::CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "servcore".to_string(),
            default_pool: scheduler::PoolConfig::default(),
            cache: cache::CacheConfig::default(),
        }
    }
}

impl Config {
    /// Loads a complete config document from a JSON file.
    pub fn load_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| CoreError::Configuration(e.to_string()))
    }

    pub fn write_json_file(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|e| CoreError::Configuration(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
