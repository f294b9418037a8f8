//! Pool configuration, read from RON.
//!
//! ```ron
//! (
//!     history_root: "/srv/quire/histories",
//!     timeout_ms: 60000,
//! )
//! ```
//!
//! Every field is optional; missing ones take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_POOL_TIMEOUT;
use crate::error::PoolError;

/// Settings for a file-backed [`DocumentPool`](crate::DocumentPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Directory holding the `.history` files.
    pub history_root: PathBuf,
    /// Idle eviction timeout, also the maintenance period.
    pub timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            history_root: PathBuf::from("histories"),
            timeout_ms: DEFAULT_POOL_TIMEOUT.as_millis() as u64,
        }
    }
}

impl PoolConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            history_root: root.into(),
            ..Self::default()
        }
    }

    pub fn from_ron(text: &str) -> Result<Self, PoolError> {
        ron::from_str(text).map_err(|e| PoolError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, PoolError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PoolError::Config(format!("{}: {e}", path.display())))?;
        Self::from_ron(&text)
    }

    /// The eviction timeout. Zero is rejected.
    pub fn timeout(&self) -> Result<Duration, PoolError> {
        if self.timeout_ms == 0 {
            return Err(PoolError::Config("timeout_ms must be positive".into()));
        }
        Ok(Duration::from_millis(self.timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(60));
        assert_eq!(config.history_root, PathBuf::from("histories"));
    }

    #[test]
    fn test_parse_partial_ron() {
        let config = PoolConfig::from_ron("(timeout_ms: 250)").unwrap();
        assert_eq!(config.timeout().unwrap(), Duration::from_millis(250));
        assert_eq!(config.history_root, PathBuf::from("histories"));

        let config = PoolConfig::from_ron(r#"(history_root: "/srv/h", timeout_ms: 1000)"#).unwrap();
        assert_eq!(config.history_root, PathBuf::from("/srv/h"));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(PoolConfig::from_ron("(timeout_ms: \"soon\")"), Err(PoolError::Config(_))));
        let zero = PoolConfig::from_ron("(timeout_ms: 0)").unwrap();
        assert!(zero.timeout().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pool.ron");
        std::fs::write(&path, "(timeout_ms: 5000)").unwrap();
        assert_eq!(PoolConfig::load(&path).unwrap().timeout_ms, 5000);
        assert!(PoolConfig::load(&dir.path().join("missing.ron")).is_err());
    }
}
