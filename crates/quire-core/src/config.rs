//! Engine configuration.
//!
//! All thresholds are performance heuristics, not correctness contracts.
//! Configuration is plain data and can be loaded from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the compilation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of documents added per translation action when a project is
    /// built from scratch. Smaller batches let frozen snapshots observe more
    /// intermediate progress.
    pub add_documents_batch_size: usize,

    /// Batches at least this large are parsed on the rayon pool.
    pub parallel_parse_threshold: usize,

    /// Files longer than this are assumed to have structural changes on
    /// every edit.
    pub structural_check_max_text_len: usize,

    /// Edits spanning more than this many bytes are assumed structural.
    pub structural_check_max_edit_len: usize,

    /// Window during which a frozen partial snapshot of the same document
    /// and solution is reused instead of recomputed.
    pub frozen_snapshot_reuse_ms: u64,

    /// Verify tracker state invariants after every published final state.
    pub validate_states: bool,

    /// Name of the type whose declaration marks a project as the root library.
    pub root_object_type_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            add_documents_batch_size: 64,
            parallel_parse_threshold: 16,
            structural_check_max_text_len: 4 * 1024,
            structural_check_max_edit_len: 1024,
            frozen_snapshot_reuse_ms: 250,
            validate_states: cfg!(debug_assertions),
            root_object_type_name: "Object".to_string(),
        }
    }
}

impl EngineConfig {
    /// Config tuned for editor use: small batches, short reuse window.
    pub fn interactive() -> Self {
        Self {
            add_documents_batch_size: 16,
            frozen_snapshot_reuse_ms: 100,
            ..Default::default()
        }
    }

    /// Config tuned for batch builds: large batches, no state validation.
    pub fn batch() -> Self {
        Self {
            add_documents_batch_size: 1024,
            parallel_parse_threshold: 8,
            frozen_snapshot_reuse_ms: 0,
            validate_states: false,
            ..Default::default()
        }
    }

    /// Parse a config from a JSON string. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.add_documents_batch_size == 0 {
            return Err(Error::Config(
                "add_documents_batch_size must be at least 1".to_string(),
            ));
        }
        if self.root_object_type_name.is_empty() {
            return Err(Error::Config(
                "root_object_type_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "add_documents_batch_size": 3 }"#).unwrap();
        assert_eq!(config.add_documents_batch_size, 3);
        assert_eq!(
            config.structural_check_max_text_len,
            EngineConfig::default().structural_check_max_text_len
        );
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result = EngineConfig::from_json_str(r#"{ "add_documents_batch_size": 0 }"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let result = EngineConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quire.json");
        std::fs::write(&path, r#"{ "root_object_type_name": "Any" }"#).unwrap();

        let config = EngineConfig::from_path(&path).unwrap();
        assert_eq!(config.root_object_type_name, "Any");
    }

    #[test]
    fn test_presets() {
        assert!(
            EngineConfig::interactive().add_documents_batch_size
                < EngineConfig::batch().add_documents_batch_size
        );
        assert!(!EngineConfig::batch().validate_states);
    }
}
