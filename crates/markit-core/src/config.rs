//! Grading configuration.

use std::path::Path;
use std::time::Duration;

use markit_vision::VerifierConfig;
use serde::{Deserialize, Serialize};

use crate::domain::{GradingError, Result};

/// Largest supported ensemble.
pub const MAX_ENSEMBLE_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    /// Independent oracle calls per paper.
    pub ensemble_size: usize,
    pub oracle_timeout_ms: u64,
    /// Per-question visual verification timeout.
    pub visual_timeout_ms: u64,
    /// Upper bound on concurrently running tasks of one kind.
    pub max_concurrent: usize,
    /// Use the paper agreement score as overall confidence when it is positive.
    pub prefer_ensemble_agreement: bool,
    pub verifier: VerifierConfig,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            ensemble_size: 3,
            oracle_timeout_ms: 120_000,
            visual_timeout_ms: 8_000,
            max_concurrent: 4,
            prefer_ensemble_agreement: true,
            verifier: VerifierConfig::default(),
        }
    }
}

impl GradingConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_ENSEMBLE_SIZE).contains(&self.ensemble_size) {
            return Err(GradingError::InvalidConfig(format!(
                "ensemble_size must be within 1..={MAX_ENSEMBLE_SIZE}, got {}",
                self.ensemble_size
            )));
        }
        if self.oracle_timeout_ms == 0 || self.visual_timeout_ms == 0 {
            return Err(GradingError::InvalidConfig(
                "timeouts must be positive".to_string(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(GradingError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn visual_timeout(&self) -> Duration {
        Duration::from_millis(self.visual_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = GradingConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.visual_timeout(), Duration::from_secs(8));
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markit.json");
        std::fs::write(&path, r#"{"ensemble_size": 5, "verifier": {"close_radius": 1}}"#).unwrap();
        let cfg = GradingConfig::from_file(&path).unwrap();
        assert_eq!(cfg.ensemble_size, 5);
        assert_eq!(cfg.verifier.close_radius, 1);
        assert_eq!(cfg.oracle_timeout_ms, 120_000);
    }

    #[test]
    fn test_rejects_out_of_range_ensemble() {
        let cfg = GradingConfig {
            ensemble_size: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(GradingError::InvalidConfig(_))));

        let cfg = GradingConfig {
            ensemble_size: 17,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
