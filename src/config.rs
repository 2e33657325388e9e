//! Engine configuration

use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};

/// What to do with cells still missing after the backfill pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualMissing {
    /// Leave trailing missing cells as they are
    #[default]
    Leave,
    /// Forward-fill trailing missing cells from the last present value
    ForwardFill,
}

/// Configuration for plan execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fraction of rows held out for scoring supervised models
    pub test_size: f64,

    /// Seed for the train/test split; entropy when unset
    pub random_seed: Option<u64>,

    /// Policy for missing cells the backfill pass cannot reach
    pub residual_missing: ResidualMissing,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            random_seed: None,
            residual_missing: ResidualMissing::Leave,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the held-out fraction
    pub fn with_test_size(mut self, test_size: f64) -> Self {
        self.test_size = test_size;
        self
    }

    /// Builder method to set the split seed
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Builder method to set the residual missing policy
    pub fn with_residual_missing(mut self, policy: ResidualMissing) -> Self {
        self.residual_missing = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(PlanError::ConfigError(format!(
                "test_size must be in (0, 1), got {}",
                self.test_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.test_size, 0.2);
        assert_eq!(config.random_seed, None);
        assert_eq!(config.residual_missing, ResidualMissing::Leave);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::new()
            .with_test_size(0.3)
            .with_random_seed(7)
            .with_residual_missing(ResidualMissing::ForwardFill);
        assert_eq!(config.test_size, 0.3);
        assert_eq!(config.random_seed, Some(7));
        assert_eq!(config.residual_missing, ResidualMissing::ForwardFill);
    }

    #[test]
    fn test_invalid_test_size() {
        assert!(EngineConfig::new().with_test_size(1.0).validate().is_err());
        assert!(EngineConfig::new().with_test_size(0.0).validate().is_err());
    }

    #[test]
    fn test_partial_yaml() {
        let config: EngineConfig = serde_yaml::from_str("residual_missing: forward_fill").unwrap();
        assert_eq!(config.test_size, 0.2);
        assert_eq!(config.residual_missing, ResidualMissing::ForwardFill);
    }
}
