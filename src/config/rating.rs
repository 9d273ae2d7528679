//! Rating engine configuration

use crate::error::MatchmakingError;
use serde::{Deserialize, Serialize};
use skillratings::weng_lin::{WengLinConfig, WengLinRating};
use std::str::FromStr;

/// Which rating engine the pipeline talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// In-process Weng-Lin engine
    Local,
    /// Remote rating service over HTTP
    Http,
}

impl FromStr for EngineKind {
    type Err = MatchmakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(EngineKind::Local),
            "http" => Ok(EngineKind::Http),
            other => Err(MatchmakingError::ConfigurationError {
                message: format!("Unknown rating engine: {}", other),
            }),
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Local => write!(f, "local"),
            EngineKind::Http => write!(f, "http"),
        }
    }
}

/// Parameters of the in-process Weng-Lin engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Core Weng-Lin parameters
    pub weng_lin_config: WengLinConfig,
    /// Skill estimate of an unrated player
    pub default_mu: f64,
    /// Uncertainty of an unrated player
    pub default_sigma: f64,
    /// A previous-season rating keeps 1/divisor of its distance from the default
    pub carry_over_divisor: f64,
    /// Multiplier applied to the conservative estimate when deriving MMR
    pub mmr_scale: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weng_lin_config: WengLinConfig::new(),
            default_mu: 25.0,
            default_sigma: 5.0,
            carry_over_divisor: 3.0,
            mmr_scale: 100.0,
        }
    }
}

impl EngineConfig {
    /// Rating given to players without usable history
    pub fn default_rating(&self) -> WengLinRating {
        WengLinRating {
            rating: self.default_mu,
            uncertainty: self.default_sigma,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.weng_lin_config.beta <= 0.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Beta must be positive".to_string(),
            }
            .into());
        }

        if self.weng_lin_config.uncertainty_tolerance < 0.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Uncertainty tolerance must be non-negative".to_string(),
            }
            .into());
        }

        if self.default_sigma <= 0.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Default sigma must be positive".to_string(),
            }
            .into());
        }

        if self.carry_over_divisor < 1.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "Carry-over divisor must be at least 1".to_string(),
            }
            .into());
        }

        if self.mmr_scale <= 0.0 {
            return Err(MatchmakingError::ConfigurationError {
                message: "MMR scale must be positive".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.default_mu, 25.0);
        assert_eq!(config.default_sigma, 5.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_config_validation() {
        let mut config = EngineConfig::default();
        config.weng_lin_config.beta = -1.0;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.default_sigma = 0.0;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.carry_over_divisor = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("LOCAL".parse::<EngineKind>().unwrap(), EngineKind::Local);
        assert_eq!("http".parse::<EngineKind>().unwrap(), EngineKind::Http);
        assert!("grpc".parse::<EngineKind>().is_err());
    }
}
