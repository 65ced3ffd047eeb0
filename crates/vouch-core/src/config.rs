/// PROTOCOL CONFIGURATION
///
/// Tunable parameters of the escalation engine and its consumers. Defaults are
/// usable as-is; deployments may override any field from a file and from
/// `VOUCH_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreError, CoreResult};
use crate::types::{scale_by_fraction, Amount, Timestamp, FIXED_POINT_SCALE};

/// Upper bound accepted for any liveness window (5200 weeks)
pub const MAX_LIVENESS: Timestamp = 5200 * 7 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Liveness applied when a request asks for 0
    pub default_liveness: Timestamp,
    /// Longest liveness a request may ask for
    pub max_liveness: Timestamp,
    /// Maximum ancillary payload size (bytes), after stamping
    pub ancillary_bytes_limit: usize,
    /// Claim bond as a fraction of the insured amount (1e18 = 100%)
    pub insurance_bond_percentage: u64,
    /// Liveness used for insurance claims
    pub insurance_liveness: Timestamp,
    /// Liveness used for prediction market questions
    pub market_liveness: Timestamp,
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig {
            default_liveness: 7200,
            max_liveness: MAX_LIVENESS,
            ancillary_bytes_limit: 8192,
            insurance_bond_percentage: 1_000_000_000_000_000, // 0.1%
            insurance_liveness: 24 * 3600,
            market_liveness: 7200,
        }
    }
}

impl OracleConfig {
    /// Layer an optional config file and `VOUCH_*` environment variables over
    /// the defaults
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("VOUCH").try_parsing(true));

        let loaded: OracleConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.default_liveness == 0 {
            return Err(CoreError::InvalidConfig("default_liveness must be > 0".to_string()));
        }
        if self.max_liveness == 0 || self.max_liveness > MAX_LIVENESS {
            return Err(CoreError::InvalidConfig(format!(
                "max_liveness must be in 1..={}",
                MAX_LIVENESS
            )));
        }
        if self.default_liveness > self.max_liveness
            || self.insurance_liveness > self.max_liveness
            || self.market_liveness > self.max_liveness
        {
            return Err(CoreError::InvalidConfig(
                "liveness exceeds max_liveness".to_string(),
            ));
        }
        if self.insurance_liveness == 0 || self.market_liveness == 0 {
            return Err(CoreError::InvalidConfig("consumer liveness must be > 0".to_string()));
        }
        if self.ancillary_bytes_limit == 0 {
            return Err(CoreError::InvalidConfig(
                "ancillary_bytes_limit must be > 0".to_string(),
            ));
        }
        if self.insurance_bond_percentage as i128 > FIXED_POINT_SCALE {
            return Err(CoreError::InvalidConfig(
                "insurance_bond_percentage above 100%".to_string(),
            ));
        }
        Ok(())
    }

    /// Bond for an insurance claim on `insured_amount`
    pub fn insurance_bond(&self, insured_amount: Amount) -> CoreResult<Amount> {
        scale_by_fraction(insured_amount, self.insurance_bond_percentage as Amount)
            .ok_or(CoreError::Overflow("insurance bond"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        assert!(OracleConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_liveness() {
        let config = OracleConfig {
            default_liveness: 0,
            ..OracleConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_insurance_bond_is_fraction_of_amount() {
        let config = OracleConfig::default();
        // 0.1% of 10_000e18
        let amount: Amount = 10_000 * 10u128.pow(18);
        assert_eq!(config.insurance_bond(amount).unwrap(), 10 * 10u128.pow(18));

        // 1e6 tokens at 18 decimals
        let large: Amount = 1_000_000 * 10u128.pow(18);
        assert_eq!(config.insurance_bond(large).unwrap(), 1_000 * 10u128.pow(18));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("vouch-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("oracle.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "market_liveness = 600").unwrap();
        writeln!(file, "ancillary_bytes_limit = 1024").unwrap();

        let config = OracleConfig::load(Some(&path)).unwrap();
        assert_eq!(config.market_liveness, 600);
        assert_eq!(config.ancillary_bytes_limit, 1024);
        assert_eq!(config.default_liveness, 7200);

        std::fs::remove_dir_all(&dir).ok();
    }
}
