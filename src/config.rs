//! Configuration Module
//!
//! Handles loading and validating cache configuration, including from
//! environment variables.

use std::env;
use std::time::Duration;

use crate::error::{CacheError, Result};

// == Environment Variable Names ==
/// Default TTL in milliseconds; `0` means entries never expire
pub const ENV_DEFAULT_TTL_MS: &str = "CACHE_DEFAULT_TTL_MS";
/// Maximum number of entries; unset means unbounded
pub const ENV_CAPACITY: &str = "CACHE_CAPACITY";
/// `true`/`false`; disables sliding expiration on `get`
pub const ENV_DISABLE_TOUCH_ON_HIT: &str = "CACHE_DISABLE_TOUCH_ON_HIT";

/// Cache configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// TTL applied by `Ttl::Default`. Zero means no expiration.
    pub default_ttl: Duration,
    /// Maximum number of live entries, `None` for unbounded
    pub capacity: Option<usize>,
    /// Turns off TTL refresh on `get`
    pub disable_touch_on_hit: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DEFAULT_TTL_MS` - Default TTL in milliseconds (default: 0, never expire)
    /// - `CACHE_CAPACITY` - Maximum entries (default: unbounded)
    /// - `CACHE_DISABLE_TOUCH_ON_HIT` - Disable sliding expiration (default: false)
    ///
    /// Malformed values are rejected rather than replaced by defaults.
    pub fn from_env() -> Result<Self> {
        let default_ttl = match read_var(ENV_DEFAULT_TTL_MS)? {
            Some(raw) => Duration::from_millis(parse_var::<u64>(ENV_DEFAULT_TTL_MS, &raw)?),
            None => Duration::ZERO,
        };
        let capacity = read_var(ENV_CAPACITY)?
            .map(|raw| parse_var::<usize>(ENV_CAPACITY, &raw))
            .transpose()?;
        let disable_touch_on_hit = read_var(ENV_DISABLE_TOUCH_ON_HIT)?
            .map(|raw| parse_var::<bool>(ENV_DISABLE_TOUCH_ON_HIT, &raw.to_ascii_lowercase()))
            .transpose()?
            .unwrap_or(false);

        let config = Self {
            default_ttl,
            capacity,
            disable_touch_on_hit,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants a cache needs to be built.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == Some(0) {
            return Err(CacheError::InvalidConfig(
                "capacity must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_ttl: Duration::ZERO,
            capacity: None,
            disable_touch_on_hit: false,
        }
    }
}

fn read_var(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(raw) => Ok(Some(raw.trim().to_string())),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(CacheError::InvalidConfig(format!(
            "{} is not valid unicode",
            name
        ))),
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| {
        CacheError::InvalidConfig(format!("{}={:?} could not be parsed: {}", name, raw, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global; keep every env mutation in one test.
    #[test]
    fn test_config_from_env() {
        env::remove_var(ENV_DEFAULT_TTL_MS);
        env::remove_var(ENV_CAPACITY);
        env::remove_var(ENV_DISABLE_TOUCH_ON_HIT);

        let config = Config::from_env().unwrap();
        assert_eq!(config, Config::default());

        env::set_var(ENV_DEFAULT_TTL_MS, "1500");
        env::set_var(ENV_CAPACITY, "64");
        env::set_var(ENV_DISABLE_TOUCH_ON_HIT, "TRUE");
        let config = Config::from_env().unwrap();
        assert_eq!(config.default_ttl, Duration::from_millis(1500));
        assert_eq!(config.capacity, Some(64));
        assert!(config.disable_touch_on_hit);

        env::set_var(ENV_DEFAULT_TTL_MS, "-5");
        assert!(matches!(
            Config::from_env(),
            Err(CacheError::InvalidConfig(_))
        ));
        env::set_var(ENV_DEFAULT_TTL_MS, "1500");

        env::set_var(ENV_CAPACITY, "0");
        assert!(matches!(
            Config::from_env(),
            Err(CacheError::InvalidConfig(_))
        ));

        env::set_var(ENV_CAPACITY, "lots");
        assert!(matches!(
            Config::from_env(),
            Err(CacheError::InvalidConfig(_))
        ));

        env::remove_var(ENV_DEFAULT_TTL_MS);
        env::remove_var(ENV_CAPACITY);
        env::remove_var(ENV_DISABLE_TOUCH_ON_HIT);
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.default_ttl, Duration::ZERO);
        assert_eq!(config.capacity, None);
        assert!(!config.disable_touch_on_hit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = Config {
            capacity: Some(0),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CacheError::InvalidConfig(_))
        ));
    }
}
