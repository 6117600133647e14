//! Engine configuration.
//!
//! This module provides defaults for tree creation and arena sizing, loaded
//! from environment variables.
//!
//! # Environment Variables
//!
//! - `DBTREE_DEFAULT_ORDER`: Order used by `Tree::create_with_config` (default: `16`)
//! - `DBTREE_ARENA_CAPACITY`: Byte limit for `HeapArena::from_config`, 0 for unbounded (default: `0`)
//! - `DBTREE_DYNAMIC_ROOT_INITIAL`: Initial root capacity for dynamic-root trees (default: `1`)
//!
//! # Invariants
//!
//! - `default_order` is always in `3..=63`
//! - `dynamic_root_initial` is always in `1..=default_order`

use crate::btree::{MAX_ORDER, MIN_ORDER};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Fan-out used when a caller creates a tree without an explicit order.
    pub default_order: u8,
    /// Maximum arena size in bytes. 0 means unbounded.
    pub arena_capacity: usize,
    /// Record capacity of a freshly allocated dynamic root.
    pub dynamic_root_initial: u8,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_order: Self::DEFAULT_ORDER,
            arena_capacity: 0,
            dynamic_root_initial: Self::DEFAULT_DYNAMIC_ROOT_INITIAL,
        }
    }
}

impl EngineConfig {
    /// Default tree order.
    pub const DEFAULT_ORDER: u8 = 16;
    /// Default record capacity of a new dynamic root.
    pub const DEFAULT_DYNAMIC_ROOT_INITIAL: u8 = 1;

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `DBTREE_DEFAULT_ORDER` is set but not in `3..=63`
    /// - `DBTREE_ARENA_CAPACITY` is set but not a number
    /// - `DBTREE_DYNAMIC_ROOT_INITIAL` is set but 0 or above the order
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// `from_env` is this with `std::env::var`; tests pass a map.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default_order = match lookup("DBTREE_DEFAULT_ORDER") {
            Some(value) => parse_order(&value)?,
            None => Self::DEFAULT_ORDER,
        };

        let arena_capacity = match lookup("DBTREE_ARENA_CAPACITY") {
            Some(value) => value.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                name: "DBTREE_ARENA_CAPACITY".to_string(),
                message: format!("'{value}' is not a byte count"),
            })?,
            None => 0,
        };

        let dynamic_root_initial = match lookup("DBTREE_DYNAMIC_ROOT_INITIAL") {
            Some(value) => parse_root_initial(&value, default_order)?,
            None => Self::DEFAULT_DYNAMIC_ROOT_INITIAL.min(default_order),
        };

        Ok(Self {
            default_order,
            arena_capacity,
            dynamic_root_initial,
        })
    }
}

fn parse_order(value: &str) -> Result<u8, ConfigError> {
    value
        .parse::<u8>()
        .ok()
        .filter(|order| (MIN_ORDER..=MAX_ORDER).contains(order))
        .ok_or_else(|| ConfigError::InvalidValue {
            name: "DBTREE_DEFAULT_ORDER".to_string(),
            message: format!("'{value}' is not an order between {MIN_ORDER} and {MAX_ORDER}"),
        })
}

fn parse_root_initial(value: &str, order: u8) -> Result<u8, ConfigError> {
    value
        .parse::<u8>()
        .ok()
        .filter(|initial| (1..=order).contains(initial))
        .ok_or_else(|| ConfigError::InvalidValue {
            name: "DBTREE_DYNAMIC_ROOT_INITIAL".to_string(),
            message: format!("'{value}' must be between 1 and the order ({order})"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = EngineConfig::from_lookup(lookup_from(&[])).expect("defaults load");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.default_order, 16);
        assert_eq!(config.arena_capacity, 0);
        assert_eq!(config.dynamic_root_initial, 1);
    }

    #[test]
    fn test_values_are_read() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("DBTREE_DEFAULT_ORDER", "5"),
            ("DBTREE_ARENA_CAPACITY", "65536"),
            ("DBTREE_DYNAMIC_ROOT_INITIAL", "2"),
        ]))
        .expect("valid config");
        assert_eq!(config.default_order, 5);
        assert_eq!(config.arena_capacity, 65536);
        assert_eq!(config.dynamic_root_initial, 2);
    }

    #[test]
    fn test_order_out_of_range_is_rejected() {
        for bad in ["2", "64", "sixteen"] {
            let result = EngineConfig::from_lookup(lookup_from(&[("DBTREE_DEFAULT_ORDER", bad)]));
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { ref name, .. }) if name == "DBTREE_DEFAULT_ORDER"),
                "order {bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_root_initial_must_fit_order() {
        let result = EngineConfig::from_lookup(lookup_from(&[
            ("DBTREE_DEFAULT_ORDER", "4"),
            ("DBTREE_DYNAMIC_ROOT_INITIAL", "5"),
        ]));
        assert!(result.is_err());

        let result = EngineConfig::from_lookup(lookup_from(&[("DBTREE_DYNAMIC_ROOT_INITIAL", "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
