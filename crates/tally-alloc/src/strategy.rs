//! Allocation strategies and their token conventions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AllocError;

/// How a token is claimed from the counter.
///
/// Strategies fall into two families with different token conventions:
///
/// - [`AtomicAdd`](Self::AtomicAdd) yields the counter value *after* the
///   increment. The store serializes adds, so it never conflicts.
/// - Every compare-and-swap strategy yields the value *observed before* the
///   increment. The successful swap proves nobody else held that value.
///
/// The conventions label the same counter transition differently (`k -> k+1`
/// is token `k+1` for one family and `k` for the other), so a counter must
/// only ever be driven by one family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Unconditional atomic increment-and-fetch.
    #[default]
    AtomicAdd,
    /// Read, then conditional update-add guarded by `count == observed`.
    CasUpdate,
    /// Read, then conditional whole-item put guarded by `count == observed`.
    CasPut,
    /// Read, then one transaction holding the guarded update-add and the
    /// record put.
    Transactional,
}

impl Strategy {
    /// All strategies, in declaration order.
    pub const ALL: [Strategy; 4] = [
        Self::AtomicAdd,
        Self::CasUpdate,
        Self::CasPut,
        Self::Transactional,
    ];

    /// Returns `true` for the read-then-compare-and-swap family.
    pub fn is_optimistic(self) -> bool {
        !matches!(self, Self::AtomicAdd)
    }

    /// Returns `true` if the token is the pre-increment value.
    pub fn yields_observed_value(self) -> bool {
        self.is_optimistic()
    }

    /// Returns `true` if allocation and record insertion share one
    /// transaction.
    pub fn is_transactional(self) -> bool {
        matches!(self, Self::Transactional)
    }

    /// The kebab-case name used in configuration and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::AtomicAdd => "atomic-add",
            Self::CasUpdate => "cas-update",
            Self::CasPut => "cas-put",
            Self::Transactional => "transactional",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = AllocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|s| s.name()).collect();
                AllocError::Config(format!(
                    "unknown strategy {s:?}, expected one of: {}",
                    known.join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.name().parse::<Strategy>().unwrap(), strategy);
            assert_eq!(strategy.to_string(), strategy.name());
        }
    }

    #[test]
    fn unknown_name_is_a_config_error() {
        let err = "pessimistic".parse::<Strategy>().unwrap_err();
        assert!(matches!(err, AllocError::Config(msg) if msg.contains("cas-update")));
    }

    #[test]
    fn token_conventions() {
        assert!(!Strategy::AtomicAdd.yields_observed_value());
        assert!(Strategy::CasUpdate.yields_observed_value());
        assert!(Strategy::CasPut.yields_observed_value());
        assert!(Strategy::Transactional.yields_observed_value());
        assert!(Strategy::Transactional.is_transactional());
    }

    #[test]
    fn default_is_atomic_add() {
        assert_eq!(Strategy::default(), Strategy::AtomicAdd);
    }
}
