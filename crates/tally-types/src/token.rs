//! Allocation tokens claimed from a shared counter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::value::AttributeValue;

/// A counter value exclusively claimed by one successful allocation.
///
/// Records are keyed by the token's decimal form (see [`Self::as_key`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationToken(i64);

impl AllocationToken {
    /// Wrap a raw counter value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// The raw counter value.
    pub const fn value(self) -> i64 {
        self.0
    }

    /// The string partition key a record claimed with this token is stored under.
    pub fn as_key(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for AllocationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AllocationToken {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>()
            .map(Self)
            .map_err(|e| TypeError::InvalidToken(format!("{s}: {e}")))
    }
}

impl From<AllocationToken> for AttributeValue {
    fn from(token: AllocationToken) -> Self {
        AttributeValue::S(token.as_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn key_is_decimal_string() {
        assert_eq!(AllocationToken::new(1).as_key(), "1");
        assert_eq!(
            AttributeValue::from(AllocationToken::new(42)),
            AttributeValue::S("42".into())
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("counter".parse::<AllocationToken>().is_err());
        assert_eq!("17".parse::<AllocationToken>().unwrap().value(), 17);
    }

    proptest! {
        #[test]
        fn distinct_tokens_have_distinct_keys(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            prop_assert_ne!(AllocationToken::new(a).as_key(), AllocationToken::new(b).as_key());
        }
    }
}
