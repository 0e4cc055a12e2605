//! Preconditions attached to conditional writes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{AttributeValue, Item};

/// A predicate over the current state of an item, evaluated by the store
/// atomically with the write it guards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precondition {
    /// The named attribute exists and equals `expected` (compare-and-swap).
    Equals {
        attribute: String,
        expected: AttributeValue,
    },
    /// The named attribute exists.
    AttributeExists(String),
    /// The named attribute does not exist. Holds for a missing item.
    AttributeNotExists(String),
}

impl Precondition {
    /// Shorthand for an [`Equals`](Self::Equals) precondition.
    pub fn equals(attribute: impl Into<String>, expected: impl Into<AttributeValue>) -> Self {
        Self::Equals {
            attribute: attribute.into(),
            expected: expected.into(),
        }
    }

    /// Evaluate against the item currently stored, if any.
    pub fn evaluate(&self, current: Option<&Item>) -> bool {
        match self {
            Self::Equals {
                attribute,
                expected,
            } => current.and_then(|item| item.get(attribute)) == Some(expected),
            Self::AttributeExists(attribute) => {
                current.is_some_and(|item| item.contains(attribute))
            }
            Self::AttributeNotExists(attribute) => {
                !current.is_some_and(|item| item.contains(attribute))
            }
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals {
                attribute,
                expected,
            } => write!(f, "{attribute} = {expected}"),
            Self::AttributeExists(attribute) => write!(f, "attribute_exists({attribute})"),
            Self::AttributeNotExists(attribute) => {
                write!(f, "attribute_not_exists({attribute})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(n: i64) -> Item {
        Item::new().with("pk", "counter").with("count_value", n)
    }

    #[test]
    fn equals_matches_current_value_only() {
        let cond = Precondition::equals("count_value", 1);
        assert!(cond.evaluate(Some(&counter(1))));
        assert!(!cond.evaluate(Some(&counter(2))));
    }

    #[test]
    fn equals_fails_on_missing_item_or_attribute() {
        let cond = Precondition::equals("count_value", 0);
        assert!(!cond.evaluate(None));
        assert!(!cond.evaluate(Some(&Item::new().with("pk", "counter"))));
    }

    #[test]
    fn equals_is_type_sensitive() {
        let cond = Precondition::equals("count_value", "1");
        assert!(!cond.evaluate(Some(&counter(1))));
    }

    #[test]
    fn existence_checks() {
        let exists = Precondition::AttributeExists("pk".into());
        let not_exists = Precondition::AttributeNotExists("pk".into());
        assert!(exists.evaluate(Some(&counter(0))));
        assert!(!exists.evaluate(None));
        assert!(not_exists.evaluate(None));
        assert!(!not_exists.evaluate(Some(&counter(0))));
    }

    #[test]
    fn display_reads_like_an_expression() {
        assert_eq!(
            Precondition::equals("count_value", 4).to_string(),
            "count_value = 4"
        );
        assert_eq!(
            Precondition::AttributeNotExists("pk".into()).to_string(),
            "attribute_not_exists(pk)"
        );
    }
}
