//! The document model: typed attribute values and the items that hold them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// A single typed attribute value.
///
/// The store distinguishes strings from numbers; an `Equals` precondition
/// comparing `N(1)` against `S("1")` fails.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    /// A UTF-8 string.
    S(String),
    /// An integral number.
    N(i64),
}

impl AttributeValue {
    /// The numeric payload, if this is a number.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::N(n) => Some(*n),
            Self::S(_) => None,
        }
    }

    /// The string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            Self::N(_) => None,
        }
    }

    /// Short name of the value's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::S(_) => "string",
            Self::N(_) => "number",
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S(s) => write!(f, "{s:?}"),
            Self::N(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::S(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::S(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        Self::N(n)
    }
}

/// A document: attribute names mapped to values.
///
/// Attributes are kept in name order so that items compare, print, and
/// serialize deterministically.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(BTreeMap<String, AttributeValue>);

impl Item {
    /// Create an empty item.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Insert or replace an attribute, returning the previous value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.0.insert(name.into(), value.into())
    }

    /// Look up an attribute.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    /// Whether the attribute is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Read a numeric attribute, failing if it is absent or not a number.
    pub fn number(&self, name: &str) -> TypeResult<i64> {
        match self.0.get(name) {
            None => Err(TypeError::MissingAttribute {
                name: name.to_string(),
            }),
            Some(value) => value.as_number().ok_or_else(|| TypeError::WrongKind {
                name: name.to_string(),
                expected: "number",
            }),
        }
    }

    /// Read a string attribute, failing if it is absent or not a string.
    pub fn string(&self, name: &str) -> TypeResult<&str> {
        match self.0.get(name) {
            None => Err(TypeError::MissingAttribute {
                name: name.to_string(),
            }),
            Some(value) => value.as_str().ok_or_else(|| TypeError::WrongKind {
                name: name.to_string(),
                expected: "string",
            }),
        }
    }

    /// Keep only the named attributes. Unknown names are ignored.
    pub fn project<S: AsRef<str>>(&self, names: &[S]) -> Self {
        Self(
            names
                .iter()
                .filter_map(|n| {
                    let n = n.as_ref();
                    self.0.get(n).map(|v| (n.to_string(), v.clone()))
                })
                .collect(),
        )
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the item has no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Item {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_typed_reads() {
        let item = Item::new()
            .with("pk", "counter")
            .with("count_value", 7);
        assert_eq!(item.len(), 2);
        assert_eq!(item.string("pk").unwrap(), "counter");
        assert_eq!(item.number("count_value").unwrap(), 7);
    }

    #[test]
    fn number_reports_missing_and_wrong_kind() {
        let item = Item::new().with("pk", "counter");
        assert_eq!(
            item.number("count_value"),
            Err(TypeError::MissingAttribute {
                name: "count_value".into()
            })
        );
        assert!(matches!(
            item.number("pk"),
            Err(TypeError::WrongKind { expected: "number", .. })
        ));
    }

    #[test]
    fn projection_drops_unrequested_attributes() {
        let item = Item::new()
            .with("pk", "counter")
            .with("count_value", 1)
            .with("note", "x");
        let projected = item.project(&["count_value", "absent"]);
        assert_eq!(projected, Item::new().with("count_value", 1));
    }

    #[test]
    fn string_and_number_are_distinct() {
        assert_ne!(AttributeValue::from("1"), AttributeValue::from(1));
        assert_eq!(AttributeValue::N(3).to_string(), "3");
        assert_eq!(AttributeValue::from("a").to_string(), "\"a\"");
    }

    #[test]
    fn item_serializes_as_plain_map() {
        let item = Item::new().with("count_value", 2);
        let json = serde_json::to_string(&item).unwrap();
        assert_eq!(json, r#"{"count_value":{"N":2}}"#);
        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }
}
