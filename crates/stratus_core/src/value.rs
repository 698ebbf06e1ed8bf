//! Property values and deferred references.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::LogicalId;

/// Symbolic pointer to another declared resource.
///
/// With no attribute this stands for the resource's primary identifier
/// (`Ref`); with an attribute it stands for a generated attribute such as a
/// security group's `GroupId` (`Fn::GetAtt`). Neither is known until the
/// target has been realized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub target: LogicalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Reference {
    pub fn to(target: &LogicalId) -> Self {
        Self {
            target: target.clone(),
            attribute: None,
        }
    }

    pub fn attr(target: &LogicalId, attribute: impl Into<String>) -> Self {
        Self {
            target: target.clone(),
            attribute: Some(attribute.into()),
        }
    }
}

/// A declared property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Ref(Reference),
    /// String concatenation resolved after every part is known.
    Join { separator: String, parts: Vec<Value> },
}

impl Value {
    pub fn reference(target: &LogicalId) -> Self {
        Value::Ref(Reference::to(target))
    }

    pub fn get_att(target: &LogicalId, attribute: impl Into<String>) -> Self {
        Value::Ref(Reference::attr(target, attribute))
    }

    pub fn join(separator: impl Into<String>, parts: Vec<Value>) -> Self {
        Value::Join {
            separator: separator.into(),
            parts,
        }
    }

    /// Build a map value from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Look up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Every reference reachable from this value, depth first.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Value::Ref(r) => out.push(r),
            Value::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_references(out)),
            Value::Join { parts, .. } => parts.iter().for_each(|v| v.collect_references(out)),
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Str(_) => {}
        }
    }

    /// Replace every reference with the value produced by `resolve`.
    ///
    /// Joins whose parts all resolve to strings collapse into a single
    /// string. Returns `None` if any reference cannot be resolved.
    pub fn resolve<F>(&self, resolve: &F) -> Option<Value>
    where
        F: Fn(&Reference) -> Option<String>,
    {
        Some(match self {
            Value::Ref(r) => Value::Str(resolve(r)?),
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(|v| v.resolve(resolve))
                    .collect::<Option<Vec<_>>>()?,
            ),
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| v.resolve(resolve).map(|v| (k.clone(), v)))
                    .collect::<Option<BTreeMap<_, _>>>()?,
            ),
            Value::Join { separator, parts } => {
                let resolved = parts
                    .iter()
                    .map(|v| v.resolve(resolve))
                    .collect::<Option<Vec<_>>>()?;
                let strings: Option<Vec<&str>> = resolved.iter().map(Value::as_str).collect();
                match strings {
                    Some(strings) => Value::Str(strings.join(separator)),
                    None => Value::Join {
                        separator: separator.clone(),
                        parts: resolved,
                    },
                }
            }
            other => other.clone(),
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Str(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Ref(r)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    #[test]
    fn test_references_are_collected_from_nested_values() {
        let value = Value::map([
            ("VpcId", Value::reference(&id("Vpc"))),
            (
                "SecurityGroupIds",
                Value::List(vec![Value::get_att(&id("Sg"), "GroupId")]),
            ),
            (
                "Password",
                Value::join("", vec![Value::from("{{resolve:"), Value::reference(&id("Secret"))]),
            ),
        ]);

        let targets: Vec<&str> = value.references().iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets.len(), 3);
        assert!(targets.contains(&"Vpc"));
        assert!(targets.contains(&"Sg"));
        assert!(targets.contains(&"Secret"));
    }

    #[test]
    fn test_resolve_collapses_joins() {
        let value = Value::join(
            "",
            vec![
                Value::from("{{resolve:secretsmanager:"),
                Value::reference(&id("Secret")),
                Value::from(":SecretString:password::}}"),
            ],
        );

        let resolved = value
            .resolve(&|r: &Reference| Some(format!("arn:{}", r.target)))
            .unwrap();
        assert_eq!(
            resolved,
            Value::from("{{resolve:secretsmanager:arn:Secret:SecretString:password::}}")
        );
    }

    #[test]
    fn test_resolve_fails_on_unknown_reference() {
        let value = Value::List(vec![Value::reference(&id("Missing"))]);
        assert!(value.resolve(&|_: &Reference| None).is_none());
    }

    #[test]
    fn test_get_att_carries_attribute() {
        let value = Value::get_att(&id("Sg"), "GroupId");
        let reference = value.as_reference().unwrap();
        assert_eq!(reference.attribute.as_deref(), Some("GroupId"));
    }
}
