//! Reference extraction and resolution.
//!
//! A reference is written inside a string attribute as
//! `${resource_type.logical_name.output_attribute}`. A string made of exactly
//! one reference resolves to the referenced value as-is (any JSON type);
//! references embedded in longer strings are interpolated as text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Matches one `${type.name.attribute}` expression.
#[allow(clippy::expect_used)]
static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-z][a-z0-9_]*)\.([a-z][a-z0-9_-]*)\.([A-Za-z0-9_]+)\}")
        .expect("reference pattern is a valid regex")
});

/// A pointer from an attribute to another resource's output attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Type of the referenced resource.
    pub resource_type: String,
    /// Logical name of the referenced resource.
    pub name: String,
    /// Output attribute read from the referenced resource.
    pub attribute: String,
}

impl Reference {
    /// Creates a new reference.
    #[must_use]
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            attribute: attribute.into(),
        }
    }

    /// Returns the reference as it is written in attribute values.
    #[must_use]
    pub fn expression(&self) -> String {
        format!("${{{self}}}")
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.resource_type, self.name, self.attribute)
    }
}

/// Collects every reference in a value tree, ordered and deduplicated.
#[must_use]
pub fn extract_references(value: &serde_json::Value) -> BTreeSet<Reference> {
    let mut found = BTreeSet::new();
    collect(value, &mut found);
    found
}

fn collect(value: &serde_json::Value, found: &mut BTreeSet<Reference>) {
    match value {
        serde_json::Value::String(text) => {
            for captures in REFERENCE_PATTERN.captures_iter(text) {
                found.insert(Reference::new(&captures[1], &captures[2], &captures[3]));
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect(item, found);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect(item, found);
            }
        }
        _ => {}
    }
}

/// Substitutes every reference in a value tree.
///
/// `lookup` returns the referenced value, or `None` when it is not known yet.
/// The whole result is `None` as soon as one reference is unknown.
pub fn resolve_value<F>(value: &serde_json::Value, lookup: &mut F) -> Option<serde_json::Value>
where
    F: FnMut(&Reference) -> Option<serde_json::Value>,
{
    match value {
        serde_json::Value::String(text) => resolve_string(text, lookup),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, lookup))
            .collect::<Option<Vec<_>>>()
            .map(serde_json::Value::Array),
        serde_json::Value::Object(map) => {
            let mut resolved = serde_json::Map::new();
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(item, lookup)?);
            }
            Some(serde_json::Value::Object(resolved))
        }
        other => Some(other.clone()),
    }
}

fn resolve_string<F>(text: &str, lookup: &mut F) -> Option<serde_json::Value>
where
    F: FnMut(&Reference) -> Option<serde_json::Value>,
{
    let Some(first) = REFERENCE_PATTERN.captures(text) else {
        return Some(serde_json::Value::String(text.to_string()));
    };

    // Whole-string reference keeps the referenced value's type
    if first.get(0).is_some_and(|m| m.start() == 0 && m.end() == text.len()) {
        return lookup(&Reference::new(&first[1], &first[2], &first[3]));
    }

    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for captures in REFERENCE_PATTERN.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        output.push_str(&text[last..whole.start()]);
        let value = lookup(&Reference::new(&captures[1], &captures[2], &captures[3]))?;
        match value {
            serde_json::Value::String(s) => output.push_str(&s),
            other => output.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    output.push_str(&text[last..]);

    Some(serde_json::Value::String(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_nested_references() {
        let value = json!({
            "api": "${api_gateway_api.api.id}",
            "backends": ["https://${function.handler.hostname}/v1", "static"],
            "plain": "api.example.com",
        });
        let refs = extract_references(&value);
        let rendered: Vec<String> = refs.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["api_gateway_api.api.id", "function.handler.hostname"]
        );
    }

    #[test]
    fn test_plain_dotted_string_is_not_a_reference() {
        assert!(extract_references(&json!("api.example.com")).is_empty());
        assert!(extract_references(&json!("a.b.c")).is_empty());
        assert_eq!(extract_references(&json!(["x", {"k": "${a.b.c}"}])).len(), 1);
    }

    #[test]
    fn test_whole_string_reference_keeps_type() {
        let value = json!("${bucket.assets.size}");
        let resolved = resolve_value(&value, &mut |r: &Reference| {
            assert_eq!(r.attribute, "size");
            Some(json!(42))
        });
        assert_eq!(resolved, Some(json!(42)));
    }

    #[test]
    fn test_embedded_reference_interpolates() {
        let value = json!({"url": "https://${gateway.main.hostname}:${gateway.main.port}/"});
        let resolved = resolve_value(&value, &mut |r: &Reference| match r.attribute.as_str() {
            "hostname" => Some(json!("gw.example.net")),
            "port" => Some(json!(8443)),
            _ => None,
        });
        assert_eq!(resolved, Some(json!({"url": "https://gw.example.net:8443/"})));
    }

    #[test]
    fn test_unknown_reference_yields_none() {
        let value = json!(["${a.b.c}", "literal"]);
        assert_eq!(resolve_value(&value, &mut |_: &Reference| None), None);
    }

    #[test]
    fn test_expression_round_trip() {
        let reference = Reference::new("api_gateway_api", "api", "id");
        let refs = extract_references(&json!(reference.expression()));
        assert!(refs.contains(&reference));
    }
}
