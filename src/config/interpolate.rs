//! `${...}` references inside string inputs.
//!
//! Two forms are recognized:
//! - `${name.output}` reads an output of another declared resource and makes
//!   the holder depend on it;
//! - `${project}`, `${stack}` and `${prefix}` read stack variables.
//!
//! A string that consists of exactly one reference is replaced by the
//! referenced value with its JSON type intact. References embedded in longer
//! strings are rendered as text. An unterminated `${` is kept literally.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::state::PropertyMap;

/// A single `${...}` token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reference {
    /// `${name.output}`.
    Output {
        /// Logical name of the referenced resource.
        resource: String,
        /// Output key.
        output: String,
    },
    /// `${variable}`.
    Variable(String),
}

/// Resolves references against variables and dependency outputs.
#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    variables: BTreeMap<String, String>,
    outputs: BTreeMap<String, PropertyMap>,
}

impl Reference {
    fn parse(token: &str) -> Self {
        match token.split_once('.') {
            Some((resource, output)) => Self::Output {
                resource: resource.trim().to_string(),
                output: output.trim().to_string(),
            },
            None => Self::Variable(token.trim().to_string()),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Output { resource, output } => write!(f, "${{{resource}.{output}}}"),
            Self::Variable(name) => write!(f, "${{{name}}}"),
        }
    }
}

/// Splits a string into literal and reference segments.
fn segments(s: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        if start > 0 {
            out.push(Segment::Literal(&rest[..start]));
        }
        out.push(Segment::Reference(Reference::parse(&rest[start + 2..start + 2 + len])));
        rest = &rest[start + 2 + len + 1..];
    }

    if !rest.is_empty() {
        out.push(Segment::Literal(rest));
    }
    out
}

enum Segment<'a> {
    Literal(&'a str),
    Reference(Reference),
}

/// Collects every reference found in a value, recursing into arrays and objects.
#[must_use]
pub fn references(value: &Value) -> Vec<Reference> {
    let mut found = Vec::new();
    collect(value, &mut found);
    found
}

fn collect(value: &Value, found: &mut Vec<Reference>) {
    match value {
        Value::String(s) => {
            for segment in segments(s) {
                if let Segment::Reference(reference) = segment {
                    found.push(reference);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect(v, found)),
        _ => {}
    }
}

/// Returns the logical names referenced by `${name.output}` tokens in a property map.
#[must_use]
pub fn referenced_resources(properties: &PropertyMap) -> Vec<String> {
    let mut names: Vec<String> = properties
        .values()
        .flat_map(references)
        .filter_map(|r| match r {
            Reference::Output { resource, .. } => Some(resource),
            Reference::Variable(_) => None,
        })
        .collect();
    names.sort();
    names.dedup();
    names
}

impl Interpolator {
    /// Creates an interpolator with the given stack variables.
    #[must_use]
    pub const fn new(variables: BTreeMap<String, String>) -> Self {
        Self {
            variables,
            outputs: BTreeMap::new(),
        }
    }

    /// Registers the outputs of a resource.
    pub fn add_outputs(&mut self, resource: impl Into<String>, outputs: PropertyMap) {
        self.outputs.insert(resource.into(), outputs);
    }

    /// Resolves every reference in a property map.
    ///
    /// # Errors
    ///
    /// Returns the first reference that cannot be resolved.
    pub fn resolve_properties(&self, properties: &PropertyMap) -> Result<PropertyMap, Reference> {
        properties
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.resolve(value)?)))
            .collect()
    }

    /// Resolves every reference in a value.
    ///
    /// # Errors
    ///
    /// Returns the first reference that cannot be resolved.
    pub fn resolve(&self, value: &Value) -> Result<Value, Reference> {
        match value {
            Value::String(s) => self.resolve_str(s),
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve(v)?)))
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    fn resolve_str(&self, s: &str) -> Result<Value, Reference> {
        let mut parts = segments(s);

        if parts.len() == 1 {
            if let Some(Segment::Reference(reference)) = parts.pop() {
                return self.lookup(&reference);
            }
            return Ok(Value::String(s.to_string()));
        }

        let mut rendered = String::with_capacity(s.len());
        for part in parts {
            match part {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Reference(reference) => match self.lookup(&reference)? {
                    Value::String(text) => rendered.push_str(&text),
                    other => rendered.push_str(&other.to_string()),
                },
            }
        }
        Ok(Value::String(rendered))
    }

    fn lookup(&self, reference: &Reference) -> Result<Value, Reference> {
        let found = match reference {
            Reference::Output { resource, output } => self
                .outputs
                .get(resource)
                .and_then(|outputs| outputs.get(output))
                .cloned(),
            Reference::Variable(name) => self.variables.get(name).cloned().map(Value::String),
        };
        found.ok_or_else(|| reference.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn interpolator() -> Interpolator {
        let mut vars = BTreeMap::new();
        vars.insert(String::from("project"), String::from("demo02"));
        vars.insert(String::from("stack"), String::from("dev"));

        let mut interpolator = Interpolator::new(vars);
        let mut outputs = PropertyMap::new();
        outputs.insert(String::from("accountName"), json!("demo02sa"));
        outputs.insert(String::from("files"), json!(["index.html", "404.html"]));
        interpolator.add_outputs("site", outputs);
        interpolator
    }

    #[test]
    fn test_finds_references_in_nested_values() {
        let value = json!({
            "a": "${site.accountName}",
            "b": ["x-${stack}", {"c": "${other.id}"}],
        });

        let refs = references(&value);
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&Reference::Variable(String::from("stack"))));
        assert!(refs.contains(&Reference::Output {
            resource: String::from("other"),
            output: String::from("id"),
        }));
    }

    #[test]
    fn test_whole_string_reference_keeps_type() {
        let resolved = interpolator()
            .resolve(&json!("${site.files}"))
            .expect("resolvable");
        assert_eq!(resolved, json!(["index.html", "404.html"]));
    }

    #[test]
    fn test_embedded_references_render_as_text() {
        let resolved = interpolator()
            .resolve(&json!("${project}-${stack}: ${site.accountName}"))
            .expect("resolvable");
        assert_eq!(resolved, json!("demo02-dev: demo02sa"));
    }

    #[test]
    fn test_unresolved_reference_is_reported() {
        let err = interpolator()
            .resolve(&json!("${site.missing}"))
            .expect_err("missing output");
        assert_eq!(err.to_string(), "${site.missing}");
    }

    #[test]
    fn test_unterminated_reference_is_literal() {
        let resolved = interpolator().resolve(&json!("cost: ${5")).expect("literal");
        assert_eq!(resolved, json!("cost: ${5"));
    }

    #[test]
    fn test_referenced_resources_are_deduplicated() {
        let mut props = PropertyMap::new();
        props.insert(String::from("a"), json!("${site.accountName}"));
        props.insert(String::from("b"), json!("${site.files} ${project}"));

        assert_eq!(referenced_resources(&props), vec![String::from("site")]);
    }
}
