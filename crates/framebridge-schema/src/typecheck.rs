//! Value-shape assertions with accumulated error reporting.
//!
//! A type expression is one or more primitive names joined by `|`; a value
//! passes when it matches any of them. Absent values are `undefined`.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use url::Url;

use crate::error::SchemaError;

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;
const MAX_USERNAME_LEN: usize = 128;
const MAX_RESOURCE_NAME_LEN: usize = 128;
const LATEST: &str = "latest";

/// A primitive type name usable in a type expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    String,
    Object,
    Array,
    Number,
    Boolean,
    Null,
    Undefined,
    UnsignedInt,
    SignedInt,
    Url,
    Domain,
    Username,
    FullUsername,
    ResourceName,
    ResourceObject,
    User,
    VersionString,
    VersionObject,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::String => "string",
            Primitive::Object => "object",
            Primitive::Array => "array",
            Primitive::Number => "number",
            Primitive::Boolean => "boolean",
            Primitive::Null => "null",
            Primitive::Undefined => "undefined",
            Primitive::UnsignedInt => "uint",
            Primitive::SignedInt => "int",
            Primitive::Url => "url",
            Primitive::Domain => "domain",
            Primitive::Username => "username",
            Primitive::FullUsername => "full-username",
            Primitive::ResourceName => "resource-name",
            Primitive::ResourceObject => "resource-object",
            Primitive::User => "user",
            Primitive::VersionString => "version-string",
            Primitive::VersionObject => "version-object",
        }
    }

    /// Whether `value` (`None` = absent) has this shape.
    pub fn matches(self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return self == Primitive::Undefined;
        };
        match self {
            Primitive::String => value.is_string(),
            Primitive::Object => value.is_object(),
            Primitive::Array => value.is_array(),
            Primitive::Number => value.is_number(),
            Primitive::Boolean => value.is_boolean(),
            Primitive::Null => value.is_null(),
            Primitive::Undefined => false,
            Primitive::UnsignedInt => value.as_u64().is_some(),
            Primitive::SignedInt => value.as_i64().is_some() || value.as_u64().is_some(),
            Primitive::Url => value.as_str().is_some_and(is_url),
            Primitive::Domain => value.as_str().is_some_and(is_domain),
            Primitive::Username => value.as_str().is_some_and(is_username),
            Primitive::FullUsername => value.as_str().is_some_and(is_full_username),
            Primitive::ResourceName => value.as_str().is_some_and(is_resource_name),
            Primitive::ResourceObject => is_resource_object(value),
            Primitive::User => is_user(value),
            Primitive::VersionString => value.as_str().is_some_and(is_version_string),
            Primitive::VersionObject => is_version_object(value),
        }
    }
}

impl FromStr for Primitive {
    type Err = SchemaError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let primitive = match name.trim() {
            "string" => Primitive::String,
            "object" => Primitive::Object,
            "array" => Primitive::Array,
            "number" => Primitive::Number,
            "boolean" => Primitive::Boolean,
            "null" => Primitive::Null,
            "undefined" => Primitive::Undefined,
            "uint" | "unsigned-int" => Primitive::UnsignedInt,
            "int" | "signed-int" => Primitive::SignedInt,
            "url" => Primitive::Url,
            "domain" => Primitive::Domain,
            "username" => Primitive::Username,
            "full-username" => Primitive::FullUsername,
            "resource-name" => Primitive::ResourceName,
            "resource-object" => Primitive::ResourceObject,
            "user" => Primitive::User,
            "version-string" => Primitive::VersionString,
            "version-object" => Primitive::VersionObject,
            other => return Err(SchemaError::UnknownType(other.to_string())),
        };
        Ok(primitive)
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed `a|b|c` type expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeExpr(Vec<Primitive>);

impl TypeExpr {
    pub fn matches(&self, value: Option<&Value>) -> bool {
        self.0.iter().any(|primitive| primitive.matches(value))
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.0
    }
}

impl FromStr for TypeExpr {
    type Err = SchemaError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let primitives = expr
            .split('|')
            .map(str::parse)
            .collect::<Result<Vec<Primitive>, _>>()?;
        Ok(Self(primitives))
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|p| p.name()).collect();
        f.write_str(&names.join("|"))
    }
}

/// One failed assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeCheckError {
    /// Label passed to [`TypeChecker::check`].
    pub context: String,
    /// Position of the failing pair in the assertion list.
    pub index: usize,
    /// The type expression as written.
    pub expected: String,
    /// Short description of the actual value.
    pub found: String,
}

impl fmt::Display for TypeCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: assertion {} expected {}, found {}",
            self.context, self.index, self.expected, self.found
        )
    }
}

/// Runs type assertions and keeps every failure for later inspection.
#[derive(Debug, Default)]
pub struct TypeChecker {
    errors: Vec<TypeCheckError>,
}

impl TypeChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check all pairs. Returns true only if every pair passes; each failing
    /// pair is appended to the error buffer.
    pub fn check(&mut self, assertions: &[(Option<&Value>, &str)], context: &str) -> bool {
        let mut ok = true;
        for (index, (value, expr)) in assertions.iter().enumerate() {
            let passed = match expr.parse::<TypeExpr>() {
                Ok(parsed) => parsed.matches(*value),
                Err(err) => {
                    tracing::error!(context, expr, error = %err, "bad type expression");
                    false
                }
            };
            if !passed {
                ok = false;
                self.errors.push(TypeCheckError {
                    context: context.to_string(),
                    index,
                    expected: (*expr).to_string(),
                    found: describe(*value),
                });
            }
        }
        ok
    }

    /// Same as [`check`](Self::check) without touching the error buffer.
    pub fn probe(&self, assertions: &[(Option<&Value>, &str)]) -> bool {
        assertions.iter().all(|(value, expr)| {
            expr.parse::<TypeExpr>()
                .is_ok_and(|parsed| parsed.matches(*value))
        })
    }

    pub fn errors(&self) -> &[TypeCheckError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Drain the error buffer.
    pub fn take_errors(&mut self) -> Vec<TypeCheckError> {
        std::mem::take(&mut self.errors)
    }
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => format!("boolean {b}"),
        Some(Value::Number(n)) => format!("number {n}"),
        Some(Value::String(s)) if s.len() <= 32 => format!("string {s:?}"),
        Some(Value::String(s)) => format!("string of {} bytes", s.len()),
        Some(Value::Array(items)) => format!("array of {}", items.len()),
        Some(Value::Object(map)) => format!("object with {} keys", map.len()),
    }
}

/// Absolute http or https URL.
pub fn is_url(input: &str) -> bool {
    Url::parse(input).is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
}

/// Host name with an optional `:port`.
pub fn is_domain(input: &str) -> bool {
    let host = match input.rsplit_once(':') {
        Some((host, port)) => {
            if port.is_empty() || port.parse::<u16>().is_err() {
                return false;
            }
            host
        }
        None => input,
    };
    if host.is_empty() || host.len() > MAX_DOMAIN_LEN {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

pub fn is_username(input: &str) -> bool {
    !input.is_empty()
        && input.len() <= MAX_USERNAME_LEN
        && !input.starts_with('.')
        && input
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

/// `domain/username`.
pub fn is_full_username(input: &str) -> bool {
    input
        .split_once('/')
        .is_some_and(|(domain, username)| is_domain(domain) && is_username(username))
}

pub fn is_resource_name(input: &str) -> bool {
    !input.trim().is_empty()
        && input.chars().count() <= MAX_RESOURCE_NAME_LEN
        && !input.contains('/')
        && !input.chars().any(char::is_control)
}

/// `major/minor/patch`, each part an unsigned integer or `latest`.
pub fn is_version_string(input: &str) -> bool {
    let parts: Vec<&str> = input.split('/').collect();
    parts.len() == 3 && parts.iter().all(|part| is_version_part_str(part))
}

fn is_version_part_str(part: &str) -> bool {
    part == LATEST || (!part.is_empty() && part.parse::<u64>().is_ok())
}

fn is_version_part(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => s == LATEST,
        Some(other) => other.as_u64().is_some(),
        None => false,
    }
}

fn is_version_object(value: &Value) -> bool {
    value.as_object().is_some_and(|map| {
        ["major", "minor", "patch"]
            .iter()
            .all(|key| is_version_part(map.get(*key)))
    })
}

fn is_user(value: &Value) -> bool {
    value.as_object().is_some_and(|map| {
        map.get("domain").and_then(Value::as_str).is_some_and(is_domain)
            && map
                .get("username")
                .and_then(Value::as_str)
                .is_some_and(is_username)
    })
}

fn is_resource_object(value: &Value) -> bool {
    let Some(map) = value.as_object() else {
        return false;
    };
    let version_ok = match map.get("version") {
        Some(Value::String(s)) => is_version_string(s),
        Some(other) => is_version_object(other),
        None => false,
    };
    is_user(value)
        && map
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(is_resource_name)
        && version_ok
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn union_expressions_match_any_member() {
        let mut checker = TypeChecker::new();
        let value = json!(null);
        assert!(checker.check(&[(Some(&value), "string|null")], "union"));
        assert!(checker.check(&[(None, "uint|undefined")], "union"));
        assert!(!checker.has_errors());
    }

    #[test]
    fn failures_accumulate_across_calls() {
        let mut checker = TypeChecker::new();
        let name = json!(42);
        let count = json!(-1);
        let ok = json!("fine");

        assert!(!checker.check(
            &[(Some(&name), "string"), (Some(&ok), "string"), (Some(&count), "uint")],
            "first",
        ));
        assert!(!checker.check(&[(None, "object")], "second"));

        let errors = checker.errors();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].index, 0);
        assert_eq!(errors[0].found, "number 42");
        assert_eq!(errors[1].expected, "uint");
        assert_eq!(errors[2].context, "second");
        assert_eq!(errors[2].found, "undefined");
        assert_eq!(
            errors[2].to_string(),
            "second: assertion 0 expected object, found undefined"
        );

        assert_eq!(checker.take_errors().len(), 3);
        assert!(!checker.has_errors());
    }

    #[test]
    fn probe_has_no_side_effects() {
        let checker = TypeChecker::new();
        let value = json!("x");
        assert!(!checker.probe(&[(Some(&value), "uint")]));
        assert!(checker.probe(&[(Some(&value), "string")]));
        assert!(checker.errors().is_empty());
    }

    #[test]
    fn unknown_primitive_fails_the_pair() {
        let mut checker = TypeChecker::new();
        let value = json!("x");
        assert!(!checker.check(&[(Some(&value), "string|bogus")], "ctx"));
        assert_eq!(checker.errors().len(), 1);
        assert!(matches!(
            "bogus".parse::<Primitive>(),
            Err(SchemaError::UnknownType(_))
        ));
    }

    #[test]
    fn integer_primitives() {
        assert!(Primitive::UnsignedInt.matches(Some(&json!(0))));
        assert!(!Primitive::UnsignedInt.matches(Some(&json!(-3))));
        assert!(!Primitive::UnsignedInt.matches(Some(&json!(1.5))));
        assert!(Primitive::SignedInt.matches(Some(&json!(-3))));
        assert!(Primitive::SignedInt.matches(Some(&json!(u64::MAX))));
        assert!(!Primitive::SignedInt.matches(Some(&json!("3"))));
        assert!("unsigned-int|signed-int".parse::<TypeExpr>().is_ok());
    }

    #[test]
    fn domain_and_usernames() {
        assert!(is_domain("example.org"));
        assert!(is_domain("localhost:8080"));
        assert!(!is_domain("-bad.example"));
        assert!(!is_domain("example..org"));
        assert!(!is_domain("example.org:"));
        assert!(!is_domain("exa mple.org"));

        assert!(is_username("alice_01"));
        assert!(!is_username(".hidden"));
        assert!(!is_username("a/b"));
        assert!(is_full_username("example.org/alice"));
        assert!(!is_full_username("alice"));
    }

    #[test]
    fn urls_require_http_scheme() {
        assert!(is_url("https://example.org/path?q=1"));
        assert!(!is_url("ftp://example.org"));
        assert!(!is_url("example.org"));
    }

    #[test]
    fn versions_and_resources() {
        assert!(is_version_string("1/0/12"));
        assert!(is_version_string("latest/latest/latest"));
        assert!(!is_version_string("1/0"));
        assert!(!is_version_string("1/x/0"));

        let resource = json!({
            "domain": "example.org",
            "username": "alice",
            "name": "news stream",
            "version": {"major": 1, "minor": "latest", "patch": 0}
        });
        assert!(Primitive::ResourceObject.matches(Some(&resource)));
        assert!(Primitive::User.matches(Some(&resource)));

        let bad_version = json!({
            "domain": "example.org",
            "username": "alice",
            "name": "news",
            "version": "1/0"
        });
        assert!(!Primitive::ResourceObject.matches(Some(&bad_version)));
        assert!(!is_resource_name("  "));
        assert!(!is_resource_name("a/b"));
    }

    #[test]
    fn inputs_are_not_mutated() {
        let mut checker = TypeChecker::new();
        let value = json!({"domain": "example.org", "username": "bob"});
        let before = value.clone();
        checker.check(&[(Some(&value), "user")], "immutability");
        assert_eq!(value, before);
    }
}
