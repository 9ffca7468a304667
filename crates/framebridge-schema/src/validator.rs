use std::fmt;

use framebridge_envelope::Payload;
use jsonschema::Validator;
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, SchemaError};
use crate::typecheck::{
    is_domain, is_full_username, is_resource_name, is_url, is_username, is_version_string,
    TypeChecker, TypeExpr,
};

/// Verdict of a response validator.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// The payload is correct as received.
    Accept,
    /// The payload is acceptable once replaced by this normalized form.
    Replace(Payload),
    /// The payload must not reach application code.
    Reject(String),
}

/// One-shot completion handle passed to a validator.
///
/// Consuming methods make a second completion impossible. Dropping the
/// handle without completing rejects the payload.
pub struct ValidationDone {
    action: String,
    sink: Option<Box<dyn FnOnce(Validation)>>,
}

impl ValidationDone {
    pub fn new(action: impl Into<String>, sink: impl FnOnce(Validation) + 'static) -> Self {
        Self {
            action: action.into(),
            sink: Some(Box::new(sink)),
        }
    }

    /// Action whose response is being validated.
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn complete(mut self, verdict: Validation) {
        if let Some(sink) = self.sink.take() {
            sink(verdict);
        }
    }

    pub fn accept(self) {
        self.complete(Validation::Accept);
    }

    pub fn replace(self, payload: Payload) {
        self.complete(Validation::Replace(payload));
    }

    pub fn reject(self, reason: impl Into<String>) {
        self.complete(Validation::Reject(reason.into()));
    }
}

impl Drop for ValidationDone {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            warn!(action = %self.action, "validator dropped its completion; rejecting payload");
            sink(Validation::Reject("validator did not complete".to_string()));
        }
    }
}

impl fmt::Debug for ValidationDone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationDone")
            .field("action", &self.action)
            .field("completed", &self.sink.is_none())
            .finish()
    }
}

/// Checks the payload of a successful reply before it is delivered.
///
/// Implementations may complete `done` later, e.g. after issuing a nested
/// request of their own.
pub trait ResponseValidator {
    fn validate(&self, payload: Payload, done: ValidationDone);
}

impl<F> ResponseValidator for F
where
    F: Fn(Payload, ValidationDone),
{
    fn validate(&self, payload: Payload, done: ValidationDone) {
        self(payload, done)
    }
}

/// Wrap a synchronous check as a validator.
pub fn sync_validator<F>(check: F) -> impl ResponseValidator
where
    F: Fn(&Payload) -> Validation,
{
    move |payload: Payload, done: ValidationDone| done.complete(check(&payload))
}

/// Accepts any object payload. Used for actions whose replies carry no data.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ResponseValidator for AcceptAll {
    fn validate(&self, _payload: Payload, done: ValidationDone) {
        done.accept();
    }
}

/// Validates top-level fields with type expressions and fills defaults for
/// missing optional fields.
#[derive(Debug, Clone, Default)]
pub struct TypeCheckValidator {
    label: String,
    fields: Vec<(String, TypeExpr)>,
    defaults: Vec<(String, Value)>,
}

impl TypeCheckValidator {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Require `name` to match `expr`.
    pub fn field(mut self, name: impl Into<String>, expr: &str) -> Result<Self> {
        self.fields.push((name.into(), expr.parse()?));
        Ok(self)
    }

    /// Allow `name` to be absent, substituting `default`, which must itself
    /// match `expr`.
    pub fn optional(mut self, name: impl Into<String>, expr: &str, default: Value) -> Result<Self> {
        let name = name.into();
        let parsed: TypeExpr = expr.parse()?;
        if !parsed.matches(Some(&default)) {
            return Err(SchemaError::CompileFailed(format!(
                "default for '{name}' does not match {parsed}"
            )));
        }
        self.fields.push((name.clone(), parsed));
        self.defaults.push((name, default));
        Ok(self)
    }

    pub fn verdict(&self, payload: &Payload) -> Validation {
        let mut normalized = None::<Payload>;
        for (name, default) in &self.defaults {
            if !payload.contains_key(name) {
                normalized
                    .get_or_insert_with(|| payload.clone())
                    .insert(name.clone(), default.clone());
            }
        }
        let effective = normalized.as_ref().unwrap_or(payload);

        let exprs: Vec<String> = self.fields.iter().map(|(_, e)| e.to_string()).collect();
        let assertions: Vec<(Option<&Value>, &str)> = self
            .fields
            .iter()
            .zip(&exprs)
            .map(|((name, _), expr)| (effective.get(name), expr.as_str()))
            .collect();

        let mut checker = TypeChecker::new();
        if !checker.check(&assertions, &self.label) {
            let message = checker
                .take_errors()
                .iter()
                .map(|err| {
                    let field = &self.fields[err.index].0;
                    format!("{field}: expected {}, found {}", err.expected, err.found)
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Validation::Reject(message);
        }

        match normalized {
            Some(payload) => Validation::Replace(payload),
            None => Validation::Accept,
        }
    }
}

impl ResponseValidator for TypeCheckValidator {
    fn validate(&self, payload: Payload, done: ValidationDone) {
        done.complete(self.verdict(&payload));
    }
}

/// Validates against a compiled JSON Schema.
///
/// String formats named after the type-check primitives (`domain`,
/// `username`, `full-username`, `resource-name`, `version-string`, `url`)
/// are enforced. With defaults enabled, `default` values declared on
/// top-level properties are filled in before validation.
pub struct SchemaValidator {
    action: String,
    validator: Validator,
    defaults: Payload,
}

impl SchemaValidator {
    pub fn compile(action: impl Into<String>, schema: &Value, apply_defaults: bool) -> Result<Self> {
        let validator = jsonschema::options()
            .should_validate_formats(true)
            .with_format("domain", is_domain)
            .with_format("username", is_username)
            .with_format("full-username", is_full_username)
            .with_format("resource-name", is_resource_name)
            .with_format("version-string", is_version_string)
            .with_format("url", is_url)
            .build(schema)
            .map_err(|err| SchemaError::CompileFailed(err.to_string()))?;

        let defaults = if apply_defaults {
            top_level_defaults(schema)
        } else {
            Payload::new()
        };

        Ok(Self {
            action: action.into(),
            validator,
            defaults,
        })
    }

    pub fn verdict(&self, payload: &Payload) -> Validation {
        let mut normalized = None::<Payload>;
        for (name, default) in &self.defaults {
            if !payload.contains_key(name) {
                normalized
                    .get_or_insert_with(|| payload.clone())
                    .insert(name.clone(), default.clone());
            }
        }

        let value = Value::Object(normalized.clone().unwrap_or_else(|| payload.clone()));
        if let Err(err) = validate_value(&self.action, &value, &self.validator) {
            return Validation::Reject(err.to_string());
        }

        match normalized {
            Some(payload) => Validation::Replace(payload),
            None => Validation::Accept,
        }
    }
}

impl ResponseValidator for SchemaValidator {
    fn validate(&self, payload: Payload, done: ValidationDone) {
        done.complete(self.verdict(&payload));
    }
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("action", &self.action)
            .field("defaults", &self.defaults)
            .finish()
    }
}

pub(crate) fn validate_value(action: &str, value: &Value, validator: &Validator) -> Result<()> {
    let mut errors = validator.iter_errors(value);
    if let Some(first) = errors.next() {
        let mut message = first.to_string();
        for err in errors.take(3) {
            message.push_str("; ");
            message.push_str(&err.to_string());
        }
        return Err(SchemaError::ValidationFailed {
            action: action.to_string(),
            message,
        });
    }

    Ok(())
}

fn top_level_defaults(schema: &Value) -> Payload {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .filter_map(|(name, property)| {
                    property
                        .get("default")
                        .map(|default| (name.clone(), default.clone()))
                })
                .collect()
        })
        .unwrap_or_default()
}
