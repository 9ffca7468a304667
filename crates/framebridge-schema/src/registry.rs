use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::rc::Rc;

use framebridge_envelope::{Payload, MAX_ACTION_LEN};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};
use crate::validator::{ResponseValidator, SchemaValidator, ValidationDone};

const SCHEMA_SUFFIX: &str = ".schema.json";

/// Action-keyed table of response validators.
///
/// Every action a zone sends must have an entry; a reply for an action
/// without one can never be accepted.
pub struct ValidatorRegistry {
    validators: HashMap<String, Rc<dyn ResponseValidator>>,
    config: RegistryConfig,
}

impl ValidatorRegistry {
    /// Create an empty registry with default config.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            validators: HashMap::new(),
            config,
        }
    }

    /// Register any validator for an action, replacing a previous one.
    pub fn register(&mut self, action: impl Into<String>, validator: impl ResponseValidator + 'static) {
        self.register_shared(action, Rc::new(validator));
    }

    pub fn register_shared(&mut self, action: impl Into<String>, validator: Rc<dyn ResponseValidator>) {
        let action = action.into();
        debug!(action = %action, "validator registered");
        self.validators.insert(action, validator);
    }

    /// Compile a JSON Schema string and register it for an action.
    pub fn register_schema(&mut self, action: &str, schema_json: &str) -> Result<()> {
        let schema: Value = serde_json::from_str(schema_json)?;
        self.register_schema_value(action, &schema)
    }

    pub fn register_schema_value(&mut self, action: &str, schema: &Value) -> Result<()> {
        let mut schema_to_compile = schema.clone();
        if self.config.strict_mode {
            apply_strict_mode(&mut schema_to_compile);
        }

        let validator =
            SchemaValidator::compile(action, &schema_to_compile, self.config.apply_defaults)?;
        self.register(action, validator);
        Ok(())
    }

    /// Load `<action>.schema.json` files from a directory.
    pub fn from_directory(path: &Path) -> Result<Self> {
        Self::from_directory_with_config(path, RegistryConfig::default())
    }

    pub fn from_directory_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let mut registry = Self::with_config(config);
        let mut loaded = 0usize;

        let entries = std::fs::read_dir(path)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;

        for entry in entries {
            let entry = entry.map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let Some(stem) = file_name.strip_suffix(SCHEMA_SUFFIX) else {
                continue;
            };

            let entry_path = entry.path();
            let path_metadata = std::fs::symlink_metadata(&entry_path)
                .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            let file_type = path_metadata.file_type();
            if file_type.is_symlink() {
                return Err(SchemaError::LoadFailed(format!(
                    "refusing to load schema symlink: {file_name}"
                )));
            }
            if !file_type.is_file() {
                continue;
            }

            let action = action_from_stem(stem).ok_or_else(|| {
                SchemaError::LoadFailed(format!("unrecognized schema filename: {file_name}"))
            })?;

            loaded = loaded.saturating_add(1);
            if loaded > registry.config.max_schemas_from_directory {
                return Err(SchemaError::LoadFailed(format!(
                    "schema count exceeds configured max ({}): {loaded}",
                    registry.config.max_schemas_from_directory
                )));
            }

            let file = std::fs::File::open(&entry_path).map_err(|err| {
                SchemaError::LoadFailed(format!(
                    "failed opening schema {}: {err}",
                    entry_path.display()
                ))
            })?;
            let opened_metadata = file
                .metadata()
                .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;

            #[cfg(unix)]
            {
                if !same_file_identity(&path_metadata, &opened_metadata) {
                    return Err(SchemaError::LoadFailed(format!(
                        "schema file changed during load: {file_name}"
                    )));
                }
            }

            let max_bytes = registry.config.max_schema_file_size;
            if opened_metadata.len() > max_bytes as u64 {
                return Err(SchemaError::LoadFailed(format!(
                    "schema file too large ({} bytes): {file_name}",
                    opened_metadata.len()
                )));
            }

            let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
            let mut content = String::new();
            file.take(read_limit)
                .read_to_string(&mut content)
                .map_err(|err| {
                    SchemaError::LoadFailed(format!(
                        "failed reading schema {}: {err}",
                        entry_path.display()
                    ))
                })?;
            if content.len() > max_bytes {
                return Err(SchemaError::LoadFailed(format!(
                    "schema file too large while reading: {file_name}"
                )));
            }

            registry.register_schema(action, &content)?;
        }

        Ok(registry)
    }

    /// Build from `(action, schema JSON)` pairs compiled into the binary.
    pub fn from_embedded(schemas: &[(&str, &str)]) -> Result<Self> {
        let mut registry = Self::new();
        for (action, schema) in schemas {
            registry.register_schema(action, schema)?;
        }
        Ok(registry)
    }

    /// Look up the validator for an action.
    pub fn get(&self, action: &str) -> Result<Rc<dyn ResponseValidator>> {
        match self.validators.get(action) {
            Some(validator) => Ok(Rc::clone(validator)),
            None => {
                error!(action, "no validator registered");
                Err(SchemaError::NoValidator(action.to_string()))
            }
        }
    }

    /// Run the action's validator; an unknown action rejects.
    pub fn validate(&self, action: &str, payload: Payload, done: ValidationDone) {
        match self.get(action) {
            Ok(validator) => validator.validate(payload, done),
            Err(err) => done.reject(err.to_string()),
        }
    }

    pub fn has_validator(&self, action: &str) -> bool {
        self.validators.contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("actions", &self.actions())
            .field("config", &self.config)
            .finish()
    }
}

fn action_from_stem(stem: &str) -> Option<&str> {
    let valid = !stem.is_empty()
        && stem.len() <= MAX_ACTION_LEN
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    valid.then_some(stem)
}

const NESTED_MAPS: [&str; 5] = [
    "properties",
    "patternProperties",
    "dependentSchemas",
    "$defs",
    "definitions",
];

const NESTED_SINGLES: [&str; 11] = [
    "propertyNames",
    "additionalProperties",
    "unevaluatedProperties",
    "items",
    "contains",
    "additionalItems",
    "unevaluatedItems",
    "not",
    "if",
    "then",
    "else",
];

const NESTED_LISTS: [&str; 4] = ["prefixItems", "allOf", "anyOf", "oneOf"];

const OBJECT_KEYWORDS: [&str; 8] = [
    "properties",
    "patternProperties",
    "additionalProperties",
    "unevaluatedProperties",
    "required",
    "dependentRequired",
    "dependentSchemas",
    "propertyNames",
];

fn apply_strict_mode(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if is_object_schema(map) && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }

            for key in NESTED_MAPS {
                if let Some(Value::Object(children)) = map.get_mut(key) {
                    children.values_mut().for_each(apply_strict_mode);
                }
            }
            for key in NESTED_SINGLES.iter().chain(NESTED_LISTS.iter()) {
                if let Some(child) = map.get_mut(*key) {
                    apply_strict_mode(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(apply_strict_mode),
        _ => {}
    }
}

fn is_object_schema(map: &Map<String, Value>) -> bool {
    match map.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(kinds)) => kinds.iter().any(|kind| kind == "object"),
        _ => OBJECT_KEYWORDS.iter().any(|keyword| map.contains_key(*keyword)),
    }
}

#[cfg(unix)]
fn same_file_identity(
    path_metadata: &std::fs::Metadata,
    opened_metadata: &std::fs::Metadata,
) -> bool {
    use std::os::unix::fs::MetadataExt;
    path_metadata.dev() == opened_metadata.dev() && path_metadata.ino() == opened_metadata.ino()
}
