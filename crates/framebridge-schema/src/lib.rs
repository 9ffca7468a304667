//! Response validation for framebridge replies.
//!
//! Every successful reply passes through the validator registered for its
//! action before application code sees it. Validators are built from
//! closures, from type-check rules, or from JSON Schema documents.

pub mod config;
pub mod error;
pub mod registry;
pub mod typecheck;
pub mod validator;

pub use config::RegistryConfig;
pub use error::{Result, SchemaError};
pub use registry::ValidatorRegistry;
pub use typecheck::{Primitive, TypeCheckError, TypeChecker, TypeExpr};
pub use validator::{
    sync_validator, AcceptAll, ResponseValidator, SchemaValidator, TypeCheckValidator, Validation,
    ValidationDone,
};
