use framebridge_schema::{TypeChecker, TypeExpr};
use serde::Serialize;
use serde_json::Value;

use crate::cmd::CheckArgs;
use crate::exit::{schema_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Debug, Serialize)]
struct CheckReport {
    label: String,
    expr: String,
    passed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

/// Exits with [`DATA_INVALID`] when the value does not match.
pub fn run(args: CheckArgs, format: OutputFormat) -> CliResult<i32> {
    // Unknown primitives are a usage error.
    let expr: TypeExpr = args
        .expr
        .parse()
        .map_err(|err| schema_error("invalid type expression", err))?;
    let value = match args.value.as_deref() {
        Some(raw) => Some(
            serde_json::from_str::<Value>(raw)
                .map_err(|err| CliError::usage(format!("value is not valid JSON: {err}")))?,
        ),
        None => None,
    };

    let mut checker = TypeChecker::new();
    let passed = checker.check(&[(value.as_ref(), args.expr.as_str())], &args.label);
    let report = CheckReport {
        label: args.label,
        expr: expr.to_string(),
        passed,
        errors: checker
            .take_errors()
            .iter()
            .map(ToString::to_string)
            .collect(),
    };
    print_record(&report, format);
    Ok(if passed { SUCCESS } else { DATA_INVALID })
}
