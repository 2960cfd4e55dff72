//! Validation utilities.

use crate::{FieldError, KestrelError};
use validator::{Validate, ValidationErrors};

/// Extension trait for validation.
pub trait ValidateExt: Validate {
    /// Validates the struct and returns a `KestrelError` on failure.
    fn validate_config(&self) -> Result<(), KestrelError> {
        self.validate().map_err(validation_errors_to_kestrel_error)
    }
}

impl<T: Validate> ValidateExt for T {}

/// Flattens `validator::ValidationErrors` into field errors, nested structs
/// reported with a dotted path.
#[must_use]
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out = Vec::new();
    collect_field_errors("", errors, &mut out);
    out
}

fn collect_field_errors(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            (*field).to_string()
        } else {
            format!("{}.{}", prefix, field)
        };

        match kind {
            validator::ValidationErrorsKind::Field(errs) => {
                out.extend(errs.iter().map(|error| FieldError {
                    field: path.clone(),
                    message: error
                        .message
                        .as_ref()
                        .map_or_else(|| error.code.to_string(), |m| m.to_string()),
                    code: error.code.to_string(),
                }));
            }
            validator::ValidationErrorsKind::Struct(inner) => {
                collect_field_errors(&path, inner, out);
            }
            validator::ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_field_errors(&format!("{}[{}]", path, index), inner, out);
                }
            }
        }
    }
}

/// Converts `validator::ValidationErrors` to `KestrelError`.
#[must_use]
pub fn validation_errors_to_kestrel_error(errors: ValidationErrors) -> KestrelError {
    let mut fields = field_errors(&errors);
    fields.sort_by(|a, b| a.field.cmp(&b.field));

    let message = fields
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ");

    KestrelError::Validation(message)
}

/// Common validation functions.
pub mod rules {
    use validator::ValidationError;

    /// Validates that a string is not blank (not empty after trimming).
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("not_blank"));
        }
        Ok(())
    }

    /// Validates a log filter directive list such as `info,kestrel_queue=debug`.
    pub fn log_directives(value: &str) -> Result<(), ValidationError> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

        if value.trim().is_empty() {
            return Err(ValidationError::new("log_directives_empty"));
        }

        for directive in value.split(',') {
            let level = directive.rsplit('=').next().unwrap_or_default().trim();
            if !LEVELS.contains(&level.to_lowercase().as_str()) {
                return Err(ValidationError::new("log_level_invalid"));
            }
        }
        Ok(())
    }
}
