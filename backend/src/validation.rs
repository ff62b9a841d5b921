//! Request validation for the Groundwork workflow API
//!
//! Request bodies derive `validator::Validate`; this module turns the
//! validator's report into the standard error envelope.

use std::collections::HashMap;

use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::AppError;

/// Validation result type
pub type ValidationResult<T> = Result<T, AppError>;

/// Validated wrapper type - indicates the value has been validated
#[derive(Debug, Clone)]
pub struct Validated<T>(pub T);

impl<T> Validated<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::ops::Deref for Validated<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Run the derived validation rules on a request body
pub fn validate<T: Validate>(value: T) -> ValidationResult<Validated<T>> {
    value.validate().map_err(AppError::from)?;
    Ok(Validated(value))
}

/// Flatten validator errors into `field -> messages`, nested fields joined with dots
fn collect(prefix: &str, errors: &ValidationErrors, details: &mut HashMap<String, Vec<String>>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                let messages = details.entry(path.clone()).or_default();
                for error in field_errors {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid ({})", path, error.code));
                    messages.push(message);
                }
            }
            ValidationErrorsKind::Struct(nested) => collect(&path, nested, details),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect(&format!("{}.{}", path, index), nested, details);
                }
            }
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let mut details = HashMap::new();
        collect("", &errors, &mut details);
        AppError::ValidationError { details }
    }
}
