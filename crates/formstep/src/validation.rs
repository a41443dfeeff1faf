//! Validation of the currently visible step.
//!
//! The host form owns validation. The controller only asks
//! [`ValidationProvider::validate_current_form`] before a `Next` transition and
//! advances when the returned report has no errors.

use std::future::Future;

use async_trait::async_trait;

/// A validation error with message and optional field identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The error message.
    pub message: String,
    /// Optional field path for highlighting.
    pub field: Option<String>,
}

impl ValidationError {
    /// Create a validation error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific field.
    pub fn with_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// The outcome of validating the current form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    errors: Vec<ValidationError>,
}

impl ValidationReport {
    /// A report with no errors.
    pub fn valid() -> Self {
        Self::default()
    }

    /// A report with a single error message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::with_errors(vec![ValidationError::new(message)])
    }

    /// A report with a single field error.
    pub fn field_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_errors(vec![ValidationError::with_field(field, message)])
    }

    /// A report with the given errors.
    pub fn with_errors(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }

    /// True when there are no errors.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The validation errors.
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Get the first error message, if any.
    pub fn first_error_message(&self) -> Option<&str> {
        self.errors.first().map(|e| e.message.as_str())
    }

    /// Add an error to the report.
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
    }
}

impl FromIterator<ValidationError> for ValidationReport {
    fn from_iter<I: IntoIterator<Item = ValidationError>>(iter: I) -> Self {
        Self::with_errors(iter.into_iter().collect())
    }
}

/// Host-supplied asynchronous check of the current field values.
#[async_trait]
pub trait ValidationProvider: Send + Sync {
    /// Validate the fields that are currently visible.
    async fn validate_current_form(&self) -> ValidationReport;
}

/// A provider that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysValid;

#[async_trait]
impl ValidationProvider for AlwaysValid {
    async fn validate_current_form(&self) -> ValidationReport {
        ValidationReport::valid()
    }
}

/// A provider backed by a closure returning a future.
///
/// Created by [`validator_fn`].
pub struct FnValidator<F> {
    f: F,
}

/// Wrap a closure as a [`ValidationProvider`].
///
/// ```
/// use formstep::validation::{validator_fn, ValidationReport};
///
/// let provider = validator_fn(|| async { ValidationReport::invalid("name is required") });
/// # let _ = provider;
/// ```
pub fn validator_fn<F, Fut>(f: F) -> FnValidator<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ValidationReport> + Send + 'static,
{
    FnValidator { f }
}

#[async_trait]
impl<F, Fut> ValidationProvider for FnValidator<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ValidationReport> + Send + 'static,
{
    async fn validate_current_form(&self) -> ValidationReport {
        (self.f)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_report() {
        let valid = ValidationReport::valid();
        assert!(valid.is_valid());
        assert!(valid.errors().is_empty());

        let invalid = ValidationReport::invalid("Error message");
        assert!(!invalid.is_valid());
        assert_eq!(invalid.first_error_message(), Some("Error message"));

        let field_error = ValidationReport::field_error("email", "Invalid email");
        assert!(!field_error.is_valid());
        assert_eq!(field_error.errors()[0].field, Some("email".to_string()));
        assert_eq!(field_error.errors()[0].to_string(), "email: Invalid email");
    }

    #[test]
    fn test_merge_reports() {
        let mut report = ValidationReport::valid();
        report.merge(ValidationReport::invalid("a"));
        report.add_error(ValidationError::new("b"));

        assert!(!report.is_valid());
        assert_eq!(report.errors().len(), 2);
    }

    #[tokio::test]
    async fn test_closure_provider() {
        let provider = validator_fn(|| async { ValidationReport::invalid("required") });
        let report = provider.validate_current_form().await;
        assert_eq!(report.first_error_message(), Some("required"));

        assert!(AlwaysValid.validate_current_form().await.is_valid());
    }
}
