//! Request body validation
//!
//! [`ValidatedJson`] deserializes a JSON body and runs its `validator` rules
//! before the handler sees it. Malformed JSON becomes `AppError::InvalidPayload`;
//! rule failures become `AppError::Validation` with one entry per field.

use std::collections::BTreeMap;

use abundance_core::{Role, SubscriptionStatus};
use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::AppError;

/// JSON body that has passed its validation rules
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                tracing::debug!(error = %rejection, "rejected request body");
                AppError::InvalidPayload
            })?;

        value.validate()?;
        Ok(ValidatedJson(value))
    }
}

/// Same rules as [`ValidatedJson`] for a body the handler has already buffered
///
/// Used where a check must run before the body is looked at.
pub fn parse_validated<T>(body: &[u8]) -> Result<T, AppError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "rejected request body");
        AppError::InvalidPayload
    })?;

    value.validate()?;
    Ok(value)
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::Validation(invalid_fields(&errors))
    }
}

/// Flatten validator errors into `field -> "Validation failed on the '<rule>' tag"`
pub fn invalid_fields(errors: &ValidationErrors) -> BTreeMap<String, String> {
    errors
        .field_errors()
        .into_iter()
        .filter_map(|(field, errs)| {
            errs.first().map(|err| {
                (
                    field.to_string(),
                    format!("Validation failed on the '{}' tag", err.code),
                )
            })
        })
        .collect()
}

/// Non-empty after trimming
pub fn validate_required(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required"));
    }
    Ok(())
}

/// One of the known role names
pub fn validate_role(value: &str) -> Result<(), ValidationError> {
    validate_required(value)?;
    value
        .parse::<Role>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("role"))
}

/// One of the known subscription states
pub fn validate_subscription(value: &str) -> Result<(), ValidationError> {
    validate_required(value)?;
    value
        .parse::<SubscriptionStatus>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("subscription"))
}

/// Key used for per-email limits and lookups
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Validate)]
    struct Probe {
        #[validate(email)]
        email: String,
        #[validate(custom(function = "validate_role"))]
        role: String,
        #[validate(length(min = 3, max = 20))]
        password: String,
    }

    #[test]
    fn test_invalid_fields_shape() {
        let probe = Probe {
            email: "not-an-email".to_string(),
            role: "admin".to_string(),
            password: "ok-password".to_string(),
        };

        let fields = invalid_fields(&probe.validate().unwrap_err());
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["email"], "Validation failed on the 'email' tag");
        assert_eq!(fields["role"], "Validation failed on the 'role' tag");
    }

    #[test]
    fn test_empty_role_is_required() {
        let probe = Probe {
            email: "a@example.com".to_string(),
            role: "  ".to_string(),
            password: "abc".to_string(),
        };

        let fields = invalid_fields(&probe.validate().unwrap_err());
        assert_eq!(fields["role"], "Validation failed on the 'required' tag");
    }

    #[test]
    fn test_subscription_names() {
        assert!(validate_subscription("Pending").is_ok());
        assert!(validate_subscription("pending").is_err());
        assert!(validate_subscription("").is_err());
    }

    #[test]
    fn test_parse_validated() {
        let ok: Probe = parse_validated(
            br#"{"email":"a@example.com","role":"nutritionist","password":"abcd"}"#,
        )
        .unwrap();
        assert_eq!(ok.role, "nutritionist");

        assert!(matches!(
            parse_validated::<Probe>(b"{not json"),
            Err(AppError::InvalidPayload)
        ));
        assert!(matches!(
            parse_validated::<Probe>(br#"{"email":"x","role":"free_user","password":"abcd"}"#),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Jane@Example.COM "), "jane@example.com");
    }
}
