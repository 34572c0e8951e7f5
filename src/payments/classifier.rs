//! Maps raw provider/backend/transport errors into the user-facing taxonomy.
//!
//! Pure functions, no side effects. The classification governs both payment
//! element and settlement retry decisions: only `retryable = true` failures
//! are ever retried automatically.

use serde::Serialize;

use super::provider::{ProviderError, ProviderErrorKind};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Provider,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

/// Pipeline step a failure surfaced from; tailors the user guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureContext {
    CartValidation,
    IntentCreation,
    Linking,
    Confirmation,
    Settlement,
}

/// User-facing payment failure. `message` and `user_action` are plain
/// language; diagnostic detail stays in logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentError {
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub user_action: String,
}

impl PaymentError {
    pub fn validation(message: impl Into<String>, user_action: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category: ErrorCategory::Validation,
            severity: ErrorSeverity::Low,
            retryable: false,
            user_action: user_action.into(),
        }
    }

    pub fn provider(
        message: impl Into<String>,
        retryable: bool,
        user_action: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            category: ErrorCategory::Provider,
            severity: ErrorSeverity::Medium,
            retryable,
            user_action: user_action.into(),
        }
    }

    pub fn system(
        message: impl Into<String>,
        severity: ErrorSeverity,
        retryable: bool,
        user_action: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            category: ErrorCategory::System,
            severity,
            retryable,
            user_action: user_action.into(),
        }
    }
}

/// Classifies a raw failure. Unknown errors default to a retryable system
/// failure: failing open toward another attempt beats stranding the user.
pub fn classify(raw: &ServiceError, context: FailureContext) -> PaymentError {
    match raw {
        ServiceError::ValidationError(msg) | ServiceError::InvalidOperation(msg) => {
            PaymentError::validation(msg.clone(), validation_action(context))
        }
        ServiceError::ProviderError(err) => classify_provider(err),
        ServiceError::PaymentFailed(_) => PaymentError::provider(
            "Your payment could not be completed.",
            false,
            "Check your payment details or try a different card.",
        ),
        ServiceError::NetworkError(_) => PaymentError::system(
            "A network problem interrupted the payment.",
            ErrorSeverity::Medium,
            true,
            "Check your connection and try again.",
        ),
        ServiceError::ExternalServiceError(_) => PaymentError::system(
            "The payment service is temporarily unavailable.",
            ErrorSeverity::High,
            true,
            "Please try again in a moment.",
        ),
        ServiceError::NotFound(_) => PaymentError::system(
            "A required payment record could not be found.",
            ErrorSeverity::High,
            false,
            "Contact support if the problem persists.",
        ),
        _ => PaymentError::system(
            "Something went wrong while processing your payment.",
            ErrorSeverity::High,
            true,
            "Please try again; contact support if the problem persists.",
        ),
    }
}

fn validation_action(context: FailureContext) -> &'static str {
    match context {
        FailureContext::CartValidation => "Review your cart before paying.",
        FailureContext::Confirmation => "Check the payment form for errors and try again.",
        _ => "Correct the highlighted input and try again.",
    }
}

fn classify_provider(err: &ProviderError) -> PaymentError {
    match err.kind {
        ProviderErrorKind::CardDeclined => PaymentError::provider(
            decline_message(err.code.as_deref()),
            false,
            "Check your payment details or try a different card.",
        ),
        ProviderErrorKind::AuthenticationRequired => PaymentError::provider(
            "Additional authentication is required to complete this payment.",
            true,
            "Complete the verification step and try again.",
        ),
        ProviderErrorKind::InvalidForm => PaymentError::validation(
            "Some payment details are missing or invalid.",
            "Check the payment form for errors and try again.",
        ),
        ProviderErrorKind::Network => PaymentError::system(
            "A network problem interrupted the payment.",
            ErrorSeverity::Medium,
            true,
            "Check your connection and try again.",
        ),
        ProviderErrorKind::Api => PaymentError::system(
            "The payment provider returned an unexpected error.",
            ErrorSeverity::High,
            true,
            "Please try again in a moment.",
        ),
    }
}

fn decline_message(code: Option<&str>) -> String {
    match code {
        Some("insufficient_funds") => "Your card has insufficient funds.".to_string(),
        Some("expired_card") => "Your card has expired.".to_string(),
        _ => "Your card was declined.".to_string(),
    }
}
