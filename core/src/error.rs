//! Error types for the metering backend client.
//!
//! # Design
//! Business-rule rejections (invalid key, exceeded limits, ...) are not errors
//! at this level: they come back as `Response::Error`. `ClientError` covers
//! the remaining cases: caller misuse caught before any I/O, a backend that
//! answered with a status outside the contract, a transport failure, or a
//! success envelope that could not be read.

use thiserror::Error;

/// Errors returned by `ThreeScaleClient`.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The call was rejected before any network I/O (empty batch, blank key).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend answered with a status outside both the success and the
    /// client-error ranges. Carries the raw response for diagnostics.
    #[error("server error: HTTP {status}")]
    Server { status: u16, body: String },

    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A success envelope could not be parsed.
    #[error("malformed response: {0}")]
    Parse(String),
}

/// Errors raised by a `Transport` implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("could not read response body: {0}")]
    Body(String),
}

/// Well-known error codes returned by the backend.
///
/// The code string on a `ResponseError` is always kept verbatim; this enum
/// only gives callers something to `match` on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    UserInvalidKey,
    UserExceededLimits,
    UserInactiveContract,
    ProviderInvalidKey,
    ProviderInvalidMetric,
    ProviderInvalidTransactionId,
    ProviderKeyInvalid,
    ApplicationNotFound,
    ApplicationKeyInvalid,
    UserKeyInvalid,
    LimitsExceeded,
    MetricInvalid,
    ServiceTokenInvalid,
    /// Any code not in the table above.
    Other(String),
}

const KNOWN_CODES: &[(&str, ErrorCode)] = &[
    ("user.invalid_key", ErrorCode::UserInvalidKey),
    ("user.exceeded_limits", ErrorCode::UserExceededLimits),
    ("user.inactive_contract", ErrorCode::UserInactiveContract),
    ("provider.invalid_key", ErrorCode::ProviderInvalidKey),
    ("provider.invalid_metric", ErrorCode::ProviderInvalidMetric),
    ("provider.invalid_transaction_id", ErrorCode::ProviderInvalidTransactionId),
    ("provider_key_invalid", ErrorCode::ProviderKeyInvalid),
    ("application_not_found", ErrorCode::ApplicationNotFound),
    ("application_key_invalid", ErrorCode::ApplicationKeyInvalid),
    ("user_key_invalid", ErrorCode::UserKeyInvalid),
    ("limits_exceeded", ErrorCode::LimitsExceeded),
    ("metric_invalid", ErrorCode::MetricInvalid),
    ("service_token_invalid", ErrorCode::ServiceTokenInvalid),
];

impl ErrorCode {
    pub fn from_code(code: &str) -> Self {
        KNOWN_CODES
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, kind)| kind.clone())
            .unwrap_or_else(|| ErrorCode::Other(code.to_string()))
    }

    /// The wire string for this code.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::Other(code) => code,
            known => KNOWN_CODES
                .iter()
                .find(|(_, kind)| kind == known)
                .map(|(code, _)| *code)
                .unwrap_or_default(),
        }
    }

    /// Codes caused by the end user (bad key, limits, contract state).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::UserInvalidKey
                | ErrorCode::UserExceededLimits
                | ErrorCode::UserInactiveContract
                | ErrorCode::UserKeyInvalid
                | ErrorCode::ApplicationNotFound
                | ErrorCode::ApplicationKeyInvalid
                | ErrorCode::LimitsExceeded
        )
    }

    /// Codes caused by the API provider's own configuration or credentials.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::ProviderInvalidKey
                | ErrorCode::ProviderInvalidMetric
                | ErrorCode::ProviderInvalidTransactionId
                | ErrorCode::ProviderKeyInvalid
                | ErrorCode::MetricInvalid
                | ErrorCode::ServiceTokenInvalid
        )
    }
}
