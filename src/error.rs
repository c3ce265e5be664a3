//! # Error Handling
//!
//! Two tiers, mirroring the split between adapter-facing and caller-facing
//! failures: [`ProviderError`] is what an adapter returns from a call to its
//! upstream; [`GatewayError`] is what the factory, registry, license
//! validator, and router return. Both carry enough structure for a caller to
//! branch on without string matching, via [`ErrorCode`] and
//! [`ErrorCode::retryable`].

use crate::models::ProviderType;
use thiserror::Error;

/// The closed set of machine-checkable error codes. Retryability is a pure
/// function of the code, not of the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ServerError,
    Timeout,
    Unavailable,
    RateLimit,
    AuthenticationError,
    InvalidRequest,
    ModelNotFound,
    /// A 400 whose body names an OpenAI-style `context_length_exceeded`
    /// error code (see `http_client::classify_error_body`).
    ContextLengthExceeded,
    /// A completion the provider itself flagged as filtered, e.g. Gemini's
    /// `SAFETY`/`RECITATION` finish reasons or an OpenAI-shaped
    /// `content_filter` finish reason.
    ContentFilter,
    Cancelled,
    FactoryMissingType,
    FactoryNotRegistered,
    FactoryCreationFailed,
    FactoryInvalidConfig,
    RegistryNotFound,
    RegistryDuplicate,
    RegistryInvalidConfig,
    RegistryCreationFailed,
    RegistryStorageError,
    RegistryLicenseRequired,
}

impl ErrorCode {
    /// Whether a caller may reasonably retry the same request unchanged.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::ServerError
                | ErrorCode::Timeout
                | ErrorCode::Unavailable
                | ErrorCode::RateLimit
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ServerError => "server_error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::RateLimit => "rate_limit",
            ErrorCode::AuthenticationError => "authentication_error",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::ModelNotFound => "model_not_found",
            ErrorCode::ContextLengthExceeded => "context_length_exceeded",
            ErrorCode::ContentFilter => "content_filter",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::FactoryMissingType => "factory_missing_type",
            ErrorCode::FactoryNotRegistered => "factory_not_registered",
            ErrorCode::FactoryCreationFailed => "factory_creation_failed",
            ErrorCode::FactoryInvalidConfig => "factory_invalid_config",
            ErrorCode::RegistryNotFound => "registry_not_found",
            ErrorCode::RegistryDuplicate => "registry_duplicate",
            ErrorCode::RegistryInvalidConfig => "registry_invalid_config",
            ErrorCode::RegistryCreationFailed => "registry_creation_failed",
            ErrorCode::RegistryStorageError => "registry_storage_error",
            ErrorCode::RegistryLicenseRequired => "registry_license_required",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors an adapter returns from a call to its upstream provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A provider-classified failure, carrying the taxonomy code so callers
    /// can branch without string matching.
    #[error("{code}: {message}")]
    Classified {
        code: ErrorCode,
        message: String,
        status: Option<u16>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Feature not supported: {feature}")]
    FeatureNotSupported { feature: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProviderError::Classified { code, .. } => *code,
            ProviderError::Cancelled => ErrorCode::Cancelled,
            ProviderError::Http(e) if e.is_timeout() => ErrorCode::Timeout,
            ProviderError::Http(_) => ErrorCode::Unavailable,
            ProviderError::Serialization(_) => ErrorCode::InvalidRequest,
            ProviderError::Configuration { .. } => ErrorCode::InvalidRequest,
            ProviderError::FeatureNotSupported { .. } => ErrorCode::InvalidRequest,
        }
    }

    pub fn retryable(&self) -> bool {
        self.code().retryable()
    }

    /// Whether this failure should flip a provider's local `healthy` bit to
    /// false: 5xx and transport failures do, 4xx does not (see §4.1).
    pub fn marks_unhealthy(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ServerError | ErrorCode::Timeout | ErrorCode::Unavailable
        )
    }

    pub fn classified(code: ErrorCode, message: impl Into<String>) -> Self {
        ProviderError::Classified {
            code,
            message: message.into(),
            status: None,
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let code = match status {
            401 | 403 => ErrorCode::AuthenticationError,
            404 => ErrorCode::ModelNotFound,
            429 => ErrorCode::RateLimit,
            400 => ErrorCode::InvalidRequest,
            s if s >= 500 => ErrorCode::ServerError,
            _ => ErrorCode::InvalidRequest,
        };
        ProviderError::Classified {
            code,
            message: message.into(),
            status: Some(status),
        }
    }
}

/// The tier required to use a provider type exceeds the validator's current
/// tier.
#[derive(Error, Debug)]
#[error("provider type {provider_type} requires tier {required:?}, current tier is {current:?}")]
pub struct LicenseError {
    pub provider_type: ProviderType,
    pub current: crate::license::Tier,
    pub required: crate::license::Tier,
}

/// Errors returned by the factory manager, registry, and unified router.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("license required: {0}")]
    License(#[from] LicenseError),

    #[error("{code}: {message}")]
    Classified { code: ErrorCode, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("request cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::Provider(e) => e.code(),
            GatewayError::License(_) => ErrorCode::RegistryLicenseRequired,
            GatewayError::Classified { code, .. } => *code,
            GatewayError::Storage(_) => ErrorCode::RegistryStorageError,
            GatewayError::Cancelled => ErrorCode::Cancelled,
        }
    }

    pub fn retryable(&self) -> bool {
        self.code().retryable()
    }

    pub fn classified(code: ErrorCode, message: impl Into<String>) -> Self {
        GatewayError::Classified {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(name: impl std::fmt::Display) -> Self {
        GatewayError::classified(
            ErrorCode::RegistryNotFound,
            format!("provider '{name}' is not registered"),
        )
    }

    pub fn duplicate(name: impl std::fmt::Display) -> Self {
        GatewayError::classified(
            ErrorCode::RegistryDuplicate,
            format!("provider '{name}' is already registered"),
        )
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        GatewayError::classified(ErrorCode::Unavailable, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(ErrorCode::ServerError.retryable());
        assert!(ErrorCode::Timeout.retryable());
        assert!(ErrorCode::RateLimit.retryable());
    }

    #[test]
    fn input_errors_are_not_retryable() {
        assert!(!ErrorCode::InvalidRequest.retryable());
        assert!(!ErrorCode::AuthenticationError.retryable());
        assert!(!ErrorCode::ContentFilter.retryable());
    }

    #[test]
    fn from_status_maps_5xx_to_server_error() {
        let err = ProviderError::from_status(503, "down");
        assert_eq!(err.code(), ErrorCode::ServerError);
        assert!(err.marks_unhealthy());
    }

    #[test]
    fn from_status_4xx_does_not_mark_unhealthy() {
        let err = ProviderError::from_status(400, "bad request");
        assert!(!err.marks_unhealthy());
    }
}
