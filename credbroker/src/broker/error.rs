use thiserror::Error;

/// Errors that can occur while acquiring or checking credentials
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Interaction required: {message}")]
    InteractionRequired { message: String },

    #[error("Transient failure: {message}")]
    Transient { message: String },

    #[error("Role assumption denied for {role_arn}: {message}")]
    RoleAssumptionDenied { role_arn: String, message: String },

    #[error("Base credentials invalid: {message}")]
    BaseCredentialsInvalid { message: String },

    #[error("Misconfigured: {message}")]
    Misconfigured { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Credential source {source_label} violated its contract: {message}")]
    ContractViolation {
        source_label: String,
        message: String,
    },
}

impl AuthError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn not_configured() -> Self {
        Self::config("not configured")
    }

    pub fn interaction_required(message: impl Into<String>) -> Self {
        Self::InteractionRequired {
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn denied(role_arn: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RoleAssumptionDenied {
            role_arn: role_arn.into(),
            message: message.into(),
        }
    }

    pub fn base_invalid(message: impl Into<String>) -> Self {
        Self::BaseCredentialsInvalid {
            message: message.into(),
        }
    }

    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self::Misconfigured {
            message: message.into(),
        }
    }

    pub fn contract_violation(source_label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContractViolation {
            source_label: source_label.into(),
            message: message.into(),
        }
    }

    /// Only network/timeout failures are safe to retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Errors that drop a cached credential outright instead of leaving it in place.
    pub fn invalidates_cache(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::RoleAssumptionDenied { .. })
    }

    /// Short machine-readable name for the error category
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::InteractionRequired { .. } => "interaction_required",
            Self::Transient { .. } => "transient",
            Self::RoleAssumptionDenied { .. } => "role_assumption_denied",
            Self::BaseCredentialsInvalid { .. } => "base_credentials_invalid",
            Self::Misconfigured { .. } => "misconfigured",
            Self::Cancelled => "cancelled",
            Self::ContractViolation { .. } => "contract_violation",
        }
    }

    /// Process exit code for CLI consumers.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config { .. } | Self::Misconfigured { .. } => 2,
            Self::InteractionRequired { .. } => 3,
            Self::Transient { .. } => 4,
            Self::RoleAssumptionDenied { .. } | Self::BaseCredentialsInvalid { .. } => 5,
            Self::Cancelled => 6,
            Self::ContractViolation { .. } => 7,
        }
    }

    /// Response status for service-style consumers.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Config { .. }
            | Self::RoleAssumptionDenied { .. }
            | Self::BaseCredentialsInvalid { .. } => 401,
            Self::InteractionRequired { .. } => 428,
            Self::Transient { .. } => 503,
            Self::Cancelled => 499,
            Self::Misconfigured { .. } | Self::ContractViolation { .. } => 500,
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(AuthError::transient("timeout").is_retryable());
        assert!(!AuthError::denied("arn", "AccessDenied").is_retryable());
        assert!(!AuthError::config("bad").is_retryable());
        assert!(!AuthError::Cancelled.is_retryable());
    }

    #[test]
    fn test_cache_invalidation_policy() {
        assert!(AuthError::not_configured().invalidates_cache());
        assert!(AuthError::denied("arn", "AccessDenied").invalidates_cache());
        assert!(!AuthError::transient("reset").invalidates_cache());
        assert!(!AuthError::base_invalid("expired").invalidates_cache());
        assert!(!AuthError::Cancelled.invalidates_cache());
    }

    #[test]
    fn test_service_status_mapping() {
        assert_eq!(AuthError::config("x").http_status(), 401);
        assert_eq!(AuthError::denied("a", "b").http_status(), 401);
        assert_eq!(AuthError::transient("x").http_status(), 503);
    }

    #[test]
    fn test_not_configured_message() {
        assert_eq!(
            AuthError::not_configured().to_string(),
            "Configuration error: not configured"
        );
    }
}
