//! Capabilities the broker consumes from AWS: STS, SSO and local credential lookup.
//!
//! Each capability is a trait so the broker can be driven by the SDK-backed
//! implementations in [`sdk`] or by test doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;

use crate::common::{CallerIdentity, Credentials};

pub mod sdk;
pub mod sso_cache;

/// Failure reported by an AWS capability, before classification by the broker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{code}: {message}")]
    Service { code: String, message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Credentials not found: {message}")]
    NotFound { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl ApiError {
    pub fn service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// Request sent to the STS AssumeRole capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub role_session_name: String,
    pub duration_seconds: i32,
    /// Omitted entirely when empty; some trust policies treat "" differently from absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Temporary credentials returned by AssumeRole
#[derive(Debug, Clone)]
pub struct AssumedRole {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: SecretString,
    pub expiration: DateTime<Utc>,
}

/// Credentials found in a profile, the environment or the SSO portal
#[derive(Debug, Clone)]
pub struct ProfileCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
    pub expiration: Option<DateTime<Utc>>,
}

/// A cached SSO access token
#[derive(Debug, Clone)]
pub struct SsoToken {
    pub access_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// STS operations the broker depends on
#[async_trait]
pub trait StsApi: Send + Sync {
    /// Call AssumeRole signed with `base` credentials
    async fn assume_role(
        &self,
        base: &Credentials,
        region: &str,
        request: &AssumeRoleRequest,
    ) -> Result<AssumedRole, ApiError>;

    /// Call GetCallerIdentity signed with `credentials`
    async fn get_caller_identity(
        &self,
        credentials: &Credentials,
        region: &str,
    ) -> Result<CallerIdentity, ApiError>;
}

/// Lookup of long-lived or pre-provisioned credentials
#[async_trait]
pub trait CredentialLookup: Send + Sync {
    async fn lookup_profile(&self, name: &str) -> Result<ProfileCredentials, ApiError>;

    async fn lookup_environment(&self) -> Result<ProfileCredentials, ApiError>;
}

/// IAM Identity Center (SSO) operations
#[async_trait]
pub trait SsoApi: Send + Sync {
    /// Find a cached, unexpired SSO session token for `start_url`
    async fn get_sso_token(
        &self,
        start_url: &str,
        region: &str,
    ) -> Result<Option<SsoToken>, ApiError>;

    /// Exchange an SSO token for role credentials
    async fn get_role_credentials(
        &self,
        token: &SsoToken,
        account_id: &str,
        role_name: &str,
        region: &str,
    ) -> Result<ProfileCredentials, ApiError>;

    /// Start a fresh device-code login (blocks until the user finishes in the browser)
    async fn login(&self, start_url: &str, profile: Option<&str>) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assume_role_request_omits_missing_external_id() {
        let request = AssumeRoleRequest {
            role_arn: "arn:aws:iam::123456789012:role/Demo".to_string(),
            role_session_name: "credbroker-1700000000".to_string(),
            duration_seconds: 3600,
            external_id: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["RoleArn"], "arn:aws:iam::123456789012:role/Demo");
        assert_eq!(json["DurationSeconds"], 3600);
        assert!(!json.as_object().unwrap().contains_key("ExternalId"));
    }
}
