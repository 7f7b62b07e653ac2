use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

/// Temporary or long-lived AWS credentials handed to callers
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
    /// `None` means the credentials do not expire (e.g. IAM user keys)
    pub expires_at: Option<DateTime<Utc>>,
    pub source_label: String,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::new(secret_access_key.into()),
            session_token: session_token.map(SecretString::new),
            expires_at,
            source_label: source_label.into(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.access_key_id == other.access_key_id
            && self.secret_access_key.expose_secret() == other.secret_access_key.expose_secret()
            && self.session_token.as_ref().map(|t| t.expose_secret())
                == other.session_token.as_ref().map(|t| t.expose_secret())
            && self.expires_at == other.expires_at
            && self.source_label == other.source_label
    }
}

impl Eq for Credentials {}

/// Success payload of the credential-process protocol
#[derive(Debug, Serialize)]
pub struct CredentialProcessOutput {
    #[serde(rename = "Version")]
    pub version: u8,

    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,

    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,

    #[serde(rename = "SessionToken", skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// RFC 3339
    #[serde(rename = "Expiration", skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

impl From<&Credentials> for CredentialProcessOutput {
    fn from(credentials: &Credentials) -> Self {
        Self {
            version: 1,
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.expose_secret().clone(),
            session_token: credentials
                .session_token
                .as_ref()
                .map(|token| token.expose_secret().clone()),
            expiration: credentials
                .expires_at
                .map(|expiry| expiry.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

/// Failure payload of the credential-process protocol
#[derive(Debug, Serialize)]
pub struct CredentialProcessError {
    pub error: String,
}
