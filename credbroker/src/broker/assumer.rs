use chrono::{DateTime, Utc};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use super::context::RequestContext;
use super::error::{AuthError, AuthResult};
use crate::aws::{ApiError, AssumeRoleRequest, StsApi};
use crate::common::config::{MAX_SESSION_DURATION, MIN_SESSION_DURATION};
use crate::common::{Arn, Credentials};

const MAX_SESSION_NAME_LEN: usize = 64;
const MAX_EXTERNAL_ID_HINT: usize = 10;

/// Everything needed for one cross-account assume-role call
pub struct ExternalIdentity {
    pub role_arn: String,
    pub external_id: Option<SecretString>,
    /// Generated as `<tool>-<unix timestamp>` when absent
    pub session_name: Option<String>,
    pub duration_seconds: i32,
}

/// Cross-account engine: trades base credentials for scoped, time-limited ones
pub struct RoleAssumer {
    sts: Arc<dyn StsApi>,
    region: String,
    tool_name: String,
}

impl RoleAssumer {
    pub fn new(sts: Arc<dyn StsApi>, region: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            sts,
            region: region.into(),
            tool_name: tool_name.into(),
        }
    }

    /// Build the STS request without sending it
    pub fn build_request(
        &self,
        identity: &ExternalIdentity,
        now: DateTime<Utc>,
    ) -> AuthResult<AssumeRoleRequest> {
        let arn = identity
            .role_arn
            .parse::<Arn>()
            .map_err(|e| AuthError::misconfigured(e.to_string()))?;
        if !arn.is_iam_role() {
            return Err(AuthError::misconfigured(format!(
                "not an IAM role ARN: {}",
                identity.role_arn
            )));
        }

        let role_session_name = match &identity.session_name {
            Some(name) => {
                validate_session_name(name)?;
                name.clone()
            }
            None => default_session_name(&self.tool_name, now),
        };

        let external_id = identity
            .external_id
            .as_ref()
            .map(|id| id.expose_secret().trim().to_string())
            .filter(|id| !id.is_empty());

        Ok(AssumeRoleRequest {
            role_arn: identity.role_arn.clone(),
            role_session_name,
            duration_seconds: clamp_duration(identity.duration_seconds),
            external_id,
        })
    }

    pub async fn assume(
        &self,
        ctx: &RequestContext,
        base: &Credentials,
        identity: ExternalIdentity,
    ) -> AuthResult<Credentials> {
        let now = Utc::now();
        if base.is_expired_at(now) {
            return Err(AuthError::base_invalid(format!(
                "base credentials from {} expired",
                base.source_label
            )));
        }

        let request = self.build_request(&identity, now)?;

        info!(
            "Assuming role {} (session {}, {}s)",
            request.role_arn, request.role_session_name, request.duration_seconds
        );
        if let Some(external_id) = &request.external_id {
            debug!("Using external ID {}", external_id_hint(external_id));
        }

        let assumed = ctx
            .run(async {
                self.sts
                    .assume_role(base, &self.region, &request)
                    .await
                    .map_err(|e| classify_sts_error(e, Some(&request.role_arn)))
            })
            .await
            .inspect_err(|e| warn!("Failed to assume role {}: {}", request.role_arn, e))?;

        info!("Assumed role {} until {}", request.role_arn, assumed.expiration);

        Ok(Credentials {
            access_key_id: assumed.access_key_id,
            secret_access_key: assumed.secret_access_key,
            session_token: Some(assumed.session_token),
            expires_at: Some(assumed.expiration),
            source_label: format!("cross-account:{}", request.role_arn),
        })
    }
}

pub fn clamp_duration(duration_seconds: i32) -> i32 {
    duration_seconds.clamp(MIN_SESSION_DURATION, MAX_SESSION_DURATION)
}

/// `<tool>-<unix timestamp>`, restricted to the characters STS accepts
pub fn default_session_name(tool_name: &str, now: DateTime<Utc>) -> String {
    let mut tool: String = tool_name
        .chars()
        .filter(|c| is_session_name_char(*c))
        .collect();
    if tool.is_empty() {
        tool = "credbroker".to_string();
    }

    let suffix = format!("-{}", now.timestamp());
    tool.truncate(MAX_SESSION_NAME_LEN - suffix.len());
    tool + &suffix
}

pub fn validate_session_name(name: &str) -> AuthResult<()> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[\w+=,.@-]{2,64}$").expect("session name pattern is valid")
    });

    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(AuthError::misconfigured(format!(
            "invalid role session name '{name}': expected 2-64 characters of [A-Za-z0-9_+=,.@-]"
        )))
    }
}

fn is_session_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_+=,.@-".contains(c)
}

/// At most 10 characters and never more than half of the ID
pub fn external_id_hint(external_id: &str) -> String {
    let visible = (external_id.chars().count() / 2).min(MAX_EXTERNAL_ID_HINT);
    let prefix: String = external_id.chars().take(visible).collect();
    format!("{prefix}***")
}

/// Map an STS failure onto the broker taxonomy. With `role_arn` set the call was an
/// AssumeRole; without it an access denial means the caller's own credentials are bad.
pub fn classify_sts_error(err: ApiError, role_arn: Option<&str>) -> AuthError {
    match err {
        ApiError::Service { code, message } => match code.as_str() {
            "AccessDenied" | "AccessDeniedException" => match role_arn {
                Some(role_arn) => AuthError::denied(role_arn, format!("{code}: {message}")),
                None => AuthError::base_invalid(format!("{code}: {message}")),
            },
            "ExpiredToken"
            | "ExpiredTokenException"
            | "InvalidClientTokenId"
            | "SignatureDoesNotMatch"
            | "UnrecognizedClientException"
            | "IncompleteSignature"
            | "MissingAuthenticationToken"
            | "ProviderError" => AuthError::base_invalid(format!("{code}: {message}")),
            "Throttling"
            | "ThrottlingException"
            | "RequestLimitExceeded"
            | "InternalFailure"
            | "InternalError"
            | "ServiceUnavailable"
            | "IDPCommunicationError" => AuthError::transient(format!("{code}: {message}")),
            _ => AuthError::misconfigured(format!("{code}: {message}")),
        },
        ApiError::Network { message } => AuthError::transient(message),
        ApiError::Timeout => AuthError::transient("request timed out"),
        ApiError::NotFound { message } => AuthError::base_invalid(message),
        ApiError::InvalidConfiguration { message } => AuthError::misconfigured(message),
        ApiError::Other { message } => AuthError::transient(message),
    }
}
