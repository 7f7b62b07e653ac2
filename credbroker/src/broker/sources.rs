use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::assumer::{validate_session_name, ExternalIdentity, RoleAssumer};
use super::context::RequestContext;
use super::error::{AuthError, AuthResult};
use super::prompt::Prompter;
use crate::aws::sdk::{SdkCredentialLookup, SdkSso, SdkSts};
use crate::aws::{ApiError, CredentialLookup, ProfileCredentials, SsoApi, StsApi};
use crate::common::config::{
    AuthMethod, AuthMethodConfig, BrokerSettings, CrossAccountParams, SsoParams,
    MAX_SESSION_DURATION, MIN_SESSION_DURATION,
};
use crate::common::{Arn, Credentials};

/// One way of acquiring credentials
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Method tag, e.g. `cross-account-role`
    fn method(&self) -> &'static str;

    /// Whether every credential from this source must carry an expiry
    fn requires_expiry(&self) -> bool {
        true
    }

    /// Check the configuration once, at setup time
    fn validate(&self, config: &AuthMethodConfig) -> AuthResult<()>;

    async fn resolve(&self, ctx: &RequestContext) -> AuthResult<Credentials>;
}

/// External capabilities shared by every source
#[derive(Clone)]
pub struct Collaborators {
    pub sts: Arc<dyn StsApi>,
    pub lookup: Arc<dyn CredentialLookup>,
    pub sso: Arc<dyn SsoApi>,
    pub prompter: Arc<dyn Prompter>,
}

impl Collaborators {
    /// AWS SDK-backed capabilities with the given UI collaborator
    pub fn aws(prompter: Arc<dyn Prompter>) -> Self {
        Self {
            sts: Arc::new(SdkSts::new()),
            lookup: Arc::new(SdkCredentialLookup::new()),
            sso: Arc::new(SdkSso::default()),
            prompter,
        }
    }
}

/// Pick the source for `config.method` and validate the configuration against it
pub fn build_source(
    config: &AuthMethodConfig,
    collaborators: &Collaborators,
    settings: &BrokerSettings,
) -> AuthResult<Arc<dyn CredentialSource>> {
    let source: Arc<dyn CredentialSource> = match &config.method {
        AuthMethod::StaticProfile { profile } => Arc::new(StaticProfileSource::new(
            profile.clone(),
            collaborators.lookup.clone(),
        )),
        AuthMethod::Sso(params) => Arc::new(SsoSource::new(
            params.clone(),
            &config.region,
            collaborators.sso.clone(),
            collaborators.prompter.clone(),
        )),
        AuthMethod::Interactive(params) => Arc::new(InteractiveSource::new(SsoSource::new(
            params.clone(),
            &config.region,
            collaborators.sso.clone(),
            collaborators.prompter.clone(),
        ))),
        AuthMethod::CrossAccountRole(params) => Arc::new(CrossAccountRoleSource::new(
            params.clone(),
            config.session_duration_seconds,
            collaborators.lookup.clone(),
            RoleAssumer::new(
                collaborators.sts.clone(),
                config.region.clone(),
                settings.tool_name.clone(),
            ),
        )),
    };

    validate_common(config)?;
    source.validate(config)?;
    Ok(source)
}

/// Checks shared by every method
pub fn validate_common(config: &AuthMethodConfig) -> AuthResult<()> {
    if config.region.trim().is_empty() {
        return Err(AuthError::config("region must not be empty"));
    }
    if !(MIN_SESSION_DURATION..=MAX_SESSION_DURATION).contains(&config.session_duration_seconds) {
        return Err(AuthError::config(format!(
            "session_duration_seconds must be between {MIN_SESSION_DURATION} and {MAX_SESSION_DURATION}, got {}",
            config.session_duration_seconds
        )));
    }
    Ok(())
}

fn require(field: &str, value: &str, method: &str) -> AuthResult<()> {
    if value.trim().is_empty() {
        Err(AuthError::config(format!("{method} requires a non-empty {field}")))
    } else {
        Ok(())
    }
}

fn method_mismatch(expected: &str, config: &AuthMethodConfig) -> AuthError {
    AuthError::config(format!(
        "{expected} source cannot use a {} configuration",
        config.method.name()
    ))
}

fn into_credentials(found: ProfileCredentials, source_label: String) -> Credentials {
    Credentials {
        access_key_id: found.access_key_id,
        secret_access_key: found.secret_access_key,
        session_token: found.session_token,
        expires_at: found.expiration,
        source_label,
    }
}

/// Map a profile/environment lookup failure
fn classify_lookup_error(err: ApiError, what: &str) -> AuthError {
    match err {
        ApiError::NotFound { message } => {
            AuthError::config(format!("no credentials found for {what}: {message}"))
        }
        ApiError::InvalidConfiguration { message } => {
            AuthError::config(format!("{what} is misconfigured: {message}"))
        }
        ApiError::Timeout => AuthError::transient(format!("timed out loading {what}")),
        ApiError::Network { message } | ApiError::Other { message } => {
            AuthError::transient(format!("failed to load {what}: {message}"))
        }
        ApiError::Service { code, message } => {
            AuthError::base_invalid(format!("{what}: {code}: {message}"))
        }
    }
}

/// Long-lived (or pre-provisioned session) credentials from a named profile
pub struct StaticProfileSource {
    profile: String,
    lookup: Arc<dyn CredentialLookup>,
}

impl StaticProfileSource {
    pub fn new(profile: String, lookup: Arc<dyn CredentialLookup>) -> Self {
        Self { profile, lookup }
    }
}

#[async_trait]
impl CredentialSource for StaticProfileSource {
    fn method(&self) -> &'static str {
        "static-profile"
    }

    fn requires_expiry(&self) -> bool {
        false
    }

    fn validate(&self, config: &AuthMethodConfig) -> AuthResult<()> {
        match &config.method {
            AuthMethod::StaticProfile { profile } => require("profile", profile, self.method()),
            _ => Err(method_mismatch(self.method(), config)),
        }
    }

    async fn resolve(&self, _ctx: &RequestContext) -> AuthResult<Credentials> {
        let what = format!("profile '{}'", self.profile);
        let found = self
            .lookup
            .lookup_profile(&self.profile)
            .await
            .map_err(|e| classify_lookup_error(e, &what))?;

        debug!(
            "Loaded {} credentials for profile {}",
            if found.expiration.is_some() { "session" } else { "long-lived" },
            self.profile
        );
        Ok(into_credentials(found, format!("static-profile:{}", self.profile)))
    }
}

/// IAM Identity Center role credentials from a cached SSO session
pub struct SsoSource {
    params: SsoParams,
    region: String,
    sso: Arc<dyn SsoApi>,
    prompter: Arc<dyn Prompter>,
}

impl SsoSource {
    pub fn new(
        params: SsoParams,
        region: &str,
        sso: Arc<dyn SsoApi>,
        prompter: Arc<dyn Prompter>,
    ) -> Self {
        let region = params.sso_region.clone().unwrap_or_else(|| region.to_string());
        Self {
            params,
            region,
            sso,
            prompter,
        }
    }

    fn validate_params(&self, method: &str, params: &SsoParams) -> AuthResult<()> {
        require("start_url", &params.start_url, method)?;
        require("account_id", &params.account_id, method)?;
        require("role_name", &params.role_name, method)?;
        if !params.start_url.starts_with("https://") {
            return Err(AuthError::config(format!(
                "start_url must be an https URL, got {}",
                params.start_url
            )));
        }
        if params.account_id.len() != 12 || !params.account_id.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AuthError::config(format!(
                "account_id must be a 12 digit AWS account ID, got {}",
                params.account_id
            )));
        }
        Ok(())
    }

    async fn session_token(&self) -> AuthResult<crate::aws::SsoToken> {
        let start_url = &self.params.start_url;
        let cached = self
            .sso
            .get_sso_token(start_url, &self.region)
            .await
            .map_err(|e| AuthError::transient(format!("failed to read SSO session: {e}")))?;
        if let Some(token) = cached {
            return Ok(token);
        }

        if !self.prompter.is_interactive() {
            return Err(AuthError::interaction_required(format!(
                "no active SSO session for {start_url}; run `aws sso login` first"
            )));
        }

        let proceed = self
            .prompter
            .confirm(
                &format!("No active SSO session for {start_url}. Sign in now?"),
                true,
            )
            .await?;
        if !proceed {
            return Err(AuthError::interaction_required("SSO sign-in declined"));
        }

        self.sso
            .login(start_url, self.params.profile.as_deref())
            .await
            .map_err(|e| AuthError::interaction_required(format!("SSO sign-in failed: {e}")))?;

        self.sso
            .get_sso_token(start_url, &self.region)
            .await
            .map_err(|e| AuthError::transient(format!("failed to read SSO session: {e}")))?
            .ok_or_else(|| {
                AuthError::interaction_required(format!(
                    "SSO sign-in finished but no session for {start_url} was cached"
                ))
            })
    }

    async fn resolve_labeled(&self, label_prefix: &str) -> AuthResult<Credentials> {
        let token = self.session_token().await?;
        let role = format!("{}/{}", self.params.account_id, self.params.role_name);

        let found = self
            .sso
            .get_role_credentials(
                &token,
                &self.params.account_id,
                &self.params.role_name,
                &self.region,
            )
            .await
            .map_err(|e| match e {
                ApiError::Service { code, message } => match code.as_str() {
                    "UnauthorizedException" => AuthError::interaction_required(format!(
                        "SSO session is no longer valid, sign in again: {message}"
                    )),
                    "ForbiddenException" => AuthError::denied(role.clone(), message),
                    "ResourceNotFoundException" | "InvalidRequestException" => {
                        AuthError::config(format!("{code}: {message}"))
                    }
                    _ => AuthError::transient(format!("{code}: {message}")),
                },
                other => AuthError::transient(other.to_string()),
            })?;

        info!("Obtained SSO role credentials for {}", role);
        Ok(into_credentials(
            found,
            format!("{label_prefix}:{}", self.params.start_url),
        ))
    }
}

#[async_trait]
impl CredentialSource for SsoSource {
    fn method(&self) -> &'static str {
        "sso"
    }

    fn validate(&self, config: &AuthMethodConfig) -> AuthResult<()> {
        match &config.method {
            AuthMethod::Sso(params) => self.validate_params(self.method(), params),
            _ => Err(method_mismatch(self.method(), config)),
        }
    }

    async fn resolve(&self, _ctx: &RequestContext) -> AuthResult<Credentials> {
        self.resolve_labeled("sso").await
    }
}

/// SSO behind a one-time confirmation of the method
pub struct InteractiveSource {
    inner: SsoSource,
    confirmed: AtomicBool,
}

impl InteractiveSource {
    pub fn new(inner: SsoSource) -> Self {
        Self {
            inner,
            confirmed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CredentialSource for InteractiveSource {
    fn method(&self) -> &'static str {
        "interactive"
    }

    fn validate(&self, config: &AuthMethodConfig) -> AuthResult<()> {
        match &config.method {
            AuthMethod::Interactive(params) => self.inner.validate_params(self.method(), params),
            _ => Err(method_mismatch(self.method(), config)),
        }
    }

    async fn resolve(&self, _ctx: &RequestContext) -> AuthResult<Credentials> {
        if !self.confirmed.load(Ordering::Acquire) {
            let params = &self.inner.params;
            let accepted = self
                .inner
                .prompter
                .confirm(
                    &format!(
                        "Authenticate with AWS SSO ({}) as {} in account {}?",
                        params.start_url, params.role_name, params.account_id
                    ),
                    true,
                )
                .await?;
            if !accepted {
                return Err(AuthError::interaction_required(
                    "interactive authentication declined",
                ));
            }
            self.confirmed.store(true, Ordering::Release);
        }

        self.inner.resolve_labeled("interactive").await
    }
}

/// Base credentials traded for a role in another account
pub struct CrossAccountRoleSource {
    params: CrossAccountParams,
    duration_seconds: i32,
    lookup: Arc<dyn CredentialLookup>,
    assumer: RoleAssumer,
}

impl CrossAccountRoleSource {
    pub fn new(
        params: CrossAccountParams,
        duration_seconds: i32,
        lookup: Arc<dyn CredentialLookup>,
        assumer: RoleAssumer,
    ) -> Self {
        Self {
            params,
            duration_seconds,
            lookup,
            assumer,
        }
    }

    /// Named source profile, else environment variables, else the default profile
    async fn base_credentials(&self) -> AuthResult<Credentials> {
        if let Some(profile) = &self.params.source_profile {
            let found = self
                .lookup
                .lookup_profile(profile)
                .await
                .map_err(|e| base_failure(e, &format!("source profile '{profile}'")))?;
            return Ok(into_credentials(found, format!("static-profile:{profile}")));
        }

        match self.lookup.lookup_environment().await {
            Ok(found) => Ok(into_credentials(found, "environment".to_string())),
            Err(ApiError::NotFound { .. }) => {
                debug!("No environment credentials, falling back to the default profile");
                let found = self
                    .lookup
                    .lookup_profile("default")
                    .await
                    .map_err(|e| base_failure(e, "default profile"))?;
                Ok(into_credentials(found, "static-profile:default".to_string()))
            }
            Err(e) => Err(base_failure(e, "environment credentials")),
        }
    }
}

/// Base lookup failures are authorization problems for the assume-role step, except transient ones
fn base_failure(err: ApiError, what: &str) -> AuthError {
    match classify_lookup_error(err, what) {
        AuthError::Config { message } => AuthError::base_invalid(message),
        other => other,
    }
}

#[async_trait]
impl CredentialSource for CrossAccountRoleSource {
    fn method(&self) -> &'static str {
        "cross-account-role"
    }

    fn validate(&self, config: &AuthMethodConfig) -> AuthResult<()> {
        let AuthMethod::CrossAccountRole(params) = &config.method else {
            return Err(method_mismatch(self.method(), config));
        };

        require("role_arn", &params.role_arn, self.method())?;
        let arn = params
            .role_arn
            .parse::<Arn>()
            .map_err(|e| AuthError::config(e.to_string()))?;
        if !arn.is_iam_role() {
            return Err(AuthError::config(format!(
                "role_arn must be an IAM role ARN, got {}",
                params.role_arn
            )));
        }

        if let Some(external_id) = &params.external_id {
            if external_id.len() > 1224 {
                return Err(AuthError::config("external_id is longer than 1224 characters"));
            }
        }
        if let Some(session_name) = &params.session_name {
            validate_session_name(session_name)
                .map_err(|e| AuthError::config(e.to_string()))?;
        }
        if let Some(profile) = &params.source_profile {
            require("source_profile", profile, self.method())?;
        }
        Ok(())
    }

    async fn resolve(&self, ctx: &RequestContext) -> AuthResult<Credentials> {
        let base = self.base_credentials().await.inspect_err(|e| {
            warn!("Could not resolve base credentials for {}: {}", self.params.role_arn, e)
        })?;
        debug!("Resolved base credentials from {}", base.source_label);

        let identity = ExternalIdentity {
            role_arn: self.params.role_arn.clone(),
            external_id: self.params.external_id.clone().map(SecretString::new),
            session_name: self.params.session_name.clone(),
            duration_seconds: self.duration_seconds,
        };

        self.assumer.assume(ctx, &base, identity).await
    }
}
