//! Test doubles for the AWS capabilities, the prompter and credential sources

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::context::RequestContext;
use super::error::{AuthError, AuthResult};
use super::prompt::Prompter;
use super::sources::CredentialSource;
use crate::aws::{
    ApiError, AssumeRoleRequest, AssumedRole, CredentialLookup, ProfileCredentials, SsoApi,
    SsoToken, StsApi,
};
use crate::common::config::AuthMethodConfig;
use crate::common::{CallerIdentity, Credentials};

pub const TEST_ROLE_ARN: &str = "arn:aws:iam::123456789012:role/Demo";

pub fn profile_creds(access_key_id: &str, expiration: Option<DateTime<Utc>>) -> ProfileCredentials {
    ProfileCredentials {
        access_key_id: access_key_id.to_string(),
        secret_access_key: SecretString::new(format!("{access_key_id}-secret")),
        session_token: expiration.map(|_| SecretString::new("session-token".to_string())),
        expiration,
    }
}

pub fn sso_token(lifetime: Duration) -> SsoToken {
    SsoToken {
        access_token: SecretString::new("sso-access-token".to_string()),
        expires_at: Utc::now() + lifetime,
    }
}

#[derive(Default)]
pub struct MockSts {
    assume_failure: Option<ApiError>,
    identity_failure: Mutex<Option<ApiError>>,
    assume_requests: Mutex<Vec<AssumeRoleRequest>>,
    assume_regions: Mutex<Vec<String>>,
    assume_base_keys: Mutex<Vec<String>>,
    identity_calls: AtomicUsize,
}

impl MockSts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_assume(mut self, err: ApiError) -> Self {
        self.assume_failure = Some(err);
        self
    }

    pub fn failing_identity(self, err: ApiError) -> Self {
        self.set_identity_failure(Some(err));
        self
    }

    pub fn set_identity_failure(&self, err: Option<ApiError>) {
        *self.identity_failure.lock().unwrap() = err;
    }

    pub fn assume_requests(&self) -> Vec<AssumeRoleRequest> {
        self.assume_requests.lock().unwrap().clone()
    }

    pub fn assume_regions(&self) -> Vec<String> {
        self.assume_regions.lock().unwrap().clone()
    }

    pub fn assume_base_keys(&self) -> Vec<String> {
        self.assume_base_keys.lock().unwrap().clone()
    }

    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StsApi for MockSts {
    async fn assume_role(
        &self,
        base: &Credentials,
        region: &str,
        request: &AssumeRoleRequest,
    ) -> Result<AssumedRole, ApiError> {
        self.assume_requests.lock().unwrap().push(request.clone());
        self.assume_regions.lock().unwrap().push(region.to_string());
        self.assume_base_keys
            .lock()
            .unwrap()
            .push(base.access_key_id.clone());

        if let Some(err) = &self.assume_failure {
            return Err(err.clone());
        }

        Ok(AssumedRole {
            access_key_id: "ASIAASSUMED".to_string(),
            secret_access_key: SecretString::new("assumed-secret".to_string()),
            session_token: SecretString::new("assumed-token".to_string()),
            expiration: Utc::now() + Duration::seconds(3600),
        })
    }

    async fn get_caller_identity(
        &self,
        _credentials: &Credentials,
        _region: &str,
    ) -> Result<CallerIdentity, ApiError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.identity_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(CallerIdentity::new(
            "AROAEXAMPLE:credbroker-test",
            "123456789012",
            "arn:aws:sts::123456789012:assumed-role/Demo/credbroker-test",
        ))
    }
}

#[derive(Default)]
pub struct MockLookup {
    profiles: HashMap<String, ProfileCredentials>,
    environment: Option<ProfileCredentials>,
}

impl MockLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, name: &str, creds: ProfileCredentials) -> Self {
        self.profiles.insert(name.to_string(), creds);
        self
    }

    pub fn with_environment(mut self, creds: ProfileCredentials) -> Self {
        self.environment = Some(creds);
        self
    }
}

#[async_trait]
impl CredentialLookup for MockLookup {
    async fn lookup_profile(&self, name: &str) -> Result<ProfileCredentials, ApiError> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("profile {name} not found")))
    }

    async fn lookup_environment(&self) -> Result<ProfileCredentials, ApiError> {
        self.environment
            .clone()
            .ok_or_else(|| ApiError::not_found("no environment credentials"))
    }
}

#[derive(Default)]
pub struct MockSso {
    token: Mutex<Option<SsoToken>>,
    token_after_login: Option<SsoToken>,
    role_failure: Option<ApiError>,
    role_requests: Mutex<Vec<(String, String, String)>>,
    login_calls: AtomicUsize,
}

impl MockSso {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, token: SsoToken) -> Self {
        *self.token.lock().unwrap() = Some(token);
        self
    }

    pub fn with_token_after_login(mut self, token: SsoToken) -> Self {
        self.token_after_login = Some(token);
        self
    }

    pub fn failing_role(mut self, err: ApiError) -> Self {
        self.role_failure = Some(err);
        self
    }

    pub fn role_requests(&self) -> Vec<(String, String, String)> {
        self.role_requests.lock().unwrap().clone()
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SsoApi for MockSso {
    async fn get_sso_token(
        &self,
        _start_url: &str,
        _region: &str,
    ) -> Result<Option<SsoToken>, ApiError> {
        Ok(self.token.lock().unwrap().clone())
    }

    async fn get_role_credentials(
        &self,
        _token: &SsoToken,
        account_id: &str,
        role_name: &str,
        region: &str,
    ) -> Result<ProfileCredentials, ApiError> {
        self.role_requests.lock().unwrap().push((
            account_id.to_string(),
            role_name.to_string(),
            region.to_string(),
        ));
        if let Some(err) = &self.role_failure {
            return Err(err.clone());
        }
        Ok(profile_creds(
            "ASIASSO",
            Some(Utc::now() + Duration::hours(1)),
        ))
    }

    async fn login(&self, _start_url: &str, _profile: Option<&str>) -> Result<(), ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.token_after_login {
            *self.token.lock().unwrap() = Some(token.clone());
        }
        Ok(())
    }
}

/// Answers confirmations from a script; an exhausted script reads as unreadable input
pub struct ScriptedPrompter {
    interactive: bool,
    answers: Mutex<VecDeque<bool>>,
    inputs: Mutex<VecDeque<String>>,
    selections: Mutex<VecDeque<usize>>,
    confirm_calls: AtomicUsize,
}

impl ScriptedPrompter {
    pub fn interactive(answers: Vec<bool>) -> Self {
        Self {
            interactive: true,
            answers: Mutex::new(answers.into()),
            inputs: Mutex::new(VecDeque::new()),
            selections: Mutex::new(VecDeque::new()),
            confirm_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_inputs(self, inputs: Vec<&str>) -> Self {
        *self.inputs.lock().unwrap() = inputs.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_selections(self, selections: Vec<usize>) -> Self {
        *self.selections.lock().unwrap() = selections.into();
        self
    }

    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    async fn confirm(&self, message: &str, _default: bool) -> AuthResult<bool> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AuthError::interaction_required(format!("no answer for: {message}")))
    }

    async fn select(&self, message: &str, items: &[String]) -> AuthResult<usize> {
        self.selections
            .lock()
            .unwrap()
            .pop_front()
            .filter(|index| *index < items.len())
            .ok_or_else(|| AuthError::interaction_required(format!("no selection for: {message}")))
    }

    async fn input(&self, message: &str, default: Option<&str>) -> AuthResult<String> {
        match self.inputs.lock().unwrap().pop_front() {
            Some(value) if value.is_empty() => default
                .map(str::to_string)
                .ok_or_else(|| AuthError::interaction_required(format!("no input for: {message}"))),
            Some(value) => Ok(value),
            None => Err(AuthError::interaction_required(format!(
                "no input for: {message}"
            ))),
        }
    }
}

/// Source that counts acquisitions and hands out credentials with a fixed lifetime
pub struct CountingSource {
    method: &'static str,
    requires_expiry: bool,
    lifetime: Option<Duration>,
    failure: Mutex<Option<AuthError>>,
    delay: std::time::Duration,
    calls: AtomicUsize,
}

impl CountingSource {
    /// Cross-account-like source whose credentials live for `lifetime`
    pub fn temporary(lifetime: Duration) -> Self {
        Self {
            method: "cross-account-role",
            requires_expiry: true,
            lifetime: Some(lifetime),
            failure: Mutex::new(None),
            delay: std::time::Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Static-profile-like source with non-expiring credentials
    pub fn long_lived() -> Self {
        Self {
            method: "static-profile",
            requires_expiry: false,
            lifetime: None,
            failure: Mutex::new(None),
            delay: std::time::Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self, err: AuthError) -> Self {
        self.set_failure(Some(err));
        self
    }

    pub fn set_failure(&self, err: Option<AuthError>) {
        *self.failure.lock().unwrap() = err;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for CountingSource {
    fn method(&self) -> &'static str {
        self.method
    }

    fn requires_expiry(&self) -> bool {
        self.requires_expiry
    }

    fn validate(&self, _config: &AuthMethodConfig) -> AuthResult<()> {
        Ok(())
    }

    async fn resolve(&self, ctx: &RequestContext) -> AuthResult<Credentials> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.run(async {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let failure = self.failure.lock().unwrap().clone();
            if let Some(err) = failure {
                return Err(err);
            }
            let lifetime = self.lifetime;
            Ok(Credentials::new(
                format!("ASIATEST{call}"),
                "test-secret",
                lifetime.map(|_| "test-token".to_string()),
                lifetime.map(|lifetime| Utc::now() + lifetime),
                format!("{}:{}", self.method, TEST_ROLE_ARN),
            ))
        })
        .await
    }
}
