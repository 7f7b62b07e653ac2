use async_trait::async_trait;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_sts::config::{BehaviorVersion, Region};
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sts::Client as StsClient;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::SystemTime;
use tracing::{debug, info};

use super::sso_cache;
use super::{
    ApiError, AssumeRoleRequest, AssumedRole, CredentialLookup, ProfileCredentials, SsoApi,
    SsoToken, StsApi,
};
use crate::common::{CallerIdentity, Credentials};

const PROVIDER_NAME: &str = "credbroker";

/// STS capability backed by the AWS SDK
///
/// A client is built per call because every call may be signed with different credentials.
#[derive(Debug, Default, Clone)]
pub struct SdkSts;

impl SdkSts {
    pub fn new() -> Self {
        Self
    }

    fn client(&self, credentials: &Credentials, region: &str) -> StsClient {
        let provider = aws_credential_types::Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.expose_secret().clone(),
            credentials
                .session_token
                .as_ref()
                .map(|token| token.expose_secret().clone()),
            credentials.expires_at.map(SystemTime::from),
            PROVIDER_NAME,
        );

        let config = aws_sdk_sts::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(provider)
            .build();

        StsClient::from_conf(config)
    }
}

#[async_trait]
impl StsApi for SdkSts {
    async fn assume_role(
        &self,
        base: &Credentials,
        region: &str,
        request: &AssumeRoleRequest,
    ) -> Result<AssumedRole, ApiError> {
        let response = self
            .client(base, region)
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.role_session_name)
            .duration_seconds(request.duration_seconds)
            .set_external_id(request.external_id.clone())
            .send()
            .await
            .map_err(map_sdk_error)?;

        let sts_creds = response
            .credentials()
            .ok_or_else(|| ApiError::other("AWS STS returned no credentials"))?;

        let expiration = *sts_creds.expiration();
        let expiration = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(|| ApiError::other("AWS STS returned an invalid expiration"))?;

        Ok(AssumedRole {
            access_key_id: sts_creds.access_key_id().to_string(),
            secret_access_key: SecretString::new(sts_creds.secret_access_key().to_string()),
            session_token: SecretString::new(sts_creds.session_token().to_string()),
            expiration,
        })
    }

    async fn get_caller_identity(
        &self,
        credentials: &Credentials,
        region: &str,
    ) -> Result<CallerIdentity, ApiError> {
        let identity = self
            .client(credentials, region)
            .get_caller_identity()
            .send()
            .await
            .map_err(map_sdk_error)?;

        match (identity.user_id(), identity.account(), identity.arn()) {
            (Some(user_id), Some(account), Some(arn)) => {
                info!("Validated IAM identity: {}", arn);
                Ok(CallerIdentity::new(user_id, account, arn))
            }
            _ => Err(ApiError::other(
                "STS GetCallerIdentity response is missing identity fields",
            )),
        }
    }
}

/// Profile and environment lookup backed by the aws-config providers
#[derive(Debug, Default, Clone)]
pub struct SdkCredentialLookup;

impl SdkCredentialLookup {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialLookup for SdkCredentialLookup {
    async fn lookup_profile(&self, name: &str) -> Result<ProfileCredentials, ApiError> {
        debug!("Looking up credentials for profile: {}", name);
        let provider = aws_config::profile::ProfileFileCredentialsProvider::builder()
            .profile_name(name)
            .build();
        let credentials = provider
            .provide_credentials()
            .await
            .map_err(map_credentials_error)?;
        Ok(profile_credentials(&credentials))
    }

    async fn lookup_environment(&self) -> Result<ProfileCredentials, ApiError> {
        let provider = aws_config::environment::EnvironmentVariableCredentialsProvider::new();
        let credentials = provider
            .provide_credentials()
            .await
            .map_err(map_credentials_error)?;
        Ok(profile_credentials(&credentials))
    }
}

/// SSO capability: token from the local cache, role credentials from the portal API
#[derive(Debug, Clone)]
pub struct SdkSso {
    cache_dir: Option<PathBuf>,
}

impl SdkSso {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self { cache_dir }
    }
}

impl Default for SdkSso {
    fn default() -> Self {
        Self::new(sso_cache::default_cache_dir())
    }
}

#[async_trait]
impl SsoApi for SdkSso {
    async fn get_sso_token(
        &self,
        start_url: &str,
        region: &str,
    ) -> Result<Option<SsoToken>, ApiError> {
        let Some(dir) = &self.cache_dir else {
            return Ok(None);
        };

        let sessions = sso_cache::read_sessions(dir)
            .await
            .map_err(|e| ApiError::other(format!("Failed to read SSO cache: {e}")))?;
        debug!(
            "Found {} cached SSO sessions in {} (region {})",
            sessions.len(),
            dir.display(),
            region
        );

        Ok(sso_cache::find_token(&sessions, start_url, Utc::now()))
    }

    async fn get_role_credentials(
        &self,
        token: &SsoToken,
        account_id: &str,
        role_name: &str,
        region: &str,
    ) -> Result<ProfileCredentials, ApiError> {
        let config = aws_sdk_sso::Config::builder()
            .behavior_version(aws_sdk_sso::config::BehaviorVersion::latest())
            .region(aws_sdk_sso::config::Region::new(region.to_string()))
            .build();
        let client = aws_sdk_sso::Client::from_conf(config);

        let response = client
            .get_role_credentials()
            .account_id(account_id)
            .role_name(role_name)
            .access_token(token.access_token.expose_secret())
            .send()
            .await
            .map_err(map_sdk_error)?;

        let role_creds = response
            .role_credentials()
            .ok_or_else(|| ApiError::other("AWS SSO returned no role credentials"))?;

        match (role_creds.access_key_id(), role_creds.secret_access_key()) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(ProfileCredentials {
                access_key_id: access_key_id.to_string(),
                secret_access_key: SecretString::new(secret_access_key.to_string()),
                session_token: role_creds
                    .session_token()
                    .map(|token| SecretString::new(token.to_string())),
                expiration: DateTime::<Utc>::from_timestamp_millis(role_creds.expiration()),
            }),
            _ => Err(ApiError::other("AWS SSO role credentials are incomplete")),
        }
    }

    async fn login(&self, start_url: &str, profile: Option<&str>) -> Result<(), ApiError> {
        info!("Starting AWS SSO login for {}", start_url);

        let mut command = tokio::process::Command::new("aws");
        command.args(["sso", "login"]);
        if let Some(profile) = profile {
            command.args(["--profile", profile]);
        }

        // The device-code prompt must reach the user without touching our stdout
        let status = command
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::io::stderr()))
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| ApiError::other(format!("Failed to run `aws sso login`: {e}")))?;

        if !status.success() {
            return Err(ApiError::other(format!("aws sso login exited with {status}")));
        }

        Ok(())
    }
}

fn profile_credentials(credentials: &aws_credential_types::Credentials) -> ProfileCredentials {
    ProfileCredentials {
        access_key_id: credentials.access_key_id().to_string(),
        secret_access_key: SecretString::new(credentials.secret_access_key().to_string()),
        session_token: credentials
            .session_token()
            .map(|token| SecretString::new(token.to_string())),
        expiration: credentials.expiry().map(DateTime::<Utc>::from),
    }
}

fn map_sdk_error<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) => ApiError::Timeout,
        SdkError::DispatchFailure(failure) if failure.is_timeout() => ApiError::Timeout,
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ApiError::network(DisplayErrorContext(&err).to_string())
        }
        SdkError::ServiceError(service) => {
            let inner = service.err();
            ApiError::service(
                inner.code().unwrap_or("Unknown"),
                inner.message().unwrap_or_default(),
            )
        }
        _ => ApiError::other(DisplayErrorContext(&err).to_string()),
    }
}

fn map_credentials_error(err: CredentialsError) -> ApiError {
    let message = DisplayErrorContext(&err).to_string();
    match err {
        CredentialsError::CredentialsNotLoaded(_) => ApiError::not_found(message),
        CredentialsError::ProviderTimedOut(_) => ApiError::Timeout,
        CredentialsError::InvalidConfiguration(_) => ApiError::InvalidConfiguration { message },
        CredentialsError::ProviderError(_) => ApiError::service("ProviderError", message),
        _ => ApiError::other(message),
    }
}
