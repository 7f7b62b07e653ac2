//! Read-only discovery of existing AWS configuration, used to offer setup choices.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ini::Ini;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::aws::sso_cache;
use crate::common::config::{
    AuthMethod, AuthMethodConfig, CrossAccountParams, SsoParams,
};

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Where a profile was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileOrigin {
    Config,
    Credentials,
    Both,
}

/// A profile from `~/.aws/config` and/or `~/.aws/credentials`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedProfile {
    pub name: String,
    pub origin: ProfileOrigin,
    pub region: Option<String>,
    pub has_static_keys: bool,
    pub sso_start_url: Option<String>,
    pub sso_region: Option<String>,
    pub sso_account_id: Option<String>,
    pub sso_role_name: Option<String>,
    pub role_arn: Option<String>,
    pub source_profile: Option<String>,
    pub role_session_name: Option<String>,
    /// The ID itself is never reported
    pub has_external_id: bool,
    #[serde(skip)]
    external_id: Option<String>,
}

impl DetectedProfile {
    pub fn new(name: &str, origin: ProfileOrigin) -> Self {
        Self {
            name: name.to_string(),
            origin,
            region: None,
            has_static_keys: false,
            sso_start_url: None,
            sso_region: None,
            sso_account_id: None,
            sso_role_name: None,
            role_arn: None,
            source_profile: None,
            role_session_name: None,
            has_external_id: false,
            external_id: None,
        }
    }

    /// Auth method this profile maps onto, if any
    pub fn suggested_method(&self) -> Option<&'static str> {
        if self.role_arn.is_some() {
            Some("cross-account-role")
        } else if self.sso_start_url.is_some()
            && self.sso_account_id.is_some()
            && self.sso_role_name.is_some()
        {
            Some("sso")
        } else if self.has_static_keys {
            Some("static-profile")
        } else {
            None
        }
    }
}

/// An SSO login found in the token cache
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedSsoLogin {
    pub start_url: String,
    pub region: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
}

/// Credentials exported in the process environment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedEnvironment {
    /// First four characters followed by a mask
    pub access_key_id: String,
    pub has_session_token: bool,
    pub region: Option<String>,
    pub profile: Option<String>,
}

/// Everything the detector found
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Detection {
    pub profiles: Vec<DetectedProfile>,
    pub sso_logins: Vec<DetectedSsoLogin>,
    pub environment: Option<DetectedEnvironment>,
    pub default_region: Option<String>,
}

/// A ready-to-use configuration derived from a detected profile
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub label: String,
    pub config: AuthMethodConfig,
}

/// Scans AWS config files, the SSO token cache and the environment. Never writes.
pub struct ConfigDetector {
    config_file: PathBuf,
    credentials_file: PathBuf,
    sso_cache_dir: Option<PathBuf>,
    env: EnvLookup,
}

impl ConfigDetector {
    pub fn new(config_file: PathBuf, credentials_file: PathBuf, sso_cache_dir: Option<PathBuf>) -> Self {
        Self {
            config_file,
            credentials_file,
            sso_cache_dir,
            env: Box::new(|key| std::env::var(key).ok()),
        }
    }

    /// Standard locations, honouring AWS_CONFIG_FILE and AWS_SHARED_CREDENTIALS_FILE
    pub fn from_environment() -> Result<Self> {
        let aws_dir = dirs::home_dir()
            .context("Could not determine home directory")?
            .join(".aws");
        let config_file = std::env::var("AWS_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| aws_dir.join("config"));
        let credentials_file = std::env::var("AWS_SHARED_CREDENTIALS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| aws_dir.join("credentials"));

        Ok(Self::new(
            config_file,
            credentials_file,
            sso_cache::default_cache_dir(),
        ))
    }

    /// Replace the environment variable lookup
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(env);
        self
    }

    pub async fn detect(&self) -> Result<Detection> {
        let config = load_ini(&self.config_file).await?;
        let credentials = load_ini(&self.credentials_file).await?;

        let mut profiles: BTreeMap<String, DetectedProfile> = BTreeMap::new();
        let mut sso_sessions: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();

        for (section, props) in config.iter() {
            let Some(section) = section else { continue };
            let section = section.trim();

            if let Some(name) = section.strip_prefix("sso-session ") {
                sso_sessions.insert(
                    name.trim().to_string(),
                    (
                        props.get("sso_start_url").map(str::to_string),
                        props.get("sso_region").map(str::to_string),
                    ),
                );
                continue;
            }

            let name = match section.strip_prefix("profile ") {
                Some(name) => name.trim(),
                None if section == "default" => "default",
                None => continue,
            };

            let profile = profiles
                .entry(name.to_string())
                .or_insert_with(|| DetectedProfile::new(name, ProfileOrigin::Config));
            let get = |key: &str| props.get(key).map(str::to_string);
            profile.region = get("region");
            profile.sso_start_url = get("sso_start_url");
            profile.sso_region = get("sso_region");
            profile.sso_account_id = get("sso_account_id");
            profile.sso_role_name = get("sso_role_name");
            profile.role_arn = get("role_arn");
            profile.source_profile = get("source_profile");
            profile.role_session_name = get("role_session_name");
            profile.external_id = get("external_id");
            profile.has_external_id = profile.external_id.is_some();
            profile.has_static_keys |= props.contains_key("aws_access_key_id");

            // Newer layout: the SSO portal lives in a shared [sso-session] block
            if let Some(session) = props.get("sso_session") {
                profile.sso_start_url.get_or_insert_with(|| format!("sso-session:{session}"));
            }
        }

        for (section, props) in credentials.iter() {
            let Some(name) = section.map(str::trim) else { continue };
            let profile = profiles
                .entry(name.to_string())
                .and_modify(|p| {
                    if p.origin == ProfileOrigin::Config {
                        p.origin = ProfileOrigin::Both;
                    }
                })
                .or_insert_with(|| DetectedProfile::new(name, ProfileOrigin::Credentials));
            profile.has_static_keys |= props.contains_key("aws_access_key_id")
                && props.contains_key("aws_secret_access_key");
        }

        for profile in profiles.values_mut() {
            let Some(session) = profile
                .sso_start_url
                .as_deref()
                .and_then(|url| url.strip_prefix("sso-session:"))
                .map(str::to_string)
            else {
                continue;
            };
            match sso_sessions.get(&session) {
                Some((start_url, region)) => {
                    profile.sso_start_url = start_url.clone();
                    if profile.sso_region.is_none() {
                        profile.sso_region = region.clone();
                    }
                }
                None => {
                    debug!("Profile {} references unknown sso-session {}", profile.name, session);
                    profile.sso_start_url = None;
                }
            }
        }

        let sso_logins = match &self.sso_cache_dir {
            Some(dir) => {
                let now = Utc::now();
                sso_cache::read_sessions(dir)
                    .await
                    .with_context(|| format!("Failed to read SSO cache: {}", dir.display()))?
                    .into_iter()
                    .map(|session| DetectedSsoLogin {
                        start_url: session.start_url,
                        region: session.region,
                        expired: session.expires_at <= now,
                        expires_at: session.expires_at,
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        let default_region = (self.env)("AWS_REGION").or_else(|| (self.env)("AWS_DEFAULT_REGION"));
        let environment = (self.env)("AWS_ACCESS_KEY_ID")
            .filter(|key| !key.is_empty())
            .filter(|_| (self.env)("AWS_SECRET_ACCESS_KEY").is_some_and(|s| !s.is_empty()))
            .map(|key| DetectedEnvironment {
                access_key_id: mask_key(&key),
                has_session_token: (self.env)("AWS_SESSION_TOKEN").is_some_and(|t| !t.is_empty()),
                region: default_region.clone(),
                profile: (self.env)("AWS_PROFILE"),
            });

        let detection = Detection {
            profiles: profiles.into_values().collect(),
            sso_logins,
            environment,
            default_region,
        };
        debug!(
            "Detected {} profiles, {} SSO logins",
            detection.profiles.len(),
            detection.sso_logins.len()
        );
        Ok(detection)
    }
}

impl Detection {
    /// Candidate broker configurations, one per usable profile
    pub fn suggestions(&self) -> Vec<Suggestion> {
        let fallback_region = self
            .default_region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        self.profiles
            .iter()
            .filter_map(|profile| {
                let method = match profile.suggested_method()? {
                    "cross-account-role" => AuthMethod::CrossAccountRole(CrossAccountParams {
                        role_arn: profile.role_arn.clone()?,
                        external_id: profile.external_id.clone(),
                        session_name: profile.role_session_name.clone(),
                        source_profile: profile.source_profile.clone(),
                    }),
                    "sso" => AuthMethod::Sso(SsoParams {
                        start_url: profile.sso_start_url.clone()?,
                        account_id: profile.sso_account_id.clone()?,
                        role_name: profile.sso_role_name.clone()?,
                        sso_region: profile.sso_region.clone(),
                        profile: Some(profile.name.clone()),
                    }),
                    _ => AuthMethod::StaticProfile {
                        profile: profile.name.clone(),
                    },
                };

                Some(Suggestion {
                    label: format!("{} ({})", profile.name, method.name()),
                    config: AuthMethodConfig {
                        region: profile.region.clone().unwrap_or_else(|| fallback_region.clone()),
                        session_duration_seconds: 3600,
                        method,
                    },
                })
            })
            .collect()
    }
}

async fn load_ini(path: &Path) -> Result<Ini> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ini::load_from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Ini::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    format!("{prefix}****")
}
