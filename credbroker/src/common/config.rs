use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MIN_SESSION_DURATION: i32 = 900;
pub const MAX_SESSION_DURATION: i32 = 43200;

/// Top-level configuration file for the credential broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    /// How credentials are obtained
    pub auth: AuthMethodConfig,

    /// Broker behaviour (staleness margin, prompting, timeouts)
    #[serde(default)]
    pub broker: BrokerSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Immutable description of how to obtain credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthMethodConfig {
    /// AWS region used for STS and SSO calls
    #[serde(default = "default_aws_region")]
    pub region: String,

    /// Requested lifetime of temporary credentials
    #[serde(default = "default_session_duration")]
    pub session_duration_seconds: i32,

    #[serde(flatten)]
    pub method: AuthMethod,
}

/// Method tag plus the method-specific payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum AuthMethod {
    StaticProfile { profile: String },
    Sso(SsoParams),
    Interactive(SsoParams),
    CrossAccountRole(CrossAccountParams),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SsoParams {
    /// SSO portal start URL
    pub start_url: String,

    /// Account the SSO role lives in
    pub account_id: String,

    /// Permission set / role name to request
    pub role_name: String,

    /// Region of the IAM Identity Center instance, defaults to `region`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_region: Option<String>,

    /// Profile passed to `aws sso login` when a new session is needed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossAccountParams {
    pub role_arn: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Overrides the generated `<tool>-<timestamp>` session name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,

    /// Profile holding the base credentials; environment variables are used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_profile: Option<String>,
}

impl fmt::Debug for CrossAccountParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossAccountParams")
            .field("role_arn", &self.role_arn)
            .field("external_id", &self.external_id.as_ref().map(|_| "[REDACTED]"))
            .field("session_name", &self.session_name)
            .field("source_profile", &self.source_profile)
            .finish()
    }
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StaticProfile { .. } => "static-profile",
            Self::Sso(_) => "sso",
            Self::Interactive(_) => "interactive",
            Self::CrossAccountRole(_) => "cross-account-role",
        }
    }
}

/// Broker behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSettings {
    /// Re-resolve this many seconds before credentials expire
    #[serde(default = "default_safety_margin")]
    pub safety_margin_seconds: u64,

    /// Maximum age of a cached GetCallerIdentity result used by status
    #[serde(default = "default_identity_probe_interval")]
    pub identity_probe_interval_seconds: u64,

    /// Timeout applied to each broker operation
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Whether the broker may prompt on the terminal
    #[serde(default)]
    pub interactive: bool,

    /// Prefix for generated role session names
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            safety_margin_seconds: default_safety_margin(),
            identity_probe_interval_seconds: default_identity_probe_interval(),
            request_timeout_seconds: default_request_timeout(),
            interactive: false,
            tool_name: default_tool_name(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl BrokerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config")?;

        // May hold an external ID: never readable by others, not even briefly
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .with_context(|| format!("Failed to open config file: {}", path.display()))?;

        // An existing file keeps its old mode on open
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("credbroker").join("config.yaml"))
}

// Default value functions
fn default_aws_region() -> String {
    "us-east-1".to_string()
}

fn default_session_duration() -> i32 {
    3600
}

fn default_safety_margin() -> u64 {
    300
}

fn default_identity_probe_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    120
}

fn default_tool_name() -> String {
    "credbroker".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cross_account_config() {
        let yaml = r#"
auth:
  method: cross-account-role
  region: eu-west-1
  session_duration_seconds: 3600
  role_arn: arn:aws:iam::123456789012:role/Demo
  external_id: secret-1
  source_profile: base
"#;
        let config: BrokerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.auth.region, "eu-west-1");
        assert_eq!(config.auth.method.name(), "cross-account-role");
        match &config.auth.method {
            AuthMethod::CrossAccountRole(params) => {
                assert_eq!(params.role_arn, "arn:aws:iam::123456789012:role/Demo");
                assert_eq!(params.external_id.as_deref(), Some("secret-1"));
                assert_eq!(params.source_profile.as_deref(), Some("base"));
                assert!(params.session_name.is_none());
            }
            other => panic!("unexpected method: {:?}", other),
        }
        assert_eq!(config.broker, BrokerSettings::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_defaults_applied() {
        let yaml = r#"
auth:
  method: static-profile
  profile: default
broker:
  interactive: true
"#;
        let config: BrokerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.auth.region, "us-east-1");
        assert_eq!(config.auth.session_duration_seconds, 3600);
        assert!(config.broker.interactive);
        assert_eq!(config.broker.safety_margin_seconds, 300);
        assert_eq!(config.broker.tool_name, "credbroker");
    }

    #[test]
    fn test_unknown_method_rejected() {
        let yaml = r#"
auth:
  method: saml
"#;
        assert!(serde_yaml::from_str::<BrokerConfig>(yaml).is_err());
    }

    #[test]
    fn test_debug_redacts_external_id() {
        let params = CrossAccountParams {
            role_arn: "arn:aws:iam::123456789012:role/Demo".to_string(),
            external_id: Some("secret-1".to_string()),
            session_name: None,
            source_profile: None,
        };
        let debug = format!("{:?}", params);
        assert!(!debug.contains("secret-1"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let config = BrokerConfig {
            auth: AuthMethodConfig {
                region: "us-west-2".to_string(),
                session_duration_seconds: 900,
                method: AuthMethod::Sso(SsoParams {
                    start_url: "https://example.awsapps.com/start".to_string(),
                    account_id: "123456789012".to_string(),
                    role_name: "ReadOnly".to_string(),
                    sso_region: None,
                    profile: Some("dev".to_string()),
                }),
            },
            broker: BrokerSettings::default(),
            logging: LoggingConfig::default(),
        };

        config.save(&path).unwrap();
        let loaded = BrokerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[cfg(unix)]
    #[test]
    fn test_save_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "stale").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let config = BrokerConfig {
            auth: AuthMethodConfig {
                region: "us-east-1".to_string(),
                session_duration_seconds: 3600,
                method: AuthMethod::StaticProfile {
                    profile: "ci".to_string(),
                },
            },
            broker: BrokerSettings::default(),
            logging: LoggingConfig::default(),
        };
        config.save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(BrokerConfig::load(&path).unwrap(), config);
    }
}
