use clap::{Parser, ValueEnum};

#[derive(Parser, Debug, Clone)]
pub struct CredentialsCommand {
    /// Ignore cached credentials and run the full authentication flow
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct StatusCommand {
    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,

    /// Report without trying to acquire credentials first
    #[arg(long)]
    pub no_resolve: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct TestCommand {
    /// Print the caller identity as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct RefreshCommand {}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodArg {
    StaticProfile,
    Sso,
    Interactive,
    CrossAccountRole,
}

#[derive(Parser, Debug, Clone)]
pub struct SetupCommand {
    /// Authentication method; when omitted, detected profiles are offered
    #[arg(long, value_enum)]
    pub method: Option<MethodArg>,

    /// AWS region for STS and SSO calls
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Lifetime of temporary credentials in seconds (900-43200)
    #[arg(long, default_value = "3600")]
    pub duration: i32,

    /// Profile holding long-lived credentials (static-profile)
    #[arg(long)]
    pub profile: Option<String>,

    /// SSO portal start URL (sso, interactive)
    #[arg(long)]
    pub start_url: Option<String>,

    /// SSO account ID (sso, interactive)
    #[arg(long)]
    pub account_id: Option<String>,

    /// SSO role name (sso, interactive)
    #[arg(long)]
    pub role_name: Option<String>,

    /// Region of the IAM Identity Center instance
    #[arg(long)]
    pub sso_region: Option<String>,

    /// Role to assume (cross-account-role)
    #[arg(long)]
    pub role_arn: Option<String>,

    /// External ID required by the role trust policy
    #[arg(long, env = "CREDBROKER_EXTERNAL_ID", hide_env_values = true)]
    pub external_id: Option<String>,

    /// Role session name; generated when omitted
    #[arg(long)]
    pub session_name: Option<String>,

    /// Profile holding the base credentials for role assumption
    #[arg(long)]
    pub source_profile: Option<String>,

    /// Verify the configuration without writing it
    #[arg(long)]
    pub dry_run: bool,

    /// Overwrite an existing configuration file without asking
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct DetectCommand {
    /// Print the findings as JSON
    #[arg(long)]
    pub json: bool,
}
