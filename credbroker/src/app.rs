use anyhow::{bail, Context, Result};
use console::style;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{
    AuthError, AuthResult, Collaborators, CredentialBroker, NonInteractive, Prompter,
    RequestContext, TerminalPrompter,
};
use crate::commands::{
    CredentialsCommand, DetectCommand, MethodArg, RefreshCommand, SetupCommand, StatusCommand,
    TestCommand,
};
use crate::common::config::{
    default_config_path, AuthMethod, AuthMethodConfig, BrokerConfig, BrokerSettings,
    CrossAccountParams, SsoParams,
};
use crate::common::{AuthStatus, CredentialProcessError, CredentialProcessOutput};
use crate::detect::{ConfigDetector, Detection};

/// Process-wide settings shared by every command
pub struct App {
    config_path: PathBuf,
    config: Option<BrokerConfig>,
    load_error: Option<String>,
    interactive: bool,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl App {
    /// Read the configuration file if present. A broken file is remembered, not fatal,
    /// so `setup` and `detect` still work.
    pub fn load(config_path: Option<PathBuf>, interactive: bool, timeout: Option<u64>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => default_config_path()
                .context("Could not determine the configuration directory, pass --config")?,
        };

        let (config, load_error) = if config_path.exists() {
            match BrokerConfig::load(&config_path) {
                Ok(config) => (Some(config), None),
                Err(e) => (None, Some(format!("{e:#}"))),
            }
        } else {
            (None, None)
        };

        let settings = config
            .as_ref()
            .map(|c| c.broker.clone())
            .unwrap_or_default();
        let timeout = timeout.unwrap_or(settings.request_timeout_seconds);

        Ok(Self {
            config_path,
            config,
            load_error,
            interactive: interactive || settings.interactive,
            timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn log_level(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.logging.level.as_str())
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Cancel in-flight work on Ctrl-C
    pub fn cancel_on_ctrl_c(&self) {
        let token = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                token.cancel();
            }
        });
    }

    fn settings(&self) -> BrokerSettings {
        self.config
            .as_ref()
            .map(|c| c.broker.clone())
            .unwrap_or_default()
    }

    fn request(&self) -> RequestContext {
        let ctx = RequestContext::new().with_cancellation(self.cancel.child_token());
        match self.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }

    fn prompter(&self) -> Arc<dyn Prompter> {
        if self.interactive {
            Arc::new(TerminalPrompter::new())
        } else {
            Arc::new(NonInteractive)
        }
    }

    fn broker(&self) -> AuthResult<CredentialBroker> {
        match &self.config {
            Some(config) => CredentialBroker::new(
                config.auth.clone(),
                Collaborators::aws(self.prompter()),
                config.broker.clone(),
            ),
            None => Err(self
                .load_error
                .as_ref()
                .map(|e| AuthError::config(e.clone()))
                .unwrap_or_else(AuthError::not_configured)),
        }
    }
}

/// Print a failure with a hint and pick the exit code
fn report_failure(e: &AuthError) -> ExitCode {
    error!("{}", e);
    eprintln!("{} {}", style("❌").red(), e);

    let hint = match e {
        AuthError::Config { .. } => Some("Run `credbroker setup` to (re)configure authentication"),
        AuthError::InteractionRequired { .. } => {
            Some("Re-run with --interactive, or sign in with `aws sso login` first")
        }
        AuthError::RoleAssumptionDenied { .. } => {
            Some("Check the role trust policy and the external ID")
        }
        AuthError::BaseCredentialsInvalid { .. } => {
            Some("The base credentials are missing, expired or revoked")
        }
        AuthError::Transient { .. } => Some("This is usually temporary, try again"),
        _ => None,
    };
    if let Some(hint) = hint {
        eprintln!("   {}", style(hint).dim());
    }

    ExitCode::from(e.exit_code())
}

/// credential-process provider: JSON on stdout, nothing else
pub async fn credentials(app: &App, args: CredentialsCommand) -> ExitCode {
    let result = async {
        let broker = app.broker()?;
        let ctx = app.request();
        if args.refresh {
            broker.refresh(&ctx).await
        } else {
            broker.resolve_credentials(&ctx).await
        }
    }
    .await;

    match result {
        Ok(credentials) => {
            debug!("Serving credentials from {}", credentials.source_label);
            match serde_json::to_string(&CredentialProcessOutput::from(&credentials)) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Failed to encode credentials: {}", e);
                    print_process_error(&e.to_string());
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            error!("Credential process failed: {}", e);
            print_process_error(&e.to_string());
            ExitCode::from(e.exit_code())
        }
    }
}

fn print_process_error(message: &str) {
    let payload = CredentialProcessError {
        error: message.to_string(),
    };
    match serde_json::to_string(&payload) {
        Ok(json) => println!("{json}"),
        Err(_) => println!(r#"{{"error":"credential process failed"}}"#),
    }
}

pub async fn status(app: &App, args: StatusCommand) -> Result<ExitCode> {
    let ctx = app.request();
    let status = match app.broker() {
        Ok(broker) => {
            if !args.no_resolve {
                if let Err(e) = broker.resolve_credentials(&ctx).await {
                    debug!("Resolve before status failed: {}", e);
                }
            }
            broker.status(&ctx).await
        }
        Err(e) => AuthStatus::unconfigured(Some(e.to_string())),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }

    Ok(if status.active {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_status(status: &AuthStatus) {
    println!();
    if !status.configured {
        println!("{} {}", style("⚪").dim(), style("Not configured").bold());
    } else if status.active {
        println!("{} {}", style("✅").green(), style("Authenticated").bold());
    } else {
        println!("{} {}", style("❌").red(), style("Not authenticated").bold());
    }

    if status.configured {
        println!("   Method:     {}", status.method);
        println!("   Region:     {}", status.region);
    }
    if let Some(identity) = &status.identity {
        println!("   Identity:   {}", style(&identity.arn).cyan());
        println!("   Account:    {}", identity.account);
        println!("   Principal:  {}", identity.principal.label());
    }
    match status.expires_at {
        Some(expires_at) => println!("   Expires:    {}", expires_at.to_rfc3339()),
        None if status.identity.is_some() => println!("   Expires:    never"),
        None => {}
    }
    if status.configured && status.refresh_needed {
        if status.expires_at.is_none() && status.identity.is_some() {
            println!("   {}", style("⚠️  Long-lived credentials, consider rotating").yellow());
        } else {
            println!("   {}", style("⚠️  Refresh needed").yellow());
        }
    }
    if let Some(error) = &status.error {
        println!("   Error:      {}", style(error).red());
    }
    println!();
}

pub async fn test(app: &App, args: TestCommand) -> Result<ExitCode> {
    let broker = match app.broker() {
        Ok(broker) => broker,
        Err(e) => return Ok(report_failure(&e)),
    };

    eprintln!("🔍 Testing connection...");
    match broker.test_connection(&app.request()).await {
        Ok(identity) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&identity)?);
            } else {
                println!("{} Connected as {}", style("✅").green(), style(&identity.arn).cyan());
                println!("   Account:   {}", identity.account);
                println!("   User ID:   {}", identity.user_id);
                println!("   Principal: {}", identity.principal.label());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report_failure(&e)),
    }
}

pub async fn refresh(app: &App, _args: RefreshCommand) -> Result<ExitCode> {
    let broker = match app.broker() {
        Ok(broker) => broker,
        Err(e) => return Ok(report_failure(&e)),
    };

    eprintln!("🔄 Refreshing credentials...");
    match broker.refresh(&app.request()).await {
        Ok(credentials) => {
            println!(
                "{} Refreshed credentials from {}",
                style("✅").green(),
                credentials.source_label
            );
            if let Some(expires_at) = credentials.expires_at {
                println!("   Expires: {}", expires_at.to_rfc3339());
            }
            info!("Broker is {}", broker.phase());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(report_failure(&e)),
    }
}

pub async fn setup(app: &App, args: SetupCommand) -> Result<ExitCode> {
    println!();
    println!("🔐 credbroker setup");
    println!();

    let prompter = app.prompter();
    let auth = match args.method {
        Some(method) => config_from_args(method, &args)?,
        None => {
            let detection = ConfigDetector::from_environment()?.detect().await?;
            choose_detected(prompter.as_ref(), &detection, &args).await?
        }
    };

    let settings = app.settings();
    let broker = CredentialBroker::unconfigured(Collaborators::aws(prompter.clone()), settings.clone());

    println!("⏳ Verifying {} authentication...", auth.method.name());
    let identity = match broker.setup(&app.request(), auth.clone()).await {
        Ok(identity) => identity,
        Err(e) => return Ok(report_failure(&e)),
    };
    println!("{} Authenticated as {}", style("✅").green(), style(&identity.arn).cyan());

    if args.dry_run {
        println!("   Dry run, configuration not written");
        return Ok(ExitCode::SUCCESS);
    }

    if app.config_path.exists() && !args.force {
        let overwrite = prompter
            .confirm(
                &format!("Overwrite {}?", app.config_path.display()),
                false,
            )
            .await;
        match overwrite {
            Ok(true) => {}
            Ok(false) => {
                println!("   Configuration not written");
                return Ok(ExitCode::FAILURE);
            }
            Err(e) => return Ok(report_failure(&e)),
        }
    }

    let config = BrokerConfig {
        auth,
        broker: settings,
        logging: app
            .config
            .as_ref()
            .map(|c| c.logging.clone())
            .unwrap_or_default(),
    };
    save_config(&config, &app.config_path)?;
    Ok(ExitCode::SUCCESS)
}

fn save_config(config: &BrokerConfig, path: &Path) -> Result<()> {
    config.save(path)?;
    println!("💾 Saved configuration to {}", path.display());
    info!("Wrote {} configuration to {}", config.auth.method.name(), path.display());
    Ok(())
}

/// Build a method configuration from setup flags
fn config_from_args(method: MethodArg, args: &SetupCommand) -> Result<AuthMethodConfig> {
    let sso_params = |name: &str| -> Result<SsoParams> {
        Ok(SsoParams {
            start_url: args
                .start_url
                .clone()
                .with_context(|| format!("--start-url is required for {name}"))?,
            account_id: args
                .account_id
                .clone()
                .with_context(|| format!("--account-id is required for {name}"))?,
            role_name: args
                .role_name
                .clone()
                .with_context(|| format!("--role-name is required for {name}"))?,
            sso_region: args.sso_region.clone(),
            profile: args.profile.clone(),
        })
    };

    let method = match method {
        MethodArg::StaticProfile => AuthMethod::StaticProfile {
            profile: args.profile.clone().unwrap_or_else(|| "default".to_string()),
        },
        MethodArg::Sso => AuthMethod::Sso(sso_params("sso")?),
        MethodArg::Interactive => AuthMethod::Interactive(sso_params("interactive")?),
        MethodArg::CrossAccountRole => AuthMethod::CrossAccountRole(CrossAccountParams {
            role_arn: args
                .role_arn
                .clone()
                .context("--role-arn is required for cross-account-role")?,
            external_id: args.external_id.clone().filter(|id| !id.trim().is_empty()),
            session_name: args.session_name.clone(),
            source_profile: args.source_profile.clone(),
        }),
    };

    Ok(AuthMethodConfig {
        region: args.region.clone().unwrap_or_else(|| "us-east-1".to_string()),
        session_duration_seconds: args.duration,
        method,
    })
}

/// Offer the detected profiles and return the chosen configuration
async fn choose_detected(
    prompter: &dyn Prompter,
    detection: &Detection,
    args: &SetupCommand,
) -> Result<AuthMethodConfig> {
    let mut suggestions = detection.suggestions();
    if suggestions.is_empty() {
        bail!("No usable AWS profiles found, pass --method and its parameters");
    }

    let labels: Vec<String> = suggestions.iter().map(|s| s.label.clone()).collect();
    let index = prompter
        .select("Which profile should credbroker use?", &labels)
        .await?;

    let mut chosen = suggestions.swap_remove(index).config;
    if let Some(region) = &args.region {
        chosen.region = region.clone();
    }
    chosen.session_duration_seconds = args.duration;

    if let AuthMethod::CrossAccountRole(params) = &mut chosen.method {
        let flag = args.external_id.clone().filter(|id| !id.trim().is_empty());
        if flag.is_some() {
            params.external_id = flag;
        } else if params.external_id.is_none() && prompter.is_interactive() {
            let entered = prompter
                .input("External ID (leave empty if the role has none)", Some(""))
                .await?;
            params.external_id = Some(entered.trim().to_string()).filter(|id| !id.is_empty());
        }
    }
    Ok(chosen)
}

pub async fn detect(_app: &App, args: DetectCommand) -> Result<ExitCode> {
    let detection = ConfigDetector::from_environment()?.detect().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&detection)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    println!("{}", style("AWS profiles").bold());
    if detection.profiles.is_empty() {
        println!("   none");
    }
    for profile in &detection.profiles {
        let method = profile.suggested_method().unwrap_or("unusable");
        println!(
            "   {:<24} {:<20} {}",
            profile.name,
            style(method).cyan(),
            profile.region.as_deref().unwrap_or("-")
        );
    }

    println!();
    println!("{}", style("SSO logins").bold());
    if detection.sso_logins.is_empty() {
        println!("   none");
    }
    for login in &detection.sso_logins {
        let state = if login.expired {
            style("expired").red()
        } else {
            style("valid").green()
        };
        println!(
            "   {} ({} until {})",
            login.start_url,
            state,
            login.expires_at.to_rfc3339()
        );
    }

    println!();
    println!("{}", style("Environment").bold());
    match &detection.environment {
        Some(env) => println!(
            "   {} {}",
            env.access_key_id,
            if env.has_session_token { "(session)" } else { "(long-lived)" }
        ),
        None => println!("   no credentials exported"),
    }
    println!();

    Ok(ExitCode::SUCCESS)
}
