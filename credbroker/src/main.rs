use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod aws;
mod broker;
mod commands;
mod common;
mod detect;

use app::App;
use commands::{
    CredentialsCommand, DetectCommand, RefreshCommand, SetupCommand, StatusCommand, TestCommand,
};

#[derive(Parser)]
#[command(
    name = "credbroker",
    about = "Credential broker - short-lived AWS credentials from profiles, SSO and cross-account roles",
    version = env!("CARGO_PKG_VERSION"),
    author = "ktruck"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ~/.config/credbroker/config.yaml)
    #[arg(short, long, global = true, env = "CREDBROKER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Allow prompting on the terminal (SSO sign-in, setup choices)
    #[arg(short, long, global = true, env = "CREDBROKER_INTERACTIVE")]
    interactive: bool,

    /// Per-operation timeout in seconds, 0 disables it
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print credentials in the credential_process JSON format
    Credentials(CredentialsCommand),
    /// Show authentication status
    Status(StatusCommand),
    /// Verify credentials with a live identity check
    Test(TestCommand),
    /// Re-run the full authentication flow
    Refresh(RefreshCommand),
    /// Choose and verify an authentication method, then save it
    Setup(SetupCommand),
    /// List AWS profiles, SSO logins and environment credentials
    Detect(DetectCommand),
}

/// Logs go to stderr so stdout stays machine readable. RUST_LOG wins over flags.
fn init_logging(cli: &Cli, configured_level: Option<&str>) {
    let level = if cli.verbose {
        "debug"
    } else {
        cli.log_level
            .as_deref()
            .or(configured_level)
            .unwrap_or("warn")
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let app = match App::load(cli.config.clone(), cli.interactive, cli.timeout) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("❌ {e:#}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&cli, app.log_level());
    if let Some(load_error) = app.load_error() {
        warn!("Ignoring unreadable configuration: {}", load_error);
    }
    app.cancel_on_ctrl_c();

    let result = match cli.command {
        Commands::Credentials(cmd) => {
            debug!("Running credential process");
            Ok(app::credentials(&app, cmd).await)
        }
        Commands::Status(cmd) => app::status(&app, cmd).await,
        Commands::Test(cmd) => app::test(&app, cmd).await,
        Commands::Refresh(cmd) => app::refresh(&app, cmd).await,
        Commands::Setup(cmd) => app::setup(&app, cmd).await,
        Commands::Detect(cmd) => app::detect(&app, cmd).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}
