use async_trait::async_trait;
use console::Term;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Select};
use tracing::warn;

use super::error::{AuthError, AuthResult};

/// UI collaborator used by the SSO and interactive sources (and the setup flow)
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Whether a human can answer prompts right now
    fn is_interactive(&self) -> bool;

    async fn confirm(&self, message: &str, default: bool) -> AuthResult<bool>;

    async fn select(&self, message: &str, items: &[String]) -> AuthResult<usize>;

    async fn input(&self, message: &str, default: Option<&str>) -> AuthResult<String>;
}

/// Headless stub for CI and credential-process use: every prompt fails fast
#[derive(Debug, Default, Clone)]
pub struct NonInteractive;

#[async_trait]
impl Prompter for NonInteractive {
    fn is_interactive(&self) -> bool {
        false
    }

    async fn confirm(&self, message: &str, _default: bool) -> AuthResult<bool> {
        Err(AuthError::interaction_required(format!(
            "confirmation needed: {message}"
        )))
    }

    async fn select(&self, message: &str, _items: &[String]) -> AuthResult<usize> {
        Err(AuthError::interaction_required(format!(
            "selection needed: {message}"
        )))
    }

    async fn input(&self, message: &str, _default: Option<&str>) -> AuthResult<String> {
        Err(AuthError::interaction_required(format!("input needed: {message}")))
    }
}

/// Prompts on stderr so stdout stays free for machine-readable output
#[derive(Debug, Default, Clone)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }
}

/// Unreadable input never counts as consent
fn prompt_failed(what: &str, e: impl std::fmt::Display) -> AuthError {
    warn!("Could not read {} from terminal: {}", what, e);
    AuthError::interaction_required(format!("could not read {what} from terminal: {e}"))
}

async fn blocking<T, F>(what: &'static str, f: F) -> AuthResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AuthResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| prompt_failed(what, e))?
}

#[async_trait]
impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        Term::stderr().is_term()
    }

    async fn confirm(&self, message: &str, default: bool) -> AuthResult<bool> {
        if !self.is_interactive() {
            return NonInteractive.confirm(message, default).await;
        }
        let message = message.to_string();
        blocking("confirmation", move || {
            let answer = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(message)
                .default(default)
                .interact_on_opt(&Term::stderr())
                .map_err(|e| prompt_failed("confirmation", e))?;
            // Esc is a "no"
            Ok(answer.unwrap_or(false))
        })
        .await
    }

    async fn select(&self, message: &str, items: &[String]) -> AuthResult<usize> {
        if !self.is_interactive() {
            return NonInteractive.select(message, items).await;
        }
        let message = message.to_string();
        let items = items.to_vec();
        blocking("selection", move || {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt(message)
                .items(&items)
                .default(0)
                .interact_on_opt(&Term::stderr())
                .map_err(|e| prompt_failed("selection", e))?
                .ok_or_else(|| AuthError::interaction_required("selection cancelled"))
        })
        .await
    }

    async fn input(&self, message: &str, default: Option<&str>) -> AuthResult<String> {
        if !self.is_interactive() {
            return NonInteractive.input(message, default).await;
        }
        let message = message.to_string();
        let default = default.map(str::to_string);
        blocking("input", move || {
            let theme = ColorfulTheme::default();
            let mut input = Input::<String>::with_theme(&theme).with_prompt(message);
            if let Some(default) = default {
                input = input.default(default);
            }
            input
                .interact_text_on(&Term::stderr())
                .map_err(|e| prompt_failed("input", e))
        })
        .await
    }
}
