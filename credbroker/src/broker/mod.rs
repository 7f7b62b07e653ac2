pub mod assumer;
pub mod cache;
pub mod context;
pub mod error;
pub mod manager;
pub mod prompt;
pub mod sources;
pub mod status;

#[cfg(test)]
pub mod testing;

pub use context::RequestContext;
pub use error::{AuthError, AuthResult};
pub use manager::CredentialBroker;
pub use prompt::{NonInteractive, Prompter, TerminalPrompter};
pub use sources::Collaborators;
