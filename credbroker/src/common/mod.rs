pub mod arn;
pub mod auth;
pub mod config;
pub mod types;

// Re-export everything for easy access
pub use arn::{Arn, PrincipalKind};
pub use auth::*;
pub use types::*;
