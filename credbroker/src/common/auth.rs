use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::arn::PrincipalKind;

/// Identity reported by STS GetCallerIdentity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// User ID or role ID with session suffix
    pub user_id: String,

    /// AWS account ID
    pub account: String,

    /// User or role ARN
    pub arn: String,

    /// Principal type parsed from the ARN
    pub principal: PrincipalKind,
}

impl CallerIdentity {
    pub fn new(
        user_id: impl Into<String>,
        account: impl Into<String>,
        arn: impl Into<String>,
    ) -> Self {
        let arn = arn.into();
        let principal = PrincipalKind::from_arn(&arn);
        Self {
            user_id: user_id.into(),
            account: account.into(),
            arn,
            principal,
        }
    }
}

/// Normalized authentication status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether an auth method is configured
    pub configured: bool,

    /// Whether usable, verified credentials are currently held
    pub active: bool,

    pub method: String,

    pub region: String,

    pub identity: Option<CallerIdentity>,

    pub expires_at: Option<DateTime<Utc>>,

    /// Most recent failure, if any
    pub error: Option<String>,

    /// Credentials are missing or within the safety margin of expiry
    pub refresh_needed: bool,
}

impl AuthStatus {
    pub fn unconfigured(error: Option<String>) -> Self {
        Self {
            configured: false,
            active: false,
            method: String::new(),
            region: String::new(),
            identity: None,
            expires_at: None,
            error,
            refresh_needed: true,
        }
    }
}
