use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A parsed Amazon Resource Name
///
/// `arn:partition:service:region:account-id:resource`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArnParseError(String);

impl fmt::Display for ArnParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed ARN: {}", self.0)
    }
}

impl std::error::Error for ArnParseError {}

impl FromStr for Arn {
    type Err = ArnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The resource segment may itself contain ':'
        let parts: Vec<&str> = s.splitn(6, ':').collect();
        if parts.len() != 6 || parts[0] != "arn" {
            return Err(ArnParseError(s.to_string()));
        }
        if parts[1].is_empty() || parts[2].is_empty() || parts[5].is_empty() {
            return Err(ArnParseError(s.to_string()));
        }

        Ok(Self {
            partition: parts[1].to_string(),
            service: parts[2].to_string(),
            region: parts[3].to_string(),
            account_id: parts[4].to_string(),
            resource: parts[5].to_string(),
        })
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

impl Arn {
    /// Split the resource into its type and the remainder (`role/Path/Name` -> `role`, `Path/Name`)
    pub fn resource_type(&self) -> (&str, &str) {
        match self.resource.split_once(|c: char| c == '/' || c == ':') {
            Some((kind, rest)) => (kind, rest),
            None => (self.resource.as_str(), ""),
        }
    }

    /// True for `arn:<partition>:iam::<12 digit account>:role/<name>`
    pub fn is_iam_role(&self) -> bool {
        let (kind, name) = self.resource_type();
        self.service == "iam"
            && kind == "role"
            && !name.is_empty()
            && self.account_id.len() == 12
            && self.account_id.chars().all(|c| c.is_ascii_digit())
    }
}

/// What kind of principal a caller identity ARN refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrincipalKind {
    Root,
    User { name: String },
    Role { name: String },
    AssumedRole { role_name: String, session_name: String },
    FederatedUser { name: String },
    Unknown,
}

impl PrincipalKind {
    pub fn from_arn(arn: &str) -> Self {
        let Ok(parsed) = arn.parse::<Arn>() else {
            return Self::Unknown;
        };

        let (kind, rest) = parsed.resource_type();
        match (parsed.service.as_str(), kind) {
            ("iam", "root") if rest.is_empty() => Self::Root,
            ("iam", "user") if !rest.is_empty() => Self::User {
                name: last_segment(rest).to_string(),
            },
            ("iam", "role") if !rest.is_empty() => Self::Role {
                name: last_segment(rest).to_string(),
            },
            ("sts", "assumed-role") => match rest.rsplit_once('/') {
                Some((role, session)) if !role.is_empty() && !session.is_empty() => {
                    Self::AssumedRole {
                        role_name: last_segment(role).to_string(),
                        session_name: session.to_string(),
                    }
                }
                _ => Self::Unknown,
            },
            ("sts", "federated-user") if !rest.is_empty() => Self::FederatedUser {
                name: rest.to_string(),
            },
            _ => Self::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Root => "Root",
            Self::User { .. } => "User",
            Self::Role { .. } => "Role",
            Self::AssumedRole { .. } => "AssumedRole",
            Self::FederatedUser { .. } => "FederatedUser",
            Self::Unknown => "Unknown",
        }
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role_arn() {
        let arn: Arn = "arn:aws:iam::123456789012:role/Demo".parse().unwrap();
        assert_eq!(arn.partition, "aws");
        assert_eq!(arn.service, "iam");
        assert_eq!(arn.region, "");
        assert_eq!(arn.account_id, "123456789012");
        assert_eq!(arn.resource_type(), ("role", "Demo"));
        assert!(arn.is_iam_role());
        assert_eq!(arn.to_string(), "arn:aws:iam::123456789012:role/Demo");
    }

    #[test]
    fn test_reject_malformed_arn() {
        assert!("not-an-arn".parse::<Arn>().is_err());
        assert!("arn:aws:iam::123456789012".parse::<Arn>().is_err());
        assert!("arn::iam::123456789012:role/Demo".parse::<Arn>().is_err());
    }

    #[test]
    fn test_is_iam_role_requires_account_and_name() {
        let user: Arn = "arn:aws:iam::123456789012:user/alice".parse().unwrap();
        assert!(!user.is_iam_role());

        let short_account: Arn = "arn:aws:iam::1234:role/Demo".parse().unwrap();
        assert!(!short_account.is_iam_role());

        let no_name: Arn = "arn:aws:iam::123456789012:role/".parse().unwrap();
        assert!(!no_name.is_iam_role());
    }

    #[test]
    fn test_principal_kinds() {
        assert_eq!(
            PrincipalKind::from_arn("arn:aws:sts::123456789012:assumed-role/Demo/credbroker-1700000000"),
            PrincipalKind::AssumedRole {
                role_name: "Demo".to_string(),
                session_name: "credbroker-1700000000".to_string(),
            }
        );
        assert_eq!(
            PrincipalKind::from_arn("arn:aws:iam::123456789012:user/team/alice"),
            PrincipalKind::User {
                name: "alice".to_string()
            }
        );
        assert_eq!(
            PrincipalKind::from_arn("arn:aws:iam::123456789012:root"),
            PrincipalKind::Root
        );
        assert_eq!(
            PrincipalKind::from_arn("arn:aws-us-gov:sts::123456789012:federated-user/bob"),
            PrincipalKind::FederatedUser {
                name: "bob".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_principal_does_not_guess() {
        assert_eq!(PrincipalKind::from_arn("garbage"), PrincipalKind::Unknown);
        // Substring heuristics would misclassify this one
        assert_eq!(
            PrincipalKind::from_arn("arn:aws:s3:::bucket/:assumed-role/x"),
            PrincipalKind::Unknown
        );
        assert_eq!(
            PrincipalKind::from_arn("arn:aws:sts::123456789012:assumed-role/NoSession"),
            PrincipalKind::Unknown
        );
    }
}
