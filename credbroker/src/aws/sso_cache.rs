use chrono::{DateTime, NaiveDateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::SsoToken;

/// On-disk token file written by `aws sso login`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedTokenFile {
    start_url: Option<String>,
    region: Option<String>,
    access_token: Option<String>,
    expires_at: Option<String>,
}

/// A token found in the SSO cache directory
#[derive(Debug, Clone)]
pub struct CachedSsoSession {
    pub start_url: String,
    pub region: Option<String>,
    pub access_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Respects AWS_SSO_CACHE_DIR if set, else `~/.aws/sso/cache`
pub fn default_cache_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("AWS_SSO_CACHE_DIR") {
        return Some(PathBuf::from(dir));
    }
    dirs::home_dir().map(|home| home.join(".aws").join("sso").join("cache"))
}

/// Read every token file in `dir`. Client registrations and unreadable files are skipped.
pub async fn read_sessions(dir: &Path) -> io::Result<Vec<CachedSsoSession>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut sessions = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }

        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Skipping unreadable SSO cache file {}: {}", path.display(), e);
                continue;
            }
        };

        let Ok(file) = serde_json::from_str::<CachedTokenFile>(&raw) else {
            debug!("Skipping malformed SSO cache file {}", path.display());
            continue;
        };

        let (Some(start_url), Some(access_token), Some(expires_at)) =
            (file.start_url, file.access_token, file.expires_at)
        else {
            continue;
        };

        let Some(expires_at) = parse_expiry(&expires_at) else {
            debug!("Skipping SSO cache file with bad expiry {}", path.display());
            continue;
        };

        sessions.push(CachedSsoSession {
            start_url,
            region: file.region,
            access_token: SecretString::new(access_token),
            expires_at,
        });
    }

    Ok(sessions)
}

/// Pick the longest-lived unexpired token for `start_url`
pub fn find_token(
    sessions: &[CachedSsoSession],
    start_url: &str,
    now: DateTime<Utc>,
) -> Option<SsoToken> {
    let wanted = normalize_start_url(start_url);
    sessions
        .iter()
        .filter(|session| normalize_start_url(&session.start_url) == wanted)
        .filter(|session| session.expires_at > now)
        .max_by_key(|session| session.expires_at)
        .map(|session| SsoToken {
            access_token: session.access_token.clone(),
            expires_at: session.expires_at,
        })
}

/// Accepts RFC 3339 and the older `2024-01-01T00:00:00UTC` form
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let trimmed = raw.strip_suffix("UTC")?;
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn normalize_start_url(url: &str) -> &str {
    url.trim().trim_end_matches(|c: char| c == '/' || c == '#')
}
