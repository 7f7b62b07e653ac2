use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use super::assumer::classify_sts_error;
use super::cache::{CacheEntry, CredentialCache};
use super::context::RequestContext;
use super::error::{AuthError, AuthResult};
use crate::aws::StsApi;
use crate::common::{AuthStatus, CallerIdentity, Credentials};

/// Last successful identity probe
#[derive(Debug, Clone)]
struct Probe {
    access_key_id: String,
    identity: CallerIdentity,
    probed_at: DateTime<Utc>,
}

/// A broker failure and when it happened
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedError {
    pub error: AuthError,
    pub recorded_at: DateTime<Utc>,
    /// Raised by an identity check rather than by acquiring credentials
    pub from_probe: bool,
}

impl RecordedError {
    pub fn acquisition(error: AuthError) -> Self {
        Self {
            error,
            recorded_at: Utc::now(),
            from_probe: false,
        }
    }

    pub fn probe(error: AuthError) -> Self {
        Self {
            from_probe: true,
            ..Self::acquisition(error)
        }
    }
}

/// What the broker knows at the moment a status snapshot is requested
pub struct StatusInput<'a> {
    pub configured: bool,
    pub method: &'a str,
    pub region: &'a str,
    pub entry: Option<Arc<CacheEntry>>,
    pub last_error: Option<&'a RecordedError>,
    pub now: DateTime<Utc>,
    pub margin: Duration,
}

/// Derives [`AuthStatus`] from the cache plus a GetCallerIdentity probe.
///
/// Probes are reused until they are older than the probe interval or the
/// cached credentials change. A failed identity check is superseded by a
/// successful probe taken after it; acquisition failures are not.
pub struct StatusReporter {
    sts: Arc<dyn StsApi>,
    probe_interval: Duration,
    last_probe: Mutex<Option<Probe>>,
}

impl StatusReporter {
    pub fn new(sts: Arc<dyn StsApi>, probe_interval: Duration) -> Self {
        Self {
            sts,
            probe_interval,
            last_probe: Mutex::new(None),
        }
    }

    /// Ask STS who `credentials` belong to
    pub async fn probe(
        &self,
        ctx: &RequestContext,
        credentials: &Credentials,
        region: &str,
        force: bool,
    ) -> AuthResult<CallerIdentity> {
        self.probe_record(ctx, credentials, region, force)
            .await
            .map(|probe| probe.identity)
    }

    async fn probe_record(
        &self,
        ctx: &RequestContext,
        credentials: &Credentials,
        region: &str,
        force: bool,
    ) -> AuthResult<Probe> {
        let now = Utc::now();
        if !force {
            if let Some(probe) = self.recent_probe(credentials, now) {
                debug!("Reusing identity probe for {}", probe.identity.arn);
                return Ok(probe);
            }
        }

        let identity = ctx
            .run(async {
                self.sts
                    .get_caller_identity(credentials, region)
                    .await
                    .map_err(|e| classify_sts_error(e, None))
            })
            .await?;

        debug!(
            "Identity probe: {} ({})",
            identity.arn,
            identity.principal.label()
        );
        let probe = Probe {
            access_key_id: credentials.access_key_id.clone(),
            identity,
            probed_at: now,
        };
        *self.last_probe.lock().unwrap_or_else(PoisonError::into_inner) = Some(probe.clone());
        Ok(probe)
    }

    fn recent_probe(&self, credentials: &Credentials, now: DateTime<Utc>) -> Option<Probe> {
        let guard = self.last_probe.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|probe| probe.access_key_id == credentials.access_key_id)
            .filter(|probe| now - probe.probed_at < self.probe_interval)
            .cloned()
    }

    /// Drop the remembered probe
    pub fn forget(&self) {
        self.last_probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Build a status snapshot. Never fails: problems land in `error`.
    pub async fn report(&self, ctx: &RequestContext, input: StatusInput<'_>) -> AuthStatus {
        let last_error = input.last_error.map(|recorded| recorded.error.to_string());
        if !input.configured {
            return AuthStatus::unconfigured(last_error);
        }

        let mut status = AuthStatus {
            configured: true,
            active: false,
            method: input.method.to_string(),
            region: input.region.to_string(),
            identity: None,
            expires_at: None,
            error: last_error,
            refresh_needed: true,
        };

        let Some(entry) = input.entry else {
            return status;
        };

        status.expires_at = entry.credentials.expires_at;
        // Non-expiring credentials are always flagged; only the cache decides re-acquisition
        status.refresh_needed = entry.credentials.expires_at.is_none()
            || CredentialCache::is_stale(&entry, input.now, input.margin);

        if entry.credentials.is_expired_at(input.now) {
            status
                .error
                .get_or_insert_with(|| "cached credentials have expired".to_string());
            return status;
        }

        match self
            .probe_record(ctx, &entry.credentials, input.region, false)
            .await
        {
            Ok(probe) => {
                let superseded = input.last_error.is_some_and(|recorded| {
                    recorded.from_probe && recorded.recorded_at < probe.probed_at
                });
                if superseded {
                    debug!("Identity probe succeeded after the last recorded failure");
                    status.error = None;
                }
                status.identity = Some(probe.identity);
                status.active = status.error.is_none();
            }
            Err(e) => {
                warn!("Identity probe failed: {}", e);
                status.error = Some(e.to_string());
            }
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::ApiError;
    use crate::broker::testing::MockSts;
    use crate::common::PrincipalKind;

    fn entry(expires_at: Option<DateTime<Utc>>, access_key_id: &str) -> Arc<CacheEntry> {
        Arc::new(CacheEntry {
            credentials: Credentials::new(
                access_key_id,
                "secret",
                Some("token".to_string()),
                expires_at,
                "cross-account:arn:aws:iam::123456789012:role/Demo",
            ),
            resolved_at: Utc::now(),
            method: "cross-account-role".to_string(),
            requires_expiry: true,
        })
    }

    fn input<'a>(
        entry: Option<Arc<CacheEntry>>,
        last_error: Option<&'a RecordedError>,
    ) -> StatusInput<'a> {
        StatusInput {
            configured: true,
            method: "cross-account-role",
            region: "us-east-1",
            entry,
            last_error,
            now: Utc::now(),
            margin: Duration::minutes(5),
        }
    }

    #[tokio::test]
    async fn test_active_after_successful_probe() {
        let reporter = StatusReporter::new(Arc::new(MockSts::new()), Duration::seconds(60));
        let status = reporter
            .report(
                &RequestContext::new(),
                input(Some(entry(Some(Utc::now() + Duration::hours(1)), "ASIA1")), None),
            )
            .await;

        assert!(status.configured);
        assert!(status.active);
        assert!(!status.refresh_needed);
        assert_eq!(status.error, None);
        let identity = status.identity.unwrap();
        assert_eq!(identity.account, "123456789012");
        assert!(matches!(identity.principal, PrincipalKind::AssumedRole { .. }));
    }

    #[tokio::test]
    async fn test_probe_reused_within_interval() {
        let sts = Arc::new(MockSts::new());
        let reporter = StatusReporter::new(sts.clone(), Duration::seconds(60));
        let cached = entry(Some(Utc::now() + Duration::hours(1)), "ASIA1");

        reporter
            .report(&RequestContext::new(), input(Some(cached.clone()), None))
            .await;
        reporter
            .report(&RequestContext::new(), input(Some(cached), None))
            .await;
        assert_eq!(sts.identity_calls(), 1);

        // Different credentials force a new probe
        reporter
            .report(
                &RequestContext::new(),
                input(Some(entry(Some(Utc::now() + Duration::hours(1)), "ASIA2")), None),
            )
            .await;
        assert_eq!(sts.identity_calls(), 2);
    }

    #[tokio::test]
    async fn test_probe_refreshed_after_interval() {
        let sts = Arc::new(MockSts::new());
        let reporter = StatusReporter::new(sts.clone(), Duration::zero());
        let cached = entry(Some(Utc::now() + Duration::hours(1)), "ASIA1");

        reporter
            .report(&RequestContext::new(), input(Some(cached.clone()), None))
            .await;
        reporter
            .report(&RequestContext::new(), input(Some(cached), None))
            .await;
        assert_eq!(sts.identity_calls(), 2);
    }

    #[tokio::test]
    async fn test_no_credentials_needs_refresh() {
        let sts = Arc::new(MockSts::new());
        let reporter = StatusReporter::new(sts.clone(), Duration::seconds(60));
        let status = reporter.report(&RequestContext::new(), input(None, None)).await;

        assert!(status.configured);
        assert!(!status.active);
        assert!(status.refresh_needed);
        assert_eq!(sts.identity_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_probe_is_reported_not_raised() {
        let sts = Arc::new(MockSts::new().failing_identity(ApiError::service(
            "ExpiredToken",
            "The security token included in the request is expired",
        )));
        let reporter = StatusReporter::new(sts, Duration::seconds(60));
        let status = reporter
            .report(
                &RequestContext::new(),
                input(Some(entry(Some(Utc::now() + Duration::hours(1)), "ASIA1")), None),
            )
            .await;

        assert!(!status.active);
        assert!(status.error.unwrap().contains("ExpiredToken"));
        assert!(status.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_after_last_probe_keeps_status_inactive() {
        let reporter = StatusReporter::new(Arc::new(MockSts::new()), Duration::seconds(60));
        let cached = entry(Some(Utc::now() + Duration::hours(1)), "ASIA1");
        reporter
            .report(&RequestContext::new(), input(Some(cached.clone()), None))
            .await;

        let failure = RecordedError::probe(AuthError::transient("connection reset"));
        let status = reporter
            .report(&RequestContext::new(), input(Some(cached), Some(&failure)))
            .await;

        assert!(!status.active);
        assert!(status.identity.is_some());
        assert_eq!(status.error, Some(failure.error.to_string()));
    }

    #[tokio::test]
    async fn test_later_probe_supersedes_failure() {
        let sts = Arc::new(MockSts::new());
        let reporter = StatusReporter::new(sts.clone(), Duration::seconds(60));
        let failure = RecordedError {
            recorded_at: Utc::now() - Duration::seconds(1),
            ..RecordedError::probe(AuthError::transient("blip"))
        };
        let status = reporter
            .report(
                &RequestContext::new(),
                input(
                    Some(entry(Some(Utc::now() + Duration::hours(1)), "ASIA1")),
                    Some(&failure),
                ),
            )
            .await;

        assert_eq!(sts.identity_calls(), 1);
        assert!(status.active);
        assert_eq!(status.error, None);
    }

    #[tokio::test]
    async fn test_acquisition_failure_survives_probe() {
        let reporter = StatusReporter::new(Arc::new(MockSts::new()), Duration::seconds(60));
        let failure = RecordedError {
            recorded_at: Utc::now() - Duration::seconds(1),
            ..RecordedError::acquisition(AuthError::transient("throttled"))
        };
        let status = reporter
            .report(
                &RequestContext::new(),
                input(
                    Some(entry(Some(Utc::now() + Duration::hours(1)), "ASIA1")),
                    Some(&failure),
                ),
            )
            .await;

        assert!(!status.active);
        assert!(status.identity.is_some());
        assert_eq!(status.error, Some(failure.error.to_string()));
    }

    #[tokio::test]
    async fn test_non_expiring_credentials_flag_refresh() {
        let reporter = StatusReporter::new(Arc::new(MockSts::new()), Duration::seconds(60));
        let long_lived = Arc::new(CacheEntry {
            credentials: Credentials::new("AKIA1", "secret", None, None, "static-profile:ci"),
            resolved_at: Utc::now(),
            method: "static-profile".to_string(),
            requires_expiry: false,
        });
        assert!(!CredentialCache::is_stale(&long_lived, Utc::now(), Duration::minutes(5)));

        let status = reporter
            .report(&RequestContext::new(), input(Some(long_lived), None))
            .await;

        assert!(status.active);
        assert_eq!(status.expires_at, None);
        assert!(status.refresh_needed);
    }

    #[tokio::test]
    async fn test_expired_entry_skips_probe() {
        let sts = Arc::new(MockSts::new());
        let reporter = StatusReporter::new(sts.clone(), Duration::seconds(60));
        let status = reporter
            .report(
                &RequestContext::new(),
                input(Some(entry(Some(Utc::now() - Duration::minutes(1)), "ASIA1")), None),
            )
            .await;

        assert!(!status.active);
        assert!(status.refresh_needed);
        assert!(status.error.is_some());
        assert_eq!(sts.identity_calls(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured() {
        let reporter = StatusReporter::new(Arc::new(MockSts::new()), Duration::seconds(60));
        let mut unconfigured = input(None, None);
        unconfigured.configured = false;
        let status = reporter.report(&RequestContext::new(), unconfigured).await;
        assert_eq!(status, AuthStatus::unconfigured(None));
    }
}
