use chrono::{Duration, Utc};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::cache::{CacheEntry, CredentialCache};
use super::context::RequestContext;
use super::error::{AuthError, AuthResult};
use super::sources::{build_source, validate_common, Collaborators, CredentialSource};
use super::status::{RecordedError, StatusInput, StatusReporter};
use crate::common::config::{AuthMethodConfig, BrokerSettings};
use crate::common::{AuthStatus, CallerIdentity, Credentials};

/// Upper bound for the staleness margin
const MAX_SAFETY_MARGIN_SECONDS: u64 = 3600;
const MAX_PROBE_INTERVAL_SECONDS: u64 = 86_400;

/// Position in the broker state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerPhase {
    Unconfigured,
    Configuring,
    Active,
    Stale,
}

impl fmt::Display for BrokerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configuring => "configuring",
            Self::Active => "active",
            Self::Stale => "stale",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct BrokerState {
    config: Option<AuthMethodConfig>,
    source: Option<Arc<dyn CredentialSource>>,
    configuring: bool,
    last_error: Option<RecordedError>,
}

/// Result of the most recent finished acquisition. Callers that queued behind
/// flight `generation - 1` read its error here instead of starting their own.
#[derive(Default)]
struct FlightOutcome {
    generation: u64,
    error: Option<AuthError>,
}

/// Resets the configuring flag however the operation ends
struct ConfiguringGuard<'a> {
    broker: &'a CredentialBroker,
}

impl<'a> ConfiguringGuard<'a> {
    fn enter(broker: &'a CredentialBroker) -> Self {
        broker.write_state().configuring = true;
        Self { broker }
    }
}

impl Drop for ConfiguringGuard<'_> {
    fn drop(&mut self) {
        self.broker.write_state().configuring = false;
    }
}

/// Orchestrates one credential source, the cache and status reporting.
///
/// Acquisition (resolve, refresh, setup, clear) is serialized by `flight`, so
/// concurrent callers share one round trip whether it succeeds or fails. The
/// cache and state are behind short synchronous locks and are never held
/// across an await.
pub struct CredentialBroker {
    state: RwLock<BrokerState>,
    cache: CredentialCache,
    flight: Mutex<()>,
    outcome: StdMutex<FlightOutcome>,
    reporter: StatusReporter,
    collaborators: Collaborators,
    settings: BrokerSettings,
}

impl CredentialBroker {
    /// A broker waiting for `setup`
    pub fn unconfigured(collaborators: Collaborators, settings: BrokerSettings) -> Self {
        let probe_interval = settings
            .identity_probe_interval_seconds
            .min(MAX_PROBE_INTERVAL_SECONDS);
        let reporter = StatusReporter::new(
            collaborators.sts.clone(),
            Duration::seconds(probe_interval as i64),
        );
        Self {
            state: RwLock::new(BrokerState::default()),
            cache: CredentialCache::new(),
            flight: Mutex::new(()),
            outcome: StdMutex::new(FlightOutcome::default()),
            reporter,
            collaborators,
            settings,
        }
    }

    /// A configured broker without credentials. Fails on invalid configuration.
    pub fn new(
        config: AuthMethodConfig,
        collaborators: Collaborators,
        settings: BrokerSettings,
    ) -> AuthResult<Self> {
        let source = build_source(&config, &collaborators, &settings)?;
        Self::with_source(config, source, collaborators, settings)
    }

    /// Like [`CredentialBroker::new`] with a caller-provided source
    pub fn with_source(
        config: AuthMethodConfig,
        source: Arc<dyn CredentialSource>,
        collaborators: Collaborators,
        settings: BrokerSettings,
    ) -> AuthResult<Self> {
        validate_common(&config)?;
        source.validate(&config)?;

        info!(
            "Credential broker configured for {} in {}",
            config.method.name(),
            config.region
        );
        let broker = Self::unconfigured(collaborators, settings);
        {
            let mut state = broker.write_state();
            state.config = Some(config);
            state.source = Some(source);
        }
        Ok(broker)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, BrokerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, BrokerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn margin(&self) -> Duration {
        let seconds = self
            .settings
            .safety_margin_seconds
            .min(MAX_SAFETY_MARGIN_SECONDS);
        Duration::seconds(seconds as i64)
    }

    fn current(&self) -> AuthResult<(AuthMethodConfig, Arc<dyn CredentialSource>)> {
        let state = self.read_state();
        match (&state.config, &state.source) {
            (Some(config), Some(source)) => Ok((config.clone(), source.clone())),
            _ => Err(AuthError::not_configured()),
        }
    }

    async fn lock_flight(&self, ctx: &RequestContext) -> AuthResult<MutexGuard<'_, ()>> {
        ctx.run(async { Ok(self.flight.lock().await) }).await
    }

    fn record_failure(&self, err: &AuthError) {
        // Cancellation is the caller's decision, not a broker failure
        if matches!(err, AuthError::Cancelled) {
            return;
        }
        self.write_state().last_error = Some(RecordedError::acquisition(err.clone()));
    }

    fn record_probe_failure(&self, err: &AuthError) {
        if matches!(err, AuthError::Cancelled) {
            return;
        }
        self.write_state().last_error = Some(RecordedError::probe(err.clone()));
    }

    fn flight_generation(&self) -> u64 {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Publish a finished acquisition. A cancelled one is not shared: its
    /// waiters still want credentials and run their own.
    fn publish_outcome(&self, result: &AuthResult<Credentials>) {
        if matches!(result, Err(AuthError::Cancelled)) {
            return;
        }
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        outcome.generation += 1;
        outcome.error = result.as_ref().err().cloned();
    }

    /// The failure of a flight that finished after `generation` was observed
    fn shared_failure(&self, generation: u64) -> Option<AuthError> {
        let outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if outcome.generation == generation {
            return None;
        }
        outcome.error.clone()
    }

    /// Run the source once and check what it returned
    async fn acquire(
        &self,
        ctx: &RequestContext,
        source: &Arc<dyn CredentialSource>,
    ) -> AuthResult<CacheEntry> {
        debug!("Acquiring credentials via {}", source.method());
        let credentials = ctx.run(source.resolve(ctx)).await?;

        let now = Utc::now();
        if let Some(expires_at) = credentials.expires_at {
            if expires_at <= now {
                return Err(AuthError::contract_violation(
                    credentials.source_label.clone(),
                    format!("credentials expired at {expires_at}"),
                ));
            }
        }

        Ok(CacheEntry {
            credentials,
            resolved_at: now,
            method: source.method().to_string(),
            requires_expiry: source.requires_expiry(),
        })
    }

    /// Acquire and publish, or record the failure
    async fn acquire_and_store(
        &self,
        ctx: &RequestContext,
        source: &Arc<dyn CredentialSource>,
    ) -> AuthResult<Credentials> {
        let result = self.store(self.acquire(ctx, source).await);
        self.publish_outcome(&result);
        result
    }

    fn store(&self, acquired: AuthResult<CacheEntry>) -> AuthResult<Credentials> {
        match acquired {
            Ok(entry) => {
                let credentials = entry.credentials.clone();
                info!(
                    "Credentials from {} valid until {}",
                    credentials.source_label,
                    credentials
                        .expires_at
                        .map(|e| e.to_rfc3339())
                        .unwrap_or_else(|| "no expiry".to_string())
                );
                self.cache.put(entry);
                self.write_state().last_error = None;
                Ok(credentials)
            }
            Err(e) => {
                warn!("Credential acquisition failed: {}", e);
                self.record_failure(&e);
                if e.invalidates_cache() {
                    self.cache.clear();
                }
                Err(e)
            }
        }
    }

    /// Validate `config`, acquire credentials and verify them with an identity
    /// probe. On success the broker is Active with the new configuration; on
    /// failure it is Unconfigured with the error recorded. A cancelled setup
    /// leaves the previous configuration in place.
    pub async fn setup(
        &self,
        ctx: &RequestContext,
        config: AuthMethodConfig,
    ) -> AuthResult<CallerIdentity> {
        let _flight = self.lock_flight(ctx).await?;
        let _configuring = ConfiguringGuard::enter(self);
        info!("Setting up {} authentication", config.method.name());

        let result = self.try_setup(ctx, &config).await;
        match result {
            Ok((source, entry, identity)) => {
                self.cache.put(entry);
                let mut state = self.write_state();
                state.config = Some(config);
                state.source = Some(source);
                state.last_error = None;
                info!("Authenticated as {}", identity.arn);
                Ok(identity)
            }
            Err(AuthError::Cancelled) => Err(AuthError::Cancelled),
            Err(e) => {
                warn!("Setup failed: {}", e);
                self.cache.clear();
                self.reporter.forget();
                let mut state = self.write_state();
                state.config = None;
                state.source = None;
                state.last_error = Some(RecordedError::acquisition(e.clone()));
                Err(e)
            }
        }
    }

    async fn try_setup(
        &self,
        ctx: &RequestContext,
        config: &AuthMethodConfig,
    ) -> AuthResult<(Arc<dyn CredentialSource>, CacheEntry, CallerIdentity)> {
        let source = build_source(config, &self.collaborators, &self.settings)?;
        let entry = self.acquire(ctx, &source).await?;
        let identity = self
            .reporter
            .probe(ctx, &entry.credentials, &config.region, true)
            .await?;
        Ok((source, entry, identity))
    }

    /// Cached credentials while fresh, otherwise a new acquisition
    pub async fn resolve_credentials(&self, ctx: &RequestContext) -> AuthResult<Credentials> {
        self.current()?;
        if let Some(entry) = self.cache.fresh(Utc::now(), self.margin()) {
            return Ok(entry.credentials.clone());
        }

        let generation = self.flight_generation();
        let _flight = self.lock_flight(ctx).await?;

        // Re-check: the previous flight may have filled the cache, failed, or a clear may have run
        let (_, source) = self.current()?;
        if let Some(entry) = self.cache.fresh(Utc::now(), self.margin()) {
            debug!("Using credentials acquired by a concurrent caller");
            return Ok(entry.credentials.clone());
        }
        if let Some(err) = self.shared_failure(generation) {
            debug!("Sharing the failure of a concurrent acquisition: {}", err);
            return Err(err);
        }

        self.acquire_and_store(ctx, &source).await
    }

    /// Live identity check with fresh or cached-but-valid credentials
    pub async fn test_connection(&self, ctx: &RequestContext) -> AuthResult<CallerIdentity> {
        let credentials = self.resolve_credentials(ctx).await?;
        let (config, _) = self.current()?;

        self.reporter
            .probe(ctx, &credentials, &config.region, true)
            .await
            .inspect(|identity| {
                info!("Connection OK: {}", identity.arn);
                self.write_state().last_error = None;
            })
            .inspect_err(|e| self.record_probe_failure(e))
    }

    /// Discard cached credentials and run the full source flow again
    pub async fn refresh(&self, ctx: &RequestContext) -> AuthResult<Credentials> {
        self.current()?;
        let _flight = self.lock_flight(ctx).await?;
        let (_, source) = self.current()?;
        let _configuring = ConfiguringGuard::enter(self);

        info!("Refreshing credentials via {}", source.method());
        let result = self.acquire_and_store(ctx, &source).await;
        if let Err(e) = &result {
            if !matches!(e, AuthError::Cancelled) {
                self.cache.clear();
            }
        }
        result
    }

    /// Current status snapshot; never waits for an in-flight acquisition
    pub async fn status(&self, ctx: &RequestContext) -> AuthStatus {
        let (config, last_error) = {
            let state = self.read_state();
            (state.config.clone(), state.last_error.clone())
        };

        let (method, region) = config
            .as_ref()
            .map(|c| (c.method.name(), c.region.as_str()))
            .unwrap_or(("", ""));

        self.reporter
            .report(
                ctx,
                StatusInput {
                    configured: config.is_some(),
                    method,
                    region,
                    entry: self.cache.get(),
                    last_error: last_error.as_ref(),
                    now: Utc::now(),
                    margin: self.margin(),
                },
            )
            .await
    }

    /// Forget the configuration and credentials
    pub async fn clear(&self) {
        let _flight = self.flight.lock().await;
        self.cache.clear();
        self.reporter.forget();
        *self.write_state() = BrokerState::default();
        info!("Credential broker cleared");
    }

    pub fn phase(&self) -> BrokerPhase {
        let state = self.read_state();
        if state.configuring {
            BrokerPhase::Configuring
        } else if state.config.is_none() {
            BrokerPhase::Unconfigured
        } else if self.cache.fresh(Utc::now(), self.margin()).is_some() {
            BrokerPhase::Active
        } else {
            BrokerPhase::Stale
        }
    }

    #[cfg(test)]
    fn cached(&self) -> Option<Arc<CacheEntry>> {
        self.cache.get()
    }

    #[cfg(test)]
    fn last_error(&self) -> Option<AuthError> {
        self.read_state()
            .last_error
            .as_ref()
            .map(|recorded| recorded.error.clone())
    }
}
