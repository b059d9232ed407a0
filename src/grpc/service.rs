//! Gatekeeper service implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::proto::gatekeeper::v1::{
    gatekeeper_server::Gatekeeper, CheckAttemptRequest, CheckAttemptResponse, ClearAllRequest,
    ClearAllResponse, ClientSignals as ProtoSignals, KeyRequest, KeyStatus as ProtoKeyStatus,
    ListStatusesRequest, ListStatusesResponse, RemainingTimeResponse, ResetKeyResponse,
    ResolveIdentifierRequest, ResolveIdentifierResponse, StatusResponse,
};

use crate::error::{self, GatekeeperError};
use crate::ratelimit::{
    format_remaining_time, render_status_table, AttemptKey, ClientIdentifier, ClientSignals,
    KeyStatus, LimiterRegistry,
};

/// Implementation of the Gatekeeper gRPC interface.
pub struct GatekeeperService {
    /// Named limiters and the administrative surface
    registry: Arc<LimiterRegistry>,
    /// Resolves identifiers for anonymous callers
    identifier: ClientIdentifier,
}

/// A request resolved against a registered limiter.
#[derive(Debug, Clone)]
struct ResolvedKey {
    limiter: String,
    identifier: String,
    action: String,
}

impl ResolvedKey {
    fn composite(&self) -> String {
        AttemptKey::new(&self.identifier, &self.action).to_string_key()
    }
}

impl GatekeeperService {
    /// Create a new service over the given registry.
    pub fn new(registry: Arc<LimiterRegistry>) -> Self {
        Self::with_identifier(registry, ClientIdentifier::new())
    }

    /// Create a new service with a specific identifier resolver.
    pub fn with_identifier(registry: Arc<LimiterRegistry>, identifier: ClientIdentifier) -> Self {
        Self {
            registry,
            identifier,
        }
    }

    fn resolve(
        &self,
        limiter: &str,
        identifier: &str,
        action: &str,
        signals: Option<ProtoSignals>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<ResolvedKey, Status> {
        if limiter.is_empty() {
            warn!("Received request with empty limiter name");
            return Err(Status::invalid_argument("limiter is required"));
        }

        self.registry.limiter(limiter).map_err(to_status)?;
        let signals = client_signals(signals, remote_addr);
        let identifier = self.identifier.resolve(Some(identifier), &signals);
        let action = if action.is_empty() { limiter } else { action };

        Ok(ResolvedKey {
            limiter: limiter.to_string(),
            identifier,
            action: action.to_string(),
        })
    }

    /// Run `op` against the registry on the blocking pool.
    ///
    /// Store backends do synchronous I/O under a lock, so they must not run
    /// on the async worker threads.
    async fn with_registry<T, F>(&self, op: F) -> Result<T, Status>
    where
        F: FnOnce(&LimiterRegistry) -> error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || op(&*registry))
            .await
            .map_err(|e| {
                warn!(error = %e, "Rate limit task failed");
                Status::internal("rate limit task failed")
            })?
            .map_err(to_status)
    }
}

#[tonic::async_trait]
impl Gatekeeper for GatekeeperService {
    /// Decide whether an attempt may proceed.
    ///
    /// An allowed check counts as an attempt.
    #[instrument(
        skip(self, request),
        fields(limiter = %request.get_ref().limiter, action = %request.get_ref().action)
    )]
    async fn check_attempt(
        &self,
        request: Request<CheckAttemptRequest>,
    ) -> Result<Response<CheckAttemptResponse>, Status> {
        let remote_addr = request.remote_addr();
        let req = request.into_inner();

        let key = self.resolve(
            &req.limiter,
            &req.identifier,
            &req.action,
            req.signals,
            remote_addr,
        )?;
        let (decision, retry_after) = {
            let key = key.clone();
            self.with_registry(move |registry| {
                let limiter = registry.limiter(&key.limiter)?;
                let decision = limiter.is_allowed(&key.identifier, &key.action);
                let retry_after = if decision.allowed {
                    None
                } else {
                    limiter.get_remaining_time(&key.identifier, &key.action)
                };
                Ok((decision, retry_after))
            })
            .await?
        };

        info!(
            limiter = %req.limiter,
            key = %key.composite(),
            allowed = decision.allowed,
            remaining = decision.remaining_attempts,
            "Attempt decision made"
        );

        Ok(Response::new(CheckAttemptResponse {
            allowed: decision.allowed,
            remaining_attempts: decision.remaining_attempts,
            retry_after_ms: retry_after.map(millis),
            retry_after: retry_after.map(format_remaining_time).unwrap_or_default(),
            key: key.composite(),
        }))
    }

    async fn get_status(
        &self,
        request: Request<KeyRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let remote_addr = request.remote_addr();
        let req = request.into_inner();

        let key = self.resolve(
            &req.limiter,
            &req.identifier,
            &req.action,
            req.signals,
            remote_addr,
        )?;
        let status = {
            let key = key.clone();
            self.with_registry(move |registry| {
                Ok(registry
                    .limiter(&key.limiter)?
                    .get_status(&key.identifier, &key.action))
            })
            .await?
        };

        debug!(key = %key.composite(), attempts = status.attempts, "Status requested");

        Ok(Response::new(StatusResponse {
            attempts: status.attempts,
            remaining_attempts: status.remaining_attempts,
            reset_time_ms: status.reset_time.map(epoch_millis),
            key: key.composite(),
        }))
    }

    async fn get_remaining_time(
        &self,
        request: Request<KeyRequest>,
    ) -> Result<Response<RemainingTimeResponse>, Status> {
        let remote_addr = request.remote_addr();
        let req = request.into_inner();

        let key = self.resolve(
            &req.limiter,
            &req.identifier,
            &req.action,
            req.signals,
            remote_addr,
        )?;
        let remaining = self
            .with_registry(move |registry| {
                Ok(registry
                    .limiter(&key.limiter)?
                    .get_remaining_time(&key.identifier, &key.action))
            })
            .await?;

        Ok(Response::new(RemainingTimeResponse {
            remaining_ms: remaining.map(millis),
            remaining: remaining.map(format_remaining_time).unwrap_or_default(),
        }))
    }

    async fn resolve_identifier(
        &self,
        request: Request<ResolveIdentifierRequest>,
    ) -> Result<Response<ResolveIdentifierResponse>, Status> {
        let remote_addr = request.remote_addr();
        let req = request.into_inner();

        let signals = client_signals(req.signals, remote_addr);
        let identifier = self.identifier.resolve(Some(&req.identifier), &signals);

        Ok(Response::new(ResolveIdentifierResponse { identifier }))
    }

    async fn reset_key(
        &self,
        request: Request<KeyRequest>,
    ) -> Result<Response<ResetKeyResponse>, Status> {
        let remote_addr = request.remote_addr();
        let req = request.into_inner();

        let key = self.resolve(
            &req.limiter,
            &req.identifier,
            &req.action,
            req.signals,
            remote_addr,
        )?;
        let composite = key.composite();
        self.with_registry(move |registry| {
            registry.reset_key(&key.limiter, &key.identifier, &key.action)
        })
        .await?;

        info!(limiter = %req.limiter, key = %composite, "Key reset");
        Ok(Response::new(ResetKeyResponse {}))
    }

    async fn clear_all(
        &self,
        _request: Request<ClearAllRequest>,
    ) -> Result<Response<ClearAllResponse>, Status> {
        self.with_registry(|registry| registry.clear_all_rate_limits())
            .await?;
        Ok(Response::new(ClearAllResponse {}))
    }

    async fn list_statuses(
        &self,
        request: Request<ListStatusesRequest>,
    ) -> Result<Response<ListStatusesResponse>, Status> {
        let req = request.into_inner();
        let statuses = self
            .with_registry(|registry| registry.get_all_rate_limit_statuses())
            .await?;

        let table = if req.include_table {
            render_status_table(&statuses)
        } else {
            String::new()
        };

        Ok(Response::new(ListStatusesResponse {
            statuses: statuses.into_iter().map(ProtoKeyStatus::from).collect(),
            table,
        }))
    }
}

impl From<ProtoSignals> for ClientSignals {
    fn from(signals: ProtoSignals) -> Self {
        Self {
            user_agent: signals.user_agent,
            accept_language: signals.accept_language,
            timezone: signals.timezone,
            platform: signals.platform,
            screen: signals.screen,
            remote_addr: signals.remote_addr,
        }
    }
}

impl From<KeyStatus> for ProtoKeyStatus {
    fn from(status: KeyStatus) -> Self {
        Self {
            limiter: status.limiter,
            key: status.key,
            attempts: status.attempts,
            remaining_attempts: status.remaining_attempts,
            reset_time_ms: status.reset_time.map(epoch_millis),
        }
    }
}

/// Request signals, falling back to the peer address when none was sent.
fn client_signals(signals: Option<ProtoSignals>, remote_addr: Option<SocketAddr>) -> ClientSignals {
    let mut signals: ClientSignals = signals.map(Into::into).unwrap_or_default();
    if signals.remote_addr.is_empty() {
        if let Some(addr) = remote_addr {
            signals.remote_addr = addr.ip().to_string();
        }
    }
    signals
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn epoch_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

fn to_status(error: GatekeeperError) -> Status {
    match error {
        GatekeeperError::UnknownLimiter(name) => {
            Status::not_found(format!("unknown limiter: {}", name))
        }
        GatekeeperError::AdminDisabled => {
            Status::permission_denied("administrative operations are disabled")
        }
        GatekeeperError::Config(message) => Status::invalid_argument(message),
        GatekeeperError::Store(e) => {
            warn!(error = %e, "Attempt store failure");
            Status::unavailable("attempt store unavailable")
        }
        other => Status::internal(other.to_string()),
    }
}
