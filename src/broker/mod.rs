//! Client token broker: keeps an embedded application supplied with a valid
//! delegated token negotiated with its host over an asynchronous message
//! channel, with scheduled pre-expiry refresh and push-based revocation.
//!
//! The broker runs on a single logical timeline: one spawned task owns all
//! negotiation state and the single refresh deadline, so cancelling a
//! scheduled refresh on new-grant-or-revoke is atomic with the state change.
//! Token reads never block and never suspend; callers needing a
//! guaranteed-fresh token await `request_token` once at startup.

pub mod messages;

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::now_ms;
use messages::{AppMessage, HostEnvelope, HostMessage, ScopeRequest};

/// Default lead time before expiry at which a refresh is scheduled.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(120);
/// Default bound on waiting for a correlated grant.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The broker's view of the current delegated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSession {
    pub token: String,
    /// Epoch milliseconds.
    pub expires_at_ms: i64,
    pub granted_scopes: Vec<String>,
}

/// Broker failures never propagate into the embedding application's request
/// path; they resolve to "no token available" and the caller decides how to
/// react.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("not hosted: the application manages its own credentials")]
    NotHosted,
    #[error("no correlated response within {0:?}")]
    Timeout(Duration),
    #[error("host revoked the session: {reason}")]
    Revoked { reason: String },
    #[error("host channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub refresh_skew: Duration,
    pub request_timeout: Duration,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            refresh_skew: DEFAULT_REFRESH_SKEW,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Message channel to the hosting application, plus the pinned origin every
/// inbound envelope must match exactly.
pub struct HostChannel {
    pub origin: String,
    pub to_host: mpsc::Sender<AppMessage>,
    pub from_host: mpsc::Receiver<HostEnvelope>,
}

struct Shared {
    session: RwLock<Option<BrokerSession>>,
}

enum Command {
    Request {
        scopes: Vec<String>,
        reply: oneshot::Sender<Result<BrokerSession, BrokerError>>,
    },
}

pub struct TokenBroker {
    shared: Arc<Shared>,
    cmd_tx: Option<mpsc::Sender<Command>>,
    request_timeout: Duration,
}

impl TokenBroker {
    /// Standalone mode: no hosting indicator was present, the broker is inert
    /// and the embedding application acquires credentials directly.
    pub fn standalone() -> Self {
        Self {
            shared: Arc::new(Shared { session: RwLock::new(None) }),
            cmd_tx: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Hosted mode: spawn the negotiation task and announce to the host.
    pub fn hosted(app_id: impl Into<String>, channel: HostChannel, opts: BrokerOptions) -> Self {
        let shared = Arc::new(Shared { session: RwLock::new(None) });
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let task = BrokerTask {
            app_id: app_id.into(),
            origin: channel.origin,
            to_host: channel.to_host,
            from_host: channel.from_host,
            cmd_rx,
            shared: shared.clone(),
            skew: opts.refresh_skew,
            pending: None,
            refresh_at: None,
            refresh_scopes: Vec::new(),
        };
        tokio::spawn(task.run());
        Self {
            shared,
            cmd_tx: Some(cmd_tx),
            request_timeout: opts.request_timeout,
        }
    }

    pub fn is_hosted(&self) -> bool {
        self.cmd_tx.is_some()
    }

    /// Synchronous, non-blocking token read. Returns the last-known token
    /// only while it is unexpired; an expired-but-uncleared session behaves
    /// identically to "no token."
    pub fn token(&self) -> Option<String> {
        let guard = self.shared.session.read();
        match guard.as_ref() {
            Some(s) if now_ms() < s.expires_at_ms => Some(s.token.clone()),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<BrokerSession> {
        let guard = self.shared.session.read();
        match guard.as_ref() {
            Some(s) if now_ms() < s.expires_at_ms => Some(s.clone()),
            _ => None,
        }
    }

    /// Negotiate a token with the host. Bounded wait; a timeout is a failure
    /// and is not retried automatically.
    pub async fn request_token(&self, scopes: Vec<String>) -> Result<BrokerSession, BrokerError> {
        let Some(cmd_tx) = &self.cmd_tx else {
            return Err(BrokerError::NotHosted);
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(Command::Request { scopes, reply: reply_tx })
            .await
            .map_err(|_| BrokerError::ChannelClosed)?;
        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Err(_) => Err(BrokerError::Timeout(self.request_timeout)),
            Ok(Err(_)) => Err(BrokerError::ChannelClosed),
            Ok(Ok(result)) => result,
        }
    }
}

struct Pending {
    request_id: String,
    /// Absent for broker-initiated refreshes.
    reply: Option<oneshot::Sender<Result<BrokerSession, BrokerError>>>,
}

struct BrokerTask {
    app_id: String,
    origin: String,
    to_host: mpsc::Sender<AppMessage>,
    from_host: mpsc::Receiver<HostEnvelope>,
    cmd_rx: mpsc::Receiver<Command>,
    shared: Arc<Shared>,
    skew: Duration,
    pending: Option<Pending>,
    refresh_at: Option<tokio::time::Instant>,
    refresh_scopes: Vec<String>,
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

impl BrokerTask {
    async fn run(mut self) {
        if self
            .to_host
            .send(AppMessage::Ready { app_id: self.app_id.clone() })
            .await
            .is_err()
        {
            return;
        }
        loop {
            let refresh_at = self.refresh_at;
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Request { scopes, reply }) => {
                        self.send_request(scopes, Some(reply)).await;
                    }
                    // All broker handles dropped.
                    None => break,
                },
                env = self.from_host.recv() => match env {
                    Some(env) => self.on_host_message(env),
                    None => break,
                },
                _ = sleep_until_opt(refresh_at), if refresh_at.is_some() => {
                    self.refresh_at = None;
                    let scopes = self.refresh_scopes.clone();
                    debug!(target: "broker", "refresh deadline reached, renegotiating");
                    self.send_request(scopes, None).await;
                }
            }
        }
    }

    async fn send_request(
        &mut self,
        scopes: Vec<String>,
        reply: Option<oneshot::Sender<Result<BrokerSession, BrokerError>>>,
    ) {
        let request_id = uuid::Uuid::new_v4().to_string();
        let msg = AppMessage::AuthRequest {
            app_id: self.app_id.clone(),
            request_id: request_id.clone(),
            payload: ScopeRequest { scopes: scopes.clone() },
        };
        if self.to_host.send(msg).await.is_err() {
            if let Some(reply) = reply {
                let _ = reply.send(Err(BrokerError::ChannelClosed));
            }
            return;
        }
        self.refresh_scopes = scopes;
        // A new request supersedes any outstanding one; the superseded
        // caller's reply channel is dropped.
        self.pending = Some(Pending { request_id, reply });
    }

    fn on_host_message(&mut self, env: HostEnvelope) {
        // Origin pinning before anything else. Forged or mis-routed messages
        // are dropped silently, not treated as errors.
        if env.origin != self.origin {
            warn!(target: "broker", origin = %env.origin, "dropping message from unexpected origin");
            return;
        }
        match env.message {
            HostMessage::AuthToken { request_id, payload } => {
                let correlated = matches!(
                    (&self.pending, request_id.as_deref()),
                    (Some(p), Some(rid)) if p.request_id == rid
                );
                if !correlated {
                    debug!(target: "broker", "dropping uncorrelated grant");
                    return;
                }
                let pending = self.pending.take();
                let session = BrokerSession {
                    token: payload.token,
                    expires_at_ms: payload.expires_at,
                    granted_scopes: payload.scopes,
                };
                *self.shared.session.write() = Some(session.clone());
                self.schedule_refresh(session.expires_at_ms);
                if let Some(reply) = pending.and_then(|p| p.reply) {
                    let _ = reply.send(Ok(session));
                }
            }
            HostMessage::AuthRevoked { request_id, payload } => {
                // Honored immediately whether solicited or not: clear the
                // session and cancel any scheduled refresh before anything
                // else can observe the stale token.
                *self.shared.session.write() = None;
                self.refresh_at = None;
                let correlated = matches!(
                    (&self.pending, request_id.as_deref()),
                    (Some(p), Some(rid)) if p.request_id == rid
                );
                if correlated {
                    if let Some(reply) = self.pending.take().and_then(|p| p.reply) {
                        let _ = reply.send(Err(BrokerError::Revoked {
                            reason: payload.reason.clone(),
                        }));
                    }
                }
                info!(target: "broker", reason = %payload.reason, "session revoked by host");
            }
        }
    }

    fn schedule_refresh(&mut self, expires_at_ms: i64) {
        // One deadline slot: scheduling replaces any previous deadline.
        let lead = self.skew.as_millis() as i64;
        let delay_ms = (expires_at_ms - lead - now_ms()).max(0);
        self.refresh_at = Some(tokio::time::Instant::now() + Duration::from_millis(delay_ms as u64));
    }
}
