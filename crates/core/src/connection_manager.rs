use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ConnectionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailureKind {
    Refused,
    AuthFailed,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    kind: ConnectFailureKind,
    message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(kind: ConnectFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn refused(message: impl Into<String>) -> Self {
        Self::new(ConnectFailureKind::Refused, message)
    }

    #[must_use]
    pub fn kind(&self) -> ConnectFailureKind {
        self.kind
    }
}

#[async_trait]
pub trait ConnectionBackend: Send + Sync + 'static {
    /// Handle shared with in-flight queries; cloning must not open a new session.
    type Connection: Clone + Send + Sync + 'static;

    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Connection, BackendError>;
    async fn ping(&self, connection: &Self::Connection) -> Result<(), BackendError>;
    async fn disconnect(&self, connection: Self::Connection) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("invalid connection settings: {0}")]
    InvalidConfig(String),
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
}

impl ConnectionError {
    fn from_backend(error: BackendError, timeout: Duration) -> Self {
        match error.kind() {
            ConnectFailureKind::Refused => Self::Refused(error.message),
            ConnectFailureKind::AuthFailed => Self::AuthFailed(error.message),
            ConnectFailureKind::Timeout => Self::Timeout(timeout),
        }
    }
}

/// Rejects settings that can never produce a session, without touching the network.
pub fn validate(config: &ConnectionConfig) -> Result<(), ConnectionError> {
    if config.user.trim().is_empty() {
        return Err(ConnectionError::InvalidConfig("user is required".to_string()));
    }
    if config.database.trim().is_empty() {
        return Err(ConnectionError::InvalidConfig(
            "database is required".to_string(),
        ));
    }
    if config.port == 0 {
        return Err(ConnectionError::InvalidConfig(
            "port must be between 1 and 65535".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub target: Option<String>,
    pub user: Option<String>,
    pub last_latency: Option<Duration>,
}

impl ConnectionStatus {
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            target: None,
            user: None,
            last_latency: None,
        }
    }
}

#[derive(Debug)]
struct ActiveConnection<C> {
    config: ConnectionConfig,
    handle: C,
}

#[derive(Debug)]
pub struct ConnectionManager<B: ConnectionBackend> {
    backend: Arc<B>,
    connect_timeout: Duration,
    active: Option<ActiveConnection<B::Connection>>,
    last_latency: Option<Duration>,
}

impl<B: ConnectionBackend> ConnectionManager<B> {
    #[must_use]
    pub fn new(backend: Arc<B>, connect_timeout: Duration) -> Self {
        Self {
            backend,
            connect_timeout,
            active: None,
            last_latency: None,
        }
    }

    #[must_use]
    pub fn backend(&self) -> Arc<B> {
        Arc::clone(&self.backend)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            is_connected: self.active.is_some(),
            target: self.active.as_ref().map(|active| active.config.target()),
            user: self.active.as_ref().map(|active| active.config.user.clone()),
            last_latency: self.last_latency,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&B::Connection> {
        self.active.as_ref().map(|active| &active.handle)
    }

    /// Validates, connects and pings without touching the manager's state, so
    /// it can run on a task while the manager stays with the event loop.
    pub async fn open(
        backend: &B,
        config: &ConnectionConfig,
        connect_timeout: Duration,
    ) -> Result<(B::Connection, Duration), ConnectionError> {
        validate(config)?;

        let started_at = Instant::now();
        let attempt = async {
            let handle = backend.connect(config).await?;
            if let Err(error) = backend.ping(&handle).await {
                let _ = backend.disconnect(handle).await;
                return Err(error);
            }
            Ok::<_, BackendError>(handle)
        };

        let handle = tokio::time::timeout(connect_timeout, attempt)
            .await
            .map_err(|_| ConnectionError::Timeout(connect_timeout))?
            .map_err(|error| ConnectionError::from_backend(error, connect_timeout))?;

        Ok((handle, started_at.elapsed()))
    }

    /// Makes `handle` the live connection and hands back the one it replaced.
    pub fn install(
        &mut self,
        config: ConnectionConfig,
        handle: B::Connection,
        latency: Duration,
    ) -> Option<B::Connection> {
        self.last_latency = Some(latency);
        self.active
            .replace(ActiveConnection { config, handle })
            .map(|previous| previous.handle)
    }

    pub async fn connect(&mut self, config: ConnectionConfig) -> Result<Duration, ConnectionError> {
        let (handle, latency) = Self::open(&self.backend, &config, self.connect_timeout).await?;
        tracing::info!(addr = %config.target(), user = %config.user, ?latency, "connected");

        if let Some(previous) = self.install(config, handle, latency) {
            self.close_handle(previous).await;
        }
        Ok(latency)
    }

    pub async fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.last_latency = None;
        self.close_handle(active.handle).await;
        tracing::info!(addr = %active.config.target(), "disconnected");
    }

    pub async fn close_handle(&self, handle: B::Connection) {
        if let Err(error) = self.backend.disconnect(handle).await {
            tracing::warn!(%error, "failed to close database connection cleanly");
        }
    }
}
