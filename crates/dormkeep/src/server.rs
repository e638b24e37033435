//! `DormkeepServer` builder and accept loop.
//!
//! Ties the layers together: transport → protocol → access guard →
//! allocation engine, with the engine's change signals fanned back out to
//! subscribed connections.

use std::sync::Arc;
use std::time::Duration;

use dormkeep_allocation::{
    AllocationEngine, BroadcastNotifier, EngineConfig, MemoryStore, Store,
};
use dormkeep_protocol::{Codec, JsonCodec};
use dormkeep_transport::{Transport, WebSocketTransport};
use serde::{Deserialize, Serialize};

use crate::handler::handle_connection;
use crate::{AccessPolicy, Authenticator, DormkeepError};

/// Wire protocol version. A `Hello` carrying any other value is refused.
pub const PROTOCOL_VERSION: u32 = 1;

/// Network-facing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// How long a new connection has for each handshake step: the
    /// WebSocket upgrade, then its `Hello`.
    pub handshake_timeout: Duration,
    /// A connection that sends nothing for this long is closed.
    pub idle_timeout: Duration,
    pub access: AccessPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            access: AccessPolicy::default(),
        }
    }
}

/// Shared state handed to every connection task.
pub(crate) struct ServerState<S: Store, A: Authenticator, C: Codec> {
    pub(crate) engine: AllocationEngine<S>,
    pub(crate) notifier: BroadcastNotifier,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

/// Builder for a [`DormkeepServer`].
///
/// # Example
///
/// ```rust,no_run
/// use dormkeep::prelude::*;
///
/// # async fn start() -> Result<(), DormkeepError> {
/// let auth = TokenAuthenticator::new().with_token("warden-key", Caller::admin("warden"));
/// let server = DormkeepServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(auth)
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct DormkeepServerBuilder {
    config: ServerConfig,
    engine: EngineConfig,
}

impl DormkeepServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn access(mut self, policy: AccessPolicy) -> Self {
        self.config.access = policy;
        self
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine = config;
        self
    }

    /// Binds the listener and builds a server over a fresh in-memory store.
    pub async fn build<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<DormkeepServer<MemoryStore, A, JsonCodec>, DormkeepError> {
        self.build_with_store(MemoryStore::new(), auth).await
    }

    /// Binds the listener and builds a server over `store`.
    pub async fn build_with_store<S: Store, A: Authenticator>(
        self,
        store: S,
        auth: A,
    ) -> Result<DormkeepServer<S, A, JsonCodec>, DormkeepError> {
        let engine_config = self.engine.validated();
        let notifier = BroadcastNotifier::new(engine_config.notify_capacity);
        let engine = AllocationEngine::with_store(store, engine_config)?
            .with_notifier(Arc::new(notifier.clone()));

        let transport = WebSocketTransport::bind(self.config.bind_addr.as_str()).await?;

        let state = Arc::new(ServerState {
            engine,
            notifier,
            auth,
            codec: JsonCodec,
            config: self.config,
        });
        Ok(DormkeepServer { transport, state })
    }
}

/// A bound Dormkeep server. Call [`run`](Self::run) to serve.
pub struct DormkeepServer<S: Store, A: Authenticator, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S, A, C>>,
}

impl DormkeepServer<MemoryStore, crate::TokenAuthenticator, JsonCodec> {
    pub fn builder() -> DormkeepServerBuilder {
        DormkeepServerBuilder::new()
    }
}

impl<S, A, C> DormkeepServer<S, A, C>
where
    S: Store,
    A: Authenticator,
    C: Codec,
{
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The engine this server fronts, for in-process seeding and checks.
    pub fn engine(&self) -> &AllocationEngine<S> {
        &self.state.engine
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Accepts connections until the process ends, one task per client.
    pub async fn run(mut self) -> Result<(), DormkeepError> {
        tracing::info!(access = ?self.state.config.access, "Dormkeep server running");

        loop {
            match self.transport.accept().await {
                Ok(incoming) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(incoming, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let builder = DormkeepServerBuilder::new()
            .bind("0.0.0.0:9000")
            .idle_timeout(Duration::from_secs(30))
            .access(AccessPolicy::Open);
        assert_eq!(builder.config.bind_addr, "0.0.0.0:9000");
        assert_eq!(builder.config.idle_timeout, Duration::from_secs(30));
        assert_eq!(builder.config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(builder.config.access, AccessPolicy::Open);
    }

    #[tokio::test]
    async fn test_build_binds_ephemeral_port() {
        let server = DormkeepServer::builder()
            .bind("127.0.0.1:0")
            .build(crate::TokenAuthenticator::new())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.engine().room_stats().unwrap().total_rooms, 0);
    }
}
