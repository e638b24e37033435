//! # Dormkeep
//!
//! Dormitory room allocation as a service.
//!
//! Rooms have a capacity, students hold at most one room, and the
//! [`AllocationEngine`](dormkeep_allocation::AllocationEngine) keeps both
//! sides of that link in agreement under concurrent use. This crate puts
//! a WebSocket front on the engine: clients authenticate with a token,
//! send [`Request`](dormkeep_protocol::Request)s, and can subscribe to change notices.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dormkeep::prelude::*;
//!
//! # async fn start() -> Result<(), DormkeepError> {
//! let auth = TokenAuthenticator::new()
//!     .with_token("warden-key", Caller::admin("warden"))
//!     .with_token("ada-key", Caller::student("ada"));
//!
//! let server = DormkeepServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .access(AccessPolicy::AdminWrites)
//!     .build(auth)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod auth;
mod error;
mod guard;
mod handler;
pub mod logging;
mod server;

pub use auth::{AuthError, Authenticator, TokenAuthenticator};
pub use error::DormkeepError;
pub use guard::{AccessPolicy, Forbidden};
pub use server::{DormkeepServer, DormkeepServerBuilder, PROTOCOL_VERSION, ServerConfig};

/// Everything needed to run a server or talk to one.
pub mod prelude {
    pub use crate::{
        AccessPolicy, AuthError, Authenticator, DormkeepError, DormkeepServer,
        DormkeepServerBuilder, PROTOCOL_VERSION, ServerConfig, TokenAuthenticator,
    };
    pub use dormkeep_allocation::{
        AllocationEngine, AllocationError, EngineConfig, MemoryStore, Store,
    };
    pub use dormkeep_protocol::{
        Allocation, Caller, Codec, Envelope, ErrorKind, JsonCodec, NewRoom, Payload,
        Request, Response, Role, Room, RoomId, RoomKind, RoomPatch, RoomStats, RoomView,
        Student, StudentId, StudentPatch, StudentProfile, StudentStats, StudentView, Topic,
    };
}
