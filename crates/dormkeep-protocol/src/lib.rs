//! Shared vocabulary for Dormkeep.
//!
//! This crate defines everything the other layers agree on:
//!
//! - **Records** ([`Room`], [`Student`]) and their identities
//!   ([`RoomId`], [`StudentId`]).
//! - **Projections** ([`RoomView`], [`StudentView`], [`RoomStats`], ...),
//!   the denormalised shapes returned by read operations.
//! - **Callers** ([`Caller`], [`Role`]): who is asking.
//! - **Topics** ([`Topic`]): the change signals observers subscribe to.
//! - **Wire messages** ([`Envelope`], [`Request`], [`Response`]) and the
//!   [`Codec`] that turns them into bytes.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Allocation engine (records)
//! ```
//!
//! The protocol layer holds no state and performs no I/O.

mod codec;
mod error;
mod message;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::{Envelope, ErrorKind, Payload, Request, Response};
pub use types::{
    Allocation, Caller, NewRoom, Role, Room, RoomId, RoomKind, RoomPatch,
    RoomStats, RoomSummary, RoomView, Student, StudentId, StudentPatch,
    StudentProfile, StudentStats, StudentView, Topic,
};
