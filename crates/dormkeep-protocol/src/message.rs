//! Wire envelopes exchanged between the service and its clients.
//!
//! Every frame is one [`Envelope`]. Clients send [`Request`]s; the server
//! answers each with a [`Response`] carrying the same `seq`, and pushes
//! unsolicited [`Response::Changed`] notices with `seq = 0`.

use serde::{Deserialize, Serialize};

use crate::types::{
    Allocation, NewRoom, Role, Room, RoomId, RoomPatch, RoomStats, RoomView,
    Student, StudentId, StudentPatch, StudentProfile, StudentStats,
    StudentView, Topic,
};

/// The outer wrapper for every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Client-chosen sequence number, echoed back on the response.
    pub seq: u64,
    /// What the frame carries.
    pub payload: Payload,
}

/// Direction-tagged content of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Request(Request),
    Response(Response),
}

/// Client → server messages.
///
/// Internally tagged: `{ "type": "Allocate", "student_id": 1, "room_id": 2 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    // -- Connection lifecycle --
    /// Must be the first frame. `token` is handed to the authenticator.
    Hello { version: u32, token: Option<String> },
    /// Ask to receive `Changed` notices for the given topics.
    Subscribe { topics: Vec<Topic> },
    /// Close the connection.
    Bye,

    // -- Rooms --
    CreateRoom { room: NewRoom },
    UpdateRoom { room_id: RoomId, patch: RoomPatch },
    DeleteRoom { room_id: RoomId },

    // -- Students --
    CreateStudent {
        profile: StudentProfile,
        #[serde(default)]
        room_id: Option<RoomId>,
    },
    UpdateStudent { student_id: StudentId, patch: StudentPatch },
    DeleteStudent { student_id: StudentId },

    // -- Allocation --
    Allocate { student_id: StudentId, room_id: RoomId },
    Transfer { student_id: StudentId, room_id: RoomId },
    Deallocate { student_id: StudentId },

    // -- Queries --
    ListRooms,
    ListStudents,
    GetRoom { room_id: RoomId },
    GetStudent { student_id: StudentId },
    RoomStats,
    StudentStats,
}

impl Request {
    /// Returns `true` for requests that change rooms or students.
    ///
    /// The role guard uses this to decide which requests need write access.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateRoom { .. }
                | Self::UpdateRoom { .. }
                | Self::DeleteRoom { .. }
                | Self::CreateStudent { .. }
                | Self::UpdateStudent { .. }
                | Self::DeleteStudent { .. }
                | Self::Allocate { .. }
                | Self::Transfer { .. }
                | Self::Deallocate { .. }
        )
    }

    /// A short, stable name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Subscribe { .. } => "subscribe",
            Self::Bye => "bye",
            Self::CreateRoom { .. } => "create_room",
            Self::UpdateRoom { .. } => "update_room",
            Self::DeleteRoom { .. } => "delete_room",
            Self::CreateStudent { .. } => "create_student",
            Self::UpdateStudent { .. } => "update_student",
            Self::DeleteStudent { .. } => "delete_student",
            Self::Allocate { .. } => "allocate",
            Self::Transfer { .. } => "transfer",
            Self::Deallocate { .. } => "deallocate",
            Self::ListRooms => "list_rooms",
            Self::ListStudents => "list_students",
            Self::GetRoom { .. } => "get_room",
            Self::GetStudent { .. } => "get_student",
            Self::RoomStats => "room_stats",
            Self::StudentStats => "student_stats",
        }
    }
}

/// Machine-readable failure category carried by [`Response::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    CapacityExceeded,
    InvalidState,
    Validation,
    /// Lock wait expired; the request may be retried as-is.
    Busy,
    Unauthorized,
    Forbidden,
    BadRequest,
    Internal,
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Handshake accepted.
    Welcome { role: Role },
    /// Generic success for operations with nothing to return.
    Ack,
    /// Subscription confirmed.
    Subscribed { topics: Vec<Topic> },

    Room { room: Room },
    Student { student: Student },
    Allocation { allocation: Allocation },
    /// Returned by `Deallocate`: the student after the link was cleared.
    Released { student: StudentView },

    Rooms { rooms: Vec<RoomView> },
    Students { students: Vec<StudentView> },
    RoomDetail { room: RoomView },
    StudentDetail { student: StudentView },
    RoomStats { stats: RoomStats },
    StudentStats { stats: StudentStats },

    /// Unsolicited: something under `topic` changed. Refresh via a query.
    Changed { topic: Topic },

    /// The request failed.
    Error {
        code: u16,
        kind: ErrorKind,
        message: String,
    },
}
