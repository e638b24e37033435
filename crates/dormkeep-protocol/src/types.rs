//! Core records, identities, and read projections.
//!
//! Records (`Room`, `Student`) are plain data: they expose read-only
//! helpers and nothing that changes occupancy. Every occupancy change goes
//! through the allocation engine, which owns the transition rules.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a room.
///
/// A newtype over `u64` so a `RoomId` can never be passed where a
/// `StudentId` is expected. `#[serde(transparent)]` keeps it a bare number
/// on the wire: `RoomId(3)` is just `3`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// A unique identifier for a student.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StudentId(pub u64);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// The category of a room. Informational only: it never constrains
/// capacity (a "single" with capacity 3 is legal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    #[default]
    Single,
    Double,
    Triple,
    Dormitory,
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Double => write!(f, "double"),
            Self::Triple => write!(f, "triple"),
            Self::Dormitory => write!(f, "dormitory"),
        }
    }
}

/// A room record as held by the room store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Stable identity, assigned at creation.
    pub id: RoomId,
    /// Human-facing label, unique across rooms. Immutable after creation.
    pub room_number: String,
    /// Category tag.
    pub kind: RoomKind,
    /// Maximum simultaneous occupants. Always at least 1.
    pub capacity: u32,
    /// Price per term. Finite and non-negative.
    pub price: f64,
    /// Current occupants in allocation order. No duplicates, never longer
    /// than `capacity`.
    pub occupants: Vec<StudentId>,
}

impl Room {
    /// Number of students currently in the room.
    pub fn occupancy(&self) -> usize {
        self.occupants.len()
    }

    /// Returns `true` if at least one more student fits.
    pub fn has_vacancy(&self) -> bool {
        self.occupancy() < self.capacity as usize
    }

    /// Returns `true` if the room has at least one occupant.
    pub fn is_occupied(&self) -> bool {
        !self.occupants.is_empty()
    }

    /// Returns `true` if `student` is listed as an occupant.
    pub fn houses(&self, student: StudentId) -> bool {
        self.occupants.contains(&student)
    }

    /// A compact summary used inside student projections.
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id,
            room_number: self.room_number.clone(),
            kind: self.kind,
            capacity: self.capacity,
            occupancy: self.occupancy(),
        }
    }
}

/// Input for creating a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRoom {
    pub room_number: String,
    #[serde(default)]
    pub kind: RoomKind,
    pub capacity: u32,
    #[serde(default)]
    pub price: f64,
}

/// Admin edit of a room. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<RoomKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

// ---------------------------------------------------------------------------
// Student
// ---------------------------------------------------------------------------

/// A student record as held by the student store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    /// Normalised (trimmed, lower-case) and unique across students.
    pub email: String,
    pub course: String,
    /// Year of study, 1 through 4.
    pub year: u8,
    /// The room this student occupies, if any. Kept in lock-step with
    /// that room's `occupants`.
    pub room: Option<RoomId>,
}

impl Student {
    /// Returns `true` if the student currently holds a room.
    pub fn is_allocated(&self) -> bool {
        self.room.is_some()
    }

    /// The profile half of the record.
    pub fn profile(&self) -> StudentProfile {
        StudentProfile {
            name: self.name.clone(),
            email: self.email.clone(),
            course: self.course.clone(),
            year: self.year,
        }
    }
}

/// Profile attributes supplied when creating a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub name: String,
    pub email: String,
    pub course: String,
    pub year: u8,
}

/// Profile edit. The `room` link is deliberately absent: it only changes
/// through allocation operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u8>,
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// A room with its occupants' records resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomView {
    pub room: Room,
    pub occupants: Vec<Student>,
}

/// What a student projection shows about the student's room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub room_number: String,
    pub kind: RoomKind,
    pub capacity: u32,
    pub occupancy: usize,
}

/// A student with their room resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentView {
    pub student: Student,
    pub room: Option<RoomSummary>,
}

/// Result of a successful allocation or transfer: both sides as committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub student: StudentView,
    pub room: RoomView,
}

/// Aggregate room counts.
///
/// `occupied_rooms + available_rooms == total_rooms` always holds: a room
/// counts as available as soon as it has no occupants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomStats {
    pub total_rooms: usize,
    pub occupied_rooms: usize,
    pub available_rooms: usize,
}

/// Aggregate student counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StudentStats {
    pub total_students: usize,
    pub allocated_students: usize,
    pub unallocated_students: usize,
}

// ---------------------------------------------------------------------------
// Callers and topics
// ---------------------------------------------------------------------------

/// The role attached to an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::Student => write!(f, "student"),
        }
    }
}

/// Who is making a request. Produced by the authenticator; opaque to the
/// engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub name: String,
    pub role: Role,
}

impl Caller {
    pub fn admin(name: impl Into<String>) -> Self {
        Self { name: name.into(), role: Role::Admin }
    }

    pub fn student(name: impl Into<String>) -> Self {
        Self { name: name.into(), role: Role::Student }
    }
}

/// A change-signal topic. Observers refresh the matching listing when
/// they see one; the signal carries no payload.
///
/// Ordered so a connection can keep its subscriptions in a `BTreeSet`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Rooms,
    Students,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rooms => write!(f, "rooms"),
            Self::Students => write!(f, "students"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(capacity: u32, occupants: &[u64]) -> Room {
        Room {
            id: RoomId(1),
            room_number: "101".into(),
            kind: RoomKind::Double,
            capacity,
            price: 0.0,
            occupants: occupants.iter().copied().map(StudentId).collect(),
        }
    }

    #[test]
    fn test_ids_display_with_prefix() {
        assert_eq!(RoomId(4).to_string(), "R-4");
        assert_eq!(StudentId(9).to_string(), "S-9");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&RoomId(12)).unwrap(), "12");
        let id: StudentId = serde_json::from_str("5").unwrap();
        assert_eq!(id, StudentId(5));
    }

    #[test]
    fn test_room_vacancy_tracks_capacity() {
        assert!(room(2, &[1]).has_vacancy());
        assert!(!room(2, &[1, 2]).has_vacancy());
        assert!(!room(1, &[1]).has_vacancy());
    }

    #[test]
    fn test_room_is_occupied_and_houses() {
        let empty = room(3, &[]);
        assert!(!empty.is_occupied());

        let full = room(3, &[7, 8]);
        assert!(full.is_occupied());
        assert!(full.houses(StudentId(8)));
        assert!(!full.houses(StudentId(1)));
    }

    #[test]
    fn test_room_summary_reports_occupancy() {
        let summary = room(4, &[1, 2, 3]).summary();
        assert_eq!(summary.occupancy, 3);
        assert_eq!(summary.capacity, 4);
        assert_eq!(summary.room_number, "101");
    }

    #[test]
    fn test_room_kind_wire_names_are_lowercase() {
        assert_eq!(
            serde_json::to_string(&RoomKind::Dormitory).unwrap(),
            r#""dormitory""#
        );
        assert_eq!(RoomKind::Triple.to_string(), "triple");
    }

    #[test]
    fn test_new_room_defaults_kind_and_price() {
        let new: NewRoom =
            serde_json::from_str(r#"{"room_number":"A1","capacity":2}"#).unwrap();
        assert_eq!(new.kind, RoomKind::Single);
        assert_eq!(new.price, 0.0);
    }

    #[test]
    fn test_topic_and_role_display() {
        assert_eq!(Topic::Rooms.to_string(), "rooms");
        assert_eq!(Topic::Students.to_string(), "students");
        assert_eq!(Role::Admin.to_string(), "admin");
        assert_eq!(Caller::student("kim").role, Role::Student);
    }

    #[test]
    fn test_topics_collect_into_an_ordered_set() {
        use std::collections::BTreeSet;

        let topics: BTreeSet<Topic> =
            [Topic::Students, Topic::Rooms, Topic::Students].into_iter().collect();
        assert!(topics.contains(&Topic::Rooms));
        assert_eq!(topics.into_iter().collect::<Vec<_>>(), [Topic::Rooms, Topic::Students]);
    }
}
