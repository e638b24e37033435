//! Room and student storage.
//!
//! Stores are passive: they hold records, answer reads, and apply a
//! [`Batch`] of writes all-or-nothing. They never decide whether an
//! allocation is allowed (that is the engine's job), but a store does
//! refuse writes that contradict its own records (pushing a student into
//! a room that doesn't exist, removing an occupant that isn't there), and
//! rolls the whole batch back when it does.

use std::collections::BTreeMap;
use std::sync::RwLock;

use dormkeep_protocol::{
    Room, RoomId, RoomKind, RoomStats, RoomView, Student, StudentId,
    StudentProfile, StudentStats, StudentView,
};

use crate::StoreError;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Every room and student record at one instant.
///
/// Ordered maps so listings come out in id (creation) order.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub rooms: BTreeMap<RoomId, Room>,
    pub students: BTreeMap<StudentId, Student>,
}

impl Snapshot {
    /// A room with its occupants' records resolved.
    pub fn room_view(&self, id: RoomId) -> Option<RoomView> {
        let room = self.rooms.get(&id)?;
        let occupants = room
            .occupants
            .iter()
            .filter_map(|sid| self.students.get(sid).cloned())
            .collect();
        Some(RoomView { room: room.clone(), occupants })
    }

    /// A student with their room summarised.
    pub fn student_view(&self, id: StudentId) -> Option<StudentView> {
        let student = self.students.get(&id)?;
        let room = student
            .room
            .and_then(|rid| self.rooms.get(&rid))
            .map(Room::summary);
        Some(StudentView { student: student.clone(), room })
    }

    pub fn room_stats(&self) -> RoomStats {
        let total_rooms = self.rooms.len();
        let occupied_rooms = self.rooms.values().filter(|r| r.is_occupied()).count();
        RoomStats {
            total_rooms,
            occupied_rooms,
            available_rooms: total_rooms - occupied_rooms,
        }
    }

    pub fn student_stats(&self) -> StudentStats {
        let total_students = self.students.len();
        let allocated_students = self
            .students
            .values()
            .filter(|s| s.is_allocated())
            .count();
        StudentStats {
            total_students,
            allocated_students,
            unallocated_students: total_students - allocated_students,
        }
    }

    /// Checks the occupancy invariants and returns every breach found.
    ///
    /// - each room holds at most `capacity` occupants, without duplicates;
    /// - every occupant exists and points back at the room;
    /// - every allocated student is listed by exactly the room it names.
    ///
    /// An empty result means the snapshot is consistent.
    pub fn violations(&self) -> Vec<String> {
        let mut found = Vec::new();
        let mut listed_in: BTreeMap<StudentId, RoomId> = BTreeMap::new();

        for room in self.rooms.values() {
            if room.occupancy() > room.capacity as usize {
                found.push(format!(
                    "{} holds {} occupants but capacity is {}",
                    room.id,
                    room.occupancy(),
                    room.capacity
                ));
            }
            for sid in &room.occupants {
                if let Some(other) = listed_in.insert(*sid, room.id) {
                    found.push(format!("{sid} is listed by both {other} and {}", room.id));
                }
                match self.students.get(sid) {
                    None => found.push(format!("{} lists missing student {sid}", room.id)),
                    Some(s) if s.room != Some(room.id) => found.push(format!(
                        "{} lists {sid} but the student points at {:?}",
                        room.id, s.room
                    )),
                    Some(_) => {}
                }
            }
        }

        for student in self.students.values() {
            if let Some(rid) = student.room {
                if listed_in.get(&student.id) != Some(&rid) {
                    found.push(format!(
                        "{} points at {rid} but is not among its occupants",
                        student.id
                    ));
                }
            }
        }

        found
    }

    /// Applies one write, returning what is needed to undo it.
    fn apply(&mut self, write: Write) -> Result<Undo, StoreError> {
        match write {
            Write::InsertRoom(room) => {
                if self.rooms.contains_key(&room.id) {
                    return Err(rejected(format!("room {} already exists", room.id)));
                }
                let id = room.id;
                self.rooms.insert(id, room);
                Ok(Undo::DropRoom(id))
            }
            Write::UpdateRoom { id, kind, capacity, price } => {
                let room = self.room_mut(id)?;
                let before = room.clone();
                room.kind = kind;
                room.capacity = capacity;
                room.price = price;
                Ok(Undo::RestoreRoom(before))
            }
            Write::RemoveRoom(id) => {
                let room = self
                    .rooms
                    .remove(&id)
                    .ok_or_else(|| rejected(format!("room {id} does not exist")))?;
                Ok(Undo::RestoreRoom(room))
            }
            Write::PushOccupant { room, student } => {
                let target = self.room_mut(room)?;
                if target.houses(student) {
                    return Err(rejected(format!("{student} already listed in {room}")));
                }
                let before = target.clone();
                target.occupants.push(student);
                Ok(Undo::RestoreRoom(before))
            }
            Write::PullOccupant { room, student } => {
                let target = self.room_mut(room)?;
                if !target.houses(student) {
                    return Err(rejected(format!("{student} not listed in {room}")));
                }
                let before = target.clone();
                target.occupants.retain(|sid| *sid != student);
                Ok(Undo::RestoreRoom(before))
            }
            Write::InsertStudent(student) => {
                if self.students.contains_key(&student.id) {
                    return Err(rejected(format!("student {} already exists", student.id)));
                }
                let id = student.id;
                self.students.insert(id, student);
                Ok(Undo::DropStudent(id))
            }
            Write::UpdateProfile { id, profile } => {
                let student = self.student_mut(id)?;
                let before = student.clone();
                student.name = profile.name;
                student.email = profile.email;
                student.course = profile.course;
                student.year = profile.year;
                Ok(Undo::RestoreStudent(before))
            }
            Write::SetStudentRoom { student, room } => {
                let target = self.student_mut(student)?;
                let before = target.clone();
                target.room = room;
                Ok(Undo::RestoreStudent(before))
            }
            Write::RemoveStudent(id) => {
                let student = self
                    .students
                    .remove(&id)
                    .ok_or_else(|| rejected(format!("student {id} does not exist")))?;
                Ok(Undo::RestoreStudent(student))
            }
        }
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::RestoreRoom(room) => {
                self.rooms.insert(room.id, room);
            }
            Undo::DropRoom(id) => {
                self.rooms.remove(&id);
            }
            Undo::RestoreStudent(student) => {
                self.students.insert(student.id, student);
            }
            Undo::DropStudent(id) => {
                self.students.remove(&id);
            }
        }
    }

    fn room_mut(&mut self, id: RoomId) -> Result<&mut Room, StoreError> {
        self.rooms
            .get_mut(&id)
            .ok_or_else(|| rejected(format!("room {id} does not exist")))
    }

    fn student_mut(&mut self, id: StudentId) -> Result<&mut Student, StoreError> {
        self.students
            .get_mut(&id)
            .ok_or_else(|| rejected(format!("student {id} does not exist")))
    }
}

fn rejected(msg: String) -> StoreError {
    StoreError::Rejected(msg)
}

// ---------------------------------------------------------------------------
// Writes and batches
// ---------------------------------------------------------------------------

/// One field-level change to the stored records.
///
/// Writes touch only the fields they name, so a profile edit and an
/// occupancy change on the same student never overwrite each other.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    InsertRoom(Room),
    UpdateRoom {
        id: RoomId,
        kind: RoomKind,
        capacity: u32,
        price: f64,
    },
    RemoveRoom(RoomId),
    PushOccupant { room: RoomId, student: StudentId },
    PullOccupant { room: RoomId, student: StudentId },
    InsertStudent(Student),
    UpdateProfile { id: StudentId, profile: StudentProfile },
    SetStudentRoom { student: StudentId, room: Option<RoomId> },
    RemoveStudent(StudentId),
}

/// An ordered list of writes committed as one unit.
///
/// Only the engine builds batches, after taking its locks and checking
/// the result against current records. A [`Store`] implementation reads
/// them; it cannot be handed one from outside the crate:
///
/// ```compile_fail
/// use dormkeep_allocation::Batch;
///
/// let _ = Batch::new();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    writes: Vec<Write>,
}

impl Batch {
    pub(crate) fn new() -> Self {
        Self { writes: Vec::new() }
    }

    /// Appends a write; builder style.
    pub(crate) fn with(mut self, write: Write) -> Self {
        self.writes.push(write);
        self
    }

    pub(crate) fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }
}

impl IntoIterator for Batch {
    type Item = Write;
    type IntoIter = std::vec::IntoIter<Write>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

/// How to reverse one applied write.
enum Undo {
    RestoreRoom(Room),
    DropRoom(RoomId),
    RestoreStudent(Student),
    DropStudent(StudentId),
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Durable home of room and student records.
///
/// Implementors supply two primitives:
///
/// - [`read`](Store::read) runs a closure against a consistent view: it
///   must never expose a partially applied batch.
/// - [`commit`](Store::commit) applies a whole batch or none of it.
///
/// Everything else is derived from those two. Both are synchronous:
/// the engine serialises conflicting work with its own locks before it
/// reaches the store, so a store only needs short critical sections.
pub trait Store: Send + Sync + 'static {
    /// Runs `f` against a consistent view of all records.
    fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> Result<R, StoreError>;

    /// Applies every write in `batch`, or none of them.
    fn commit(&self, batch: Batch) -> Result<(), StoreError>;

    /// A full copy of the current records.
    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        self.read(Snapshot::clone)
    }

    fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        self.read(|s| s.rooms.get(&id).cloned())
    }

    fn student(&self, id: StudentId) -> Result<Option<Student>, StoreError> {
        self.read(|s| s.students.get(&id).cloned())
    }

    /// The room currently using `room_number`, if any.
    fn room_by_number(&self, room_number: &str) -> Result<Option<RoomId>, StoreError> {
        self.read(|s| {
            s.rooms
                .values()
                .find(|r| r.room_number == room_number)
                .map(|r| r.id)
        })
    }

    /// The student currently using `email`, if any.
    fn student_by_email(&self, email: &str) -> Result<Option<StudentId>, StoreError> {
        self.read(|s| {
            s.students
                .values()
                .find(|st| st.email == email)
                .map(|st| st.id)
        })
    }

    /// Highest room and student ids in use, for seeding id counters.
    fn max_ids(&self) -> Result<(u64, u64), StoreError> {
        self.read(|s| {
            let room = s.rooms.keys().next_back().map_or(0, |id| id.0);
            let student = s.students.keys().next_back().map_or(0, |id| id.0);
            (room, student)
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process [`Store`] backed by a single `RwLock`.
///
/// A commit holds the write lock for the whole batch, applying writes in
/// order and undoing the applied prefix if any write is rejected. Readers
/// take the read lock, so they see a batch entirely or not at all.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from existing records. An engine refuses a store whose
    /// records report any [`Snapshot::violations`].
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self { inner: RwLock::new(snapshot) }
    }
}

impl Store for MemoryStore {
    fn read<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> Result<R, StoreError> {
        let guard = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&guard))
    }

    fn commit(&self, batch: Batch) -> Result<(), StoreError> {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let mut applied = Vec::with_capacity(batch.len());

        for write in batch {
            match guard.apply(write) {
                Ok(undo) => applied.push(undo),
                Err(e) => {
                    for undo in applied.into_iter().rev() {
                        guard.revert(undo);
                    }
                    tracing::debug!(error = %e, "batch rolled back");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
