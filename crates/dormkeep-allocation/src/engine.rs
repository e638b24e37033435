//! The allocation engine: every change to rooms, students, and the link
//! between them goes through here.
//!
//! Each operation follows the same shape:
//!
//! 1. validate the input (no locks yet);
//! 2. work out which [`LockKey`]s it needs, reading unlocked state first
//!    when that depends on where a student currently lives;
//! 3. acquire the keys (bounded by `EngineConfig::lock_timeout`);
//! 4. re-read under the locks and, if the state moved since step 2,
//!    release and re-plan;
//! 5. check the rules and commit one [`Batch`];
//! 6. announce the changed topics.
//!
//! Nothing is written before step 5, so an operation that fails or is
//! cancelled earlier leaves no trace.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dormkeep_protocol::{
    Allocation, NewRoom, Room, RoomId, RoomPatch, Student, StudentId,
    StudentPatch, StudentProfile, StudentView, Topic,
};
use tokio::time::Instant;

use crate::lock::{LockKey, LockTable};
use crate::store::{Batch, MemoryStore, Snapshot, Store, Write};
use crate::{
    AllocationError, EngineConfig, Entity, NoopNotifier, Notifier, StoreError,
    validate,
};

/// Owns the transition rules for rooms and students.
///
/// Share it behind an `Arc`; every method takes `&self` and is safe to
/// call from many tasks at once.
pub struct AllocationEngine<S: Store = MemoryStore> {
    pub(crate) store: S,
    locks: LockTable,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    next_room_id: AtomicU64,
    next_student_id: AtomicU64,
}

impl AllocationEngine<MemoryStore> {
    /// An engine over a fresh in-memory store that announces to nobody.
    pub fn new(config: EngineConfig) -> Self {
        Self::assemble(MemoryStore::new(), config, (0, 0))
    }
}

impl<S: Store> AllocationEngine<S> {
    /// An engine over an existing store. Id counters continue after the
    /// highest ids already stored.
    ///
    /// # Errors
    /// [`StoreError::Rejected`] when the stored records already break an
    /// occupancy invariant.
    pub fn with_store(store: S, config: EngineConfig) -> Result<Self, AllocationError> {
        let violations = store.read(Snapshot::violations)?;
        if !violations.is_empty() {
            tracing::warn!(count = violations.len(), "refusing inconsistent store");
            return Err(StoreError::Rejected(violations.join("; ")).into());
        }
        let seeds = store.max_ids()?;
        Ok(Self::assemble(store, config, seeds))
    }

    fn assemble(store: S, config: EngineConfig, (room_seed, student_seed): (u64, u64)) -> Self {
        Self {
            store,
            locks: LockTable::new(),
            notifier: Arc::new(NoopNotifier),
            config: config.validated(),
            next_room_id: AtomicU64::new(room_seed + 1),
            next_student_id: AtomicU64::new(student_seed + 1),
        }
    }

    /// Routes change signals to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    /// Creates a room with no occupants.
    ///
    /// # Errors
    /// - [`AllocationError::Validation`]: blank number, zero capacity,
    ///   negative price
    /// - [`AllocationError::Conflict`]: the room number is taken
    pub async fn create_room(&self, room: NewRoom) -> Result<Room, AllocationError> {
        let room = validate::new_room(room)?;
        let keys = BTreeSet::from([LockKey::RoomNumber(room.room_number.clone())]);
        let _guard = self.locks.acquire("create_room", keys, self.deadline()).await?;

        if self.store.room_by_number(&room.room_number)?.is_some() {
            tracing::debug!(room_number = %room.room_number, "room number taken");
            return Err(AllocationError::Conflict(format!(
                "room number {} already exists",
                room.room_number
            )));
        }

        let record = Room {
            id: self.next_room_id(),
            room_number: room.room_number,
            kind: room.kind,
            capacity: room.capacity,
            price: room.price,
            occupants: Vec::new(),
        };
        self.store
            .commit(Batch::new().with(Write::InsertRoom(record.clone())))?;

        tracing::info!(
            room_id = %record.id,
            room_number = %record.room_number,
            capacity = record.capacity,
            "room created"
        );
        self.announce(&[Topic::Rooms]);
        Ok(record)
    }

    /// Edits a room's kind, capacity, or price.
    ///
    /// Capacity may not drop below the current occupancy.
    ///
    /// # Errors
    /// - [`AllocationError::NotFound`]: no such room
    /// - [`AllocationError::CapacityExceeded`]: new capacity < occupancy
    pub async fn update_room(
        &self,
        room_id: RoomId,
        patch: RoomPatch,
    ) -> Result<Room, AllocationError> {
        let patch = validate::room_patch(patch)?;
        let keys = BTreeSet::from([LockKey::Room(room_id)]);
        let _guard = self.locks.acquire("update_room", keys, self.deadline()).await?;

        let current = self.load_room(room_id)?;
        let capacity = patch.capacity.unwrap_or(current.capacity);
        if current.occupancy() > capacity as usize {
            tracing::debug!(
                %room_id,
                occupancy = current.occupancy(),
                capacity,
                "capacity below occupancy rejected"
            );
            return Err(AllocationError::CapacityExceeded(room_id));
        }

        let updated = Room {
            kind: patch.kind.unwrap_or(current.kind),
            capacity,
            price: patch.price.unwrap_or(current.price),
            ..current
        };
        self.store.commit(Batch::new().with(Write::UpdateRoom {
            id: room_id,
            kind: updated.kind,
            capacity: updated.capacity,
            price: updated.price,
        }))?;

        tracing::info!(%room_id, capacity = updated.capacity, "room updated");
        self.announce(&[Topic::Rooms]);
        Ok(updated)
    }

    /// Deletes a room, first releasing every occupant.
    ///
    /// Occupants are released and the room removed in one commit; nothing
    /// about capacity or occupancy blocks deletion. Returns the ids of the
    /// students that were released.
    ///
    /// # Errors
    /// - [`AllocationError::NotFound`]: no such room
    pub async fn delete_room(&self, room_id: RoomId) -> Result<Vec<StudentId>, AllocationError> {
        const OP: &str = "delete_room";
        let deadline = self.deadline();

        loop {
            let planned = self.load_room(room_id)?;
            let mut keys: BTreeSet<LockKey> =
                planned.occupants.iter().map(|s| LockKey::Student(*s)).collect();
            keys.insert(LockKey::Room(room_id));
            let guard = self.locks.acquire(OP, keys, deadline).await?;

            let room = self.load_room(room_id)?;
            if !room.occupants.iter().all(|s| guard.holds(&LockKey::Student(*s))) {
                drop(guard);
                self.replan(OP, deadline)?;
                continue;
            }

            let mut batch = Batch::new();
            for student in &room.occupants {
                batch.push(Write::SetStudentRoom { student: *student, room: None });
            }
            batch.push(Write::RemoveRoom(room_id));
            self.store.commit(batch)?;
            drop(guard);

            tracing::info!(%room_id, released = room.occupants.len(), "room deleted");
            if room.is_occupied() {
                self.announce(&[Topic::Rooms, Topic::Students]);
            } else {
                self.announce(&[Topic::Rooms]);
            }
            return Ok(room.occupants);
        }
    }

    // -----------------------------------------------------------------------
    // Students
    // -----------------------------------------------------------------------

    /// Creates a student, optionally placing them in a room straight away.
    ///
    /// With a room, the student record and the room's new occupant entry
    /// are committed together.
    ///
    /// # Errors
    /// - [`AllocationError::Validation`]: bad profile
    /// - [`AllocationError::Conflict`]: email taken
    /// - [`AllocationError::NotFound`]: the room doesn't exist
    /// - [`AllocationError::CapacityExceeded`]: the room is full
    pub async fn create_student(
        &self,
        profile: StudentProfile,
        room_id: Option<RoomId>,
    ) -> Result<Student, AllocationError> {
        let profile = validate::profile(profile)?;
        let mut keys = BTreeSet::from([LockKey::Email(profile.email.clone())]);
        if let Some(room_id) = room_id {
            keys.insert(LockKey::Room(room_id));
        }
        let _guard = self.locks.acquire("create_student", keys, self.deadline()).await?;

        if self.store.student_by_email(&profile.email)?.is_some() {
            tracing::debug!(email = %profile.email, "email taken");
            return Err(AllocationError::Conflict(format!(
                "email {} already registered",
                profile.email
            )));
        }
        if let Some(room_id) = room_id {
            let room = self.load_room(room_id)?;
            if !room.has_vacancy() {
                tracing::debug!(%room_id, "pre-assignment rejected, room full");
                return Err(AllocationError::CapacityExceeded(room_id));
            }
        }

        let student = Student {
            id: self.next_student_id(),
            name: profile.name,
            email: profile.email,
            course: profile.course,
            year: profile.year,
            room: room_id,
        };
        let mut batch = Batch::new().with(Write::InsertStudent(student.clone()));
        if let Some(room_id) = room_id {
            batch.push(Write::PushOccupant { room: room_id, student: student.id });
        }
        self.store.commit(batch)?;

        tracing::info!(student_id = %student.id, room_id = ?student.room, "student created");
        if room_id.is_some() {
            self.announce(&[Topic::Students, Topic::Rooms]);
        } else {
            self.announce(&[Topic::Students]);
        }
        Ok(student)
    }

    /// Edits a student's profile. The room link is untouched.
    ///
    /// # Errors
    /// - [`AllocationError::NotFound`]: no such student
    /// - [`AllocationError::Conflict`]: the new email belongs to someone else
    pub async fn update_student(
        &self,
        student_id: StudentId,
        patch: StudentPatch,
    ) -> Result<Student, AllocationError> {
        let patch = validate::student_patch(patch)?;
        let mut keys = BTreeSet::from([LockKey::Student(student_id)]);
        if let Some(email) = &patch.email {
            keys.insert(LockKey::Email(email.clone()));
        }
        let _guard = self.locks.acquire("update_student", keys, self.deadline()).await?;

        let current = self.load_student(student_id)?;
        if let Some(email) = &patch.email {
            if let Some(owner) = self.store.student_by_email(email)? {
                if owner != student_id {
                    return Err(AllocationError::Conflict(format!(
                        "email {email} already registered"
                    )));
                }
            }
        }

        let StudentPatch { name, email, course, year } = patch;
        let updated = Student {
            name: name.unwrap_or(current.name),
            email: email.unwrap_or(current.email),
            course: course.unwrap_or(current.course),
            year: year.unwrap_or(current.year),
            ..current
        };
        self.store.commit(Batch::new().with(Write::UpdateProfile {
            id: student_id,
            profile: updated.profile(),
        }))?;

        tracing::info!(%student_id, "student updated");
        self.announce(&[Topic::Students]);
        Ok(updated)
    }

    /// Deletes a student, first removing them from their room.
    ///
    /// Returns the record as it was just before deletion.
    ///
    /// # Errors
    /// - [`AllocationError::NotFound`]: no such student
    pub async fn delete_student(&self, student_id: StudentId) -> Result<Student, AllocationError> {
        const OP: &str = "delete_student";
        let deadline = self.deadline();

        loop {
            let planned = self.load_student(student_id)?;
            let guard = self
                .locks
                .acquire(OP, student_keys(student_id, planned.room, None), deadline)
                .await?;

            let student = self.load_student(student_id)?;
            if student.room != planned.room {
                drop(guard);
                self.replan(OP, deadline)?;
                continue;
            }

            let mut batch = Batch::new();
            if let Some(room_id) = student.room {
                batch.push(Write::PullOccupant { room: room_id, student: student_id });
            }
            batch.push(Write::RemoveStudent(student_id));
            self.store.commit(batch)?;
            drop(guard);

            tracing::info!(%student_id, room_id = ?student.room, "student deleted");
            if student.is_allocated() {
                self.announce(&[Topic::Students, Topic::Rooms]);
            } else {
                self.announce(&[Topic::Students]);
            }
            return Ok(student);
        }
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Places a student in a room.
    ///
    /// A student who already holds a different room is transferred: they
    /// leave the old room and enter the new one in the same commit, and
    /// the capacity check on the new room runs with them already out of
    /// the old one.
    ///
    /// # Errors
    /// - [`AllocationError::NotFound`]: student, then room, checked in
    ///   that order
    /// - [`AllocationError::InvalidState`]: already in this very room
    /// - [`AllocationError::CapacityExceeded`]: the room is full; a
    ///   transferring student stays where they were
    pub async fn allocate(
        &self,
        student_id: StudentId,
        room_id: RoomId,
    ) -> Result<Allocation, AllocationError> {
        self.relocate("allocate", student_id, room_id, false).await
    }

    /// Moves a student who already holds a room into another one.
    ///
    /// Same as [`allocate`](Self::allocate) except that a student with no
    /// room is rejected instead of being allocated.
    ///
    /// # Errors
    /// As for `allocate`, plus [`AllocationError::InvalidState`] when the
    /// student holds no room.
    pub async fn transfer(
        &self,
        student_id: StudentId,
        room_id: RoomId,
    ) -> Result<Allocation, AllocationError> {
        self.relocate("transfer", student_id, room_id, true).await
    }

    /// Releases a student from their room; both records survive.
    ///
    /// # Errors
    /// - [`AllocationError::NotFound`]: no such student
    /// - [`AllocationError::InvalidState`]: the student holds no room
    pub async fn deallocate(&self, student_id: StudentId) -> Result<StudentView, AllocationError> {
        const OP: &str = "deallocate";
        let deadline = self.deadline();

        loop {
            let planned = self.load_student(student_id)?;
            let Some(room_id) = planned.room else {
                tracing::debug!(%student_id, "deallocate on unallocated student");
                return Err(not_allocated(student_id));
            };
            let guard = self
                .locks
                .acquire(OP, student_keys(student_id, Some(room_id), None), deadline)
                .await?;

            let student = self.load_student(student_id)?;
            if student.room != Some(room_id) {
                drop(guard);
                self.replan(OP, deadline)?;
                continue;
            }

            self.store.commit(
                Batch::new()
                    .with(Write::PullOccupant { room: room_id, student: student_id })
                    .with(Write::SetStudentRoom { student: student_id, room: None }),
            )?;
            drop(guard);

            tracing::info!(%student_id, %room_id, "student deallocated");
            self.announce(&[Topic::Students, Topic::Rooms]);
            return Ok(StudentView {
                student: Student { room: None, ..student },
                room: None,
            });
        }
    }

    /// The "change room" entry point: `Some(room)` allocates (or
    /// transfers), `None` deallocates.
    pub async fn change_room(
        &self,
        student_id: StudentId,
        room_id: Option<RoomId>,
    ) -> Result<StudentView, AllocationError> {
        match room_id {
            Some(room_id) => Ok(self.allocate(student_id, room_id).await?.student),
            None => self.deallocate(student_id).await,
        }
    }

    async fn relocate(
        &self,
        operation: &'static str,
        student_id: StudentId,
        target: RoomId,
        require_current: bool,
    ) -> Result<Allocation, AllocationError> {
        let deadline = self.deadline();

        loop {
            let planned = self.load_student(student_id)?;
            if require_current && planned.room.is_none() {
                return Err(not_allocated(student_id));
            }
            let guard = self
                .locks
                .acquire(
                    operation,
                    student_keys(student_id, planned.room, Some(target)),
                    deadline,
                )
                .await?;

            let student = self.load_student(student_id)?;
            if student.room != planned.room {
                drop(guard);
                self.replan(operation, deadline)?;
                continue;
            }
            let room = self.load_room(target)?;
            if student.room == Some(target) {
                return Err(AllocationError::InvalidState(format!(
                    "student {student_id} is already allocated to room {target}"
                )));
            }
            if !room.has_vacancy() {
                tracing::debug!(
                    %student_id,
                    room_id = %target,
                    occupancy = room.occupancy(),
                    capacity = room.capacity,
                    "room full"
                );
                return Err(AllocationError::CapacityExceeded(target));
            }

            let mut batch = Batch::new();
            if let Some(from) = student.room {
                batch.push(Write::PullOccupant { room: from, student: student_id });
            }
            batch.push(Write::PushOccupant { room: target, student: student_id });
            batch.push(Write::SetStudentRoom { student: student_id, room: Some(target) });
            self.store.commit(batch)?;

            let allocation = self.store.read(|s| {
                Some(Allocation {
                    student: s.student_view(student_id)?,
                    room: s.room_view(target)?,
                })
            })?;
            drop(guard);

            match student.room {
                Some(from) => {
                    tracing::info!(%student_id, %from, to = %target, "student transferred");
                }
                None => tracing::info!(%student_id, room_id = %target, "student allocated"),
            }
            self.announce(&[Topic::Students, Topic::Rooms]);

            return allocation.ok_or_else(|| {
                StoreError::Rejected(format!(
                    "records for {student_id} / {target} missing after commit"
                ))
                .into()
            });
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    pub(crate) fn load_room(&self, id: RoomId) -> Result<Room, AllocationError> {
        self.store
            .room(id)?
            .ok_or(AllocationError::NotFound(Entity::Room(id)))
    }

    pub(crate) fn load_student(&self, id: StudentId) -> Result<Student, AllocationError> {
        self.store
            .student(id)?
            .ok_or(AllocationError::NotFound(Entity::Student(id)))
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.lock_timeout
    }

    /// Called when state moved between planning and locking. Gives up once
    /// the operation's deadline has passed.
    fn replan(&self, operation: &'static str, deadline: Instant) -> Result<(), AllocationError> {
        if Instant::now() >= deadline {
            tracing::warn!(operation, "state kept moving, giving up");
            return Err(AllocationError::Busy { operation });
        }
        tracing::debug!(operation, "state moved while waiting for locks, re-planning");
        Ok(())
    }

    fn announce(&self, topics: &[Topic]) {
        for topic in topics {
            self.notifier.publish(*topic);
        }
    }

    fn next_room_id(&self) -> RoomId {
        RoomId(self.next_room_id.fetch_add(1, Ordering::Relaxed))
    }

    fn next_student_id(&self) -> StudentId {
        StudentId(self.next_student_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Keys for an operation on `student` that touches their current room and
/// optionally a target room.
fn student_keys(
    student: StudentId,
    current: Option<RoomId>,
    target: Option<RoomId>,
) -> BTreeSet<LockKey> {
    let mut keys = BTreeSet::from([LockKey::Student(student)]);
    keys.extend(current.into_iter().chain(target).map(LockKey::Room));
    keys
}

fn not_allocated(student_id: StudentId) -> AllocationError {
    AllocationError::InvalidState(format!("student {student_id} is not allocated to any room"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_keys_dedupes_same_room() {
        let keys = student_keys(StudentId(1), Some(RoomId(2)), Some(RoomId(2)));
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&LockKey::Room(RoomId(2))));
        assert!(keys.contains(&LockKey::Student(StudentId(1))));
    }

    #[test]
    fn test_student_keys_covers_both_rooms_on_transfer() {
        let keys = student_keys(StudentId(1), Some(RoomId(2)), Some(RoomId(3)));
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_ids_continue_after_seeded_store() {
        let engine = AllocationEngine::<MemoryStore>::assemble(
            MemoryStore::new(),
            EngineConfig::default(),
            (10, 4),
        );
        assert_eq!(engine.next_room_id(), RoomId(11));
        assert_eq!(engine.next_student_id(), StudentId(5));
        assert_eq!(engine.next_student_id(), StudentId(6));
    }
}
