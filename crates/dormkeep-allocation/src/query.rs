//! Read projections over the store.
//!
//! Each query runs inside a single [`Store::read`], so a listing never
//! mixes records from before and after a commit.

use dormkeep_protocol::{RoomId, RoomStats, RoomView, StudentId, StudentStats, StudentView};

use crate::{AllocationEngine, AllocationError, Entity, Snapshot, Store};

impl<S: Store> AllocationEngine<S> {
    /// Every room with its occupants, in id order.
    pub fn list_rooms(&self) -> Result<Vec<RoomView>, AllocationError> {
        let rooms = self.store.read(|s| {
            s.rooms
                .keys()
                .filter_map(|id| s.room_view(*id))
                .collect()
        })?;
        Ok(rooms)
    }

    /// Every student with their room summary, in id order.
    pub fn list_students(&self) -> Result<Vec<StudentView>, AllocationError> {
        let students = self.store.read(|s| {
            s.students
                .keys()
                .filter_map(|id| s.student_view(*id))
                .collect()
        })?;
        Ok(students)
    }

    pub fn room(&self, room_id: RoomId) -> Result<RoomView, AllocationError> {
        self.store
            .read(|s| s.room_view(room_id))?
            .ok_or(AllocationError::NotFound(Entity::Room(room_id)))
    }

    pub fn student(&self, student_id: StudentId) -> Result<StudentView, AllocationError> {
        self.store
            .read(|s| s.student_view(student_id))?
            .ok_or(AllocationError::NotFound(Entity::Student(student_id)))
    }

    /// Total, occupied (at least one occupant), and available rooms.
    pub fn room_stats(&self) -> Result<RoomStats, AllocationError> {
        Ok(self.store.read(Snapshot::room_stats)?)
    }

    /// Total, allocated, and unallocated students.
    pub fn student_stats(&self) -> Result<StudentStats, AllocationError> {
        Ok(self.store.read(Snapshot::student_stats)?)
    }

    /// A full copy of the records, e.g. for [`Snapshot::violations`].
    pub fn snapshot(&self) -> Result<Snapshot, AllocationError> {
        Ok(self.store.snapshot()?)
    }
}

#[cfg(test)]
mod tests {
    use dormkeep_protocol::{NewRoom, RoomKind, StudentProfile};

    use crate::{EngineConfig, MemoryStore};

    use super::*;

    fn engine() -> AllocationEngine<MemoryStore> {
        AllocationEngine::new(EngineConfig::default())
    }

    fn new_room(number: &str, capacity: u32) -> NewRoom {
        NewRoom {
            room_number: number.into(),
            kind: RoomKind::Double,
            capacity,
            price: 250.0,
        }
    }

    fn profile(email: &str) -> StudentProfile {
        StudentProfile {
            name: "Ada".into(),
            email: email.into(),
            course: "Maths".into(),
            year: 2,
        }
    }

    #[tokio::test]
    async fn test_listings_resolve_both_sides_of_the_link() {
        let engine = engine();
        let room = engine.create_room(new_room("101", 2)).await.unwrap();
        let housed = engine
            .create_student(profile("ada@uni.test"), Some(room.id))
            .await
            .unwrap();
        engine.create_student(profile("bob@uni.test"), None).await.unwrap();

        let rooms = engine.list_rooms().unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].occupants.len(), 1);
        assert_eq!(rooms[0].occupants[0].id, housed.id);

        let students = engine.list_students().unwrap();
        assert_eq!(students.len(), 2);
        let summary = students[0].room.as_ref().unwrap();
        assert_eq!(summary.room_number, "101");
        assert_eq!(summary.occupancy, 1);
        assert!(students[1].room.is_none());
    }

    #[tokio::test]
    async fn test_missing_records_are_not_found() {
        let engine = engine();
        assert!(matches!(
            engine.room(RoomId(7)),
            Err(AllocationError::NotFound(Entity::Room(RoomId(7))))
        ));
        assert!(matches!(
            engine.student(StudentId(7)),
            Err(AllocationError::NotFound(Entity::Student(StudentId(7))))
        ));
    }

    #[tokio::test]
    async fn test_stats_on_empty_engine_are_zero() {
        let engine = engine();
        let rooms = engine.room_stats().unwrap();
        assert_eq!((rooms.total_rooms, rooms.occupied_rooms, rooms.available_rooms), (0, 0, 0));
        let students = engine.student_stats().unwrap();
        assert_eq!(students.total_students, 0);
    }
}
