//! Input normalisation and validation.
//!
//! Runs before any lock is taken. Everything here is pure: it looks only
//! at the input, never at stored state (uniqueness is checked under lock
//! by the engine).

use dormkeep_protocol::{NewRoom, RoomPatch, StudentPatch, StudentProfile};

use crate::AllocationError;

/// Valid years of study.
pub(crate) const YEARS: std::ops::RangeInclusive<u8> = 1..=4;

fn invalid(msg: impl Into<String>) -> AllocationError {
    AllocationError::Validation(msg.into())
}

fn required(field: &str, value: &str) -> Result<String, AllocationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn room_number(value: &str) -> Result<String, AllocationError> {
    required("room_number", value)
}

pub(crate) fn capacity(value: u32) -> Result<u32, AllocationError> {
    if value == 0 {
        return Err(invalid("capacity must be at least 1"));
    }
    Ok(value)
}

pub(crate) fn price(value: f64) -> Result<f64, AllocationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(format!("price must be a non-negative number, got {value}")));
    }
    Ok(value)
}

/// Trimmed and lower-cased; must look like an address.
pub(crate) fn email(value: &str) -> Result<String, AllocationError> {
    let email = required("email", value)?.to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(invalid(format!("email {email:?} is not an address"))),
    }
}

pub(crate) fn year(value: u8) -> Result<u8, AllocationError> {
    if !YEARS.contains(&value) {
        return Err(invalid(format!(
            "year must be between {} and {}, got {value}",
            YEARS.start(),
            YEARS.end()
        )));
    }
    Ok(value)
}

pub(crate) fn new_room(room: NewRoom) -> Result<NewRoom, AllocationError> {
    Ok(NewRoom {
        room_number: room_number(&room.room_number)?,
        kind: room.kind,
        capacity: capacity(room.capacity)?,
        price: price(room.price)?,
    })
}

pub(crate) fn room_patch(patch: RoomPatch) -> Result<RoomPatch, AllocationError> {
    Ok(RoomPatch {
        kind: patch.kind,
        capacity: patch.capacity.map(capacity).transpose()?,
        price: patch.price.map(price).transpose()?,
    })
}

pub(crate) fn profile(profile: StudentProfile) -> Result<StudentProfile, AllocationError> {
    Ok(StudentProfile {
        name: required("name", &profile.name)?,
        email: email(&profile.email)?,
        course: required("course", &profile.course)?,
        year: year(profile.year)?,
    })
}

pub(crate) fn student_patch(patch: StudentPatch) -> Result<StudentPatch, AllocationError> {
    Ok(StudentPatch {
        name: patch.name.as_deref().map(|n| required("name", n)).transpose()?,
        email: patch.email.as_deref().map(email).transpose()?,
        course: patch.course.as_deref().map(|c| required("course", c)).transpose()?,
        year: patch.year.map(year).transpose()?,
    })
}
