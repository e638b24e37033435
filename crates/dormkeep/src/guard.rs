//! Role-based access guard.
//!
//! Runs after the handshake and before the engine: a denied request never
//! reaches an allocation operation.

use dormkeep_protocol::{Caller, Request, Role};
use serde::{Deserialize, Serialize};

/// Who may change rooms and students.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum AccessPolicy {
    /// Mutations need [`Role::Admin`]; reads are open to any caller.
    #[default]
    AdminWrites,
    /// Any authenticated caller may mutate.
    Open,
}

/// A request the caller's role doesn't permit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{role} may not {operation}")]
pub struct Forbidden {
    pub role: Role,
    pub operation: &'static str,
}

impl AccessPolicy {
    pub fn authorize(self, caller: &Caller, request: &Request) -> Result<(), Forbidden> {
        let allowed = match self {
            Self::Open => true,
            Self::AdminWrites => !request.is_mutation() || caller.role == Role::Admin,
        };
        if allowed {
            Ok(())
        } else {
            Err(Forbidden {
                role: caller.role,
                operation: request.name(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use dormkeep_protocol::{RoomId, StudentId};

    use super::*;

    fn allocate() -> Request {
        Request::Allocate { student_id: StudentId(1), room_id: RoomId(1) }
    }

    #[test]
    fn test_admin_writes_blocks_student_mutations() {
        let denied = AccessPolicy::AdminWrites
            .authorize(&Caller::student("ada"), &allocate())
            .unwrap_err();
        assert_eq!(denied.operation, "allocate");
        assert_eq!(denied.to_string(), "student may not allocate");
    }

    #[test]
    fn test_admin_writes_allows_reads_for_everyone() {
        let policy = AccessPolicy::AdminWrites;
        assert!(policy.authorize(&Caller::student("ada"), &Request::ListRooms).is_ok());
        assert!(policy.authorize(&Caller::student("ada"), &Request::RoomStats).is_ok());
        assert!(policy.authorize(&Caller::admin("warden"), &allocate()).is_ok());
    }

    #[test]
    fn test_open_policy_allows_any_caller() {
        assert!(AccessPolicy::Open.authorize(&Caller::student("ada"), &allocate()).is_ok());
    }

    #[test]
    fn test_policy_names_on_the_command_line() {
        use clap::ValueEnum;
        let names: Vec<_> = AccessPolicy::value_variants()
            .iter()
            .filter_map(|p| p.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        assert_eq!(names, ["admin-writes", "open"]);
    }
}
