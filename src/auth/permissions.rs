//! Roles and the minimum role per gateway operation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session roles, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Role {
    #[default]
    Student = 0,
    Teacher = 1,
    Admin = 2,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Student => write!(f, "STUDENT"),
            Role::Teacher => write!(f, "TEACHER"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Minimum role for a gateway operation. Unknown operations get `None`
/// and are blocked.
pub fn required_role(operation: &str) -> Option<Role> {
    match operation {
        "verify" => Some(Role::Student),

        "submit" | "create_grade" | "read_grade" | "attest_grade" | "verify_grade"
        | "edit_score" => {
            Some(Role::Teacher)
        }

        "status" | "reload" | "audit" | "confirmations" => Some(Role::Admin),

        _ => None,
    }
}

pub fn is_operation_allowed(operation: &str, role: Role) -> bool {
    match required_role(operation) {
        Some(required) => role >= required,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Admin > Role::Teacher);
        assert!(Role::Teacher > Role::Student);
    }

    #[test]
    fn test_operation_matrix() {
        assert!(is_operation_allowed("verify", Role::Student));
        assert!(!is_operation_allowed("submit", Role::Student));
        assert!(is_operation_allowed("submit", Role::Teacher));
        assert!(!is_operation_allowed("reload", Role::Teacher));
        assert!(is_operation_allowed("reload", Role::Admin));
        assert!(!is_operation_allowed("drop_database", Role::Admin));
    }
}
