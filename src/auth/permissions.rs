//! Permission levels and the operation requirement table
//!
//! Every mutating route names its operation here; unknown operations are
//! blocked rather than defaulting open.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Permission levels for portal operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
#[derive(Default)]
pub enum PermissionLevel {
    /// No authentication - public reads only
    #[default]
    Public = 0,
    /// Authenticated user - row edits and table reads
    Authenticated = 1,
    /// Admin - table management and change-request review
    Admin = 2,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::Public => write!(f, "PUBLIC"),
            PermissionLevel::Authenticated => write!(f, "AUTHENTICATED"),
            PermissionLevel::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Get the required permission level for a portal operation.
/// Returns None for unknown operations (which should be blocked).
pub fn get_required_permission(operation: &str) -> Option<PermissionLevel> {
    match operation {
        // Public - unauthenticated probes
        "health_check" | "version_info" => Some(PermissionLevel::Public),

        // Authenticated - portal reads and row edits
        "table_list"
        | "table_rows"
        | "table_export"
        | "row_edit" => Some(PermissionLevel::Authenticated),

        // Admin - table management and review
        "table_create"
        | "table_update"
        | "table_delete"
        | "row_delete"
        | "change_request_list"
        | "change_request_review" => Some(PermissionLevel::Admin),

        // Unknown operations are blocked
        _ => None,
    }
}

/// Check if an operation is allowed for the given permission level
pub fn is_operation_allowed(operation: &str, level: PermissionLevel) -> bool {
    match get_required_permission(operation) {
        Some(required) => level >= required,
        None => false, // Unknown operations are blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_operations() {
        assert!(is_operation_allowed("health_check", PermissionLevel::Public));
        assert!(is_operation_allowed(
            "health_check",
            PermissionLevel::Authenticated
        ));
        assert!(is_operation_allowed("health_check", PermissionLevel::Admin));
    }

    #[test]
    fn test_authenticated_operations() {
        assert!(!is_operation_allowed("row_edit", PermissionLevel::Public));
        assert!(is_operation_allowed(
            "row_edit",
            PermissionLevel::Authenticated
        ));
        assert!(is_operation_allowed("row_edit", PermissionLevel::Admin));
    }

    #[test]
    fn test_admin_operations() {
        assert!(!is_operation_allowed(
            "change_request_review",
            PermissionLevel::Public
        ));
        assert!(!is_operation_allowed(
            "change_request_review",
            PermissionLevel::Authenticated
        ));
        assert!(is_operation_allowed(
            "change_request_review",
            PermissionLevel::Admin
        ));
    }

    #[test]
    fn test_unknown_operations_blocked() {
        assert!(!is_operation_allowed("unknown_operation", PermissionLevel::Admin));
        assert!(!is_operation_allowed("drop_all_tables", PermissionLevel::Admin));
    }

    #[test]
    fn test_permission_ordering() {
        assert!(PermissionLevel::Admin > PermissionLevel::Authenticated);
        assert!(PermissionLevel::Authenticated > PermissionLevel::Public);
    }
}
