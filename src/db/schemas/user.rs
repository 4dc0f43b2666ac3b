//! User document schema
//!
//! Stores portal user credentials and the permission level used for
//! authorization decisions.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::PermissionLevel;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// User identifier (email or username)
    pub identifier: String,

    /// Type of identifier (email, username, etc.)
    #[serde(default = "default_identifier_type")]
    pub identifier_type: String,

    /// Name shown in creator annotations
    #[serde(default)]
    pub display_name: String,

    /// Argon2 password hash
    pub password_hash: String,

    /// Permission level for authorization checks
    #[serde(default)]
    pub permission_level: PermissionLevel,

    /// Token version for invalidation (increment to invalidate all tokens)
    #[serde(default)]
    pub token_version: i32,

    /// Whether the user account is active
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_identifier_type() -> String {
    "email".to_string()
}

fn default_true() -> bool {
    true
}

impl UserDoc {
    /// Create a new user document
    pub fn new(
        identifier: String,
        identifier_type: String,
        display_name: String,
        password_hash: String,
        permission_level: PermissionLevel,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            identifier,
            identifier_type,
            display_name,
            password_hash,
            permission_level,
            token_version: 1,
            is_active: true,
        }
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "identifier": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("identifier_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_defaults() {
        let user = UserDoc::new(
            "teacher@example.edu".into(),
            "email".into(),
            "Teacher".into(),
            "$argon2id$...".into(),
            PermissionLevel::Authenticated,
        );

        assert!(user.is_active);
        assert_eq!(user.token_version, 1);
        assert_eq!(user.permission_level, PermissionLevel::Authenticated);
    }

    #[test]
    fn test_deserialize_defaults() {
        // Documents written before the display_name field existed
        let json = r#"{
            "identifier": "a@b.c",
            "password_hash": "x"
        }"#;
        let user: UserDoc = serde_json::from_str(json).unwrap();
        assert_eq!(user.identifier_type, "email");
        assert_eq!(user.permission_level, PermissionLevel::Public);
        assert!(user.is_active);
    }
}
