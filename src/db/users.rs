//! User credential store
//!
//! MongoDB in production; an in-memory map in dev mode so the portal
//! runs without a database. Both enforce identifier uniqueness.

use bson::{doc, oid::ObjectId, DateTime};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::db::mongo::MongoCollection;
use crate::db::schemas::UserDoc;
use crate::types::{LecternError, Result};

pub enum UserStore {
    Mongo(MongoCollection<UserDoc>),
    Memory(RwLock<HashMap<ObjectId, UserDoc>>),
}

impl UserStore {
    pub fn memory() -> Self {
        UserStore::Memory(RwLock::new(HashMap::new()))
    }

    /// Insert a new user. Fails with Conflict when the identifier is
    /// already taken.
    pub async fn insert(&self, user: UserDoc) -> Result<ObjectId> {
        match self {
            UserStore::Mongo(collection) => {
                // The unique index on identifier rejects duplicates
                if collection
                    .find_one(doc! { "identifier": &user.identifier })
                    .await?
                    .is_some()
                {
                    return Err(LecternError::Conflict("identifier already registered".into()));
                }
                collection.insert_one(user).await
            }
            UserStore::Memory(map) => {
                let mut map = map.write().await;
                if map.values().any(|u| u.identifier == user.identifier) {
                    return Err(LecternError::Conflict("identifier already registered".into()));
                }
                let id = ObjectId::new();
                let mut user = user;
                user._id = Some(id);
                user.metadata.created_at = Some(DateTime::now());
                user.metadata.updated_at = Some(DateTime::now());
                map.insert(id, user);
                Ok(id)
            }
        }
    }

    pub async fn find_by_identifier(&self, identifier: &str) -> Result<Option<UserDoc>> {
        match self {
            UserStore::Mongo(collection) => {
                collection.find_one(doc! { "identifier": identifier }).await
            }
            UserStore::Memory(map) => {
                let map = map.read().await;
                Ok(map
                    .values()
                    .find(|u| u.identifier == identifier && !u.metadata.is_deleted)
                    .cloned())
            }
        }
    }

    pub async fn find_by_id(&self, id: ObjectId) -> Result<Option<UserDoc>> {
        match self {
            UserStore::Mongo(collection) => collection.find_one(doc! { "_id": id }).await,
            UserStore::Memory(map) => {
                let map = map.read().await;
                Ok(map.get(&id).filter(|u| !u.metadata.is_deleted).cloned())
            }
        }
    }

    /// Whether any user exists. The first registered account is granted
    /// admin so a fresh deployment can bootstrap itself.
    pub async fn is_empty(&self) -> Result<bool> {
        match self {
            UserStore::Mongo(collection) => {
                let count = collection
                    .inner()
                    .count_documents(doc! { "metadata.is_deleted": { "$ne": true } })
                    .await
                    .map_err(|e| LecternError::Database(format!("Count failed: {}", e)))?;
                Ok(count == 0)
            }
            UserStore::Memory(map) => {
                let map = map.read().await;
                Ok(!map.values().any(|u| !u.metadata.is_deleted))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PermissionLevel;

    fn user(identifier: &str) -> UserDoc {
        UserDoc::new(
            identifier.into(),
            "email".into(),
            "Test".into(),
            "$argon2id$...".into(),
            PermissionLevel::Authenticated,
        )
    }

    #[tokio::test]
    async fn test_memory_store_unique_identifier() {
        let store = UserStore::memory();
        assert!(store.is_empty().await.unwrap());

        let id = store.insert(user("a@example.edu")).await.unwrap();
        assert!(!store.is_empty().await.unwrap());

        let found = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.identifier, "a@example.edu");

        let duplicate = store.insert(user("a@example.edu")).await;
        assert!(matches!(duplicate, Err(LecternError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_memory_store_find_by_identifier() {
        let store = UserStore::memory();
        store.insert(user("a@example.edu")).await.unwrap();

        assert!(store
            .find_by_identifier("a@example.edu")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_identifier("missing@example.edu")
            .await
            .unwrap()
            .is_none());
    }
}
