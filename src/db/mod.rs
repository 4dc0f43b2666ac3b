//! Database layer for Lectern

pub mod mongo;
pub mod schemas;
pub mod users;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, MutMetadata};
pub use users::UserStore;
