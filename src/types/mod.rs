//! Shared types for Lectern

pub mod error;

pub use error::{LecternError, Result};
