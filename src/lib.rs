//! Lectern - educational portal gateway
//!
//! REST backend for a multi-tenant educational portal. The core is a
//! generic tabular information workflow: administrators publish tables
//! of rows, each table carries a permission mode (view-only, editable,
//! edit-with-proof), and edits either apply directly or queue as change
//! requests for administrator review. Tables export as CSV.
//!
//! ## Services
//!
//! - **Tables**: table definitions, rows, CSV export
//! - **Workflow**: permission-mode edit routing and change-request review
//! - **Auth**: JWT login over argon2-hashed credentials
//! - **Notify**: table publication broadcasts to a webhook relay

pub mod auth;
pub mod config;
pub mod csv;
pub mod db;
pub mod notify;
pub mod routes;
pub mod server;
pub mod types;
pub mod workflow;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{LecternError, Result};
