//! Core data models for the image upload service.
//!
//! Records serialize as camelCase JSON for the HTTP surface and the
//! JSON Lines metadata file, and map to SQLite rows via `sqlx::FromRow`.

pub mod record;
