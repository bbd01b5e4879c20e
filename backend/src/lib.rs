//! # Asistencia Pro — data layer
//!
//! Everything below the UI of a single-page attendance tracker for
//! teachers: manage groups of students, mark daily attendance, and keep
//! the data in sync with a backing document store.
//!
//! ## Architecture
//!
//! ```text
//! UI layer (out of scope)
//!     ↓
//! Domain layer  — DataService, avatar/summary boundary
//!     ↓
//! Storage layer — DocumentStore trait; synchronized or local backend
//! ```
//!
//! The auth gate sits beside the domain layer: no data operation runs
//! without an established identity, and the in-memory view is driven
//! exclusively by the store's snapshot subscriptions.

pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod storage;

pub use auth::{AuthService, AuthUser, Credentials, FileIdentityProvider, IdentityProvider, IdentityState};
pub use config::SyncConfig;
pub use domain::{AvatarGenerator, DataService, PlaceholderAvatars};
pub use errors::DataError;
pub use storage::{DocumentStore, LocalStore, MemoryStore, StoreError};
