//! # Storage Module
//!
//! Persistence for groups and attendance records behind the
//! [`DocumentStore`] abstraction, so the domain layer never depends on a
//! concrete backend:
//!
//! - [`MemoryStore`] — versioned in-memory documents with real
//!   multi-writer semantics, standing in for the hosted synchronized store.
//! - [`LocalStore`] — one serialized JSON blob per owner for devices
//!   without a remote store.

pub mod local;
pub mod memory;
pub mod traits;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use traits::{
    AttendanceKey, AttendanceReceiver, DocumentStore, GroupSnapshot, GroupsReceiver, StoreError,
    WriteOutcome, MAX_IN_QUERY_IDS,
};
