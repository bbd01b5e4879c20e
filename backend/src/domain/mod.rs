//! # Domain Module
//!
//! Business logic of the attendance tracker: the data store service that
//! owns every mutation over groups, students and attendance, and the
//! avatar/summary boundary to the generative provider.

pub mod avatar_service;
pub mod data_service;

pub use avatar_service::{avatar_seed, AvatarGenerator, PlaceholderAvatars, PLACEHOLDER_HOST};
pub use data_service::DataService;
