//! Core domain types
//!
//! These types represent the entities the client negotiates about: the
//! projects it is attached to and the work descriptors a scheduler grants.

pub mod project;
pub mod reply;
pub mod work;
