//! Gridlink Core
//!
//! Core types shared by the Gridlink volunteer computing client.
//!
//! This crate contains:
//! - Domain types: projects and the records a scheduler hands back
//! - DTOs: the request document sent to a scheduling server

pub mod de;
pub mod domain;
pub mod dto;
