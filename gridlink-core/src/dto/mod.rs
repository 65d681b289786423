//! Data Transfer Objects sent to scheduling servers

pub mod request;
