//! Core data models for the file storage service.
//!
//! These are plain value types shared by both storage backends and the HTTP
//! layer. None of them hold shared mutable state.

pub mod bucket;
pub mod file_metadata;
