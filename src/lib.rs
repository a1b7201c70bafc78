//! File upload and display service backed by local disk or an
//! S3-compatible object store.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod policy;
pub mod routes;
pub mod services;
