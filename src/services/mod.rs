//! Storage backends and the facade in front of them.

pub mod file_id;
pub mod local_storage;
pub mod object_client;
pub mod remote_storage;
pub mod s3_client;
pub mod storage_service;
