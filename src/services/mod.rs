//! Storage clients and the service that coordinates them.

pub mod image_service;
pub mod local_store;
#[cfg(test)]
pub mod memory_store;
pub mod metadata_store;
pub mod object_store;
pub mod s3_store;
