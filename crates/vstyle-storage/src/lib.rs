//! Object store backends.
//!
//! This crate provides:
//! - The `ObjectStore` trait used by every pipeline stage
//! - An S3-compatible client (`S3Store`)
//! - A mounted-directory store (`LocalStore`)
//! - An in-process store for tests and dry runs (`MemoryStore`)
//! - Frame listing and namespace cleanup helpers

pub mod config;
pub mod error;
pub mod local;
pub mod memory;
pub mod operations;
pub mod s3;
pub mod store;

pub use config::{connect, StorageBackend, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use operations::{content_type_for, delete_prefix, list_frame_names};
pub use s3::{S3Config, S3Store};
pub use store::{ObjectInfo, ObjectStore};
