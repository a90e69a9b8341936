//! Shared data models for the vstyle frame pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Video submissions and their per-video storage namespace
//! - Frame jobs (the queue message body)
//! - The storage layout and frame naming scheme

pub mod error;
pub mod frame;
pub mod layout;
pub mod video;

pub use error::{ModelError, ModelResult};
pub use frame::FrameJob;
pub use layout::{key_basename, StorageLayout};
pub use video::{VideoId, VideoJob};
