//! FFmpeg CLI wrapper and frame transformers.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation and timeouts via tokio
//! - The `MediaCodec` split/mux service
//! - The `FrameTransformer` trait with built-in image styles and an external command

pub mod codec;
pub mod command;
pub mod error;
pub mod progress;
pub mod transform;

pub use codec::{FfmpegCodec, MediaCodec};
pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use progress::FfmpegProgress;
pub use transform::{CommandTransformer, FrameTransformer, ImageStyleTransformer, Style};
