//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait has the two operations the pipeline needs:
//! `identify` (read dimensions) and `resize` (decode, scale, encode WebP).
//! The production implementation is [`RustBackend`](super::rust_backend::RustBackend).

use super::params::ResizeParams;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
pub trait ImageBackend {
    /// Get image dimensions without a full decode where the format allows it.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Decode, scale and write a WebP file.
    fn resize(&self, params: &ResizeParams) -> Result<(), BackendError>;
}
