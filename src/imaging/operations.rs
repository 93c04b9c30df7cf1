//! High-level image operations.
//!
//! These functions combine calculations with backend execution.
//! They take a target width, compute parameters, and call the backend.

use super::backend::{BackendError, ImageBackend};
use super::calculations::plan_resize;
use super::params::{Quality, ResizeParams};
use std::path::Path;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Get image dimensions using the backend.
pub fn get_dimensions(backend: &impl ImageBackend, path: &Path) -> Result<(u32, u32)> {
    let dims = backend.identify(path)?;
    Ok((dims.width, dims.height))
}

/// A WebP file written by [`encode_scaled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedImage {
    pub width: u32,
    pub height: u32,
    /// The source was not wider than the target, so it was re-encoded at its own size.
    pub upscale_avoided: bool,
}

/// Write `source` to `output` as WebP, scaled down to `target_width` if wider.
pub fn encode_scaled(
    backend: &impl ImageBackend,
    source: &Path,
    output: &Path,
    target_width: u32,
    quality: Quality,
) -> Result<EncodedImage> {
    let source_dims = backend.identify(source)?;
    let plan = plan_resize(source_dims, target_width);
    backend.resize(&ResizeParams {
        source: source.to_path_buf(),
        output: output.to_path_buf(),
        width: plan.width,
        height: plan.height,
        quality,
    })?;
    Ok(EncodedImage {
        width: plan.width,
        height: plan.height,
        upscale_avoided: plan.upscale_avoided,
    })
}
