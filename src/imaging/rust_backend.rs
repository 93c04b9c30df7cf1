//! Pure Rust decode/resize with libwebp for the lossy encode.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, WebP) | `image` crate decoders |
//! | Identify | `image::image_dimensions` (header only) |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode → WebP | `webp::Encoder` (lossy) |
//!
//! The `image` crate's own WebP encoder is lossless only, which makes
//! variants larger than the photographs they were cut from.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::params::ResizeParams;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::path::Path;

/// Backend using the `image` crate for pixels and `webp` for encoding.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)
        .map_err(BackendError::Io)?
        .with_guessed_format()
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

/// Encode as lossy WebP and write to `path`.
fn save_webp(img: &DynamicImage, path: &Path, quality: u32) -> Result<(), BackendError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if ext != "webp" {
        return Err(BackendError::ProcessingFailed(format!(
            "Unsupported output format: {ext}"
        )));
    }

    let rgba = img.to_rgba8();
    let encoded = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
        .encode_simple(false, quality as f32)
        .map_err(|e| BackendError::ProcessingFailed(format!("WebP encode failed: {e:?}")))?;
    std::fs::write(path, &*encoded)?;
    Ok(())
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        if !path.exists() {
            return Err(BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )));
        }
        let (width, height) = image::image_dimensions(path).map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to read dimensions: {}", e))
        })?;
        Ok(Dimensions { width, height })
    }

    fn resize(&self, params: &ResizeParams) -> Result<(), BackendError> {
        let img = load_image(&params.source)?;
        let resized = if img.width() == params.width && img.height() == params.height {
            img
        } else {
            img.resize_exact(params.width, params.height, FilterType::Lanczos3)
        };
        save_webp(&resized, &params.output, params.quality.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Quality;

    /// Create a small valid JPEG file with the given dimensions.
    fn create_test_jpeg(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn identify_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        create_test_jpeg(&path, 200, 150);

        let backend = RustBackend::new();
        let dims = backend.identify(&path).unwrap();
        assert_eq!(dims.width, 200);
        assert_eq!(dims.height, 150);
    }

    #[test]
    fn identify_nonexistent_file_errors() {
        let backend = RustBackend::new();
        let result = backend.identify(Path::new("/nonexistent/image.jpg"));
        assert!(matches!(result, Err(BackendError::Io(_))));
    }

    #[test]
    fn resize_synthetic_to_webp() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 400, 300);

        let output = tmp.path().join("resized.webp");
        let backend = RustBackend::new();
        backend
            .resize(&ResizeParams {
                source,
                output: output.clone(),
                width: 200,
                height: 150,
                quality: Quality::new(65),
            })
            .unwrap();

        let dims = backend.identify(&output).unwrap();
        assert_eq!(dims, Dimensions { width: 200, height: 150 });
    }

    #[test]
    fn reencode_is_deterministic() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.png");
        image::RgbImage::from_pixel(64, 48, image::Rgb([10, 120, 200]))
            .save(&source)
            .unwrap();

        let backend = RustBackend::new();
        let encode = |name: &str| {
            let output = tmp.path().join(name);
            backend
                .resize(&ResizeParams {
                    source: source.clone(),
                    output: output.clone(),
                    width: 32,
                    height: 24,
                    quality: Quality::default(),
                })
                .unwrap();
            std::fs::read(output).unwrap()
        };
        assert_eq!(encode("a.webp"), encode("b.webp"));
    }

    #[test]
    fn resize_unsupported_format_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 100, 100);

        let backend = RustBackend::new();
        let result = backend.resize(&ResizeParams {
            source,
            output: tmp.path().join("output.avif"),
            width: 50,
            height: 50,
            quality: Quality::default(),
        });
        assert!(matches!(result, Err(BackendError::ProcessingFailed(_))));
    }

    #[test]
    fn decode_garbage_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("broken.jpg");
        std::fs::write(&source, b"not an image").unwrap();

        let backend = RustBackend::new();
        let result = backend.resize(&ResizeParams {
            source,
            output: tmp.path().join("out.webp"),
            width: 10,
            height: 10,
            quality: Quality::default(),
        });
        assert!(result.is_err());
    }
}
