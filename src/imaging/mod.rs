//! Image processing: identify, resize, encode lossy WebP.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` |
//! | **Resize** | Lanczos3, never enlarging |
//! | **Encode** | `webp` (libwebp, lossy) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{ResizePlan, plan_resize};
pub use operations::{EncodedImage, encode_scaled, get_dimensions};
pub use params::{Quality, ResizeParams};
pub use rust_backend::RustBackend;
