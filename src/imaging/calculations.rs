//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use super::backend::Dimensions;

/// Output size for a width-constrained resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    pub width: u32,
    pub height: u32,
    /// The target was at least as wide as the source, so the source size is kept.
    pub upscale_avoided: bool,
}

/// Scale `source` to `target_width`, keeping the aspect ratio, never enlarging.
///
/// # Examples
/// ```
/// # use srcsetter::imaging::{Dimensions, plan_resize};
/// let plan = plan_resize(Dimensions { width: 2000, height: 1000 }, 437);
/// assert_eq!((plan.width, plan.height), (437, 219));
///
/// let small = plan_resize(Dimensions { width: 300, height: 200 }, 437);
/// assert_eq!((small.width, small.height), (300, 200));
/// assert!(small.upscale_avoided);
/// ```
pub fn plan_resize(source: Dimensions, target_width: u32) -> ResizePlan {
    if target_width >= source.width || source.width == 0 {
        return ResizePlan {
            width: source.width,
            height: source.height,
            upscale_avoided: true,
        };
    }
    let height = (source.height as f64 * target_width as f64 / source.width as f64).round() as u32;
    ResizePlan {
        width: target_width,
        height: height.max(1),
        upscale_avoided: false,
    }
}
