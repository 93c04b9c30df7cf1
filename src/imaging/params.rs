//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how*. They sit between
//! [`operations`](super::operations), which decides sizes, and the
//! [`backend`](super::backend), which does the pixel work, so tests can swap
//! in a recording backend without touching the sizing logic.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lossy encoding quality (1-100). Clamped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

/// The whole site was tuned at quality 65.
impl Default for Quality {
    fn default() -> Self {
        Self(65)
    }
}

impl From<u32> for Quality {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Quality> for u32 {
    fn from(q: Quality) -> Self {
        q.0
    }
}

/// Decode `source`, scale to exactly `width`x`height`, encode WebP to `output`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub quality: Quality,
}
