//! Variant generator: makes the files a profile's `srcset` points at.
//!
//! All paths are relative to the uploads root. A variant is "present" when its
//! conventional file exists; nothing else is recorded.
//!
//! Role policy:
//!
//! | Role | WebP source | JPEG/PNG source |
//! |---|---|---|
//! | base | the asset itself, left alone | `{base}.webp` re-encoded every run |
//! | desktop/mobile/custom | created once from the asset | created once from the asset |
//!
//! Every write goes through a transient sibling that is renamed into place,
//! so an interrupted encode never leaves a truncated variant that later runs
//! would mistake for a finished one.

use crate::imaging::{BackendError, ImageBackend, Quality, encode_scaled};
use crate::naming::{AssetPath, COMPRESSED_SUFFIX, TEMP_SUFFIX};
use crate::profile::{Profile, Role};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("asset not found: {0}")]
    AssetNotFound(String),
    #[error("encode failed for {path}: {reason}")]
    EncodeFailure { path: String, reason: String },
    #[error("profile '{profile}' has no {role} candidate")]
    MissingRole { profile: String, role: Role },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What `ensure_variant` did with the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantStatus {
    /// The file did not exist and was written.
    Created,
    /// The file existed and was written again.
    Regenerated,
    /// The file existed (or is the asset itself) and was not touched.
    Skipped,
}

impl VariantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VariantStatus::Created => "created",
            VariantStatus::Regenerated => "regenerated",
            VariantStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantResult {
    /// Target path relative to the uploads root.
    pub path: String,
    pub role: Role,
    pub status: VariantStatus,
    /// Encoded width, `None` when nothing was encoded.
    pub width: Option<u32>,
    pub upscale_avoided: bool,
    /// Size of the target after the call, if it exists.
    pub bytes: Option<u64>,
}

impl VariantResult {
    pub fn created(&self) -> bool {
        self.status == VariantStatus::Created
    }

    /// Whether the call wrote (or in a dry run, would write) the target.
    pub fn written(&self) -> bool {
        self.status != VariantStatus::Skipped
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecompressResult {
    pub path: String,
    pub before: u64,
    pub after: u64,
    pub saved: u64,
    pub replaced: bool,
}

/// Removes a transient working file when dropped, unless it was renamed away.
struct TransientFile(PathBuf);

impl Drop for TransientFile {
    fn drop(&mut self) {
        if !self.0.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.0) {
            warn!(path = %self.0.display(), error = %e, "could not remove transient file");
        }
    }
}

/// Generates variants under one uploads root.
pub struct VariantGenerator<'a, B: ImageBackend> {
    backend: &'a B,
    uploads: PathBuf,
    quality: Quality,
    force: bool,
    dry_run: bool,
}

impl<'a, B: ImageBackend> VariantGenerator<'a, B> {
    pub fn new(backend: &'a B, uploads: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            uploads: uploads.into(),
            quality: Quality::default(),
            force: false,
            dry_run: false,
        }
    }

    /// Quality used by profiles without an override.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Rewrite cache-once variants even if present.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Decide everything, write nothing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn uploads(&self) -> &Path {
        &self.uploads
    }

    fn abs(&self, relative: &str) -> PathBuf {
        self.uploads.join(relative)
    }

    fn source_of(&self, asset: &AssetPath) -> Result<PathBuf, GenerateError> {
        let source = self.abs(&asset.relative());
        if !source.is_file() {
            return Err(GenerateError::AssetNotFound(asset.relative()));
        }
        if !asset.is_webp() && !asset.is_legacy_raster() {
            return Err(GenerateError::EncodeFailure {
                path: asset.relative(),
                reason: format!("unsupported source format '.{}'", asset.ext),
            });
        }
        Ok(source)
    }

    /// Make sure the file for `role` exists, following the role policy.
    pub fn ensure_variant(
        &self,
        asset: &AssetPath,
        profile: &Profile,
        role: Role,
    ) -> Result<VariantResult, GenerateError> {
        let candidate = profile.get(role).ok_or_else(|| GenerateError::MissingRole {
            profile: profile.name.clone(),
            role,
        })?;
        let source = self.source_of(asset)?;
        let target_rel = asset.derive(&candidate.template);
        let target = self.abs(&target_rel);
        let existed = target.is_file();

        let skip = if role == Role::Base {
            asset.is_webp()
        } else {
            existed && !self.force
        };
        if skip {
            debug!(path = %target_rel, role = %role, "variant present, skipping");
            return Ok(VariantResult {
                path: target_rel,
                role,
                status: VariantStatus::Skipped,
                width: None,
                upscale_avoided: false,
                bytes: file_len(&target),
            });
        }

        let status = if existed {
            VariantStatus::Regenerated
        } else {
            VariantStatus::Created
        };
        if self.dry_run {
            info!(path = %target_rel, status = status.as_str(), "dry run, not writing");
            return Ok(VariantResult {
                path: target_rel,
                role,
                status,
                width: Some(candidate.width),
                upscale_avoided: false,
                bytes: file_len(&target),
            });
        }

        let quality = profile.quality.unwrap_or(self.quality);
        let transient = TransientFile(self.abs(&asset.transient(TEMP_SUFFIX)));
        let encoded = encode_scaled(self.backend, &source, &transient.0, candidate.width, quality)
            .map_err(|e| encode_failure(&asset.relative(), e))?;
        std::fs::rename(&transient.0, &target)?;

        if encoded.upscale_avoided {
            debug!(
                path = %target_rel,
                target = candidate.width,
                actual = encoded.width,
                "source narrower than target, kept source size"
            );
        }
        info!(path = %target_rel, status = status.as_str(), width = encoded.width, "wrote variant");
        Ok(VariantResult {
            path: target_rel,
            role,
            status,
            width: Some(encoded.width),
            upscale_avoided: encoded.upscale_avoided,
            bytes: file_len(&target),
        })
    }

    /// Ensure every candidate of `profile`, base first.
    ///
    /// Stops at the first failure; results already produced are discarded
    /// with it since the image counts as failed.
    pub fn ensure_profile(
        &self,
        asset: &AssetPath,
        profile: &Profile,
    ) -> Result<Vec<VariantResult>, GenerateError> {
        let mut results = Vec::with_capacity(profile.candidates.len());
        results.push(self.ensure_variant(asset, profile, Role::Base)?);
        for candidate in profile.secondary() {
            results.push(self.ensure_variant(asset, profile, candidate.role)?);
        }
        Ok(results)
    }

    /// Re-encode a WebP asset in place at most `max_width` wide, keeping the
    /// result only if it is strictly smaller than the original.
    pub fn recompress(
        &self,
        asset: &AssetPath,
        quality: Option<Quality>,
        max_width: u32,
    ) -> Result<RecompressResult, GenerateError> {
        let source = self.source_of(asset)?;
        if !asset.is_webp() {
            return Err(GenerateError::EncodeFailure {
                path: asset.relative(),
                reason: "in-place recompression requires a .webp asset".to_string(),
            });
        }
        let before = std::fs::metadata(&source)?.len();
        let unchanged = RecompressResult {
            path: asset.relative(),
            before,
            after: before,
            saved: 0,
            replaced: false,
        };
        if self.dry_run {
            return Ok(unchanged);
        }

        let transient = TransientFile(self.abs(&asset.transient(COMPRESSED_SUFFIX)));
        encode_scaled(
            self.backend,
            &source,
            &transient.0,
            max_width,
            quality.unwrap_or(self.quality),
        )
        .map_err(|e| encode_failure(&asset.relative(), e))?;

        let candidate = std::fs::metadata(&transient.0)?.len();
        if candidate >= before {
            debug!(path = %asset.relative(), before, candidate, "recompressed file not smaller, keeping original");
            return Ok(unchanged);
        }
        std::fs::rename(&transient.0, &source)?;
        info!(path = %asset.relative(), before, after = candidate, "recompressed");
        Ok(RecompressResult {
            path: asset.relative(),
            before,
            after: candidate,
            saved: before - candidate,
            replaced: true,
        })
    }

    /// Delete derived variants of `roles`. Returns how many files were (or in a
    /// dry run, would be) removed.
    ///
    /// The base role is only derived for JPEG/PNG assets; for a WebP asset it
    /// is the asset itself and is never removed.
    pub fn prune(&self, asset: &AssetPath, roles: &[Role]) -> Result<usize, GenerateError> {
        let mut removed = 0;
        for &role in roles {
            if role == Role::Base && !asset.is_legacy_raster() {
                warn!(path = %asset.relative(), "refusing to prune the asset itself");
                continue;
            }
            let rel = asset.derive(role.default_template());
            let path = self.abs(&rel);
            if !path.is_file() {
                continue;
            }
            if !self.dry_run {
                std::fs::remove_file(&path)?;
            }
            info!(path = %rel, "pruned variant");
            removed += 1;
        }
        Ok(removed)
    }
}

fn encode_failure(path: &str, e: BackendError) -> GenerateError {
    match e {
        BackendError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            GenerateError::AssetNotFound(path.to_string())
        }
        other => GenerateError::EncodeFailure {
            path: path.to_string(),
            reason: other.to_string(),
        },
    }
}

fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}
