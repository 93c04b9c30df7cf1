//! Batch runner: walk the manifest, generate variants, patch documents.
//!
//! For each page the runner:
//!
//! 1. Reads the document and locates its `<img>` tags once.
//! 2. For every gallery, resolves the assets (the listed images, or every
//!    unpatched upload image in the context) and ensures their variants.
//! 3. Patches only the assets whose variants are all in place.
//! 4. Applies fix rules, then the LCP promotion.
//! 5. Writes the document back if anything changed.
//!
//! Per-image and per-document failures are recorded in the [`BatchReport`]
//! and the run continues. Only configuration problems and an unreadable pages
//! root stop a run, and they are detected before any file is written.

use crate::config::{ConfigError, SrcsetterConfig};
use crate::discover::{DiscoverError, PageJob, expand_pages};
use crate::imaging::ImageBackend;
use crate::markup::fix::{FixRule, fix_document};
use crate::markup::priority::promote_first;
use crate::markup::{
    ContextSelector, GalleryRule, Located, asset_of, candidates_in, locate_images, patch_located,
    sites_in,
};
use crate::naming::AssetPath;
use crate::profile::{Profile, ProfileError, ProfileRegistry};
use crate::report::{BatchReport, RunEvent};
use crate::variants::{VariantGenerator, VariantResult};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Discover(#[from] DiscoverError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON report error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which passes a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stages {
    pub generate: bool,
    pub patch: bool,
    pub fix: bool,
    pub promote: bool,
}

impl Stages {
    pub const ALL: Stages = Stages {
        generate: true,
        patch: true,
        fix: true,
        promote: true,
    };
    pub const GENERATE: Stages = Stages {
        generate: true,
        patch: false,
        fix: false,
        promote: false,
    };
    pub const PATCH: Stages = Stages {
        generate: false,
        patch: true,
        fix: false,
        promote: false,
    };
    pub const FIX: Stages = Stages {
        generate: false,
        patch: false,
        fix: true,
        promote: false,
    };
    pub const PROMOTE: Stages = Stages {
        generate: false,
        patch: false,
        fix: false,
        promote: true,
    };

    fn touches_markup(self) -> bool {
        self.patch || self.fix || self.promote
    }
}

/// Outcome of ensuring one (asset, profile) pair, remembered for the run.
#[derive(Debug, Clone, Copy)]
struct Ready {
    ok: bool,
    recompressed: bool,
}

type Generated = HashMap<(String, String), Ready>;

pub struct Runner<'a, B: ImageBackend> {
    backend: &'a B,
    config: &'a SrcsetterConfig,
    registry: &'a ProfileRegistry,
    uploads: PathBuf,
    pages: PathBuf,
    force: bool,
    dry_run: bool,
}

impl<'a, B: ImageBackend> Runner<'a, B> {
    /// A runner over the directories named in `config`.
    pub fn new(backend: &'a B, config: &'a SrcsetterConfig, registry: &'a ProfileRegistry) -> Self {
        Self {
            backend,
            config,
            registry,
            uploads: PathBuf::from(&config.uploads_dir),
            pages: PathBuf::from(&config.pages_dir),
            force: false,
            dry_run: false,
        }
    }

    pub fn uploads(mut self, dir: impl Into<PathBuf>) -> Self {
        self.uploads = dir.into();
        self
    }

    pub fn pages(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pages = dir.into();
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn generator(&self) -> VariantGenerator<'a, B> {
        VariantGenerator::new(self.backend, &self.uploads)
            .with_quality(self.config.encoding.quality)
            .force(self.force)
            .dry_run(self.dry_run)
    }

    fn jobs(&self) -> Result<Vec<PageJob<'a>>, RunError> {
        self.config.check_manifest(self.registry)?;
        Ok(expand_pages(
            &self.pages,
            &self.config.pages,
            &self.config.discover.extensions,
        )?)
    }

    /// Run the given stages over every manifest page.
    pub fn run(&self, stages: Stages) -> Result<BatchReport, RunError> {
        let jobs = self.jobs()?;
        let generator = self.generator();
        let mut report = BatchReport {
            dry_run: self.dry_run,
            ..BatchReport::default()
        };
        let mut generated = Generated::new();

        info!(pages = jobs.len(), dry_run = self.dry_run, "starting run");
        for job in &jobs {
            self.run_page(job, stages, &generator, &mut generated, &mut report)?;
        }
        Ok(report)
    }

    fn run_page(
        &self,
        job: &PageJob<'_>,
        stages: Stages,
        generator: &VariantGenerator<'a, B>,
        generated: &mut Generated,
        report: &mut BatchReport,
    ) -> Result<(), RunError> {
        let path = self.pages.join(&job.relative);
        let html = match fs::read_to_string(&path) {
            Ok(html) => html,
            Err(e) => {
                warn!(page = %job.relative, error = %e, "cannot read page");
                report.push(RunEvent::Failed {
                    path: job.relative.clone(),
                    error: format!("cannot read page: {e}"),
                });
                return Ok(());
            }
        };
        debug!(page = %job.relative, "processing page");

        let located = locate_images(&html);
        for e in &located.malformed {
            report.push(RunEvent::MalformedTag {
                page: job.relative.clone(),
                message: e.to_string(),
            });
        }

        let mut rules = Vec::new();
        if stages.generate || stages.patch {
            for gallery in &job.page.galleries {
                let profile = self.registry.get(&gallery.profile)?;
                let assets = match gallery.assets() {
                    Some(listed) => listed,
                    None => self.context_assets(&located, &gallery.context),
                };
                let mut ready = Vec::new();
                for asset in assets {
                    let ok = if stages.generate {
                        self.generate(generator, &asset, profile, gallery.recompress, generated, report)
                    } else {
                        self.variants_present(&asset, profile, report)
                    };
                    if ok {
                        ready.push(asset);
                    }
                }
                rules.push(GalleryRule {
                    context: gallery.context.clone(),
                    profile,
                    images: Some(ready),
                });
            }
        }
        if !stages.touches_markup() {
            return Ok(());
        }

        let mut current = html.clone();
        let mut changes = 0;
        if stages.patch && !rules.is_empty() {
            let outcome = patch_located(&html, &located, &rules, &self.config.url_prefix);
            for u in &outcome.unmatched {
                report.push(RunEvent::NoMatchingTag {
                    page: job.relative.clone(),
                    asset: u.asset.clone(),
                    context: u.context.to_string(),
                });
            }
            for context in &outcome.unevaluated {
                report.push(RunEvent::ContextUnavailable {
                    page: job.relative.clone(),
                    context: context.to_string(),
                });
            }
            changes += outcome.changes();
            current = outcome.html;
        }

        if stages.fix && !job.page.fixes.is_empty() {
            let fixes = job
                .page
                .fixes
                .iter()
                .map(|f| {
                    Ok(FixRule {
                        context: f.context.clone(),
                        from: self.registry.get(&f.from)?,
                        to: self.registry.get(&f.to)?,
                    })
                })
                .collect::<Result<Vec<_>, ProfileError>>()?;
            let outcome = fix_document(&current, &fixes, &self.config.url_prefix);
            changes += outcome.changes();
            current = outcome.html;
        }

        if stages.promote {
            if let Some(context) = &job.page.promote {
                let outcome = promote_first(&current, context);
                if outcome.promoted {
                    changes += 1;
                    current = outcome.html;
                }
            }
        }

        if changes > 0 && !self.dry_run {
            if let Err(e) = fs::write(&path, &current) {
                warn!(page = %job.relative, error = %e, "cannot write page");
                report.push(RunEvent::Failed {
                    path: job.relative.clone(),
                    error: format!("cannot write page: {e}"),
                });
                return Ok(());
            }
            info!(page = %job.relative, changes, "wrote page");
        }
        report.push(RunEvent::Document {
            path: job.relative.clone(),
            changes,
            before: html.len() as u64,
            after: current.len() as u64,
        });
        Ok(())
    }

    /// Unpatched upload assets in `context`, first occurrence order, deduplicated.
    fn context_assets(&self, located: &Located<'_>, context: &ContextSelector) -> Vec<AssetPath> {
        let mut seen = HashSet::new();
        candidates_in(located, context, &self.config.url_prefix)
            .into_iter()
            .map(|m| m.asset)
            .filter(|a| seen.insert(a.relative()))
            .collect()
    }

    /// Ensure every variant of one (asset, profile) pair, once per run.
    fn generate(
        &self,
        generator: &VariantGenerator<'a, B>,
        asset: &AssetPath,
        profile: &Profile,
        recompress: bool,
        generated: &mut Generated,
        report: &mut BatchReport,
    ) -> bool {
        let key = (asset.relative(), profile.name.clone());
        let mut ready = match generated.get(&key) {
            Some(&ready) => ready,
            None => Ready {
                ok: self.ensure(generator, asset, profile, report),
                recompressed: false,
            },
        };
        // Any gallery asking for recompression gets it, even if an earlier
        // one already generated the pair.
        if ready.ok && recompress && !ready.recompressed && asset.is_webp() {
            self.recompress(generator, asset, profile, report);
            ready.recompressed = true;
        }
        generated.insert(key, ready);
        ready.ok
    }

    fn ensure(
        &self,
        generator: &VariantGenerator<'a, B>,
        asset: &AssetPath,
        profile: &Profile,
        report: &mut BatchReport,
    ) -> bool {
        report.images_found += 1;
        match generator.ensure_profile(asset, profile) {
            Ok(results) => {
                if results.iter().any(VariantResult::written) {
                    report.images_processed += 1;
                } else {
                    report.images_skipped += 1;
                }
                for r in results {
                    report.push(RunEvent::Variant {
                        path: r.path,
                        status: r.status,
                        bytes: r.bytes,
                        upscale_avoided: r.upscale_avoided,
                    });
                }
                true
            }
            Err(e) => {
                warn!(asset = %asset.relative(), profile = %profile.name, error = %e, "image failed");
                report.images_failed += 1;
                report.push(RunEvent::Failed {
                    path: asset.relative(),
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Shrink the asset to the base width. A failure here leaves the
    /// original in place, so the image still counts as ready.
    fn recompress(
        &self,
        generator: &VariantGenerator<'a, B>,
        asset: &AssetPath,
        profile: &Profile,
        report: &mut BatchReport,
    ) {
        let Some(base) = profile.base() else {
            return;
        };
        match generator.recompress(asset, profile.quality, base.width) {
            Ok(r) => report.push(RunEvent::Recompressed {
                path: r.path,
                before: r.before,
                after: r.after,
                replaced: r.replaced,
            }),
            Err(e) => {
                warn!(asset = %asset.relative(), error = %e, "recompression failed");
                report.push(RunEvent::Failed {
                    path: asset.relative(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Patch-only runs trust the disk: every variant file must exist.
    fn variants_present(&self, asset: &AssetPath, profile: &Profile, report: &mut BatchReport) -> bool {
        let missing: Vec<String> = profile
            .candidates
            .iter()
            .map(|c| asset.derive(&c.template))
            .filter(|rel| !self.uploads.join(rel).is_file())
            .collect();
        if missing.is_empty() {
            return true;
        }
        warn!(asset = %asset.relative(), ?missing, "variants missing, not patching");
        report.push(RunEvent::Failed {
            path: asset.relative(),
            error: format!("variants missing: {}", missing.join(", ")),
        });
        false
    }

    /// Delete the variants each gallery lists under `prune`.
    pub fn prune(&self) -> Result<BatchReport, RunError> {
        let jobs = self.jobs()?;
        let generator = self.generator();
        let mut report = BatchReport {
            dry_run: self.dry_run,
            ..BatchReport::default()
        };
        let mut done = HashSet::new();

        for job in &jobs {
            let galleries: Vec<_> = job
                .page
                .galleries
                .iter()
                .filter(|g| !g.prune.is_empty())
                .collect();
            if galleries.is_empty() {
                continue;
            }
            let html = if galleries.iter().any(|g| g.images.is_none()) {
                match fs::read_to_string(self.pages.join(&job.relative)) {
                    Ok(html) => Some(html),
                    Err(e) => {
                        report.push(RunEvent::Failed {
                            path: job.relative.clone(),
                            error: format!("cannot read page: {e}"),
                        });
                        None
                    }
                }
            } else {
                None
            };
            let located = html.as_deref().map(locate_images);

            for gallery in galleries {
                let assets = match (gallery.assets(), &located) {
                    (Some(listed), _) => listed,
                    (None, Some(located)) => self.upload_assets(located, &gallery.context),
                    (None, None) => continue,
                };
                for asset in assets {
                    if !done.insert((asset.relative(), gallery.prune.clone())) {
                        continue;
                    }
                    match generator.prune(&asset, &gallery.prune) {
                        Ok(0) => {}
                        Ok(removed) => report.push(RunEvent::Pruned {
                            path: asset.relative(),
                            removed,
                        }),
                        Err(e) => report.push(RunEvent::Failed {
                            path: asset.relative(),
                            error: e.to_string(),
                        }),
                    }
                }
            }
        }
        Ok(report)
    }

    /// Every upload asset in `context`, patched or not.
    fn upload_assets(&self, located: &Located<'_>, context: &ContextSelector) -> Vec<AssetPath> {
        let mut seen = HashSet::new();
        sites_in(located, context)
            .filter_map(|s| asset_of(&s.tag, &self.config.url_prefix))
            .filter(|a| seen.insert(a.relative()))
            .collect()
    }

    /// Validate the manifest against the filesystem without writing anything.
    ///
    /// Missing pages and missing listed images are reported as failures.
    pub fn check(&self) -> Result<BatchReport, RunError> {
        let jobs = self.jobs()?;
        let mut report = BatchReport {
            dry_run: true,
            ..BatchReport::default()
        };
        let mut seen = HashSet::new();
        for job in &jobs {
            if !self.pages.join(&job.relative).is_file() {
                report.push(RunEvent::Failed {
                    path: job.relative.clone(),
                    error: "page not found".to_string(),
                });
            }
            for asset in job.page.galleries.iter().filter_map(|g| g.assets()).flatten() {
                if !seen.insert(asset.relative()) {
                    continue;
                }
                report.images_found += 1;
                if !self.uploads.join(asset.relative()).is_file() {
                    report.push(RunEvent::Failed {
                        path: asset.relative(),
                        error: "asset not found".to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}

/// Write the report as line-delimited JSON to `path`.
pub fn write_json_report(report: &BatchReport, path: &Path) -> Result<(), RunError> {
    let file = fs::File::create(path)?;
    report.write_json_lines(BufWriter::new(file))?;
    Ok(())
}
