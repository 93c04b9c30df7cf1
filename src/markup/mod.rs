//! Markup patcher: splice `srcset`/`sizes` into `<img>` tags.
//!
//! The document is never re-serialized. Each pass locates tags (see
//! [`context`]), decides per tag what to change, and replaces only the bytes
//! of the tags it changes:
//!
//! - **Patch** ([`patch_document`]): add `srcset`/`sizes` to tags whose `src` is
//!   an assigned upload and which have no `srcset` yet.
//! - **Fix** ([`fix`]): correct a `srcset` that exactly matches what an older
//!   profile produced.
//! - **Promote** ([`priority`]): make the first image in a context eager and
//!   high-priority.
//!
//! Tags that already carry a `srcset` are never patched, so running a pass
//! twice changes nothing the second time.

pub mod context;
pub mod fix;
pub mod priority;
pub mod tag;

pub use context::{ContextSelector, ImgSite, Located, locate_images};
pub use tag::{ImgTag, LexError};

use crate::naming::{self, AssetPath};
use crate::profile::Profile;
use std::collections::HashSet;
use std::ops::Range;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkupError {
    #[error("malformed <img> tag at line {line}: {reason}")]
    MalformedTag { line: usize, reason: LexError },
}

/// A candidate `<img>`: in context, `src` under the uploads prefix, no `srcset`.
#[derive(Debug, Clone)]
pub struct ImgTagMatch<'a> {
    pub tag: ImgTag<'a>,
    pub asset: AssetPath,
}

/// Replace a byte range of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub range: Range<usize>,
    pub replacement: String,
}

/// Apply non-overlapping edits, back to front so earlier offsets stay valid.
pub fn apply_edits(html: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| b.range.start.cmp(&a.range.start));
    let mut out = html.to_string();
    for edit in edits {
        out.replace_range(edit.range, &edit.replacement);
    }
    out
}

/// The asset a tag's literal `src` points at, if it is an upload.
pub fn asset_of(tag: &ImgTag<'_>, url_prefix: &str) -> Option<AssetPath> {
    tag.literal("src")
        .and_then(|src| AssetPath::from_url(src.trim(), url_prefix))
}

/// Sites in `context`, honouring fallback limits.
pub fn sites_in<'l, 'a>(
    located: &'l Located<'a>,
    context: &'l ContextSelector,
) -> impl Iterator<Item = &'l ImgSite<'a>> + 'l {
    located.sites.iter().filter(move |s| context.matches(s))
}

/// Candidates already located, filtered to `context`.
pub fn candidates_in<'a>(
    located: &Located<'a>,
    context: &ContextSelector,
    url_prefix: &str,
) -> Vec<ImgTagMatch<'a>> {
    sites_in(located, context)
        .filter(|s| !s.tag.has("srcset"))
        .filter_map(|s| {
            asset_of(&s.tag, url_prefix).map(|asset| ImgTagMatch {
                tag: s.tag.clone(),
                asset,
            })
        })
        .collect()
}

/// Unpatched upload `<img>` tags of `html` within `context`.
pub fn find_candidates<'a>(
    html: &'a str,
    context: &ContextSelector,
    url_prefix: &str,
) -> Vec<ImgTagMatch<'a>> {
    candidates_in(&locate_images(html), context, url_prefix)
}

fn quoted(value: &str) -> String {
    format!("\"{value}\"")
}

/// Patched text of one tag.
///
/// For a JPEG/PNG `src` the value is pointed at the WebP sibling. `srcset` and
/// `sizes` are added after the last attribute; a pre-existing `sizes` has its
/// value replaced instead of being duplicated.
pub fn patch_tag(tag: &ImgTag<'_>, profile: &Profile, asset: &AssetPath, url_prefix: &str) -> String {
    let mut edits = Vec::new();
    if asset.is_legacy_raster() {
        edits.extend(tag.set_value("src", &naming::asset_url(url_prefix, &asset.webp())));
    }

    let srcset = profile.srcset(asset, url_prefix);
    let mut inserted = format!(" srcset={}", quoted(&srcset));
    match tag.set_value("sizes", &profile.sizes) {
        Some(edit) => edits.push(edit),
        None => inserted.push_str(&format!(" sizes={}", quoted(&profile.sizes))),
    }
    edits.push((tag.insert_at..tag.insert_at, inserted));
    tag.rewrite(edits)
}

/// One gallery assignment within a document.
#[derive(Debug, Clone)]
pub struct GalleryRule<'p> {
    pub context: ContextSelector,
    pub profile: &'p Profile,
    /// Assets to patch. `None` patches every candidate in the context.
    pub images: Option<Vec<AssetPath>>,
}

/// An assigned asset that had no matching tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoMatchingTag {
    pub asset: String,
    pub context: ContextSelector,
}

#[derive(Debug, Clone, Default)]
pub struct PatchOutcome {
    pub html: String,
    /// Asset paths of patched tags, in document order per rule.
    pub patched: Vec<String>,
    pub unmatched: Vec<NoMatchingTag>,
    /// Rules that could not be evaluated because only the fallback scan ran.
    pub unevaluated: Vec<ContextSelector>,
}

impl PatchOutcome {
    pub fn changes(&self) -> usize {
        self.patched.len()
    }
}

/// Apply gallery rules to a document. Earlier rules win when two match the
/// same tag.
pub fn patch_document(html: &str, rules: &[GalleryRule<'_>], url_prefix: &str) -> PatchOutcome {
    patch_located(html, &locate_images(html), rules, url_prefix)
}

/// [`patch_document`] over tags that were already located.
pub fn patch_located(
    html: &str,
    located: &Located<'_>,
    rules: &[GalleryRule<'_>],
    url_prefix: &str,
) -> PatchOutcome {
    let mut outcome = PatchOutcome::default();
    let mut claimed = HashSet::new();
    let mut edits = Vec::new();

    for rule in rules {
        if located.fallback && rule.context.needs_tree() {
            warn!(context = %rule.context, "document could not be parsed; container rule skipped");
            outcome.unevaluated.push(rule.context.clone());
            continue;
        }
        let candidates = candidates_in(located, &rule.context, url_prefix);
        let wanted: Option<HashSet<String>> = rule
            .images
            .as_ref()
            .map(|images| images.iter().map(AssetPath::relative).collect());

        let mut seen = HashSet::new();
        for m in &candidates {
            let rel = m.asset.relative();
            if wanted.as_ref().is_some_and(|w| !w.contains(&rel)) {
                continue;
            }
            seen.insert(rel.clone());
            if !claimed.insert(m.tag.offset) {
                continue;
            }
            debug!(asset = %rel, profile = %rule.profile.name, "patching tag");
            edits.push(Edit {
                range: m.tag.span(),
                replacement: patch_tag(&m.tag, rule.profile, &m.asset, url_prefix),
            });
            outcome.patched.push(rel);
        }

        // A listed JPEG whose tag was already rewritten to WebP and patched
        // is done, not missing.
        let done: HashSet<String> = sites_in(located, &rule.context)
            .filter(|s| s.tag.has("srcset"))
            .filter_map(|s| asset_of(&s.tag, url_prefix))
            .map(|a| a.webp())
            .collect();
        for asset in rule.images.iter().flatten() {
            let rel = asset.relative();
            if !seen.contains(&rel) && !done.contains(&asset.webp()) {
                debug!(asset = %rel, context = %rule.context, "no matching tag");
                outcome.unmatched.push(NoMatchingTag {
                    asset: rel,
                    context: rule.context.clone(),
                });
            }
        }
    }
    outcome.unmatched.sort_by(|a, b| a.asset.cmp(&b.asset));
    outcome.html = apply_edits(html, edits);
    outcome
}
