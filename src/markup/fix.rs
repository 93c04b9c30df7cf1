//! Correction pass for tags patched with an outdated profile.
//!
//! A tag is corrected only when its `srcset` is exactly what the `from`
//! profile generates for its `src`. Hand-edited or already-corrected tags
//! never match, so the pass is idempotent.

use super::{ContextSelector, Edit, Located, apply_edits, asset_of, locate_images, sites_in};
use crate::profile::Profile;
use tracing::{debug, warn};

/// Rewrite `from`-shaped `srcset`/`sizes` into `to`-shaped ones.
#[derive(Debug, Clone)]
pub struct FixRule<'p> {
    pub context: ContextSelector,
    pub from: &'p Profile,
    pub to: &'p Profile,
}

#[derive(Debug, Clone, Default)]
pub struct FixOutcome {
    pub html: String,
    /// Asset paths of corrected tags.
    pub fixed: Vec<String>,
}

impl FixOutcome {
    pub fn changes(&self) -> usize {
        self.fixed.len()
    }
}

/// Normalize candidate separators so `a 1w,b 2w` equals `a 1w, b 2w`.
fn normalize_srcset(value: &str) -> String {
    value
        .split(',')
        .map(|c| c.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn fix_document(html: &str, rules: &[FixRule<'_>], url_prefix: &str) -> FixOutcome {
    fix_located(html, &locate_images(html), rules, url_prefix)
}

pub fn fix_located(
    html: &str,
    located: &Located<'_>,
    rules: &[FixRule<'_>],
    url_prefix: &str,
) -> FixOutcome {
    let mut edits: Vec<Edit> = Vec::new();
    let mut fixed = Vec::new();

    for rule in rules {
        if located.fallback && rule.context.needs_tree() {
            warn!(context = %rule.context, "document could not be parsed; container fix skipped");
            continue;
        }
        for site in sites_in(located, &rule.context) {
            if edits.iter().any(|e| e.range.start == site.tag.offset) {
                continue;
            }
            let tag = &site.tag;
            let (Some(asset), Some(current)) = (asset_of(tag, url_prefix), tag.literal("srcset"))
            else {
                continue;
            };
            if normalize_srcset(current) != rule.from.srcset(&asset, url_prefix) {
                continue;
            }
            let Some(srcset_edit) = tag.set_value("srcset", &rule.to.srcset(&asset, url_prefix))
            else {
                continue;
            };

            let mut tag_edits = vec![srcset_edit];
            match tag.set_value("sizes", &rule.to.sizes) {
                Some(edit) => tag_edits.push(edit),
                None => {
                    let after_srcset = tag.find("srcset").map(|a| a.end).unwrap_or(tag.insert_at);
                    tag_edits.push((
                        after_srcset..after_srcset,
                        format!(" sizes=\"{}\"", rule.to.sizes),
                    ));
                }
            }
            debug!(asset = %asset.relative(), from = %rule.from.name, to = %rule.to.name, "fixing srcset");
            edits.push(Edit {
                range: tag.span(),
                replacement: tag.rewrite(tag_edits),
            });
            fixed.push(asset.relative());
        }
    }

    FixOutcome {
        html: apply_edits(html, edits),
        fixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileRegistry;

    const PREFIX: &str = "/uploads/";

    fn preview_fix(reg: &ProfileRegistry) -> FixRule<'_> {
        FixRule {
            context: ContextSelector::ImgClass("wv-preview-image".into()),
            from: reg.get("preview-legacy").unwrap(),
            to: reg.get("preview").unwrap(),
        }
    }

    #[test]
    fn legacy_preview_widths_are_corrected() {
        let reg = ProfileRegistry::builtin();
        let html = r#"<img class="wv-preview-image" src="/uploads/2024/05/luffy.webp" srcset="/uploads/2024/05/luffy-mobile.webp 640w, /uploads/2024/05/luffy.webp 1080w" sizes="(max-width: 850px) 100vw, 1080px" loading="lazy">"#;
        let outcome = fix_document(html, &[preview_fix(&reg)], PREFIX);
        assert_eq!(outcome.fixed, vec!["2024/05/luffy.webp"]);
        assert_eq!(
            outcome.html,
            r#"<img class="wv-preview-image" src="/uploads/2024/05/luffy.webp" srcset="/uploads/2024/05/luffy-mobile.webp 651w, /uploads/2024/05/luffy.webp 1000w" sizes="(max-width: 850px) 240px, 1000px" loading="lazy">"#
        );

        let again = fix_document(&outcome.html, &[preview_fix(&reg)], PREFIX);
        assert_eq!(again.changes(), 0);
    }

    #[test]
    fn missing_sizes_is_added_after_srcset() {
        let reg = ProfileRegistry::builtin();
        let html = r#"<img class="wv-preview-image" src="/uploads/a/b.webp" srcset="/uploads/a/b-mobile.webp 640w,/uploads/a/b.webp 1080w" alt="">"#;
        let outcome = fix_document(html, &[preview_fix(&reg)], PREFIX);
        assert_eq!(
            outcome.html,
            r#"<img class="wv-preview-image" src="/uploads/a/b.webp" srcset="/uploads/a/b-mobile.webp 651w, /uploads/a/b.webp 1000w" sizes="(max-width: 850px) 240px, 1000px" alt="">"#
        );
    }

    #[test]
    fn non_matching_srcset_is_left_alone() {
        let reg = ProfileRegistry::builtin();
        let html = r#"<img class="wv-preview-image" src="/uploads/a/b.webp" srcset="/uploads/a/b-mobile.webp 480w, /uploads/a/b.webp 1080w">"#;
        let outcome = fix_document(html, &[preview_fix(&reg)], PREFIX);
        assert_eq!(outcome.changes(), 0);
        assert_eq!(outcome.html, html);
    }

    #[test]
    fn out_of_context_tag_is_left_alone() {
        let reg = ProfileRegistry::builtin();
        let html = r#"<img class="other" src="/uploads/a/b.webp" srcset="/uploads/a/b-mobile.webp 640w, /uploads/a/b.webp 1080w">"#;
        assert_eq!(fix_document(html, &[preview_fix(&reg)], PREFIX).changes(), 0);
    }
}
