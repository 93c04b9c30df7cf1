//! LCP promotion: the first image in a context is the one the browser should
//! fetch first, so it must not be lazy-loaded.

use super::tag::TagEdit;
use super::{ContextSelector, Edit, Located, apply_edits, locate_images, sites_in};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteOutcome {
    pub html: String,
    pub promoted: bool,
}

pub fn promote_first(html: &str, context: &ContextSelector) -> PromoteOutcome {
    promote_located(html, &locate_images(html), context)
}

/// Drop `loading="lazy"` from the first `<img>` in `context` and add
/// `fetchpriority="high"` right after its `src`.
///
/// A tag that already has `fetchpriority="high"` is left as is. Any other
/// `fetchpriority` value is kept, but the lazy hint is still removed.
pub fn promote_located(html: &str, located: &Located<'_>, context: &ContextSelector) -> PromoteOutcome {
    let unchanged = || PromoteOutcome {
        html: html.to_string(),
        promoted: false,
    };
    if located.fallback && context.needs_tree() {
        warn!(%context, "document could not be parsed; promotion skipped");
        return unchanged();
    }
    let Some(site) = sites_in(located, context).next() else {
        return unchanged();
    };
    let tag = &site.tag;
    if tag
        .value("fetchpriority")
        .is_some_and(|v| v.eq_ignore_ascii_case("high"))
    {
        return unchanged();
    }

    let mut edits: Vec<TagEdit> = Vec::new();
    for attr in &tag.attrs {
        let name = &tag.text[attr.name.clone()];
        let lazy = attr
            .value
            .as_ref()
            .is_some_and(|v| tag.text[v.clone()].eq_ignore_ascii_case("lazy"));
        if name.eq_ignore_ascii_case("loading") && lazy {
            edits.push((tag.removal_range(attr), String::new()));
        }
    }
    if !tag.has("fetchpriority") {
        let at = tag.find("src").map(|a| a.end).unwrap_or(tag.insert_at);
        edits.push((at..at, " fetchpriority=\"high\"".to_string()));
    }
    if edits.is_empty() {
        return unchanged();
    }

    debug!(%context, offset = tag.offset, "promoting first image");
    PromoteOutcome {
        html: apply_edits(
            html,
            vec![Edit {
                range: tag.span(),
                replacement: tag.rewrite(edits),
            }],
        ),
        promoted: true,
    }
}
