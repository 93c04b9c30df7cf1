//! Page discovery: expand manifest page paths to concrete documents.
//!
//! A page path of `"*"` stands for every template under the pages root whose
//! extension is in `discover.extensions`. Anything else is taken literally.

use crate::config::{ALL_PAGES, PageConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("pages root {} is not a readable directory", .0.display())]
    PagesRoot(PathBuf),
}

/// A document to process and the manifest entry that selected it.
#[derive(Debug, Clone)]
pub struct PageJob<'c> {
    /// Path relative to the pages root, `/`-separated.
    pub relative: String,
    pub page: &'c PageConfig,
}

/// Every template under `root` with one of `extensions`, as sorted
/// `/`-separated paths relative to `root`.
///
/// Entries that cannot be read are logged and skipped. The root itself must be
/// a readable directory.
pub fn discover_pages(root: &Path, extensions: &[String]) -> Result<Vec<String>, DiscoverError> {
    if std::fs::read_dir(root).is_err() {
        return Err(DiscoverError::PagesRoot(root.to_path_buf()));
    }

    let mut pages: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| has_extension(e.path(), extensions))
        .filter_map(|e| relative_slash_path(root, e.path()))
        .collect();
    pages.sort();
    debug!(root = %root.display(), count = pages.len(), "discovered pages");
    Ok(pages)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
    Some(parts.join("/"))
}

/// Expand the manifest into one job per (document, entry), in manifest order.
///
/// The pages root is walked at most once, and only if some entry uses `"*"`.
pub fn expand_pages<'c>(
    root: &Path,
    pages: &'c [PageConfig],
    extensions: &[String],
) -> Result<Vec<PageJob<'c>>, DiscoverError> {
    let mut discovered: Option<Vec<String>> = None;
    let mut jobs = Vec::new();
    for page in pages {
        if page.path == ALL_PAGES {
            if discovered.is_none() {
                discovered = Some(discover_pages(root, extensions)?);
            }
            for relative in discovered.iter().flatten() {
                jobs.push(PageJob {
                    relative: relative.clone(),
                    page,
                });
            }
        } else {
            jobs.push(PageJob {
                relative: page.path.trim_start_matches('/').to_string(),
                page,
            });
        }
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::ContextSelector;
    use std::fs;
    use tempfile::TempDir;

    fn exts() -> Vec<String> {
        vec!["astro".to_string(), "html".to_string()]
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "<p></p>").unwrap();
    }

    fn promote_page(path: &str) -> PageConfig {
        PageConfig {
            path: path.to_string(),
            galleries: Vec::new(),
            fixes: Vec::new(),
            promote: Some(ContextSelector::Document),
        }
    }

    #[test]
    fn finds_templates_recursively_sorted() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "index.astro");
        touch(tmp.path(), "anime/dragon-ball.astro");
        touch(tmp.path(), "anime/notes.md");
        touch(tmp.path(), "about.HTML");

        let pages = discover_pages(tmp.path(), &exts()).unwrap();
        assert_eq!(pages, vec!["about.HTML", "anime/dragon-ball.astro", "index.astro"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = discover_pages(&tmp.path().join("nope"), &exts());
        assert!(matches!(result, Err(DiscoverError::PagesRoot(_))));
    }

    #[test]
    fn literal_paths_are_not_checked() {
        let tmp = TempDir::new().unwrap();
        let pages = [promote_page("/anime/missing.astro")];
        let jobs = expand_pages(&tmp.path().join("nope"), &pages, &exts()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].relative, "anime/missing.astro");
    }

    #[test]
    fn wildcard_expands_in_manifest_order() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.astro");
        touch(tmp.path(), "b.html");
        let pages = [promote_page("b.html"), promote_page(ALL_PAGES)];

        let jobs = expand_pages(tmp.path(), &pages, &exts()).unwrap();
        let rels: Vec<_> = jobs.iter().map(|j| j.relative.as_str()).collect();
        assert_eq!(rels, vec!["b.html", "a.astro", "b.html"]);
        assert_eq!(jobs[1].page.path, ALL_PAGES);
    }
}
