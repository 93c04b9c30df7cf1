//! Filename conventions for upload assets and their derived variants.
//!
//! Every asset lives under the uploads root as `<dir>/<base>.<ext>`, usually
//! `<year>/<month>/<base>.<ext>`. Derived files are siblings built from a
//! suffix template in which `{base}` is replaced by the asset's base name:
//!
//! ```text
//! 2023/07/goku.webp   + "{base}-desktop.webp"  →  2023/07/goku-desktop.webp
//! 2022/04/x.jpg       + "{base}.webp"          →  2022/04/x.webp
//! ```
//!
//! There is no index of generated files. A variant exists if and only if the
//! file named by this convention exists on disk.

/// Placeholder replaced by the asset's base name in suffix templates.
pub const BASE_PLACEHOLDER: &str = "{base}";

/// Template of the un-suffixed WebP sibling (the "base" candidate).
pub const BASE_TEMPLATE: &str = "{base}.webp";

/// Suffix of the transient file written during in-place recompression.
pub const COMPRESSED_SUFFIX: &str = "compressed";

/// Suffix of the transient file written while converting a primary image.
pub const TEMP_SUFFIX: &str = "temp";

/// Raster formats that get converted to a WebP sibling.
const LEGACY_RASTER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// An asset path split into directory, base name and extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPath {
    /// Directory relative to the uploads root, without trailing slash. Empty at the root.
    pub dir: String,
    /// File name without extension.
    pub base: String,
    /// Extension as written (case preserved), without the dot.
    pub ext: String,
}

impl AssetPath {
    /// Parse a path relative to the uploads root, e.g. `2023/07/goku.webp`.
    ///
    /// Returns `None` for paths without a file name or extension, and for
    /// paths with empty, `.` or `..` directory segments, which could point
    /// outside the uploads root.
    pub fn parse(relative: &str) -> Option<Self> {
        let relative = relative.trim_start_matches('/');
        let (dir, file) = match relative.rfind('/') {
            Some(pos) => (&relative[..pos], &relative[pos + 1..]),
            None => ("", relative),
        };
        if !dir.is_empty() && dir.split('/').any(|seg| matches!(seg, "" | "." | "..")) {
            return None;
        }
        let dot = file.rfind('.')?;
        let (base, ext) = (&file[..dot], &file[dot + 1..]);
        if base.is_empty() || ext.is_empty() {
            return None;
        }
        Some(Self {
            dir: dir.to_string(),
            base: base.to_string(),
            ext: ext.to_string(),
        })
    }

    /// Parse a `src` URL that points into the uploads tree.
    ///
    /// `url_prefix` is the public mount point of the uploads root, e.g. `/uploads/`.
    /// URLs outside the prefix are not assets and yield `None`.
    pub fn from_url(url: &str, url_prefix: &str) -> Option<Self> {
        let prefix = normalize_prefix(url_prefix);
        url.strip_prefix(prefix.as_str()).and_then(Self::parse)
    }

    /// The path relative to the uploads root.
    pub fn relative(&self) -> String {
        self.in_dir(&format!("{}.{}", self.base, self.ext))
    }

    /// Whether this is a JPEG/PNG that the pipeline converts to WebP.
    pub fn is_legacy_raster(&self) -> bool {
        LEGACY_RASTER_EXTENSIONS
            .iter()
            .any(|e| self.ext.eq_ignore_ascii_case(e))
    }

    pub fn is_webp(&self) -> bool {
        self.ext.eq_ignore_ascii_case("webp")
    }

    /// Apply a suffix template, returning a path relative to the uploads root.
    pub fn derive(&self, template: &str) -> String {
        self.in_dir(&template.replace(BASE_PLACEHOLDER, &self.base))
    }

    /// The un-suffixed WebP sibling. Equal to [`relative`](Self::relative) for WebP assets.
    pub fn webp(&self) -> String {
        self.derive(BASE_TEMPLATE)
    }

    /// A transient working file next to the asset, e.g. `goku-compressed.webp`.
    pub fn transient(&self, suffix: &str) -> String {
        self.in_dir(&format!("{}-{}.webp", self.base, suffix))
    }

    fn in_dir(&self, file: &str) -> String {
        if self.dir.is_empty() {
            file.to_string()
        } else {
            format!("{}/{}", self.dir, file)
        }
    }
}

/// Public URL of a path relative to the uploads root.
pub fn asset_url(url_prefix: &str, relative: &str) -> String {
    format!("{}{}", normalize_prefix(url_prefix), relative)
}

/// Ensure the prefix has exactly one trailing slash.
fn normalize_prefix(prefix: &str) -> String {
    format!("{}/", prefix.trim_end_matches('/'))
}

/// Check that a suffix template can name a WebP sibling.
pub fn validate_template(template: &str) -> Result<(), String> {
    if !template.contains(BASE_PLACEHOLDER) {
        return Err(format!("template '{template}' must contain {BASE_PLACEHOLDER}"));
    }
    if template.contains('/') {
        return Err(format!("template '{template}' must not contain '/'"));
    }
    if !template.ends_with(".webp") {
        return Err(format!("template '{template}' must end in .webp"));
    }
    Ok(())
}
