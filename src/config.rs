//! Pipeline configuration and manifest.
//!
//! Handles loading, validating, and merging `srcsetter.toml`. The user file is
//! merged over stock defaults, so it only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! uploads_dir = "public/uploads"   # Uploads root on disk
//! pages_dir = "src/pages"          # Root of the page templates
//! url_prefix = "/uploads/"         # Public URL of the uploads root
//!
//! [encoding]
//! quality = 65                     # WebP quality (1-100)
//!
//! [discover]
//! extensions = ["astro", "html"]   # Page files picked up by path = "*"
//!
//! [[profiles]]                     # Ad-hoc profiles (same name replaces a built-in)
//! name = "banner"
//! sizes = "(max-width: 600px) 300px, 720px"
//! candidates = [
//!   { role = "mobile", width = 300 },
//!   { role = "base", width = 720 },
//! ]
//!
//! [[pages]]                        # The manifest: one entry per document
//! path = "anime/dragon-ball.astro"
//! promote = "img-class:wv-preview-image"
//!
//! [[pages.galleries]]
//! context = "container:personaje-dragon-ball"
//! profile = "personaje-dragon-ball"
//! images = ["2023/07/goku.webp"]   # Omit to take every upload image in context
//! recompress = true                # Shrink WebP sources to the base width
//!
//! [[pages.fixes]]
//! context = "img-class:wv-preview-image"
//! from = "preview-legacy"
//! to = "preview"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::Quality;
use crate::markup::ContextSelector;
use crate::naming::AssetPath;
use crate::profile::{Profile, ProfileError, ProfileRegistry, Role};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Config file looked up in the working directory when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "srcsetter.toml";

/// Page path that expands to every template under the pages root.
pub const ALL_PAGES: &str = "*";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Pipeline configuration loaded from `srcsetter.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SrcsetterConfig {
    /// Uploads root on disk.
    pub uploads_dir: String,
    /// Root directory of the page templates.
    pub pages_dir: String,
    /// Public URL of the uploads root.
    pub url_prefix: String,
    pub encoding: EncodingConfig,
    pub discover: DiscoverConfig,
    /// Ad-hoc profiles registered on top of the built-ins.
    pub profiles: Vec<ProfileConfig>,
    /// The manifest.
    pub pages: Vec<PageConfig>,
}

impl Default for SrcsetterConfig {
    fn default() -> Self {
        Self {
            uploads_dir: "public/uploads".to_string(),
            pages_dir: "src/pages".to_string(),
            url_prefix: "/uploads/".to_string(),
            encoding: EncodingConfig::default(),
            discover: DiscoverConfig::default(),
            profiles: Vec::new(),
            pages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingConfig {
    /// WebP quality used by profiles without their own.
    pub quality: Quality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverConfig {
    /// File extensions (without dot) treated as page templates.
    pub extensions: Vec<String>,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["astro".to_string(), "html".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub name: String,
    pub sizes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
    pub candidates: Vec<CandidateConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidateConfig {
    pub role: Role,
    pub width: u32,
    /// Naming template, defaults to the role's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl ProfileConfig {
    pub fn to_profile(&self) -> Profile {
        let mut profile = Profile::new(&self.name, &self.sizes);
        for c in &self.candidates {
            profile = match &c.template {
                Some(t) => profile.candidate_with_template(c.role, c.width, t),
                None => profile.candidate(c.role, c.width),
            };
        }
        match self.quality {
            Some(q) => profile.with_quality(q),
            None => profile,
        }
    }
}

/// One manifest entry: a document and the rules applied to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageConfig {
    /// Path relative to the pages root, or `"*"` for every template.
    pub path: String,
    #[serde(default)]
    pub galleries: Vec<GalleryConfig>,
    #[serde(default)]
    pub fixes: Vec<FixConfig>,
    /// Promote the first image in this context for LCP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promote: Option<ContextSelector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GalleryConfig {
    pub context: ContextSelector,
    pub profile: String,
    /// Upload paths relative to the uploads root. `None` takes every
    /// unpatched upload image found in the context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    /// Recompress WebP sources in place at the base width.
    #[serde(default)]
    pub recompress: bool,
    /// Variant roles `prune` deletes for this gallery's images.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prune: Vec<Role>,
}

impl GalleryConfig {
    /// Listed images as parsed asset paths.
    pub fn assets(&self) -> Option<Vec<AssetPath>> {
        self.images
            .as_ref()
            .map(|images| images.iter().filter_map(|i| AssetPath::parse(i)).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixConfig {
    pub context: ContextSelector,
    pub from: String,
    pub to: String,
}

impl SrcsetterConfig {
    /// Check field values and manifest shape.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.url_prefix.starts_with('/') && !self.url_prefix.contains("://") {
            return Err(ConfigError::Validation(format!(
                "url_prefix '{}' must be an absolute path or URL",
                self.url_prefix
            )));
        }
        if self.discover.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "discover.extensions must not be empty".into(),
            ));
        }
        for page in &self.pages {
            if page.path.trim().is_empty() {
                return Err(ConfigError::Validation("page path must not be empty".into()));
            }
            if page.galleries.is_empty() && page.fixes.is_empty() && page.promote.is_none() {
                return Err(ConfigError::Validation(format!(
                    "page '{}' has no galleries, fixes or promote",
                    page.path
                )));
            }
            for gallery in &page.galleries {
                for image in gallery.images.iter().flatten() {
                    if AssetPath::parse(image).is_none() {
                        return Err(ConfigError::Validation(format!(
                            "page '{}': '{image}' is not an upload path with an extension inside the uploads root",
                            page.path
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Built-in profiles plus the `[[profiles]]` of this config.
    pub fn registry(&self) -> Result<ProfileRegistry, ConfigError> {
        let mut registry = ProfileRegistry::builtin();
        for p in &self.profiles {
            registry.register(p.to_profile())?;
        }
        Ok(registry)
    }

    /// Check that every profile the manifest names exists. Runs before any work.
    pub fn check_manifest(&self, registry: &ProfileRegistry) -> Result<(), ConfigError> {
        for page in &self.pages {
            let names = page
                .galleries
                .iter()
                .map(|g| g.profile.as_str())
                .chain(page.fixes.iter().flat_map(|f| [f.from.as_str(), f.to.as_str()]));
            for name in names {
                registry.get(name)?;
            }
        }
        Ok(())
    }
}

/// Stock defaults as a TOML value, the base every user file is merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(SrcsetterConfig::default())?)
}

/// Deep-merge two TOML values. Tables merge key by key; anything else
/// (including arrays) in `overlay` replaces `base`.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value. `Ok(None)` if it does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an overlay onto the base, deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SrcsetterConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SrcsetterConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, `srcsetter.toml` in the working
/// directory is used if present, else the stock defaults.
pub fn load_config(path: Option<&Path>) -> Result<SrcsetterConfig, ConfigError> {
    let overlay = match path {
        Some(p) => Some(load_raw_config(p)?.ok_or_else(|| {
            ConfigError::Validation(format!("config file {} not found", p.display()))
        })?),
        None => load_raw_config(Path::new(CONFIG_FILE_NAME))?,
    };
    resolve_config(stock_defaults_value()?, overlay)
}

/// A fully commented stock config, printed by `gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# srcsetter configuration
# =======================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Uploads root on disk. Image paths in the manifest are relative to it.
uploads_dir = "public/uploads"

# Root of the page templates. Page paths are relative to it.
pages_dir = "src/pages"

# Public URL of the uploads root, as written in <img src="...">.
url_prefix = "/uploads/"

# ---------------------------------------------------------------------------
# Encoding
# ---------------------------------------------------------------------------
[encoding]
# Lossy WebP quality (1 = worst, 100 = best) for profiles without their own.
quality = 65

# ---------------------------------------------------------------------------
# Page discovery
# ---------------------------------------------------------------------------
[discover]
# Files under pages_dir with these extensions are matched by path = "*".
extensions = ["astro", "html"]

# ---------------------------------------------------------------------------
# Ad-hoc profiles
# ---------------------------------------------------------------------------
# Built-in: preview, preview-legacy, elemento-categorias,
# elemento-categorias-b, elemento-index, personaje7, personaje7-legacy,
# personaje8, personaje-dragon-ball. A profile with a built-in name
# replaces it. Candidates are listed in srcset order; exactly one must be
# the base role.
#
# [[profiles]]
# name = "banner"
# sizes = "(max-width: 600px) 300px, 720px"
# quality = 70
# candidates = [
#   { role = "mobile", width = 300 },
#   { role = "base", width = 720 },
# ]

# ---------------------------------------------------------------------------
# Manifest
# ---------------------------------------------------------------------------
# Contexts: "container:<class>" (an enclosing element has the class),
# "img-class:<class>" (the <img> has the class) or "document".
#
# [[pages]]
# path = "anime/dragon-ball.astro"     # or "*" for every page
# promote = "img-class:wv-preview-image"
#
# [[pages.galleries]]
# context = "container:personaje-dragon-ball"
# profile = "personaje-dragon-ball"
# images = ["2023/07/goku.webp"]       # omit to take all images in context
# recompress = false
# prune = []                           # roles removed by `srcsetter prune`
#
# [[pages.fixes]]
# context = "img-class:wv-preview-image"
# from = "preview-legacy"
# to = "preview"
"##
}
