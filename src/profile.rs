//! Profile registry: named responsive-image treatments.
//!
//! A [`Profile`] lists the `srcset` candidates of one gallery layout, in the
//! order they appear in the attribute, plus the `sizes` expression that goes
//! with them. Each candidate pairs a [`Role`] (which file it is) with the
//! pixel width it is advertised at (`356w`).
//!
//! Role and width are independent. In the "inverse" layouts used by the
//! category grids the `desktop` file is the *narrower* one, because those
//! grids show images smaller on wide viewports:
//!
//! ```text
//! elemento-categorias   desktop 356w, base 437w   sizes="(max-width: 900px) 437px, 356px"
//! preview               mobile  651w, base 1000w  sizes="(max-width: 850px) 240px, 1000px"
//! ```
//!
//! Every profile has exactly one [`Role::Base`] candidate, the un-suffixed
//! `{base}.webp` file that already exists (or is converted from a JPEG/PNG).

use crate::imaging::Quality;
use crate::naming::{self, AssetPath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("unknown profile: {0}")]
    UnknownProfile(String),
    #[error("invalid profile '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

/// Which file a `srcset` candidate refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The un-suffixed `{base}.webp` file.
    Base,
    /// `{base}-desktop.webp`.
    Desktop,
    /// `{base}-mobile.webp`.
    Mobile,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Base => "base",
            Role::Desktop => "desktop",
            Role::Mobile => "mobile",
        }
    }

    /// Suffix template used when a profile does not override it.
    pub fn default_template(self) -> &'static str {
        match self {
            Role::Base => naming::BASE_TEMPLATE,
            Role::Desktop => "{base}-desktop.webp",
            Role::Mobile => "{base}-mobile.webp",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(Role::Base),
            "desktop" => Ok(Role::Desktop),
            "mobile" => Ok(Role::Mobile),
            other => Err(format!(
                "unknown role '{other}' (expected base, desktop or mobile)"
            )),
        }
    }
}

/// One `srcset` entry: a file role, its advertised width and its naming template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub role: Role,
    pub width: u32,
    pub template: String,
}

/// A named responsive-image treatment.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    /// Candidates in `srcset` order.
    pub candidates: Vec<Candidate>,
    /// Value of the `sizes` attribute.
    pub sizes: String,
    /// Encoding quality override. `None` uses the pipeline-wide setting.
    pub quality: Option<Quality>,
}

impl Profile {
    pub fn new(name: impl Into<String>, sizes: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            candidates: Vec::new(),
            sizes: sizes.into(),
            quality: None,
        }
    }

    /// Append a candidate that uses the role's default template.
    pub fn candidate(self, role: Role, width: u32) -> Self {
        self.candidate_with_template(role, width, role.default_template())
    }

    pub fn candidate_with_template(
        mut self,
        role: Role,
        width: u32,
        template: impl Into<String>,
    ) -> Self {
        self.candidates.push(Candidate {
            role,
            width,
            template: template.into(),
        });
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Check the structural invariants every registered profile must satisfy.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let invalid = |reason: String| ProfileError::Invalid {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        if self.sizes.trim().is_empty() {
            return Err(invalid("sizes must not be empty".into()));
        }
        let bases = self
            .candidates
            .iter()
            .filter(|c| c.role == Role::Base)
            .count();
        if bases != 1 {
            return Err(invalid(format!(
                "expected exactly one base candidate, found {bases}"
            )));
        }
        for (i, c) in self.candidates.iter().enumerate() {
            if c.width == 0 {
                return Err(invalid(format!("{} width must be non-zero", c.role)));
            }
            if self.candidates[..i].iter().any(|o| o.role == c.role) {
                return Err(invalid(format!("role {} listed twice", c.role)));
            }
            naming::validate_template(&c.template).map_err(invalid)?;
            if c.role == Role::Base && c.template != naming::BASE_TEMPLATE {
                return Err(invalid(format!(
                    "base candidate must use {}",
                    naming::BASE_TEMPLATE
                )));
            }
            if c.role != Role::Base && c.template == naming::BASE_TEMPLATE {
                return Err(invalid(format!(
                    "{} candidate must not reuse the base file name",
                    c.role
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, role: Role) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.role == role)
    }

    /// The base candidate. Registered profiles always have one.
    pub fn base(&self) -> Option<&Candidate> {
        self.get(Role::Base)
    }

    /// Candidates other than the base, in `srcset` order.
    pub fn secondary(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| c.role != Role::Base)
    }

    /// Path of the file for `role`, relative to the uploads root.
    pub fn variant_path(&self, asset: &AssetPath, role: Role) -> Option<String> {
        self.get(role).map(|c| asset.derive(&c.template))
    }

    /// The full `srcset` attribute value for an asset.
    pub fn srcset(&self, asset: &AssetPath, url_prefix: &str) -> String {
        self.candidates
            .iter()
            .map(|c| {
                format!(
                    "{} {}w",
                    naming::asset_url(url_prefix, &asset.derive(&c.template)),
                    c.width
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Lookup table of known profiles.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the site's gallery layouts.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for profile in builtin_profiles() {
            registry.profiles.insert(profile.name.clone(), profile);
        }
        registry
    }

    /// Add or replace a profile after validating it.
    pub fn register(&mut self, profile: Profile) -> Result<(), ProfileError> {
        profile.validate()?;
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Profile, ProfileError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ProfileError::UnknownProfile(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// All profiles, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn inverse(name: &str, desktop: u32, base: u32) -> Profile {
    Profile::new(name, format!("(max-width: 900px) {base}px, {desktop}px"))
        .candidate(Role::Desktop, desktop)
        .candidate(Role::Base, base)
}

fn builtin_profiles() -> Vec<Profile> {
    vec![
        Profile::new("preview", "(max-width: 850px) 240px, 1000px")
            .candidate(Role::Mobile, 651)
            .candidate(Role::Base, 1000),
        Profile::new("preview-legacy", "(max-width: 850px) 100vw, 1080px")
            .candidate(Role::Mobile, 640)
            .candidate(Role::Base, 1080),
        inverse("elemento-categorias", 356, 437),
        inverse("elemento-categorias-b", 205, 310),
        inverse("elemento-index", 205, 310),
        inverse("personaje7", 145, 200),
        Profile::new("personaje7-legacy", "(max-width: 850px) 120px, 200px")
            .candidate(Role::Mobile, 120)
            .candidate(Role::Base, 200),
        inverse("personaje8", 125, 200),
        inverse("personaje-dragon-ball", 105, 200),
    ]
}
