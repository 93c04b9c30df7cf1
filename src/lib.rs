//! # srcsetter
//!
//! Responsive-image pipeline for static site templates. A manifest assigns
//! uploaded images to named profiles. srcsetter makes the WebP files each
//! profile needs and splices matching `srcset`/`sizes` attributes into the
//! `<img>` tags that show them.
//!
//! # Architecture
//!
//! ```text
//! srcsetter.toml ──► ProfileRegistry ──► VariantGenerator ──► uploads/…-desktop.webp
//!                          │
//!                          └──────────► Markup patcher ────► pages/…/*.astro
//! ```
//!
//! Both halves derive file names from the same convention
//! ([`naming::AssetPath::derive`]), so the generator never has to tell the
//! patcher what it wrote: a `srcset` entry points at a file because the file
//! is named that way. No index of generated files is kept. Whether a variant
//! exists is answered by looking at the disk.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`profile`] | Named profiles: candidate widths, naming templates, `sizes` |
//! | [`naming`] | Asset path parsing and the `{base}` suffix convention |
//! | [`variants`] | Ensures variant files exist; in-place recompression; pruning |
//! | [`imaging`] | Decode, scale and WebP-encode behind the [`imaging::ImageBackend`] trait |
//! | [`markup`] | Locates `<img>` tags by context and splices attributes in place |
//! | [`config`] | `srcsetter.toml` loading, merging over stock defaults, validation |
//! | [`discover`] | Expands `path = "*"` to every page template |
//! | [`pipeline`] | Batch runner tying manifest, generator and patcher together |
//! | [`report`] | Run events, counters and the JSON-lines report |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Splice, Don't Serialize
//!
//! Page templates are Astro components as often as plain HTML. Re-serializing
//! a parsed tree would reformat expressions, frontmatter and whitespace. The
//! patcher only uses the parse to learn where each `<img>` starts and which
//! classes enclose it, then rewrites the bytes of that one tag.
//!
//! ## Idempotent by Construction
//!
//! A tag that already has `srcset` is never patched. Desktop and mobile
//! variants are written once and kept. Recompression only replaces a file
//! with a strictly smaller one. Re-running any command on its own output
//! changes nothing, so the tool can sit in a build script.
//!
//! ## WebP Only
//!
//! Every generated file is lossy WebP at a fixed quality (65 unless a profile
//! overrides it). JPEG and PNG uploads get a WebP sibling, and their `src` is
//! rewritten to it.

pub mod config;
pub mod discover;
pub mod imaging;
pub mod markup;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod profile;
pub mod report;
pub mod variants;
