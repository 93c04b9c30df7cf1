//! Batch report: every event of a run plus aggregate counters.
//!
//! Events are kept in order so the CLI can print them and, with
//! `--json-report`, write one JSON object per event:
//!
//! ```text
//! {"path":"2023/07/goku-desktop.webp","status":"created","before":null,"after":5120,"error":null}
//! {"path":"anime/dragon-ball.astro","status":"patched","before":18211,"after":18597,"error":null}
//! ```

use crate::variants::VariantStatus;
use serde::Serialize;
use std::io::Write;

/// One thing that happened during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Variant {
        path: String,
        status: VariantStatus,
        bytes: Option<u64>,
        upscale_avoided: bool,
    },
    Recompressed {
        path: String,
        before: u64,
        after: u64,
        replaced: bool,
    },
    Pruned {
        path: String,
        removed: usize,
    },
    Document {
        path: String,
        changes: usize,
        before: u64,
        after: u64,
    },
    NoMatchingTag {
        page: String,
        asset: String,
        context: String,
    },
    MalformedTag {
        page: String,
        message: String,
    },
    /// A container rule that could not run because the document did not parse.
    ContextUnavailable {
        page: String,
        context: String,
    },
    Failed {
        path: String,
        error: String,
    },
}

/// The JSON shape of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportLine {
    pub path: String,
    pub status: String,
    pub before: Option<u64>,
    pub after: Option<u64>,
    pub error: Option<String>,
}

impl RunEvent {
    pub fn status(&self) -> &'static str {
        match self {
            RunEvent::Variant { status, .. } => status.as_str(),
            RunEvent::Recompressed { replaced: true, .. } => "recompressed",
            RunEvent::Recompressed { replaced: false, .. } => "kept",
            RunEvent::Pruned { .. } => "pruned",
            RunEvent::Document { changes: 0, .. } => "unchanged",
            RunEvent::Document { .. } => "patched",
            RunEvent::NoMatchingTag { .. } => "no-matching-tag",
            RunEvent::MalformedTag { .. } => "malformed-tag",
            RunEvent::ContextUnavailable { .. } => "context-unavailable",
            RunEvent::Failed { .. } => "failed",
        }
    }

    pub fn to_line(&self) -> ReportLine {
        let status = self.status().to_string();
        let (path, before, after, error) = match self {
            RunEvent::Variant { path, bytes, .. } => (path.clone(), None, *bytes, None),
            RunEvent::Recompressed {
                path, before, after, ..
            } => (path.clone(), Some(*before), Some(*after), None),
            RunEvent::Pruned { path, .. } => (path.clone(), None, None, None),
            RunEvent::Document {
                path, before, after, ..
            } => (path.clone(), Some(*before), Some(*after), None),
            RunEvent::NoMatchingTag {
                page,
                asset,
                context,
            } => (
                page.clone(),
                None,
                None,
                Some(format!("no <img> for {asset} in {context}")),
            ),
            RunEvent::MalformedTag { page, message } => {
                (page.clone(), None, None, Some(message.clone()))
            }
            RunEvent::ContextUnavailable { page, context } => (
                page.clone(),
                None,
                None,
                Some(format!("{context} needs a parsed document")),
            ),
            RunEvent::Failed { path, error } => (path.clone(), None, None, Some(error.clone())),
        };
        ReportLine {
            path,
            status,
            before,
            after,
            error,
        }
    }
}

/// Counters and events of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Distinct (image, profile) pairs the manifest asked for.
    pub images_found: usize,
    /// Pairs where at least one file was written.
    pub images_processed: usize,
    /// Pairs where every variant was already present.
    pub images_skipped: usize,
    pub images_failed: usize,
    pub variants_created: usize,
    pub variants_regenerated: usize,
    /// Totals over recompressed assets.
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub documents_changed: usize,
    pub html_changes: usize,
    pub files_pruned: usize,
    pub dry_run: bool,
    pub events: Vec<RunEvent>,
}

impl BatchReport {
    pub fn push(&mut self, event: RunEvent) {
        match &event {
            RunEvent::Variant { status, .. } => match status {
                VariantStatus::Created => self.variants_created += 1,
                VariantStatus::Regenerated => self.variants_regenerated += 1,
                VariantStatus::Skipped => {}
            },
            RunEvent::Recompressed { before, after, .. } => {
                self.bytes_before += before;
                self.bytes_after += after;
            }
            RunEvent::Pruned { removed, .. } => self.files_pruned += removed,
            RunEvent::Document { changes, .. } => {
                if *changes > 0 {
                    self.documents_changed += 1;
                    self.html_changes += changes;
                }
            }
            _ => {}
        }
        self.events.push(event);
    }

    /// `(path, error)` for every failure, in run order.
    pub fn errors(&self) -> Vec<(&str, &str)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Failed { path, error } => Some((path.as_str(), error.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.images_failed > 0 || self.events.iter().any(|e| matches!(e, RunEvent::Failed { .. }))
    }

    /// Write every event as one JSON object per line.
    pub fn write_json_lines(&self, mut out: impl Write) -> Result<(), serde_json::Error> {
        for event in &self.events {
            serde_json::to_writer(&mut out, &event.to_line())?;
            out.write_all(b"\n").map_err(serde_json::Error::io)?;
        }
        out.flush().map_err(serde_json::Error::io)
    }
}
