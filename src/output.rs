//! CLI output formatting.
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects. Logs go to stderr through
//! `tracing`; only these lines go to stdout.
//!
//! ## Run
//!
//! ```text
//! 2023/07/goku-desktop.webp: created (5.0 KB)
//! 2023/07/goku.webp: skipped
//! 2023/07/goku.webp: recompressed 4.88 MB -> 1.2 KB
//! anime/dragon-ball.astro: patched (3 changes)
//! anime/dragon-ball.astro: no <img> for 2023/07/vegeta.webp in container:personaje8
//!
//! Images: 3 found, 2 processed, 1 skipped, 0 failed
//! Variants: 4 created, 1 regenerated
//! Recompressed: 4.88 MB -> 1.2 KB
//! Documents: 1 changed, 3 HTML changes
//! ```
//!
//! ## Profiles
//!
//! ```text
//! elemento-categorias
//!     desktop 356w {base}-desktop.webp
//!     base 437w {base}.webp
//!     sizes: (max-width: 900px) 437px, 356px
//! ```

use crate::profile::{Profile, ProfileRegistry};
use crate::report::{BatchReport, RunEvent};
use crate::variants::VariantStatus;

/// Human-readable byte count: `B`, `KB` with one decimal, `MB` with two.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    }
}

/// One display line for a run event.
pub fn format_event(event: &RunEvent) -> String {
    match event {
        RunEvent::Variant {
            path,
            status,
            bytes,
            upscale_avoided,
        } => {
            let mut line = format!("{path}: {}", status.as_str());
            if *status != VariantStatus::Skipped {
                if let Some(b) = bytes {
                    line.push_str(&format!(" ({})", format_bytes(*b)));
                }
            }
            if *upscale_avoided {
                line.push_str(", kept source width");
            }
            line
        }
        RunEvent::Recompressed {
            path,
            before,
            after,
            replaced: true,
        } => format!(
            "{path}: recompressed {} -> {}",
            format_bytes(*before),
            format_bytes(*after)
        ),
        RunEvent::Recompressed { path, .. } => {
            format!("{path}: kept, recompressed file was not smaller")
        }
        RunEvent::Pruned { path, removed } => format!("{path}: pruned {removed} variant(s)"),
        RunEvent::Document { path, changes, .. } => match changes {
            0 => format!("{path}: unchanged"),
            1 => format!("{path}: patched (1 change)"),
            n => format!("{path}: patched ({n} changes)"),
        },
        RunEvent::NoMatchingTag {
            page,
            asset,
            context,
        } => format!("{page}: no <img> for {asset} in {context}"),
        RunEvent::MalformedTag { page, message } => format!("{page}: {message}"),
        RunEvent::ContextUnavailable { page, context } => {
            format!("{page}: {context} skipped, document could not be parsed")
        }
        RunEvent::Failed { path, error } => format!("{path}: FAILED {error}"),
    }
}

/// Event lines followed by the summary.
pub fn format_run_report(report: &BatchReport) -> Vec<String> {
    let mut lines: Vec<String> = report.events.iter().map(format_event).collect();
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.extend(format_summary(report));
    lines
}

/// Aggregate counters and the error list.
pub fn format_summary(report: &BatchReport) -> Vec<String> {
    let mut lines = Vec::new();
    if report.images_found > 0 {
        lines.push(format!(
            "Images: {} found, {} processed, {} skipped, {} failed",
            report.images_found, report.images_processed, report.images_skipped, report.images_failed
        ));
    }
    if report.variants_created + report.variants_regenerated > 0 {
        lines.push(format!(
            "Variants: {} created, {} regenerated",
            report.variants_created, report.variants_regenerated
        ));
    }
    if report.bytes_before > 0 {
        lines.push(format!(
            "Recompressed: {} -> {}",
            format_bytes(report.bytes_before),
            format_bytes(report.bytes_after)
        ));
    }
    let documents = report
        .events
        .iter()
        .filter(|e| matches!(e, RunEvent::Document { .. }))
        .count();
    if documents > 0 {
        lines.push(format!(
            "Documents: {} changed, {} HTML changes",
            report.documents_changed, report.html_changes
        ));
    }
    if report.files_pruned > 0 {
        lines.push(format!("Pruned: {} files", report.files_pruned));
    }
    if lines.is_empty() {
        lines.push("Nothing to do".to_string());
    }

    let errors = report.errors();
    if !errors.is_empty() {
        lines.push(format!("Errors ({})", errors.len()));
        for (path, error) in errors {
            lines.push(format!("    {path}: {error}"));
        }
    }
    if report.dry_run {
        lines.push("Dry run: no files were written".to_string());
    }
    lines
}

pub fn print_run_report(report: &BatchReport) {
    for line in format_run_report(report) {
        println!("{}", line);
    }
}

fn format_profile(profile: &Profile, default_quality: u32) -> Vec<String> {
    let mut lines = vec![profile.name.clone()];
    for c in &profile.candidates {
        lines.push(format!("    {} {}w {}", c.role, c.width, c.template));
    }
    lines.push(format!("    sizes: {}", profile.sizes));
    match profile.quality {
        Some(q) => lines.push(format!("    quality: {}", q.value())),
        None => lines.push(format!("    quality: {default_quality} (default)")),
    }
    lines
}

/// Every registered profile, sorted by name.
pub fn format_profiles(registry: &ProfileRegistry, default_quality: u32) -> Vec<String> {
    registry
        .iter()
        .flat_map(|p| format_profile(p, default_quality))
        .collect()
}

pub fn print_profiles(registry: &ProfileRegistry, default_quality: u32) {
    for line in format_profiles(registry, default_quality) {
        println!("{}", line);
    }
}
