//! End-to-end runs over real images: synthetic JPEG/WebP uploads, a page
//! tree and a manifest parsed from TOML, processed by `RustBackend`.

use srcsetter::config::{SrcsetterConfig, resolve_config, stock_defaults_value};
use srcsetter::imaging::RustBackend;
use srcsetter::pipeline::{Runner, Stages};
use srcsetter::profile::ProfileRegistry;
use srcsetter::report::RunEvent;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Site {
    _tmp: TempDir,
    uploads: PathBuf,
    pages: PathBuf,
}

impl Site {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let uploads = tmp.path().join("public/uploads");
        let pages = tmp.path().join("src/pages");
        fs::create_dir_all(&uploads).unwrap();
        fs::create_dir_all(&pages).unwrap();
        Self {
            _tmp: tmp,
            uploads,
            pages,
        }
    }

    fn upload(&self, rel: &str) -> PathBuf {
        let path = self.uploads.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        path
    }

    fn page(&self, rel: &str, html: &str) {
        let path = self.pages.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, html).unwrap();
    }

    fn read_page(&self, rel: &str) -> String {
        fs::read_to_string(self.pages.join(rel)).unwrap()
    }

    fn width_of(&self, rel: &str) -> u32 {
        image::image_dimensions(self.uploads.join(rel)).unwrap().0
    }
}

fn gradient(width: u32, height: u32) -> image::RgbImage {
    image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
    })
}

fn write_jpeg(path: &Path, width: u32, height: u32) {
    gradient(width, height).save(path).unwrap();
}

fn write_webp(path: &Path, width: u32, height: u32, quality: f32) {
    let rgba = image::DynamicImage::ImageRgb8(gradient(width, height)).to_rgba8();
    let encoded = webp::Encoder::from_rgba(rgba.as_raw(), width, height).encode(quality);
    fs::write(path, &*encoded).unwrap();
}

fn config(manifest: &str) -> SrcsetterConfig {
    let overlay: toml::Value = toml::from_str(manifest).unwrap();
    resolve_config(stock_defaults_value().unwrap(), Some(overlay)).unwrap()
}

fn runner<'a>(
    site: &Site,
    backend: &'a RustBackend,
    config: &'a SrcsetterConfig,
    registry: &'a ProfileRegistry,
) -> Runner<'a, RustBackend> {
    Runner::new(backend, config, registry)
        .uploads(&site.uploads)
        .pages(&site.pages)
}

// =========================================================================
// Legacy JPEG through elemento-categorias
// =========================================================================

#[test]
fn legacy_jpeg_gets_webp_variants_and_patched_tag() {
    let site = Site::new();
    write_jpeg(&site.upload("2022/04/x.jpg"), 800, 600);
    site.page(
        "categorias.astro",
        "<section class=\"elemento-categorias\">\n  <img src=\"/uploads/2022/04/x.jpg\">\n</section>\n",
    );
    let config = config(
        r#"
        [[pages]]
        path = "categorias.astro"

        [[pages.galleries]]
        context = "container:elemento-categorias"
        profile = "elemento-categorias"
        images = ["2022/04/x.jpg"]
        "#,
    );
    let registry = config.registry().unwrap();
    let backend = RustBackend::new();

    let report = runner(&site, &backend, &config, &registry)
        .run(Stages::ALL)
        .unwrap();

    assert!(!report.has_errors(), "{:?}", report.errors());
    assert_eq!(site.width_of("2022/04/x.webp"), 437);
    assert_eq!(site.width_of("2022/04/x-desktop.webp"), 356);
    assert!(site.uploads.join("2022/04/x.jpg").is_file());
    assert_eq!(
        site.read_page("categorias.astro"),
        "<section class=\"elemento-categorias\">\n  <img src=\"/uploads/2022/04/x.webp\" srcset=\"/uploads/2022/04/x-desktop.webp 356w, /uploads/2022/04/x.webp 437w\" sizes=\"(max-width: 900px) 437px, 356px\">\n</section>\n"
    );
    assert!(!site.uploads.join("2022/04/x-temp.webp").exists());
}

#[test]
fn rerun_changes_no_markup_and_keeps_cached_variants() {
    let site = Site::new();
    write_webp(&site.upload("2023/07/goku.webp"), 400, 400, 80.0);
    site.page(
        "anime/dragon-ball.astro",
        r#"<div class="personaje8"><img src="/uploads/2023/07/goku.webp" alt="Goku"></div>"#,
    );
    let config = config(
        r#"
        [[pages]]
        path = "*"

        [[pages.galleries]]
        context = "container:personaje8"
        profile = "personaje8"
        images = ["2023/07/goku.webp"]
        "#,
    );
    let registry = config.registry().unwrap();
    let backend = RustBackend::new();
    let runner = runner(&site, &backend, &config, &registry);

    let first = runner.run(Stages::ALL).unwrap();
    assert_eq!(first.variants_created, 1);
    assert_eq!(first.html_changes, 1);
    let page = site.read_page("anime/dragon-ball.astro");
    let desktop = fs::read(site.uploads.join("2023/07/goku-desktop.webp")).unwrap();

    let second = runner.run(Stages::ALL).unwrap();
    assert_eq!(second.variants_created, 0);
    assert_eq!(second.images_skipped, 1);
    assert_eq!(second.html_changes, 0);
    assert!(
        !second
            .events
            .iter()
            .any(|e| matches!(e, RunEvent::NoMatchingTag { .. }))
    );
    assert_eq!(site.read_page("anime/dragon-ball.astro"), page);
    assert_eq!(
        fs::read(site.uploads.join("2023/07/goku-desktop.webp")).unwrap(),
        desktop
    );
}

// =========================================================================
// Scoping
// =========================================================================

#[test]
fn same_image_in_two_contexts_only_assigned_one_changes() {
    let site = Site::new();
    write_webp(&site.upload("2023/07/goku.webp"), 600, 600, 80.0);
    let html = r#"<div class="elemento-categorias"><img src="/uploads/2023/07/goku.webp"></div>
<div class="personaje8"><img src="/uploads/2023/07/goku.webp"></div>
"#;
    site.page("index.html", html);
    let config = config(
        r#"
        [[pages]]
        path = "index.html"

        [[pages.galleries]]
        context = "container:elemento-categorias"
        profile = "elemento-categorias"
        "#,
    );
    let registry = config.registry().unwrap();
    let backend = RustBackend::new();

    runner(&site, &backend, &config, &registry)
        .run(Stages::ALL)
        .unwrap();

    let patched = site.read_page("index.html");
    assert!(patched.contains(r#"<div class="personaje8"><img src="/uploads/2023/07/goku.webp"></div>"#));
    assert_eq!(patched.matches("srcset=").count(), 1);
    assert!(patched.contains("goku-desktop.webp 356w"));
}

// =========================================================================
// Recompression
// =========================================================================

#[test]
fn recompression_shrinks_oversized_source() {
    let site = Site::new();
    let source = site.upload("2024/01/banner.webp");
    write_webp(&source, 1600, 900, 100.0);
    let before = fs::metadata(&source).unwrap().len();
    site.page("p.astro", r#"<div class="personaje8"><img src="/uploads/2024/01/banner.webp"></div>"#);
    let config = config(
        r#"
        [[pages]]
        path = "p.astro"

        [[pages.galleries]]
        context = "container:personaje8"
        profile = "personaje8"
        recompress = true
        "#,
    );
    let registry = config.registry().unwrap();
    let backend = RustBackend::new();

    let report = runner(&site, &backend, &config, &registry)
        .run(Stages::GENERATE)
        .unwrap();

    let after = fs::metadata(&source).unwrap().len();
    assert!(after < before);
    assert_eq!((report.bytes_before, report.bytes_after), (before, after));
    assert_eq!(site.width_of("2024/01/banner.webp"), 200);
    assert!(!site.uploads.join("2024/01/banner-compressed.webp").exists());
}

#[test]
fn recompression_never_grows_a_file() {
    let site = Site::new();
    let source = site.upload("2024/01/tiny.webp");
    write_webp(&source, 40, 40, 5.0);
    let before = fs::read(&source).unwrap();
    site.page("p.astro", r#"<div class="personaje8"><img src="/uploads/2024/01/tiny.webp"></div>"#);
    let config = config(
        r#"
        [[pages]]
        path = "p.astro"

        [[pages.galleries]]
        context = "container:personaje8"
        profile = "personaje8"
        recompress = true
        "#,
    );
    let registry = config.registry().unwrap();
    let backend = RustBackend::new();

    runner(&site, &backend, &config, &registry)
        .run(Stages::GENERATE)
        .unwrap();

    let after = fs::read(&source).unwrap();
    assert!(after.len() <= before.len());
    if after.len() == before.len() {
        assert_eq!(after, before);
    }
}

// =========================================================================
// Fix and promote
// =========================================================================

#[test]
fn fix_and_promote_preview_listing() {
    let site = Site::new();
    site.page(
        "index.astro",
        r#"<ul>
  <li><img class="wv-preview-image" src="/uploads/2024/05/luffy.webp" srcset="/uploads/2024/05/luffy-mobile.webp 640w, /uploads/2024/05/luffy.webp 1080w" sizes="(max-width: 850px) 100vw, 1080px" loading="lazy"></li>
  <li><img class="wv-preview-image" src="/uploads/2024/05/zoro.webp" loading="lazy"></li>
</ul>
"#,
    );
    let config = config(
        r#"
        [[pages]]
        path = "index.astro"
        promote = "img-class:wv-preview-image"

        [[pages.fixes]]
        context = "img-class:wv-preview-image"
        from = "preview-legacy"
        to = "preview"
        "#,
    );
    let registry = config.registry().unwrap();
    let backend = RustBackend::new();

    let report = runner(&site, &backend, &config, &registry)
        .run(Stages::ALL)
        .unwrap();

    assert_eq!(report.html_changes, 2);
    assert_eq!(
        site.read_page("index.astro"),
        r#"<ul>
  <li><img class="wv-preview-image" src="/uploads/2024/05/luffy.webp" fetchpriority="high" srcset="/uploads/2024/05/luffy-mobile.webp 651w, /uploads/2024/05/luffy.webp 1000w" sizes="(max-width: 850px) 240px, 1000px"></li>
  <li><img class="wv-preview-image" src="/uploads/2024/05/zoro.webp" loading="lazy"></li>
</ul>
"#
    );
}

// =========================================================================
// Failures and reporting
// =========================================================================

#[test]
fn corrupt_upload_fails_alone_and_leaves_no_partial_files() {
    let site = Site::new();
    fs::write(site.upload("a/broken.webp"), b"not a webp").unwrap();
    write_webp(&site.upload("a/good.webp"), 300, 300, 80.0);
    site.page(
        "p.astro",
        r#"<div class="personaje8"><img src="/uploads/a/broken.webp"><img src="/uploads/a/good.webp"></div>"#,
    );
    let config = config(
        r#"
        [[pages]]
        path = "p.astro"

        [[pages.galleries]]
        context = "container:personaje8"
        profile = "personaje8"
        "#,
    );
    let registry = config.registry().unwrap();
    let backend = RustBackend::new();

    let report = runner(&site, &backend, &config, &registry)
        .run(Stages::ALL)
        .unwrap();

    assert_eq!(report.images_failed, 1);
    assert_eq!(report.errors()[0].0, "a/broken.webp");
    assert!(!site.uploads.join("a/broken-desktop.webp").exists());
    assert!(!site.uploads.join("a/broken-temp.webp").exists());
    assert!(site.uploads.join("a/good-desktop.webp").is_file());
    let html = site.read_page("p.astro");
    assert!(html.contains(r#"<img src="/uploads/a/broken.webp">"#));
    assert!(html.contains("/uploads/a/good-desktop.webp 125w"));
}

#[test]
fn json_report_has_one_line_per_event() {
    let site = Site::new();
    write_webp(&site.upload("a/b.webp"), 300, 300, 80.0);
    site.page("p.astro", r#"<div class="personaje8"><img src="/uploads/a/b.webp"></div>"#);
    let config = config(
        r#"
        [[pages]]
        path = "p.astro"

        [[pages.galleries]]
        context = "container:personaje8"
        profile = "personaje8"
        "#,
    );
    let registry = config.registry().unwrap();
    let backend = RustBackend::new();
    let report = runner(&site, &backend, &config, &registry)
        .run(Stages::ALL)
        .unwrap();

    let path = site.pages.join("report.jsonl");
    srcsetter::pipeline::write_json_report(&report, &path).unwrap();
    let lines: Vec<serde_json::Value> = fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(lines.len(), report.events.len());
    let statuses: Vec<_> = lines.iter().map(|l| l["status"].as_str().unwrap()).collect();
    assert_eq!(statuses, vec!["skipped", "created", "patched"]);
    assert_eq!(lines[1]["path"], "a/b-desktop.webp");
    assert!(lines[1]["after"].as_u64().unwrap() > 0);
}
