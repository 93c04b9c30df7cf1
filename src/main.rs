use clap::{Parser, Subcommand};
use srcsetter::config::{self, SrcsetterConfig};
use srcsetter::imaging::RustBackend;
use srcsetter::output;
use srcsetter::pipeline::{self, Runner, Stages};
use srcsetter::report::BatchReport;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides `-v` with a full filter directive.
const LOG_ENV: &str = "SRCSETTER_LOG";

#[derive(Parser)]
#[command(name = "srcsetter")]
#[command(about = "Responsive WebP variants and srcset/sizes patching for page templates")]
#[command(long_about = "\
Responsive WebP variants and srcset/sizes patching for page templates

A manifest in srcsetter.toml assigns uploaded images to named profiles. Each
profile says which WebP variants an image needs and what srcset/sizes the
<img> tag should carry:

  public/uploads/2023/07/goku.webp            # the upload (base role)
  public/uploads/2023/07/goku-desktop.webp    # generated desktop variant

  <div class=\"personaje8\">
    <img src=\"/uploads/2023/07/goku.webp\"
         srcset=\"/uploads/2023/07/goku-desktop.webp 125w, /uploads/2023/07/goku.webp 200w\"
         sizes=\"(max-width: 900px) 200px, 125px\">
  </div>

JPEG and PNG uploads get a WebP sibling and their src is rewritten to it.
Every command is safe to re-run: present variants are kept and patched tags
are left alone.

Run 'srcsetter gen-config' to generate a documented srcsetter.toml.")]
#[command(version)]
struct Cli {
    /// Config file (default: ./srcsetter.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Uploads root, overrides `uploads_dir`
    #[arg(long, global = true)]
    uploads: Option<PathBuf>,

    /// Page templates root, overrides `pages_dir`
    #[arg(long, global = true)]
    pages: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

/// Shared flags for commands that write files.
#[derive(clap::Args, Clone)]
struct WriteArgs {
    /// Rewrite desktop/mobile variants even if they exist
    #[arg(long)]
    force: bool,

    /// Compute everything, write neither images nor documents
    #[arg(long)]
    dry_run: bool,

    /// Write one JSON object per event to this file
    #[arg(long, value_name = "PATH")]
    json_report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate variants, then patch, fix and promote every manifest page
    Run(WriteArgs),
    /// Generate variants only
    Generate(WriteArgs),
    /// Patch markup for images whose variants exist
    Patch(WriteArgs),
    /// Apply the manifest's fix rules only
    Fix(WriteArgs),
    /// Apply the LCP promotion only
    Promote(WriteArgs),
    /// Delete the variant roles listed under `prune`
    Prune(WriteArgs),
    /// List registered profiles
    Profiles,
    /// Validate config and manifest without writing anything
    Check,
    /// Print a stock srcsetter.toml with all options documented
    GenConfig,
}

fn verbosity_to_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(verbosity_to_directive(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::load_config(cli.config.as_deref())?;
    let registry = config.registry()?;

    let (stages, args) = match &cli.command {
        Command::Run(args) => (Some(Stages::ALL), args),
        Command::Generate(args) => (Some(Stages::GENERATE), args),
        Command::Patch(args) => (Some(Stages::PATCH), args),
        Command::Fix(args) => (Some(Stages::FIX), args),
        Command::Promote(args) => (Some(Stages::PROMOTE), args),
        Command::Prune(args) => (None, args),
        Command::Profiles => {
            output::print_profiles(&registry, config.encoding.quality.value());
            return Ok(());
        }
        Command::Check => {
            let backend = RustBackend::new();
            let report = runner(&cli, &backend, &config, &registry).check()?;
            output::print_run_report(&report);
            return finish(&report, None);
        }
        Command::GenConfig => return Ok(()),
    };

    let backend = RustBackend::new();
    let runner = runner(&cli, &backend, &config, &registry)
        .force(args.force)
        .dry_run(args.dry_run);
    let report = match stages {
        Some(stages) => runner.run(stages)?,
        None => runner.prune()?,
    };
    output::print_run_report(&report);
    finish(&report, args.json_report.as_deref())
}

fn runner<'a>(
    cli: &Cli,
    backend: &'a RustBackend,
    config: &'a SrcsetterConfig,
    registry: &'a srcsetter::profile::ProfileRegistry,
) -> Runner<'a, RustBackend> {
    let mut runner = Runner::new(backend, config, registry);
    if let Some(dir) = &cli.uploads {
        runner = runner.uploads(dir);
    }
    if let Some(dir) = &cli.pages {
        runner = runner.pages(dir);
    }
    runner
}

/// Write the JSON report if requested; fail the process if anything failed.
fn finish(
    report: &BatchReport,
    json_report: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = json_report {
        pipeline::write_json_report(report, path)?;
    }
    let errors = report.errors().len();
    if errors > 0 {
        return Err(format!("{errors} error(s), see above").into());
    }
    Ok(())
}
