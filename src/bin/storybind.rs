//! CLI binary for storybind.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AssemblyConfig`, picks a sink and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storybind::{
    assemble_story, parse_story_id, AssemblyConfig, AssemblyOutput, AssemblyProgressCallback, DocumentSink,
    EbookProfile, EbookSink, Fetcher, HtmlSink, HttpFetcher, PdfSink, ProgressCallback, Stage, StoryClient,
    DEFAULT_GROUP_SIZE,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar, reset at the start of each stage.
/// Items inside a group complete out of order, so the bar only counts.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Fetching story info…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn activate_bar(&self, stage: Stage, total: usize) {
        let style = ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  \
             [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {stage}  \
             ⏱ {{elapsed_precise}}  {{msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix(match stage {
            Stage::Parts => "Downloading",
            Stage::Images => "Localizing",
        });
        self.bar.reset_eta();
    }

    fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl AssemblyProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage, total_items: usize) {
        self.activate_bar(stage, total_items);
    }

    fn on_group_start(&self, _stage: Stage, group_index: usize, group_count: usize, _item_count: usize) {
        self.bar.set_message(format!("group {}/{}", group_index + 1, group_count));
    }

    fn on_item_complete(&self, _stage: Stage, _item_index: usize) {
        self.bar.inc(1);
    }

    fn on_image_error(&self, remote_url: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), dim(remote_url), red(&msg)));
    }

    fn on_stage_complete(&self, stage: Stage, total_items: usize, succeeded: usize) {
        let failed = total_items.saturating_sub(succeeded);
        self.bar.println(if failed == 0 {
            format!("{} {} {} done", green("✔"), bold(&succeeded.to_string()), stage)
        } else {
            format!(
                "{} {}/{} {}  ({} failed)",
                yellow("⚠"),
                bold(&succeeded.to_string()),
                total_items,
                stage,
                red(&failed.to_string())
            )
        });
        self.bar.set_message("");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Single HTML page (remote images stay remote)
  storybind 292169908

  # EPUB with every image downloaded and embedded
  storybind 292169908-the-long-way-home --format epub -o long-way-home.epub

  # A story URL works too
  storybind https://www.wattpad.com/story/292169908-the-long-way-home --format pdf

  # Gentler on the server: 4 requests at a time
  storybind 292169908 --group-size 4

  # Machine-readable report on stdout
  storybind 292169908 --json --no-progress

FORMATS:
  html   single page, no external tools
  pdf    A4, requires wkhtmltopdf in PATH
  epub   EPUB 2 with embedded images, no external tools
  mobi   requires ebook-convert (calibre) in PATH

ENVIRONMENT VARIABLES:
  STORYBIND_FORMAT, STORYBIND_OUTPUT, STORYBIND_GROUP_SIZE, STORYBIND_IMAGES_DIR,
  STORYBIND_API_BASE, STORYBIND_TIMEOUT, STORYBIND_JSON, STORYBIND_NO_PROGRESS,
  STORYBIND_VERBOSE, STORYBIND_QUIET
  RUST_LOG overrides the log filter.
"#;

/// Download a serialized web story into a single HTML, PDF, EPUB or MOBI file.
#[derive(Parser, Debug)]
#[command(
    name = "storybind",
    version,
    about = "Download a serialized web story into one HTML, PDF, EPUB or MOBI file",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Story id (292169908), id with slug (292169908-title) or story URL.
    story: String,

    /// Output format.
    #[arg(short, long, env = "STORYBIND_FORMAT", value_enum, default_value = "html")]
    format: FormatArg,

    /// Output file. Defaults to output/output.<format>.
    #[arg(short, long, env = "STORYBIND_OUTPUT")]
    output: Option<PathBuf>,

    /// Parts (and images) fetched concurrently per group.
    #[arg(short, long, env = "STORYBIND_GROUP_SIZE", default_value_t = DEFAULT_GROUP_SIZE)]
    group_size: usize,

    /// Directory for downloaded images.
    #[arg(long, env = "STORYBIND_IMAGES_DIR", default_value = "output/images")]
    images_dir: PathBuf,

    /// Download images even for HTML and PDF output.
    #[arg(long)]
    localize_images: bool,

    /// Re-download images that already exist in the images directory.
    #[arg(long)]
    refresh_images: bool,

    /// Content API base URL.
    #[arg(long, env = "STORYBIND_API_BASE", default_value = storybind::story::DEFAULT_API_BASE)]
    api_base: String,

    /// Per-request timeout in seconds.
    #[arg(long, env = "STORYBIND_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Path to the HTML-to-PDF or EPUB-to-MOBI converter binary.
    #[arg(long)]
    converter: Option<PathBuf>,

    /// Print the assembly report as JSON on stdout.
    #[arg(long, env = "STORYBIND_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "STORYBIND_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "STORYBIND_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "STORYBIND_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Html,
    Pdf,
    Epub,
    Mobi,
}

impl FormatArg {
    fn extension(self) -> &'static str {
        match self {
            FormatArg::Html => "html",
            FormatArg::Pdf => "pdf",
            FormatArg::Epub => "epub",
            FormatArg::Mobi => "mobi",
        }
    }

    /// E-book sinks package images from the local filesystem.
    fn needs_local_images(self) -> bool {
        matches!(self, FormatArg::Epub | FormatArg::Mobi)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are suppressed while the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let started = Instant::now();
    let story_id = parse_story_id(&cli.story)?;

    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback))?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::from_config(&config)?);

    // ── Story metadata ───────────────────────────────────────────────────
    let story = match StoryClient::new(&cli.api_base)
        .fetch_story(fetcher.as_ref(), &story_id)
        .await
    {
        Ok(story) => story,
        Err(e) => {
            if let Some(p) = &progress {
                p.clear();
            }
            return Err(e).context("Failed to fetch story info");
        }
    };

    if !cli.quiet {
        let line = format!(
            "{} Download story: {}  {}",
            cyan("◆"),
            cyan(&story.title),
            dim(&format!("{} parts", story.parts.len()))
        );
        match &progress {
            Some(p) => p.bar.println(line),
            None => eprintln!("{line}"),
        }
    }
    if story.is_paywalled {
        tracing::warn!("'{}' is paywalled; locked parts may come back empty", story.title);
        if !cli.quiet {
            eprintln!("{} Story is paywalled: locked parts may be missing", yellow("⚠"));
        }
    }

    // ── Assemble ─────────────────────────────────────────────────────────
    let result = assemble_story(fetcher.as_ref(), &story, &config).await;
    let output = match result {
        Ok(output) => output,
        Err(e) => {
            if let Some(p) = &progress {
                p.clear();
            }
            return Err(e).context("Story download failed");
        }
    };

    // ── Write ────────────────────────────────────────────────────────────
    let path = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("output/output.{}", cli.format.extension())));
    let sink = build_sink(&cli, path, &story, Arc::clone(&fetcher));

    if let Some(p) = &progress {
        p.bar.set_prefix("Writing");
        p.bar.set_message(format!("{}…", sink.format_name()));
    }
    let written = sink.write(&output.document).await;
    if let Some(p) = &progress {
        p.clear();
    }
    let written = written.with_context(|| format!("Failed to generate {} file", sink.format_name()))?;

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise report")?;
        println!("{json}");
    }
    if !cli.quiet {
        print_summary(&output, &written, sink.format_name(), started.elapsed());
    }

    Ok(())
}

/// Map CLI args to `AssemblyConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AssemblyConfig> {
    let mut builder = AssemblyConfig::builder()
        .localize_images(cli.localize_images || cli.format.needs_local_images())
        // E-book chapters carry their own title heading.
        .wrap_part_heading(!cli.format.needs_local_images())
        .group_size(cli.group_size)
        .images_dir(&cli.images_dir)
        .reuse_existing_images(!cli.refresh_images)
        .request_timeout_secs(cli.timeout);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn build_sink(cli: &Cli, path: PathBuf, story: &storybind::StoryInfo, fetcher: Arc<dyn Fetcher>) -> Box<dyn DocumentSink> {
    match cli.format {
        FormatArg::Html => Box::new(HtmlSink::new(path)),
        FormatArg::Pdf => {
            let mut sink = PdfSink::new(path);
            if let Some(c) = &cli.converter {
                sink = sink.with_converter(c);
            }
            Box::new(sink)
        }
        FormatArg::Epub | FormatArg::Mobi => {
            let profile = if cli.format == FormatArg::Epub {
                EbookProfile::Epub
            } else {
                EbookProfile::Mobi
            };
            let mut sink = EbookSink::new(path, profile).with_cover_fetcher(fetcher);
            if let Some(author) = story.author() {
                sink = sink.with_author(author);
            }
            if let Some(c) = &cli.converter {
                sink = sink.with_converter(c);
            }
            Box::new(sink)
        }
    }
}

fn print_summary(output: &AssemblyOutput, written: &std::path::Path, format: &str, elapsed: Duration) {
    let stats = &output.stats;
    eprintln!(
        "{} Generated {} file  {}  →  {}",
        green("✔"),
        format.to_uppercase(),
        dim(&format!("{} parts", stats.total_parts)),
        bold(&written.display().to_string()),
    );
    if stats.distinct_images > 0 {
        eprintln!(
            "   {} images  ({} downloaded, {} reused, {} failed)",
            stats.distinct_images,
            stats.images_written,
            stats.images_reused,
            if stats.images_failed == 0 {
                "0".to_string()
            } else {
                red(&stats.images_failed.to_string())
            },
        );
    }
    for failure in &output.image_failures {
        eprintln!("   {} {}  {}", red("✗"), dim(&failure.remote_url), failure.error);
    }
    for warning in &output.warnings {
        eprintln!("   {} {}", yellow("⚠"), warning);
    }
    eprintln!("🎉 Story download took {:.1}s", elapsed.as_secs_f64());
}
