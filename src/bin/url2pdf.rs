//! CLI binary for edgequake-url2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and writes the PDF.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_url2pdf::{check_url, ConversionConfig, Converter, RenderConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert to file
  url2pdf https://example.com/report -o report.pdf

  # Write the PDF to stdout
  url2pdf https://example.com/report > report.pdf

  # Skip the headless browser (static fetch only)
  url2pdf --no-browser https://example.com/report -o report.pdf

  # Check a URL against the safety policy without fetching it
  url2pdf --check-only http://169.254.169.254/latest/meta-data

  # Conversion stats as JSON on stdout (PDF goes to -o)
  url2pdf --json https://example.com/report -o report.pdf

ENVIRONMENT VARIABLES:
  URL2PDF_FETCH_TIMEOUT          Static fetch timeout (seconds)
  URL2PDF_NAVIGATION_TIMEOUT_MS  Browser navigation timeout
  URL2PDF_IMAGE_TIMEOUT          Image download timeout (seconds)
  URL2PDF_MAX_IMAGE_SIZE         Image size ceiling (bytes)
  URL2PDF_BLOCKED_HOSTS          Comma-separated blocked hosts
  URL2PDF_BLOCKED_CIDRS          Comma-separated blocked CIDR ranges
  URL2PDF_USE_BROWSER            true/false
  URL2PDF_CHROME_PATH            Chrome/Chromium binary
  URL2PDF_PAGE_MARGIN            Page margin (e.g. 2cm, 15mm, 0.5in)
  RUST_LOG                       Log filter (overrides -v/-q)

  Every URL2PDF_* variable is read first; flags given on the command line
  override it.
"#;

/// Convert web pages to PDF.
#[derive(Parser, Debug)]
#[command(
    name = "url2pdf",
    version,
    about = "Convert web pages to PDF",
    long_about = "Fetch a web page (headless Chrome first, plain HTTP as fallback), reduce it to \
renderer-safe HTML, and print it to PDF. Internal and cloud-metadata addresses are refused \
before any network access.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// HTTP/HTTPS URL of the page.
    url: String,

    /// Write the PDF to this file instead of stdout.
    #[arg(short, long, env = "URL2PDF_OUTPUT")]
    output: Option<PathBuf>,

    /// Static fetch only; never launch a browser.
    #[arg(long)]
    no_browser: bool,

    /// Run Chrome without its sandbox (containers running as root).
    #[arg(long, env = "URL2PDF_NO_SANDBOX")]
    no_sandbox: bool,

    /// Chrome/Chromium binary to launch.
    #[arg(long)]
    chrome_path: Option<PathBuf>,

    /// Static fetch timeout in seconds.
    #[arg(long)]
    fetch_timeout: Option<u64>,

    /// Image download timeout in seconds.
    #[arg(long)]
    image_timeout: Option<u64>,

    /// Image size ceiling in bytes.
    #[arg(long)]
    max_image_size: Option<u64>,

    /// Page margin in centimetres.
    #[arg(long)]
    margin: Option<f64>,

    /// Font family forced on the whole document.
    #[arg(long)]
    font: Option<String>,

    /// Validate the URL against the safety policy and exit.
    #[arg(long)]
    check_only: bool,

    /// Print conversion stats as JSON on stdout (requires --output).
    #[arg(long, requires = "output")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "URL2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "URL2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "URL2PDF_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs; verbose mode gets everything.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.check_only && io::stderr().is_terminal();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    // ── Check-only mode ──────────────────────────────────────────────────
    if cli.check_only {
        return match check_url(&cli.url, &config) {
            Ok(target) => {
                if !cli.quiet {
                    println!("{}  {}", green("✔"), target);
                }
                Ok(())
            }
            Err(e) => {
                eprintln!("{}  {} ({})", red("✘"), e, e.category().as_str());
                std::process::exit(2);
            }
        };
    }

    // ── Run conversion ───────────────────────────────────────────────────
    let spinner = show_progress.then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Converting");
        bar.set_message(cli.url.clone());
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let converter = Converter::new(config).context("Failed to set up converter")?;
    let result = converter.convert_url(&cli.url).await;

    if let Some(bar) = &spinner {
        bar.finish_and_clear();
    }
    let output = match result {
        Ok(output) => output,
        Err(e) => {
            eprintln!("{}  {} ({})", red("✘"), e, e.category().as_str());
            std::process::exit(1);
        }
    };

    if let Some(ref output_path) = cli.output {
        edgequake_url2pdf::write_atomic(output_path, &output.pdf)
            .await
            .context("Failed to write PDF")?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&output.stats).context("Failed to serialise stats")?;
            println!("{json}");
        }
        if !cli.quiet {
            eprintln!(
                "{}  {} bytes via {}  {}ms  →  {}",
                green("✔"),
                output.stats.pdf_bytes,
                output
                    .stats
                    .origin
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "-".into()),
                output.stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(&output.pdf)
            .and_then(|_| handle.flush())
            .context("Failed to write to stdout")?;
    }

    if !cli.quiet {
        let s = &output.stats;
        eprintln!(
            "   {} image(s) embedded  /  {} skipped  /  fetch {}ms, render {}ms",
            dim(&s.images_resolved.to_string()),
            dim(&s.images_failed.to_string()),
            s.fetch_duration_ms,
            s.render_duration_ms,
        );
    }

    Ok(())
}

/// `URL2PDF_*` environment first, then CLI flags on top.
fn build_config(cli: &Cli) -> Result<ConversionConfig> {
    let base = ConversionConfig::from_env().context("Invalid URL2PDF_* environment")?;
    let mut render: RenderConfig = base.render.clone();
    if let Some(margin) = cli.margin {
        render.page_margin_cm = margin;
    }
    if let Some(ref font) = cli.font {
        render.font_family = font.clone();
    }

    let mut builder = base.to_builder().render(render);
    if cli.no_browser {
        builder = builder.use_browser(false);
    }
    if cli.no_sandbox {
        builder = builder.browser_sandbox(false);
    }
    if let Some(ref path) = cli.chrome_path {
        builder = builder.chrome_path(path.clone());
    }
    if let Some(secs) = cli.fetch_timeout {
        builder = builder.fetch_timeout_secs(secs);
    }
    if let Some(secs) = cli.image_timeout {
        builder = builder.image_timeout_secs(secs);
    }
    if let Some(bytes) = cli.max_image_size {
        builder = builder.max_image_bytes(bytes);
    }

    builder.build().context("Invalid configuration")
}
