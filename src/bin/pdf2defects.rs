//! CLI binary for edgequake-defects.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AnalysisConfig`, prints classified defects grouped by file and
//! optionally writes an Excel workbook.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_defects::{
    analyze_inputs, export, AnalysisConfig, AnalysisProgressCallback, BatchResult,
    Classification, ClassifiedDefectRecord, Confidence, DocumentStatus, ProgressCallback,
    ProgressEvent, RecordFilter, ResultSummary,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn blue(s: &str) -> String {
    format!("\x1b[34m{s}\x1b[0m")
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

const TICKS: &[&str] = &[
    "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿",
];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar over documents plus a log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Analysing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, document_count: usize) {
        self.bar.set_length(document_count as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analysing {document_count} documents…"))
        ));
    }

    fn on_document_start(&self, document_index: usize, document_count: usize, filename: &str) {
        self.bar
            .set_message(format!("{filename} ({document_index}/{document_count}) rendering…"));
    }

    fn on_page_complete(&self, event: &ProgressEvent) {
        self.bar.set_message(format!(
            "page {}/{} of document {}",
            event.page_index, event.page_count, event.document_index
        ));
        self.bar.println(format!("  {} {}", green("✓"), dim(&event.status)));
    }

    fn on_document_complete(&self, event: &ProgressEvent) {
        self.bar.println(format!("{} {}", cyan("▸"), event.status));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, document_count: usize, record_count: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} defects from {} documents",
            green("✔"),
            bold(&record_count.to_string()),
            document_count
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse one report, print defects grouped by file
  pdf2defects inspection.pdf

  # Several reports, Excel workbook with an automatic name
  pdf2defects tuev_2024.pdf dekra_2024.pdf --xlsx

  # Only site-related defects, high confidence, to a named workbook
  pdf2defects --classification site --confidence high --xlsx site.xlsx *.pdf

  # JSON records on stdout
  pdf2defects --json report.pdf > defects.json

  # Four calls in flight, Anthropic model
  pdf2defects -c 4 --provider anthropic --model claude-sonnet-4-20250514 report.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Extract and classify defects from lift inspection reports.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2defects",
    version,
    about = "Extract and classify defects from lift inspection reports using Vision LLMs",
    long_about = "Reads every page of one or more inspection reports (local files or URLs) with a \
Vision Language Model, extracts each listed defect and classifies it as site-related (building, \
shaft, power supply) or equipment-related (the lift and its documentation), with an English \
translation.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file paths or HTTP/HTTPS URLs.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// Write an Excel workbook. Without a value the name is
    /// inspection_analysis_<timestamp>.xlsx.
    #[arg(long, num_args = 0..=1, value_name = "PATH")]
    xlsx: Option<Option<PathBuf>>,

    /// Print the records as JSON on stdout instead of a table.
    #[arg(long, env = "PDF2DEFECTS_JSON")]
    json: bool,

    /// Print reasoning for each defect.
    #[arg(long)]
    details: bool,

    /// LLM model ID (default gpt-4o).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Maximum reasoning-service calls in flight.
    #[arg(short, long, env = "PDF2DEFECTS_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Retries per call on transient service failure.
    #[arg(long, env = "PDF2DEFECTS_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call service timeout in seconds.
    #[arg(long, env = "PDF2DEFECTS_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2DEFECTS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2DEFECTS_PASSWORD")]
    password: Option<String>,

    /// Show only these classifications (comma-separated).
    #[arg(long, value_enum, value_delimiter = ',')]
    classification: Vec<ClassificationArg>,

    /// Show only these confidence levels (comma-separated).
    #[arg(long, value_enum, value_delimiter = ',')]
    confidence: Vec<ConfidenceArg>,

    /// Disable progress bar.
    #[arg(long, env = "PDF2DEFECTS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2DEFECTS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, env = "PDF2DEFECTS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ClassificationArg {
    Site,
    Equipment,
    Unclassified,
    Error,
}

impl From<ClassificationArg> for Classification {
    fn from(v: ClassificationArg) -> Self {
        match v {
            ClassificationArg::Site => Classification::SiteRelated,
            ClassificationArg::Equipment => Classification::EquipmentRelated,
            ClassificationArg::Unclassified => Classification::Unclassified,
            ClassificationArg::Error => Classification::ClassificationError,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ConfidenceArg {
    High,
    Medium,
    Low,
}

impl From<ConfidenceArg> for Confidence {
    fn from(v: ConfidenceArg) -> Self {
        match v {
            ConfidenceArg::High => Confidence::High,
            ConfidenceArg::Medium => Confidence::Medium,
            ConfidenceArg::Low => Confidence::Low,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Load inputs and run (unreadable inputs fail only themselves) ──────
    let result = analyze_inputs(&cli.inputs, &config)
        .await
        .context("Analysis failed")?;

    // ── Present ──────────────────────────────────────────────────────────
    let filter = build_filter(&cli);
    let shown: Vec<ClassifiedDefectRecord> = result.filter(&filter).into_iter().cloned().collect();

    if cli.json {
        println!("{}", export::to_json(&shown).context("Failed to serialise records")?);
    } else {
        print_grouped(&shown, cli.details);
        if !cli.quiet {
            print_summary(&ResultSummary::from_records(&shown));
        }
    }

    if !cli.quiet {
        print_document_issues(&result);
    }

    if let Some(ref target) = cli.xlsx {
        let path = target.clone().unwrap_or_else(default_xlsx_name);
        export::write_xlsx(&shown, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !cli.quiet {
            eprintln!(
                "{}  {} records  →  {}",
                green("✔"),
                shown.len(),
                bold(&path.display().to_string())
            );
        }
    }

    Ok(())
}

/// Map CLI args to `AnalysisConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn build_filter(cli: &Cli) -> RecordFilter {
    let mut filter = RecordFilter::new();
    for c in &cli.classification {
        filter = filter.classification((*c).into());
    }
    for c in &cli.confidence {
        filter = filter.confidence((*c).into());
    }
    filter
}

fn default_xlsx_name() -> PathBuf {
    PathBuf::from(format!(
        "inspection_analysis_{}.xlsx",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

fn paint_classification(c: Classification) -> String {
    match c {
        Classification::SiteRelated => red(c.label()),
        Classification::EquipmentRelated => blue(c.label()),
        Classification::Unclassified => dim(c.label()),
        Classification::ClassificationError => bold(&red(c.label())),
    }
}

fn print_grouped(records: &[ClassifiedDefectRecord], details: bool) {
    if records.is_empty() {
        println!("No defects match the current filters.");
        return;
    }

    for (file, group) in edgequake_defects::group_by_file(records) {
        println!("\n{} {}  {}", cyan("📄"), bold(file), dim(&format!("{} defects", group.len())));
        for r in group {
            let reference = match (&r.number, &r.code) {
                (Some(n), Some(c)) => format!("#{n} [{c}]"),
                (Some(n), None) => format!("#{n}"),
                (None, Some(c)) => format!("[{c}]"),
                (None, None) => String::new(),
            };
            println!(
                "  p{:<3} {:<12} {} ({}){}",
                r.page(),
                reference,
                paint_classification(r.classification),
                r.confidence,
                r.severity
                    .as_deref()
                    .map(|s| format!("  {}", dim(s)))
                    .unwrap_or_default()
            );
            println!("        {}", r.description);
            if !r.english_translation.is_empty() && r.english_translation != r.description {
                println!("        {} {}", dim("→"), r.english_translation);
            }
            if details {
                println!("        {} {}", dim("why:"), dim(&r.reasoning));
            }
        }
    }
}

fn print_summary(s: &ResultSummary) {
    eprintln!(
        "\n{}  {} total  │  {} site-related ({:.1}%)  │  {} equipment-related ({:.1}%)  │  {} high confidence ({:.1}%)",
        bold("Summary"),
        s.total,
        s.site_related,
        s.percent(s.site_related),
        s.equipment_related,
        s.percent(s.equipment_related),
        s.high_confidence,
        s.percent(s.high_confidence),
    );
    if s.unclassified + s.classification_errors > 0 {
        eprintln!(
            "         {} unclassified, {} classification errors",
            s.unclassified, s.classification_errors
        );
    }
}

fn print_document_issues(result: &BatchResult) {
    for doc in &result.documents {
        match doc.status {
            DocumentStatus::Failed { ref error } => {
                eprintln!("{} {}: {}", red("✗"), doc.filename, error);
            }
            DocumentStatus::Done { .. } if !doc.degraded_pages.is_empty() => {
                let pages: Vec<String> = doc.degraded_pages.iter().map(|p| p.to_string()).collect();
                eprintln!(
                    "{} {}: no usable extraction for pages {}",
                    cyan("⚠"),
                    doc.filename,
                    pages.join(", ")
                );
            }
            DocumentStatus::Done { .. } => {}
        }
    }
}
