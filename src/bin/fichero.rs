//! CLI binary for fichero.
//!
//! A thin shim over the library crate: maps flags to `BatchConfig`, resolves
//! the model from the persisted catalog, and prints the batch report.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fichero::{
    BatchConfig, BatchOrchestrator, BatchProgressCallback, BatchReport, CancelToken,
    ConversionResult, EnvKeyResolver, ExtensionSet, FicheroError, HttpVlmEngine, KeyChain,
    ModelCatalog, ModelRecord, ProgressCallback, ProviderRegistry,
    ResponseFormat, StaticKeyResolver,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Model used when `--model` is not given.
const DEFAULT_MODEL: &str = "qwen-vl-max-latest";

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the whole batch plus a log line per finished file. Files may
/// finish out of order when running concurrently.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("walking input folders…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total_files as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_files} files to convert"))
        ));
    }

    fn on_file_start(&self, index: usize, _total: usize, path: &Path) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(path.display().to_string());
    }

    fn on_file_complete(&self, index: usize, _total: usize, path: &Path, chars: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {}  {}  {}",
            green("✓"),
            path.display(),
            dim(&format!("{chars:>6} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, index: usize, _total: usize, path: &Path, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}…", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            path.display(),
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_files: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!("{} {} files converted", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {}/{} files converted  ({} failed)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total_files,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert two folders with the default model, writing .md files
  fichero convert scans/ invoices/ --output-dir converted/

  # Use a local Ollama model, PDFs only
  fichero convert papers/ --model qwen2.5vl:7b --extensions pdf

  # Show what would be sent, without calling anything
  fichero convert scans/ --model gpt-4o --dry-run

  # Register a model and its key
  fichero models set qwen-vl-plus --provider dashscope --api-key sk-...

PROVIDERS:
  ollama     local server, no credentials
  dashscope  Bearer token from DASHSCOPE_API_KEY or the model record
  sandbox    api-key header from AI_SANDBOX_KEY or the model record

ENVIRONMENT VARIABLES:
  DASHSCOPE_API_KEY   DashScope API key
  AI_SANDBOX_KEY      Sandbox gateway key
  FICHERO_*           Every flag, e.g. FICHERO_MODEL, FICHERO_CONCURRENCY
  PDFIUM_LIB_PATH     Directory holding libpdfium (needed for PDF input)
  RUST_LOG            Log filter, overrides -v / -q
"#;

/// Convert folders of PDFs and images to Markdown using vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "fichero",
    version,
    about = "Batch-convert PDFs and images to Markdown using vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Model catalog file (JSON Lines). Default: <data dir>/fichero/models_config.jsonl
    #[arg(long, global = true, env = "FICHERO_MODELS_CONFIG")]
    models_config: Option<PathBuf>,

    /// JSON array of extra or replacement provider definitions.
    #[arg(long, global = true, env = "FICHERO_PROVIDERS")]
    providers: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FICHERO_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "FICHERO_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert every supported file under the given folders.
    Convert(ConvertArgs),
    /// Inspect or edit the model catalog.
    #[command(subcommand)]
    Models(ModelsCommand),
    /// List known providers.
    Providers,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Input folders, walked recursively in the order given.
    #[arg(required = true)]
    folders: Vec<PathBuf>,

    /// Model name from the catalog.
    #[arg(short, long, env = "FICHERO_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Provider; required when the model is not in the catalog.
    #[arg(short, long, env = "FICHERO_PROVIDER")]
    provider: Option<String>,

    /// Instruction sent with every page (overrides the model's prompt).
    #[arg(long, env = "FICHERO_PROMPT")]
    prompt: Option<String>,

    /// Write one document per file below this directory.
    #[arg(short, long, env = "FICHERO_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Files converted at once.
    #[arg(short, long, env = "FICHERO_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Comma-separated extensions to convert (default: all supported).
    #[arg(long, env = "FICHERO_EXTENSIONS")]
    extensions: Option<String>,

    /// Retries per file on transient failure.
    #[arg(long, env = "FICHERO_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Upper bound on one file's conversion, in seconds.
    #[arg(long, env = "FICHERO_FILE_TIMEOUT")]
    file_timeout: Option<u64>,

    /// Fail a file up front when its provider needs a key and none is set.
    #[arg(long, env = "FICHERO_REQUIRE_API_KEY")]
    require_api_key: bool,

    /// Output format requested from the model.
    #[arg(long, env = "FICHERO_FORMAT", value_enum, default_value = "markdown")]
    format: FormatArg,

    /// Print the batch report as JSON.
    #[arg(long, env = "FICHERO_JSON")]
    json: bool,

    /// List matched files and the (redacted) request, then exit.
    #[arg(long)]
    dry_run: bool,

    /// Disable the progress bar.
    #[arg(long, env = "FICHERO_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum ModelsCommand {
    /// List catalog records.
    List,
    /// Print one record as JSON (key masked).
    Show { name: String },
    /// Add a record or replace the one with the same name.
    Set {
        name: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Delete a record.
    Remove { name: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Markdown,
    Text,
}

impl From<FormatArg> for ResponseFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Markdown => ResponseFormat::Markdown,
            FormatArg::Text => ResponseFormat::Text,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v asks for them.
    let show_progress = match &cli.command {
        Command::Convert(a) => !cli.quiet && !a.no_progress && !a.json && !a.dry_run,
        _ => false,
    };
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

    let registry = load_registry(cli.providers.as_deref())?;
    let catalog_path = catalog_path(cli.models_config.clone());

    match cli.command {
        Command::Convert(ref args) => {
            run_convert(args, registry, &catalog_path, show_progress, cli.quiet).await
        }
        Command::Models(cmd) => run_models(cmd, &registry, &catalog_path),
        Command::Providers => {
            print_providers(&registry);
            Ok(())
        }
    }
}

fn load_registry(overrides: Option<&Path>) -> Result<ProviderRegistry> {
    let registry = ProviderRegistry::builtin();
    match overrides {
        Some(path) => {
            let defs = ProviderRegistry::load_overrides(path)
                .with_context(|| format!("Failed to load providers from {}", path.display()))?;
            Ok(registry.with_overrides(defs))
        }
        None => Ok(registry),
    }
}

fn catalog_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("fichero"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("models_config.jsonl")
    })
}

async fn run_convert(
    args: &ConvertArgs,
    registry: ProviderRegistry,
    catalog_path: &Path,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let catalog = ModelCatalog::load_or_seed(catalog_path).context("Failed to load model catalog")?;
    let record = resolve_record(&catalog, &args.model, args.provider.as_deref())?;
    let selection = record.selection();

    // ── Build config ─────────────────────────────────────────────────────
    let mut builder = BatchConfig::builder()
        .concurrency(args.concurrency)
        .max_retries(args.max_retries)
        .require_api_key(args.require_api_key)
        .response_format(args.format.into());
    if let Some(ref list) = args.extensions {
        builder = builder.extensions(ExtensionSet::parse(list));
    }
    if let Some(ref dir) = args.output_dir {
        builder = builder.output_dir(dir);
    }
    if let Some(secs) = args.file_timeout {
        builder = builder.file_timeout_secs(secs);
    }
    if show_progress {
        builder = builder.progress_callback(CliProgressCallback::new() as ProgressCallback);
    }
    let config = builder.build().context("Invalid configuration")?;

    let mut keys = KeyChain::new().then(EnvKeyResolver::from_registry(&registry));
    if let Some(ref key) = record.api_key {
        keys = keys.then(StaticKeyResolver::new().with_key(&record.provider, key));
    }
    let prompt = args.prompt.clone().or_else(|| record.prompt.clone());

    let engine = Arc::new(HttpVlmEngine::new(config.max_image_pixels)?);
    let orchestrator = BatchOrchestrator::new(Arc::new(registry), engine, config);

    if args.dry_run {
        let plan = orchestrator.plan(&args.folders, &selection, prompt.as_deref(), &keys)?;
        println!(
            "{}",
            serde_json::to_string_pretty(&plan).context("Failed to serialise plan")?
        );
        return Ok(());
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", cyan("Interrupted: finishing files in flight…"));
            on_signal.cancel();
        }
    });

    let report = orchestrator
        .run_with_cancel(&args.folders, &selection, prompt.as_deref(), &keys, &cancel)
        .await
        .context("Batch failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if args.output_dir.is_none() {
        print_documents(&report)?;
    }

    if !quiet {
        print_summary(&report, show_progress);
    }

    if report.is_empty() && !report.cancelled {
        warn!("No supported files found");
    }
    if report.all_failed() {
        anyhow::bail!("all {} files failed", report.len());
    }
    Ok(())
}

/// Pick the catalog record for `model`, or build an ad-hoc one when the
/// provider is given explicitly.
///
/// A record's key and URL belong to its own provider. Overriding the provider
/// keeps only the prompt.
fn resolve_record(catalog: &ModelCatalog, model: &str, provider: Option<&str>) -> Result<ModelRecord> {
    match (catalog.get(model), provider) {
        (Some(record), Some(p)) if record.provider != p => {
            let mut r = ModelRecord::new(model, p);
            r.prompt = record.prompt.clone();
            Ok(r)
        }
        (Some(record), _) => Ok(record.clone()),
        (None, Some(p)) => Ok(ModelRecord::new(model, p)),
        (None, None) => Err::<ModelRecord, _>(FicheroError::UnknownModel {
            name: model.to_string(),
        })
        .context("Pass --provider or add the model with `fichero models set`"),
    }
}

fn print_documents(report: &BatchReport) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for doc in report.successes() {
        writeln!(out, "<!-- {} -->", doc.source_path.display()).context("Failed to write to stdout")?;
        out.write_all(doc.content.as_bytes())
            .context("Failed to write to stdout")?;
        if !doc.content.ends_with('\n') {
            out.write_all(b"\n").ok();
        }
        writeln!(out).ok();
    }
    Ok(())
}

fn print_summary(report: &BatchReport, show_progress: bool) {
    let s = &report.stats;
    if !show_progress {
        eprintln!(
            "Converted {}/{} files in {}ms",
            s.succeeded, s.matched_files, s.duration_ms
        );
    }
    for result in &report.results {
        if let ConversionResult::Failure(f) = result {
            eprintln!(
                "  {} {} [{:?}] {}",
                red("✗"),
                f.source_path.display(),
                f.kind,
                f.message
            );
        }
    }
    if report.cancelled {
        eprintln!("  {} files skipped after interrupt", s.skipped);
    }
}

fn run_models(cmd: ModelsCommand, registry: &ProviderRegistry, path: &Path) -> Result<()> {
    let mut catalog = ModelCatalog::load_or_seed(path).context("Failed to load model catalog")?;
    match cmd {
        ModelsCommand::List => {
            println!("{}", dim(&path.display().to_string()));
            for r in catalog.records() {
                println!(
                    "{:<28} {:<10} {}{}",
                    bold(&r.name),
                    r.provider,
                    if r.api_key.is_some() { "key " } else { "" },
                    r.prompt.as_deref().map(|p| format!("prompt: {p}")).unwrap_or_default()
                );
            }
        }
        ModelsCommand::Show { name } => {
            let mut record = catalog.require(&name)?.clone();
            if record.api_key.is_some() {
                record.api_key = Some("<redacted>".into());
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&record).context("Failed to serialise record")?
            );
        }
        ModelsCommand::Set {
            name,
            provider,
            api_key,
            prompt,
            url,
        } => {
            registry.resolve(&provider)?;
            let record = ModelRecord {
                name: name.clone(),
                provider,
                api_key,
                prompt,
                url,
            };
            let replaced = catalog.upsert(record).is_some();
            catalog.save(path)?;
            eprintln!(
                "{} {} '{}'",
                green("✔"),
                if replaced { "updated" } else { "added" },
                name
            );
        }
        ModelsCommand::Remove { name } => {
            catalog.require(&name)?;
            catalog.remove(&name);
            catalog.save(path)?;
            eprintln!("{} removed '{}'", green("✔"), name);
        }
    }
    Ok(())
}

fn print_providers(registry: &ProviderRegistry) {
    for def in registry.definitions() {
        println!(
            "{:<10} {:<14} {:>4}s  {}  {}",
            bold(&def.name),
            format!("{:?}", def.family),
            def.timeout_secs,
            def.url_template,
            def.api_key_env
                .as_deref()
                .map(|v| dim(&format!("(${v})")))
                .unwrap_or_default()
        );
    }
}
