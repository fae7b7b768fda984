use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use medrep::export::format_for_path;
use medrep::prelude::*;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mrcli")]
#[command(version, about = "Medrep CLI - Ask analytics questions about a practitioner portfolio", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config path)
    #[arg(long, global = true, env = "MEDREP_CONFIG")]
    config: Option<PathBuf>,
    /// Measure recency against this date (YYYY-MM-DD) instead of today
    #[arg(long, global = true)]
    reference_date: Option<NaiveDate>,
    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a free-text question
    Ask(AskArgs),
    /// Run a JSON plan specification
    Run(RunArgs),
    /// Show summary statistics for a portfolio
    Stats(StatsArgs),
    /// Generate a sample portfolio
    Generate(GenerateArgs),
    /// Export a portfolio to JSON, JSON Lines or CSV
    Export(ExportArgs),
}

#[derive(Args)]
struct DataArgs {
    /// Portfolio file (.json, .jsonl or .csv)
    #[arg(short, long)]
    data: PathBuf,
    /// Skip invalid records instead of failing
    #[arg(long)]
    skip_invalid: bool,
}

#[derive(Args)]
struct AskArgs {
    #[command(flatten)]
    data: DataArgs,
    /// The question, e.g. "top 10 cardiologists in Lyon"
    #[arg(required = true, num_args = 1..)]
    question: Vec<String>,
    /// Print the full outcome (intent, plan, results, insights) as JSON
    #[arg(long)]
    json: bool,
    /// Write the result rows to a file; the format follows the extension
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    data: DataArgs,
    /// Plan specification file, or "-" for stdin
    #[arg(short, long)]
    spec: PathBuf,
}

#[derive(Args)]
struct StatsArgs {
    #[command(flatten)]
    data: DataArgs,
    /// Print statistics as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct GenerateArgs {
    /// Output file; the format follows the extension
    #[arg(short, long)]
    out: PathBuf,
    /// Number of practitioners
    #[arg(short, long, default_value_t = 200)]
    count: usize,
    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Share of practitioners flagged as KOL
    #[arg(long, default_value_t = 0.15)]
    kol_ratio: f64,
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    data: DataArgs,
    /// Output file path
    #[arg(short, long)]
    output: PathBuf,
    /// Export format (defaults to the output extension, then the configured format)
    #[arg(long, value_enum)]
    format: Option<ExportFormatOpt>,
    /// City filter
    #[arg(long)]
    city: Option<String>,
    /// Only export KOLs
    #[arg(long)]
    kol: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum ExportFormatOpt {
    Json,
    Jsonl,
    Csv,
}

impl From<ExportFormatOpt> for ExportFormat {
    fn from(opt: ExportFormatOpt) -> Self {
        match opt {
            ExportFormatOpt::Json => ExportFormat::Json,
            ExportFormatOpt::Jsonl => ExportFormat::JsonLines,
            ExportFormatOpt::Csv => ExportFormat::Csv,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "medrep=debug,info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => MedrepConfig::load_from(path),
        None => MedrepConfig::load(),
    }
    .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    if let Some(date) = cli.reference_date {
        config.reference_date = Some(date);
    }
    config.configure_thread_pool()?;
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Ask(args) => cmd_ask(args, config),
        Commands::Run(args) => cmd_run(args, config),
        Commands::Stats(args) => cmd_stats(args, config),
        Commands::Generate(args) => cmd_generate(args, config),
        Commands::Export(args) => cmd_export(args, config),
    }
}

fn load_dataset(args: &DataArgs, mut config: MedrepConfig) -> anyhow::Result<PractitionerDataset> {
    config.skip_invalid_records |= args.skip_invalid;
    PractitionerDatasetBuilder::new()
        .data(&args.data)
        .config(config)
        .build()
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .with_context(|| format!("Error loading dataset from {}", args.data.display()))
}

fn cmd_ask(args: AskArgs, config: MedrepConfig) -> anyhow::Result<()> {
    let dataset = load_dataset(&args.data, config)?;
    let question = args.question.join(" ");
    let outcome = dataset.ask(&question)?;

    if let Some(path) = &args.export {
        let format = format_for_path(path).unwrap_or(dataset.config().default_export_format);
        outcome.export(path, format)?;
        eprintln!("Exported {} rows to {}", outcome.results.len(), path.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_rows(&outcome.plan, &outcome.results);
        println!();
        for insight in &outcome.insights {
            println!("- {}", insight);
        }
    }
    Ok(())
}

fn cmd_run(args: RunArgs, config: MedrepConfig) -> anyhow::Result<()> {
    let raw = if args.spec == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(&args.spec).with_context(|| format!("Cannot read {}", args.spec.display()))?
    };
    let spec: serde_json::Value = serde_json::from_str(&raw).context("Plan specification is not valid JSON")?;

    let dataset = load_dataset(&args.data, config)?;
    let chart = dataset.chart_for_spec(&spec).map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("{}", serde_json::to_string_pretty(&chart)?);
    Ok(())
}

fn cmd_stats(args: StatsArgs, config: MedrepConfig) -> anyhow::Result<()> {
    let dataset = load_dataset(&args.data, config)?;
    let stats = dataset.statistics();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        stats.print_summary();
    }
    Ok(())
}

fn cmd_generate(args: GenerateArgs, config: MedrepConfig) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&args.kol_ratio) {
        bail!("--kol-ratio must be between 0 and 1, got {}", args.kol_ratio);
    }
    let records = SampleGenerator::new(args.seed)
        .with_reference_date(config.reference_date_or_today())
        .with_kol_ratio(args.kol_ratio)
        .generate(args.count);

    let format = format_for_path(&args.out).unwrap_or(config.default_export_format);
    medrep::export::export_practitioners(&records, &args.out, format)?;
    println!("Generated {} practitioners in {}", records.len(), args.out.display());
    Ok(())
}

fn cmd_export(args: ExportArgs, config: MedrepConfig) -> anyhow::Result<()> {
    let dataset = load_dataset(&args.data, config)?;
    let format = args
        .format
        .map(ExportFormat::from)
        .or_else(|| format_for_path(&args.output))
        .unwrap_or(dataset.config().default_export_format);

    let city = args.city.as_deref().map(normalize_text);
    let filter = |p: &PractitionerRecord| {
        let mut ok = true;
        if let Some(city) = city.as_deref() {
            ok &= normalize_text(&p.city) == city;
        }
        if args.kol {
            ok &= p.is_kol;
        }
        ok
    };

    dataset
        .export_subset(&args.output, filter, format)
        .with_context(|| format!("Export to {} failed", args.output.display()))?;
    println!("Exported to {} ({})", args.output.display(), format);
    Ok(())
}

fn print_rows(plan: &QueryPlan, rows: &[ResultPoint]) {
    if rows.is_empty() {
        println!("(no rows)");
        return;
    }
    let name_width = rows.iter().map(|r| r.name.chars().count()).max().unwrap_or(4).max(4);
    let mut header = format!("{:<width$}", "name", width = name_width);
    for metric in &plan.metrics {
        header.push_str(&format!("  {:>12}", metric.name));
    }
    println!("{}", header);
    for row in rows {
        let mut line = format!("{:<width$}", row.name, width = name_width);
        for metric in &plan.metrics {
            let value = row.value(&metric.name).map(format_number).unwrap_or_default();
            line.push_str(&format!("  {:>12}", value));
        }
        println!("{}", line);
    }
}
