use acks::config::{
    SearchConfig, BULK_BATCH_SIZE, DEDUP_MIN_OCCURRENCES, DEDUP_SHARDS, DEFAULT_ES_HOST,
    DEFAULT_ES_PORT, DEFAULT_ES_PROTOCOL, DEFAULT_INDEX, DEFAULT_LOG_DIR,
};
use acks::dedup::DedupConfig;
use acks::dispatch::DispatchLimits;
use acks::import::ImportConfig;
use acks::scan::ScanConfig;
use acks::stats::DispatchSummary;
use acks::taxonomy::Taxonomy;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "acks")]
#[command(about = "Classify web crawl archives by topic and load them into a search index")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every archive in the work list and write `.scanned` files
    #[command(name = "scan")]
    Scan(ScanArgs),
    /// Load `.scanned` files into the search index
    #[command(name = "importToES")]
    ImportToEs(ImportArgs),
    /// Convert a raw host-rank listing into the rank file used by importToES
    #[command(name = "processHostRanksFile")]
    ProcessHostRanksFile(HostRanksArgs),
    /// Find paragraphs repeated across indexed documents
    #[command(name = "findReoccurringParagraphs")]
    FindReoccurringParagraphs(DedupArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// File listing one archive path per line
    work_list: PathBuf,

    /// Taxonomy configuration file
    taxonomy: PathBuf,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args)]
struct ImportArgs {
    /// File listing one archive path per line; `<path>.scanned` is imported
    work_list: PathBuf,

    /// Taxonomy configuration file (the one the scan ran with)
    taxonomy: PathBuf,

    /// Gzip rank file of `rank hostId` lines
    rank_file: PathBuf,

    #[command(flatten)]
    search: SearchArgs,

    /// Documents per `_bulk` request
    #[arg(long, default_value_t = BULK_BATCH_SIZE)]
    bulk_batch_size: usize,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args)]
struct HostRanksArgs {
    /// Raw gzip host-rank listing (rank first, reversed host last)
    input: PathBuf,

    /// Output rank file
    output: PathBuf,

    /// Directory for the timing report
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
}

#[derive(Args)]
struct DedupArgs {
    #[command(flatten)]
    search: SearchArgs,

    /// Number of scroll slices, one task each
    #[arg(long, default_value_t = DEDUP_SHARDS)]
    shards: u32,

    /// Minimum count for a paragraph to be reported
    #[arg(long, default_value_t = DEDUP_MIN_OCCURRENCES)]
    min_occurrences: u32,

    /// Directory for the per-shard CSV files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args)]
struct SearchArgs {
    /// Search endpoint protocol
    #[arg(long, env = "ACKS_ES_PROTOCOL", default_value = DEFAULT_ES_PROTOCOL)]
    es_protocol: String,

    /// Search endpoint host
    #[arg(long, env = "ACKS_ES_HOST", default_value = DEFAULT_ES_HOST)]
    es_host: String,

    /// Search endpoint port
    #[arg(long, env = "ACKS_ES_PORT", default_value_t = DEFAULT_ES_PORT)]
    es_port: u16,

    /// Index name
    #[arg(long, default_value = DEFAULT_INDEX)]
    index: String,
}

impl SearchArgs {
    fn config(&self) -> SearchConfig {
        SearchConfig {
            protocol: self.es_protocol.clone(),
            host: self.es_host.clone(),
            port: self.es_port,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Directory for the timing report
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Abandon a single task after this many seconds
    #[arg(long)]
    task_timeout_secs: Option<u64>,
}

impl RunArgs {
    fn limits(&self, base: DispatchLimits) -> DispatchLimits {
        base.with_task_timeout(self.task_timeout_secs.map(Duration::from_secs))
    }
}

fn run_scan(args: ScanArgs) -> Result<()> {
    let taxonomy = Taxonomy::load(&args.taxonomy)?;
    let config = ScanConfig {
        work_list: args.work_list,
        limits: args.run.limits(DispatchLimits::standard()),
        log_dir: args.run.log_dir,
    };
    let summary = acks::scan::run_scan(&config, taxonomy)?;
    print_summary("scan", &summary);
    Ok(())
}

fn run_import(args: ImportArgs) -> Result<()> {
    let taxonomy = Taxonomy::load(&args.taxonomy)?;
    let config = ImportConfig {
        work_list: args.work_list,
        rank_file: args.rank_file,
        index: args.search.index.clone(),
        search: args.search.config(),
        limits: args.run.limits(DispatchLimits::standard()),
        log_dir: args.run.log_dir,
        bulk_batch_size: args.bulk_batch_size,
    };
    let summary = acks::import::run_import(config, taxonomy)?;
    print_summary("importToES", &summary);
    Ok(())
}

fn run_host_ranks(args: HostRanksArgs) -> Result<()> {
    let summary = acks::ranks::run_host_ranks(&args.input, &args.output, &args.log_dir)?;

    println!();
    println!("=== Summary ===");
    println!("Lines read:         {}", summary.lines_read);
    println!("Lines skipped:      {}", summary.skipped);
    println!("Hosts written:      {}", summary.hosts_written);
    Ok(())
}

fn run_dedup(args: DedupArgs) -> Result<()> {
    let config = DedupConfig {
        index: args.search.index.clone(),
        search: args.search.config(),
        output_dir: args.output_dir,
        shards: args.shards,
        min_occurrences: args.min_occurrences,
        limits: args.run.limits(DispatchLimits::heavy()),
        log_dir: args.run.log_dir,
    };
    let summary = acks::dedup::run_dedup(&config)?;
    print_summary("findReoccurringParagraphs", &summary);
    Ok(())
}

fn print_summary(phase: &str, summary: &DispatchSummary) {
    if !summary.all_succeeded() {
        warn!(
            phase,
            failed = summary.failed,
            rejected = summary.rejected,
            "Some work items did not complete"
        );
    }

    println!();
    println!("=== Summary ({phase}) ===");
    println!("Total time:         {:.2}s", summary.elapsed.as_secs_f64());
    println!("Items submitted:    {}", summary.submitted);
    println!("Completed:          {}", summary.completed);
    println!("Failed:             {}", summary.failed);
    println!("  of which timed out: {}", summary.timed_out);
    println!("Rejected:           {}", summary.rejected);
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Scan(args) => run_scan(args),
        Commands::ImportToEs(args) => run_import(args),
        Commands::ProcessHostRanksFile(args) => run_host_ranks(args),
        Commands::FindReoccurringParagraphs(args) => run_dedup(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
