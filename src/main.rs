mod error;
mod pipeline;
mod record;
mod settings;
mod source;
mod stages;
mod store;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use error::PipelineError;
use pipeline::{Pipeline, RunSummary};
use record::CourseRecord;
use settings::{RunOverrides, Settings};
use source::{CrawlerCommand, SearchParams};
use store::adapter::StoreTarget;
use store::{DocumentStore, StoreAdapter};

#[derive(Parser)]
#[command(name = "course_pipeline", about = "Filter, normalize and store scraped course catalogs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push scraped courses through the pipeline into the store
    Run {
        #[command(flatten)]
        search: SearchArgs,
        /// Read courses as JSON Lines from a file ("-" for stdin)
        #[arg(long, conflicts_with = "crawler", required_unless_present = "crawler")]
        input: Option<PathBuf>,
        /// Crawler command printing JSON Lines; search flags are appended as `-a key=value`
        #[arg(long)]
        crawler: Option<String>,
        /// Abort on the first course that fails instead of skipping it
        #[arg(long)]
        strict: bool,
    },
    /// Show the last run's finish time and the stored course count
    Stats {
        /// Database (default from settings)
        #[arg(short = 'b', long)]
        database: Option<String>,
        /// Collection (default from settings)
        #[arg(short = 'c', long)]
        collection: Option<String>,
    },
}

#[derive(Args)]
struct SearchArgs {
    /// Display language: en or jp
    #[arg(short = 'd', long)]
    display_lang: Option<String>,
    /// Comma separated schools, e.g. sils,fund_sci_eng
    #[arg(short = 's', long)]
    schools: Option<String>,
    /// Teaching language: all, en, jp
    #[arg(short = 't', long)]
    teaching_lang: Option<String>,
    /// A single keyword, e.g. IPSE
    #[arg(short = 'k', long)]
    keyword: Option<String>,
    /// Database override for this run
    #[arg(short = 'b', long)]
    database: Option<String>,
    /// Collection override for this run
    #[arg(short = 'c', long)]
    collection: Option<String>,
}

impl From<SearchArgs> for SearchParams {
    fn from(a: SearchArgs) -> Self {
        SearchParams {
            display_lang: a.display_lang,
            schools: a.schools,
            teaching_lang: a.teaching_lang,
            keyword: a.keyword,
            database: a.database,
            collection: a.collection,
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn main() -> Result<()> {
    init_tracing();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Run {
            search,
            input,
            crawler,
            strict,
        } => {
            let params = SearchParams::from(search);
            let overrides =
                RunOverrides::new(params.database.as_deref(), params.collection.as_deref());

            let (summary, target) = match (input, crawler) {
                (Some(path), _) => run_input(&settings, &overrides, &path, strict)?,
                (None, Some(cmd)) => run_crawler(&settings, &overrides, &cmd, &params, strict)?,
                (None, None) => anyhow::bail!("Either --input or --crawler is required"),
            };

            summary.print();
            println!("Stored in {} / {}", target.database, target.collection);
            Ok(())
        }
        Commands::Stats {
            database,
            collection,
        } => {
            let overrides = RunOverrides::new(database.as_deref(), collection.as_deref());
            let target = StoreTarget::resolve(&settings, &overrides);
            let mut store = store::connect(&settings.store_uri, &target.database)?;

            let last = store
                .find_all(&target.stats_collection)?
                .into_iter()
                .find_map(|(_, doc)| doc["finish_time"].as_str().map(str::to_string));
            println!("Database:    {}", target.database);
            println!("Collection:  {}", target.collection);
            println!("Courses:     {}", store.count(&target.collection)?);
            println!("Last run:    {}", last.as_deref().unwrap_or("never"));
            store.close()?;
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }

    result
}

/// Courses from a JSON Lines file. The file is opened before the store so a
/// bad path never touches it.
fn run_input(
    settings: &Settings,
    overrides: &RunOverrides,
    path: &Path,
    strict: bool,
) -> Result<(RunSummary, StoreTarget)> {
    let records = source::open_file(path)?;
    run_pipeline(settings, overrides, records, strict)
}

/// Courses from a crawler subprocess, spawned before the store is opened.
fn run_crawler(
    settings: &Settings,
    overrides: &RunOverrides,
    command: &str,
    params: &SearchParams,
    strict: bool,
) -> Result<(RunSummary, StoreTarget)> {
    let mut crawl = CrawlerCommand::spawn(command, params)?;
    let outcome = run_pipeline(settings, overrides, crawl.by_ref(), strict)?;
    crawl.finish()?;
    Ok(outcome)
}

fn run_pipeline<I>(
    settings: &Settings,
    overrides: &RunOverrides,
    records: I,
    strict: bool,
) -> Result<(RunSummary, StoreTarget)>
where
    I: Iterator<Item = Result<CourseRecord, PipelineError>>,
{
    let adapter =
        StoreAdapter::open(settings, overrides).context("Failed to open course store")?;
    let target = adapter.target().clone();
    let mut pipeline = Pipeline::new(adapter);

    let pb = spinner();
    let summary = pipeline.run(records.inspect(|_| pb.inc(1)), strict);
    pb.finish_and_clear();
    Ok((summary?, target))
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {pos} courses ({per_sec})")
    {
        pb.set_style(style);
    }
    pb
}
