//! Harvest CLI - X/Twitter recent-search harvester.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use harvest::config::{load_queries, validate_queries};
use harvest::paginate::{DEFAULT_COOLDOWN, DEFAULT_MAX_RATE_LIMIT_RETRIES};
use harvest::storage::{load_identifiers, output_path, write_artifact, DEFAULT_ID_COLUMN};
use harvest::twitter::{EngagementMetric, MAX_PAGE_SIZE};
use harvest::{
    AbortPolicy, ApiConfig, Artifact, Harvester, LabeledQuery, PaginationConfig, Paginator,
    PipelineConfig, RunId, RunReport, TimeWindow, XClient,
};

/// Exit status when at least one loop stopped before exhausting its cursor.
const EXIT_PARTIAL: u8 = 2;

/// Harvest CLI - Collect X/Twitter recent-search data into CSV/JSON files.
#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "X/Twitter recent-search harvester")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Count posts per query with at least N likes (or another metric)
    Popular {
        #[command(flatten)]
        queries: QueryArgs,

        /// Minimum engagement (inclusive)
        #[arg(long, alias = "min-likes", default_value = "50")]
        threshold: u64,

        /// Engagement metric compared against the threshold
        #[arg(long, value_enum, default_value_t = EngagementMetric::Likes)]
        metric: EngagementMetric,

        /// Days of history to search (recent search covers about 7)
        #[arg(long, default_value = "7")]
        days_back: u32,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        paging: PagingArgs,
    },

    /// Daily post counts per query as a date-by-label CSV table
    Daily {
        #[command(flatten)]
        queries: QueryArgs,

        /// Days of history (default: the endpoint's own window)
        #[arg(long)]
        days_back: Option<u32>,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        paging: PagingArgs,
    },

    /// Download every post of the conversations listed in a CSV
    Replies {
        /// CSV file with a conversation ID column
        #[arg(long)]
        conversation_csv: PathBuf,

        /// Identifier column name
        #[arg(long, default_value = DEFAULT_ID_COLUMN)]
        column: String,

        /// Days of history to search
        #[arg(long, default_value = "7")]
        days_back: u32,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        paging: PagingArgs,
    },

    /// Print the unique identifiers of a CSV column
    Ids {
        /// CSV file with a conversation ID column
        #[arg(long)]
        conversation_csv: PathBuf,

        /// Identifier column name
        #[arg(long, default_value = DEFAULT_ID_COLUMN)]
        column: String,
    },
}

#[derive(Args)]
pub struct QueryArgs {
    /// Labeled query as LABEL=QUERY (repeatable)
    #[arg(long = "query", value_name = "LABEL=QUERY")]
    queries: Vec<String>,

    /// TOML file with [[query]] tables (label, expr)
    #[arg(long)]
    queries_file: Option<PathBuf>,
}

#[derive(Args)]
pub struct OutputArgs {
    /// Output file (default: timestamped name in --output-dir)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Directory for timestamped output files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Args)]
pub struct PagingArgs {
    /// Results per page (10-100)
    #[arg(long, default_value_t = MAX_PAGE_SIZE)]
    page_size: u32,

    /// Seconds to pause between pages
    #[arg(long, default_value = "0.8")]
    sleep_between: f64,

    /// Seconds to cool down after a rate-limit response
    #[arg(long, default_value_t = DEFAULT_COOLDOWN.as_secs())]
    cooldown_secs: u64,

    /// Cool-down multiplier per consecutive rate-limit response
    #[arg(long, default_value = "1.0")]
    backoff_multiplier: f32,

    /// Upper bound for the backed-off cool-down (default: 3600)
    #[arg(long)]
    max_cooldown_secs: Option<u64>,

    /// Consecutive rate-limit responses tolerated per page
    #[arg(long, default_value_t = DEFAULT_MAX_RATE_LIMIT_RETRIES)]
    max_retries: u32,

    /// Stop each query after this many pages
    #[arg(long)]
    max_pages: Option<usize>,

    /// Abort the whole run on the first failed query
    #[arg(long)]
    fail_fast: bool,
}

impl PagingArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let page_pacing = Duration::try_from_secs_f64(self.sleep_between).with_context(|| {
            format!(
                "--sleep-between must be a non-negative number of seconds, got {}",
                self.sleep_between
            )
        })?;
        anyhow::ensure!(
            self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0,
            "--backoff-multiplier must be a finite number of at least 1.0, got {}",
            self.backoff_multiplier
        );

        let cooldown = Duration::from_secs(self.cooldown_secs);
        let max_cooldown = match self.max_cooldown_secs {
            Some(secs) => {
                anyhow::ensure!(
                    secs >= self.cooldown_secs,
                    "--max-cooldown-secs ({secs}) must not be below --cooldown-secs ({})",
                    self.cooldown_secs
                );
                Duration::from_secs(secs)
            }
            None => PaginationConfig::default().max_cooldown.max(cooldown),
        };

        Ok(PipelineConfig {
            page_size: self.page_size,
            pagination: PaginationConfig {
                page_pacing,
                cooldown,
                backoff_multiplier: self.backoff_multiplier,
                max_cooldown,
                max_rate_limit_retries: self.max_retries,
                max_pages: self.max_pages,
                abort_policy: if self.fail_fast {
                    AbortPolicy::Propagate
                } else {
                    AbortPolicy::KeepPartial
                },
                ..PaginationConfig::default()
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("harvest=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("harvest=info,warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Popular {
            queries,
            threshold,
            metric,
            days_back,
            output,
            paging,
        } => {
            let queries = resolve_queries(&queries)?;
            let window = TimeWindow::trailing_days(days_back, Utc::now())?;
            tracing::info!(
                queries = queries.len(),
                threshold,
                %metric,
                days_back,
                "Starting popular-post count"
            );
            let run = RunId::now();
            let harvester = build_harvester(&paging)?;
            let report = harvester
                .popular(&queries, &window, threshold, metric)
                .await?;

            println!("\n📊 Posts with >= {threshold} {metric}");
            for row in &report.data.rows {
                let marker = if row.complete { "" } else { " (partial)" };
                println!("   {:<20} {}{marker}", row.label, row.count);
            }
            finish(report, Artifact::Popular, &output, &run)
        }
        Commands::Daily {
            queries,
            days_back,
            output,
            paging,
        } => {
            let queries = resolve_queries(&queries)?;
            let now = Utc::now();
            let window = match days_back {
                Some(days) => TimeWindow::trailing_days(days, now)?,
                None => TimeWindow::new(None, now - TimeWindow::grace(), now)?,
            };
            tracing::info!(queries = queries.len(), ?days_back, "Starting daily counts");
            let run = RunId::now();
            let harvester = build_harvester(&paging)?;
            let report = harvester.daily(&queries, &window).await?;

            println!("\n📊 Daily post counts");
            let labels: Vec<&str> = report.data.labels().collect();
            println!("   {:<12} {}", "date", labels.join("  "));
            for key in report.data.row_keys() {
                let cells: Vec<String> = labels
                    .iter()
                    .map(|label| match report.data.get(key, label) {
                        Some(count) => count.to_string(),
                        None if report.data.is_complete(label) => "0".to_string(),
                        None => "-".to_string(),
                    })
                    .collect();
                println!("   {key:<12} {}", cells.join("  "));
            }
            for label in report.data.incomplete_labels() {
                println!(
                    "   {} {label}: stopped early; counts are partial and gaps are left empty",
                    "⚠".yellow()
                );
            }
            for label in report.data.mismatched_labels() {
                println!(
                    "   {} {label}: day buckets differ from the first query; gaps filled with 0",
                    "⚠".yellow()
                );
            }
            finish(report, Artifact::Counts, &output, &run)
        }
        Commands::Replies {
            conversation_csv,
            column,
            days_back,
            output,
            paging,
        } => {
            let ids = load_identifiers(&conversation_csv, &column)?;
            if ids.is_empty() {
                println!("No conversation IDs found.");
                return Ok(ExitCode::SUCCESS);
            }
            let window = TimeWindow::trailing_days(days_back, Utc::now())?;
            tracing::info!(conversations = ids.len(), days_back, "Starting reply download");
            let run = RunId::now();
            let harvester = build_harvester(&paging)?;
            let report = harvester.replies(&ids, &window).await?;

            println!("\n💬 Replies");
            println!("   Conversations: {}", report.data.conversation_count());
            println!("   Replies: {}", report.data.reply_count());
            finish(report, Artifact::Replies, &output, &run)
        }
        Commands::Ids {
            conversation_csv,
            column,
        } => {
            let ids = load_identifiers(&conversation_csv, &column)?;
            for id in &ids {
                println!("{id}");
            }
            tracing::debug!(count = ids.len(), "Printed identifiers");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Collect `--query` values and the `--queries-file` set, then validate.
fn resolve_queries(args: &QueryArgs) -> Result<Vec<LabeledQuery>> {
    let mut queries = args
        .queries
        .iter()
        .map(|raw| LabeledQuery::parse(raw))
        .collect::<harvest::Result<Vec<_>>>()?;

    if let Some(path) = &args.queries_file {
        let from_file = load_queries(path)
            .with_context(|| format!("Failed to load queries from {}", path.display()))?;
        queries.extend(from_file);
    }

    validate_queries(&queries)?;
    Ok(queries)
}

/// Build the fetcher and pipeline. Fails before any network call when the
/// token is missing.
fn build_harvester(paging: &PagingArgs) -> Result<Harvester<XClient>> {
    let pipeline_config = paging.pipeline_config()?;
    let api_config = ApiConfig::from_env()?;
    tracing::debug!(config = ?api_config, "Loaded API configuration");
    let client = XClient::new(api_config)?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let paginator = Paginator::new(pipeline_config.pagination.clone()).with_cancellation(cancel);

    Ok(Harvester::new(client, pipeline_config).with_paginator(paginator))
}

/// Cancel in-flight loops on Ctrl-C; partial results are still written.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping after the current request");
            cancel.cancel();
        }
    });
}

/// Write the artifact, print the loop summary and pick the exit status.
fn finish<T>(
    report: RunReport<T>,
    wrap: impl FnOnce(T) -> Artifact,
    output: &OutputArgs,
    run: &RunId,
) -> Result<ExitCode> {
    let all_complete = report.all_complete();
    let RunReport {
        data,
        loops,
        skipped,
    } = report;

    let artifact = wrap(data);
    let path = output_path(output.output.as_deref(), &output.output_dir, &artifact, run);
    write_artifact(&path, &artifact)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    print_saved(&path);

    if all_complete {
        println!("{} All {} loops completed", "✓".green().bold(), loops.len());
        return Ok(ExitCode::SUCCESS);
    }

    for failed in loops.iter().filter(|l| !l.is_complete()) {
        if let harvest::LoopStatus::Stopped(reason) = &failed.status {
            eprintln!(
                "{} {} stopped after {} page(s): {reason}",
                "⚠".yellow().bold(),
                failed.label,
                failed.pages
            );
        }
    }
    if !skipped.is_empty() {
        eprintln!(
            "{} Not started (cancelled): {}",
            "⚠".yellow().bold(),
            skipped.join(", ")
        );
    }
    Ok(ExitCode::from(EXIT_PARTIAL))
}

fn print_saved(path: &Path) {
    println!("\n{} Saved to {}", "✓".green().bold(), path.display());
}
