use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use promptflow::abstractions::{CommandAiInvoker, LoggingProcessTracker};
use promptflow::config::Settings;
use promptflow::mapreduce::{JobPhase, JobProgress, TempFileStore};
use promptflow::pipeline::{
    execute_pipeline, load_pipeline, parse_parameter_override, PipelineExecutionOptions,
};
use promptflow::PipelineError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

/// Temp directories left by crashed runs older than this are removed at startup
const ORPHAN_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Run YAML-defined AI pipelines
#[derive(Parser)]
#[command(name = "promptflow", version)]
#[command(about = "Run YAML-defined AI map-reduce pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a settings file (default: user config directory)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        /// Pipeline YAML file
        pipeline: PathBuf,

        /// Parameter override as name=value (repeatable)
        #[arg(short = 'p', long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Maximum concurrent AI calls when the pipeline does not set map.parallel
        #[arg(long)]
        parallel: Option<usize>,

        /// Command used to invoke the AI (prompt is passed on stdin)
        #[arg(long)]
        ai_command: Option<String>,

        /// Write the formatted output to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a pipeline file without running it
    Validate {
        /// Pipeline YAML file
        pipeline: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn,promptflow=info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_thread_ids(verbose >= 3)
        .with_line_number(verbose >= 3)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    debug!("promptflow started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let code = match cli.command {
        Commands::Validate { pipeline } => validate(&pipeline),
        Commands::Run {
            pipeline,
            params,
            parallel,
            ai_command,
            output,
        } => {
            let args = RunArgs {
                pipeline,
                params,
                parallel,
                ai_command,
                output,
                config: cli.config,
            };
            match run(args).await {
                Ok(code) => code,
                Err(e) => {
                    error!("Fatal error: {:#}", e);
                    eprintln!("Error: {e:#}");
                    e.downcast_ref::<PipelineError>()
                        .map_or(1, PipelineError::exit_code)
                }
            }
        }
    };
    std::process::exit(code);
}

fn validate(pipeline: &Path) -> i32 {
    match load_pipeline(pipeline) {
        Ok(config) => {
            println!("Pipeline '{}' is valid", config.name);
            0
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            1
        }
    }
}

struct RunArgs {
    pipeline: PathBuf,
    params: Vec<String>,
    parallel: Option<usize>,
    ai_command: Option<String>,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
}

async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(parallel) = args.parallel {
        settings.max_concurrency = parallel;
    }
    if let Some(command) = args.ai_command {
        settings.ai_command = command;
    }
    settings.validate()?;

    let removed = TempFileStore::sweep_orphans(
        settings.temp_dir.clone().unwrap_or_else(std::env::temp_dir),
        ORPHAN_MAX_AGE,
    );
    if removed > 0 {
        info!("Removed {} stale temp directories", removed);
    }

    let config = load_pipeline(&args.pipeline)?;
    let overrides = args
        .params
        .iter()
        .map(|raw| parse_parameter_override(raw))
        .collect::<Result<HashMap<_, _>, _>>()?;

    let invoker = CommandAiInvoker::from_command_line(&settings.ai_command)
        .with_context(|| format!("Invalid AI command '{}'", settings.ai_command))?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for in-flight AI calls to finish");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let bar = progress_bar();
    let progress_bar = bar.clone();
    let options = PipelineExecutionOptions::from_settings(&settings, Arc::new(invoker))
        .with_process_tracker(Arc::new(LoggingProcessTracker::new()))
        .with_parameter_overrides(overrides)
        .with_progress(Arc::new(move |progress: JobProgress| {
            update_progress(&progress_bar, &progress)
        }))
        .with_cancellation(Arc::new(move || cancelled.load(Ordering::SeqCst)));
    let temp_files = options.temp_files.clone();

    let outcome = execute_pipeline(&config, options).await;
    bar.finish_and_clear();
    temp_files.cleanup_all();
    let result = outcome?;

    info!(
        "Pipeline '{}': {}/{} maps succeeded in {}ms",
        result.pipeline_name,
        result.stats.successful_maps,
        result.stats.total_items,
        result.total_time_ms
    );
    if let Some(filter) = &result.filter_stats {
        info!(
            "Filter kept {} of {} items",
            filter.included_count, filter.total_items
        );
    }
    for failed in result.map_results.iter().filter(|r| !r.success) {
        warn!(
            "{} failed: {}",
            failed.work_item_id,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }

    if let Some(output) = &result.output {
        match &args.output {
            Some(path) => {
                std::fs::write(path, &output.formatted)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Wrote output to {}", path.display());
            }
            None => println!("{}", output.formatted),
        }
    }

    if let Some(error) = &result.error {
        eprintln!("Error: {}", error);
    }
    Ok(if result.success { 0 } else { 1 })
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn update_progress(bar: &ProgressBar, progress: &JobProgress) {
    bar.set_length(progress.total_items as u64);
    bar.set_position((progress.completed_items + progress.failed_items) as u64);
    let phase = match progress.phase {
        JobPhase::Splitting => "splitting",
        JobPhase::Mapping => "mapping",
        JobPhase::Reducing => "reducing",
        JobPhase::Complete => "complete",
        JobPhase::Failed => "failed",
    };
    match progress.failed_items {
        0 => bar.set_message(phase),
        failed => bar.set_message(format!("{} ({} failed)", phase, failed)),
    }
}
