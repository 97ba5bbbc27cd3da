//! lookout: watch background tasks from the command line.
//!
//! Events go to stdout as JSON lines; logs go to stderr.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lookout_core::app::{FamilyEntry, Tracker};
use lookout_core::config::TrackerConfig;
use lookout_core::domain::{ContainerRef, SubmissionItem, TaskFamily, TaskId};
use lookout_core::impls::ScriptedStatusFetcher;
use lookout_core::ports::{RefreshHook, StatusReport};
use lookout_core::TrackerBuilder;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lookout")]
#[command(about = "Track long-running server tasks until they finish")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML). Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the configured API for the given task IDs until all are finished
    Watch {
        /// Document ETL task IDs
        #[arg(long = "etl")]
        etl: Vec<String>,

        /// SaaS import task IDs
        #[arg(long = "import")]
        import: Vec<String>,

        /// Override `api.base_url`
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Run a scripted submission against an in-process backend
    Simulate {
        /// Poll interval in milliseconds
        #[arg(long, default_value = "200")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TrackerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Watch {
            etl,
            import,
            base_url,
        } => watch(config, etl, import, base_url).await,
        Commands::Simulate { interval_ms } => simulate(config, interval_ms).await,
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn watch(
    mut config: TrackerConfig,
    etl: Vec<String>,
    import: Vec<String>,
    base_url: Option<String>,
) -> Result<()> {
    if etl.is_empty() && import.is_empty() {
        bail!("nothing to watch: pass at least one --etl or --import task id");
    }
    if let Some(base_url) = base_url {
        config.api.base_url = base_url;
    }
    config.validate()?;

    let tracker = TrackerBuilder::new(config)
        .with_http_families()?
        .expect_families(&TaskFamily::ALL)
        .build()?;

    let mut waiting = HashSet::new();
    for (family, ids) in [(TaskFamily::DocumentEtl, etl), (TaskFamily::SaasImport, import)] {
        for raw in ids {
            let task_id: TaskId = raw
                .parse()
                .with_context(|| format!("invalid {family} task id {raw:?}"))?;
            tracker.track_task(task_id.clone(), family, raw, None)?;
            waiting.insert(task_id);
        }
    }

    let nothing_to_submit = async { anyhow::Ok(Vec::<TaskId>::new()) };
    stream_until_finished(&tracker, waiting, nothing_to_submit).await
}

async fn simulate(mut config: TrackerConfig, interval_ms: u64) -> Result<()> {
    config.poll_interval_ms = interval_ms;
    config.validate()?;

    let etl = Arc::new(ScriptedStatusFetcher::new());
    let import = Arc::new(ScriptedStatusFetcher::new());
    script(
        &etl,
        "55",
        [
            StatusReport::new("pending"),
            StatusReport::new("mineru_parsing").with_progress(20),
            StatusReport::new("llm_processing").with_progress(70),
            StatusReport::new("completed").with_progress(100),
        ],
    )?;
    script(
        &import,
        "9",
        [
            StatusReport::new("processing").with_message("Downloading pages"),
            StatusReport::new("extracting").with_progress(40),
            StatusReport::new("failed").with_error("workspace access revoked"),
        ],
    )?;

    let tracker = Arc::new(
        TrackerBuilder::new(config)
            .register(
                TaskFamily::DocumentEtl,
                FamilyEntry::new(TaskFamily::DocumentEtl, etl.clone()).with_canceller(etl),
            )?
            .register(
                TaskFamily::SaasImport,
                FamilyEntry::new(TaskFamily::SaasImport, import.clone()).with_canceller(import),
            )?
            .refresh_hook(Arc::new(LogRefresh))
            .expect_families(&TaskFamily::ALL)
            .build()?,
    );

    stream_until_finished(&tracker, HashSet::new(), submit(tracker.clone())).await
}

fn script<const N: usize>(
    fetcher: &ScriptedStatusFetcher,
    id: &str,
    reports: [StatusReport; N],
) -> Result<()> {
    let task_id: TaskId = id.parse()?;
    for report in reports {
        fetcher.push(&task_id, report);
    }
    Ok(())
}

/// Stands in for the project listing reload of a UI.
struct LogRefresh;

impl RefreshHook for LogRefresh {
    fn refresh(&self, family: TaskFamily, container: Option<&ContainerRef>) {
        info!(%family, container = ?container.map(ContainerRef::as_str), "refresh listing");
    }
}

/// Placeholders first, then the (slow) creation calls answer.
async fn submit(tracker: Arc<Tracker>) -> Result<Vec<TaskId>> {
    let project: ContainerRef = "project-1".parse()?;
    let allocator = tracker.allocator();

    for label in ["report.pdf", "scan.png"] {
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, label, Some(project.clone()));
    }
    allocator.allocate_placeholder(TaskFamily::SaasImport, "notion workspace", None);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let documents: Vec<SubmissionItem> = serde_json::from_value(serde_json::json!([
        { "filename": "report.pdf", "status": "pending", "task_id": "55" },
        { "filename": "scan.png", "status": "failed", "task_id": null }
    ]))?;
    let imports: Vec<SubmissionItem> = serde_json::from_value(serde_json::json!([
        { "filename": "notion workspace", "status": "pending", "task_id": 9 }
    ]))?;

    let mut real_ids = Vec::new();
    for (container, items) in [(Some(&project), documents), (None, imports)] {
        let resolution = tracker.resolve_submission(container, &items).await;
        real_ids.extend(resolution.resolved.into_iter().map(|(_, real)| real));
    }
    Ok(real_ids)
}

/// Print events until every task in `waiting`, plus the IDs `submission`
/// resolves to, has reached a terminal state (or Ctrl-C).
async fn stream_until_finished(
    tracker: &Tracker,
    mut waiting: HashSet<TaskId>,
    submission: impl Future<Output = Result<Vec<TaskId>>> + Send + 'static,
) -> Result<()> {
    let mut events = tracker.subscribe();
    let poller = tracker.spawn_poller()?;
    let mut submission = tokio::spawn(submission);
    let mut finished: HashSet<TaskId> = HashSet::new();
    let mut submitted = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if let Some(task_id) = event.task_id() {
                        finished.insert(task_id.clone());
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            resolved = &mut submission, if !submitted => {
                submitted = true;
                waiting.extend(resolved??);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }

        if submitted && waiting.iter().all(|id| finished.contains(id)) {
            break;
        }
    }

    poller.shutdown_and_join().await;
    println!("{}", serde_json::to_string(&tracker.counts())?);
    Ok(())
}
