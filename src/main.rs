use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use polaris::audit::WorkLog;
use polaris::config::{JobConfig, StoreConfig};
use polaris::coordinator::CreateOutcome;
use polaris::job::{JobOptions, JobRegistry, RecordingJob};
use polaris::node::LocalCluster;
use polaris::shutdown::install_shutdown_handler;
use polaris::store;

#[derive(Parser, Debug)]
#[command(name = "polaris")]
#[command(version)]
#[command(about = "Distributed range job runner")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run an in-process cluster with the HTTP API
    Serve(ServeArgs),

    /// Run a cluster under chronic worker failures to test stability
    Test(TestArgs),
}

#[derive(clap::Args, Debug)]
struct JobArgs {
    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "1000")]
    heartbeat_ms: u64,

    /// Silence after which a working range is reassigned, in milliseconds
    #[arg(long, default_value = "5000")]
    stale_ms: u64,

    /// Reassignments allowed for a range of an ensured job
    #[arg(long, default_value = "5")]
    retries: u32,

    /// Ranges per worker when partitioning a job
    #[arg(long, default_value = "1")]
    divisions: usize,

    /// Interval between work units on each worker, in milliseconds
    #[arg(long, default_value = "10")]
    work_ms: u64,
}

impl JobArgs {
    fn config(&self) -> JobConfig {
        JobConfig {
            heartbeat_interval_ms: self.heartbeat_ms,
            stale_timeout_ms: self.stale_ms,
            max_retries: self.retries,
            divisions_per_worker: self.divisions,
            work_interval_ms: self.work_ms,
        }
    }
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Number of nodes, including the leader
    #[arg(long, default_value = "3")]
    nodes: usize,

    /// Address of the HTTP API, served by the first node
    #[arg(long, short = 's', default_value = "127.0.0.1:3000")]
    api: SocketAddr,

    /// Persist job snapshots in this directory instead of memory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Workers suffer from a chronic disease and die after a time
    #[arg(long, short = 'c')]
    chronic: bool,

    #[command(flatten)]
    job: JobArgs,
}

#[derive(Parser, Debug)]
struct TestArgs {
    /// Start of the test range
    #[arg(long, default_value = "0")]
    from: i64,

    /// End of the test range (exclusive)
    #[arg(long, default_value = "10000")]
    to: i64,

    /// Number of workers, not counting the leader
    #[arg(long, short = 'w', default_value = "4")]
    workers: usize,

    /// Mean interval between chronic restarts, in milliseconds
    #[arg(long, default_value = "3000")]
    chronic_ms: u64,

    /// Give up after this many seconds
    #[arg(long, default_value = "600")]
    timeout_secs: u64,

    #[command(flatten)]
    job: JobArgs,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn test_registry(log: &WorkLog) -> Arc<JobRegistry> {
    Arc::new(JobRegistry::new().with(RecordingJob::NAME, Arc::new(RecordingJob::new(log.clone()))))
}

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.nodes < 2 {
        return Err("a cluster needs at least two nodes (leader and one worker)".into());
    }
    let shutdown = install_shutdown_handler()?;

    let log = WorkLog::new();
    let store = store::open(&StoreConfig {
        data_dir: args.data_dir,
    })
    .await?;
    let mut cluster = LocalCluster::new(args.job.config(), test_registry(&log), store);
    cluster.boot(args.nodes, Some(args.api)).await?;
    tracing::info!(nodes = args.nodes, api = %args.api, chronic = args.chronic, "Cluster running");

    if args.chronic {
        let mut rng = StdRng::from_entropy();
        loop {
            let delay = Duration::from_millis(rng.gen_range(15_000..75_000));
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {
                    cluster.chronic_tick(&mut rng).await;
                }
            }
        }
    } else {
        shutdown.cancelled().await;
    }

    cluster.shutdown().await;
    tracing::info!(units = log.len(), "Cluster stopped");
    Ok(())
}

async fn run_test(args: TestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = install_shutdown_handler()?;

    let log = WorkLog::new();
    let store = store::open(&StoreConfig::default()).await?;
    let mut cluster = LocalCluster::new(args.job.config(), test_registry(&log), store);
    cluster.boot(args.workers + 1, None).await?;

    let leader = cluster.leader_handle().await.ok_or("no leader elected")?;
    let options = JobOptions::new(args.from, args.to).with_ensure(true);
    let CreateOutcome::Created(job_id) = leader.create_job(RecordingJob::NAME, options).await? else {
        return Err("job creation was forwarded away from the leader".into());
    };
    tracing::info!(job_id = %job_id, from = args.from, to = args.to, "Test job started");

    let mut rng = StdRng::from_entropy();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut poll = tokio::time::interval(Duration::from_millis(200));
    let mut finished = false;
    let mut next_kill = tokio::time::Instant::now() + jitter(&mut rng, args.chronic_ms);

    while tokio::time::Instant::now() < deadline {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep_until(next_kill) => {
                cluster.chronic_tick(&mut rng).await;
                next_kill = tokio::time::Instant::now() + jitter(&mut rng, args.chronic_ms);
            }
            _ = poll.tick() => {
                if cluster.is_finished(job_id).await {
                    finished = true;
                    break;
                }
            }
        }
    }

    cluster.shutdown().await;
    if !finished {
        tracing::warn!(job_id = %job_id, "Test job did not finish");
    }
    let report = log.report(args.from, args.to);
    if !report.is_clean() {
        tracing::warn!(
            duplicates = report.duplicates,
            missing = report.missing,
            "Work was duplicated or lost"
        );
    }
    println!("{}", report);
    Ok(())
}

/// Uniform delay in `[mean / 2, mean * 3 / 2)`.
fn jitter(rng: &mut StdRng, mean_ms: u64) -> Duration {
    let mean_ms = mean_ms.max(2);
    Duration::from_millis(rng.gen_range(mean_ms / 2..mean_ms + mean_ms / 2))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Commands::Serve(serve_args) => run_serve(serve_args).await?,
        Commands::Test(test_args) => run_test(test_args).await?,
    }

    Ok(())
}
