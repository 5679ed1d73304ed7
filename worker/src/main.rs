/// Pipeplot reference worker - Main entry point
/// Connects back to the host that launched it and plays the rounds of a job file
mod job;

use anyhow::Context;
use clap::Parser;
use job::{Job, Record};
use pipeplot_core::WorkerChannel;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pipeplot-worker",
    about = "Reference worker for pipeplot sessions",
    version = env!("CARGO_PKG_VERSION")
)]
struct Args {
    /// Job file
    #[arg(value_name = "JOB", help = "Path to the job file (TOML)")]
    job: PathBuf,

    /// Log level
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        default_value = "warn",
        help = "Log level (trace, debug, info, warn, error)"
    )]
    log_level: String,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    /// How long to keep trying to reach the host channel
    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    connect_wait_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.parse()?))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true)
        .init();

    let job = Job::load(&args.job)?;
    let pid = std::process::id();
    info!(pid, "Worker v{} starting", pipeplot_core::VERSION);

    let mut record = Record::new(pid);
    if let Some(path) = &job.record {
        record.save(path)?;
    }

    if !job.connect {
        info!("Job does not connect, idling");
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    let wait = Duration::from_millis(args.connect_wait_ms);
    for (index, round) in job.rounds.iter().enumerate() {
        let mut channel = WorkerChannel::connect_own(wait)
            .await
            .with_context(|| format!("connecting for round {}", index + 1))?;
        let table = channel
            .receive()
            .await
            .with_context(|| format!("receiving round {}", index + 1))?;
        debug!(
            round = index + 1,
            columns = table.column_count,
            rows = table.row_count,
            "Table received"
        );

        if index == 0 {
            if let Some(path) = &job.output {
                job::write_csv(&table, path)?;
                info!("Wrote {}", path.display());
            }
        }
        record.tables.push(table);
        if let Some(path) = &job.record {
            record.save(path)?;
        }

        if round.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(round.delay_ms)).await;
        }

        if !round.reply {
            warn!(round = index + 1, "Hanging up without a reply");
            return Ok(());
        }
        channel
            .reply(&round.report())
            .await
            .with_context(|| format!("replying to round {}", index + 1))?;
    }

    info!("Job finished after {} rounds", job.rounds.len());
    Ok(())
}
