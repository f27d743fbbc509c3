//! Dining philosophers CLI.
//!
//! ```bash
//! # a coordinator for a table of five, then five peers
//! chandy-misra server --address 127.0.0.1:7000 --peers 5
//! chandy-misra peer --address 127.0.0.1:0 --server 127.0.0.1:7000
//!
//! # the whole table in one process, three meals each
//! chandy-misra local --size 5 --meals 3
//! ```

use chandy_misra::{
    local::LocalGroup, log, peer::Peer, server::Server, Phase, Philosopher, Result, Timing,
    Transition,
};
use clap::{Parser, Subcommand};
use color_print::cformat;
use std::{path::PathBuf, process::ExitCode};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chandy-misra")]
#[command(version, about = "Chandy-Misra dining philosophers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seat a table of peers and relay aborts
    Server {
        #[arg(short, long, env = "PHILOSOPHERS_SERVER", default_value = "127.0.0.1:7000")]
        address: String,

        /// Number of philosophers at the table
        #[arg(short, long)]
        peers: usize,
    },
    /// Run one philosopher over TCP
    Peer {
        /// Address the neighbors dial
        #[arg(short, long, default_value = "127.0.0.1:0")]
        address: String,

        #[arg(short, long, env = "PHILOSOPHERS_SERVER", default_value = "127.0.0.1:7000")]
        server: String,

        /// JSON timing configuration
        #[arg(short, long)]
        timing: Option<PathBuf>,

        /// Stop after this many meals
        #[arg(short, long)]
        meals: Option<u64>,
    },
    /// Run a whole table inside this process
    Local {
        #[arg(short, long, default_value = "5")]
        size: usize,

        #[arg(short, long)]
        timing: Option<PathBuf>,

        #[arg(short, long)]
        meals: Option<u64>,
    },
}

fn load_timing(path: Option<PathBuf>, meals: Option<u64>) -> Result<Timing> {
    let mut timing = match path {
        Some(path) => Timing::from_json_file(path)?,
        None => Timing::default(),
    };
    if meals.is_some() {
        timing.meals = meals;
    }
    Ok(timing)
}

/// Function that logs the forks a philosopher holds after each meal.
async fn watch_table(mut transitions: mpsc::UnboundedReceiver<Transition>) {
    while let Some(Transition {
        rank,
        phase,
        left,
        right,
    }) = transitions.recv().await
    {
        if phase == Phase::Releasing {
            log::debug(&cformat!(
                "<bold>{rank}</bold> ate: left fork held={} dirty={}, right fork held={} dirty={}",
                left.possessed,
                left.dirty,
                right.possessed,
                right.dirty
            ));
        }
    }
}

async fn run_local(size: usize, timing: Timing) -> Result<()> {
    let (observer, transitions) = mpsc::unbounded_channel();
    let watcher = tokio::spawn(watch_table(transitions));

    let mut tasks = Vec::with_capacity(size);
    for channel in LocalGroup::new(size) {
        let philosopher = Philosopher::new(channel, timing.clone())?.with_observer(observer.clone());
        tasks.push(tokio::spawn(philosopher.run()));
    }
    drop(observer);

    for task in tasks {
        match task.await {
            Ok(report) => {
                let report = report?;
                log::info(&cformat!(
                    "Philosopher <bold>{}</bold> ate <bold>{}</bold> meals.",
                    report.rank,
                    report.meals
                ));
            }
            Err(e) => log::error(&format!("{e}")),
        }
    }

    let _ = watcher.await;
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Server { address, peers } => Server::new(address, peers).run().await,
        Command::Peer {
            address,
            server,
            timing,
            meals,
        } => {
            let report = Peer::new(address, server, load_timing(timing, meals)?)
                .run()
                .await?;
            log::info(&cformat!("Ate <bold>{}</bold> meals.", report.meals));
            Ok(())
        }
        Command::Local {
            size,
            timing,
            meals,
        } => run_local(size, load_timing(timing, meals)?).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error(&format!("{e}"));
            ExitCode::FAILURE
        }
    }
}
