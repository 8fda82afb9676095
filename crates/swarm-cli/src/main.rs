use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use swarm_client::{
    ArtifactExporter, DispatchOutcome, Dispatcher, HttpRemote, PollEvent, Poller, RemoteService,
    Settings, SettingsOverrides,
};
use swarm_core::{LogStream, PolicySource, SharedSnapshot, MAX_ITERATIONS};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const WATCH_EVENT_CAPACITY: usize = 16;

#[derive(Parser)]
#[command(name = "swarm")]
#[command(about = "Headless control of the policy swarm pipeline", long_about = None)]
struct Cli {
    /// Base URL of the pipeline service
    #[arg(long, env = "SWARM_API_URL", global = true)]
    api_url: Option<String>,
    /// Milliseconds between polls for `watch`
    #[arg(long, env = "SWARM_POLL_INTERVAL_MS", global = true)]
    poll_interval_ms: Option<u64>,
    /// Directory exported policies are written to
    #[arg(long, env = "SWARM_EXPORT_DIR", global = true)]
    export_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current run
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Start a run from policy text
    Submit { policy: String },
    /// Start a run from a .md, .markdown or .txt file
    Upload { path: PathBuf },
    /// Pause the running cycle
    Pause,
    /// Continue a paused cycle
    Resume,
    /// Stop a paused run and save its policy
    StopExport,
    /// Save the final policy of a completed run
    Export,
    /// List the simulated agents
    Agents,
    /// Read or change the pipeline config
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// Follow the run until it completes
    Watch {
        /// Save the final policy once the run completes
        #[arg(long)]
        export: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    Get,
    Set {
        #[arg(long, action = ArgAction::Set)]
        fast: bool,
    },
}

struct Session {
    settings: Settings,
    remote: Arc<dyn RemoteService>,
    store: SharedSnapshot,
    dispatcher: Dispatcher,
}

impl Session {
    fn new(settings: Settings) -> Self {
        let remote = Arc::new(HttpRemote::new(settings.api_url.clone()));
        Self::with_remote(settings, remote)
    }

    fn with_remote(settings: Settings, remote: Arc<dyn RemoteService>) -> Self {
        let store = SharedSnapshot::new();
        let dispatcher = Dispatcher::new(
            remote.clone(),
            store.clone(),
            ArtifactExporter::to_directory(settings.export_dir.clone()),
        );
        Self {
            settings,
            remote,
            store,
            dispatcher,
        }
    }

    fn poller(&self) -> Poller {
        Poller::new(
            self.remote.clone(),
            self.store.clone(),
            self.settings.poll_interval,
        )
    }

    /// Actions are gated on the phase, so learn it before dispatching.
    async fn refresh(&self) {
        let applied = self.poller().poll_once().await;
        if applied.is_partial() {
            let missing: Vec<&str> = applied.missing.iter().map(|f| f.as_str()).collect();
            eprintln!("warning: could not read {}", missing.join(", "));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = Settings::load(SettingsOverrides {
        api_url: cli.api_url,
        poll_interval_ms: cli.poll_interval_ms,
        export_dir: cli.export_dir,
    });
    let session = Session::new(settings);

    match cli.command {
        Commands::Status { json } => {
            session.refresh().await;
            print_status(&session, json)?;
        }
        Commands::Submit { policy } => {
            session.refresh().await;
            let source = PolicySource::text(policy)?;
            report(session.dispatcher.submit(source).await?)?;
        }
        Commands::Upload { path } => {
            let source = PolicySource::read_file(&path)?;
            session.refresh().await;
            report(session.dispatcher.submit(source).await?)?;
        }
        Commands::Pause => {
            session.refresh().await;
            report(session.dispatcher.pause().await?)?;
        }
        Commands::Resume => {
            session.refresh().await;
            report(session.dispatcher.resume().await?)?;
        }
        Commands::StopExport => {
            session.refresh().await;
            report(session.dispatcher.stop_and_export().await?)?;
        }
        Commands::Export => {
            session.refresh().await;
            report(session.dispatcher.export().await?)?;
        }
        Commands::Agents => {
            let agents = session.dispatcher.agents().await?;
            for agent in agents {
                println!("{} ({})", agent.name, agent.role);
                if !agent.traits.is_empty() {
                    println!("  traits: {}", agent.traits.join(", "));
                }
                if !agent.background.is_empty() {
                    println!("  {}", agent.background);
                }
            }
        }
        Commands::Config { action } => {
            let config = match action {
                ConfigCommands::Get => session.dispatcher.fetch_config().await?,
                ConfigCommands::Set { fast } => session.dispatcher.set_fast_mode(fast).await?,
            };
            println!(
                "mode={} max_exchanges={} max_senate_exchanges={}",
                config.speed_label(),
                config.max_exchanges,
                config.max_senate_exchanges
            );
        }
        Commands::Watch { export } => watch(&session, export).await?,
    }

    Ok(())
}

fn report(outcome: DispatchOutcome) -> Result<()> {
    match outcome {
        DispatchOutcome::Sent(action) => println!("{action}: sent"),
        DispatchOutcome::Exported { path, bytes } => {
            println!("saved {} ({bytes} bytes)", path.display())
        }
        DispatchOutcome::Ignored { action, phase } => {
            bail!("{action} is not available while the run is {phase}")
        }
    }
    Ok(())
}

fn print_status(session: &Session, json: bool) -> Result<()> {
    let store = session.store.lock();
    let status = store.status();
    let phase = store.phase();
    if json {
        let latest = store.latest_metric().map(|m| {
            serde_json::json!({
                "iteration": m.iteration,
                "citizen_score": m.citizen_score,
                "senate_score": m.senate_score,
            })
        });
        let counts: HashMap<&str, usize> = LogStream::ALL
            .into_iter()
            .map(|stream| (stream.as_str(), store.logs(stream).len()))
            .collect();
        let body = serde_json::json!({
            "phase": phase.label(),
            "iteration": status.iteration,
            "paused": status.paused,
            "complete": status.complete,
            "latest_metric": latest,
            "log_counts": counts,
            "has_artifact": !store.artifact().is_empty(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).context("failed to encode status")?
        );
        return Ok(());
    }
    println!("{phase}: {}", phase.headline(status.iteration));
    println!("iteration {}/{MAX_ITERATIONS}", status.iteration);
    if let Some(metric) = store.latest_metric() {
        println!(
            "Citizen {:.1}%, Senate {:.1}%",
            metric.citizen_score, metric.senate_score
        );
    }
    for stream in LogStream::ALL {
        println!("{}: {} entries", stream.as_str(), store.logs(stream).len());
    }
    Ok(())
}

/// Prints new feed lines as they arrive and exits once the run finishes or
/// on Ctrl-C. Completion is read from the store, since a slow reader can
/// miss the tick that reported it.
async fn watch(session: &Session, export: bool) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(WATCH_EVENT_CAPACITY);
    let poller = session.poller().with_events(tx).spawn();
    let mut printed: HashMap<LogStream, usize> = HashMap::new();
    let mut last_status = None;

    let finished = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break false,
            event = rx.recv() => {
                let Some(PollEvent::Synced(_)) = event else {
                    break false;
                };
                let store = session.store.lock();
                for stream in LogStream::ALL {
                    let logs = store.logs(stream);
                    let seen = printed.entry(stream).or_insert(0);
                    if logs.len() < *seen {
                        *seen = 0;
                    }
                    for entry in logs[*seen..].iter().filter(|e| !e.is_system()) {
                        println!(
                            "[{}] {} ({}): {}",
                            stream.as_str(),
                            entry.agent,
                            entry.role,
                            entry.message
                        );
                    }
                    *seen = logs.len();
                }
                let status = store.status();
                if last_status != Some(status) {
                    println!("-- {}", store.phase().headline(status.iteration));
                    last_status = Some(status);
                }
                if store.run_finished() {
                    println!("{}", store.artifact().text());
                    break true;
                }
            }
        }
    };
    poller.stop().await;

    if finished && export {
        report(session.dispatcher.export().await?)?;
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
