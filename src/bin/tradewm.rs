use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tokio::join;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use tradewm::actor::desk::{self, Command, Desk, DeskSnapshot};
use tradewm::actor::sync::SyncEngine;
use tradewm::common::config::{Config, config_file, data_dir};
use tradewm::common::log;
use tradewm::model::local_store::LocalStore;
use tradewm::model::snapshot::{WindowKind, WorkspaceLayout};
use tradewm::model::window::RegistryEvent;
use tradewm::remote::{AnyPreferenceStore, Identity};

/// A floating window desk with named workspaces, driven by JSON commands on
/// stdin. Every command line is answered with the desk state on stdout.
#[derive(Parser)]
struct Cli {
    /// Path to configuration file to use (overrides default).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding the saved layout and workspaces.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// User to synchronise preferences for (overrides the config file).
    #[arg(long)]
    identity: Option<String>,

    /// Base URL of the remote preference service (overrides the config file).
    #[arg(long, value_name = "URL", conflicts_with = "remote_dir")]
    endpoint: Option<String>,

    /// Synchronise to JSON files in this directory instead of a service.
    #[arg(long, value_name = "DIR")]
    remote_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the configuration file and exit.
    Validate,
    /// Print the saved layout and workspaces as JSON.
    Dump,
    /// Run the desk (the default).
    Run,
}

fn main() {
    sigpipe::reset();
    let opt = Cli::parse();
    log::init_logging();

    let config_path = opt.config.clone().unwrap_or_else(config_file);
    let config = match Config::read_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", config_path.display());
            process::exit(1);
        }
    };
    let local = LocalStore::new(opt.data_dir.clone().unwrap_or_else(data_dir));

    match &opt.command {
        Some(Commands::Validate) => validate(&config),
        Some(Commands::Dump) => dump(&local),
        Some(Commands::Run) | None => run(&opt, config, local),
    }
}

fn validate(config: &Config) {
    let issues = config.validate();
    if issues.is_empty() {
        println!("Config validation passed");
        return;
    }
    for issue in issues {
        eprintln!("{}", issue);
    }
    process::exit(1);
}

fn dump(local: &LocalStore) {
    let layout = local.load_layout();
    let workspaces = local.load_workspaces();
    let (layout, workspaces) = match (layout, workspaces) {
        (Ok(layout), Ok(workspaces)) => (layout, workspaces),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    let doc = serde_json::json!({
        "dataDir": local.dir(),
        "initialized": local.is_initialized(),
        "layout": layout,
        "workspaces": workspaces,
    });
    match serde_json::to_string_pretty(&doc) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}

fn run(opt: &Cli, config: Config, local: LocalStore) {
    let issues = config.validate();
    if !issues.is_empty() {
        for issue in issues {
            eprintln!("{}", issue);
        }
        process::exit(1);
    }

    let endpoint = opt.endpoint.as_deref().or(config.sync.endpoint.as_deref());
    let remote = match AnyPreferenceStore::open(opt.remote_dir.as_deref(), endpoint) {
        Ok(remote) => remote,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    let identity =
        opt.identity.clone().or_else(|| config.sync.identity.clone()).map(Identity::new);
    let identity = match identity {
        _ if remote.is_disabled() => {
            info!("no remote configured, preferences stay local");
            None
        }
        None => {
            info!("no identity configured, preferences stay local");
            None
        }
        identity => identity,
    };

    let (sync_tx, sync_rx) = tradewm::actor::channel();
    let sync = SyncEngine::new(remote, sync_rx, config.sync.debounce, identity)
        .with_revision_store(local.clone());

    let (desk_tx, desk_rx) = tradewm::actor::channel();
    let mut desk = Desk::new(&config, resolve, local, sync_tx, desk_rx);
    let host = acknowledge(desk.subscribe(), desk_tx.clone());

    let ctrlc_tx = desk_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || ctrlc_tx.send(desk::Event::Shutdown)) {
        warn!("could not install Ctrl-C handler: {e}");
    }

    let stdin_tx = desk_tx;
    std::thread::spawn(move || read_commands(stdin_tx));

    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("could not start runtime: {e}");
            process::exit(1);
        }
    };
    rt.block_on(async move {
        join!(desk.run(), sync.run(), host);
    });
}

/// Every panel kind renders; the host only needs to know which one.
fn resolve(layout: &WorkspaceLayout) -> Option<WindowKind> { Some(layout.kind) }

/// Stands in for a renderer that mounts and tears down instantly.
async fn acknowledge(
    mut events: tradewm::actor::Receiver<RegistryEvent>,
    tx: desk::Sender,
) {
    while let Some((_, event)) = events.recv().await {
        match event {
            RegistryEvent::Opened { id, title } => {
                debug!(%id, %title, "mounted");
                tx.send(desk::Event::WindowMounted(id));
            }
            RegistryEvent::Closed { windows } => {
                for (id, title) in windows {
                    debug!(%id, %title, "released");
                    tx.send(desk::Event::WindowReleased(id));
                }
            }
            RegistryEvent::Changed { .. } => {}
        }
    }
}

/// Reads one JSON command per line. A blank line only prints the state. End
/// of input shuts the desk down.
fn read_commands(tx: desk::Sender) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("stdin: {e}");
                break;
            }
        };
        let line = line.trim();
        if !line.is_empty() {
            match serde_json::from_str::<Command>(line) {
                Ok(command) => tx.send(desk::Event::Command(command)),
                Err(e) => {
                    eprintln!("bad command: {e}");
                    continue;
                }
            }
        }
        let (reply, rx) = oneshot::channel();
        tx.send(desk::Event::Query(reply));
        let Ok(snapshot) = rx.blocking_recv() else { return };
        if print_snapshot(&snapshot).is_err() {
            break;
        }
    }
    tx.send(desk::Event::Shutdown);
}

fn print_snapshot(snapshot: &DeskSnapshot) -> io::Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer(&mut out, snapshot)?;
    writeln!(out)
}
