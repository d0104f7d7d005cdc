use clap::{Parser, Subcommand};
use labs_launcher::configuration::{LaunchConfig, Overrides, Settings, SETTINGS};
use labs_launcher::container_management::ContainerStatus;
use labs_launcher::engine::{DockerEngine, Engine};
use labs_launcher::image_pull::{ProgressUpdate, PullOutcome};
use labs_launcher::launcher::{Launcher, LauncherReport};
use labs_launcher::registry::TagResolver;
use labs_launcher::telemetry::Pinger;
use labs_launcher::web_interface::WebServer;
use log::{error, info, warn, LevelFilter};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "labs-launcher")]
#[command(version)]
#[command(about = "Start, stop and update a local notebook server container")]
struct Cli {
    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,
    /// Only log warnings and errors
    #[arg(long, global = true)]
    quiet: bool,
    /// Use the newest registry tag even if it is not present locally
    #[arg(long, global = true)]
    latest: bool,
    /// Never send usage pings
    #[arg(long, global = true)]
    no_pings: bool,
    /// Settings file to read and write
    #[arg(long, global = true, env = "LABS_LAUNCHER_SETTINGS")]
    settings_file: Option<PathBuf>,
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Show server status, image tag and address
    Status,
    /// Start the server, downloading the image first if needed
    Start {
        /// Host directory to make available to the server
        #[arg(long)]
        mount: Option<PathBuf>,
    },
    /// Stop and remove the server
    Stop,
    /// Download the newest image
    Update,
    /// List registry tags, newest first
    Tags,
    /// Print every status change until interrupted
    Watch,
    /// Run the local control interface
    Serve,
    /// Inspect or change persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
enum SettingsAction {
    List,
    Get { key: String },
    Set { key: String, value: String },
    Reset,
    Path,
}

fn log_level(cli: &Cli) -> LevelFilter {
    if cli.debug {
        LevelFilter::Debug
    } else if cli.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn format_progress(update: &ProgressUpdate) -> String {
    match (update.fraction, update.total) {
        (Some(fraction), Some(total)) => format!(
            "Downloading: {:>3.0}% ({} of {})",
            fraction * 100.0,
            human_bytes(update.current),
            human_bytes(total)
        ),
        (Some(fraction), None) => format!("Downloading: {:>3.0}%", fraction * 100.0),
        _ => format!("Downloading: {}", human_bytes(update.current)),
    }
}

fn spawn_progress_printer(launcher: &Launcher) -> JoinHandle<()> {
    let mut rx = launcher.subscribe_progress();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let update = *rx.borrow_and_update();
            if let Some(update) = update {
                eprint!("\r{}", format_progress(&update));
            }
        }
    })
}

/// Ctrl-C cancels a running download instead of killing the process.
fn spawn_cancel_on_interrupt(launcher: &Arc<Launcher>) -> JoinHandle<()> {
    let launcher = launcher.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && !launcher.cancel_update() {
            warn!("Interrupted");
            std::process::exit(130);
        }
    })
}

fn print_report(report: &LauncherReport) {
    println!(
        "Docker:       {}",
        if report.available { "available" } else { "not available" }
    );
    println!("Server:       {}", report.status);
    let tag = report.tag.as_deref().unwrap_or("none");
    match (&report.latest_tag, report.update_available) {
        (Some(latest), true) => println!("Image tag:    {} (update available: {})", tag, latest),
        _ => println!("Image tag:    {}", tag),
    }
    println!(
        "Address:      {}",
        report.address.as_deref().unwrap_or("unavailable")
    );
    if let Some(failure) = &report.last_failure {
        println!("Last failure: {} ({})", failure.kind, failure.detail);
    }
}

fn handle_settings(settings: &mut Settings, action: &SettingsAction) -> Result<(), Box<dyn Error>> {
    match action {
        SettingsAction::List => {
            let defaults = LaunchConfig::default();
            for spec in SETTINGS {
                println!(
                    "{} = {:?}  [{}, default {:?}]\n    {}",
                    spec.key,
                    settings.get(spec.key)?,
                    spec.kind.name(),
                    defaults.get(spec.key)?,
                    spec.description
                );
            }
        }
        SettingsAction::Get { key } => println!("{}", settings.get(key)?),
        SettingsAction::Set { key, value } => {
            settings.set(key, value)?;
            info!("Set {} in {}", key, settings.path().display());
        }
        SettingsAction::Reset => {
            settings.reset()?;
            info!("Restored defaults in {}", settings.path().display());
        }
        SettingsAction::Path => println!("{}", settings.path().display()),
    }
    Ok(())
}

async fn build_launcher(cli: &Cli, config: LaunchConfig) -> Result<Arc<Launcher>, Box<dyn Error>> {
    let engine: Arc<dyn Engine> = Arc::new(DockerEngine::connect()?);
    let resolver = TagResolver::new(&config.registry_url)?;
    let pinger = Pinger::new(&config, !cli.no_pings);
    let mut launcher = Launcher::new(config, engine, resolver, pinger, cli.latest);
    if matches!(cli.command, Command::Serve) {
        launcher = launcher.with_background_pings();
    }
    let launcher = Arc::new(launcher);
    launcher.initialise().await;
    Ok(launcher)
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let path = match &cli.settings_file {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    let mut settings = Settings::load(&path)?;

    if let Command::Settings { action } = &cli.command {
        return handle_settings(&mut settings, action);
    }

    let config = settings.resolve(&cli.overrides);
    let launcher = build_launcher(&cli, config).await?;

    match &cli.command {
        Command::Status => print_report(&launcher.report().await),
        Command::Tags => {
            for tag in &launcher.tags().registry {
                println!("{}", tag);
            }
        }
        Command::Start { mount } => {
            let mut request = launcher.default_request();
            if let Some(mount) = mount {
                request.mount = mount.clone();
            }
            let printer = spawn_progress_printer(&launcher);
            let interrupt = spawn_cancel_on_interrupt(&launcher);
            let result = launcher.start(&request).await;
            printer.abort();
            interrupt.abort();

            let status = result?;
            if status == ContainerStatus::Running {
                let address = launcher
                    .controller()
                    .server_address()
                    .await
                    .unwrap_or_else(|| "unavailable".to_string());
                println!("Server running at {}", address);
                println!(
                    "Open {} and connect to a local runtime with this address.",
                    launcher.config().colab_link
                );
            } else {
                println!("Server is {}", status);
            }
        }
        Command::Stop => println!("Server is {}", launcher.stop().await?),
        Command::Update => {
            let printer = spawn_progress_printer(&launcher);
            let interrupt = spawn_cancel_on_interrupt(&launcher);
            let result = launcher.update().await;
            printer.abort();
            interrupt.abort();
            eprintln!();

            match result? {
                PullOutcome::Completed => println!(
                    "Image {} is up to date",
                    launcher.tags().local.as_deref().unwrap_or("unknown")
                ),
                PullOutcome::Cancelled => println!("Download cancelled"),
            }
        }
        Command::Watch => {
            let cancel = CancellationToken::new();
            let mut rx = launcher.poller().subscribe();
            let watcher = {
                let launcher = launcher.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { launcher.watch_status(cancel).await })
            };

            loop {
                let snapshot = *rx.borrow_and_update();
                println!(
                    "{}  docker {}  server {}",
                    chrono::Local::now().format("%H:%M:%S"),
                    if snapshot.available { "available" } else { "unavailable" },
                    snapshot.status
                );
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = rx.changed() => if changed.is_err() { break },
                }
            }
            cancel.cancel();
            let _ = watcher.await;
        }
        Command::Serve => {
            let cancel = CancellationToken::new();
            let watcher = {
                let launcher = launcher.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { launcher.watch_status(cancel).await })
            };
            let interrupt = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                })
            };

            let port = launcher.config().control_port;
            println!("Control interface at http://{}", WebServer::address(port));
            let result = WebServer::new(launcher.clone())
                .start(port, cancel.clone())
                .await;

            cancel.cancel();
            interrupt.abort();
            let _ = watcher.await;
            launcher.cancel_update();
            result?;
        }
        Command::Settings { .. } => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(log_level(&cli))
        .format_target(false)
        .init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
