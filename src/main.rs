//! camera-session CLI
//!
//! Drives a camera session against the bundled simulated platform. Useful for
//! watching the start/stop protocol in the logs and for tuning the readiness
//! and capability timings in the config file.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use camera_session::logging;
use camera_session::media::simulated::SimulatedPlatform;
use camera_session::{CameraSession, Config, SessionEvent, SessionEventKind, SessionRequest};

/// Parsed command line options
#[derive(Debug, Default, PartialEq)]
struct Options {
    help: bool,
    torch: bool,
    cycles: u32,
    config_path: Option<PathBuf>,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self> {
        let mut options = Options::default();
        let mut iter = args.iter().skip(1);

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-h" | "--help" => options.help = true,
                "-t" | "--torch" => options.torch = true,
                "-n" | "--cycles" => {
                    let value = iter.next().context("--cycles needs a value")?;
                    options.cycles = value
                        .parse()
                        .with_context(|| format!("Invalid cycle count: {}", value))?;
                }
                "-c" | "--config" => {
                    let value = iter.next().context("--config needs a path")?;
                    options.config_path = Some(PathBuf::from(value));
                }
                other => bail!("Unknown argument: {}", other),
            }
        }

        Ok(options)
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let options = Options::parse(&args)?;

    if options.help {
        print_help();
        return Ok(());
    }

    let _log_guard = match logging::init_logging() {
        Ok(guard) => {
            if let Ok(dir) = logging::get_log_dir() {
                info!("Logging to {:?}", dir);
            }
            Some(guard)
        }
        Err(e) => {
            logging::init_console_logging();
            warn!("File logging unavailable: {}", e);
            None
        }
    };

    info!("camera-session starting...");

    let config = match &options.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Ok(path) = config.config_path() {
        info!("Configuration loaded from {:?}", path);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(config, &options));

    if let Err(e) = &result {
        error!("Session error: {:#}", e);
    }
    info!("Shutdown complete");
    result
}

async fn run(config: Config, options: &Options) -> Result<()> {
    let platform = Arc::new(SimulatedPlatform::new(config.simulator.clone()));
    let session = CameraSession::spawn(platform.clone(), config.session.clone());
    info!("Session {} spawned", session.id());

    tokio::spawn(log_events(session.subscribe()));

    let sink = platform.sink("preview");
    let constraints = config.session.default_constraints.clone().shared();
    let torch = options.torch || config.session.torch;
    let request = SessionRequest::new(sink, constraints).with_torch(torch);

    if options.cycles == 0 {
        let capabilities = session.request_start(request).await?;
        println!("{}", serde_json::to_string_pretty(&capabilities)?);

        info!("Camera running, press Ctrl+C to stop...");
        let (ctrl_c_tx, mut ctrl_c_rx) = mpsc::unbounded_channel();
        ctrlc::set_handler(move || {
            let _ = ctrl_c_tx.send(());
        })?;
        ctrl_c_rx.recv().await;
        info!("Ctrl+C received, shutting down...");

        session.request_stop().await?;
    } else {
        for cycle in 1..=options.cycles {
            // Force a real restart each time; an identical request would be reused.
            let capabilities = session
                .request_start(request.clone().with_restart(true))
                .await
                .with_context(|| format!("Cycle {} failed to start", cycle))?;
            info!(
                "Cycle {}/{}: camera on ({})",
                cycle,
                options.cycles,
                capabilities.names().collect::<Vec<_>>().join(", ")
            );
            session.request_stop().await?;
        }
        info!(
            "Completed {} cycles with {} acquisitions",
            options.cycles,
            platform.acquisitions()
        );
    }

    session.shutdown().await;
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match event.kind {
                SessionEventKind::CameraOn { torch_enabled, .. } => {
                    info!("[{}] camera on (torch: {})", event.at, torch_enabled)
                }
                SessionEventKind::CameraOff => info!("[{}] camera off", event.at),
                SessionEventKind::Error { error } => {
                    warn!("[{}] camera error: {}", event.at, error)
                }
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Missed {} session events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_help() {
    println!("camera-session - Serialized camera start/stop controller (simulated device)");
    println!();
    println!("USAGE:");
    println!("    camera-session [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help           Print this help message");
    println!("    -t, --torch          Request the torch when starting");
    println!("    -n, --cycles <N>     Run N start/stop cycles and exit (0 = run until Ctrl+C)");
    println!("    -c, --config <PATH>  Load configuration from PATH");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                  Set log level (e.g., debug, info, warn)");
    println!("    CAMERA_SESSION_LOG_PATH   Override the log directory");
}
