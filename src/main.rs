use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use marketradar::config::Config;
use marketradar::extractor::{DataExtractor, RegexExtractor};
use marketradar::face::{self, AppState};
use marketradar::hands::{ChromeFactory, DriverFactory};
use marketradar::logging;
use marketradar::mission::{self, MissionEvent};
use marketradar::registry::{MissionRegistry, MissionState};

#[derive(Parser)]
#[command(name = "marketradar", version, about = "Autonomous multi-source market research agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API, mission WebSocket and console page.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one mission in the foreground and print its events as JSON lines.
    Run {
        goal: String,
        /// Show the browser window.
        #[arg(long)]
        headed: bool,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    let mut config = Config::from_env()?;
    let factory: Arc<dyn DriverFactory> = Arc::new(ChromeFactory::new(config.browser.clone()));
    let extractor: Arc<dyn DataExtractor> = Arc::new(RegexExtractor::default());

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
                if std::env::var("PUBLIC_WS_BASE").is_err() {
                    config.public_ws_base = format!("ws://localhost:{port}");
                }
            }
            let state = AppState::new(&config, factory, extractor);
            face::serve(&config, state).await
        }
        Command::Run {
            goal,
            headed,
            max_iterations,
        } => run_once(&config, factory, extractor, &goal, !headed, max_iterations).await,
    }
}

async fn run_once(
    config: &Config,
    factory: Arc<dyn DriverFactory>,
    extractor: Arc<dyn DataExtractor>,
    goal: &str,
    headless: bool,
    max_iterations: Option<u32>,
) -> Result<()> {
    let registry = MissionRegistry::new();
    let settings = Arc::new(config.agent.clone());
    let record = registry.create(
        goal,
        headless,
        max_iterations.unwrap_or(settings.max_iterations),
        &settings,
    )?;

    let driver = factory.create(headless);
    let mut stream = mission::launch(&registry, record.id, driver, extractor, settings)?;

    let cancel = stream.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping mission");
            cancel.cancel();
        }
    });

    while let Some(event) = stream.next().await {
        println!("{}", serde_json::to_string(&event)?);
        if matches!(event, MissionEvent::Finished) {
            break;
        }
    }

    let status = registry.status(record.id)?;
    if status.state == MissionState::Failed {
        anyhow::bail!(
            "mission failed: {}",
            status.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}
