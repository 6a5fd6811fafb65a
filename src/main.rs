use std::env;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use rollcall::config::{self, Config};
use rollcall::ledger::Ledger;
use rollcall::menu::{self, App, MenuActions};
use rollcall::session::{Controller, LazyPipeline, SystemClock, V4lCameras};

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(version, about = "Face recognition attendance taker")]
struct Cli {
    /// Config file (defaults to rollcall.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a reference face image for a student
    Register {
        /// Student name; also the folder and ledger label
        name: String,
    },
    /// Recognize faces for one attendance window and save the ledger
    Attend,
    /// Interactive menu (the default)
    Menu,
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let cfg = config::load_config(config_path)?;

    match cli.command.unwrap_or(Commands::Menu) {
        Commands::Register { name } => {
            let path = Controller::from_config(cfg).register(&name)?;
            if path.is_none() {
                anyhow::bail!("No image captured for {}", name);
            }
            Ok(())
        }
        Commands::Attend => app(cfg)?.take_attendance(),
        Commands::Menu => {
            let mut app = app(cfg)?;
            let stdin = io::stdin();
            menu::run(stdin.lock(), io::stdout(), &mut app)
        }
        Commands::Config => open_config(config_path.unwrap_or(&config::CONFIG_PATH)),
    }
}

fn app(cfg: Config) -> Result<App<V4lCameras, LazyPipeline, SystemClock>> {
    let ledger = Ledger::load_or_create(&cfg.ledger_path)
        .with_context(|| format!("opening ledger {}", cfg.ledger_path.display()))?;
    info!(
        "Ledger {} has {} row(s)",
        ledger.path().display(),
        ledger.len()
    );
    Ok(App {
        controller: Controller::from_config(cfg),
        ledger,
    })
}

fn open_config(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        config::save_config(&Config::default(), Some(path))
            .with_context(|| format!("writing default config {}", path.display()))?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", path.display());

    let status = std::process::Command::new(editor)
        .arg(path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
