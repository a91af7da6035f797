//! Tunnel Agent
//!
//! Command-line front end for the tunnel session core. Loads settings,
//! sets up logging, drives a `SessionController` from stdin commands and
//! keeps the installed binary current through the release feed.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tunnel_core::config::mask;
use tunnel_core::{share_link, ConfigStore, JsonFileStore};

pub mod logging;
pub mod runner;
pub mod settings;
pub mod updates;

pub use logging::{init_logging, LoggingConfig};
pub use runner::{run_session, RunArgs};
pub use settings::{load_settings, AgentSettings, UpdateSettings};
pub use updates::{DownloadedUpdate, ReleaseInfo, UpdateChecker};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the sslocal executable
    #[arg(long, global = true)]
    pub proxy_binary: Option<PathBuf>,

    /// Where the transient process config is written
    #[arg(long, global = true)]
    pub process_config: Option<PathBuf>,

    /// Persisted connection settings (JSON)
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,

    /// Enable or disable the periodic update check
    #[arg(long, global = true)]
    pub update_enabled: Option<bool>,

    /// Seconds between update checks
    #[arg(long, global = true)]
    pub update_interval: Option<u64>,

    /// Release feed repository as owner/repo
    #[arg(long, global = true)]
    pub update_repo: Option<String>,

    /// Base URL of the release API
    #[arg(long, global = true)]
    pub update_api: Option<String>,

    /// Directory downloaded updates are written to
    #[arg(long, global = true)]
    pub download_dir: Option<PathBuf>,

    /// Download updates without restarting into them
    #[arg(long, global = true)]
    pub no_auto_restart: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write logs to this file, rotated daily
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start an interactive session (default)
    Run(RunArgs),
    /// Decode an ss:// link and store it
    Import {
        /// The share link
        link: String,
    },
    /// Print the stored connection settings
    Show,
    /// Print the stored connection settings as a share link
    Link,
    /// Query the release feed once
    CheckUpdate,
}

pub async fn run_agent(args: Args, settings: AgentSettings) -> anyhow::Result<()> {
    let command = args
        .command
        .unwrap_or_else(|| Command::Run(RunArgs::default()));

    match command {
        Command::Run(run) => run_session(run, settings).await,
        Command::Import { link } => import_link(&settings, &link),
        Command::Show => show_config(&settings),
        Command::Link => print_link(&settings),
        Command::CheckUpdate => check_update(&settings).await,
    }
}

fn import_link(settings: &AgentSettings, link: &str) -> anyhow::Result<()> {
    let config = share_link::decode(link).context("Failed to import share link")?;
    let mut store = JsonFileStore::new(&settings.config_file);
    store.save(&config)?;

    tracing::info!(server = %config.server, "Share link imported");
    println!(
        "Imported {}:{} ({}) into {}",
        config.server,
        config.port,
        config.method,
        settings.config_file.display()
    );
    Ok(())
}

fn show_config(settings: &AgentSettings) -> anyhow::Result<()> {
    let config = JsonFileStore::new(&settings.config_file).load()?;
    println!("server:   {}", config.server);
    println!("port:     {}", config.port);
    println!("password: {}", mask(&config.password));
    println!("method:   {}", config.method);
    Ok(())
}

fn print_link(settings: &AgentSettings) -> anyhow::Result<()> {
    let config = JsonFileStore::new(&settings.config_file).load()?;
    config
        .validate()
        .context("Stored settings cannot be shared")?;
    println!("{}", share_link::encode(&config.trimmed()));
    Ok(())
}

async fn check_update(settings: &AgentSettings) -> anyhow::Result<()> {
    let checker = UpdateChecker::new(settings.updates.clone())?;
    match checker.check().await? {
        Some(release) => println!(
            "New version {} available: {}",
            release.version, release.download_url
        ),
        None => println!("Up to date (v{})", settings.updates.current_version),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnel_core::ConnectionConfig;

    fn settings_in(dir: &tempfile::TempDir) -> AgentSettings {
        AgentSettings {
            config_file: dir.path().join("config.json"),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_subcommands() {
        let args = Args::try_parse_from(["tunnel-agent", "import", "ss://abc@host:1"]).unwrap();
        assert!(matches!(args.command, Some(Command::Import { ref link }) if link == "ss://abc@host:1"));

        let args = Args::try_parse_from([
            "tunnel-agent",
            "run",
            "--server",
            "example.org",
            "--no-connect",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        match args.command {
            Some(Command::Run(run)) => {
                assert_eq!(run.server.as_deref(), Some("example.org"));
                assert!(run.no_connect);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let args = Args::try_parse_from(["tunnel-agent"]).unwrap();
        assert!(args.command.is_none());
    }

    #[test]
    fn test_import_persists_decoded_link() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);

        import_link(&settings, "ss://YWVzLTI1Ni1nY206c2VjcmV0@example.org:8388").unwrap();

        let stored = JsonFileStore::new(&settings.config_file).load().unwrap();
        assert_eq!(
            stored,
            ConnectionConfig::new("example.org", "8388", "secret", "aes-256-gcm")
        );
    }

    #[test]
    fn test_import_rejects_bad_link_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);

        assert!(import_link(&settings, "vmess://whatever").is_err());
        assert!(!settings.config_file.exists());
    }

    #[test]
    fn test_link_requires_complete_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);

        // Missing file is created with defaults, which have no server.
        assert!(print_link(&settings).is_err());
        assert!(show_config(&settings).is_ok());
    }
}
