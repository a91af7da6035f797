//! Interactive session loop
//!
//! One task owns the controller. Sampling ticks, stdin commands, update
//! notifications and Ctrl-C are multiplexed with `tokio::select!`, so
//! every state transition runs on the same task in arrival order.

use std::io::{self, BufRead};
use std::thread;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tunnel_core::{
    share_link, ConfigStore, ConnectionConfig, HostEnvironment, JsonFileStore, SessionController,
    SystemHost,
};

use crate::settings::AgentSettings;
use crate::updates::{DownloadedUpdate, UpdateChecker};

#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Import this ss:// link before connecting
    #[arg(long)]
    pub link: Option<String>,

    #[arg(long)]
    pub server: Option<String>,

    #[arg(long)]
    pub port: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    #[arg(long)]
    pub method: Option<String>,

    /// Start disconnected and wait for a command
    #[arg(long)]
    pub no_connect: bool,
}

/// A line typed on stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Toggle,
    Connect,
    Disconnect,
    Status,
    Quit,
}

impl SessionCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "toggle" | "t" => Some(Self::Toggle),
            "connect" | "c" => Some(Self::Connect),
            "disconnect" | "d" => Some(Self::Disconnect),
            "status" | "s" => Some(Self::Status),
            "quit" | "exit" | "q" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Stored fields with the link applied first, then individual overrides
pub fn merge_overrides(
    stored: ConnectionConfig,
    run: &RunArgs,
) -> tunnel_core::Result<ConnectionConfig> {
    let mut config = match &run.link {
        Some(link) => share_link::decode(link)?,
        None => stored,
    };
    if let Some(server) = &run.server {
        config.server = server.clone();
    }
    if let Some(port) = &run.port {
        config.port = port.clone();
    }
    if let Some(password) = &run.password {
        config.password = password.clone();
    }
    if let Some(method) = &run.method {
        config.method = method.clone();
    }
    Ok(config)
}

/// Apply one command. Returns `false` when the session should end.
pub fn execute<H, S>(controller: &mut SessionController<H, S>, command: SessionCommand) -> bool
where
    H: HostEnvironment,
    S: ConfigStore,
{
    match command {
        SessionCommand::Toggle => match controller.toggle() {
            Ok(state) => report_state(controller, state.as_str()),
            Err(e) => println!("Error: {}", e),
        },
        SessionCommand::Connect => connect(controller),
        SessionCommand::Disconnect => {
            controller.disconnect();
            println!("Disconnected");
        }
        SessionCommand::Status => {
            println!("State:   {}", controller.state());
            println!("Config:  {:?}", controller.config());
            let reading = controller.traffic().reading();
            if controller.is_connected() {
                println!("Traffic: {}", reading);
            }
            if let Some(warning) = controller.host_warning() {
                println!("Warning: {}", warning);
            }
        }
        SessionCommand::Quit => return false,
    }
    true
}

fn connect<H: HostEnvironment, S: ConfigStore>(controller: &mut SessionController<H, S>) {
    match controller.connect() {
        Ok(()) => report_state(controller, "connected"),
        Err(e) => println!("Error: {}", e),
    }
}

fn report_state<H: HostEnvironment, S: ConfigStore>(
    controller: &SessionController<H, S>,
    state: &str,
) {
    println!("{}", capitalize(state));
    if controller.is_connected() {
        if let Some(warning) = controller.host_warning() {
            println!("Warning: system proxy not configured: {}", warning);
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Read stdin lines on a dedicated thread.
///
/// A blocking read on tokio's pool cannot be cancelled and would hold up
/// runtime shutdown until the next newline. This thread is detached
/// instead; the channel closes on EOF or after the first read error.
pub fn spawn_line_reader<R>(input: R) -> mpsc::Receiver<io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let spawned = thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in input.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start input reader: {}", e);
    }
    rx
}

pub async fn run_session(run: RunArgs, settings: AgentSettings) -> anyhow::Result<()> {
    let store = JsonFileStore::new(&settings.config_file);
    let mut controller = SessionController::new(SystemHost::new(), store, &settings.client)?;

    let config = merge_overrides(controller.config().clone(), &run)?;
    controller.set_config(config);

    info!(
        binary = %settings.client.proxy_binary.display(),
        config = %settings.config_file.display(),
        "Starting tunnel agent"
    );

    if !run.no_connect {
        connect(&mut controller);
    }

    let token = CancellationToken::new();
    let (update_tx, mut update_rx) = mpsc::channel::<DownloadedUpdate>(1);
    let update_task = if settings.updates.enabled {
        let checker = UpdateChecker::new(settings.updates.clone())?;
        Some(checker.spawn_periodic(token.clone(), update_tx))
    } else {
        drop(update_tx);
        None
    };

    println!("Commands: toggle, connect, disconnect, status, quit");

    // First tick one full period after start, and after every connect.
    let period = settings.client.sample_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut lines = spawn_line_reader(io::BufReader::new(io::stdin()));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(exit) = controller.poll_process() {
                    match exit.code {
                        Some(code) => println!("Proxy process exited with code {}, disconnected", code),
                        None => println!("Proxy process was killed, disconnected"),
                    }
                }
                let reading = controller.sample_traffic();
                if controller.is_connected() {
                    println!("{}", reading);
                }
            }
            line = lines.recv() => match line {
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => match SessionCommand::parse(&line) {
                    Some(command) => {
                        let was_connected = controller.is_connected();
                        if !execute(&mut controller, command) {
                            break;
                        }
                        if !was_connected && controller.is_connected() {
                            ticker.reset();
                        }
                    }
                    None => println!(
                        "Unknown command '{}'. Commands: toggle, connect, disconnect, status, quit",
                        line.trim()
                    ),
                },
                None => {
                    info!("Input closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!("Failed to read input: {}", e);
                    break;
                }
            },
            Some(update) = update_rx.recv() => {
                println!(
                    "Downloaded version {} to {}",
                    update.release.version,
                    update.path.display()
                );
                if settings.updates.auto_restart {
                    println!("Restarting to apply update...");
                    token.cancel();
                    match controller.apply_update(&update.path) {
                        Ok(()) => break,
                        Err(e) => error!("Failed to start updated binary: {}", e),
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    token.cancel();
    if let Some(task) = update_task {
        if let Err(e) = task.await {
            warn!("Update checker task failed: {}", e);
        }
    }
    controller.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnel_core::{ClientSettings, MemoryStore, SessionState};

    #[tokio::test]
    async fn test_line_reader_forwards_lines_then_closes() {
        let input = io::Cursor::new(b"toggle\nstatus\n".to_vec());
        let mut lines = spawn_line_reader(input);

        assert_eq!(lines.recv().await.unwrap().unwrap(), "toggle");
        assert_eq!(lines.recv().await.unwrap().unwrap(), "status");
        assert!(lines.recv().await.is_none());
    }

    /// Blocks like an idle terminal until its sender is dropped
    struct IdleInput(std::sync::mpsc::Receiver<()>);

    impl io::Read for IdleInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_line_reader_does_not_block_shutdown() {
        let (_keep_open, rx) = std::sync::mpsc::channel::<()>();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let started = std::time::Instant::now();
        runtime.block_on(async {
            let mut lines = spawn_line_reader(io::BufReader::new(IdleInput(rx)));
            let waited =
                tokio::time::timeout(std::time::Duration::from_millis(50), lines.recv()).await;
            assert!(waited.is_err());
        });
        drop(runtime);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(SessionCommand::parse("toggle"), Some(SessionCommand::Toggle));
        assert_eq!(SessionCommand::parse("  Connect \n"), Some(SessionCommand::Connect));
        assert_eq!(SessionCommand::parse("d"), Some(SessionCommand::Disconnect));
        assert_eq!(SessionCommand::parse("status"), Some(SessionCommand::Status));
        assert_eq!(SessionCommand::parse("exit"), Some(SessionCommand::Quit));
        assert_eq!(SessionCommand::parse("reboot"), None);
    }

    #[test]
    fn test_link_then_field_overrides() {
        let stored = ConnectionConfig::new("old.example", "1", "old", "aes-128-gcm");
        let run = RunArgs {
            link: Some("ss://YWVzLTI1Ni1nY206c2VjcmV0@example.org:8388".to_string()),
            port: Some("9000".to_string()),
            ..Default::default()
        };

        let merged = merge_overrides(stored, &run).unwrap();
        assert_eq!(
            merged,
            ConnectionConfig::new("example.org", "9000", "secret", "aes-256-gcm")
        );
    }

    #[test]
    fn test_no_overrides_keeps_stored() {
        let stored = ConnectionConfig::new("a.example", "443", "pw", "aes-128-gcm");
        let merged = merge_overrides(stored.clone(), &RunArgs::default()).unwrap();
        assert_eq!(merged, stored);
    }

    #[test]
    fn test_bad_link_override_is_an_error() {
        let run = RunArgs {
            link: Some("ss://no-separator".to_string()),
            ..Default::default()
        };
        assert!(merge_overrides(ConnectionConfig::default(), &run).is_err());
    }

    #[test]
    fn test_failed_connect_keeps_session_alive() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ClientSettings {
            proxy_binary: dir.path().join("missing-sslocal"),
            process_config_path: dir.path().join("proxy.json"),
            sample_interval_ms: 1000,
        };
        let store = MemoryStore::with_config(ConnectionConfig::new(
            "example.org",
            "8388",
            "pw",
            "aes-256-gcm",
        ));
        let mut controller = SessionController::new(SystemHost::new(), store, &settings).unwrap();

        assert!(execute(&mut controller, SessionCommand::Connect));
        assert_eq!(controller.state(), SessionState::Disconnected);
        assert!(execute(&mut controller, SessionCommand::Status));
        assert!(execute(&mut controller, SessionCommand::Disconnect));
        assert!(!execute(&mut controller, SessionCommand::Quit));
    }
}
