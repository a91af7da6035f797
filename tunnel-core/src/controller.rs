//! Session Controller
//!
//! Single-owner state machine tying the pieces together:
//!
//! ```text
//! connect:    validate -> persist -> supervisor.start -> proxy.enable -> Connected -> traffic.reset
//! disconnect: supervisor.stop -> proxy.disable -> Disconnected -> traffic.clear
//! ```
//!
//! Validation and spawn failures leave the controller `Disconnected` with no
//! side effects on the host. Host proxy failures are recorded as a warning
//! and never block a transition.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::{ClientSettings, ConnectionConfig, LOCAL_PORT};
use crate::error::TunnelError;
use crate::host::{ChildExit, HostEnvironment};
use crate::share_link;
use crate::store::ConfigStore;
use crate::supervisor::ProcessSupervisor;
use crate::system_proxy::SystemProxyToggle;
use crate::traffic::{TrafficMonitor, TrafficReading, TrafficSample};
use crate::Result;

/// Externally observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SessionController<H: HostEnvironment, S: ConfigStore> {
    host: H,
    store: S,
    config: ConnectionConfig,
    supervisor: ProcessSupervisor,
    proxy: SystemProxyToggle,
    traffic: TrafficMonitor,
    state: SessionState,
    host_warning: Option<TunnelError>,
}

impl<H: HostEnvironment, S: ConfigStore> SessionController<H, S> {
    /// Create a controller, seeding the editable fields from `store`
    pub fn new(host: H, mut store: S, settings: &ClientSettings) -> Result<Self> {
        let config = store.load()?;
        Ok(Self {
            host,
            store,
            config,
            supervisor: ProcessSupervisor::from_settings(settings),
            proxy: SystemProxyToggle::new(),
            traffic: TrafficMonitor::new(settings.sample_interval()),
            state: SessionState::Disconnected,
            host_warning: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Replace the editable fields. Takes effect on the next connect.
    pub fn set_config(&mut self, config: ConnectionConfig) {
        self.config = config;
    }

    /// Decode a share link into the editable fields.
    ///
    /// On error the current fields are left untouched.
    pub fn import_link(&mut self, link: &str) -> Result<&ConnectionConfig> {
        self.config = share_link::decode(link)?;
        info!(server = %self.config.server, "Share link imported");
        Ok(&self.config)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn traffic(&self) -> &TrafficMonitor {
        &self.traffic
    }

    /// Most recent best-effort host failure, if any
    pub fn host_warning(&self) -> Option<&TunnelError> {
        self.host_warning.as_ref()
    }

    /// Connect when disconnected, disconnect when connected
    pub fn toggle(&mut self) -> Result<SessionState> {
        match self.state {
            SessionState::Disconnected => self.connect()?,
            SessionState::Connected => self.disconnect(),
        }
        Ok(self.state)
    }

    /// Start a session. A no-op when already connected.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let session = self.config.validate()?;

        let fields = self.config.trimmed();
        if let Err(e) = self.store.save(&fields) {
            warn!("Failed to persist connection settings: {}", e);
        }
        self.config = fields;

        self.supervisor.start(&mut self.host, &session)?;

        self.host_warning = self.proxy.enable(&mut self.host, LOCAL_PORT).err();
        self.state = SessionState::Connected;

        let baseline = TrafficSample::new(self.host.read_counters(), Instant::now());
        self.traffic.reset(Some(baseline));

        info!(
            server = %session.server,
            port = session.port,
            method = %session.method,
            "Session connected"
        );
        Ok(())
    }

    /// End the session. Idempotent and infallible.
    pub fn disconnect(&mut self) {
        let was_connected = self.is_connected();

        self.supervisor.stop();
        self.host_warning = self.proxy.disable(&mut self.host).err();
        self.state = SessionState::Disconnected;
        self.traffic.clear();

        if was_connected {
            info!("Session disconnected");
        }
    }

    /// Take one traffic sample now
    pub fn sample_traffic(&mut self) -> TrafficReading {
        self.sample_traffic_at(Instant::now())
    }

    /// Take one traffic sample stamped with `at`
    pub fn sample_traffic_at(&mut self, at: Instant) -> TrafficReading {
        if !self.is_connected() {
            return TrafficReading::Blank;
        }
        let counters = self.host.read_counters();
        self.traffic.sample(TrafficSample::new(counters, at))
    }

    /// Detect a proxy process that exited on its own and tear the session
    /// down behind it.
    pub fn poll_process(&mut self) -> Option<ChildExit> {
        if !self.is_connected() {
            return None;
        }
        let exit = self.supervisor.poll_exit()?;
        warn!(code = ?exit.code, "Proxy process died, disconnecting");
        self.disconnect();
        Some(exit)
    }

    /// Tear down and hand control to an updated binary
    pub fn apply_update(&mut self, binary: &Path) -> Result<()> {
        info!("Applying update from {}", binary.display());
        self.disconnect();
        self.host.hand_over(binary)?;
        Ok(())
    }

    /// App-level teardown: never leave the host proxied without a process
    pub fn shutdown(&mut self) {
        self.disconnect();
    }
}

impl<H: HostEnvironment, S: ConfigStore> Drop for SessionController<H, S> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<H: HostEnvironment, S: ConfigStore> fmt::Debug for SessionController<H, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("supervisor", &self.supervisor)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}
