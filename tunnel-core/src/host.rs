//! Host environment capability
//!
//! Everything that touches global OS state goes through [`HostEnvironment`]:
//! spawning and terminating the proxy executable, toggling the host-wide
//! proxy setting, reading network counters and handing control to an
//! updated binary. [`SystemHost`] is the real implementation; tests inject
//! their own.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use sysinfo::Networks;
use tracing::debug;

use crate::system_proxy::{self, ProxyEndpoint};
use crate::Result;

/// How long `terminate` waits for the child to be reaped after the signal
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Cumulative host-wide network counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Exit observed on a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Exit code, `None` when the process was ended by a signal
    pub code: Option<i32>,
}

/// A running proxy executable
pub trait ProxyChild: Send + fmt::Debug {
    /// OS process id
    fn id(&self) -> u32;

    /// Ask the process to stop. Graceful where the platform allows it.
    fn terminate(&mut self) -> io::Result<()>;

    /// Non-blocking exit check
    fn try_exit(&mut self) -> io::Result<Option<ChildExit>>;
}

/// OS capabilities the session controller depends on
pub trait HostEnvironment {
    /// Launch `<program> -c <config_path>` without waiting on it
    fn spawn_proxy(&mut self, program: &Path, config_path: &Path)
        -> io::Result<Box<dyn ProxyChild>>;

    /// Route host traffic through `endpoint`
    fn enable_system_proxy(&mut self, endpoint: &ProxyEndpoint) -> Result<()>;

    /// Stop routing host traffic through the local proxy
    fn disable_system_proxy(&mut self) -> Result<()>;

    /// Current cumulative byte counters
    fn read_counters(&mut self) -> NetCounters;

    /// Replace the running application with `binary`.
    ///
    /// Only returns on failure, or on platforms that cannot replace the
    /// process image in place, after the replacement has been launched.
    fn hand_over(&mut self, binary: &Path) -> io::Result<()>;
}

/// Child process spawned through `std::process`
#[derive(Debug)]
pub struct OsChild {
    child: Child,
}

impl OsChild {
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM)
            .map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) -> io::Result<()> {
        self.child.kill()
    }
}

impl ProxyChild for OsChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.try_exit()?.is_some() {
            return Ok(());
        }
        self.send_terminate()?;

        let deadline = Instant::now() + REAP_TIMEOUT;
        while Instant::now() < deadline {
            if self.try_exit()?.is_some() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        debug!(pid = self.id(), "Proxy process still exiting after terminate");
        Ok(())
    }

    fn try_exit(&mut self) -> io::Result<Option<ChildExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ChildExit { code: status.code() }))
    }
}

/// The real operating system
pub struct SystemHost {
    networks: Networks,
}

impl fmt::Debug for SystemHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemHost").finish_non_exhaustive()
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemHost {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl HostEnvironment for SystemHost {
    fn spawn_proxy(
        &mut self,
        program: &Path,
        config_path: &Path,
    ) -> io::Result<Box<dyn ProxyChild>> {
        let child = Command::new(program).arg("-c").arg(config_path).spawn()?;
        Ok(Box::new(OsChild::new(child)))
    }

    fn enable_system_proxy(&mut self, endpoint: &ProxyEndpoint) -> Result<()> {
        system_proxy::platform::enable(endpoint)
    }

    fn disable_system_proxy(&mut self) -> Result<()> {
        system_proxy::platform::disable()
    }

    fn read_counters(&mut self) -> NetCounters {
        self.networks.refresh_list();
        self.networks.refresh();
        self.networks
            .iter()
            .fold(NetCounters::default(), |acc, (_name, data)| NetCounters {
                bytes_sent: acc.bytes_sent.saturating_add(data.total_transmitted()),
                bytes_received: acc.bytes_received.saturating_add(data.total_received()),
            })
    }

    #[cfg(unix)]
    fn hand_over(&mut self, binary: &Path) -> io::Result<()> {
        use std::os::unix::process::CommandExt;

        // exec only returns on error
        Err(Command::new(binary).exec())
    }

    #[cfg(not(unix))]
    fn hand_over(&mut self, binary: &Path) -> io::Result<()> {
        let child = Command::new(binary).spawn()?;
        tracing::warn!(pid = child.id(), "Launched replacement binary, caller must exit");
        Ok(())
    }
}
