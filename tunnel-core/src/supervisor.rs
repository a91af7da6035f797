//! Proxy process supervision
//!
//! The supervisor turns a [`SessionConfig`] into the executable's own
//! config file, launches `<binary> -c <file>` and owns the resulting child
//! until the session ends. The child is held in a [`ProcessGuard`] so that
//! it is terminated on every exit path, including the guard being dropped.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{ClientSettings, SessionConfig};
use crate::error::TunnelError;
use crate::host::{ChildExit, HostEnvironment, ProxyChild};
use crate::Result;

/// Owned proxy process plus its transient config file.
///
/// Dropping the guard terminates the process and removes the file.
#[derive(Debug)]
pub struct ProcessGuard {
    child: Option<Box<dyn ProxyChild>>,
    config_path: PathBuf,
}

impl ProcessGuard {
    fn new(child: Box<dyn ProxyChild>, config_path: PathBuf) -> Self {
        Self {
            child: Some(child),
            config_path,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|child| child.id())
    }

    /// Terminate the process and delete the config file.
    ///
    /// Termination errors are logged and swallowed; the child is
    /// considered released either way.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(mut child) = self.child.take() {
            let pid = child.id();
            match child.terminate() {
                Ok(()) => info!(pid, "Proxy process terminated"),
                Err(e) => warn!(pid, "Failed to terminate proxy process: {}", e),
            }
        }
        remove_config_file(&self.config_path);
    }

    fn try_exit(&mut self) -> io::Result<Option<ChildExit>> {
        match self.child.as_mut() {
            Some(child) => child.try_exit(),
            None => Ok(None),
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Starts and stops the external proxy executable
#[derive(Debug)]
pub struct ProcessSupervisor {
    binary: PathBuf,
    config_path: PathBuf,
    guard: Option<ProcessGuard>,
}

impl ProcessSupervisor {
    pub fn new(binary: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_path.into(),
            guard: None,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::new(&settings.proxy_binary, &settings.process_config_path)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.guard.as_ref().and_then(ProcessGuard::pid)
    }

    /// Write the process config and launch the executable.
    ///
    /// An already running process is released first, so at most one child
    /// exists at a time. A config file that cannot be written is reported
    /// as [`TunnelError::SpawnFailed`].
    pub fn start<H>(&mut self, host: &mut H, config: &SessionConfig) -> Result<()>
    where
        H: HostEnvironment + ?Sized,
    {
        self.stop();

        if !self.binary.is_file() {
            return Err(TunnelError::BinaryNotFound {
                path: self.binary.clone(),
            });
        }

        if let Err(e) = write_config_file(&self.config_path, config) {
            remove_config_file(&self.config_path);
            return Err(TunnelError::SpawnFailed(e));
        }
        debug!(
            "Running: {} -c {}",
            self.binary.display(),
            self.config_path.display()
        );

        let child = match host.spawn_proxy(&self.binary, &self.config_path) {
            Ok(child) => child,
            Err(e) => {
                remove_config_file(&self.config_path);
                return Err(if e.kind() == io::ErrorKind::NotFound {
                    TunnelError::BinaryNotFound {
                        path: self.binary.clone(),
                    }
                } else {
                    TunnelError::SpawnFailed(e)
                });
            }
        };

        info!(pid = child.id(), server = %config.server, port = config.port, "Proxy process started");
        self.guard = Some(ProcessGuard::new(child, self.config_path.clone()));
        Ok(())
    }

    /// Terminate the running process, if any. Always leaves the supervisor
    /// ready for the next `start`.
    pub fn stop(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.release();
        }
    }

    /// Check whether the child exited on its own.
    ///
    /// On exit the handle is released and the exit is returned; a running
    /// child or no child yields `None`.
    pub fn poll_exit(&mut self) -> Option<ChildExit> {
        let guard = self.guard.as_mut()?;
        match guard.try_exit() {
            Ok(Some(exit)) => {
                warn!(code = ?exit.code, "Proxy process exited");
                self.stop();
                Some(exit)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to poll proxy process: {}", e);
                None
            }
        }
    }
}

fn write_config_file(path: &Path, config: &SessionConfig) -> io::Result<()> {
    let text = serde_json::to_string_pretty(&config.process_config())?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(text.as_bytes())?;
    Ok(())
}

fn remove_config_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
