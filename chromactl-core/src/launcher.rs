//! Launches a local Chroma server as a child process and waits for it to
//! answer its heartbeat.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::chroma::{ChromaClient, ChromaError};
use crate::config::ChromaConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("'{0}' not found (not an existing path, not adjacent to this executable, not in PATH)")]
    BinaryNotFound(String),
    #[error("failed to spawn {binary}: {message}")]
    Spawn { binary: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server at {url} did not answer its heartbeat within {timeout:?}")]
    NotReady { url: String, timeout: Duration },
    #[error("server exited before becoming ready ({0})")]
    ExitedEarly(String),
    #[error(transparent)]
    Client(#[from] ChromaError),
}

/// Locate `name`: an existing path is used as is, then a binary adjacent to
/// the current executable, then a `PATH` lookup.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() || name.contains(std::path::MAIN_SEPARATOR) {
        return path.exists().then(|| path.to_path_buf());
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    which(name)
}

/// Simple PATH lookup for a binary name.
fn which(name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|p| p.is_file())
    })
}

/// A running Chroma server. Dropping the handle stops the process.
pub struct ChromaServer {
    child: Option<Child>,
    base_url: String,
}

impl ChromaServer {
    /// Spawn `{command} run --host H --port P --path DIR` and block until the
    /// server answers its heartbeat or the startup timeout passes.
    pub fn start(config: &ChromaConfig) -> Result<Self, LaunchError> {
        let mut server = Self::spawn(config)?;
        let client = ChromaClient::new(&config.base_url(), HEARTBEAT_TIMEOUT)?;
        server.wait_until_ready(&client, Duration::from_secs(config.startup_timeout_secs))?;
        Ok(server)
    }

    /// Spawn the server without waiting for it.
    pub fn spawn(config: &ChromaConfig) -> Result<Self, LaunchError> {
        std::fs::create_dir_all(&config.path)?;
        let binary = find_binary(&config.command)
            .ok_or_else(|| LaunchError::BinaryNotFound(config.command.clone()))?;

        let mut command = Command::new(&binary);
        command
            .arg("run")
            .arg("--host")
            .arg(&config.host)
            .arg("--port")
            .arg(config.port.to_string())
            .arg("--path")
            .arg(&config.path);
        log::info!(
            "starting {} on {}:{} (data in {})",
            binary.display(),
            config.host,
            config.port,
            config.path
        );
        Self::spawn_command(command, config.base_url())
    }

    fn spawn_command(mut command: Command, base_url: String) -> Result<Self, LaunchError> {
        let binary = command.get_program().to_string_lossy().to_string();
        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                binary,
                message: e.to_string(),
            })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr);
        }

        Ok(Self {
            child: Some(child),
            base_url,
        })
    }

    /// Poll the heartbeat every 250 ms. On timeout the child is killed.
    pub fn wait_until_ready(
        &mut self,
        client: &ChromaClient,
        timeout: Duration,
    ) -> Result<(), LaunchError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    self.child = None;
                    return Err(LaunchError::ExitedEarly(status.to_string()));
                }
            }
            match client.heartbeat() {
                Ok(_) => {
                    log::info!("chroma server ready at {}", client.base_url());
                    return Ok(());
                }
                Err(e) => log::debug!("waiting for chroma server: {e}"),
            }
            if Instant::now() >= deadline {
                self.stop();
                return Err(LaunchError::NotReady {
                    url: client.base_url().to_string(),
                    timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.child
            .as_mut()
            .map(|c| c.try_wait().ok().flatten().is_none())
            .unwrap_or(false)
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Kill the server and reap it. Calling this again is a no-op.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
            log::info!("chroma server (pid {}) stopped", child.id());
        }
    }
}

impl Drop for ChromaServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward_output<R: Read + Send + 'static>(stream: R) {
    std::thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(l) => log::info!("[chroma] {l}"),
                Err(_) => break,
            }
        }
    });
}
