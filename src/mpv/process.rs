//! MPV process detection and spawning.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use tokio::process::{Child, Command};

use super::client::MpvClient;
use super::error::MpvError;
use crate::config::{ProcessOptions, Redirect};

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found")]
  NotFound,
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] std::io::Error),
  #[error("MPV process is not running")]
  NotRunning,
}

/// Get the default IPC socket/pipe path for MPV.
pub fn default_socket_path() -> String {
  #[cfg(windows)]
  {
    r"\\.\pipe\mpvsocket".to_string()
  }
  #[cfg(not(windows))]
  {
    "/tmp/mpvsocket".to_string()
  }
}

static SOCKET_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Default socket path with an incrementing number appended.
pub fn incrementing_socket_path() -> String {
  let n = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
  format!("{}-{}", default_socket_path(), n)
}

/// Default socket path with the process id and an incrementing number appended.
pub fn incrementing_pid_socket_path() -> String {
  let n = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
  format!("{}-{}-{}", default_socket_path(), std::process::id(), n)
}

/// Default socket path with a random 32-character hex suffix.
pub fn random_socket_path() -> String {
  format!("{}-{}", default_socket_path(), uuid::Uuid::new_v4().simple())
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(windows)]
  let common_paths: &[&str] = &[
    r"C:\Program Files\mpv\mpv.exe",
    r"C:\Program Files (x86)\mpv\mpv.exe",
    r"C:\mpv\mpv.exe",
  ];
  #[cfg(target_os = "macos")]
  let common_paths: &[&str] = &[
    "/usr/local/bin/mpv",
    "/opt/homebrew/bin/mpv",
    "/Applications/mpv.app/Contents/MacOS/mpv",
  ];
  #[cfg(not(any(windows, target_os = "macos")))]
  let common_paths: &[&str] = &["/usr/bin/mpv", "/usr/local/bin/mpv"];

  common_paths
    .iter()
    .map(PathBuf::from)
    .find(|path| path.exists())
}

fn stdio(redirect: Redirect) -> Stdio {
  match redirect {
    Redirect::Null => Stdio::null(),
    Redirect::Inherit => Stdio::inherit(),
  }
}

/// Remove a stale socket file left behind by a previous MPV.
pub fn cleanup_ipc(socket_path: &str) {
  #[cfg(not(windows))]
  {
    let _ = std::fs::remove_file(socket_path);
  }
  // Windows named pipes are cleaned up automatically
  #[cfg(windows)]
  let _ = socket_path;
}

/// A spawned MPV process serving IPC on `options.client.socket_path`.
pub struct MpvProcess {
  options: ProcessOptions,
  child: Child,
}

impl MpvProcess {
  /// Spawn MPV with the IPC server enabled.
  pub fn spawn(options: ProcessOptions) -> Result<Self, MpvError> {
    options.validate().map_err(MpvError::InvalidConfig)?;

    let mpv_exe = options
      .mpv_path
      .as_ref()
      .map(PathBuf::from)
      .or_else(find_mpv)
      .ok_or(ProcessError::NotFound)?;

    let endpoint = &options.client.socket_path;
    cleanup_ipc(endpoint);

    log::info!("Spawning MPV: {:?} with IPC: {}", mpv_exe, endpoint);
    if !options.mpv_args.is_empty() {
      log::info!("Extra MPV args: {:?}", options.mpv_args);
    }

    let child = Command::new(&mpv_exe)
      .arg(format!("--input-ipc-server={}", endpoint))
      .arg("--idle")
      .args(&options.mpv_args)
      .stdin(stdio(options.stdin))
      .stdout(stdio(options.stdout))
      .stderr(stdio(options.stderr))
      .kill_on_drop(true)
      .spawn()
      .map_err(ProcessError::SpawnFailed)?;

    Ok(Self { options, child })
  }

  /// Spawn MPV and connect a client to it, retrying while MPV creates the socket.
  pub async fn spawn_with_client(options: ProcessOptions) -> Result<(Self, MpvClient), MpvError> {
    let mut process = Self::spawn(options)?;
    match process.open_client().await {
      Ok(client) => Ok((process, client)),
      Err(e) => {
        log::error!("Failed to connect to spawned MPV: {}", e);
        let _ = process.kill().await;
        Err(e)
      }
    }
  }

  /// Connect a new client to this process's IPC endpoint.
  pub async fn open_client(&self) -> Result<MpvClient, MpvError> {
    MpvClient::connect(&self.options.client).await
  }

  pub fn endpoint(&self) -> &str {
    &self.options.client.socket_path
  }

  pub fn id(&self) -> Option<u32> {
    self.child.id()
  }

  /// Wait for MPV to exit.
  pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
    let status = self.child.wait().await?;
    log::info!("MPV process exited with: {}", status);
    Ok(status)
  }

  /// Kill MPV and wait for it to exit.
  pub async fn kill(&mut self) -> Result<(), ProcessError> {
    if self.child.id().is_none() {
      return Err(ProcessError::NotRunning);
    }
    log::info!("Killing MPV process (pid: {:?})", self.child.id());
    self.child.kill().await?;
    cleanup_ipc(&self.options.client.socket_path);
    Ok(())
  }
}
