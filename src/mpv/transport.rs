//! Dialing the MPV IPC endpoint.
//!
//! Named pipes on Windows, Unix domain sockets everywhere else. The connection
//! is split into independent read and write halves for the IPC loops.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use super::error::MpvError;
use crate::config::ClientOptions;

#[cfg(windows)]
type Stream = tokio::net::windows::named_pipe::NamedPipeClient;
#[cfg(not(windows))]
type Stream = tokio::net::UnixStream;

/// Read and write halves of a connected endpoint.
pub type Connection = (ReadHalf<Stream>, WriteHalf<Stream>);

/// Connect once, failing if the endpoint does not accept within `timeout`.
pub async fn connect(path: &str, timeout: Duration) -> Result<Connection, MpvError> {
  let stream = tokio::time::timeout(timeout, open(path))
    .await
    .map_err(|_| MpvError::ConnectionFailed(format!("Timed out connecting to {}", path)))??;
  Ok(tokio::io::split(stream))
}

/// Connect, retrying with a doubling delay between attempts.
pub async fn connect_with_retry(options: &ClientOptions) -> Result<Connection, MpvError> {
  let attempts = options.connect_retries.max(1);
  let mut delay = options.retry_delay();
  let mut last_error = None;

  for attempt in 0..attempts {
    if attempt > 0 {
      tokio::time::sleep(delay).await;
      delay = delay.saturating_mul(2);
    }

    match connect(&options.socket_path, options.dial_timeout()).await {
      Ok(connection) => return Ok(connection),
      Err(e) => {
        log::debug!("IPC connect attempt {} failed: {}", attempt + 1, e);
        last_error = Some(e);
      }
    }
  }

  Err(last_error.unwrap_or_else(|| MpvError::ConnectionFailed("Unknown error".into())))
}

#[cfg(windows)]
async fn open(path: &str) -> Result<Stream, MpvError> {
  use tokio::net::windows::named_pipe::ClientOptions;

  const ERROR_PIPE_BUSY: i32 = 231;

  loop {
    match ClientOptions::new().open(path) {
      Ok(client) => return Ok(client),
      Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
        tokio::time::sleep(Duration::from_millis(50)).await;
      }
      Err(e) => {
        return Err(MpvError::ConnectionFailed(format!(
          "Failed to open pipe {}: {}",
          path, e
        )))
      }
    }
  }
}

#[cfg(not(windows))]
async fn open(path: &str) -> Result<Stream, MpvError> {
  tokio::net::UnixStream::connect(path)
    .await
    .map_err(|e| MpvError::ConnectionFailed(format!("Failed to connect to {}: {}", path, e)))
}

/// Marker for transports the IPC loops accept.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
