//! Transport module - connecting to the modem daemon.
//!
//! The session accepts any `AsyncRead + AsyncWrite` stream. These helpers
//! open the platform's local socket:
//! - Unix: Unix Domain Socket
//! - Windows: Named Pipe client

use std::io;
use std::path::Path;

/// Connect to the Unix socket at `path`.
#[cfg(unix)]
pub async fn connect(path: impl AsRef<Path>) -> io::Result<tokio::net::UnixStream> {
    let path = path.as_ref();
    let stream = tokio::net::UnixStream::connect(path).await?;
    tracing::debug!(path = %path.display(), "connected to modem socket");
    Ok(stream)
}

/// Open the named pipe at `path`.
#[cfg(windows)]
pub async fn connect(
    path: impl AsRef<Path>,
) -> io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
    let path = path.as_ref();
    let pipe = tokio::net::windows::named_pipe::ClientOptions::new().open(path.as_os_str())?;
    tracing::debug!(path = %path.display(), "connected to modem pipe");
    Ok(pipe)
}
