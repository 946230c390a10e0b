//! RPC client for the daemon socket.
//!
//! One connection per call: write a request line, read a response line.
//! Errors in the "no-backend" class (socket missing, connection refused,
//! EOF before a response) are flagged so callers can fall back to direct
//! mode; protocol-level failures are ordinary RPC errors.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::daemon::proto::{Request, Response};
use crate::error::{BeadsError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client handle for the daemon's unix socket.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    #[must_use]
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and read one response.
    ///
    /// # Errors
    ///
    /// Returns `Rpc` with `no_backend = true` for connect/transport
    /// failures, `Rpc` otherwise for malformed or error responses.
    pub fn call(&self, request: &Request) -> Result<Response> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .map_err(|err| classify_io_error(&err, "connect"))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|err| classify_io_error(&err, "set timeout"))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|err| classify_io_error(&err, "set timeout"))?;

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        stream
            .write_all(line.as_bytes())
            .map_err(|err| classify_io_error(&err, "write"))?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        let read = reader
            .read_line(&mut response_line)
            .map_err(|err| classify_io_error(&err, "read"))?;
        if read == 0 {
            return Err(BeadsError::rpc_no_backend("daemon closed the connection"));
        }

        let response: Response = serde_json::from_str(response_line.trim_end()).map_err(|err| {
            BeadsError::rpc(format!("malformed daemon response: {err}"))
        })?;
        response.into_result()
    }

    /// Health check: true when the daemon answers a ping.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self.call(&Request::Ping), Ok(Response::Pong { .. }))
    }
}

fn classify_io_error(err: &std::io::Error, action: &str) -> BeadsError {
    let message = format!("{action} {err}");
    match err.kind() {
        ErrorKind::NotFound
        | ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => BeadsError::rpc_no_backend(message),
        _ => BeadsError::rpc(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_socket_is_no_backend() {
        let dir = TempDir::new().unwrap();
        let client = DaemonClient::new(dir.path().join("bd.sock"));
        let err = client.call(&Request::Ping).unwrap_err();
        assert!(err.is_no_backend());
        assert!(!client.is_healthy());
    }

    #[test]
    fn stale_socket_file_is_no_backend() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bd.sock");
        // A bound-then-dropped listener leaves a refusing socket file.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        let client = DaemonClient::new(path);
        let err = client.call(&Request::Ping).unwrap_err();
        assert!(err.is_no_backend());
    }
}
