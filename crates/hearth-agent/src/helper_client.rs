//! Client side of the privileged-helper protocol: one
//! newline-delimited JSON request per connection over a Unix domain socket,
//! matching `hearth-helper`'s server framing exactly.
//!
//! Implements [`hearth_executor::HelperClient`], whose `call` signature is
//! synchronous on purpose — the helper socket is local and every call here
//! blocks the calling thread for the duration of one request/response.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use hearth_executor::{Error, HelperClient, Result};
use hearth_proto::helper::{HelperRequest, HelperResponse};

/// Connects to the helper daemon's Unix socket for each call.
pub struct UnixSocketHelperClient {
    socket_path: PathBuf,
}

impl UnixSocketHelperClient {
    /// Build a client for the helper socket at `socket_path`.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self { socket_path: socket_path.as_ref().to_path_buf() }
    }
}

impl HelperClient for UnixSocketHelperClient {
    fn call(&self, request: HelperRequest) -> Result<HelperResponse> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(Error::Io)?;

        let mut line = serde_json::to_string(&request).map_err(|e| Error::CommandFailed(e.to_string()))?;
        line.push('\n');
        stream.write_all(line.as_bytes()).map_err(Error::Io)?;
        stream.flush().map_err(Error::Io)?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).map_err(Error::Io)?;
        if response_line.is_empty() {
            return Err(Error::CommandFailed("helper closed connection without a response".into()));
        }

        serde_json::from_str(response_line.trim_end()).map_err(|e| Error::CommandFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;

    #[test]
    fn sends_a_newline_delimited_request_and_parses_the_response() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("helper.sock");
        let listener = std::os::unix::net::UnixListener::bind(&socket_path).unwrap();

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let n = conn.read(&mut buf).unwrap();
            let received = String::from_utf8_lossy(&buf[..n]);
            assert!(received.ends_with('\n'));
            let resp = HelperResponse::ok();
            let mut text = serde_json::to_string(&resp).unwrap();
            text.push('\n');
            conn.write_all(text.as_bytes()).unwrap();
        });

        let client = UnixSocketHelperClient::new(&socket_path);
        let resp = client.call(HelperRequest::CreateServiceUser { username: "svc".into(), home: None }).unwrap();
        assert!(resp.success);
        server.join().unwrap();
    }
}
