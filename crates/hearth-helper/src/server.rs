//! Unix-domain-socket server for the privileged helper.
//!
//! An accept loop spawns one task per connection, each reading a local-only,
//! line-framed protocol: one JSON request per line, exactly one JSON
//! response per line.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use async_net::unix::{UnixListener, UnixStream};
use futures_lite::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use futures_lite::StreamExt;
use hearth_proto::helper::{HelperRequest, HelperResponse};
use tracing::{error, warn};

use crate::handler::{handle, HelperConfig};

/// Listen on `socket_path`, restricting it to the given Unix group (the
/// agent principal), and serve requests until the process is signaled to
/// stop.
pub async fn serve(socket_path: &Path, socket_mode: u32, config: Arc<HelperConfig>) -> std::io::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(socket_mode))?;

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let config = config.clone();
                smol::spawn(async move {
                    if let Err(err) = handle_connection(stream, config).await {
                        error!(target: "hearth_helper", %err, "connection handler error");
                    }
                })
                .detach();
            }
            Err(err) => {
                warn!(target: "hearth_helper", %err, "failed to accept connection");
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, config: Arc<HelperConfig>) -> std::io::Result<()> {
    let mut writer = stream.clone();
    let mut lines = BufReader::new(stream).lines();

    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<HelperRequest>(&line) {
            Ok(request) => handle(request, &config).await,
            Err(err) => HelperResponse::validation_failed(format!("malformed request: {err}")),
        };
        let mut encoded = serde_json::to_string(&response).unwrap_or_else(|_| {
            r#"{"success":false,"error":"failed to encode response"}"#.to_string()
        });
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
