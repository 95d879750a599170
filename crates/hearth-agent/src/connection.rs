//! Transport-level connection to the orchestrator.
//!
//! The agent talks `ws://` in development and `wss://` in production,
//! trusting a private root certificate rather than the public web PKI —
//! the orchestrator's session endpoint is never reachable outside the
//! fleet.

use std::net::SocketAddr;
use std::sync::Arc;

use async_net::TcpStream;
use async_tungstenite::{client_async, WebSocketStream};
use futures::SinkExt;
use futures_rustls::{client::TlsStream, TlsConnector};
use rustls::{ClientConfig, RootCertStore};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::transport;

/// An established session transport, plain or TLS.
pub enum AgentConnection {
    /// Development mode: unencrypted `ws://`.
    Plain(WebSocketStream<TcpStream>),
    /// Production mode: `wss://` trusting the fleet's private root cert.
    Tls(WebSocketStream<TlsStream<TcpStream>>),
}

impl AgentConnection {
    /// Connect to `orchestrator_url` (`host:port`), optionally over TLS when
    /// `root_cert_pem` is supplied.
    pub async fn connect(orchestrator_url: &str, root_cert_pem: Option<&str>) -> Result<Self> {
        let addr: SocketAddr = orchestrator_url
            .parse()
            .map_err(|e| Error::Connection(format!("invalid orchestrator address: {e}")))?;

        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Connection(format!("tcp connect failed: {e}")))?;

        match root_cert_pem {
            None => {
                let url = format!("ws://{addr}/session");
                let (ws, _) = client_async(&url, tcp)
                    .await
                    .map_err(|e| Error::Connection(format!("websocket handshake failed: {e}")))?;
                Ok(Self::Plain(ws))
            }
            Some(pem) => {
                let certs = rustls_pemfile::certs(&mut pem.as_bytes())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| Error::Connection(format!("bad root cert: {e:?}")))?;
                let mut roots = RootCertStore::empty();
                for cert in certs {
                    roots
                        .add(cert)
                        .map_err(|e| Error::Connection(format!("root cert rejected: {e:?}")))?;
                }
                let config = ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth();
                let connector = TlsConnector::from(Arc::new(config));
                let server_name = rustls::pki_types::ServerName::try_from("hearth-orchestrator")
                    .map_err(|e| Error::Connection(format!("invalid server name: {e:?}")))?;
                let tls = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| Error::Connection(format!("tls handshake failed: {e}")))?;
                let url = format!("wss://{addr}/session");
                let (ws, _) = client_async(&url, tls)
                    .await
                    .map_err(|e| Error::Connection(format!("websocket handshake failed: {e}")))?;
                Ok(Self::Tls(ws))
            }
        }
    }

    /// Serialize and send one frame.
    pub async fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        match self {
            Self::Plain(ws) => transport::send(ws, value).await,
            Self::Tls(ws) => transport::send(ws, value).await,
        }
    }

    /// Receive and deserialize the next frame, or `None` on clean close.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self {
            Self::Plain(ws) => transport::recv(ws).await,
            Self::Tls(ws) => transport::recv(ws).await,
        }
    }

    /// Close the underlying WebSocket connection.
    pub async fn close(&mut self) -> Result<()> {
        let result = match self {
            Self::Plain(ws) => ws.close(None).await,
            Self::Tls(ws) => ws.close(None).await,
        };
        result.map_err(|e| Error::Connection(e.to_string()))
    }
}
