//! Session-accept server: listens
//! for agent connections, authenticates each at handshake, and then races
//! inbound frames against the session's outbound queue and a ping timer
//! until the connection drops. Generic over plain TCP or TLS, the same
//! split `hearth_agent::connection::AgentConnection` abstracts on the
//! client side.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_net::TcpListener;
use async_tungstenite::accept_async;
use futures::{AsyncRead, AsyncWrite, FutureExt, StreamExt};
use futures_rustls::TlsAcceptor;
use hearth_proto::session::{AgentEvent, ServerEvent, SessionAuth};
use rustls::pki_types::PrivateKeyDer;
use rustls::ServerConfig;
use smol::Timer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the accept loop's write half pings an idle session.
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Outcome of an auth handshake, decided by whatever owns fleet state.
pub enum AuthDecision {
    /// The presented `{serverId, token}` checked out; sessions are
    /// registered under this id.
    Accepted(Uuid),
    /// Unknown server, revoked token, or hash mismatch.
    Rejected,
}

/// Callbacks the accept loop invokes; implemented by the composition root
/// so this module stays ignorant of the store, registry, and deployer.
#[async_trait::async_trait]
pub trait SessionHandler: Send + Sync {
    /// Check a handshake's credentials.
    async fn authenticate(&self, auth: &SessionAuth) -> AuthDecision;

    /// A session was accepted; returns the outbound queue the write half
    /// should drain, and registers bookkeeping under `server_id`.
    async fn on_connect(&self, server_id: Uuid) -> async_channel::Receiver<ServerEvent>;

    /// The connection ended, cleanly or not.
    async fn on_disconnect(&self, server_id: Uuid);

    /// One frame arrived from the agent.
    async fn on_event(&self, server_id: Uuid, event: AgentEvent);
}

/// Load a PEM cert/key pair into a server-side TLS config, the way
/// `harness::daemon::server::start_server` does for its own listener.
pub fn load_tls_config(cert_path: &std::path::Path, key_path: &std::path::Path) -> anyhow::Result<ServerConfig> {
    let cert_pem = std::fs::read_to_string(cert_path)?;
    let key_pem = std::fs::read_to_string(key_path)?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_bytes()).collect::<Result<Vec<_>, _>>()?;
    let key_der = rustls_pemfile::private_key(&mut key_pem.as_bytes())?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;
    let key = PrivateKeyDer::try_from(key_der).map_err(|e| anyhow::anyhow!("invalid private key: {e}"))?;

    Ok(ServerConfig::builder().with_no_client_auth().with_single_cert(certs, key)?)
}

/// Bind `listen_addr` and accept sessions forever, handing each to
/// `handler`. `tls` is `None` for a plaintext development listener.
pub async fn serve(listen_addr: &str, tls: Option<ServerConfig>, handler: Arc<dyn SessionHandler>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, tls = tls.is_some(), "session server listening");

    let acceptor = tls.map(|cfg| TlsAcceptor::from(Arc::new(cfg)));

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };
        debug!(%peer_addr, "new session connection");

        let handler = handler.clone();
        let acceptor = acceptor.clone();
        smol::spawn(async move {
            let result = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => handle_connection(tls_stream, handler).await,
                    Err(e) => Err(anyhow::anyhow!("tls handshake failed: {e}")),
                },
                None => handle_connection(stream, handler).await,
            };
            if let Err(e) = result {
                warn!(error = %e, %peer_addr, "session ended with error");
            }
        })
        .detach();
    }
}

async fn handle_connection<S>(stream: S, handler: Arc<dyn SessionHandler>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = accept_async(stream).await?;
    let (mut sender, mut receiver) = ws.split();

    let auth: SessionAuth = match hearth_agent::transport::recv(&mut receiver).await? {
        Some(auth) => auth,
        None => return Ok(()),
    };

    let server_id = match handler.authenticate(&auth).await {
        AuthDecision::Accepted(id) => id,
        AuthDecision::Rejected => {
            warn!(server_id = %auth.server_id, "session rejected: bad credentials");
            return Ok(());
        }
    };

    info!(%server_id, "agent session established");
    let outbound = handler.on_connect(server_id).await;

    let writer = async {
        let mut ping_timer = Timer::interval(PING_INTERVAL);
        loop {
            futures::select! {
                event = outbound.recv().fuse() => {
                    match event {
                        Ok(event) => {
                            if hearth_agent::transport::send(&mut sender, &event).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                _ = ping_timer.next().fuse() => {
                    if hearth_agent::transport::send(&mut sender, &ServerEvent::Ping).await.is_err() {
                        break;
                    }
                }
            }
        }
    };

    let reader = async {
        loop {
            match hearth_agent::transport::recv::<_, AgentEvent>(&mut receiver).await {
                Ok(Some(event)) => handler.on_event(server_id, event).await,
                Ok(None) => break,
                Err(e) => {
                    warn!(%server_id, error = %e, "session read error");
                    break;
                }
            }
        }
    };

    futures::future::select(Box::pin(writer), Box::pin(reader)).await;
    handler.on_disconnect(server_id).await;
    info!(%server_id, "agent session closed");
    Ok(())
}
