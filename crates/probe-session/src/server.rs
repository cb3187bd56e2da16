//! TLS WebSocket transport: accepts connections, enforces the same-origin
//! allow-list, and pumps one [`SessionController`] per socket.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use probe_core::AgentMessage;

use crate::error::{SessionError, SessionResult};
use crate::session::{self, GlobalCaptureGuard, SessionController};

/// Accepts TLS connections on `addr` until the process is shut down.
/// `allowed_origins` is the exact-match browser allow-list; an absent
/// `Origin` header (a local, non-browser client) is always permitted.
///
/// One [`GlobalCaptureGuard`] is created here and shared by every connection
/// handler spawned for the life of the listener, enforcing that at most one
/// capture runs system-wide regardless of how many clients connect.
pub async fn run(addr: SocketAddr, tls_config: Arc<rustls::ServerConfig>, allowed_origins: Arc<Vec<String>>) -> SessionResult<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("listening on wss://{addr}");
    let acceptor = tokio_rustls::TlsAcceptor::from(tls_config);
    let global_capturing = session::new_global_capture_guard();

    loop {
        let (stream, peer) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let origins = Arc::clone(&allowed_origins);
        let global_capturing = Arc::clone(&global_capturing);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, acceptor, origins, global_capturing).await {
                log::warn!("connection {peer} closed with error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: tokio_rustls::TlsAcceptor,
    allowed_origins: Arc<Vec<String>>,
    global_capturing: GlobalCaptureGuard,
) -> SessionResult<()> {
    let tls_stream = acceptor.accept(stream).await.map_err(|e| SessionError::Tls(e.to_string()))?;

    let origin_check = {
        let allowed = Arc::clone(&allowed_origins);
        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            match req.headers().get("origin").and_then(|v| v.to_str().ok()) {
                None => Ok(resp),
                Some(origin) if allowed.iter().any(|a| a == origin) => Ok(resp),
                Some(_) => {
                    let mut rejection = ErrorResponse::new(None);
                    *rejection.status_mut() = StatusCode::FORBIDDEN;
                    Err(rejection)
                }
            }
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(tls_stream, origin_check).await {
        Ok(s) => s,
        Err(e) => {
            log::info!("rejected connection from {peer}: {e}");
            return Err(SessionError::WebSocket(e));
        }
    };

    let conn_id = uuid::Uuid::new_v4();
    log::info!("client connected: {peer} (conn {conn_id})");
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<AgentMessage>();
    // Reaching here means the handshake already passed the origin check, so
    // `hello_ack.originAllowed` is always true for an established session.
    let mut session = SessionController::new(out_tx, true, global_capturing);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else { continue };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::info!("transport error from {peer} (conn {conn_id}): {e}");
                        break;
                    }
                }
            }
            // A capture task that ended on its own (fatal device error)
            // never produces a client-visible state change unless something
            // polls for it; this is that something.
            _ = session.wait_capture_ended() => {
                session.capture_ended();
            }
        }
    }

    session.shutdown().await;
    writer.abort();
    log::info!("client disconnected: {peer} (conn {conn_id})");
    Ok(())
}
