//! Status web server
//!
//! Terminates mutual TLS on a local port and answers `GET /status` with the
//! current local status. Only clients presenting a certificate from the
//! friend allowlist complete the handshake.

use crate::crypto::KeyMaterial;
use crate::location::StatusBoard;
use crate::protocol::{GET_STATUS_REQUEST_PATH, STATUS_CONTENT_TYPE};
use crate::tls;
use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// A running status server
pub struct WebServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WebServer {
    /// Bind `bind_addr` and start serving
    ///
    /// Returns once the listener is bound, so connections are accepted as
    /// soon as this returns.
    pub async fn start(
        bind_addr: SocketAddr,
        credentials: &KeyMaterial,
        friend_certificates: &[String],
        board: StatusBoard,
    ) -> Result<Self> {
        let config = tls::server_config(credentials, friend_certificates)?;
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind status server to {}", bind_addr))?;
        let local_addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(serve(listener, acceptor, board, shutdown_rx));

        info!(
            addr = %local_addr,
            friends = friend_certificates.len(),
            "Status server listening"
        );

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn listening_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting and close every open connection
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                warn!("Status server task failed: {}", e);
            }
        }
        debug!(addr = %self.local_addr, "Status server stopped");
    }
}

impl Drop for WebServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Accept loop; dropping the connection set on exit closes open connections
async fn serve(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    board: StatusBoard,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(_) = connections.join_next() => {},
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(handle_connection(stream, peer, acceptor.clone(), board.clone()));
                },
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                },
            },
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    board: StatusBoard,
) {
    let tls_stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await
    {
        Ok(Ok(tls_stream)) => tls_stream,
        Ok(Err(e)) => {
            debug!("TLS handshake with {} failed: {}", peer, e);
            return;
        },
        Err(_) => {
            debug!("TLS handshake with {} timed out", peer);
            return;
        },
    };

    let service = service_fn(|req| {
        let board = board.clone();
        async move { Ok::<_, hyper::Error>(handle_request(&req, &board)) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
    {
        debug!("Connection error from {}: {}", peer, e);
    }
}

/// Route a single request
fn handle_request(req: &Request<Incoming>, board: &StatusBoard) -> Response<Full<Bytes>> {
    if req.method() != Method::GET || req.uri().path() != GET_STATUS_REQUEST_PATH {
        debug!("No route for {} {}", req.method(), req.uri());
        return text_response(StatusCode::NOT_FOUND, "Not Found");
    }

    let Some(status) = board.current() else {
        return text_response(StatusCode::SERVICE_UNAVAILABLE, "No status available");
    };

    match serde_json::to_vec(&status) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", STATUS_CONTENT_TYPE)
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| internal_error()),
        Err(e) => {
            warn!("Failed to encode status: {}", e);
            internal_error()
        },
    }
}

fn text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from(message.to_string())))
        .unwrap_or_else(|_| internal_error())
}

fn internal_error() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from("Internal Server Error")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
