//! Minimal HTTP/1.1 listener for the control plane.
//!
//! One request per connection, parameters in the query string, JSON
//! responses, `Connection: close`.

use super::ControlPlane;
use crate::handshake::query_param;
use crate::transport::websocket::BoxedIo;
use deck_core::{DeckError, DeckResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

/// Upper bound on the request head plus body.
const MAX_REQUEST_SIZE: usize = 16 * 1024;

/// How long a client gets to finish the TLS handshake and send its request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A parsed control request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Parse a request head. Returns `None` for a malformed request line.
    pub fn parse(head: &str) -> Option<Self> {
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let target = request_line.next()?;
        let (path, query) = target.split_once('?').unwrap_or((target, ""));

        let headers = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        Some(Self {
            method,
            path: path.to_string(),
            query: query.to_string(),
            headers,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn param(&self, name: &str) -> Option<String> {
        query_param(&self.query, name)
    }

    fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// Serve control requests accepted on `listener` until the task is aborted.
pub fn start_listener(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    control: Arc<ControlPlane>,
) -> JoinHandle<()> {
    serve(listener, tls, control, REQUEST_TIMEOUT)
}

fn serve(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    control: Arc<ControlPlane>,
    request_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, remote_addr)) => {
                    let control = control.clone();
                    let tls = tls.clone();
                    tokio::spawn(async move {
                        let io: BoxedIo = match tls {
                            Some(acceptor) => {
                                match tokio::time::timeout(request_timeout, acceptor.accept(stream))
                                    .await
                                {
                                    Ok(Ok(tls_stream)) => Box::new(tls_stream),
                                    Ok(Err(e)) => {
                                        debug!(remote = %remote_addr, error = %e, "control TLS handshake failed");
                                        return;
                                    }
                                    Err(_) => {
                                        debug!(remote = %remote_addr, "control TLS handshake timed out");
                                        return;
                                    }
                                }
                            }
                            None => Box::new(stream),
                        };
                        if let Err(e) = handle_connection(io, &control, request_timeout).await {
                            warn!(remote = %remote_addr, error = %e, "control connection failed");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "control accept failed");
                }
            }
        }
    })
}

async fn handle_connection(
    mut stream: BoxedIo,
    control: &ControlPlane,
    request_timeout: Duration,
) -> DeckResult<()> {
    let request = match tokio::time::timeout(request_timeout, read_request(&mut stream)).await {
        Ok(read) => read?,
        Err(_) => {
            return Err(DeckError::Transport("timed out waiting for request".into()));
        }
    };
    let (status, body) = match request {
        Some(request) => {
            debug!(method = %request.method, path = %request.path, "control request");
            route(control, &request).await
        }
        None => (400, json!({"error": "bad_request"})),
    };
    write_json_response(&mut stream, status, &body).await
}

/// Read one request head, plus any declared body so the socket drains cleanly.
async fn read_request(stream: &mut BoxedIo) -> DeckResult<Option<HttpRequest>> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = find_head_end(&buffer) {
            break pos;
        }
        if buffer.len() >= MAX_REQUEST_SIZE {
            return Ok(None);
        }
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
    let Some(request) = HttpRequest::parse(&head) else {
        return Ok(None);
    };

    let body_len = request.content_length().min(MAX_REQUEST_SIZE);
    let mut received = buffer.len() - (head_end + 4);
    while received < body_len {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        received += read;
    }

    Ok(Some(request))
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Map a request onto a control-plane operation.
pub async fn route(control: &ControlPlane, request: &HttpRequest) -> (u16, Value) {
    let path = request.path.trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };

    let method = match path {
        "/health"
        | "/health/diagnostics"
        | "/health/performance"
        | "/tokens/info"
        | "/discovery"
        | "/discovery/pairing/servers" => "GET",
        "/tokens/handshake"
        | "/tokens/rotate"
        | "/tokens/revoke"
        | "/tokens/handshake/revoke"
        | "/discovery/pairing/request"
        | "/discovery/pairing/confirm" => "POST",
        _ => return (404, json!({"error": "not_found", "path": path})),
    };
    if !request.method.eq_ignore_ascii_case(method) {
        return (405, json!({"error": "method_not_allowed"}));
    }

    let param = |name: &str| request.param(name);
    let authorization = request.header("authorization");

    let result: DeckResult<Value> = match path {
        "/health" => Ok(control.health()),
        "/health/diagnostics" => Ok(control.diagnostics().await),
        "/health/performance" => Ok(control.performance()),
        "/discovery" => Ok(control.discovery()),
        "/tokens/handshake" => {
            control
                .handshake(param("secret").as_deref(), param("clientId").as_deref())
                .await
        }
        "/tokens/rotate" => control.rotate(authorization, param("clientId").as_deref()).await,
        "/tokens/revoke" => control.revoke(param("token").as_deref(), authorization).await,
        "/tokens/handshake/revoke" => control.revoke(param("token").as_deref(), None).await,
        "/tokens/info" => control.info(authorization).await,
        "/discovery/pairing/request" => Ok(control.pairing_request().await),
        "/discovery/pairing/confirm" => {
            control
                .pairing_confirm(
                    param("code").as_deref(),
                    param("serverId").as_deref(),
                    param("fingerprint").as_deref(),
                )
                .await
        }
        "/discovery/pairing/servers" => Ok(control.paired_servers().await),
        _ => Err(DeckError::NotFound(path.to_string())),
    };

    match result {
        Ok(body) => (200, body),
        Err(e) => (e.http_status(), error_body(&e)),
    }
}

fn error_body(err: &DeckError) -> Value {
    let message = match err {
        DeckError::Validation(m)
        | DeckError::Authentication(m)
        | DeckError::NotFound(m)
        | DeckError::Action(m) => m.clone(),
        other => other.to_string(),
    };
    json!({"error": message, "code": err.code()})
}

async fn write_json_response(stream: &mut BoxedIo, status: u16, payload: &Value) -> DeckResult<()> {
    let body = serde_json::to_vec(payload)?;
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        429 => "Too Many Requests",
        _ => "Internal Server Error",
    };
    let head = format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\nCache-Control: no-store\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body).await?;
    let _ = stream.shutdown().await;
    Ok(())
}
