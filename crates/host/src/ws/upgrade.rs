//! Upgrade listener
//!
//! Reads the HTTP request head from a freshly accepted stream and parks
//! the connection in the registry as a pending session. The handshake is
//! neither completed nor rejected here; the consumer is only told that a
//! client is waiting.

use std::net::SocketAddr;

use http::{StatusCode, Uri, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wsgate_protocol::{ConnectNotification, HostEvent};

use crate::error::{RegistryError, RequestHeadError};
use crate::session::{generate_client_id, PendingHandshake};

use super::protocol::{capture_metadata, is_upgrade_request};
use super::Gateway;

/// Maximum number of request headers accepted
const MAX_HEADERS: usize = 64;

/// A parsed HTTP request head plus anything read past its end
#[derive(Debug)]
pub struct RequestHead {
    pub request: http::Request<()>,
    /// Raw request target as sent on the request line
    pub target: String,
    pub head: Vec<u8>,
}

impl RequestHeadError {
    /// Status to answer with before dropping the connection, if any
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::TooLarge(_) => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            Self::Malformed(_) => Some(StatusCode::BAD_REQUEST),
            Self::Closed | Self::Io(_) => None,
        }
    }
}

/// Read until a complete request head has arrived
pub async fn read_request_head<S>(
    stream: &mut S,
    max_bytes: usize,
) -> Result<RequestHead, RequestHeadError>
where
    S: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(RequestHeadError::Closed);
        }
        if let Some((request, target, len)) = parse_request_head(&buf)? {
            let head = buf.split_off(len);
            return Ok(RequestHead {
                request,
                target,
                head,
            });
        }
        if buf.len() >= max_bytes {
            return Err(RequestHeadError::TooLarge(max_bytes));
        }
    }
}

/// Returns the request, its raw target and the head length once complete
fn parse_request_head(
    buf: &[u8],
) -> Result<Option<(http::Request<()>, String, usize)>, RequestHeadError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    let httparse::Status::Complete(len) = parsed.parse(buf)? else {
        return Ok(None);
    };

    let target = parsed.path.unwrap_or("/").to_string();
    // Targets such as `//a\b` are not valid URIs but are still accepted;
    // the raw form is kept separately for the consumer.
    let uri = Uri::try_from(target.as_str()).unwrap_or_else(|_| Uri::from_static("/"));
    let version = if parsed.version == Some(0) {
        Version::HTTP_10
    } else {
        Version::HTTP_11
    };

    let mut builder = http::Request::builder()
        .method(parsed.method.unwrap_or("GET"))
        .uri(uri)
        .version(version);
    for header in parsed.headers.iter() {
        builder = builder.header(header.name, header.value);
    }
    Ok(Some((builder.body(())?, target, len)))
}

/// Answer with a bare status line and drop the connection
pub(crate) async fn respond_and_close(stream: &mut TcpStream, status: StatusCode) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Turn one accepted stream into a pending session
pub(crate) async fn handle_stream(gateway: Gateway, mut stream: TcpStream, peer: SocketAddr) {
    let read = tokio::select! {
        () = gateway.shutdown_token().cancelled() => return,
        read = read_request_head(&mut stream, gateway.max_header_bytes()) => read,
    };

    let RequestHead {
        request,
        target,
        head,
    } = match read {
        Ok(head) => head,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "Discarding connection before upgrade");
            if let Some(status) = e.status() {
                respond_and_close(&mut stream, status).await;
            }
            return;
        }
    };

    if !is_upgrade_request(request.headers()) {
        tracing::debug!(peer = %peer, target = %target, "Refusing non-upgrade request");
        respond_and_close(&mut stream, StatusCode::UPGRADE_REQUIRED).await;
        return;
    }

    let client_id = generate_client_id();
    let metadata = capture_metadata(&request, &target);
    let notification = ConnectNotification::new(
        client_id.clone(),
        metadata.headers.clone(),
        metadata.url.clone(),
    );
    let pathname = metadata.url.pathname.clone();

    let handshake = PendingHandshake {
        request,
        stream,
        head,
    };
    match gateway.registry().create(client_id.clone(), handshake, metadata) {
        Ok(()) => {}
        Err(RegistryError::Closed) => {
            tracing::debug!(peer = %peer, "Upgrade arrived during shutdown, dropped");
            return;
        }
        Err(e) => {
            tracing::error!(client_id = %client_id, error = %e, "Failed to register upgrade");
            return;
        }
    }

    tracing::info!(
        client_id = %client_id,
        peer = %peer,
        path = %pathname,
        "Upgrade pending decision"
    );
    gateway.emit(HostEvent::Connect(notification));
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE_HEAD: &[u8] = b"GET //chat\\room?token=t HTTP/1.1\r\n\
        Host: localhost:9001\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[tokio::test]
    async fn test_reads_head_and_keeps_trailing_bytes() {
        let mut input = UPGRADE_HEAD.to_vec();
        input.extend_from_slice(b"early");
        let mut reader = input.as_slice();

        let head = read_request_head(&mut reader, 16 * 1024).await.unwrap();
        assert_eq!(head.target, "//chat\\room?token=t");
        assert_eq!(head.head, b"early");
        assert_eq!(head.request.method(), http::Method::GET);
        assert_eq!(head.request.version(), Version::HTTP_11);
        assert_eq!(head.request.headers()["upgrade"], "websocket");
        assert!(is_upgrade_request(head.request.headers()));
    }

    #[tokio::test]
    async fn test_head_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            for chunk in UPGRADE_HEAD.chunks(7) {
                client.write_all(chunk).await.unwrap();
            }
            client
        });

        let head = read_request_head(&mut server, 16 * 1024).await.unwrap();
        assert!(head.head.is_empty());
        assert_eq!(head.request.headers()["sec-websocket-version"], "13");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_head_is_refused() {
        let mut input = b"GET / HTTP/1.1\r\n".to_vec();
        input.extend(std::iter::repeat(b'a').take(200));
        let mut reader = input.as_slice();

        let err = read_request_head(&mut reader, 64).await.unwrap_err();
        assert!(matches!(err, RequestHeadError::TooLarge(64)));
        assert_eq!(err.status(), Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE));
    }

    #[tokio::test]
    async fn test_truncated_head_is_closed() {
        let mut reader: &[u8] = b"GET / HTTP/1.1\r\nHost: x\r\n";
        let err = read_request_head(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, RequestHeadError::Closed));
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let mut reader: &[u8] = b"\x00\x01\x02 nonsense\r\n\r\n";
        let err = read_request_head(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, RequestHeadError::Malformed(_)));
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }
}
