//! Diagnostics pod client
//!
//! The broker ships a diagnostics pod exposing Prometheus-style metrics on an
//! HTTP port and distributed traces on a framed protobuf port. Both are
//! reached over a port-forward tunnel; the framed protocol prefixes every
//! message with a 4-byte big-endian length.

pub mod proto;

use crate::accessor::{ClusterAccessor, Collectable};
use crate::error::{OpsError, Result};
use crate::forward::PortForwardStream;
use base64::Engine;
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Default port serving `GET /metrics`
pub const METRICS_PORT: u16 = 9600;
/// Default port speaking the framed protobuf protocol
pub const PROTOBUF_PORT: u16 = 9800;
/// Name prefix identifying the broker diagnostics pod
pub const DIAGNOSTICS_POD_PREFIX: &str = "aio-broker-diagnostics";
/// Reserved trace-id: retrieve every trace and emit both output formats
pub const SUPPORT_BUNDLE_TRACE_SENTINEL: &str = "!support_bundle!";

/// Upper bound on a single response frame; larger lengths indicate a corrupt
/// or desynchronized stream.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Read exactly `n` bytes, or return empty when the peer closes.
///
/// `recv` may return fewer bytes than requested, so reads loop until the
/// buffer is full. A zero-byte read at any point means the connection was
/// closed and the partial data is discarded.
pub async fn fetch_bytes<S>(stream: &mut S, n: usize) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        let read = stream.read(&mut buf[filled..]).await?;
        if read == 0 {
            if filled > 0 {
                debug!(wanted = n, got = filled, "peer closed mid-message");
            }
            return Ok(Vec::new());
        }
        filled += read;
    }
    Ok(buf)
}

/// Write one length-prefixed frame
async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame; `None` when the peer closed cleanly
async fn read_frame<S>(stream: &mut S) -> Result<Option<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let prefix = fetch_bytes(stream, 4).await?;
    if prefix.is_empty() {
        return Ok(None);
    }
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    if len > MAX_FRAME_LEN {
        return Err(OpsError::Decode(format!("oversize frame: {len} bytes")));
    }
    let payload = fetch_bytes(stream, len as usize).await?;
    if payload.is_empty() && len > 0 {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Decode a caller-supplied trace id into raw bytes.
///
/// Accepts lowercase/uppercase hex and base64; the server always wants raw
/// bytes on the wire.
pub fn decode_trace_id(id: &str) -> Result<Vec<u8>> {
    if id.len() % 2 == 0 && !id.is_empty() && id.chars().all(|c| c.is_ascii_hexdigit()) {
        return hex::decode(id).map_err(|e| OpsError::InvalidArgument(e.to_string()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(id)
        .map_err(|_| OpsError::InvalidArgument(format!("not a hex or base64 trace id: {id}")))
}

/// Run one trace-retrieval session over an established stream.
///
/// Returns the traces received before the session ended. Socket and decode
/// failures after the request was sent terminate the session gracefully,
/// keeping whatever was already accumulated.
pub async fn retrieve_traces<S>(
    stream: &mut S,
    trace_ids: &[Vec<u8>],
) -> Result<Vec<proto::TracesData>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = proto::Request {
        get_traces: Some(proto::TraceRetrievalInfo {
            trace_ids: trace_ids.to_vec(),
        }),
    };
    write_frame(stream, &request.encode_to_vec()).await?;

    let mut traces = Vec::new();
    loop {
        let frame = match read_frame(stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                debug!("trace session terminated: {e}");
                break;
            }
        };

        let response = match proto::Response::decode(frame.as_slice()) {
            Ok(response) => response,
            Err(e) => {
                debug!("undecodable trace response frame: {e}");
                break;
            }
        };

        let Some(wrapper) = response.retrieved_trace else {
            debug!("response frame without retrieved_trace, ignoring");
            continue;
        };
        if let Some(trace) = wrapper.trace {
            traces.push(trace);
        }
        if wrapper.current_trace_count >= wrapper.total_trace_count {
            break;
        }
    }
    Ok(traces)
}

/// Issue a plain GET over an established stream and return the body.
///
/// Speaks HTTP/1.0: chunked transfer encoding is not legal there, so the
/// bytes after the header block are the body verbatim, read to EOF.
async fn http_get<S>(stream: &mut S, path: &str) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("GET {path} HTTP/1.0\r\nHost: diagnostics\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;

    let boundary = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| OpsError::Decode("malformed HTTP response".to_string()))?;
    Ok(response[boundary + 4..].to_vec())
}

/// Client for one cluster's diagnostics pod
pub struct DiagnosticsClient {
    namespace: String,
    pod: String,
}

impl DiagnosticsClient {
    /// Locate the diagnostics pod in `namespace` by name prefix.
    ///
    /// Returns `None` when the platform runs without diagnostics.
    pub async fn discover(
        accessor: &ClusterAccessor,
        namespace: &str,
    ) -> Result<Option<DiagnosticsClient>> {
        let pods = accessor.list_pods(Some(namespace), None).await?;
        let pod = pods
            .iter()
            .map(|p| p.name())
            .find(|name| name.starts_with(DIAGNOSTICS_POD_PREFIX));

        Ok(pod.map(|pod| DiagnosticsClient {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
        }))
    }

    /// Capture the metrics endpoint verbatim
    pub async fn fetch_metrics(&self, client: kube::Client) -> Result<Vec<u8>> {
        let mut stream =
            PortForwardStream::open(client, &self.namespace, &self.pod, METRICS_PORT).await?;
        http_get(&mut stream, "/metrics").await
    }

    /// Retrieve traces by id; an empty list (or the sentinel) means all
    pub async fn fetch_traces(
        &self,
        client: kube::Client,
        trace_ids: &[String],
    ) -> Result<Vec<proto::TracesData>> {
        let raw_ids = if trace_ids.iter().any(|id| id == SUPPORT_BUNDLE_TRACE_SENTINEL) {
            Vec::new()
        } else {
            trace_ids
                .iter()
                .map(|id| decode_trace_id(id))
                .collect::<Result<Vec<_>>>()?
        };

        let mut stream =
            PortForwardStream::open(client, &self.namespace, &self.pod, PROTOBUF_PORT).await?;
        retrieve_traces(&mut stream, &raw_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_trace_id_hex() {
        let id = decode_trace_id("847969664d5e616ae956fc6aaaae6560").unwrap();
        assert_eq!(id.len(), 16);
        assert_eq!(id[0], 0x84);
        assert_eq!(id[15], 0x60);
    }

    #[test]
    fn test_decode_trace_id_base64() {
        let raw: Vec<u8> = (0u8..16).collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&raw);
        assert_eq!(decode_trace_id(&encoded).unwrap(), raw);
    }

    #[test]
    fn test_decode_trace_id_rejects_garbage() {
        assert!(decode_trace_id("!!not an id!!").is_err());
    }

    #[tokio::test]
    async fn test_http_get_speaks_http_1_0() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut client_side, mut server_side) = tokio::io::duplex(16 * 1024);

        let server = tokio::spawn(async move {
            let mut request = vec![0u8; 1024];
            let read = server_side.read(&mut request).await.unwrap();
            let request = String::from_utf8_lossy(&request[..read]).to_string();

            server_side
                .write_all(b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nup 1\n")
                .await
                .unwrap();
            drop(server_side);
            request
        });

        let body = http_get(&mut client_side, "/metrics").await.unwrap();
        assert_eq!(body, b"up 1\n");

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /metrics HTTP/1.0\r\n"));
        assert!(request.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn test_http_get_body_may_contain_header_separator() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut client_side, mut server_side) = tokio::io::duplex(16 * 1024);

        tokio::spawn(async move {
            let mut request = [0u8; 1024];
            let _ = server_side.read(&mut request).await.unwrap();
            server_side
                .write_all(b"HTTP/1.0 200 OK\r\n\r\nline1\r\n\r\nline2")
                .await
                .unwrap();
        });

        let body = http_get(&mut client_side, "/metrics").await.unwrap();
        assert_eq!(body, b"line1\r\n\r\nline2");
    }

    #[tokio::test]
    async fn test_http_get_rejects_headerless_response() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut client_side, mut server_side) = tokio::io::duplex(16 * 1024);

        tokio::spawn(async move {
            let mut request = [0u8; 1024];
            let _ = server_side.read(&mut request).await.unwrap();
            server_side.write_all(b"garbage without headers").await.unwrap();
        });

        assert!(http_get(&mut client_side, "/metrics").await.is_err());
    }
}
