//! Port-forward transport
//!
//! Establishes a TCP tunnel to a named pod port through the Kubernetes API
//! server (SPDY upgrade on the `pods/portforward` subresource) and exposes it
//! as an ordered, reliable byte stream. The tunnel is torn down when the
//! stream is dropped, on every exit path.

use crate::error::{OpsError, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::api::Portforwarder;
use kube::{Api, Client};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

trait TunnelIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> TunnelIo for T {}

/// A bidirectional byte stream bound to a single port on a single pod.
///
/// Owns the underlying forwarder, so the SPDY session lives exactly as long
/// as this value.
pub struct PortForwardStream {
    stream: Box<dyn TunnelIo>,
    // Held to keep the tunnel open; dropped together with the stream.
    _forwarder: Portforwarder,
}

impl PortForwardStream {
    /// Open a tunnel to `namespace/pod:port`
    pub async fn open(
        client: Client,
        namespace: &str,
        pod: &str,
        port: u16,
    ) -> Result<PortForwardStream> {
        let api: Api<Pod> = Api::namespaced(client, namespace);

        let mut forwarder = api.portforward(pod, &[port]).await.map_err(|e| {
            OpsError::PortForward {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                port,
                reason: e.to_string(),
            }
        })?;

        let stream = forwarder
            .take_stream(port)
            .ok_or_else(|| OpsError::PortForward {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                port,
                reason: "no stream for requested port".to_string(),
            })?;

        debug!(namespace, pod, port, "port-forward tunnel established");
        Ok(PortForwardStream {
            stream: Box::new(stream),
            _forwarder: forwarder,
        })
    }
}

impl AsyncRead for PortForwardStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for PortForwardStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
