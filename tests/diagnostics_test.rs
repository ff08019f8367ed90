//! Framed diagnostics protocol tests

mod common;

use common::probe_trace;
use iotops::diagnostics::proto::{Request, Response, RetrievedTraceWrapper};
use iotops::diagnostics::{fetch_bytes, retrieve_traces};
use prost::Message;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};

/// Reader that hands out exactly one preset chunk per read call
struct ChunkedReader {
    chunks: VecDeque<Vec<u8>>,
}

impl ChunkedReader {
    fn new(chunks: &[&[u8]]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
        }
    }
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if let Some(chunk) = self.get_mut().chunks.pop_front() {
            buf.put_slice(&chunk);
        }
        Poll::Ready(Ok(()))
    }
}

// ============================================================================
// fetch_bytes
// ============================================================================

#[tokio::test]
async fn test_fetch_bytes_reassembles_partial_reads() {
    // 10 bytes delivered as 3 + 3 + 3 + 1
    let mut reader = ChunkedReader::new(&[b"abc", b"def", b"ghi", b"j"]);
    let bytes = fetch_bytes(&mut reader, 10).await.unwrap();
    assert_eq!(bytes, b"abcdefghij");
}

#[tokio::test]
async fn test_fetch_bytes_empty_on_clean_close() {
    let mut reader = ChunkedReader::new(&[]);
    let bytes = fetch_bytes(&mut reader, 4).await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn test_fetch_bytes_empty_on_mid_read_close() {
    // Peer closes after 3 of 10 bytes; the partial data is discarded
    let mut reader = ChunkedReader::new(&[b"abc"]);
    let bytes = fetch_bytes(&mut reader, 10).await.unwrap();
    assert!(bytes.is_empty());
}

// ============================================================================
// retrieve_traces
// ============================================================================

fn response_frame(current: u32, total: u32) -> Vec<u8> {
    let response = Response {
        retrieved_trace: Some(RetrievedTraceWrapper {
            trace: Some(probe_trace()),
            current_trace_count: current,
            total_trace_count: total,
        }),
    };
    let payload = response.encode_to_vec();
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(&payload);
    frame
}

#[tokio::test]
async fn test_retrieve_traces_until_counts_match() {
    let (mut client_side, mut server_side) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        // Read the request frame and check its shape
        let mut len = [0u8; 4];
        server_side.read_exact(&mut len).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        server_side.read_exact(&mut payload).await.unwrap();
        let request = Request::decode(payload.as_slice()).unwrap();
        assert!(request.get_traces.unwrap().trace_ids.is_empty());

        server_side.write_all(&response_frame(1, 2)).await.unwrap();
        server_side.write_all(&response_frame(2, 2)).await.unwrap();
        // Keep the socket open; the client must terminate on the counters
        server_side
    });

    let traces = retrieve_traces(&mut client_side, &[]).await.unwrap();
    assert_eq!(traces.len(), 2);
    server.await.unwrap();
}

#[tokio::test]
async fn test_retrieve_traces_keeps_partial_results_on_close() {
    let (mut client_side, mut server_side) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        let mut len = [0u8; 4];
        server_side.read_exact(&mut len).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        server_side.read_exact(&mut payload).await.unwrap();

        // One of five promised traces, then a clean close
        server_side.write_all(&response_frame(1, 5)).await.unwrap();
        drop(server_side);
    });

    let traces = retrieve_traces(&mut client_side, &[]).await.unwrap();
    assert_eq!(traces.len(), 1);
}

#[tokio::test]
async fn test_retrieve_traces_sends_requested_ids() {
    let (mut client_side, mut server_side) = tokio::io::duplex(64 * 1024);
    let wanted = hex::decode("847969664d5e616ae956fc6aaaae6560").unwrap();
    let wanted_clone = wanted.clone();

    tokio::spawn(async move {
        let mut len = [0u8; 4];
        server_side.read_exact(&mut len).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        server_side.read_exact(&mut payload).await.unwrap();
        let request = Request::decode(payload.as_slice()).unwrap();
        assert_eq!(request.get_traces.unwrap().trace_ids, vec![wanted_clone]);

        server_side.write_all(&response_frame(1, 1)).await.unwrap();
        server_side
    });

    let traces = retrieve_traces(&mut client_side, std::slice::from_ref(&wanted))
        .await
        .unwrap();
    assert_eq!(traces.len(), 1);
}
