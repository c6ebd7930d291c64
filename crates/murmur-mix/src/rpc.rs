//! RPC server side: the listener a predecessor (or the coordinator)
//! dials.
//!
//! Each accepted connection gets a read loop; every request is dispatched
//! on its own task so calls pipeline; the service idle gate, not the
//! socket, serializes rounds. Responses are written under a per-connection
//! lock and matched to requests by id.

use std::sync::Arc;

use murmur_proto::{Frame, FrameHeader, RpcRequest, RpcResponse, RoundReplies, RpcErrorPayload};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
};

use crate::{error::MixError, service::ConvoService};

/// Read one frame: fixed header, then the claimed payload.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, MixError> {
    let mut header_buf = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_buf).await?;
    let header = *FrameHeader::from_bytes(&header_buf)?;

    let mut payload = vec![0u8; header.payload_size() as usize];
    reader.read_exact(&mut payload).await?;

    let mut wire = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    wire.extend_from_slice(&header_buf);
    wire.extend_from_slice(&payload);
    Ok(Frame::decode(&wire)?)
}

/// Write one frame.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), MixError> {
    let mut buf = Vec::with_capacity(FrameHeader::SIZE + frame.payload.len());
    frame.encode(&mut buf)?;
    writer.write_all(&buf).await?;
    Ok(())
}

/// Accept loop: serve the convo service until the listener fails.
///
/// # Errors
///
/// Only listener-level failures escape; per-connection errors are logged
/// and confined.
pub async fn serve(listener: TcpListener, service: Arc<ConvoService>) -> Result<(), MixError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!(%peer, "connection accepted");

        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, service).await {
                tracing::debug!(%peer, %err, "connection closed");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    service: Arc<ConvoService>,
) -> Result<(), MixError> {
    let (mut read_half, write_half) = stream.into_split();
    let writer = Arc::new(tokio::sync::Mutex::new(write_half));

    loop {
        let frame = read_frame(&mut read_half).await?;
        let request_id = frame.header.request_id();

        let request = match RpcRequest::from_frame(&frame) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(request_id, %err, "unparseable request");
                let response = RpcResponse::Error(RpcErrorPayload { message: err.to_string() });
                send_response(&writer, response, request_id).await;
                continue;
            }
        };

        let service = Arc::clone(&service);
        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            let response = dispatch(&service, request).await;
            send_response(&writer, response, request_id).await;
        });
    }
}

async fn dispatch(service: &ConvoService, request: RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::NewConvoRound(call) => match service.new_round(call.round).await {
            Ok(()) => RpcResponse::RoundAccepted,
            Err(err) => RpcResponse::Error(RpcErrorPayload { message: err.to_wire_message() }),
        },
        RpcRequest::RunConvoRound(call) => {
            match service.run_round(call.round, call.onions).await {
                Ok(replies) => {
                    RpcResponse::RoundReplies(RoundReplies { round: call.round, replies })
                }
                Err(err) => {
                    tracing::error!(round = call.round, %err, "round failed");
                    RpcResponse::Error(RpcErrorPayload { message: err.to_wire_message() })
                }
            }
        }
    }
}

async fn send_response(
    writer: &Arc<tokio::sync::Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    response: RpcResponse,
    request_id: u64,
) {
    let frame = match response.into_frame(request_id) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::error!(request_id, %err, "failed to encode response");
            return;
        }
    };

    let mut writer = writer.lock().await;
    if let Err(err) = write_frame(&mut *writer, &frame).await {
        tracing::debug!(request_id, %err, "failed to write response");
    }
}
