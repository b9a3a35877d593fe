//! WebSocket upgrade handler and the per-connection node session.
//!
//! One session per physical connection: the socket is split into a write
//! half drained by a dedicated task (fed by the connection's bounded
//! outbound channel) and a read half owned by the session's single reader
//! loop. The session starts unbound (`Accepted`), becomes `Active` once the
//! node registers, and tears down its registry entry and pending calls when
//! the transport closes or errors.
//!
//! No single malformed frame or failed dispatch ends the session; only
//! transport failure does, and it ends only this session.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use fleetlink_core::{Envelope, FrameKind, NodeKey};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::AppState;
use crate::network::connection::{NodeConnection, OutboundFrame};
use crate::rpc::dispatch_request;

/// Lifecycle of a node session. `Closed` is implicit in the reader loop
/// exiting; there are no transitions out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    /// Connection accepted but not yet bound to a node key. Only inbound
    /// requests (registration) are meaningful; no outbound call could have
    /// been addressed to an unbound connection, so responses are dropped.
    Accepted,
    /// Registration completed; the connection is bound to this node key.
    Active(NodeKey),
}

/// Upgrades an HTTP connection to the node RPC WebSocket session.
pub async fn ws_upgrade_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| node_session(state, socket))
}

/// Runs one node session to completion.
async fn node_session(state: AppState, socket: WebSocket) {
    let (conn, outbound) = NodeConnection::channel(&state.config.connection);
    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound));

    debug!("node session accepted");
    let phase = read_loop(&state, &conn, stream).await;

    if let SessionPhase::Active(node) = phase {
        // No-op if a newer connection already superseded this one.
        state.rpc.release_node(node, &conn);
    }

    // Dropping the last handle closes the outbound channel, which ends the
    // write loop once it has drained.
    drop(conn);
    let _ = writer.await;
    debug!("node session closed");
}

/// Single reader per connection; runs until the transport closes or errors.
async fn read_loop(
    state: &AppState,
    conn: &Arc<NodeConnection>,
    mut stream: SplitStream<WebSocket>,
) -> SessionPhase {
    let mut phase = SessionPhase::Accepted;

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "websocket read failed");
                break;
            }
        };
        match message {
            Message::Text(text) => handle_frame(state, conn, &mut phase, text.as_str()).await,
            Message::Close(_) => break,
            Message::Binary(_) => warn!("ignoring binary frame on rpc socket"),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    phase
}

/// Classifies one inbound text frame and routes it.
async fn handle_frame(
    state: &AppState,
    conn: &Arc<NodeConnection>,
    phase: &mut SessionPhase,
    text: &str,
) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            counter!("fleetlink_malformed_frames_total").increment(1);
            warn!(%err, "dropping unparseable frame");
            return;
        }
    };

    match envelope.classify() {
        FrameKind::Request => {
            let (reply, bound) =
                dispatch_request(&state.rpc, state.directory.as_ref(), conn, envelope).await;
            if let Some(node) = bound {
                *phase = SessionPhase::Active(node);
            }
            send_reply(state, conn, &reply).await;
        }
        FrameKind::Response => {
            if let SessionPhase::Active(node) = *phase {
                state.rpc.resolve_response(node, envelope);
            } else {
                // No addressable node key yet; nothing could be waiting.
                warn!("dropping response received before registration");
            }
        }
        FrameKind::Malformed => {
            counter!("fleetlink_malformed_frames_total").increment(1);
            warn!("dropping malformed frame");
        }
    }
}

async fn send_reply(state: &AppState, conn: &Arc<NodeConnection>, reply: &Envelope) {
    match serde_json::to_string(reply) {
        Ok(frame) => {
            if let Err(err) = conn
                .send_timeout(OutboundFrame::Text(frame), state.config.rpc.send_timeout)
                .await
            {
                warn!(%err, "failed to send reply to node");
            }
        }
        Err(err) => warn!(%err, "failed to encode reply"),
    }
}

/// Drains the connection's outbound channel into the socket's write half.
///
/// Exits when every sender is gone, when a send fails, or after a close
/// frame has been written.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            OutboundFrame::Text(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            OutboundFrame::Close(reason) => {
                let close = reason.map(|reason| CloseFrame {
                    code: close_code::NORMAL,
                    reason: reason.into(),
                });
                let _ = sink.send(Message::Close(close)).await;
                break;
            }
        }
    }
}
