//! Live session WebSocket client
//!
//! Connect, send the setup frame, wait for `setupComplete`, then split the
//! stream into an outbound writer task (fed by an mpsc channel) and an
//! inbound reader task that decodes frames into [`ServerEvent`]s. The event
//! receiver is handed back by value: the session controller is the single
//! consumer.
//!
//! The server may deliver JSON in Binary WebSocket frames; both frame types
//! are parsed.

use std::time::Duration;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{build_media_message, parse_server_message, ServerEvent, SetupMessage};
use crate::audio::MediaBlob;

const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Outbound message to the live session.
#[derive(Debug)]
pub enum OutboundMessage {
    Media(MediaBlob),
    Close,
}

/// Handle to one live interpreter session.
pub struct LiveSession {
    outbound_tx: mpsc::Sender<OutboundMessage>,
    session_id: String,
}

impl LiveSession {
    /// Open the session and complete the setup handshake.
    pub async fn connect(
        endpoint: &str,
        api_key: &str,
        setup: SetupMessage,
    ) -> anyhow::Result<(Self, mpsc::Receiver<ServerEvent>)> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{endpoint}?key={api_key}");

        info!(session_id = %session_id, model = %setup.setup.model, "connecting live session");

        let (mut ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .context("failed to connect to live endpoint")?;

        let setup_json = serde_json::to_string(&setup)?;
        ws_stream
            .send(WsMessage::Text(setup_json.into()))
            .await
            .context("failed to send setup message")?;

        Self::await_setup_complete(&mut ws_stream, &session_id).await?;

        let (ws_sink, ws_source) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(256);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(256);

        let sid = session_id.clone();
        tokio::spawn(async move {
            Self::outbound_loop(outbound_rx, ws_sink, sid).await;
        });

        let sid = session_id.clone();
        tokio::spawn(async move {
            Self::inbound_loop(ws_source, event_tx, sid).await;
        });

        Ok((Self { outbound_tx, session_id }, event_rx))
    }

    /// Clone of the outbound sender for the capture pipeline.
    pub fn media_sender(&self) -> mpsc::Sender<OutboundMessage> {
        self.outbound_tx.clone()
    }

    /// Close the session. Best effort; a dead channel means the connection
    /// is already gone.
    pub async fn close(&self) {
        let _ = self.outbound_tx.send(OutboundMessage::Close).await;
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn await_setup_complete(
        ws_stream: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
        session_id: &str,
    ) -> anyhow::Result<()> {
        let handshake = tokio::time::timeout(SETUP_TIMEOUT, async {
            while let Some(frame) = ws_stream.next().await {
                match frame {
                    Ok(WsMessage::Binary(data)) if data.first() == Some(&b'{') => {
                        if let Ok(text) = std::str::from_utf8(&data) {
                            if text.contains("setupComplete") {
                                return Ok(());
                            }
                        }
                    }
                    Ok(WsMessage::Text(text)) if text.contains("setupComplete") => {
                        return Ok(());
                    }
                    Ok(WsMessage::Close(frame)) => {
                        anyhow::bail!("connection closed before setupComplete: {frame:?}");
                    }
                    Err(e) => {
                        anyhow::bail!("websocket error before setupComplete: {e}");
                    }
                    other => {
                        debug!(session_id = %session_id, frame = ?other, "ignoring frame during setup");
                    }
                }
            }
            anyhow::bail!("stream ended before setupComplete")
        })
        .await;

        match handshake {
            Ok(Ok(())) => {
                info!(session_id = %session_id, "live session setup complete");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => anyhow::bail!("setupComplete timeout ({SETUP_TIMEOUT:?})"),
        }
    }

    async fn outbound_loop(
        mut rx: mpsc::Receiver<OutboundMessage>,
        mut ws_sink: futures::stream::SplitSink<
            WebSocketStream<MaybeTlsStream<TcpStream>>,
            WsMessage,
        >,
        session_id: String,
    ) {
        let mut frames_sent: u64 = 0;

        while let Some(msg) = rx.recv().await {
            match msg {
                OutboundMessage::Media(blob) => {
                    let media = build_media_message(blob);
                    let json = match serde_json::to_string(&media) {
                        Ok(json) => json,
                        Err(e) => {
                            error!(session_id = %session_id, error = %e, "failed to serialize media frame");
                            continue;
                        }
                    };
                    if ws_sink.send(WsMessage::Text(json.into())).await.is_err() {
                        warn!(session_id = %session_id, "websocket send failed, closing outbound loop");
                        break;
                    }
                    frames_sent += 1;
                    if frames_sent % 100 == 1 {
                        debug!(session_id = %session_id, frames_sent, "outbound media progress");
                    }
                }
                OutboundMessage::Close => {
                    let _ = ws_sink.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }

        debug!(session_id = %session_id, frames_sent, "outbound loop terminated");
    }

    async fn inbound_loop(
        mut ws_source: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
        event_tx: mpsc::Sender<ServerEvent>,
        session_id: String,
    ) {
        while let Some(frame) = ws_source.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    if Self::forward_events(&text, &event_tx, &session_id).await.is_err() {
                        return;
                    }
                }
                Ok(WsMessage::Binary(data)) => {
                    if data.first() != Some(&b'{') {
                        warn!(
                            session_id = %session_id,
                            len = data.len(),
                            "unexpected non-JSON binary frame, skipping"
                        );
                        continue;
                    }
                    match std::str::from_utf8(&data) {
                        Ok(text) => {
                            if Self::forward_events(text, &event_tx, &session_id).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(session_id = %session_id, error = %e, "invalid UTF-8 in binary frame");
                        }
                    }
                }
                Ok(WsMessage::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    info!(session_id = %session_id, code, reason = %reason, "live session closed by remote");
                    let _ = event_tx.send(ServerEvent::Closed { code, reason }).await;
                    break;
                }
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {
                    // handled by tungstenite
                }
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "live session websocket error");
                    let _ = event_tx
                        .send(ServerEvent::ServerError { message: format!("websocket error: {e}") })
                        .await;
                    break;
                }
            }
        }

        debug!(session_id = %session_id, "inbound loop terminated");
    }

    /// Returns Err when the event receiver is gone and the loop should end.
    async fn forward_events(
        text: &str,
        event_tx: &mpsc::Sender<ServerEvent>,
        session_id: &str,
    ) -> Result<(), ()> {
        for event in parse_server_message(text) {
            if matches!(event, ServerEvent::SetupComplete) {
                continue; // consumed during the handshake
            }
            debug!(session_id = %session_id, event = ?event_kind(&event), "inbound event");
            if event_tx.send(event).await.is_err() {
                debug!(session_id = %session_id, "event receiver dropped, closing inbound loop");
                return Err(());
            }
        }
        Ok(())
    }
}

fn event_kind(event: &ServerEvent) -> &'static str {
    match event {
        ServerEvent::SetupComplete => "setup_complete",
        ServerEvent::ToolCall { .. } => "tool_call",
        ServerEvent::InputTranscript { .. } => "input_transcript",
        ServerEvent::OutputTranscript { .. } => "output_transcript",
        ServerEvent::TurnComplete => "turn_complete",
        ServerEvent::AudioFragment { .. } => "audio_fragment",
        ServerEvent::Interrupted => "interrupted",
        ServerEvent::ServerError { .. } => "server_error",
        ServerEvent::Closed { .. } => "closed",
    }
}
