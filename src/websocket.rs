//! # WebSocket Voice Handler
//!
//! Each browser connects to `/ws` and sends one complete recording per
//! message. Every recording is processed on its own task and answered with
//! exactly one JSON event on the same connection.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: The actor gets a fresh connection id; no handshake message
//! 2. **Audio**: A binary frame with the recorder blob, or a text frame
//!    `{"type":"audio_data","audio_data":"<base64>"}`
//! 3. **Reply**: `audio_response` or `error` (see [`crate::protocol`])
//! 4. **Heartbeat**: Server pings every 30s and drops clients silent for 60s
//! 5. **Disconnect**: The connection's conversation is removed from the store
//!
//! Fragmented messages are reassembled before processing; the configured
//! maximum message size applies to the reassembled message.

use crate::error::client_messages;
use crate::pipeline::VoicePipeline;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::web::{Bytes, BytesMut};
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_http::ws::Item;
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long before lack of client response causes a disconnect
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Kind of the message being reassembled from continuation frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FragmentKind {
    Text,
    Binary,
}

/// WebSocket actor for one browser connection.
///
/// ## Actor Model:
/// The actor only parses frames and writes replies. The pipeline runs on a
/// spawned task that posts its result back through [`SendEvent`], so a slow
/// exchange never blocks pings or other messages on the connection.
pub struct VoiceWebSocket {
    connection_id: String,
    pipeline: Arc<VoicePipeline>,
    max_message_bytes: usize,
    last_heartbeat: Instant,
    fragments: Option<(FragmentKind, BytesMut)>,
}

/// Message for sending a pipeline result to the client.
#[derive(Message)]
#[rtype(result = "()")]
struct SendEvent(ServerEvent);

impl VoiceWebSocket {
    pub fn new(pipeline: Arc<VoicePipeline>, max_message_bytes: usize) -> Self {
        Self {
            connection_id: Uuid::new_v4().to_string(),
            pipeline,
            max_message_bytes,
            last_heartbeat: Instant::now(),
            fragments: None,
        }
    }

    /// Run the pipeline for one recording on its own task.
    ///
    /// The conversation is looked up here, on the actor, so a disconnect that
    /// lands while the task runs cannot bring the store entry back.
    fn process_audio(&self, audio: Bytes, ctx: &mut ws::WebsocketContext<Self>) {
        let pipeline = self.pipeline.clone();
        let conversation = pipeline.sessions().get_or_create(&self.connection_id);
        let connection_id = self.connection_id.clone();
        let addr = ctx.address();

        tokio::spawn(async move {
            let event = pipeline.handle(&connection_id, conversation, &audio).await;
            addr.do_send(SendEvent(event));
        });
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(ClientEvent::AudioData { audio_data }) => self.process_audio(Bytes::from(audio_data), ctx),
            Err(err) => {
                warn!(connection_id = %self.connection_id, "Invalid client message: {}", err);
                Self::send_event(ctx, &ServerEvent::error(client_messages::INVALID_MESSAGE));
            }
        }
    }

    fn handle_continuation(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        let (kind, data, last) = match item {
            Item::FirstText(data) => {
                self.fragments = Some((FragmentKind::Text, BytesMut::new()));
                (Some(FragmentKind::Text), data, false)
            }
            Item::FirstBinary(data) => {
                self.fragments = Some((FragmentKind::Binary, BytesMut::new()));
                (Some(FragmentKind::Binary), data, false)
            }
            Item::Continue(data) => (self.fragment_kind(), data, false),
            Item::Last(data) => (self.fragment_kind(), data, true),
        };
        let Some(kind) = kind else {
            warn!(connection_id = %self.connection_id, "Continuation frame without a first frame");
            return;
        };

        let too_large = match self.fragments.as_mut() {
            Some((_, buffer)) => {
                buffer.extend_from_slice(&data);
                buffer.len() > self.max_message_bytes
            }
            None => false,
        };
        if too_large {
            warn!(connection_id = %self.connection_id, "Fragmented message exceeds {} bytes", self.max_message_bytes);
            self.fragments = None;
            ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Size)));
            ctx.stop();
            return;
        }

        if last {
            if let Some((_, buffer)) = self.fragments.take() {
                debug!(connection_id = %self.connection_id, bytes = buffer.len(), "Reassembled fragmented message");
                match kind {
                    FragmentKind::Binary => self.process_audio(buffer.freeze(), ctx),
                    FragmentKind::Text => match std::str::from_utf8(&buffer) {
                        Ok(text) => self.handle_text(text, ctx),
                        Err(_) => Self::send_event(ctx, &ServerEvent::error(client_messages::INVALID_MESSAGE)),
                    },
                }
            }
        }
    }

    fn fragment_kind(&self) -> Option<FragmentKind> {
        self.fragments.as_ref().map(|(kind, _)| *kind)
    }

    fn send_event(ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("Failed to serialize server event: {}", err),
        }
    }
}

impl Actor for VoiceWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the WebSocket connection starts.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "WebSocket connection started");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = %act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Called when the WebSocket connection stops, however it stopped.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let removed = self.pipeline.sessions().remove(&self.connection_id);
        info!(connection_id = %self.connection_id, session_removed = removed, "WebSocket connection stopped");
    }
}

/// Handle incoming WebSocket frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for VoiceWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.process_audio(data, ctx);
            }
            Ok(ws::Message::Continuation(item)) => {
                self.last_heartbeat = Instant::now();
                self.handle_continuation(item, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<SendEvent> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SendEvent, ctx: &mut Self::Context) {
        Self::send_event(ctx, &msg.0);
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Upgrades the request and hands the connection to a new [`VoiceWebSocket`]
/// actor. The frame size limit is raised to the configured maximum message
/// size so a whole recording fits in one frame.
pub async fn voice_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());

    let max_message_bytes = state.config.audio.max_message_bytes;
    let socket = VoiceWebSocket::new(state.pipeline.clone(), max_message_bytes);

    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(max_message_bytes)
        .start()
}
