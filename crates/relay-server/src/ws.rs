//! `/ws` endpoint: origin check, upgrade, and the axum socket adapters.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use relay_hub::{serve, CloseReason, Frame, FrameSink, FrameSource, StreamError};
use relay_telemetry::metrics::UPGRADES_REJECTED_TOTAL;
use tracing::{debug, warn};

use crate::server::AppState;

/// Whether a request carrying `origin` may upgrade.
///
/// An empty allow-list accepts everything, as does a `*` entry. Requests
/// without an `Origin` header (non-browser clients) are accepted.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    let Some(origin) = origin else {
        return true;
    };
    allowed.is_empty()
        || allowed
            .iter()
            .any(|entry| entry == "*" || entry.eq_ignore_ascii_case(origin))
}

/// Middleware on `/ws`: refuse disallowed origins before the upgrade.
pub(crate) async fn check_origin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !origin_allowed(&state.allowed_origins, origin) {
        warn!(origin = origin.unwrap_or_default(), "upgrade rejected: origin not allowed");
        counter!(UPGRADES_REJECTED_TOTAL, "reason" => "origin").increment(1);
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    next.run(request).await
}

/// GET /ws
pub(crate) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let limit = state.hub_config.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(|err| {
            counter!(UPGRADES_REJECTED_TOTAL, "reason" => "handshake").increment(1);
            warn!(error = %err, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    match serve(WsSource(stream), WsSink(sink), &state.hub, &state.hub_config).await {
        Ok(tasks) => {
            let conn_id = tasks.id.clone();
            debug!(%conn_id, "websocket client connected");
            let (read, write) = tasks.join().await;
            debug!(%conn_id, ?read, ?write, "websocket client finished");
        }
        Err(err) => warn!(error = %err, "websocket client refused"),
    }
}

/// Read half of an axum WebSocket.
pub struct WsSource(pub SplitStream<WebSocket>);

/// Write half of an axum WebSocket.
pub struct WsSink(pub SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Option<Result<Frame, StreamError>> {
        let message = match self.0.next().await? {
            Ok(message) => message,
            Err(err) => return Some(Err(StreamError::Io(err.to_string()))),
        };
        Some(Ok(frame_from_message(message)))
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<(), StreamError> {
        self.0
            .send(message_from_frame(frame))
            .await
            .map_err(|err| StreamError::Io(err.to_string()))
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.0
            .close()
            .await
            .map_err(|err| StreamError::Io(err.to_string()))
    }
}

fn frame_from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Data(Bytes::from(text)),
        Message::Binary(data) => Frame::Data(data),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(frame) => Frame::Close(
            frame.map(|frame| CloseReason::new(frame.code, frame.reason.as_str())),
        ),
    }
}

/// Data goes out as text when it is valid UTF-8, as binary otherwise.
fn message_from_frame(frame: Frame) -> Message {
    match frame {
        Frame::Data(data) => match Utf8Bytes::try_from(data.clone()) {
            Ok(text) => Message::Text(text),
            Err(_) => Message::Binary(data),
        },
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close(reason) => Message::Close(reason.map(|reason| CloseFrame {
            code: reason.code,
            reason: reason.reason.into(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origins(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_allow_list_accepts_any_origin() {
        assert!(origin_allowed(&[], Some("https://anywhere.example")));
        assert!(origin_allowed(&[], None));
    }

    #[test]
    fn listed_origin_matches_case_insensitively() {
        let allowed = origins(&["https://chat.example"]);
        assert!(origin_allowed(&allowed, Some("https://chat.example")));
        assert!(origin_allowed(&allowed, Some("HTTPS://Chat.Example")));
        assert!(!origin_allowed(&allowed, Some("https://evil.example")));
    }

    #[test]
    fn wildcard_accepts_everything() {
        let allowed = origins(&["https://chat.example", "*"]);
        assert!(origin_allowed(&allowed, Some("https://other.example")));
    }

    #[test]
    fn missing_origin_is_accepted() {
        let allowed = origins(&["https://chat.example"]);
        assert!(origin_allowed(&allowed, None));
    }

    #[test]
    fn text_becomes_data() {
        let frame = frame_from_message(Message::Text("hi".into()));
        assert_eq!(frame, Frame::Data(Bytes::from_static(b"hi")));
    }

    #[test]
    fn close_frame_maps_code_and_reason() {
        let frame = frame_from_message(Message::Close(Some(CloseFrame {
            code: 1001,
            reason: "bye".into(),
        })));
        assert_eq!(frame, Frame::Close(Some(CloseReason::new(1001, "bye"))));
        assert_eq!(frame_from_message(Message::Close(None)), Frame::Close(None));
    }

    #[test]
    fn utf8_data_goes_out_as_text() {
        let message = message_from_frame(Frame::Data(Bytes::from_static(b"a\nb")));
        assert!(matches!(message, Message::Text(ref text) if text.as_str() == "a\nb"));
    }

    #[test]
    fn payload_buffer_is_not_copied() {
        let data = Bytes::from_static(b"shared payload");
        let Frame::Data(inbound) = frame_from_message(Message::Text("shared payload".into())) else {
            panic!("expected data frame");
        };
        assert_eq!(inbound, data);

        let message = message_from_frame(Frame::Data(data.clone()));
        let Message::Text(text) = message else {
            panic!("expected text message");
        };
        assert_eq!(Bytes::from(text).as_ptr(), data.as_ptr());
    }

    #[test]
    fn non_utf8_data_goes_out_as_binary() {
        let message = message_from_frame(Frame::Data(Bytes::from_static(&[0xff, 0xfe])));
        assert!(matches!(message, Message::Binary(ref data) if data[..] == [0xff, 0xfe]));
    }

    #[test]
    fn normal_close_goes_out_with_code() {
        let message = message_from_frame(Frame::Close(Some(CloseReason::normal())));
        assert!(matches!(message, Message::Close(Some(ref frame)) if frame.code == 1000));
    }
}
