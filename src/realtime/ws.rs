// kyc-realtime-kit/src/realtime/ws.rs

//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Text frames carry JSON envelopes `{ "event": <name>, "data": <payload> }`.
//! The reason text of a close frame is parsed as a [`DisconnectReason`]; an
//! empty reason counts as `io server disconnect`.

use crate::auth::bearer;
use crate::realtime::{
    transport::{Connector, Frame, Session, TransportError},
    types::{DisconnectReason, EventEnvelope},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Error as WsError, Message, Utf8Bytes,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket sessions authenticated with an `Authorization: Bearer`
/// header.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    #[instrument(skip(self, token))]
    async fn open(&self, url: &str, token: &str) -> Result<Box<dyn Session>, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid realtime url: {e}")))?;
        let header = HeaderValue::from_str(&bearer(token))
            .map_err(|e| TransportError::Connect(format!("token is not a valid header value: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        match connect_async(request).await {
            Ok((stream, _response)) => {
                info!("WebSocket handshake complete.");
                Ok(Box::new(WsSession { stream }))
            }
            Err(WsError::Http(response)) => {
                let status = response.status().as_u16();
                if status == 401 || status == 403 {
                    Err(TransportError::Unauthorized(format!("HTTP {status}")))
                } else {
                    Err(TransportError::Connect(format!("WebSocket HTTP error {status}")))
                }
            }
            Err(e) => Err(TransportError::Connect(e.to_string())),
        }
    }
}

struct WsSession {
    stream: WsStream,
}

#[async_trait]
impl Session for WsSession {
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str::<EventEnvelope>(text.as_str()) {
                    Ok(envelope) => return Some(Frame::Event(envelope)),
                    Err(e) => {
                        warn!("Ignoring malformed event frame: {}", e);
                    }
                },
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| parse_reason(f.reason.as_str()))
                        .unwrap_or(DisconnectReason::IoServerDisconnect);
                    debug!(%reason, "Received close frame from server.");
                    return Some(Frame::Disconnect(reason));
                }
                Ok(_) => {
                    // Ping/pong are answered by tungstenite; binary frames are not part of the protocol.
                }
                Err(e) => {
                    warn!("WebSocket read failed: {}", e);
                    return Some(Frame::Disconnect(DisconnectReason::TransportError));
                }
            }
        }
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Utf8Bytes::from_static("io client disconnect"),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!("WebSocket close handshake failed: {}", e);
        }
    }
}

fn parse_reason(reason: &str) -> DisconnectReason {
    match reason.parse() {
        Ok(reason) => reason,
        Err(never) => match never {},
    }
}
