//! WebSocket subscription transport

use crate::config::EndpointConfig;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tessera_canvas::CanvasId;
use tessera_core::{ChannelConnector, ChannelError, ClientMessage, FrameChannel, ServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN, USER_AGENT};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// [`ChannelConnector`] opening one WebSocket per canvas
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoints: Arc<EndpointConfig>,
}

impl WsConnector {
    /// Create connector
    #[must_use]
    pub fn new(endpoints: Arc<EndpointConfig>) -> Self {
        Self { endpoints }
    }
}

#[async_trait::async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, canvas: CanvasId) -> Result<Box<dyn FrameChannel>, ChannelError> {
        let connect_err = |e: &dyn std::fmt::Display| ChannelError::Connect(e.to_string());

        let mut request = self
            .endpoints
            .websocket_url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_err(&e))?;
        let headers = request.headers_mut();
        headers.insert(
            ORIGIN,
            HeaderValue::from_str(&self.endpoints.origin).map_err(|e| connect_err(&e))?,
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.endpoints.user_agent).map_err(|e| connect_err(&e))?,
        );

        let (stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| connect_err(&e))?;
        tracing::debug!(%canvas, url = %self.endpoints.websocket_url, "websocket connected");
        Ok(Box::new(WsChannel { stream }))
    }
}

/// One open WebSocket; dropping it closes the connection
pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl FrameChannel for WsChannel {
    async fn send(&mut self, message: ClientMessage) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(message.encode()))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage, ChannelError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(ServerMessage::decode(&text)),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "websocket closed by server");
                    return None;
                }
                // Pings are answered by the stream itself
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(ChannelError::Transport(e.to_string()))),
            }
        }
    }
}
