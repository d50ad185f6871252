//! The persistent connection: a [`Connector`] seam and its WebSocket
//! implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::protocol::Frame;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Connection-level failure. Moves the session to `Errored`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),
}

// ---------------------------------------------------------------------------
// FramedConnection
// ---------------------------------------------------------------------------

pub type BoxFrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type BoxFrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An established connection split into its two halves. The stream ending
/// means the peer closed the connection.
pub struct FramedConnection {
    pub sink: BoxFrameSink,
    pub stream: BoxFrameStream,
}

/// Opens connections. A trait so sessions can be driven without a network.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<FramedConnection, TransportError>;
}

// ---------------------------------------------------------------------------
// WebSocketConnector
// ---------------------------------------------------------------------------

/// Connects with `tokio-tungstenite`. Text messages map to
/// [`Frame::Text`], binary messages to [`Frame::Binary`]; ping/pong are
/// answered by the library and never surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<FramedConnection, TransportError> {
        log::info!("session: connecting to {url}");
        let (socket, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        log::debug!("session: handshake complete ({})", response.status());

        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(into_message(frame))));

        let stream = read
            .take_while(|item| future::ready(!is_end_of_stream(item)))
            .filter_map(|item| future::ready(from_message(item)));

        Ok(FramedConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
    }
}

/// Close frames and "already closed" errors end the inbound stream cleanly.
fn is_end_of_stream(item: &Result<Message, WsError>) -> bool {
    matches!(
        item,
        Ok(Message::Close(_)) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed)
    )
}

fn from_message(item: Result<Message, WsError>) -> Option<Result<Frame, TransportError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
        Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes))),
        Ok(_) => None,
        Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
