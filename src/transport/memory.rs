//! In-memory [`Connector`] for driving sessions in tests.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::{SinkExt, StreamExt};

use crate::protocol::Frame;
use crate::transport::{Connector, FramedConnection, TransportError};

enum Behaviour {
    Accept(Option<FramedConnection>),
    Reject(TransportError),
    Hang,
}

/// Hands out one scripted connection.
pub struct MemoryConnector {
    behaviour: Mutex<Behaviour>,
    urls: Mutex<Vec<String>>,
}

/// The far end of a [`MemoryConnector`] connection.
pub struct RemotePeer {
    inbound: Option<UnboundedSender<Result<Frame, TransportError>>>,
    outbound: UnboundedReceiver<Frame>,
}

impl MemoryConnector {
    /// Accepts the first connect; the returned peer plays the server.
    pub fn pair() -> (Self, RemotePeer) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded();
        let (outbound_tx, outbound_rx) = mpsc::unbounded::<Frame>();
        let connection = FramedConnection {
            sink: Box::pin(outbound_tx.sink_map_err(|e| TransportError::Send(e.to_string()))),
            stream: Box::pin(inbound_rx),
        };
        (
            Self::with(Behaviour::Accept(Some(connection))),
            RemotePeer {
                inbound: Some(inbound_tx),
                outbound: outbound_rx,
            },
        )
    }

    /// Accepts the first connect with an inbound side that yields `frame`
    /// forever. The stream is a self-refilling tokio channel: always ready,
    /// but it spends the task's cooperative budget as a socket read does.
    /// The peer only observes what the client sends.
    pub fn flooding(frame: Frame) -> (Self, RemotePeer) {
        let (flood_tx, mut flood_rx) = tokio::sync::mpsc::unbounded_channel::<Frame>();
        let _ = flood_tx.send(frame);
        let flood = futures::stream::poll_fn(move |cx| {
            flood_rx.poll_recv(cx).map(|next| {
                next.map(|frame| {
                    let _ = flood_tx.send(frame.clone());
                    Ok(frame)
                })
            })
        });

        let (outbound_tx, outbound_rx) = mpsc::unbounded::<Frame>();
        let connection = FramedConnection {
            sink: Box::pin(outbound_tx.sink_map_err(|e| TransportError::Send(e.to_string()))),
            stream: Box::pin(flood),
        };
        (
            Self::with(Behaviour::Accept(Some(connection))),
            RemotePeer {
                inbound: None,
                outbound: outbound_rx,
            },
        )
    }

    pub fn rejecting(reason: &str) -> Self {
        Self::with(Behaviour::Reject(TransportError::Connect(reason.into())))
    }

    /// The handshake never completes.
    pub fn hanging() -> Self {
        Self::with(Behaviour::Hang)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour: Mutex::new(behaviour),
            urls: Mutex::default(),
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<FramedConnection, TransportError> {
        self.urls.lock().unwrap().push(url.to_string());
        let outcome = match &mut *self.behaviour.lock().unwrap() {
            Behaviour::Accept(connection) => Some(
                connection
                    .take()
                    .ok_or_else(|| TransportError::Connect("already connected".into())),
            ),
            Behaviour::Reject(e) => Some(Err(e.clone())),
            Behaviour::Hang => None,
        };
        match outcome {
            Some(result) => result,
            None => futures::future::pending().await,
        }
    }
}

impl RemotePeer {
    pub fn send(&self, frame: Frame) {
        if let Some(tx) = &self.inbound {
            let _ = tx.unbounded_send(Ok(frame));
        }
    }

    pub fn send_text(&self, text: &str) {
        self.send(Frame::Text(text.to_string()));
    }

    /// Simulate a network failure on the receive side.
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = &self.inbound {
            let _ = tx.unbounded_send(Err(TransportError::Receive(reason.into())));
        }
    }

    /// Graceful close from the server side.
    pub fn close(&mut self) {
        self.inbound.take();
    }

    /// Next frame the client sent, or `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.outbound.next().await
    }
}
