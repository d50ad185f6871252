//! Session transport: the single persistent connection and its state
//! machine.
//!
//! ```text
//! Connector::connect(url) ─▶ FramedConnection { sink, stream }
//!                                 │                │
//!                   outbound Frame┘                └▶ inbound Frame / TransportError
//! ```

pub mod connection;
pub mod state;

#[cfg(test)]
pub mod memory;

pub use connection::{
    BoxFrameSink, BoxFrameStream, Connector, FramedConnection, TransportError, WebSocketConnector,
};
pub use state::{ConnectionState, TransportEvent};
