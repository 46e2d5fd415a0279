//! Asynchronous STOMP 1.0/1.1/1.2 client core.
//!
//! The caller supplies an already-opened bidirectional byte stream (TCP,
//! TLS, or a message-framed transport wrapped in
//! [`transport::MessageStream`]); [`Connection::connect`] performs the
//! handshake and starts the session: a writer task, a reader task that
//! demultiplexes inbound frames onto per-subscription sequences, and the
//! negotiated heartbeat tasks.

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod headers;
pub mod heartbeat;
mod parser;
pub mod subscription;
pub mod transport;

pub use codec::{DFLT_CONTENT_TYPE, StompCodec, StompItem};
pub use connection::{ConnectConfig, Connection, ConnectionState, MetricsSnapshot};
pub use error::{Error, Result};
pub use frame::{Frame, MessageData, Protocol};
pub use headers::Headers;
pub use heartbeat::{negotiate_heartbeats, parse_heartbeat};
pub use subscription::Subscription;
pub use transport::{DeadlineConfig, MessageStream};
