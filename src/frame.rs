use std::fmt;

use crate::error::Error;
use crate::headers::Headers;

// Client generated commands.
pub const CONNECT: &str = "CONNECT";
pub const STOMP: &str = "STOMP";
pub const DISCONNECT: &str = "DISCONNECT";
pub const SEND: &str = "SEND";
pub const SUBSCRIBE: &str = "SUBSCRIBE";
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
pub const ACK: &str = "ACK";
pub const NACK: &str = "NACK";
pub const BEGIN: &str = "BEGIN";
pub const COMMIT: &str = "COMMIT";
pub const ABORT: &str = "ABORT";

// Server generated commands.
pub const CONNECTED: &str = "CONNECTED";
pub const MESSAGE: &str = "MESSAGE";
pub const RECEIPT: &str = "RECEIPT";
pub const ERROR: &str = "ERROR";

/// Synthetic command for the heartbeat frame: a bare LF on the wire.
pub const HEARTBEAT: &str = "\n";

pub(crate) fn is_client_command(cmd: &str) -> bool {
    matches!(
        cmd,
        CONNECT
            | STOMP
            | DISCONNECT
            | SEND
            | SUBSCRIBE
            | UNSUBSCRIBE
            | ACK
            | NACK
            | BEGIN
            | COMMIT
            | ABORT
    )
}

pub(crate) fn is_server_command(cmd: &str) -> bool {
    matches!(cmd, CONNECTED | MESSAGE | RECEIPT | ERROR)
}

/// Commands that may carry a non-empty body.
pub(crate) fn allows_body(cmd: &str) -> bool {
    matches!(cmd, SEND | MESSAGE | ERROR)
}

/// STOMP protocol levels supported by this client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Protocol {
    #[default]
    V10,
    V11,
    V12,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::V10 => "1.0",
            Protocol::V11 => "1.1",
            Protocol::V12 => "1.2",
        }
    }

    /// Parse a `version` / `accept-version` element. Returns `None` for
    /// anything outside the supported set.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1.0" => Some(Protocol::V10),
            "1.1" => Some(Protocol::V11),
            "1.2" => Some(Protocol::V12),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP frame: command, ordered headers, raw body bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Add a header (builder style).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(key, value);
        self
    }

    /// Replace the headers wholesale (builder style).
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the frame body (builder style).
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Request a broker receipt for this frame (builder style).
    pub fn receipt(self, id: impl Into<String>) -> Self {
        self.header(crate::headers::HDR_RECEIPT, id)
    }

    /// Value of the first header matching `key`.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.value(key)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command == HEARTBEAT
    }

    /// Wire size of this frame in bytes: command line, header lines, blank
    /// separator, body and the NUL terminator. Used by the byte counters.
    pub fn size(&self) -> usize {
        if self.is_heartbeat() {
            return 1;
        }
        let mut n = self.command.len() + 1;
        for (k, v) in &self.headers {
            n += k.len() + 1 + v.len() + 1;
        }
        n + 1 + self.body.len() + 1
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}

/// An inbound frame paired with an optional error, as delivered to
/// subscription sequences and the connection event sequence.
///
/// A populated `error` is terminal for the sequence it arrives on. This is
/// orthogonal to the frame's own command being `ERROR`: a broker ERROR frame
/// arrives as a `MessageData` with `error: None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageData {
    pub message: Frame,
    pub error: Option<Error>,
}

impl MessageData {
    pub(crate) fn frame(message: Frame) -> Self {
        Self {
            message,
            error: None,
        }
    }

    pub(crate) fn error(error: Error) -> Self {
        Self {
            message: Frame::default(),
            error: Some(error),
        }
    }

    pub(crate) fn with_error(message: Frame, error: Error) -> Self {
        Self {
            message,
            error: Some(error),
        }
    }
}
