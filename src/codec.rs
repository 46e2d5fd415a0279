use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;
use crate::frame::{self, Frame, Protocol};
use crate::headers::{self, Headers};
use crate::parser::parse_frame;

/// Content type inserted by the serializer when the caller neither supplies
/// nor suppresses one.
pub const DFLT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// Items crossing the codec: a full frame, or a single-LF heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    Frame(Frame),
    Heartbeat,
}

/// `tokio_util` codec for the STOMP wire protocol.
///
/// One instance serializes and deserializes all traffic for a connection.
/// The protocol level is `1.0` until the CONNECT handshake negotiates a
/// higher one; header escaping is only active for 1.1+ and never applies to
/// the handshake frames (`CONNECT`, `STOMP`, `CONNECTED`), whose header
/// values travel literally.
#[derive(Debug, Default)]
pub struct StompCodec {
    protocol: Protocol,
}

impl StompCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protocol(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Switch the protocol level after version negotiation.
    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.protocol = protocol;
    }

    fn escaping_active(&self, command: &str) -> bool {
        self.protocol >= Protocol::V11
            && !matches!(command, frame::CONNECT | frame::STOMP | frame::CONNECTED)
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // A bare LF between frames is a heartbeat. Consumed one at a time so
        // the reader can stamp its receive clock per pulse.
        if let Some(&b'\n') = src.chunk().first() {
            src.advance(1);
            return Ok(Some(StompItem::Heartbeat));
        }

        let raw = match parse_frame(src.chunk())? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        src.advance(raw.consumed);

        let command = String::from_utf8(raw.command).map_err(|_| Error::MalformedFrame)?;
        if !frame::is_server_command(&command) && !frame::is_client_command(&command) {
            return Err(Error::UnknownFrame);
        }

        let unescape_active = self.escaping_active(&command);
        let mut hdrs = Headers::with_capacity(raw.headers.len());
        for (k, v) in raw.headers {
            let (k, v) = if unescape_active {
                (headers::unescape(&k)?, headers::unescape(&v)?)
            } else {
                (k, v)
            };
            let k = String::from_utf8(k).map_err(|_| Error::HeaderUtf8)?;
            let v = String::from_utf8(v).map_err(|_| Error::HeaderUtf8)?;
            hdrs.push(k, v);
        }

        Ok(Some(StompItem::Frame(Frame {
            command,
            headers: hdrs,
            body: raw.body,
        })))
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = Error;

    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            StompItem::Frame(f) if f.is_heartbeat() => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            StompItem::Frame(f) => f,
        };

        if !frame.body.is_empty() && !frame::allows_body(&frame.command) {
            return Err(Error::BodyNotAllowed);
        }

        let mut hdrs = frame.headers;
        let suppress_ct = hdrs.remove_all(headers::HDR_SUPPRESS_CT);
        let suppress_cl = hdrs.remove_all(headers::HDR_SUPPRESS_CL);

        // Every frame gets the default content headers unless the caller
        // supplied or suppressed them.
        if !suppress_ct && !hdrs.contains(headers::HDR_CONTENT_TYPE) {
            hdrs.push(headers::HDR_CONTENT_TYPE, DFLT_CONTENT_TYPE);
        }
        if !suppress_cl && !hdrs.contains(headers::HDR_CONTENT_LENGTH) {
            hdrs.push(headers::HDR_CONTENT_LENGTH, frame.body.len().to_string());
        }

        // Without a content-length the NUL framing byte must be the body's
        // only terminator, so an embedded NUL truncates the body.
        let body: &[u8] = if suppress_cl {
            match frame.body.iter().position(|&b| b == 0) {
                Some(nul) => &frame.body[..nul],
                None => &frame.body,
            }
        } else {
            &frame.body
        };

        let escape_active = self.escaping_active(&frame.command);

        dst.extend_from_slice(frame.command.as_bytes());
        dst.put_u8(b'\n');
        for (k, v) in &hdrs {
            if escape_active {
                dst.extend_from_slice(headers::escape(k).as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(headers::escape(v).as_bytes());
            } else {
                dst.extend_from_slice(k.as_bytes());
                dst.put_u8(b':');
                dst.extend_from_slice(v.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        dst.put_u8(b'\n');
        dst.extend_from_slice(body);
        dst.put_u8(0);

        Ok(())
    }
}
