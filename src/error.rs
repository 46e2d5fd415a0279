use thiserror::Error;

use crate::frame::Frame;

/// Errors returned by connection operations and the frame codec.
///
/// Every variant carries a stable message string; callers that need to
/// distinguish cases should match on the variant, not the text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Broker answered the CONNECT handshake with an ERROR frame. The
    /// broker's full response is preserved so the caller can inspect the
    /// `message` header and body.
    #[error("broker returned ERROR frame, CONNECT")]
    BrokerConnect(Frame),

    /// Header string contained invalid UTF-8 on the wire.
    #[error("header string not UTF8")]
    HeaderUtf8,

    /// A frame with an unrecognized command was received.
    #[error("unrecognized frame")]
    UnknownFrame,

    /// Frame framing was violated (missing terminator, bad content-length).
    #[error("malformed frame")]
    MalformedFrame,

    /// A header line could not be split into key and value.
    #[error("corrupt frame headers")]
    CorruptHeaders,

    /// A body was supplied on a command that does not allow one.
    #[error("body data not allowed")]
    BodyNotAllowed,

    /// Operation attempted without an established connection, or after the
    /// connection was torn down.
    #[error("no current connection")]
    NotConnected,

    #[error("destination required, SEND")]
    DestinationRequiredSend,
    #[error("destination required, SUBSCRIBE")]
    DestinationRequiredSubscribe,
    #[error("destination or id required, UNSUBSCRIBE")]
    DestinationOrIdRequiredUnsubscribe,
    #[error("id required, UNSUBSCRIBE")]
    IdRequiredUnsubscribe,

    #[error("message-id required, ACK")]
    MessageIdRequiredAck,
    #[error("subscription required, ACK")]
    SubscriptionRequiredAck,
    #[error("id required, ACK")]
    IdRequiredAck,

    #[error("message-id required, NACK")]
    MessageIdRequiredNack,
    #[error("subscription required, NACK")]
    SubscriptionRequiredNack,
    #[error("id required, NACK")]
    IdRequiredNack,

    #[error("transaction-id required, BEGIN")]
    TransactionRequiredBegin,
    #[error("transaction-id required, COMMIT")]
    TransactionRequiredCommit,
    #[error("transaction-id required, ABORT")]
    TransactionRequiredAbort,

    #[error("host required, CONNECT")]
    HostRequired,

    #[error("duplicate subscription-id")]
    DuplicateSubscriptionId,
    #[error("invalid subscription-id")]
    InvalidSubscriptionId,

    #[error("unsupported protocol version, client")]
    UnsupportedVersionClient,
    #[error("unsupported protocol version, server")]
    UnsupportedVersionServer,
    #[error("unsupported protocol version, NACK")]
    NackUnsupported,

    #[error("receipt not allowed on CONNECT")]
    ReceiptNotAllowed,

    /// Header key or value failed validation for the active protocol level
    /// (embedded NUL, or a raw LF/CR under STOMP 1.0).
    #[error("invalid header value")]
    InvalidHeaderValue,

    /// A read or write missed its configured deadline.
    #[error("deadline expired: {0}")]
    DeadlineExpired(String),

    /// I/O-level error. The message is preserved; the original
    /// `std::io::Error` is not, so this variant stays cloneable across the
    /// subscription sequences it is fanned out to.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
