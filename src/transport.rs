//! Transport adaptation.
//!
//! The connection core runs over any `AsyncRead + AsyncWrite` byte stream;
//! `Framed` supplies the buffering on both sides. Message-framed transports
//! (WebSocket text frames) are adapted by [`MessageStream`], which presents
//! the same byte-stream face so a single serializer covers both cases.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Error;

/// Callback invoked when a read or write misses its deadline. Receives the
/// error and a flag telling whether the failure was a timeout.
pub type DeadlineNotify = Arc<dyn Fn(&Error, bool) + Send + Sync>;

/// Per-operation deadline policy for the reader and writer tasks.
///
/// A write deadline bounds the serialization of one outbound frame; a read
/// deadline bounds the wait for the next inbound item. Expiry invokes the
/// registered callback and surfaces [`Error::DeadlineExpired`] on the
/// operation, which is not by itself terminal for the writer.
#[derive(Clone, Default)]
pub struct DeadlineConfig {
    pub write: Option<Duration>,
    pub read: Option<Duration>,
    notify: Option<DeadlineNotify>,
}

impl DeadlineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write(mut self, deadline: Duration) -> Self {
        self.write = Some(deadline);
        self
    }

    pub fn with_read(mut self, deadline: Duration) -> Self {
        self.read = Some(deadline);
        self
    }

    /// Register the expiry callback.
    pub fn on_expiry(mut self, notify: impl Fn(&Error, bool) + Send + Sync + 'static) -> Self {
        self.notify = Some(Arc::new(notify));
        self
    }

    pub(crate) fn notify(&self, error: &Error, was_timeout: bool) {
        if let Some(cb) = &self.notify {
            cb(error, was_timeout);
        }
    }
}

impl fmt::Debug for DeadlineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineConfig")
            .field("write", &self.write)
            .field("read", &self.read)
            .field("notify", &self.notify.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Byte-stream adapter over a message-framed transport.
///
/// Writes buffer until flush, and every flush closes exactly one outbound
/// message; since the connection flushes once per serialized frame, each
/// STOMP frame becomes one message (NUL terminator included, for protocol
/// fidelity). Reads drain one inbound message at a time into the decoder.
///
/// `T` is anything that moves whole messages: for a WebSocket this is the
/// socket with its messages mapped to/from `Bytes`.
pub struct MessageStream<T> {
    inner: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<T> MessageStream<T>
where
    T: Sink<Bytes, Error = io::Error> + Stream<Item = io::Result<Bytes>> + Unpin,
{
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
        }
    }

    /// Consume the adapter and return the underlying message transport.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> AsyncRead for MessageStream<T>
where
    T: Sink<Bytes, Error = io::Error> + Stream<Item = io::Result<Bytes>> + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.read_buf.is_empty() {
                let n = buf.remaining().min(this.read_buf.len());
                buf.put_slice(&this.read_buf.split_to(n));
                return Poll::Ready(Ok(()));
            }
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(msg)) => this.read_buf.extend_from_slice(&msg),
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl<T> AsyncWrite for MessageStream<T>
where
    T: Sink<Bytes, Error = io::Error> + Stream<Item = io::Result<Bytes>> + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().write_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.write_buf.is_empty() {
            ready!(Pin::new(&mut this.inner).poll_ready(cx))?;
            let msg = this.write_buf.split().freeze();
            Pin::new(&mut this.inner).start_send(msg)?;
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.as_mut().poll_flush(cx))?;
        Pin::new(&mut self.get_mut().inner).poll_close(cx)
    }
}
