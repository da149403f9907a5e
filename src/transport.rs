//! Connection abstraction and the WebSocket frame adapter
//!
//! Visitors only ever see a byte stream. Raw TCP sockets already are one;
//! [`FrameStream`] turns a WebSocket into one by mapping every inbound text
//! frame to a newline-terminated line and every outbound line to one text
//! frame.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Largest amount of unsent output buffered while the sink is busy
const MAX_BUFFERED_OUTPUT: usize = 64 * 1024;

/// Any duplex byte stream a visitor can own
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Byte-stream view of a message-framed transport
#[derive(Debug)]
pub struct FrameStream<S> {
    inner: S,
    /// Received but not yet consumed bytes
    backlog: Vec<u8>,
    /// Written bytes not yet sent as a frame; never holds a complete line
    /// once `poll_send_lines` has run successfully
    outbound: Vec<u8>,
    /// Error seen after some bytes were already handed out
    read_error: Option<io::Error>,
    eof: bool,
}

impl<S> FrameStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            backlog: Vec::new(),
            outbound: Vec::new(),
            read_error: None,
            eof: false,
        }
    }

    fn drain_backlog(&mut self, buf: &mut ReadBuf<'_>) -> usize {
        let n = self.backlog.len().min(buf.remaining());
        buf.put_slice(&self.backlog[..n]);
        self.backlog.drain(..n);
        n
    }
}

impl<S> FrameStream<S>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    /// Send every complete line in `outbound` as one text frame each.
    ///
    /// On failure the complete lines still buffered are discarded; only a
    /// trailing partial line survives.
    fn poll_send_lines(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while let Some(end) = self.outbound.iter().position(|b| *b == b'\n') {
            if let Err(e) = ready!(Pin::new(&mut self.inner).poll_ready(cx)) {
                self.discard_complete_lines();
                return Poll::Ready(Err(io::Error::other(e)));
            }

            let line: Vec<u8> = self.outbound.drain(..=end).collect();
            if line.len() == 1 {
                // bare newline
                continue;
            }

            let frame = Message::Text(String::from_utf8_lossy(&line).into_owned().into());
            if let Err(e) = Pin::new(&mut self.inner).start_send(frame) {
                self.discard_complete_lines();
                return Poll::Ready(Err(io::Error::other(e)));
            }
        }
        Poll::Ready(Ok(()))
    }

    fn discard_complete_lines(&mut self) {
        if let Some(last) = self.outbound.iter().rposition(|b| *b == b'\n') {
            self.outbound.drain(..=last);
        }
    }
}

impl<S> AsyncRead for FrameStream<S>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        let filled = this.drain_backlog(buf);
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if let Some(e) = this.read_error.take() {
            if filled > 0 {
                this.read_error = Some(e);
                return Poll::Ready(Ok(()));
            }
            return Poll::Ready(Err(e));
        }
        if this.eof {
            return Poll::Ready(Ok(()));
        }

        loop {
            let frame = match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Pending if filled > 0 => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
                Poll::Ready(frame) => frame,
            };

            let error = match frame {
                Some(Ok(Message::Text(text))) => {
                    this.backlog.extend_from_slice(text.as_bytes());
                    this.backlog.push(b'\n');
                    this.drain_backlog(buf);
                    return Poll::Ready(Ok(()));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    this.eof = true;
                    return Poll::Ready(Ok(()));
                }
                Some(Ok(_)) => io::Error::new(io::ErrorKind::InvalidData, "expected a text frame"),
                Some(Err(e)) => io::Error::other(e),
            };

            if filled > 0 {
                this.read_error = Some(error);
                return Poll::Ready(Ok(()));
            }
            return Poll::Ready(Err(error));
        }
    }
}

impl<S> AsyncWrite for FrameStream<S>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.outbound.len() >= MAX_BUFFERED_OUTPUT {
            ready!(this.poll_send_lines(cx))?;
            if this.outbound.len() >= MAX_BUFFERED_OUTPUT {
                // one enormous unterminated line; accept it, it goes out with its newline
                this.outbound.extend_from_slice(data);
                return Poll::Ready(Ok(data.len()));
            }
        }

        this.outbound.extend_from_slice(data);
        match this.poll_send_lines(cx) {
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            // lines left behind go out on the next write or flush
            Poll::Ready(Ok(())) | Poll::Pending => Poll::Ready(Ok(data.len())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_send_lines(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx).map_err(io::Error::other)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_send_lines(cx))?;
        Pin::new(&mut this.inner).poll_close(cx).map_err(io::Error::other)
    }
}
