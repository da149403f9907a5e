//! Visitor actor
//!
//! One per connection. The connection is split in two halves driven by two
//! tasks:
//! - the reader parses lines, applies commands and forwards chat text to the
//!   current room;
//! - the writer drains the visitor's mailbox onto the connection.
//!
//! A supervisor task waits for both, then asks the directory to destroy the
//! visitor. Three cancellation tokens carry the close signals between them.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Limits;
use crate::error::ChatError;
use crate::gate::{self, PendingTransition};
use crate::message::{decode_line, format_line, Command, SERVER_SENDER};
use crate::room::{Broadcast, Placement};
use crate::server::{ServerHandle, Transition};
use crate::transport::Connection;
use crate::types::{RoomId, VisitorId};

/// Address of a visitor's mailbox, held by the directory and by rooms
#[derive(Debug, Clone)]
pub struct VisitorHandle {
    pub id: VisitorId,
    mailbox: mpsc::Sender<String>,
}

impl VisitorHandle {
    pub fn new(id: VisitorId, mailbox: mpsc::Sender<String>) -> Self {
        Self { id, mailbox }
    }

    /// Queue a formatted line, waiting for room in the mailbox
    pub async fn notify(&self, line: String) {
        if self.mailbox.send(line).await.is_err() {
            debug!("Mailbox of {} closed", self.id);
        }
    }

    /// Queue a formatted line only if the mailbox has room right now
    pub fn offer(&self, line: String) -> bool {
        self.mailbox.try_send(line).is_ok()
    }
}

/// The three one-shot close signals of a visitor.
///
/// Cancelling a token twice is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CloseSignals {
    pub read_closed: CancellationToken,
    pub write_closed: CancellationToken,
    pub closed: CancellationToken,
}

/// A freshly accepted visitor, not yet running
pub struct Visitor {
    handle: VisitorHandle,
    peer: String,
    conn: Box<dyn Connection>,
    mailbox: mpsc::Receiver<String>,
    name: watch::Receiver<String>,
    server: ServerHandle,
    limits: Arc<Limits>,
}

impl Visitor {
    pub fn new(
        conn: Box<dyn Connection>,
        peer: String,
        name: watch::Receiver<String>,
        server: ServerHandle,
        limits: Arc<Limits>,
    ) -> Self {
        let (tx, mailbox) = mpsc::channel(limits.visitor_mailbox_capacity);
        Self {
            handle: VisitorHandle::new(VisitorId::new(), tx),
            peer,
            conn,
            mailbox,
            name,
            server,
            limits,
        }
    }

    pub fn handle(&self) -> &VisitorHandle {
        &self.handle
    }

    /// Start the reader, writer and supervisor tasks.
    ///
    /// `pending` is the gate of the initial lobby transition; the reader
    /// consumes nothing until it fires.
    pub fn spawn(self, pending: PendingTransition) -> JoinHandle<()> {
        let signals = CloseSignals::default();
        let (read_half, write_half) = tokio::io::split(self.conn);

        let reader = Reader {
            handle: self.handle.clone(),
            input: BufReader::new(read_half),
            name: self.name,
            server: self.server.clone(),
            limits: self.limits.clone(),
            signals: signals.clone(),
            pending: Some(pending),
            placement: None,
            in_long_message: false,
        };

        let writer = Writer {
            id: self.handle.id,
            output: BufWriter::new(write_half),
            mailbox: self.mailbox,
            signals: signals.clone(),
            write_timeout: self.limits.write_timeout(),
        };

        debug!("Visitor {} running for {}", self.handle.id, self.peer);
        tokio::spawn(supervise(reader, writer, signals, self.server, self.handle))
    }
}

/// Wait for both roles, then hand the visitor to the directory for removal
async fn supervise(
    reader: Reader,
    writer: Writer,
    signals: CloseSignals,
    server: ServerHandle,
    handle: VisitorHandle,
) {
    let id = handle.id;
    let reader_task = tokio::spawn(reader.run());
    let writer_task = tokio::spawn(writer.run());

    let placement = match reader_task.await {
        Ok(placement) => placement,
        Err(e) => {
            warn!("Reader of {} failed: {}", id, e);
            None
        }
    };
    signals.read_closed.cancel();

    if let Err(e) = writer_task.await {
        warn!("Writer of {} failed: {}", id, e);
    }
    signals.write_closed.cancel();

    signals.closed.cancel();
    info!("Visitor {} closed", id);

    let (gate, pending) = gate::arm();
    let transition = Transition {
        visitor: handle,
        placement,
        target: RoomId::void(),
        gate,
    };
    if server.change_room(transition).await.is_err() {
        warn!("Server closed before visitor {} was destroyed", id);
        return;
    }
    pending.wait().await;
}

struct Reader {
    handle: VisitorHandle,
    input: BufReader<ReadHalf<Box<dyn Connection>>>,
    name: watch::Receiver<String>,
    server: ServerHandle,
    limits: Arc<Limits>,
    signals: CloseSignals,
    pending: Option<PendingTransition>,
    placement: Option<Placement>,
    in_long_message: bool,
}

impl Reader {
    /// Read until end of stream, error, `/exit` or the writer closing.
    ///
    /// Returns where the visitor ended up so the supervisor can take it
    /// out of that room.
    async fn run(mut self) -> Option<Placement> {
        let window = self.limits.read_window();

        loop {
            self.settle().await;

            if self.signals.write_closed.is_cancelled() || self.signals.closed.is_cancelled() {
                break;
            }

            let mut raw = Vec::new();
            let read = {
                let mut limited = (&mut self.input).take(window);
                tokio::select! {
                    read = limited.read_until(b'\n', &mut raw) => read,
                    _ = self.signals.write_closed.cancelled() => break,
                    _ = self.signals.closed.cancelled() => break,
                }
            };

            let n = match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("Read from {} failed: {}", self.handle.id, e);
                    break;
                }
            };

            let terminated = raw.last() == Some(&b'\n');
            let line = decode_line(&raw);
            let window_full = !terminated && n as u64 >= window;

            if window_full || line.chars().count() > self.limits.max_message_length {
                if !self.in_long_message {
                    self.handle.notify(notice("your message is too long!")).await;
                }
                self.in_long_message = !terminated;
                continue;
            }
            if self.in_long_message {
                // tail of an over-long line
                self.in_long_message = false;
                continue;
            }

            match self.dispatch(line).await {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break,
                Err(e) => {
                    debug!("Visitor {} stopping: {}", self.handle.id, e);
                    break;
                }
            }
        }

        self.signals.read_closed.cancel();
        self.settle().await;
        self.placement
    }

    /// Block until an outstanding room transition completes
    async fn settle(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.placement = pending.wait().await;
        }
    }

    async fn dispatch(&mut self, line: String) -> Result<ControlFlow<()>, ChatError> {
        match Command::parse(&line) {
            Command::Exit => return Ok(ControlFlow::Break(())),
            Command::Room(None) => {
                let room = self
                    .placement
                    .as_ref()
                    .map(|p| p.room.name().to_string())
                    .unwrap_or_else(|| self.limits.lobby().to_string());
                self.handle.notify(notice(&format!("you are in {} now", room))).await;
            }
            Command::Room(Some(raw)) => {
                let target = RoomId::parse(&raw);
                if target.is_void() {
                    self.handle.notify(notice("invalid room name")).await;
                } else {
                    self.begin_transition(target).await?;
                }
            }
            Command::Name(None) => {
                let name = self.name.borrow().clone();
                self.handle.notify(notice(&format!("your name is {}", name))).await;
            }
            Command::Name(Some(candidate)) => {
                let length = candidate.chars().count();
                if length < self.limits.min_name_length || length > self.limits.max_name_length {
                    let text = format!(
                        "name must be {} to {} characters long",
                        self.limits.min_name_length, self.limits.max_name_length
                    );
                    self.handle.notify(notice(&text)).await;
                } else {
                    self.server.change_name(self.handle.id, candidate).await?;
                }
            }
            Command::Unknown(word) => {
                debug!("Visitor {} sent unknown command {}", self.handle.id, word);
            }
            Command::Chat(text) => match &self.placement {
                Some(placement) if placement.room.is_lobby() => {
                    self.handle
                        .notify(notice(
                            "you are current in lobby, please input /room room_name to enter a room",
                        ))
                        .await;
                }
                Some(placement) => {
                    let broadcast = Broadcast {
                        from: placement.key,
                        sender: self.name.borrow().clone(),
                        text,
                    };
                    placement.room.broadcast(broadcast).await?;
                }
                None => {}
            },
        }

        Ok(ControlFlow::Continue(()))
    }

    /// Ask the directory to move this visitor; the reader stays parked on
    /// the new gate until the move completes.
    async fn begin_transition(&mut self, target: RoomId) -> Result<(), ChatError> {
        let (gate, pending) = gate::arm();
        self.pending = Some(pending);

        let transition = Transition {
            visitor: self.handle.clone(),
            placement: self.placement.take(),
            target,
            gate,
        };
        self.server.change_room(transition).await
    }
}

fn notice(text: &str) -> String {
    format_line(SERVER_SENDER, text)
}

struct Writer {
    id: VisitorId,
    output: BufWriter<WriteHalf<Box<dyn Connection>>>,
    mailbox: mpsc::Receiver<String>,
    signals: CloseSignals,
    write_timeout: Duration,
}

impl Writer {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.signals.read_closed.cancelled() => {
                    // deliver what is already queued, e.g. replies before `/exit`
                    if let Err(e) = self.deliver(None).await {
                        debug!("Final write to {} failed: {}", self.id, e);
                    }
                    break;
                }
                _ = self.signals.closed.cancelled() => break,
                message = self.mailbox.recv() => {
                    let Some(message) = message else { break };
                    if let Err(e) = self.deliver(Some(message)).await {
                        debug!("Write to {} failed: {}", self.id, e);
                        break;
                    }
                }
            }
        }

        if timeout(self.write_timeout, self.output.shutdown()).await.is_err() {
            debug!("Shutdown of {} timed out", self.id);
        }
        self.signals.write_closed.cancel();
    }

    /// Write `first` plus whatever else is already queued, then flush once
    async fn deliver(&mut self, first: Option<String>) -> std::io::Result<()> {
        let output = &mut self.output;
        let mailbox = &mut self.mailbox;

        let write = async move {
            if let Some(line) = first {
                output.write_all(line.as_bytes()).await?;
            }
            while let Ok(line) = mailbox.try_recv() {
                output.write_all(line.as_bytes()).await?;
            }
            output.flush().await
        };

        timeout(self.write_timeout, write).await.map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write deadline exceeded")
        })?
    }
}
