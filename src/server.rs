//! ChatServer actor implementation
//!
//! The directory of the chat: the only task that reads or writes the
//! name → visitor and id → room registries. Everything reaches it through
//! bounded queues behind [`ServerHandle`]:
//! - new connections,
//! - room transition requests,
//! - name change requests,
//! - statistics queries.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::Limits;
use crate::error::ChatError;
use crate::gate::{self, TransitionGate};
use crate::message::{format_line, SERVER_SENDER};
use crate::room::{Placement, Room, RoomHandle};
use crate::transport::Connection;
use crate::types::{normalize_name, registry_key, RoomId, VisitorId};
use crate::visitor::{Visitor, VisitorHandle};

/// A connection waiting to become a visitor
pub struct PendingConnection {
    pub conn: Box<dyn Connection>,
    pub peer: String,
}

/// Request to move a visitor from where it is to `target`.
///
/// Travels directory → room (leave) → directory → room (enter) until the
/// visitor has left its old room and entered the new one, then `gate` fires.
#[derive(Debug)]
pub struct Transition {
    pub visitor: VisitorHandle,
    /// The visitor's room, `None` once it has left
    pub placement: Option<Placement>,
    /// Destination; the void id destroys the visitor
    pub target: RoomId,
    pub gate: TransitionGate,
}

/// Request to rename a visitor
#[derive(Debug)]
pub struct NameChange {
    pub visitor: VisitorId,
    pub candidate: String,
}

/// Snapshot of the registries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    pub visitors: usize,
    pub rooms: usize,
    /// Registered display names, sorted
    pub names: Vec<String>,
}

/// Cloneable address of the directory
#[derive(Clone)]
pub struct ServerHandle {
    connections: mpsc::Sender<PendingConnection>,
    room_changes: mpsc::Sender<Transition>,
    name_changes: mpsc::Sender<NameChange>,
    stats: mpsc::Sender<oneshot::Sender<ServerStats>>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle").finish_non_exhaustive()
    }
}

/// Receiving ends of the directory queues
pub struct ServerQueues {
    pub(crate) connections: mpsc::Receiver<PendingConnection>,
    pub(crate) room_changes: mpsc::Receiver<Transition>,
    pub(crate) name_changes: mpsc::Receiver<NameChange>,
    pub(crate) stats: mpsc::Receiver<oneshot::Sender<ServerStats>>,
}

impl ServerHandle {
    /// Create the directory queues, bounded per `limits`
    pub fn channel(limits: &Limits) -> (ServerHandle, ServerQueues) {
        let (connections_tx, connections_rx) = mpsc::channel(limits.pending_connection_capacity);
        let (room_changes_tx, room_changes_rx) = mpsc::channel(limits.room_change_capacity);
        let (name_changes_tx, name_changes_rx) = mpsc::channel(limits.name_change_capacity);
        let (stats_tx, stats_rx) = mpsc::channel(1);

        let handle = ServerHandle {
            connections: connections_tx,
            room_changes: room_changes_tx,
            name_changes: name_changes_tx,
            stats: stats_tx,
        };
        let queues = ServerQueues {
            connections: connections_rx,
            room_changes: room_changes_rx,
            name_changes: name_changes_rx,
            stats: stats_rx,
        };
        (handle, queues)
    }

    /// Hand a freshly accepted connection to the directory
    pub async fn on_new_connection(
        &self,
        conn: Box<dyn Connection>,
        peer: String,
    ) -> Result<(), ChatError> {
        self.connections
            .send(PendingConnection { conn, peer })
            .await
            .map_err(|_| ChatError::ServerClosed)
    }

    pub async fn change_room(&self, transition: Transition) -> Result<(), ChatError> {
        self.room_changes
            .send(transition)
            .await
            .map_err(|_| ChatError::ServerClosed)
    }

    pub async fn change_name(&self, visitor: VisitorId, candidate: String) -> Result<(), ChatError> {
        self.name_changes
            .send(NameChange { visitor, candidate })
            .await
            .map_err(|_| ChatError::ServerClosed)
    }

    pub async fn stats(&self) -> Result<ServerStats, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.stats.send(tx).await.map_err(|_| ChatError::ServerClosed)?;
        rx.await.map_err(|_| ChatError::ServerClosed)
    }
}

/// Directory bookkeeping for one visitor
struct VisitorEntry {
    handle: VisitorHandle,
    name: String,
    /// Publishes the display name to the visitor's reader
    name_tx: watch::Sender<String>,
}

/// The directory actor
pub struct ChatServer {
    /// All connected visitors: VisitorId -> entry
    visitors: HashMap<VisitorId, VisitorEntry>,
    /// Lowercased display name -> VisitorId
    names: HashMap<String, VisitorId>,
    /// Lowercased room id -> Room
    rooms: HashMap<String, RoomHandle>,
    limits: Arc<Limits>,
    /// Given to rooms and visitors so they can reach us
    handle: ServerHandle,
    queues: ServerQueues,
}

impl ChatServer {
    /// Create a ChatServer and the handle used to reach it
    pub fn new(limits: Limits) -> (Self, ServerHandle) {
        let (handle, queues) = ServerHandle::channel(&limits);
        let server = Self {
            visitors: HashMap::new(),
            names: HashMap::new(),
            rooms: HashMap::new(),
            limits: Arc::new(limits),
            handle: handle.clone(),
            queues,
        };
        (server, handle)
    }

    /// Run the ChatServer event loop
    ///
    /// The server keeps a handle to itself, so the loop runs for the life
    /// of the process.
    pub async fn run(mut self) {
        info!("ChatServer started");

        let lobby = self.limits.lobby();
        self.room_for(&lobby);

        loop {
            tokio::select! {
                Some(pending) = self.queues.connections.recv() => {
                    self.handle_new_connection(pending).await;
                }
                Some(request) = self.queues.name_changes.recv() => {
                    self.handle_change_name(request).await;
                }
                Some(transition) = self.queues.room_changes.recv() => {
                    self.handle_change_room(transition).await;
                }
                Some(reply) = self.queues.stats.recv() => {
                    let _ = reply.send(self.stats());
                }
                else => break,
            }
        }

        info!("ChatServer shutting down");
    }

    /// Draw `visitor_<n>` names until one is free
    fn random_visitor_name(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let name = format!("visitor_{}", rng.gen_range(10_000..10_000_000));
            if !self.names.contains_key(&registry_key(&name)) {
                return name;
            }
        }
    }

    /// Look a room up, creating and starting it on first reference
    fn room_for(&mut self, id: &RoomId) -> RoomHandle {
        if let Some(room) = self.rooms.get(&id.key()) {
            return room.clone();
        }

        let lobby = id.key() == self.limits.lobby().key();
        let room = Room::spawn(id.clone(), lobby, &self.limits, self.handle.clone());
        self.rooms.insert(id.key(), room.clone());
        debug!("Total rooms: {}", self.rooms.len());
        room
    }

    async fn handle_new_connection(&mut self, pending: PendingConnection) {
        let name = self.random_visitor_name();
        let (name_tx, name_rx) = watch::channel(name.clone());

        let visitor = Visitor::new(
            pending.conn,
            pending.peer.clone(),
            name_rx,
            self.handle.clone(),
            self.limits.clone(),
        );
        let handle = visitor.handle().clone();

        self.names.insert(registry_key(&name), handle.id);
        self.visitors.insert(
            handle.id,
            VisitorEntry {
                handle: handle.clone(),
                name: name.clone(),
                name_tx,
            },
        );
        info!("New visitor {} ({}) from {}", name, handle.id, pending.peer);

        handle
            .notify(format_line(
                SERVER_SENDER,
                &format!(
                    "your name: {}. You can input /name new_name to change your name.",
                    name
                ),
            ))
            .await;

        let (gate, pending_transition) = gate::arm();
        visitor.spawn(pending_transition);

        let lobby = self.limits.lobby();
        self.enter_room(Transition {
            visitor: handle,
            placement: None,
            target: lobby,
            gate,
        })
        .await;

        debug!("Total visitors: {}", self.visitors.len());
    }

    async fn handle_change_name(&mut self, request: NameChange) {
        let Some(entry) = self.visitors.get(&request.visitor) else {
            return;
        };
        let handle = entry.handle.clone();
        let current = entry.name.clone();

        let truncated: String = request
            .candidate
            .chars()
            .take(self.limits.max_name_length)
            .collect();
        let candidate = normalize_name(&truncated).trim().to_string();
        let length = candidate.chars().count();

        if length < self.limits.min_name_length || length > self.limits.max_name_length {
            handle
                .notify(format_line(
                    SERVER_SENDER,
                    &format!(
                        "name must be {} to {} characters long",
                        self.limits.min_name_length, self.limits.max_name_length
                    ),
                ))
                .await;
            return;
        }

        let key = registry_key(&candidate);
        match self.names.get(&key) {
            Some(owner) if *owner != request.visitor => {
                handle
                    .notify(format_line(
                        SERVER_SENDER,
                        &format!("name {} is already taken", candidate),
                    ))
                    .await;
                return;
            }
            Some(_) if current == candidate => {
                handle
                    .notify(format_line(
                        SERVER_SENDER,
                        &format!("your name is already {}", candidate),
                    ))
                    .await;
                return;
            }
            _ => {}
        }

        let Some(entry) = self.visitors.get_mut(&request.visitor) else {
            return;
        };
        let old = std::mem::replace(&mut entry.name, candidate.clone());
        entry.name_tx.send_replace(candidate.clone());
        self.names.remove(&registry_key(&old));
        self.names.insert(key, request.visitor);

        info!("Visitor {} renamed to {}", old, candidate);

        handle
            .notify(format_line(
                SERVER_SENDER,
                &format!("you changed your name to {}", candidate),
            ))
            .await;
    }

    /// One step of a room transition.
    ///
    /// A visitor still in a room is first sent to that room's leave queue;
    /// the room hands the request back here once the visitor is out.
    async fn handle_change_room(&mut self, transition: Transition) {
        if let Some(placement) = &transition.placement {
            let room = placement.room.clone();
            if room.leave(transition).await.is_err() {
                warn!("Room {} is gone", room.id());
            }
        } else if transition.target.is_void() {
            self.destroy_visitor(transition.visitor.id);
            transition.gate.fire(None);
        } else {
            self.enter_room(transition).await;
        }
    }

    async fn enter_room(&mut self, transition: Transition) {
        let room = self.room_for(&transition.target);
        if room.enter(transition).await.is_err() {
            warn!("Room {} is gone", room.id());
        }
    }

    fn destroy_visitor(&mut self, id: VisitorId) {
        let Some(entry) = self.visitors.remove(&id) else {
            warn!("Destroy: visitor {} is not registered", id);
            return;
        };
        self.names.remove(&registry_key(&entry.name));

        info!("Destroy visitor: {}", entry.name);
        debug!("Total visitors: {}", self.visitors.len());
    }

    fn stats(&self) -> ServerStats {
        let mut names: Vec<String> = self.visitors.values().map(|v| v.name.clone()).collect();
        names.sort();
        ServerStats {
            visitors: self.visitors.len(),
            rooms: self.rooms.len(),
            names,
        }
    }
}
