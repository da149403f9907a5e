//! Room actor
//!
//! Each room runs its own loop owning its membership list. Other actors
//! talk to it only through the three bounded queues behind [`RoomHandle`]:
//! enter requests, leave requests and broadcasts.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Limits;
use crate::error::ChatError;
use crate::members::{MemberKey, Members};
use crate::message::format_line;
use crate::server::{ServerHandle, Transition};
use crate::types::RoomId;
use crate::visitor::VisitorHandle;

/// A chat line on its way to every member but the sender
#[derive(Debug)]
pub struct Broadcast {
    /// Membership of the sender, skipped during fan-out
    pub from: MemberKey,
    /// Display name shown in front of the text
    pub sender: String,
    pub text: String,
}

/// Where a visitor currently is: the room and its position in it
#[derive(Debug, Clone)]
pub struct Placement {
    pub room: RoomHandle,
    pub key: MemberKey,
}

/// Cloneable address of a running room
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: RoomId,
    name: Arc<str>,
    lobby: bool,
    enter_tx: mpsc::Sender<Transition>,
    leave_tx: mpsc::Sender<Transition>,
    messages_tx: mpsc::Sender<Broadcast>,
}

impl RoomHandle {
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Display name used as the sender of room notices
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_lobby(&self) -> bool {
        self.lobby
    }

    pub async fn enter(&self, transition: Transition) -> Result<(), ChatError> {
        self.enter_tx
            .send(transition)
            .await
            .map_err(|_| ChatError::RoomClosed)
    }

    pub async fn leave(&self, transition: Transition) -> Result<(), ChatError> {
        self.leave_tx
            .send(transition)
            .await
            .map_err(|_| ChatError::RoomClosed)
    }

    pub async fn broadcast(&self, broadcast: Broadcast) -> Result<(), ChatError> {
        self.messages_tx
            .send(broadcast)
            .await
            .map_err(|_| ChatError::RoomClosed)
    }
}

/// Room state, owned by the room's task
pub struct Room {
    handle: RoomHandle,
    members: Members<VisitorHandle>,
    capacity: usize,
    server: ServerHandle,
    enter_rx: mpsc::Receiver<Transition>,
    leave_rx: mpsc::Receiver<Transition>,
    messages_rx: mpsc::Receiver<Broadcast>,
}

impl Room {
    /// Create a room and start its loop.
    ///
    /// Rooms are never torn down; the returned handle stays valid for the
    /// life of the process.
    pub fn spawn(id: RoomId, lobby: bool, limits: &Limits, server: ServerHandle) -> RoomHandle {
        let room = Room::new(id, lobby, limits, server);
        let handle = room.handle.clone();

        info!("New room: {}", handle.id);
        tokio::spawn(room.run());

        handle
    }

    fn new(id: RoomId, lobby: bool, limits: &Limits, server: ServerHandle) -> Room {
        let (enter_tx, enter_rx) = mpsc::channel(limits.room_request_capacity);
        let (leave_tx, leave_rx) = mpsc::channel(limits.room_request_capacity);
        let (messages_tx, messages_rx) = mpsc::channel(limits.room_message_capacity);

        let name: Arc<str> = if lobby {
            id.as_str().into()
        } else {
            format!("Room#{}", id).into()
        };

        let handle = RoomHandle {
            id,
            name,
            lobby,
            enter_tx,
            leave_tx,
            messages_tx,
        };

        Room {
            handle,
            members: Members::new(),
            capacity: limits.room_capacity,
            server,
            enter_rx,
            leave_rx,
            messages_rx,
        }
    }

    /// Serve the three queues; `select!` picks randomly among ready
    /// branches so none of them starves.
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(transition) = self.leave_rx.recv() => {
                    self.handle_leave(transition).await;
                }
                Some(transition) = self.enter_rx.recv() => {
                    self.handle_enter(transition).await;
                }
                Some(broadcast) = self.messages_rx.recv() => {
                    self.handle_broadcast(broadcast);
                }
                else => break,
            }
        }

        debug!("Room {} loop ended", self.handle.id);
    }

    async fn handle_leave(&mut self, mut transition: Transition) {
        let visitor_id = transition.visitor.id;

        match transition.placement.take() {
            Some(placement) if placement.room.id() == self.handle.id() => {
                match self.members.remove(placement.key) {
                    Some(member) if member.id == visitor_id => {}
                    Some(member) => {
                        warn!(
                            "Leave {}: removed membership of {} instead of {}",
                            self.handle.id, member.id, visitor_id
                        );
                    }
                    None => {
                        warn!("Leave {}: visitor {} has no membership here", self.handle.id, visitor_id);
                    }
                }
            }
            Some(placement) => {
                // let the directory route it to the room the visitor is really in
                warn!(
                    "Leave {}: visitor {} is in {}",
                    self.handle.id,
                    visitor_id,
                    placement.room.id()
                );
                transition.placement = Some(placement);
            }
            None => {
                warn!("Leave {}: visitor {} has not entered any room", self.handle.id, visitor_id);
            }
        }

        transition
            .visitor
            .notify(format_line(self.handle.name(), "<= you left this room."))
            .await;

        debug!("Visitor {} left {} ({} members)", visitor_id, self.handle.id, self.members.len());

        if self.server.change_room(transition).await.is_err() {
            warn!("Leave {}: server closed, visitor {} stranded", self.handle.id, visitor_id);
        }
    }

    async fn handle_enter(&mut self, mut transition: Transition) {
        if let Some(placement) = transition.placement.take() {
            warn!(
                "Enter {}: visitor {} has already entered {}",
                self.handle.id,
                transition.visitor.id,
                placement.room.id()
            );
            transition.gate.fire(Some(placement));
            return;
        }

        if self.members.len() >= self.capacity {
            transition
                .visitor
                .notify(format_line(self.handle.name(), "Sorry, I am full. :("))
                .await;
            transition.gate.fire(None);
            return;
        }

        let key = self.members.push_back(transition.visitor.clone());
        transition
            .visitor
            .notify(format_line(self.handle.name(), "<= you entered this room."))
            .await;

        debug!(
            "Visitor {} entered {} ({} members)",
            transition.visitor.id,
            self.handle.id,
            self.members.len()
        );

        transition.gate.fire(Some(Placement {
            room: self.handle.clone(),
            key,
        }));
    }

    /// Fan out without ever waiting on a member's mailbox
    fn handle_broadcast(&self, broadcast: Broadcast) {
        let line = format_line(&broadcast.sender, &broadcast.text);

        for (key, member) in self.members.iter() {
            if key == broadcast.from {
                continue;
            }
            if !member.offer(line.clone()) {
                debug!("Mailbox of {} unavailable, dropping message in {}", member.id, self.handle.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::gate::{self, PendingTransition};
    use crate::server::ServerQueues;
    use crate::types::VisitorId;

    const WAIT: Duration = Duration::from_secs(2);

    fn limits(capacity: usize) -> Limits {
        Limits {
            room_capacity: capacity,
            visitor_mailbox_capacity: 4,
            ..Limits::default()
        }
    }

    fn visitor() -> (VisitorHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(4);
        (VisitorHandle::new(VisitorId::new(), tx), rx)
    }

    fn transition(
        visitor: &VisitorHandle,
        placement: Option<Placement>,
        target: &str,
    ) -> (Transition, PendingTransition) {
        let (gate, pending) = gate::arm();
        let transition = Transition {
            visitor: visitor.clone(),
            placement,
            target: RoomId::parse(target),
            gate,
        };
        (transition, pending)
    }

    fn spawn_room(capacity: usize) -> (RoomHandle, ServerQueues) {
        let limits = limits(capacity);
        let (server, queues) = ServerHandle::channel(&limits);
        (Room::spawn(RoomId::parse("cave"), false, &limits, server), queues)
    }

    async fn enter(room: &RoomHandle, visitor: &VisitorHandle) -> Option<Placement> {
        let (t, pending) = transition(visitor, None, "cave");
        room.enter(t).await.unwrap();
        timeout(WAIT, pending.wait()).await.unwrap()
    }

    async fn next_line(rx: &mut mpsc::Receiver<String>) -> String {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_room_names() {
        let limits = Limits::default();
        let (server, _queues) = ServerHandle::channel(&limits);
        let lobby = Room::spawn(RoomId::parse("lobby"), true, &limits, server.clone());
        let cave = Room::spawn(RoomId::parse("Cave"), false, &limits, server);

        assert_eq!(lobby.name(), "lobby");
        assert!(lobby.is_lobby());
        assert_eq!(cave.name(), "Room#Cave");
        assert!(!cave.is_lobby());
    }

    #[tokio::test]
    async fn test_enter_fires_gate_with_placement() {
        let (room, _queues) = spawn_room(10);
        let (a, mut a_rx) = visitor();

        let placement = enter(&room, &a).await.expect("entered");
        assert_eq!(placement.room.id().as_str(), "cave");
        assert!(next_line(&mut a_rx).await.contains("Room#cave> <= you entered this room."));
    }

    #[tokio::test]
    async fn test_full_room_rejects() {
        let (room, _queues) = spawn_room(1);
        let (a, _a_rx) = visitor();
        let (b, mut b_rx) = visitor();

        assert!(enter(&room, &a).await.is_some());
        assert!(enter(&room, &b).await.is_none());
        assert!(next_line(&mut b_rx).await.contains("Sorry, I am full. :("));
    }

    #[tokio::test]
    async fn test_double_enter_keeps_placement() {
        let (room, _queues) = spawn_room(10);
        let (a, _a_rx) = visitor();
        let placement = enter(&room, &a).await.unwrap();

        let (t, pending) = transition(&a, Some(placement.clone()), "cave");
        room.enter(t).await.unwrap();
        let kept = timeout(WAIT, pending.wait()).await.unwrap().unwrap();
        assert_eq!(kept.key, placement.key);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let (room, _queues) = spawn_room(10);
        let (a, mut a_rx) = visitor();
        let (b, mut b_rx) = visitor();
        let a_place = enter(&room, &a).await.unwrap();
        enter(&room, &b).await.unwrap();
        next_line(&mut a_rx).await;
        next_line(&mut b_rx).await;

        room.broadcast(Broadcast {
            from: a_place.key,
            sender: "A".to_string(),
            text: "hello".to_string(),
        })
        .await
        .unwrap();

        assert!(next_line(&mut b_rx).await.ends_with("] A> hello\n"));
        assert!(timeout(Duration::from_millis(100), a_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_broadcast_drops_on_full_mailbox() {
        let (room, _queues) = spawn_room(10);
        let (a, _a_rx) = visitor();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let slow = VisitorHandle::new(VisitorId::new(), slow_tx);
        let a_place = enter(&room, &a).await.unwrap();
        // the "entered" notice fills the slow mailbox
        enter(&room, &slow).await.unwrap();

        for text in ["one", "two", "three"] {
            room.broadcast(Broadcast {
                from: a_place.key,
                sender: "A".to_string(),
                text: text.to_string(),
            })
            .await
            .unwrap();
        }

        // the room keeps serving requests
        let (c, _c_rx) = visitor();
        assert!(enter(&room, &c).await.is_some());

        assert!(next_line(&mut slow_rx).await.contains("entered"));
        assert!(timeout(Duration::from_millis(100), slow_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_leave_resubmits_to_server() {
        let (room, mut queues) = spawn_room(10);
        let (a, mut a_rx) = visitor();
        let placement = enter(&room, &a).await.unwrap();
        next_line(&mut a_rx).await;

        let (t, _pending) = transition(&a, Some(placement), "lobby");
        room.leave(t).await.unwrap();

        assert!(next_line(&mut a_rx).await.contains("<= you left this room."));
        let resubmitted = timeout(WAIT, queues.room_changes.recv()).await.unwrap().unwrap();
        assert!(resubmitted.placement.is_none());
        assert_eq!(resubmitted.target.as_str(), "lobby");
    }

    #[tokio::test]
    async fn test_leave_frees_capacity() {
        let (room, mut queues) = spawn_room(1);
        let (a, mut a_rx) = visitor();
        let (b, _b_rx) = visitor();
        let placement = enter(&room, &a).await.unwrap();
        next_line(&mut a_rx).await;

        let (t, _pending) = transition(&a, Some(placement), "lobby");
        room.leave(t).await.unwrap();
        assert!(next_line(&mut a_rx).await.contains("<= you left this room."));
        timeout(WAIT, queues.room_changes.recv()).await.unwrap().unwrap();

        assert!(enter(&room, &b).await.is_some());
    }

    #[tokio::test]
    async fn test_leave_without_membership_is_noop() {
        let (room, mut queues) = spawn_room(10);
        let (a, mut a_rx) = visitor();

        let (t, _pending) = transition(&a, None, "lobby");
        room.leave(t).await.unwrap();

        assert!(next_line(&mut a_rx).await.contains("<= you left this room."));
        let resubmitted = timeout(WAIT, queues.room_changes.recv()).await.unwrap().unwrap();
        assert!(resubmitted.placement.is_none());
    }

    #[tokio::test]
    async fn test_fan_out_follows_membership_order() {
        let limits = limits(10);
        let (server, mut queues) = ServerHandle::channel(&limits);
        let mut room = Room::new(RoomId::parse("cave"), false, &limits, server);

        let mut visitors = Vec::new();
        let mut placements = Vec::new();
        for _ in 0..5 {
            let (v, mut rx) = visitor();
            let (t, pending) = transition(&v, None, "cave");
            room.handle_enter(t).await;
            placements.push(pending.wait().await.unwrap());
            next_line(&mut rx).await;
            visitors.push((v, rx));
        }

        // take the second member out of the middle
        let (t, _pending) = transition(&visitors[1].0, Some(placements[1].clone()), "lobby");
        room.handle_leave(t).await;
        next_line(&mut visitors[1].1).await;
        queues.room_changes.recv().await.unwrap();

        let order: Vec<VisitorId> = room.members.iter().map(|(_, v)| v.id).collect();
        let expected: Vec<VisitorId> = [0, 2, 3, 4].iter().map(|i| visitors[*i].0.id).collect();
        assert_eq!(order, expected);

        room.handle_broadcast(Broadcast {
            from: placements[2].key,
            sender: "C".to_string(),
            text: "hi".to_string(),
        });

        for (i, (_, rx)) in visitors.iter_mut().enumerate() {
            if i == 1 || i == 2 {
                assert!(rx.try_recv().is_err());
            } else {
                assert!(rx.try_recv().unwrap().ends_with("] C> hi\n"));
            }
        }
    }

    #[tokio::test]
    async fn test_requests_served_during_message_flood() {
        let (room, _queues) = spawn_room(10);
        let (a, _a_rx) = visitor();
        let a_place = enter(&room, &a).await.unwrap();

        let flood = {
            let room = room.clone();
            tokio::spawn(async move {
                loop {
                    let broadcast = Broadcast {
                        from: a_place.key,
                        sender: "A".to_string(),
                        text: "spam".to_string(),
                    };
                    if room.broadcast(broadcast).await.is_err() {
                        break;
                    }
                }
            })
        };

        // the message queue never drains, yet enters still go through
        for _ in 0..3 {
            let (b, _b_rx) = visitor();
            assert!(enter(&room, &b).await.is_some());
        }
        flood.abort();
    }
}
