//! The dispatcher owns the session registry and is the only code that reads
//! client commands or changes who is connected.
//!
//! Each call to [`Dispatcher::relay_one`] handles at most one inbound frame.
//! Slots are scanned round-robin starting after the slot served last, so a
//! chatty client cannot starve the others.
//!
//! A client whose outbound queue is full is disconnected rather than skipped,
//! so every session that stays connected has seen every roster change.

use std::sync::Arc;

use tokio::sync::{
    Notify,
    mpsc::error::{TryRecvError, TrySendError},
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    error::JoinRejection,
    protocol::{ClientCommand, JoinResponse, ServerFrame, validate_username},
    session::{Session, SessionLink, SessionRegistry, SlotId},
};

pub struct Dispatcher {
    registry: SessionRegistry,
    wakeup: Arc<Notify>,
    inbound_queue_depth: usize,
    outbound_queue_depth: usize,
    next_scan: SlotId,
    /// Sessions that overflowed their outbound queue, pending removal.
    stalled: Vec<SlotId>,
}

impl Dispatcher {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            registry: SessionRegistry::with_capacity(config.capacity),
            wakeup: Arc::new(Notify::new()),
            inbound_queue_depth: config.inbound_queue_depth,
            outbound_queue_depth: config.outbound_queue_depth,
            next_scan: 0,
            stalled: Vec::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Signalled by workers whenever there may be inbound work.
    pub fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    /// Admits `username` into a free slot.
    ///
    /// On success the session's outbound queue already holds `joinresponse ok`
    /// followed by the new roster, and every other session has been sent the
    /// roster too. The returned link belongs to the session's relay worker.
    pub fn join(&mut self, username: &str) -> Result<(SlotId, SessionLink), JoinRejection> {
        validate_username(username)?;
        if self.registry.find_by_username(username).is_some() {
            return Err(JoinRejection::UsernameTaken);
        }
        let slot = self.registry.allocate()?;

        let (session, link) = Session::open(
            username.to_string(),
            self.inbound_queue_depth,
            self.outbound_queue_depth,
            self.wakeup(),
        );
        self.registry.insert(slot, session);
        self.send_to(slot, &ServerFrame::JoinResponse(JoinResponse::Ok));

        info!(username, slot, online = self.registry.len(), "user joined");
        self.broadcast_roster();
        self.evict_stalled();
        Ok((slot, link))
    }

    /// Removes a session and tells everyone left. Returns false if the slot
    /// was already free.
    pub fn remove(&mut self, slot: SlotId) -> bool {
        let removed = self.detach(slot);
        self.evict_stalled();
        removed
    }

    /// Each removal rebroadcasts the roster, which can stall further sessions.
    fn evict_stalled(&mut self) {
        while let Some(slot) = self.stalled.pop() {
            self.detach(slot);
        }
    }

    fn detach(&mut self, slot: SlotId) -> bool {
        match self.registry.remove(slot) {
            Some(session) => {
                info!(
                    username = session.username(),
                    slot,
                    online = self.registry.len(),
                    "user left"
                );
                drop(session);
                self.broadcast_roster();
                true
            }
            None => false,
        }
    }

    /// Handles the first pending inbound frame or disconnect, if any.
    ///
    /// Returns whether any work was done.
    pub fn relay_one(&mut self) -> bool {
        let capacity = self.registry.capacity();
        for offset in 0..capacity {
            let slot = (self.next_scan + offset) % capacity;
            let Some(session) = self.registry.get_mut(slot) else {
                continue;
            };
            match session.try_recv() {
                Ok(frame) => {
                    self.next_scan = (slot + 1) % capacity;
                    self.route(slot, &frame);
                    self.evict_stalled();
                    return true;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.next_scan = (slot + 1) % capacity;
                    self.remove(slot);
                    return true;
                }
            }
        }
        false
    }

    fn route(&mut self, slot: SlotId, frame: &str) {
        let Some(sender) = self.registry.get(slot).map(|s| s.username().to_string()) else {
            return;
        };

        match ClientCommand::parse(frame) {
            Ok(ClientCommand::Shout { message }) => self.shout(slot, sender, message),
            Ok(ClientCommand::Whisper { recipient, message }) => {
                self.whisper(slot, sender, recipient, message)
            }
            Ok(ClientCommand::Join { .. }) => {
                warn!(username = %sender, "ignoring join from a session that already joined");
            }
            Err(err) => debug!(username = %sender, error = %err, "dropping malformed frame"),
        }
    }

    fn shout(&mut self, from: SlotId, sender: String, message: String) {
        let delivery = ServerFrame::Shouted {
            sender,
            message: message.clone(),
        };
        let others: Vec<SlotId> = self
            .registry
            .occupied()
            .map(|(slot, _)| slot)
            .filter(|&slot| slot != from)
            .collect();
        for slot in others {
            self.send_to(slot, &delivery);
        }
        self.send_to(from, &ServerFrame::ShoutedCc { message });
    }

    fn whisper(&mut self, from: SlotId, sender: String, recipient: String, message: String) {
        let Some(to) = self.registry.find_by_username(&recipient) else {
            // Clients only offer recipients from their last roster, so this is a race.
            debug!(username = %sender, %recipient, "dropping whisper to unknown recipient");
            return;
        };
        self.send_to(
            to,
            &ServerFrame::Whispered {
                sender,
                message: message.clone(),
            },
        );
        self.send_to(from, &ServerFrame::WhisperedCc { recipient, message });
    }

    /// Sends the current roster to every occupied session.
    fn broadcast_roster(&mut self) {
        let roster = ServerFrame::UserList {
            usernames: self.registry.snapshot(),
        };
        let slots: Vec<SlotId> = self.registry.occupied().map(|(slot, _)| slot).collect();
        for slot in slots {
            self.send_to(slot, &roster);
        }
    }

    /// Queues a frame for one session without waiting.
    ///
    /// A full queue marks the session for removal. A closed queue is only
    /// logged: the worker is gone and its disconnect is noticed by `relay_one`.
    fn send_to(&mut self, slot: SlotId, frame: &ServerFrame) {
        let Some(session) = self.registry.get(slot) else {
            return;
        };
        match session.try_send(frame.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(username = session.username(), slot, "client is too slow, disconnecting");
                self.stalled.push(slot);
            }
            Err(TrySendError::Closed(_)) => {
                warn!(username = session.username(), slot, "client is gone, dropping frame");
            }
        }
    }
}
