//! Sessions and the fixed-capacity registry that owns them.
//!
//! The registry is owned by the dispatcher and never shared, so it needs no
//! locking. Workers only ever hold the opposite ends of a session's channels
//! (a [`SessionLink`]).

use std::sync::Arc;

use tokio::sync::{
    Notify,
    mpsc::{self, error::TryRecvError, error::TrySendError},
};

use crate::error::RegistryError;

pub type SlotId = usize;

/// Server-side record of one joined client.
#[derive(Debug)]
pub struct Session {
    username: String,
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<String>,
}

/// The worker's half of a session: where it pushes client frames, where it
/// picks up frames for the client, and how it wakes the dispatcher.
#[derive(Debug)]
pub struct SessionLink {
    pub inbound: mpsc::Sender<String>,
    pub outbound: mpsc::Receiver<String>,
    pub wakeup: Arc<Notify>,
}

impl Session {
    /// Creates a session and the link its relay worker will own.
    pub fn open(
        username: String,
        inbound_depth: usize,
        outbound_depth: usize,
        wakeup: Arc<Notify>,
    ) -> (Self, SessionLink) {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_depth);
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_depth);
        let session = Self {
            username,
            inbound: inbound_rx,
            outbound: outbound_tx,
        };
        let link = SessionLink {
            inbound: inbound_tx,
            outbound: outbound_rx,
            wakeup,
        };
        (session, link)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Takes the next frame the client sent, without waiting.
    ///
    /// `Disconnected` means the worker is gone and every frame it forwarded
    /// has already been taken.
    pub fn try_recv(&mut self) -> Result<String, TryRecvError> {
        self.inbound.try_recv()
    }

    /// Queues a frame for the client, without waiting.
    pub fn try_send(&self, frame: String) -> Result<(), TrySendError<String>> {
        self.outbound.try_send(frame)
    }
}

#[derive(Debug)]
pub struct SessionRegistry {
    slots: Vec<Option<Session>>,
}

impl SessionRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the lowest free slot.
    pub fn allocate(&self) -> Result<SlotId, RegistryError> {
        self.slots
            .iter()
            .position(Option::is_none)
            .ok_or(RegistryError::Full)
    }

    /// Places a session into a slot returned by [`Self::allocate`].
    pub fn insert(&mut self, slot: SlotId, session: Session) {
        debug_assert!(self.slots[slot].is_none(), "slot {slot} is occupied");
        self.slots[slot] = Some(session);
    }

    pub fn find_by_username(&self, username: &str) -> Option<SlotId> {
        self.occupied()
            .find(|(_, session)| session.username == username)
            .map(|(slot, _)| slot)
    }

    pub fn get(&self, slot: SlotId) -> Option<&Session> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut Session> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Frees a slot, dropping its channels. Removing a free slot is a no-op.
    pub fn remove(&mut self, slot: SlotId) -> Option<Session> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Usernames of all occupied slots, in slot order.
    pub fn snapshot(&self) -> Vec<String> {
        self.occupied()
            .map(|(_, session)| session.username.clone())
            .collect()
    }

    pub fn occupied(&self) -> impl Iterator<Item = (SlotId, &Session)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, session)| session.as_ref().map(|session| (slot, session)))
    }
}
