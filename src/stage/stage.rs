//! One stage: membership, reservations, objects, and raw binary parts.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::error::{constants, ProtocolError, Result};
use crate::stage::object::Object;
use crate::stage::SessionId;

/// The capability a connected session exposes to the stage layer.
///
/// This is the entire surface the registries need from a front-end
/// session: a non-blocking enqueue for broadcast fan-out, the character
/// id, and a display name for logs.
pub trait StageSession: Send + Sync {
    /// Session identity; stage membership is keyed on this.
    fn session_id(&self) -> SessionId;

    /// Queue a packet for asynchronous delivery without blocking.
    /// Returns `false` when the packet was dropped (queue full).
    fn enqueue_packet(&self, packet: Bytes) -> bool;

    /// Character id currently bound to this session.
    fn char_id(&self) -> u32;

    /// Display name for logging.
    fn display_name(&self) -> String;
}

/// Map key identifying one raw binary part of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageBinaryKey {
    pub id0: u8,
    pub id1: u8,
}

struct StageClient {
    session: Arc<dyn StageSession>,
    char_id: u32,
}

struct StageInner {
    /// Total count of objects ever created for this stage; next object id.
    object_index: u32,
    objects: HashMap<u32, Arc<Object>>,

    /// Sessions that are currently in the stage.
    clients: HashMap<SessionId, StageClient>,

    /// Characters that aren't in the stage but have reserved a slot
    /// (quest parties). The value is the slot's readiness flag.
    reserved_client_slots: HashMap<u32, bool>,

    /// Raw binary blobs set by the stage owner; other clients expect the
    /// server to echo them back byte for byte.
    raw_binary_data: HashMap<StageBinaryKey, Bytes>,

    host: Option<Arc<dyn StageSession>>,
    max_players: u16,
    password: String,
    locked: bool,
}

/// A single game room.
pub struct Stage {
    id: String,
    inner: RwLock<StageInner>,
}

impl Stage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: RwLock::new(StageInner {
                object_index: 0,
                objects: HashMap::new(),
                clients: HashMap::new(),
                reserved_client_slots: HashMap::new(),
                raw_binary_data: HashMap::new(),
                host: None,
                max_players: 127,
                password: String::new(),
                locked: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // A poisoned stage lock only means some holder panicked; the guarded
    // state is plain data and stays usable.
    fn read(&self) -> RwLockReadGuard<'_, StageInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StageInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session to the stage unconditionally. The reservation table
    /// is left alone; callers decide whether a reservation is consumed.
    pub fn join(&self, session: Arc<dyn StageSession>, char_id: u32) {
        let mut inner = self.write();
        if inner.host.is_none() {
            inner.host = Some(Arc::clone(&session));
        }
        inner
            .clients
            .insert(session.session_id(), StageClient { session, char_id });
    }

    /// Add a session after checking lock, capacity, and password in one
    /// critical section.
    pub fn try_join(
        &self,
        session: Arc<dyn StageSession>,
        char_id: u32,
        password: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.write();
        if inner.locked {
            return Err(ProtocolError::StageError(constants::ERR_STAGE_LOCKED));
        }
        if inner.clients.len() >= usize::from(inner.max_players) {
            return Err(ProtocolError::StageError(constants::ERR_STAGE_FULL));
        }
        if !inner.password.is_empty() && password != Some(inner.password.as_str()) {
            return Err(ProtocolError::StageError(constants::ERR_STAGE_PASSWORD));
        }
        if inner.host.is_none() {
            inner.host = Some(Arc::clone(&session));
        }
        inner
            .clients
            .insert(session.session_id(), StageClient { session, char_id });
        Ok(())
    }

    /// Remove a session. Returns whether it was present. Takes the same
    /// lock broadcast takes, so a leaving session can never receive a
    /// broadcast enqueued after its removal.
    pub fn leave(&self, session: SessionId) -> bool {
        let mut inner = self.write();
        let was_present = inner.clients.remove(&session).is_some();
        if inner
            .host
            .as_ref()
            .is_some_and(|h| h.session_id() == session)
        {
            inner.host = None;
        }
        was_present
    }

    /// Queue `packet` to every session in the stage except `exclude`.
    /// Returns the number of packets dropped by full send queues.
    pub fn broadcast(&self, packet: &Bytes, exclude: Option<SessionId>) -> usize {
        let inner = self.read();
        let mut dropped = 0;
        for (id, client) in &inner.clients {
            if Some(*id) == exclude {
                continue;
            }
            if !client.session.enqueue_packet(packet.clone()) {
                debug!(
                    stage = %self.id,
                    session = %id,
                    name = %client.session.display_name(),
                    "broadcast packet dropped"
                );
                dropped += 1;
            }
        }
        dropped
    }

    /// Reserve a not-yet-joined slot for a character (readiness starts false).
    pub fn reserve_slot(&self, char_id: u32) {
        self.write().reserved_client_slots.insert(char_id, false);
    }

    /// Release a character's reservation. Returns whether one existed.
    pub fn release_slot(&self, char_id: u32) -> bool {
        self.write().reserved_client_slots.remove(&char_id).is_some()
    }

    /// Flip an existing reservation's readiness flag.
    pub fn set_slot_ready(&self, char_id: u32, ready: bool) -> bool {
        match self.write().reserved_client_slots.get_mut(&char_id) {
            Some(slot) => {
                *slot = ready;
                true
            }
            None => false,
        }
    }

    /// Whether any reservation exists; front-ends use this to tell
    /// quest-style stages apart from open lobbies.
    pub fn is_quest(&self) -> bool {
        !self.read().reserved_client_slots.is_empty()
    }

    /// Whether `char_id` holds a reservation on this stage.
    pub fn has_reservation(&self, char_id: u32) -> bool {
        self.read().reserved_client_slots.contains_key(&char_id)
    }

    /// Store a raw binary part, replacing any previous bytes under the key.
    pub fn set_binary(&self, key: StageBinaryKey, data: Bytes) {
        self.write().raw_binary_data.insert(key, data);
    }

    /// The exact bytes previously stored under `key`.
    pub fn binary(&self, key: StageBinaryKey) -> Option<Bytes> {
        self.read().raw_binary_data.get(&key).cloned()
    }

    /// Snapshot of every raw binary part, for echoing to a new joiner.
    pub fn binaries(&self) -> Vec<(StageBinaryKey, Bytes)> {
        self.read()
            .raw_binary_data
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    pub fn host(&self) -> Option<Arc<dyn StageSession>> {
        self.read().host.clone()
    }

    pub fn set_host(&self, session: Arc<dyn StageSession>) {
        self.write().host = Some(session);
    }

    pub fn locked(&self) -> bool {
        self.read().locked
    }

    pub fn set_locked(&self, locked: bool) {
        self.write().locked = locked;
    }

    pub fn set_password(&self, password: impl Into<String>) {
        self.write().password = password.into();
    }

    pub fn password_matches(&self, candidate: &str) -> bool {
        let inner = self.read();
        inner.password.is_empty() || inner.password == candidate
    }

    pub fn max_players(&self) -> u16 {
        self.read().max_players
    }

    pub fn set_max_players(&self, max_players: u16) {
        self.write().max_players = max_players;
    }

    pub fn player_count(&self) -> usize {
        self.read().clients.len()
    }

    /// Character ids of every session currently in the stage.
    pub fn client_char_ids(&self) -> Vec<u32> {
        self.read().clients.values().map(|c| c.char_id).collect()
    }

    /// Whether a session is currently in the stage.
    pub fn contains_session(&self, session: SessionId) -> bool {
        self.read().clients.contains_key(&session)
    }

    /// Whether a character is currently in the stage.
    pub fn contains_char(&self, char_id: u32) -> bool {
        self.read().clients.values().any(|c| c.char_id == char_id)
    }

    /// Spawn a new object owned by `owner_char_id` at the given position.
    /// Ids come from the per-stage monotonic index and are never reused.
    pub fn spawn_object(&self, owner_char_id: u32, x: f32, y: f32, z: f32) -> Arc<Object> {
        let mut inner = self.write();
        inner.object_index = inner.object_index.wrapping_add(1);
        let id = inner.object_index;
        let object = Arc::new(Object::new(id, owner_char_id, x, y, z));
        inner.objects.insert(id, Arc::clone(&object));
        object
    }

    /// Remove an object. Returns whether it existed.
    pub fn despawn_object(&self, object_id: u32) -> bool {
        self.write().objects.remove(&object_id).is_some()
    }

    pub fn object(&self, object_id: u32) -> Option<Arc<Object>> {
        self.read().objects.get(&object_id).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.read().objects.len()
    }

    /// Move an object under its own lock. Returns false for unknown ids.
    pub fn update_object_position(&self, object_id: u32, x: f32, y: f32, z: f32) -> bool {
        // Clone the Arc out so the stage lock is released before the
        // object's own lock is taken.
        let object = self.object(object_id);
        match object {
            Some(object) => {
                object.set_position(x, y, z);
                true
            }
            None => false,
        }
    }

    /// Drop every object owned by `char_id`, for session teardown.
    pub fn despawn_objects_owned_by(&self, char_id: u32) -> usize {
        let mut inner = self.write();
        let before = inner.objects.len();
        inner.objects.retain(|_, obj| obj.owner_char_id() != char_id);
        before - inner.objects.len()
    }
}
