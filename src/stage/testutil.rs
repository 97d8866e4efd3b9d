//! Test doubles for the stage layer.

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::stage::stage::StageSession;
use crate::stage::SessionId;

/// In-memory session collecting everything enqueued to it.
pub(crate) struct RecordingSession {
    id: SessionId,
    char_id: u32,
    pub packets: Mutex<Vec<Bytes>>,
    pub capacity: Option<usize>,
    pub drops: AtomicUsize,
}

impl RecordingSession {
    pub(crate) fn new(id: u64, char_id: u32) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId(id),
            char_id,
            packets: Mutex::new(Vec::new()),
            capacity: None,
            drops: AtomicUsize::new(0),
        })
    }

    /// A session whose queue holds at most `capacity` packets.
    pub(crate) fn bounded(id: u64, char_id: u32, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId(id),
            char_id,
            packets: Mutex::new(Vec::new()),
            capacity: Some(capacity),
            drops: AtomicUsize::new(0),
        })
    }

    pub(crate) fn received(&self) -> usize {
        self.packets.lock().unwrap().len()
    }
}

impl StageSession for RecordingSession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn enqueue_packet(&self, packet: Bytes) -> bool {
        let mut packets = self.packets.lock().unwrap();
        if self.capacity.is_some_and(|cap| packets.len() >= cap) {
            self.drops.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        packets.push(packet);
        true
    }

    fn char_id(&self) -> u32 {
        self.char_id
    }

    fn display_name(&self) -> String {
        format!("char-{}", self.char_id)
    }
}
