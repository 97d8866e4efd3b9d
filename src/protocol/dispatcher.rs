use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::{ProtocolError, Result};
use crate::protocol::opcode::PacketId;

type HandlerFn<C> = dyn Fn(&C, &mut Bytes) -> Result<()> + Send + Sync + 'static;

/// Opcode-keyed message dispatcher.
///
/// `C` is the per-call context handed to every handler (the channel server
/// passes its session context). Handlers consume their message's fields
/// from the front of the shared body buffer and leave the remainder of
/// the packet group in place for the next message.
///
/// Opcodes with no registered handler fail with `NotImplemented` rather
/// than panicking; a single unknown message costs at most the rest of its
/// packet group, never the connection's worker.
pub struct Dispatcher<C> {
    handlers: RwLock<HashMap<PacketId, Box<HandlerFn<C>>>>,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register<F>(&self, opcode: PacketId, handler: F)
    where
        F: Fn(&C, &mut Bytes) -> Result<()> + Send + Sync + 'static,
    {
        // A poisoned table only means a handler panicked mid-registration;
        // the map itself is still plain data, so take it as-is.
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        handlers.insert(opcode, Box::new(handler));
    }

    pub fn dispatch(&self, opcode: PacketId, ctx: &C, body: &mut Bytes) -> Result<()> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        match handlers.get(&opcode) {
            Some(handler) => handler(ctx, body),
            None => Err(ProtocolError::NotImplemented(opcode.0)),
        }
    }

    /// Whether a handler is registered for `opcode`.
    pub fn handles(&self, opcode: PacketId) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&opcode)
    }
}
