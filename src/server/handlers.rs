//! System message handlers for the channel front-end.
//!
//! Message bodies are hand-rolled big-endian, like everything else the
//! client speaks. Each handler consumes exactly its own fields from the
//! packet group; acked requests carry a leading `ack_handle: u32` and get
//! an `[SYS_ACK][ack_handle][status][data]` reply, status `0` for
//! success and `1` for refusal.
//!
//! Refusals (stage locked, full, wrong password, no current stage) are
//! reported to the client and never escalate past the handler; only a
//! body that cannot be parsed aborts the rest of its packet group.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::error::{ProtocolError, Result};
use crate::protocol::{Dispatcher, PacketId};
use crate::server::session::SessionContext;
use crate::stage::stage::{StageBinaryKey, StageSession};

const ACK_SUCCESS: u8 = 0;
const ACK_FAIL: u8 = 1;

/// Register every system handler on a fresh dispatcher.
pub fn register_system_handlers(dispatcher: &Dispatcher<SessionContext>) {
    dispatcher.register(PacketId::SYS_PING, handle_ping);
    dispatcher.register(PacketId::SYS_TIME, handle_time);
    dispatcher.register(PacketId::SYS_LOGIN, handle_login);
    dispatcher.register(PacketId::SYS_CREATE_STAGE, handle_create_stage);
    dispatcher.register(PacketId::SYS_ENTER_STAGE, handle_enter_stage);
    dispatcher.register(PacketId::SYS_LEAVE_STAGE, handle_leave_stage);
    dispatcher.register(PacketId::SYS_LOCK_STAGE, handle_lock_stage);
    dispatcher.register(PacketId::SYS_RESERVE_STAGE, handle_reserve_stage);
    dispatcher.register(PacketId::SYS_UNRESERVE_STAGE, handle_unreserve_stage);
    dispatcher.register(PacketId::SYS_SET_STAGE_BINARY, handle_set_stage_binary);
    dispatcher.register(PacketId::SYS_GET_STAGE_BINARY, handle_get_stage_binary);
    dispatcher.register(PacketId::SYS_CAST_BINARY, handle_cast_binary);
    dispatcher.register(PacketId::SYS_CREATE_OBJECT, handle_create_object);
    dispatcher.register(PacketId::SYS_DELETE_OBJECT, handle_delete_object);
    dispatcher.register(PacketId::SYS_POSITION_OBJECT, handle_position_object);
}

fn need(body: &Bytes, n: usize, opcode: PacketId) -> Result<()> {
    if body.len() < n {
        return Err(ProtocolError::MalformedBody {
            opcode: opcode.0,
            reason: "truncated body",
        });
    }
    Ok(())
}

/// `[len: u8][bytes]` string field.
fn read_string(body: &mut Bytes, opcode: PacketId) -> Result<String> {
    need(body, 1, opcode)?;
    let len = usize::from(body.get_u8());
    need(body, len, opcode)?;
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::MalformedBody {
        opcode: opcode.0,
        reason: "string field is not valid utf-8",
    })
}

fn ack_fail(ctx: &SessionContext, ack_handle: u32) {
    ctx.session.queue_ack(ack_handle, &[ACK_FAIL]);
}

fn ack_success(ctx: &SessionContext, ack_handle: u32, data: &[u8]) {
    let mut buf = Vec::with_capacity(1 + data.len());
    buf.push(ACK_SUCCESS);
    buf.extend_from_slice(data);
    ctx.session.queue_ack(ack_handle, &buf);
}

/// `[ack_handle: u32]`
fn handle_ping(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 4, PacketId::SYS_PING)?;
    let ack_handle = body.get_u32();
    ack_success(ctx, ack_handle, &[]);
    Ok(())
}

/// `[ack_handle: u32]` -> epoch seconds
fn handle_time(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 4, PacketId::SYS_TIME)?;
    let ack_handle = body.get_u32();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    ack_success(ctx, ack_handle, &now.to_be_bytes());
    Ok(())
}

/// `[ack_handle: u32][char_id: u32][name: string]`
fn handle_login(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 8, PacketId::SYS_LOGIN)?;
    let ack_handle = body.get_u32();
    let char_id = body.get_u32();
    let name = read_string(body, PacketId::SYS_LOGIN)?;

    ctx.session.set_char_id(char_id);
    ctx.session.set_name(name.clone());
    info!(char_id, name = %name, "character logged in");

    ack_success(ctx, ack_handle, &char_id.to_be_bytes());
    Ok(())
}

/// `[ack_handle: u32][stage_id: string]`
fn handle_create_stage(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 4, PacketId::SYS_CREATE_STAGE)?;
    let ack_handle = body.get_u32();
    let stage_id = read_string(body, PacketId::SYS_CREATE_STAGE)?;

    ctx.stages.get_or_create(&stage_id);
    ack_success(ctx, ack_handle, &[]);
    Ok(())
}

/// `[ack_handle: u32][stage_id: string][password: string]`
///
/// Moves the session out of its previous stage, joins the new one, and
/// echoes every raw binary part of the new stage back to the joiner.
fn handle_enter_stage(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 4, PacketId::SYS_ENTER_STAGE)?;
    let ack_handle = body.get_u32();
    let stage_id = read_string(body, PacketId::SYS_ENTER_STAGE)?;
    let password = read_string(body, PacketId::SYS_ENTER_STAGE)?;

    let session = Arc::clone(&ctx.session);
    let char_id = session.char_id();

    let stage = ctx.stages.get_or_create(&stage_id);
    let password = if password.is_empty() {
        None
    } else {
        Some(password.as_str())
    };
    if let Err(e) = stage.try_join(session.clone(), char_id, password) {
        debug!(stage = %stage_id, error = %e, "stage join refused");
        ack_fail(ctx, ack_handle);
        return Ok(());
    }

    // Only leave the old room once the new one has accepted us.
    if let Some(old) = ctx.session.stage() {
        if old.id() != stage.id() {
            old.leave(session.session_id());
            old.despawn_objects_owned_by(char_id);
        }
    }
    ctx.session.set_stage(Some(Arc::clone(&stage)));
    info!(stage = %stage_id, "entered stage");

    // New joiners expect the stage's binary parts replayed byte for byte.
    for (key, blob) in stage.binaries() {
        let mut echo = BytesMut::with_capacity(2 + 2 + 2 + blob.len());
        echo.put_u16(PacketId::SYS_SET_STAGE_BINARY.0);
        echo.put_u8(key.id0);
        echo.put_u8(key.id1);
        echo.put_u16(blob.len() as u16);
        echo.put_slice(&blob);
        ctx.session.enqueue_packet(echo.freeze());
    }

    ack_success(ctx, ack_handle, &[]);
    Ok(())
}

/// `[ack_handle: u32]`
fn handle_leave_stage(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 4, PacketId::SYS_LEAVE_STAGE)?;
    let ack_handle = body.get_u32();

    match ctx.session.stage() {
        Some(stage) => {
            stage.leave(ctx.session.session_id());
            stage.despawn_objects_owned_by(ctx.session.char_id());
            ctx.session.set_stage(None);
            ack_success(ctx, ack_handle, &[]);
        }
        None => ack_fail(ctx, ack_handle),
    }
    Ok(())
}

/// `[ack_handle: u32][locked: u8]` — host only.
fn handle_lock_stage(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 5, PacketId::SYS_LOCK_STAGE)?;
    let ack_handle = body.get_u32();
    let locked = body.get_u8() != 0;

    let stage = match ctx.session.stage() {
        Some(stage) => stage,
        None => {
            ack_fail(ctx, ack_handle);
            return Ok(());
        }
    };

    let is_host = stage
        .host()
        .is_some_and(|h| h.session_id() == ctx.session.session_id());
    if !is_host {
        ack_fail(ctx, ack_handle);
        return Ok(());
    }

    stage.set_locked(locked);
    ack_success(ctx, ack_handle, &[]);
    Ok(())
}

/// `[ack_handle: u32][stage_id: string]`
fn handle_reserve_stage(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 4, PacketId::SYS_RESERVE_STAGE)?;
    let ack_handle = body.get_u32();
    let stage_id = read_string(body, PacketId::SYS_RESERVE_STAGE)?;

    let stage = ctx.stages.get_or_create(&stage_id);
    stage.reserve_slot(ctx.session.char_id());
    ack_success(ctx, ack_handle, &[]);
    Ok(())
}

/// `[ack_handle: u32][stage_id: string]`
fn handle_unreserve_stage(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 4, PacketId::SYS_UNRESERVE_STAGE)?;
    let ack_handle = body.get_u32();
    let stage_id = read_string(body, PacketId::SYS_UNRESERVE_STAGE)?;

    match ctx.stages.get(&stage_id) {
        Some(stage) if stage.release_slot(ctx.session.char_id()) => {
            ack_success(ctx, ack_handle, &[]);
        }
        _ => ack_fail(ctx, ack_handle),
    }
    Ok(())
}

/// `[id0: u8][id1: u8][len: u16][bytes]` — no ack.
fn handle_set_stage_binary(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 4, PacketId::SYS_SET_STAGE_BINARY)?;
    let key = StageBinaryKey {
        id0: body.get_u8(),
        id1: body.get_u8(),
    };
    let len = usize::from(body.get_u16());
    need(body, len, PacketId::SYS_SET_STAGE_BINARY)?;
    let blob = body.split_to(len);

    match ctx.session.stage() {
        Some(stage) => stage.set_binary(key, blob),
        None => debug!(id0 = key.id0, id1 = key.id1, "stage binary set outside a stage"),
    }
    Ok(())
}

/// `[ack_handle: u32][id0: u8][id1: u8]`
fn handle_get_stage_binary(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 6, PacketId::SYS_GET_STAGE_BINARY)?;
    let ack_handle = body.get_u32();
    let key = StageBinaryKey {
        id0: body.get_u8(),
        id1: body.get_u8(),
    };

    let blob = ctx.session.stage().and_then(|stage| stage.binary(key));
    match blob {
        Some(blob) => ack_success(ctx, ack_handle, &blob),
        None => ack_fail(ctx, ack_handle),
    }
    Ok(())
}

/// `[cast_type: u8][len: u16][bytes]` — rebroadcast verbatim to the
/// rest of the stage.
fn handle_cast_binary(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 3, PacketId::SYS_CAST_BINARY)?;
    let cast_type = body.get_u8();
    let len = usize::from(body.get_u16());
    need(body, len, PacketId::SYS_CAST_BINARY)?;
    let payload = body.split_to(len);

    let stage = match ctx.session.stage() {
        Some(stage) => stage,
        None => {
            debug!("cast binary outside a stage");
            return Ok(());
        }
    };

    let mut packet = BytesMut::with_capacity(2 + 3 + payload.len());
    packet.put_u16(PacketId::SYS_CAST_BINARY.0);
    packet.put_u8(cast_type);
    packet.put_u16(payload.len() as u16);
    packet.put_slice(&payload);

    ctx.metrics.broadcasts_total.fetch_add(1, Ordering::Relaxed);
    stage.broadcast(&packet.freeze(), Some(ctx.session.session_id()));
    Ok(())
}

/// `[ack_handle: u32][x: f32][y: f32][z: f32]`
fn handle_create_object(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 16, PacketId::SYS_CREATE_OBJECT)?;
    let ack_handle = body.get_u32();
    let x = body.get_f32();
    let y = body.get_f32();
    let z = body.get_f32();

    let stage = match ctx.session.stage() {
        Some(stage) => stage,
        None => {
            ack_fail(ctx, ack_handle);
            return Ok(());
        }
    };

    let char_id = ctx.session.char_id();
    let object = stage.spawn_object(char_id, x, y, z);
    info!(
        object = object.id(),
        owner = char_id,
        name = %ctx.session.display_name(),
        "broadcasting new object"
    );
    ack_success(ctx, ack_handle, &object.id().to_be_bytes());

    // Duplicate the object creation to all sessions in the same stage.
    let mut dup = BytesMut::with_capacity(2 + 4 + 12 + 4);
    dup.put_u16(PacketId::SYS_DUPLICATE_OBJECT.0);
    dup.put_u32(object.id());
    dup.put_f32(x);
    dup.put_f32(y);
    dup.put_f32(z);
    dup.put_u32(char_id);

    ctx.metrics.broadcasts_total.fetch_add(1, Ordering::Relaxed);
    stage.broadcast(&dup.freeze(), Some(ctx.session.session_id()));
    Ok(())
}

/// `[ack_handle: u32][object_id: u32]`
fn handle_delete_object(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 8, PacketId::SYS_DELETE_OBJECT)?;
    let ack_handle = body.get_u32();
    let object_id = body.get_u32();

    match ctx.session.stage() {
        Some(stage) if stage.despawn_object(object_id) => {
            ack_success(ctx, ack_handle, &[]);
        }
        _ => ack_fail(ctx, ack_handle),
    }
    Ok(())
}

/// `[object_id: u32][x: f32][y: f32][z: f32]` — no ack; one of the few
/// messages that can be rebroadcast directly.
fn handle_position_object(ctx: &SessionContext, body: &mut Bytes) -> Result<()> {
    need(body, 16, PacketId::SYS_POSITION_OBJECT)?;
    let object_id = body.get_u32();
    let x = body.get_f32();
    let y = body.get_f32();
    let z = body.get_f32();

    let stage = match ctx.session.stage() {
        Some(stage) => stage,
        None => {
            debug!(object = object_id, "position update outside a stage");
            return Ok(());
        }
    };

    if !stage.update_object_position(object_id, x, y, z) {
        debug!(object = object_id, "position update for unknown object");
        return Ok(());
    }

    let mut packet = BytesMut::with_capacity(2 + 16);
    packet.put_u16(PacketId::SYS_POSITION_OBJECT.0);
    packet.put_u32(object_id);
    packet.put_f32(x);
    packet.put_f32(y);
    packet.put_f32(z);

    ctx.metrics.broadcasts_total.fetch_add(1, Ordering::Relaxed);
    stage.broadcast(&packet.freeze(), Some(ctx.session.session_id()));
    Ok(())
}
