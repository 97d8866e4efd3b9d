//! Per-connection session worker.
//!
//! Each accepted connection gets one long-lived worker: a recv loop that
//! blocks on `read_packet` and a dedicated writer task draining a bounded
//! send queue. Direct replies and stage broadcasts both go through the
//! queue, so exactly one task ever writes to the socket and header/body
//! bytes can never interleave.
//!
//! The writer appends the group terminator to every queued payload before
//! encryption. A send-queue overflow drops the packet (the peer is
//! already drowning); a write-deadline overrun or any socket error ends
//! the writer, and the recv loop's next read fails and tears the session
//! down: stages are purged, owned objects despawned, socket closed.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SessionConfig;
use crate::core::codec::CryptCodec;
use crate::error::{ProtocolError, Result};
use crate::protocol::{Dispatcher, PacketId};
use crate::stage::stage::StageSession;
use crate::stage::{SessionId, Stage, StageRegistry};
use crate::transport::conn::CryptConn;
use crate::utils::metrics::Metrics;

/// State for one connected client, shared between its worker, the stage
/// registry, and any broadcasting peer.
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    char_id: AtomicU32,
    name: RwLock<String>,
    current_stage: Mutex<Option<Arc<Stage>>>,
    send_tx: mpsc::Sender<Bytes>,
    metrics: Arc<Metrics>,
}

impl Session {
    fn new(
        id: SessionId,
        peer: SocketAddr,
        send_tx: mpsc::Sender<Bytes>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            id,
            peer,
            char_id: AtomicU32::new(0),
            name: RwLock::new(String::new()),
            current_stage: Mutex::new(None),
            send_tx,
            metrics,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn set_char_id(&self, char_id: u32) {
        self.char_id.store(char_id, Ordering::Relaxed);
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name.into();
    }

    /// The stage this session is currently in, if any.
    pub fn stage(&self) -> Option<Arc<Stage>> {
        self.current_stage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_stage(&self, stage: Option<Arc<Stage>>) {
        *self
            .current_stage
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = stage;
    }

    /// Queue an `[opcode][ack_handle][data]` acknowledgement.
    pub fn queue_ack(&self, ack_handle: u32, data: &[u8]) -> bool {
        let mut buf = BytesMut::with_capacity(2 + 4 + data.len());
        buf.put_u16(PacketId::SYS_ACK.0);
        buf.put_u32(ack_handle);
        buf.put_slice(data);
        self.enqueue_packet(buf.freeze())
    }
}

impl StageSession for Session {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn enqueue_packet(&self, packet: Bytes) -> bool {
        let len = packet.len();
        match self.send_tx.try_send(packet) {
            Ok(()) => {
                self.metrics.packet_sent(len);
                true
            }
            Err(_) => {
                // Couldn't enqueue, likely something wrong with the connection.
                warn!(
                    session = %self.id,
                    "dropped packet for session because of full send buffer"
                );
                self.metrics
                    .broadcast_drops
                    .fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn char_id(&self) -> u32 {
        self.char_id.load(Ordering::Relaxed)
    }

    fn display_name(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Everything a message handler can reach.
pub struct SessionContext {
    pub session: Arc<Session>,
    pub stages: Arc<StageRegistry>,
    pub metrics: Arc<Metrics>,
}

/// Drive one accepted connection to completion.
///
/// Returns once the peer disconnects or a fatal transport error tears
/// the connection down; the session is removed from every stage either
/// way.
pub async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    id: SessionId,
    dispatcher: Arc<Dispatcher<SessionContext>>,
    stages: Arc<StageRegistry>,
    metrics: Arc<Metrics>,
    config: SessionConfig,
    expect_null_init: bool,
) -> Result<()> {
    let span = info_span!("session", %id, %peer);
    async {
        let codec = CryptCodec::with_metrics(Arc::clone(&metrics));
        let conn = if expect_null_init {
            CryptConn::accept_with(stream, codec).await?
        } else {
            CryptConn::with_codec(stream, codec)
        };
        info!("got connection");

        let (mut reader, mut writer) = conn.split();
        let (send_tx, mut send_rx) = mpsc::channel::<Bytes>(config.send_queue_depth);
        let session = Arc::new(Session::new(id, peer, send_tx, Arc::clone(&metrics)));

        let write_deadline = config.write_deadline;
        let writer_task = tokio::spawn(async move {
            while let Some(packet) = send_rx.recv().await {
                let mut terminated = BytesMut::with_capacity(packet.len() + 2);
                terminated.put_slice(&packet);
                terminated.put_u16(PacketId::SYS_END.0);

                let result = match write_deadline {
                    Some(deadline) => match timeout(deadline, writer.send_packet(terminated.freeze())).await {
                        Ok(result) => result,
                        Err(_) => Err(ProtocolError::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "write deadline exceeded",
                        ))),
                    },
                    None => writer.send_packet(terminated.freeze()).await,
                };

                if let Err(e) = result {
                    warn!(error = %e, "error on send, exiting send loop");
                    break;
                }
            }
        });

        let ctx = SessionContext {
            session: Arc::clone(&session),
            stages: Arc::clone(&stages),
            metrics: Arc::clone(&metrics),
        };

        let exit = loop {
            match reader.read_packet().await {
                Ok(payload) => {
                    metrics.packet_received(payload.len());
                    match handle_packet_group(&dispatcher, &ctx, payload) {
                        Ok(()) => {}
                        // Logout is a clean exit, not a failure.
                        Err(ProtocolError::ConnectionClosed) => break Ok(()),
                        Err(ProtocolError::NotImplemented(opcode)) => {
                            warn!(
                                opcode = %PacketId(opcode),
                                "opcode not implemented, dropping rest of packet group"
                            );
                        }
                        Err(ProtocolError::MalformedBody { opcode, reason }) => {
                            warn!(
                                opcode = %PacketId(opcode),
                                reason,
                                "malformed message body, dropping rest of packet group"
                            );
                        }
                        Err(e) => break Err(e),
                    }
                }
                Err(ProtocolError::ConnectionClosed) => {
                    info!(name = %session.display_name(), "disconnected");
                    break Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "error on read, exiting recv loop");
                    break Err(e);
                }
            }
        };

        let evicted = stages.remove_session(session.session_id(), session.char_id());
        if evicted > 0 {
            debug!(stages = evicted, "removed session from stages");
        }
        session.set_stage(None);

        // Dropping the last session handle closes the queue; the writer
        // drains what is left and exits.
        drop(ctx);
        drop(session);
        let _ = writer_task.await;

        exit
    }
    .instrument(span)
    .await
}

/// Walk one decrypted payload: `[opcode][body]` repeated until the group
/// terminator. Each handler consumes exactly its own fields; whatever
/// remains is dispatched as the next message.
fn handle_packet_group(
    dispatcher: &Dispatcher<SessionContext>,
    ctx: &SessionContext,
    group: Bytes,
) -> Result<()> {
    let mut body = group;
    while body.len() >= 2 {
        let opcode = PacketId(body.get_u16());
        if opcode == PacketId::SYS_END {
            break;
        }
        if opcode == PacketId::SYS_LOGOUT {
            return Err(ProtocolError::ConnectionClosed);
        }
        dispatcher.dispatch(opcode, ctx, &mut body)?;
    }
    Ok(())
}
