//! Encrypted two-way connection handling.

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::core::codec::CryptCodec;
use crate::error::{constants, ProtocolError, Result};

/// Length of the one-time null buffer a client sends after connecting.
pub const NULL_INIT_LEN: usize = 8;

/// An encrypted two-way connection. Handles encryption, decryption, and
/// key rotation behind `read_packet`/`send_packet`.
pub struct CryptConn<T> {
    framed: Framed<T, CryptCodec>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> CryptConn<T> {
    /// Wrap an already-initialized stream with fresh key state.
    pub fn new(stream: T) -> Self {
        Self::with_codec(stream, CryptCodec::new())
    }

    /// Wrap a stream with an explicitly constructed codec.
    pub fn with_codec(stream: T, codec: CryptCodec) -> Self {
        Self {
            framed: Framed::new(stream, codec),
        }
    }

    /// Server side: read and discard the client's 8-byte null init, then
    /// wrap the stream. A short read aborts the connection.
    pub async fn accept(stream: T) -> Result<Self> {
        Self::accept_with(stream, CryptCodec::new()).await
    }

    /// [`CryptConn::accept`] with an explicitly constructed codec.
    pub async fn accept_with(mut stream: T, codec: CryptCodec) -> Result<Self> {
        let mut null_init = [0u8; NULL_INIT_LEN];
        stream
            .read_exact(&mut null_init)
            .await
            .map_err(|_| ProtocolError::HandshakeError(constants::ERR_NULL_INIT))?;
        debug!("read null init");
        Ok(Self::with_codec(stream, codec))
    }

    /// Client side: send the 8-byte null init, then wrap the stream.
    /// Used by tooling and tests standing in for the real client.
    pub async fn connect(mut stream: T) -> Result<Self> {
        stream.write_all(&[0u8; NULL_INIT_LEN]).await?;
        Ok(Self::new(stream))
    }

    /// Read the next packet and return the decrypted payload.
    pub async fn read_packet(&mut self) -> Result<Bytes> {
        match self.framed.next().await {
            Some(frame) => frame,
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Encrypt and send one packet.
    pub async fn send_packet(&mut self, data: Bytes) -> Result<()> {
        self.framed.send(data).await
    }

    /// Split into independently owned read and write halves so a single
    /// writer task can serialize all socket writes while the read loop
    /// blocks on the next frame.
    pub fn split(self) -> (CryptReadHalf<T>, CryptWriteHalf<T>) {
        let (sink, stream) = self.framed.split();
        (
            CryptReadHalf { inner: stream },
            CryptWriteHalf { inner: sink },
        )
    }
}

/// Read half of a split [`CryptConn`].
pub struct CryptReadHalf<T> {
    inner: SplitStream<Framed<T, CryptCodec>>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> CryptReadHalf<T> {
    /// Read the next packet and return the decrypted payload.
    pub async fn read_packet(&mut self) -> Result<Bytes> {
        match self.inner.next().await {
            Some(frame) => frame,
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

/// Write half of a split [`CryptConn`].
pub struct CryptWriteHalf<T> {
    inner: SplitSink<Framed<T, CryptCodec>, Bytes>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> CryptWriteHalf<T> {
    /// Encrypt and send one packet.
    pub async fn send_packet(&mut self, data: Bytes) -> Result<()> {
        self.inner.send(data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_discards_null_init_then_reads_frames() {
        let (client_io, server_io) = tokio::io::duplex(4096);

        let server = tokio::spawn(async move {
            let mut conn = CryptConn::accept(server_io).await.expect("null init");
            conn.read_packet().await.expect("first packet")
        });

        let mut client = CryptConn::connect(client_io).await.expect("connect");
        client
            .send_packet(Bytes::from_static(b"hello"))
            .await
            .expect("send");

        let payload = server.await.expect("join");
        assert_eq!(&payload[..], b"hello");
    }

    #[tokio::test]
    async fn accept_fails_on_short_null_init() {
        let (mut client_io, server_io) = tokio::io::duplex(64);

        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = client_io.write_all(&[0u8; 3]).await;
            client_io.shutdown().await.expect("shutdown");
        });

        let err = CryptConn::accept(server_io).await.err().expect("aborts");
        assert!(matches!(err, ProtocolError::HandshakeError(_)));
    }

    #[tokio::test]
    async fn split_halves_read_and_write_independently() {
        let (client_io, server_io) = tokio::io::duplex(4096);

        let client = CryptConn::connect(client_io).await.expect("connect");
        let (mut client_read, mut client_write) = client.split();

        let server = tokio::spawn(async move {
            let conn = CryptConn::accept(server_io).await.expect("accept");
            let (mut read, mut write) = conn.split();
            let pkt = read.read_packet().await.expect("request");
            write.send_packet(pkt).await.expect("echo");
        });

        client_write
            .send_packet(Bytes::from_static(b"ping"))
            .await
            .expect("send");
        let echoed = client_read.read_packet().await.expect("echo");
        assert_eq!(&echoed[..], b"ping");

        server.await.expect("join");
    }

    #[tokio::test]
    async fn clean_eof_reports_connection_closed() {
        let (client_io, server_io) = tokio::io::duplex(64);

        let mut conn = CryptConn::new(server_io);
        drop(client_io);

        let err = conn.read_packet().await.err().expect("closed");
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }
}
