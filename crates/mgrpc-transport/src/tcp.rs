use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use mgrpc_frame::{Frame, LengthPrefixedCodec};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::keepalive::{enable_keepalive, TCP_KEEPALIVE_INTERVAL};
use crate::traits::Codec;

trait Io: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

type BoxedIo = Box<dyn Io>;

/// Length-prefixed JSON frames over a byte stream (usually TCP).
pub struct TcpCodec {
    reader: Mutex<FramedRead<ReadHalf<BoxedIo>, LengthPrefixedCodec>>,
    writer: Mutex<FramedWrite<WriteHalf<BoxedIo>, LengthPrefixedCodec>>,
    closed: CancellationToken,
}

impl TcpCodec {
    /// Dial `address` (`tcp://host:port` or bare `host:port`) with keep-alive enabled.
    pub async fn connect(address: &str) -> Result<Self> {
        let target = parse_tcp_address(address)?;
        let stream = TcpStream::connect(target)
            .await
            .map_err(|source| TransportError::Connect {
                address: address.to_string(),
                source,
            })?;
        enable_keepalive(&stream, TCP_KEEPALIVE_INTERVAL)?;
        stream.set_nodelay(true)?;
        debug!(address, "connected over tcp");
        Ok(Self::from_io(stream))
    }

    /// Wrap an already-connected stream.
    pub fn from_io<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_io_with_codec(io, LengthPrefixedCodec::new())
    }

    /// Wrap an already-connected stream with explicit framing limits.
    pub fn from_io_with_codec<T>(io: T, codec: LengthPrefixedCodec) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: BoxedIo = Box::new(io);
        let (read_half, write_half) = tokio::io::split(boxed);
        Self {
            reader: Mutex::new(FramedRead::new(read_half, codec.clone())),
            writer: Mutex::new(FramedWrite::new(write_half, codec)),
            closed: CancellationToken::new(),
        }
    }
}

/// Strip an optional `tcp://` scheme and validate `host:port`.
pub(crate) fn parse_tcp_address(address: &str) -> Result<&str> {
    let target = address.strip_prefix("tcp://").unwrap_or(address);
    match target.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(target),
        _ => Err(TransportError::invalid_address(
            address,
            "expected host:port",
        )),
    }
}

#[async_trait]
impl Codec for TcpCodec {
    async fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            res = writer.send(frame) => res.map_err(TransportError::from),
        }
    }

    async fn recv(&self) -> Result<Frame> {
        let mut reader = self.reader.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            next = reader.next() => match next {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(err)) => Err(err.into()),
                None => Err(TransportError::ConnectionClosed),
            },
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.get_mut().shutdown().await {
            debug!(error = %err, "tcp shutdown failed");
        }
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "tcp"
    }
}
