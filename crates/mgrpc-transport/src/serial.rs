use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use mgrpc_frame::{Frame, SerialFrameCodec, SerialItem};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::Codec;

/// Receives bytes a device printed outside protocol frames.
pub type JunkHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// `"""`-delimited JSON frames over a serial device.
///
/// The device must already be configured (baud rate, raw mode); the codec
/// only opens the character device for reading and writing.
pub struct SerialCodec {
    reader: Mutex<FramedRead<BoxedReader, SerialFrameCodec>>,
    writer: Mutex<FramedWrite<BoxedWriter, SerialFrameCodec>>,
    junk_handler: Option<JunkHandler>,
    closed: CancellationToken,
}

impl SerialCodec {
    /// Open `address` (`serial:///dev/ttyUSB0` or a bare device path).
    pub async fn open(address: &str, junk_handler: Option<JunkHandler>) -> Result<Self> {
        let path = parse_serial_address(address)?;
        let connect_err = |source| TransportError::Connect {
            address: address.to_string(),
            source,
        };
        // Separate handles so a parked read never blocks a write.
        let read_file = tokio::fs::OpenOptions::new()
            .read(true)
            .open(path)
            .await
            .map_err(connect_err)?;
        let write_file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(connect_err)?;
        debug!(path, "opened serial device");
        Ok(Self::from_parts(read_file, write_file, junk_handler))
    }

    /// Build from separate read and write halves.
    pub fn from_parts<R, W>(reader: R, writer: W, junk_handler: Option<JunkHandler>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);
        Self {
            reader: Mutex::new(FramedRead::new(reader, SerialFrameCodec::new())),
            writer: Mutex::new(FramedWrite::new(writer, SerialFrameCodec::new())),
            junk_handler,
            closed: CancellationToken::new(),
        }
    }

    fn on_junk(&self, junk: &[u8]) {
        match &self.junk_handler {
            Some(handler) => handler(junk),
            None => trace!(len = junk.len(), "discarding serial junk"),
        }
    }
}

pub(crate) fn parse_serial_address(address: &str) -> Result<&str> {
    let path = address.strip_prefix("serial://").unwrap_or(address);
    if path.is_empty() {
        return Err(TransportError::invalid_address(address, "empty device path"));
    }
    Ok(path)
}

#[async_trait]
impl Codec for SerialCodec {
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
        loop {
            let next = tokio::select! {
                _ = self.closed.cancelled() => return Err(TransportError::Closed),
                next = reader.next() => next,
            };
            match next {
                Some(Ok(SerialItem::Frame(frame))) => return Ok(frame),
                Some(Ok(SerialItem::Junk(junk))) => self.on_junk(&junk),
                Some(Err(err)) => return Err(err.into()),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.get_mut().shutdown().await {
            debug!(error = %err, "serial shutdown failed");
        }
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "serial"
    }
}
