use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use mgrpc_frame::Frame;

use crate::error::Result;

/// A bidirectional frame transport.
///
/// Implementations must allow `send` to be called concurrently from many
/// tasks while a single task is parked in `recv`. An error from `recv` means
/// the transport is dead. `close` must unblock a pending `recv` and be safe
/// to call more than once.
#[async_trait]
pub trait Codec: Send + Sync {
    /// Send one frame.
    async fn send(&self, frame: Frame) -> Result<()>;

    /// Wait for the next inbound frame.
    async fn recv(&self) -> Result<Frame>;

    /// Release transport resources.
    async fn close(&self) -> Result<()>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

/// Builds a fresh codec for an address; used by [`ReconnectCodec`](crate::ReconnectCodec).
pub type CodecFactory =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<Box<dyn Codec>>> + Send + Sync>;

#[async_trait]
impl<C: Codec + ?Sized> Codec for Box<C> {
    async fn send(&self, frame: Frame) -> Result<()> {
        (**self).send(frame).await
    }

    async fn recv(&self) -> Result<Frame> {
        (**self).recv().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}

#[async_trait]
impl<C: Codec + ?Sized> Codec for Arc<C> {
    async fn send(&self, frame: Frame) -> Result<()> {
        (**self).send(frame).await
    }

    async fn recv(&self) -> Result<Frame> {
        (**self).recv().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}
