//! Builds the codec stack for an address.
//!
//! WebSocket and TCP transports are always wrapped in a
//! [`ReconnectCodec`]; serial only when requested; HTTP never, since every
//! POST is already a fresh request.

use std::sync::Arc;

use futures_util::FutureExt;
use mgrpc_transport::{Codec, CodecFactory, JunkHandler, ReconnectCodec, SerialCodec, TcpCodec};
use tracing::info;

use crate::error::Result;
use crate::options::{ConnectOptions, TransportKind};

/// Dial `address` and return the codec the client should talk through.
///
/// Fails without side effects when the transport cannot be determined or
/// was not compiled in.
pub async fn connect_codec(address: &str, options: &ConnectOptions) -> Result<Box<dyn Codec>> {
    let kind = options.resolve_transport(address)?;
    info!(address, transport = %kind, "connecting");

    let codec: Box<dyn Codec> = match kind {
        TransportKind::WebSocket => reconnecting(address, ws_factory(options)?, options).await?,
        TransportKind::PlainTcp => reconnecting(address, tcp_factory(), options).await?,
        TransportKind::Serial if options.reconnect_serial() => {
            let factory = serial_factory(options.junk_handler().cloned());
            reconnecting(address, factory, options).await?
        }
        TransportKind::Serial => {
            let junk = options.junk_handler().cloned();
            Box::new(SerialCodec::open(address, junk).await?)
        }
        TransportKind::HttpPost => http_codec(address, options)?,
    };
    Ok(codec)
}

async fn reconnecting(
    address: &str,
    factory: CodecFactory,
    options: &ConnectOptions,
) -> Result<Box<dyn Codec>> {
    let codec = ReconnectCodec::connect(address, factory, options.retry_policy().clone()).await?;
    Ok(Box::new(codec))
}

fn tcp_factory() -> CodecFactory {
    Arc::new(|address: String| {
        async move {
            let codec = TcpCodec::connect(&address).await?;
            Ok(Box::new(codec) as Box<dyn Codec>)
        }
        .boxed()
    })
}

fn serial_factory(junk: Option<JunkHandler>) -> CodecFactory {
    Arc::new(move |address: String| {
        let junk = junk.clone();
        async move {
            let codec = SerialCodec::open(&address, junk).await?;
            Ok(Box::new(codec) as Box<dyn Codec>)
        }
        .boxed()
    })
}

#[cfg(feature = "ws")]
fn ws_factory(options: &ConnectOptions) -> Result<CodecFactory> {
    use mgrpc_transport::{WsCodec, WsConfig};

    let config = WsConfig {
        enable_ubjson: options.ubjson(),
        tls: options.tls().clone(),
    };
    Ok(Arc::new(move |address: String| {
        let config = config.clone();
        async move {
            let codec = WsCodec::connect(&address, &config).await?;
            Ok(Box::new(codec) as Box<dyn Codec>)
        }
        .boxed()
    }))
}

#[cfg(not(feature = "ws"))]
fn ws_factory(_options: &ConnectOptions) -> Result<CodecFactory> {
    Err(crate::ClientError::Config(
        "websocket transport not compiled in (enable the `ws` feature)".to_string(),
    ))
}

#[cfg(feature = "http")]
fn http_codec(address: &str, options: &ConnectOptions) -> Result<Box<dyn Codec>> {
    let codec = mgrpc_transport::HttpCodec::new(address, options.tls())?;
    Ok(Box::new(codec))
}

#[cfg(not(feature = "http"))]
fn http_codec(_address: &str, _options: &ConnectOptions) -> Result<Box<dyn Codec>> {
    Err(crate::ClientError::Config(
        "http transport not compiled in (enable the `http` feature)".to_string(),
    ))
}
