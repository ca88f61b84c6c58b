use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use mgrpc_frame::Frame;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{
    HeaderValue, SEC_WEBSOCKET_EXTENSIONS, SEC_WEBSOCKET_PROTOCOL,
};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::keepalive::{enable_keepalive, TCP_KEEPALIVE_INTERVAL};
use crate::tls::TlsSettings;
use crate::traits::Codec;

/// WebSocket subprotocol spoken by mgrpc peers.
pub const WS_PROTOCOL: &str = "clubby.cesanta.com";

/// Extension used to negotiate frame encodings.
pub const WS_ENCODING_EXTENSION: &str = "clubby.cesanta.com-encoding";

/// WebSocket dial configuration.
#[derive(Debug, Clone, Default)]
pub struct WsConfig {
    /// Advertise UBJSON ahead of JSON in the encoding extension.
    pub enable_ubjson: bool,
    /// TLS material used for `wss://` URLs.
    pub tls: TlsSettings,
}

impl WsConfig {
    /// Encodings in preference order.
    pub fn encodings(&self) -> &'static [&'static str] {
        if self.enable_ubjson {
            &["ubjson", "json"]
        } else {
            &["json"]
        }
    }

    /// Value of the `Sec-WebSocket-Extensions` request header.
    pub fn extension_header(&self) -> String {
        let list = self.encodings().join("|");
        format!("{WS_ENCODING_EXTENSION}; in={list}; out={list}")
    }
}

type BoxedSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
type BoxedStream = Pin<Box<dyn Stream<Item = std::result::Result<Message, WsError>> + Send>>;

/// JSON frames carried in WebSocket text messages.
pub struct WsCodec {
    sink: Mutex<BoxedSink>,
    stream: Mutex<BoxedStream>,
    closed: CancellationToken,
}

#[derive(Debug, PartialEq)]
struct Target {
    secure: bool,
    host: String,
    port: u16,
}

fn parse_ws_url(url: &str) -> Result<Target> {
    let uri: Uri = url
        .parse()
        .map_err(|err: tokio_tungstenite::tungstenite::http::uri::InvalidUri| {
            TransportError::invalid_address(url, err.to_string())
        })?;
    let secure = match uri.scheme_str() {
        Some("ws") => false,
        Some("wss") => true,
        _ => {
            return Err(TransportError::invalid_address(
                url,
                "expected ws:// or wss:// scheme",
            ))
        }
    };
    let host = uri
        .host()
        .map(|host| host.trim_start_matches('[').trim_end_matches(']'))
        .filter(|host| !host.is_empty())
        .ok_or_else(|| TransportError::invalid_address(url, "missing host"))?;
    let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
    Ok(Target {
        secure,
        host: host.to_string(),
        port,
    })
}

impl WsCodec {
    /// Dial `url`, enable keep-alive, wrap in TLS for `wss://`, and perform
    /// the WebSocket handshake with the mgrpc subprotocol.
    pub async fn connect(url: &str, config: &WsConfig) -> Result<Self> {
        let target = parse_ws_url(url)?;
        let tcp = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|source| TransportError::Connect {
                address: url.to_string(),
                source,
            })?;
        enable_keepalive(&tcp, TCP_KEEPALIVE_INTERVAL)?;

        let stream = if target.secure {
            let connector = tokio_native_tls::TlsConnector::from(config.tls.native_connector()?);
            let domain = config.tls.server_name_or(&target.host);
            MaybeTlsStream::NativeTls(connector.connect(domain, tcp).await?)
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        let codec = Self::handshake(url, stream, config).await?;
        debug!(url, secure = target.secure, "connected over websocket");
        Ok(codec)
    }

    /// Run the client handshake over an established byte stream.
    pub async fn handshake<S>(url: &str, stream: S, config: &WsConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut request = url.into_client_request()?;
        let extensions = HeaderValue::from_str(&config.extension_header())
            .map_err(|err| TransportError::invalid_address(url, err.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(WS_PROTOCOL));
        headers.insert(SEC_WEBSOCKET_EXTENSIONS, extensions);

        let (ws, _response) = tokio_tungstenite::client_async(request, stream).await?;
        Ok(Self::from_stream(ws))
    }

    /// Wrap an already-upgraded WebSocket.
    pub fn from_stream<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(Box::pin(sink)),
            stream: Mutex::new(Box::pin(stream)),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Codec for WsCodec {
    async fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let text = frame.to_json_string()?;
        let mut sink = self.sink.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            res = sink.send(Message::text(text)) => res.map_err(TransportError::from),
        }
    }

    async fn recv(&self) -> Result<Frame> {
        let mut stream = self.stream.lock().await;
        loop {
            let next = tokio::select! {
                _ = self.closed.cancelled() => return Err(TransportError::Closed),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Message::Text(text))) => return Ok(Frame::from_json(text.as_bytes())?),
                Some(Ok(Message::Binary(data))) => {
                    return Err(TransportError::UnsupportedEncoding(format!(
                        "binary message ({} bytes); only json is supported",
                        data.len()
                    )))
                }
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        let mut sink = self.sink.lock().await;
        if let Err(err) = sink.close().await {
            debug!(error = %err, "websocket close failed");
        }
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "websocket"
    }
}
