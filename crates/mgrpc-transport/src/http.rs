use async_trait::async_trait;
use mgrpc_frame::Frame;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::tls::TlsSettings;
use crate::traits::Codec;

/// One HTTP POST per outbound frame; reply frames from response bodies are
/// queued for [`recv`](Codec::recv).
///
/// There is no persistent connection to lose, so this codec is never wrapped
/// in a [`ReconnectCodec`](crate::ReconnectCodec).
pub struct HttpCodec {
    client: reqwest::Client,
    url: String,
    inbox_tx: mpsc::UnboundedSender<Frame>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
    closed: CancellationToken,
}

impl HttpCodec {
    /// Build a codec posting to `url` (`http://` or `https://`).
    pub fn new(url: &str, tls: &TlsSettings) -> Result<Self> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(TransportError::invalid_address(
                url,
                "expected http:// or https:// scheme",
            ));
        }
        if tls.server_name.is_some() {
            debug!(url, "server name override is not applied to http transport");
        }
        let builder = tls.apply_to_http(reqwest::Client::builder())?;
        let client = builder.build()?;
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Ok(Self {
            client,
            url: url.to_string(),
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            closed: CancellationToken::new(),
        })
    }

    async fn post(&self, frame: Frame) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(frame.to_json()?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let reply = Frame::from_json(&body)?;
        // The receiver lives as long as `self`.
        let _ = self.inbox_tx.send(reply);
        Ok(())
    }
}

#[async_trait]
impl Codec for HttpCodec {
    async fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            res = self.post(frame) => res,
        }
    }

    async fn recv(&self) -> Result<Frame> {
        let mut inbox = self.inbox_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            frame = inbox.recv() => frame.ok_or(TransportError::Closed),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "http-post"
    }
}
