use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use mgrpc_transport::{ClientIdentity, JunkHandler, RetryPolicy, TlsSettings};

use crate::error::{ClientError, Result};

/// Transport used to reach the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// `ws://` or `wss://`.
    WebSocket,
    /// `tcp://host:port` or a bare `host:port`.
    PlainTcp,
    /// `http://` or `https://`, one POST per request.
    HttpPost,
    /// `serial:///dev/ttyUSB0` or a bare device path.
    Serial,
}

/// Windows serial port name: `COM` followed only by digits.
fn is_com_port(address: &str) -> bool {
    address
        .to_ascii_uppercase()
        .strip_prefix("COM")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

impl TransportKind {
    /// Infer the transport from an address.
    ///
    /// Returns `None` for schemes no transport understands. Bare
    /// `host:port` addresses resolve to TCP.
    pub fn from_address(address: &str) -> Option<Self> {
        if let Some((scheme, _)) = address.split_once("://") {
            return match scheme.to_ascii_lowercase().as_str() {
                "ws" | "wss" => Some(Self::WebSocket),
                "tcp" => Some(Self::PlainTcp),
                "http" | "https" => Some(Self::HttpPost),
                "serial" => Some(Self::Serial),
                _ => None,
            };
        }
        if address.starts_with('/') || is_com_port(address) {
            return Some(Self::Serial);
        }
        if address.rsplit_once(':').is_some() {
            return Some(Self::PlainTcp);
        }
        None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::PlainTcp => "tcp",
            Self::HttpPost => "http-post",
            Self::Serial => "serial",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ws" | "wss" | "websocket" => Ok(Self::WebSocket),
            "tcp" => Ok(Self::PlainTcp),
            "http" | "https" | "http-post" => Ok(Self::HttpPost),
            "serial" => Ok(Self::Serial),
            other => Err(ClientError::Config(format!("unknown transport: {other}"))),
        }
    }
}

/// Options for [`Client::connect`](crate::Client::connect).
///
/// ```
/// use mgrpc_client::ConnectOptions;
///
/// let options = ConnectOptions::default()
///     .with_local_id("laptop")
///     .with_server_name("device.local");
/// assert_eq!(options.local_id(), "laptop");
/// ```
#[derive(Clone, Default)]
pub struct ConnectOptions {
    transport: Option<TransportKind>,
    local_id: String,
    tls: TlsSettings,
    reconnect_serial: bool,
    retry_policy: RetryPolicy,
    enable_ubjson: bool,
    junk_handler: Option<JunkHandler>,
    fail_fast_send: bool,
}

impl ConnectOptions {
    /// Force a transport instead of inferring it from the address.
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Identity placed in the `src` field of every outgoing frame.
    pub fn with_local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = local_id.into();
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    /// Trust an extra root certificate (PEM).
    pub fn with_root_cert_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.tls.root_certs_pem.push(pem.into());
        self
    }

    /// Verify the server certificate against `name` instead of the URL host.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.tls.server_name = Some(name.into());
        self
    }

    /// Present a client certificate (PEM certificate, PKCS#8 PEM key).
    pub fn with_client_identity(
        mut self,
        cert_pem: impl Into<Vec<u8>>,
        key_pem: impl Into<Vec<u8>>,
    ) -> Self {
        self.tls.identity = Some(ClientIdentity {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        });
        self
    }

    /// Rebuild a serial transport when it fails.
    ///
    /// WebSocket and TCP transports always reconnect; HTTP never does.
    pub fn with_reconnect(mut self, enabled: bool) -> Self {
        self.reconnect_serial = enabled;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Advertise UBJSON in the WebSocket encoding negotiation.
    ///
    /// Off by default: frames are always sent as JSON and binary messages
    /// are rejected, so a peer that picks UBJSON cannot be understood.
    /// Note that peers commonly default to advertising UBJSON; turning it on
    /// here only makes sense against a server that still answers in JSON.
    pub fn with_ubjson(mut self, enabled: bool) -> Self {
        self.enable_ubjson = enabled;
        self
    }

    /// Called with every run of non-frame bytes read from a serial device.
    pub fn with_junk_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.junk_handler = Some(Arc::new(handler));
        self
    }

    /// Fail a call as soon as its request cannot be sent.
    ///
    /// By default a send failure is logged and the call keeps waiting for
    /// a response, its deadline, or the connection to drop.
    pub fn with_fail_fast_send(mut self, enabled: bool) -> Self {
        self.fail_fast_send = enabled;
        self
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn tls(&self) -> &TlsSettings {
        &self.tls
    }

    pub fn reconnect_serial(&self) -> bool {
        self.reconnect_serial
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn ubjson(&self) -> bool {
        self.enable_ubjson
    }

    pub fn junk_handler(&self) -> Option<&JunkHandler> {
        self.junk_handler.as_ref()
    }

    pub fn fail_fast_send(&self) -> bool {
        self.fail_fast_send
    }

    /// The transport for `address`: the forced one, or the inferred one.
    pub fn resolve_transport(&self, address: &str) -> Result<TransportKind> {
        if let Some(kind) = self.transport {
            return Ok(kind);
        }
        TransportKind::from_address(address).ok_or_else(|| {
            ClientError::Config(format!("cannot infer a transport for address {address:?}"))
        })
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("transport", &self.transport)
            .field("local_id", &self.local_id)
            .field("tls", &self.tls)
            .field("reconnect_serial", &self.reconnect_serial)
            .field("retry_policy", &self.retry_policy)
            .field("enable_ubjson", &self.enable_ubjson)
            .field("junk_handler", &self.junk_handler.is_some())
            .field("fail_fast_send", &self.fail_fast_send)
            .finish()
    }
}
