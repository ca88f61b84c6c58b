/// Client certificate and private key, both PEM encoded (PKCS#8 key).
#[derive(Clone)]
pub struct ClientIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_pem", &format_args!("<{} bytes>", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// TLS material for `wss://` and `https://` transports.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// Extra trusted root certificates (PEM). Empty means system roots only.
    pub root_certs_pem: Vec<Vec<u8>>,
    /// Name to verify the server certificate against, instead of the URL host.
    pub server_name: Option<String>,
    /// Client certificate presented during the handshake.
    pub identity: Option<ClientIdentity>,
}

impl TlsSettings {
    /// The name to verify, falling back to the URL host.
    pub fn server_name_or<'a>(&'a self, host: &'a str) -> &'a str {
        self.server_name.as_deref().unwrap_or(host)
    }

    #[cfg(feature = "ws")]
    pub(crate) fn native_connector(&self) -> crate::Result<native_tls::TlsConnector> {
        let mut builder = native_tls::TlsConnector::builder();
        for pem in &self.root_certs_pem {
            builder.add_root_certificate(native_tls::Certificate::from_pem(pem)?);
        }
        if let Some(identity) = &self.identity {
            builder.identity(native_tls::Identity::from_pkcs8(
                &identity.cert_pem,
                &identity.key_pem,
            )?);
        }
        Ok(builder.build()?)
    }

    #[cfg(feature = "http")]
    pub(crate) fn apply_to_http(
        &self,
        mut builder: reqwest::ClientBuilder,
    ) -> crate::Result<reqwest::ClientBuilder> {
        for pem in &self.root_certs_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }
        if let Some(identity) = &self.identity {
            builder = builder.identity(reqwest::Identity::from_pkcs8_pem(
                &identity.cert_pem,
                &identity.key_pem,
            )?);
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_override_wins() {
        let settings = TlsSettings {
            server_name: Some("device.example".to_string()),
            ..TlsSettings::default()
        };
        assert_eq!(settings.server_name_or("10.0.0.7"), "device.example");
        assert_eq!(TlsSettings::default().server_name_or("10.0.0.7"), "10.0.0.7");
    }

    #[test]
    fn identity_debug_redacts_key() {
        let identity = ClientIdentity {
            cert_pem: b"-----BEGIN CERTIFICATE-----".to_vec(),
            key_pem: b"secret".to_vec(),
        };
        let rendered = format!("{identity:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
