//! Router registration.
//!
//! On startup the rack asks the router for its version over HTTPS. The
//! router presents a self-signed certificate, so verification is disabled.
//! If the router runs an older release it is told to terminate so it can be
//! replaced; that request is fire-and-forget.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use keel_core::KeelConfig;
use rustls::pki_types::ServerName;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};

/// Applies to the whole version round trip and to the terminate request.
pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Router versions that are never replaced.
const DEVELOPMENT_VERSIONS: &[&str] = &["dev", "development"];

const DEFAULT_ROUTER_PORT: u16 = 443;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Router set to `none`.
    Disabled,
    /// The router is a development build or not older than us.
    Current { router_version: String },
    /// The router is older; a terminate request has been sent.
    Superseded { router_version: String },
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(rename = "Version")]
    version: String,
}

/// Check in with the configured router.
pub async fn register(config: &KeelConfig) -> ProviderResult<Registration> {
    if !config.router_enabled() {
        info!("router registration disabled");
        return Ok(Registration::Disabled);
    }

    let client = RouterClient::new(&config.router)?;
    let router_version = client.version().await?;

    if should_supersede(&router_version, &config.version) {
        info!(
            router = %config.router,
            %router_version,
            version = %config.version,
            "router is older, requesting termination"
        );
        client.terminate_in_background();
        Ok(Registration::Superseded { router_version })
    } else {
        debug!(router = %config.router, %router_version, "router is current");
        Ok(Registration::Current { router_version })
    }
}

/// Whether a router at `router_version` should make way for `ours`.
///
/// Versions are compared as plain strings.
pub fn should_supersede(router_version: &str, ours: &str) -> bool {
    !DEVELOPMENT_VERSIONS.contains(&router_version) && router_version < ours
}

#[derive(Clone)]
struct RouterClient {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    connector: TlsConnector,
}

impl RouterClient {
    fn new(router: &str) -> ProviderResult<Self> {
        let (host, port) = split_authority(router);
        let server_name = ServerName::try_from(host.clone()).map_err(|e| {
            ProviderError::Registration(format!("invalid router address {router:?}: {e}"))
        })?;

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| ProviderError::Registration(format!("tls setup: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
        .with_no_client_auth();

        Ok(Self {
            host,
            port,
            server_name,
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    fn authority(&self) -> String {
        if self.port == DEFAULT_ROUTER_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    async fn version(&self) -> ProviderResult<String> {
        let (status, body) =
            tokio::time::timeout(REGISTRATION_TIMEOUT, self.request(Method::GET, "/version"))
                .await
                .map_err(|_| self.failure("version request timed out"))??;

        if !status.is_success() {
            return Err(self.failure(&format!("version request returned {status}")));
        }
        let parsed: VersionResponse = serde_json::from_slice(&body)
            .map_err(|e| self.failure(&format!("malformed version response: {e}")))?;
        Ok(parsed.version)
    }

    fn terminate_in_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            match tokio::time::timeout(
                REGISTRATION_TIMEOUT,
                self.request(Method::POST, "/terminate"),
            )
            .await
            {
                Ok(Ok((status, _))) => debug!(%status, "router terminate sent"),
                Ok(Err(e)) => warn!(error = %e, "router terminate failed"),
                Err(_) => warn!("router terminate timed out"),
            }
        })
    }

    async fn request(&self, method: Method, path: &str) -> ProviderResult<(StatusCode, Bytes)> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| self.failure(&format!("connect: {e}")))?;
        let tls = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| self.failure(&format!("tls handshake: {e}")))?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
            .await
            .map_err(|e| self.failure(&format!("http handshake: {e}")))?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("host", self.authority())
            .header("user-agent", "keel/0.1")
            .header("content-length", "0")
            .header("connection", "close")
            .body(Empty::<Bytes>::new())
            .map_err(|e| self.failure(&format!("request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| self.failure(&format!("request: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| self.failure(&format!("response body: {e}")))?
            .to_bytes();
        Ok((status, body))
    }

    fn failure(&self, reason: &str) -> ProviderError {
        ProviderError::Registration(format!("router {}: {reason}", self.authority()))
    }
}

/// Split `host[:port]`, defaulting to the HTTPS port.
fn split_authority(router: &str) -> (String, u16) {
    if let Ok(addr) = router.parse::<SocketAddr>() {
        return (addr.ip().to_string(), addr.port());
    }
    match router.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (router.to_string(), DEFAULT_ROUTER_PORT),
        },
        _ => (router.to_string(), DEFAULT_ROUTER_PORT),
    }
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Accepts any router certificate.
    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
