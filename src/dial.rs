//! TLS dial for commissioning and operational modes (§4.B).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use tokio_util::sync::CancellationToken;

use crate::error::{
    classify_io_error, retry_with_backoff, ErrorCategory, MashError, RetryConfig, RetryOutcome,
};
use crate::transport::{Connection, IoHandle};

/// ALPN values distinguishing the two connection kinds (§6).
pub const ALPN_COMMISSIONING: &[u8] = b"mash-commissioning";
pub const ALPN_OPERATIONAL: &[u8] = b"mash-operational";

const TCP_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Crypto material needed to dial into an operational zone (§3 SuiteSession,
/// §4.B).
#[derive(Clone)]
pub struct OperationalCrypto {
    /// The controller's operational certificate chain (leaf first).
    pub controller_cert_chain: Vec<CertificateDer<'static>>,
    pub controller_private_key: Arc<PrivateKeyDer<'static>>,
    /// The zone CA pool used to validate the device's certificate.
    pub zone_ca_pool: Option<RootCertStore>,
    /// Whether to fall back to skipping verification entirely when no zone
    /// CA is present (§4.B, only ever set from `insecure_skip_verify`
    /// configuration).
    pub insecure_fallback: bool,
}

/// A verifier that checks the device's chain against the Zone CA pool but
/// does **not** check the hostname: devices identify by device-ID in the
/// certificate's CN, not by DNS hostname (§4.B).
#[derive(Debug)]
struct ZoneCaVerifier {
    roots: RootCertStore,
}

impl ServerCertVerifier for ZoneCaVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        verify_chain_only(&self.roots, end_entity, intermediates, now)
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PKCS1_SHA256,
        ]
    }
}

/// Validate the presented chain against `roots`, ignoring the subject name:
/// `verify_server_cert_signed_by_trust_anchor` is rustls's own escape hatch
/// for custom verifiers that want chain validation without the hostname
/// check `ServerCertVerified` normally implies.
fn verify_chain_only(
    roots: &RootCertStore,
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    now: UnixTime,
) -> Result<ServerCertVerified, rustls::Error> {
    let cert = rustls::client::ParsedCertificate::try_from(end_entity)?;
    rustls::client::verify_server_cert_signed_by_trust_anchor(&cert, roots, intermediates, now)?;
    Ok(ServerCertVerified::assertion())
}

/// A verifier that accepts any certificate, used only when
/// `insecure_skip_verify` is configured and no Zone CA is available yet
/// (§4.B "if no Zone CA is present and insecure mode is enabled").
#[derive(Debug)]
struct AcceptAnyVerifier;

impl ServerCertVerifier for AcceptAnyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PKCS1_SHA256,
        ]
    }
}

async fn tcp_connect_with_timeout(target: SocketAddr) -> Result<TcpStream, MashError> {
    let connect = TcpStream::connect(target);
    match tokio::time::timeout(TCP_DIAL_TIMEOUT, connect).await {
        Ok(Ok(stream)) => {
            stream
                .set_nodelay(true)
                .map_err(|e| MashError::infrastructure(format!("set_nodelay failed: {e}")))?;
            Ok(stream)
        }
        Ok(Err(io_err)) => {
            let category = classify_io_error(&io_err);
            Err(MashError::new(category, io_err.to_string()).with_source(io_err))
        }
        Err(_elapsed) => Err(MashError::infrastructure("TCP connect timed out after 10s")),
    }
}

/// Dial the DUT's commissioning listener: TLS 1.3, commissioning ALPN, no
/// client certificate, curves restricted to {X25519, P256} so the
/// underlying TLS stack never negotiates a post-quantum group the DUT
/// doesn't support (§4.B).
pub async fn dial_commissioning(target: SocketAddr) -> Result<Connection, MashError> {
    let tcp = tcp_connect_with_timeout(target).await?;

    let root_store = RootCertStore::empty();
    let provider = restricted_curve_provider();
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| MashError::infrastructure(format!("TLS config error: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyVerifier))
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_COMMISSIONING.to_vec()];

    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::IpAddress(target.ip().into());

    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| MashError::infrastructure(format!("TLS handshake failed: {e}")).with_source(e))?;

    debug!(?target, "dial_commissioning: TLS established");
    Ok(Connection::from_handle(IoHandle::from(tls_stream)))
}

/// Dial the DUT's operational listener, presenting the controller's
/// operational certificate and validating the device's certificate against
/// the Zone CA pool rather than by hostname (§4.B).
pub async fn dial_operational(
    target: SocketAddr,
    crypto: &OperationalCrypto,
) -> Result<Connection, MashError> {
    let tcp = tcp_connect_with_timeout(target).await?;

    let provider = restricted_curve_provider();
    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| MashError::infrastructure(format!("TLS config error: {e}")))?
        .dangerous();

    let mut config = match (&crypto.zone_ca_pool, crypto.insecure_fallback) {
        (Some(pool), _) => builder
            .with_custom_certificate_verifier(Arc::new(ZoneCaVerifier {
                roots: clone_root_store(pool),
            }))
            .with_client_auth_cert(
                crypto.controller_cert_chain.clone(),
                clone_private_key(&crypto.controller_private_key),
            )
            .map_err(|e| MashError::device(format!("invalid controller certificate: {e}")))?,
        (None, true) => builder
            .with_custom_certificate_verifier(Arc::new(AcceptAnyVerifier))
            .with_client_auth_cert(
                crypto.controller_cert_chain.clone(),
                clone_private_key(&crypto.controller_private_key),
            )
            .map_err(|e| MashError::device(format!("invalid controller certificate: {e}")))?,
        (None, false) => {
            return Err(MashError::protocol(
                "dial_operational: no Zone CA pool and insecure fallback disabled",
            ))
        }
    };
    config.alpn_protocols = vec![ALPN_OPERATIONAL.to_vec()];

    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::IpAddress(target.ip().into());

    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| MashError::infrastructure(format!("TLS handshake failed: {e}")).with_source(e))?;

    debug!(?target, "dial_operational: TLS established");
    Ok(Connection::from_handle(IoHandle::from(tls_stream)))
}

fn restricted_curve_provider() -> Arc<rustls::crypto::CryptoProvider> {
    let mut provider = rustls::crypto::ring::default_provider();
    provider.kx_groups = vec![
        rustls::crypto::ring::kx_group::X25519,
        rustls::crypto::ring::kx_group::SECP256R1,
    ];
    Arc::new(provider)
}

/// Whether `end_entity`'s chain validates against `roots`, ignoring the
/// subject name, the same chain-only check the dialer's own
/// [`ZoneCaVerifier`] performs (§4.B). Exposed for the `verify_certificate`
/// action handler (§4.J), which checks a cert pulled off the wire against
/// the suite zone's CA pool without re-dialing.
pub fn chain_is_valid(
    roots: &RootCertStore,
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
) -> bool {
    verify_chain_only(roots, end_entity, intermediates, UnixTime::now()).is_ok()
}

fn clone_root_store(store: &RootCertStore) -> RootCertStore {
    // `RootCertStore` doesn't implement `Clone` directly in all versions;
    // rebuild it from its own trust anchors, which are cheap to iterate.
    let mut cloned = RootCertStore::empty();
    for anchor in store.roots.iter() {
        cloned.roots.push(anchor.clone());
    }
    cloned
}

fn clone_private_key(key: &PrivateKeyDer<'static>) -> PrivateKeyDer<'static> {
    key.clone_key()
}

/// The retry configuration `dial_with_retry` wraps the dialer in, per
/// spec.md §4.A (`BaseDelay=50ms, MaxDelay=200ms`).
pub fn dial_retry_config(max_attempts: usize) -> RetryConfig {
    RetryConfig::dial_defaults(max_attempts)
}

/// `dialWithRetry` (§4.A): retry a dial attempt with the `dial_defaults`
/// backoff, stopping immediately on any non-Infrastructure classified
/// failure (a TLS handshake rejection or a malformed-certificate error is
/// never going to succeed by itself on attempt two). Generic over the dial
/// closure so it covers both `dial_commissioning` and `dial_operational`
/// without duplicating the retry wiring `ensure_commissioned` already
/// establishes for PASE.
pub async fn dial_with_retry<F, Fut>(
    max_attempts: usize,
    cancel: &CancellationToken,
    mut dial: F,
) -> Result<Connection, MashError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Connection, MashError>>,
{
    let cfg = dial_retry_config(max_attempts);
    let outcome = retry_with_backoff(cfg, cancel, &mut dial).await;
    match outcome {
        Ok(conn) => Ok(conn),
        Err(RetryOutcome::Permanent(e)) | Err(RetryOutcome::Exhausted(e)) => Err(e),
        Err(RetryOutcome::Cancelled) => Err(MashError::infrastructure("dial cancelled")),
        Err(RetryOutcome::InvalidConfig) => {
            Err(MashError::infrastructure("invalid retry configuration"))
        }
    }
}
