//! IMAP session lifecycle
//!
//! [`Transport`] owns the single live connection to the mail store.
//! Everything that touches the wire goes through the session it holds:
//! the executor borrows it for one command at a time, and the monitor
//! takes it out entirely for the duration of an IDLE. The internal
//! mutex only guards the slot itself; it is never held across a wire
//! operation by callers.

use crate::config::MonitorConfig;
use crate::error::{ConnectPhase, Error, Result};
use async_imap::Session;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

/// A TLS-wrapped IMAP session.
pub type ImapSession = Session<Compat<tokio_rustls::client::TlsStream<TcpStream>>>;

struct SessionState {
    session: Option<ImapSession>,
    closed: bool,
}

/// Owner of the one live IMAP connection.
pub struct Transport {
    config: Arc<MonitorConfig>,
    state: Mutex<SessionState>,
}

impl Transport {
    #[must_use]
    pub fn new(config: Arc<MonitorConfig>) -> Self {
        Self {
            config,
            state: Mutex::new(SessionState {
                session: None,
                closed: false,
            }),
        }
    }

    /// Establish the session: dial, TLS (implicit or STARTTLS), LOGIN,
    /// SELECT. No-op when already connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close), or a
    /// phase-tagged [`Error::Connect`] naming the step that failed. A
    /// partially established connection is torn down before returning.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }
        if state.session.is_some() {
            return Ok(());
        }

        let cfg = &self.config;
        let addr = format!("{}:{}", cfg.host, cfg.port);
        debug!("connecting to IMAP server at {}", addr);

        let tcp_stream = tokio::time::timeout(cfg.dial_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| connect_err(ConnectPhase::Dial, "dial timeout"))?
            .map_err(|e| connect_err(ConnectPhase::Dial, e))?;

        let connector = self.tls_connector();
        let server_name = ServerName::try_from(cfg.host.clone())
            .map_err(|e| connect_err(ConnectPhase::Upgrade, format!("invalid server name: {e}")))?;

        let tls_stream = if cfg.starttls {
            let mut client = async_imap::Client::new(tcp_stream.compat());
            read_greeting(&mut client, ConnectPhase::Dial).await?;
            client
                .run_command_and_check_ok("STARTTLS", None)
                .await
                .map_err(|e| connect_err(ConnectPhase::Upgrade, format!("STARTTLS: {e}")))?;
            let inner = client.into_inner().into_inner();
            connector
                .connect(server_name, inner)
                .await
                .map_err(|e| connect_err(ConnectPhase::Upgrade, e))?
        } else {
            connector
                .connect(server_name, tcp_stream)
                .await
                .map_err(|e| connect_err(ConnectPhase::Upgrade, e))?
        };

        let mut tls_client = async_imap::Client::new(tls_stream.compat());
        if !cfg.starttls {
            // The greeting arrives inside the TLS stream on implicit
            // TLS connections.
            read_greeting(&mut tls_client, ConnectPhase::Upgrade).await?;
        }
        let mut session = tls_client
            .login(&cfg.username, &cfg.password)
            .await
            .map_err(|(e, _)| connect_err(ConnectPhase::Auth, e))?;

        if let Err(e) = session.select(&cfg.mailbox).await {
            session.logout().await.ok();
            return Err(connect_err(
                ConnectPhase::Select,
                format!("{}: {e}", cfg.mailbox),
            ));
        }

        info!(mailbox = %cfg.mailbox, "connected to IMAP server");
        state.session = Some(session);
        Ok(())
    }

    /// Mark the transport closed and log out. Idempotent; subsequent
    /// [`connect`](Self::connect) calls fail with [`Error::Closed`].
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        if let Some(mut session) = state.session.take() {
            session.logout().await.ok();
        }
    }

    /// Re-SELECT the watched mailbox and return its message count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Status`] when no session is live or the SELECT
    /// fails.
    pub async fn status(&self) -> Result<u32> {
        let mut state = self.state.lock().await;
        let session = state
            .session
            .as_mut()
            .ok_or_else(|| Error::Status("no live session".into()))?;
        let mailbox = session
            .select(&self.config.mailbox)
            .await
            .map_err(|e| Error::Status(e.to_string()))?;
        Ok(mailbox.exists)
    }

    /// Force-close the current session so the caller can reconnect.
    /// Does not mark the transport closed.
    pub async fn reset(&self, reason: &str, cause: &Error) {
        let mut state = self.state.lock().await;
        if let Some(mut session) = state.session.take() {
            session.logout().await.ok();
        }
        warn!(reason, error = %cause, "reset connection");
    }

    /// Take exclusive ownership of the session, leaving the slot empty.
    /// Used by IDLE (which consumes the session) and the executor.
    pub async fn take_session(&self) -> Option<ImapSession> {
        self.state.lock().await.session.take()
    }

    /// Return a previously taken session. Dropped with a best-effort
    /// logout if the transport was closed in the meantime, or if a
    /// reconnect raced the command and the slot already holds a newer
    /// session.
    pub async fn restore_session(&self, mut session: ImapSession) {
        let mut state = self.state.lock().await;
        if state.closed || state.session.is_some() {
            session.logout().await.ok();
            return;
        }
        state.session = Some(session);
    }

    fn tls_connector(&self) -> TlsConnector {
        let config = if self.config.insecure_skip_verify {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
                .with_no_client_auth()
        } else {
            let roots = rustls::RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };
        TlsConnector::from(Arc::new(config))
    }
}

async fn read_greeting<S>(client: &mut async_imap::Client<S>, phase: ConnectPhase) -> Result<()>
where
    S: futures::AsyncRead + futures::AsyncWrite + Unpin + Send + std::fmt::Debug,
{
    client
        .read_response()
        .await
        .map_err(|e| connect_err(phase, e))?
        .ok_or_else(|| connect_err(phase, "connection closed before greeting"))?;
    Ok(())
}

fn connect_err(phase: ConnectPhase, message: impl ToString) -> Error {
    Error::Connect {
        phase,
        message: message.to_string(),
    }
}

/// Certificate verifier that accepts all certificates (self-signed
/// test servers behind `insecure_skip_verify`).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
