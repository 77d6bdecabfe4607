//! Non-blocking transport under the MQTT session.
//!
//! TCP connect is interrupt-safe and select-gated; the TLS handshake is
//! driven in bounded steps so the network task never parks inside the
//! library. The `Transport`/`Dialer` seams keep the session state machine
//! independent of real sockets.

use crate::config;
use log::{debug, info, warn};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug)]
pub enum TransportError {
    Resolve(String),
    Connect(io::Error),
    Timeout(&'static str),
    Tls(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Resolve(e) => write!(f, "failed to resolve hostname: {e}"),
            TransportError::Connect(e) => write!(f, "connect failed: {e}"),
            TransportError::Timeout(stage) => write!(f, "{stage} timeout"),
            TransportError::Tls(e) => write!(f, "tls failure: {e}"),
        }
    }
}

/// Byte stream the session state machine drives. `WouldBlock` from `send` or
/// `recv` means try again later; `Ok(0)` from `recv` means the peer closed.
pub trait Transport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Socket-level health probe. `false` transitions the session to Error.
    fn is_alive(&mut self) -> bool;
    /// Best-effort close, flushing a TLS close-notify where applicable.
    fn close(&mut self);
}

/// Connection factory. One dial attempt covers TCP establishment and, when
/// enabled, the TLS handshake.
pub trait Dialer {
    type Conn: Transport;
    fn dial(&mut self) -> Result<Self::Conn, TransportError>;
}

// ============================================================================
// select(2) helpers
// ============================================================================

enum SelectFor {
    Read,
    Write,
}

fn select_fd(fd: i32, dir: SelectFor, timeout: Option<Duration>) -> io::Result<bool> {
    unsafe {
        let mut set: libc::fd_set = std::mem::zeroed();
        libc::FD_ZERO(&mut set);
        libc::FD_SET(fd, &mut set);

        let mut tv = timeout.map(|t| libc::timeval {
            tv_sec: t.as_secs() as libc::time_t,
            tv_usec: t.subsec_micros() as libc::suseconds_t,
        });
        let tv_ptr = tv
            .as_mut()
            .map(|tv| tv as *mut libc::timeval)
            .unwrap_or(std::ptr::null_mut());

        let (read_ptr, write_ptr): (*mut libc::fd_set, *mut libc::fd_set) = match dir {
            SelectFor::Read => (&mut set, std::ptr::null_mut()),
            SelectFor::Write => (std::ptr::null_mut(), &mut set),
        };

        let rc = libc::select(fd + 1, read_ptr, write_ptr, std::ptr::null_mut(), tv_ptr);
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc > 0 && libc::FD_ISSET(fd, &set))
        }
    }
}

// ============================================================================
// TCP establishment
// ============================================================================

const CONNECT_EINTR_RETRIES: u32 = 3;
const CONNECT_EINTR_SPACING: Duration = Duration::from_millis(100);

fn tcp_connect(host: &str, port: u16) -> Result<TcpStream, TransportError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Resolve(e.to_string()))?
        .next()
        .ok_or_else(|| TransportError::Resolve(format!("no addresses for {host}")))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(TransportError::Connect)?;
    socket
        .set_nonblocking(true)
        .map_err(TransportError::Connect)?;

    let target = socket2::SockAddr::from(addr);
    let mut eintr = 0;
    loop {
        match socket.connect(&target) {
            Ok(()) => break,
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => break,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted && eintr < CONNECT_EINTR_RETRIES => {
                eintr += 1;
                thread::sleep(CONNECT_EINTR_SPACING);
            }
            Err(e) => return Err(TransportError::Connect(e)),
        }
    }

    // Completion gate: writable within the connect window, then SO_ERROR.
    let window = Duration::from_secs(config::CONNECT_TIMEOUT_SECS);
    loop {
        match select_fd(socket.as_raw_fd(), SelectFor::Write, Some(window)) {
            Ok(true) => break,
            Ok(false) => return Err(TransportError::Timeout("connect")),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::Connect(e)),
        }
    }
    if let Some(err) = socket.take_error().map_err(TransportError::Connect)? {
        return Err(TransportError::Connect(err));
    }

    Ok(socket.into())
}

// ============================================================================
// TLS configuration
// ============================================================================

fn load_root_store() -> RootCertStore {
    let mut store = RootCertStore::empty();
    for path in [config::CA_BUNDLE_PATH, config::CA_BUNDLE_FALLBACK_PATH] {
        let Ok(file) = File::open(path) else {
            debug!("CA bundle {path} not readable, trying alternative");
            continue;
        };
        let mut reader = BufReader::new(file);
        let mut added = 0usize;
        for cert in rustls_pemfile::certs(&mut reader) {
            match cert {
                Ok(der) => {
                    if store.add(der).is_ok() {
                        added += 1;
                    }
                }
                Err(e) => warn!("skipping unparsable certificate in {path}: {e}"),
            }
        }
        if added > 0 {
            info!("loaded {added} CA certificate(s) from {path}");
            return store;
        }
    }

    warn!("no CA bundle file found, falling back to built-in roots");
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}

fn explain_verification_failure(err: &rustls::Error) {
    use rustls::CertificateError::*;
    match err {
        rustls::Error::InvalidCertificate(cert_err) => {
            let reason = match cert_err {
                Expired => "certificate expired",
                NotValidYet => "certificate validity starts in the future",
                Revoked => "certificate revoked",
                UnknownIssuer => "certificate not trusted",
                BadSignature => "bad certificate signature",
                NotValidForName => "hostname mismatch",
                InvalidPurpose => "key usage violation",
                BadEncoding => "certificate encoding invalid",
                _ => {
                    warn!("certificate verification: {cert_err:?}");
                    return;
                }
            };
            warn!("certificate verification: {reason}");
        }
        other => warn!("certificate verification: {other}"),
    }
}

/// Verifier for the non-authoritative mode: runs the real webpki checks,
/// logs every failure with an explanation, and lets the session proceed.
#[derive(Debug)]
struct LenientVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for LenientVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            Err(e) => {
                explain_verification_failure(&e);
                warn!("continuing despite verification failure (verify not required)");
                Ok(ServerCertVerified::assertion())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner
            .verify_tls12_signature(message, cert, dss)
            .or_else(|e| {
                explain_verification_failure(&e);
                Ok(HandshakeSignatureValid::assertion())
            })
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner
            .verify_tls13_signature(message, cert, dss)
            .or_else(|e| {
                explain_verification_failure(&e);
                Ok(HandshakeSignatureValid::assertion())
            })
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn build_client_config() -> ClientConfig {
    let roots = Arc::new(load_root_store());

    if config::TLS_VERIFY_REQUIRED {
        return ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
    }

    match WebPkiServerVerifier::builder(roots.clone()).build() {
        Ok(inner) => ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(LenientVerifier { inner }))
            .with_no_client_auth(),
        Err(e) => {
            warn!("lenient verifier unavailable ({e}), enforcing verification");
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
    }
}

fn tls_handshake(
    cfg: Arc<ClientConfig>,
    host: &str,
    stream: &mut TcpStream,
) -> Result<ClientConnection, TransportError> {
    let name =
        ServerName::try_from(host.to_string()).map_err(|e| TransportError::Tls(e.to_string()))?;
    let mut session =
        ClientConnection::new(cfg, name).map_err(|e| TransportError::Tls(e.to_string()))?;

    let mut steps = 0u32;
    while session.is_handshaking() {
        let mut progressed = false;

        if session.wants_write() {
            match session.write_tls(stream) {
                Ok(n) if n > 0 => progressed = true,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(TransportError::Tls(e.to_string())),
            }
        }

        if session.is_handshaking() && session.wants_read() {
            match session.read_tls(stream) {
                Ok(0) => {
                    return Err(TransportError::Tls("peer closed during handshake".into()));
                }
                Ok(_) => {
                    session
                        .process_new_packets()
                        .map_err(|e| TransportError::Tls(e.to_string()))?;
                    progressed = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(TransportError::Tls(e.to_string())),
            }
        }

        if !progressed {
            steps += 1;
            if steps > config::HANDSHAKE_MAX_STEPS {
                return Err(TransportError::Timeout("tls handshake"));
            }
            thread::sleep(Duration::from_millis(config::HANDSHAKE_STEP_MS));
        }
    }

    Ok(session)
}

// ============================================================================
// The real transport
// ============================================================================

/// Non-blocking TCP stream, optionally wrapped in a TLS session.
pub struct TlsTransport {
    stream: TcpStream,
    session: Option<ClientConnection>,
}

impl Transport for TlsTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.session {
            Some(session) => {
                let n = session.writer().write(buf)?;
                // Drain as much ciphertext as the socket accepts; the rest
                // stays buffered in the session for the next call.
                while session.wants_write() {
                    match session.write_tls(&mut self.stream) {
                        Ok(_) => {}
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => return Err(e),
                    }
                }
                Ok(n)
            }
            None => self.stream.write(buf),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.session {
            Some(session) => {
                if session.wants_read() {
                    match session.read_tls(&mut self.stream) {
                        Ok(0) => return Ok(0),
                        Ok(_) => {
                            session
                                .process_new_packets()
                                .map_err(|e| io::Error::other(e.to_string()))?;
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(e) => return Err(e),
                    }
                }
                session.reader().read(buf)
            }
            None => self.stream.read(buf),
        }
    }

    fn is_alive(&mut self) -> bool {
        match self.stream.take_error() {
            Ok(None) => {}
            _ => return false,
        }
        match select_fd(self.stream.as_raw_fd(), SelectFor::Read, Some(Duration::ZERO)) {
            Ok(_) => true,
            Err(e) => e.kind() == io::ErrorKind::Interrupted,
        }
    }

    fn close(&mut self) {
        if let Some(session) = &mut self.session {
            session.send_close_notify();
            let _ = session.write_tls(&mut self.stream);
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Production dialer for the configured broker endpoint.
pub struct BrokerDialer {
    host: String,
    port: u16,
    tls: Option<Arc<ClientConfig>>,
}

impl BrokerDialer {
    pub fn from_config() -> Self {
        let (port, tls) = if config::USE_TLS {
            (
                config::MQTT_BROKER_PORT,
                Some(Arc::new(build_client_config())),
            )
        } else {
            (config::MQTT_BROKER_PORT_PLAIN, None)
        };
        Self {
            host: config::MQTT_BROKER_HOST.to_string(),
            port,
            tls,
        }
    }
}

impl Dialer for BrokerDialer {
    type Conn = TlsTransport;

    fn dial(&mut self) -> Result<TlsTransport, TransportError> {
        debug!("connecting to {}:{}", self.host, self.port);
        let mut stream = tcp_connect(&self.host, self.port)?;
        let session = match &self.tls {
            Some(cfg) => Some(tls_handshake(cfg.clone(), &self.host, &mut stream)?),
            None => None,
        };
        Ok(TlsTransport { stream, session })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn tcp_connect_reaches_a_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = tcp_connect("127.0.0.1", port).unwrap();
        // The stream stays non-blocking for the session machine.
        let mut buf = [0u8; 8];
        let mut transport = TlsTransport {
            stream,
            session: None,
        };
        match transport.recv(&mut buf) {
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::WouldBlock),
            Ok(n) => panic!("unexpected read of {n} bytes"),
        }
        assert!(transport.is_alive());
    }

    #[test]
    fn tcp_connect_rejects_unresolvable_hosts() {
        match tcp_connect("host.invalid", 1883) {
            Err(TransportError::Resolve(_)) => {}
            other => panic!("expected resolve failure, got {other:?}"),
        }
    }

    #[test]
    fn plain_transport_round_trips_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = tcp_connect("127.0.0.1", port).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let mut transport = TlsTransport {
            stream,
            session: None,
        };
        assert_eq!(transport.send(b"ping").unwrap(), 4);

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").unwrap();
        // Give the loopback a moment to deliver.
        std::thread::sleep(Duration::from_millis(20));
        let mut rx = [0u8; 8];
        assert_eq!(transport.recv(&mut rx).unwrap(), 4);
        assert_eq!(&rx[..4], b"pong");
    }

    #[test]
    fn closed_peer_is_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = tcp_connect("127.0.0.1", port).unwrap();
        let (server, _) = listener.accept().unwrap();
        drop(server);

        std::thread::sleep(Duration::from_millis(20));
        let mut transport = TlsTransport {
            stream,
            session: None,
        };
        let mut buf = [0u8; 4];
        assert_eq!(transport.recv(&mut buf).unwrap(), 0);
    }
}
