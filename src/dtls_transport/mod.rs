//! DTLS-SRTP Engine: runs the DTLS handshake over the ICE-nominated pair,
//! derives SRTP keys via the exporter, and verifies the peer certificate
//! fingerprint. A thin orchestration layer over `dtls::conn`, shaped like
//! `RTCDtlsTransport`.

pub mod dtls_fingerprint;
pub mod dtls_role;
pub mod dtls_transport_state;

mod dtls_transport;
pub use dtls_transport::{SrtpKeyingMaterial, EXPORTER_LABEL};

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dtls::config::Config as DtlsConfig;
use dtls::conn::DtlsConn;
use dtls::crypto::Certificate as DtlsCertificate;
use tokio::sync::Mutex;
use tokio::time::timeout;
use util::Conn;

use crate::dtls_transport::dtls_fingerprint::DtlsFingerprint;
use crate::dtls_transport::dtls_role::DtlsRole;
use crate::dtls_transport::dtls_transport_state::DtlsTransportState;
use crate::error::{Error, Result};
use crate::stats::StatsInner;

/// DTLS handshake must complete within this window.
pub const DTLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

pub type OnStateChangeHdlrFn = Box<
    dyn (FnMut(DtlsTransportState) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

/// Holds the self-signed certificate this endpoint presents, generated
/// once per process the way an `RTCCertificate` is generated for a
/// `PeerConnection`.
pub struct DtlsIdentity {
    pub certificate: DtlsCertificate,
    pub fingerprint: DtlsFingerprint,
}

impl DtlsIdentity {
    pub fn generate() -> Result<Self> {
        let certificate = DtlsCertificate::generate_self_signed(vec!["media-session".to_string()])
            .map_err(Error::Dtls)?;
        let fingerprint = DtlsFingerprint::sha256(certificate.certificate[0].as_ref());
        Ok(DtlsIdentity {
            certificate,
            fingerprint,
        })
    }
}

pub struct DtlsEngine {
    identity: Arc<DtlsIdentity>,
    state: Arc<AtomicU8>,
    conn: Mutex<Option<Arc<DtlsConn>>>,
    stats: Arc<StatsInner>,
    early_dtls: bool,
    on_state_change: Arc<Mutex<Option<OnStateChangeHdlrFn>>>,
}

impl DtlsEngine {
    pub fn new(identity: Arc<DtlsIdentity>, stats: Arc<StatsInner>, early_dtls: bool) -> Self {
        DtlsEngine {
            identity,
            state: Arc::new(AtomicU8::new(DtlsTransportState::New as u8)),
            conn: Mutex::new(None),
            stats,
            early_dtls,
            on_state_change: Arc::new(Mutex::new(None)),
        }
    }

    pub fn local_fingerprint(&self) -> DtlsFingerprint {
        self.identity.fingerprint.clone()
    }

    pub fn state(&self) -> DtlsTransportState {
        match self.state.load(Ordering::SeqCst) {
            0 => DtlsTransportState::New,
            1 => DtlsTransportState::Connecting,
            2 => DtlsTransportState::Connected,
            3 => DtlsTransportState::Closed,
            _ => DtlsTransportState::Failed,
        }
    }

    fn store_state(&self, s: DtlsTransportState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    pub async fn on_state_change(&self, f: OnStateChangeHdlrFn) {
        *self.on_state_change.lock().await = Some(f);
    }

    async fn notify_state(&self, s: DtlsTransportState) {
        self.store_state(s);
        let mut h = self.on_state_change.lock().await;
        if let Some(f) = &mut *h {
            f(s).await;
        }
    }

    /// Run the handshake over `transport` (a `util::Conn` produced by the
    /// packet demultiplexer — see [`crate::mux::Endpoint`]). `role`
    /// determines whether this side initiates. The caller must not invoke
    /// this before ICE has a nominated pair unless `early_dtls` was
    /// configured and the first peer datagram has already arrived on
    /// `transport`.
    pub async fn start(
        &self,
        transport: Arc<dyn Conn + Send + Sync>,
        role: DtlsRole,
        remote_fingerprint: &DtlsFingerprint,
    ) -> Result<SrtpKeyingMaterial> {
        self.notify_state(DtlsTransportState::Connecting).await;
        let started = Instant::now();

        let is_client = role.is_client();
        let config = DtlsConfig {
            certificates: vec![self.identity.certificate.clone()],
            insecure_skip_verify: true, // fingerprint checked explicitly below, not via a CA chain
            ..Default::default()
        };

        let counted: Arc<dyn Conn + Send + Sync> = Arc::new(CountingConn::new(transport, self.stats.clone()));
        let handshake = DtlsConn::new(counted, config, is_client, None);
        let conn = match timeout(DTLS_HANDSHAKE_TIMEOUT, handshake).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                self.notify_state(DtlsTransportState::Failed).await;
                return Err(Error::Dtls(e));
            }
            Err(_) => {
                self.notify_state(DtlsTransportState::Failed).await;
                self.stats.mark_error(&self.stats.dtls_estab_ms);
                return Err(Error::Timeout("dtls handshake exceeded 30s".to_string()));
            }
        };
        let conn = Arc::new(conn);

        let peer_fingerprint = self.peer_fingerprint(&conn).await?;
        if !peer_fingerprint.matches(remote_fingerprint) {
            self.notify_state(DtlsTransportState::Failed).await;
            return Err(Error::AuthenticationFailed(format!(
                "dtls peer fingerprint {} does not match advertised {}",
                peer_fingerprint.value, remote_fingerprint.value
            )));
        }

        let exported = conn
            .export_keying_material(EXPORTER_LABEL, &[], 2 * 16 + 2 * 14)
            .await
            .map_err(Error::Dtls)?;
        let keys = SrtpKeyingMaterial::from_exported(&exported, is_client)?;

        *self.conn.lock().await = Some(conn);
        self.stats
            .dtls_estab_ms
            .store(started.elapsed().as_millis() as i64, Ordering::Relaxed);
        self.notify_state(DtlsTransportState::Connected).await;

        Ok(keys)
    }

    async fn peer_fingerprint(&self, conn: &DtlsConn) -> Result<DtlsFingerprint> {
        let der = conn.peer_certificates().await.map_err(Error::Dtls)?;
        let leaf = der
            .first()
            .ok_or_else(|| Error::ProtocolError("dtls handshake produced no peer certificate".into()))?;
        Ok(DtlsFingerprint::sha256(leaf))
    }

    pub async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        if let Some(conn) = conn.as_ref() {
            conn.close().await.map_err(Error::Dtls)?;
        }
        self.store_state(DtlsTransportState::Closed);
        Ok(())
    }
}

/// `util::Conn` decorator counting datagrams into [`StatsInner`] so the
/// handshake's packet counts show up in `dtls_pkt_sent`/`dtls_pkt_recv`
/// without `DtlsConn` itself needing to know about stats.
struct CountingConn {
    inner: Arc<dyn Conn + Send + Sync>,
    stats: Arc<StatsInner>,
}

impl CountingConn {
    fn new(inner: Arc<dyn Conn + Send + Sync>, stats: Arc<StatsInner>) -> Self {
        CountingConn { inner, stats }
    }
}

#[async_trait]
impl Conn for CountingConn {
    async fn connect(&self, addr: SocketAddr) -> anyhow::Result<()> {
        self.inner.connect(addr).await
    }

    async fn recv(&self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let n = self.inner.recv(buf).await?;
        self.stats.dtls_pkt_recv.fetch_add(1, Ordering::Relaxed);
        Ok(n)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        let (n, addr) = self.inner.recv_from(buf).await?;
        self.stats.dtls_pkt_recv.fetch_add(1, Ordering::Relaxed);
        Ok((n, addr))
    }

    async fn send(&self, buf: &[u8]) -> anyhow::Result<usize> {
        let n = self.inner.send(buf).await?;
        self.stats.dtls_pkt_sent.fetch_add(1, Ordering::Relaxed);
        Ok(n)
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> anyhow::Result<usize> {
        let n = self.inner.send_to(buf, target).await?;
        self.stats.dtls_pkt_sent.fetch_add(1, Ordering::Relaxed);
        Ok(n)
    }

    async fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.inner.local_addr().await
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn engine_starts_in_new_state() {
        let identity = Arc::new(DtlsIdentity {
            certificate: DtlsCertificate::generate_self_signed(vec!["test".to_string()])
                .expect("self-signed cert"),
            fingerprint: DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: "00".into(),
            },
        });
        let engine = DtlsEngine::new(identity, Arc::new(StatsInner::new()), false);
        assert_eq!(engine.state(), DtlsTransportState::New);
    }

    #[test]
    fn dtls_state_round_trips_through_u8() {
        let state = Arc::new(AtomicU8::new(DtlsTransportState::Connected as u8));
        assert_eq!(state.load(Ordering::SeqCst), DtlsTransportState::Connected as u8);
    }

    async fn connected_udp_pair() -> (Arc<dyn Conn + Send + Sync>, Arc<dyn Conn + Send + Sync>) {
        let a = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("bind a");
        let b = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("bind b");
        let a_addr = a.local_addr().expect("addr a");
        let b_addr = b.local_addr().expect("addr b");
        a.connect(b_addr).await.expect("connect a to b");
        b.connect(a_addr).await.expect("connect b to a");
        (Arc::new(a), Arc::new(b))
    }

    #[tokio::test]
    async fn matching_fingerprints_yield_swapped_srtp_keys() {
        let (conn_a, conn_b) = connected_udp_pair().await;

        let identity_a = Arc::new(DtlsIdentity::generate().expect("identity a"));
        let identity_b = Arc::new(DtlsIdentity::generate().expect("identity b"));
        let fp_a = identity_a.fingerprint.clone();
        let fp_b = identity_b.fingerprint.clone();

        let engine_a = DtlsEngine::new(identity_a, Arc::new(StatsInner::new()), false);
        let engine_b = DtlsEngine::new(identity_b, Arc::new(StatsInner::new()), false);

        let (client, server) = tokio::join!(
            engine_a.start(conn_a, DtlsRole::Active, &fp_b),
            engine_b.start(conn_b, DtlsRole::Passive, &fp_a),
        );

        let client_keys = client.expect("client handshake");
        let server_keys = server.expect("server handshake");

        assert_eq!(client_keys.local_master_key, server_keys.remote_master_key);
        assert_eq!(client_keys.remote_master_key, server_keys.local_master_key);
        assert_eq!(engine_a.state(), DtlsTransportState::Connected);
        assert_eq!(engine_b.state(), DtlsTransportState::Connected);
    }

    #[tokio::test]
    async fn mismatched_remote_fingerprint_fails_authentication() {
        let (conn_a, conn_b) = connected_udp_pair().await;

        let identity_a = Arc::new(DtlsIdentity::generate().expect("identity a"));
        let identity_b = Arc::new(DtlsIdentity::generate().expect("identity b"));
        let fp_a = identity_a.fingerprint.clone();
        let bogus_fingerprint = DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "00:00:00:00".to_string(),
        };

        let engine_a = DtlsEngine::new(identity_a, Arc::new(StatsInner::new()), false);
        let engine_b = DtlsEngine::new(identity_b, Arc::new(StatsInner::new()), false);

        let (client, server) = tokio::join!(
            engine_a.start(conn_a, DtlsRole::Active, &bogus_fingerprint),
            engine_b.start(conn_b, DtlsRole::Passive, &fp_a),
        );

        assert!(matches!(client.unwrap_err(), Error::AuthenticationFailed(_)));
        assert_eq!(engine_a.state(), DtlsTransportState::Failed);
        let _ = server;
    }
}
