//! Packet demultiplexer.
//!
//! Classifies each inbound datagram as STUN, DTLS, or RTP/RTCP by inspecting
//! its leading bytes — the same job a `mux::Endpoint` + `MatchFunc` pair do
//! for bundled transports, but expressed here as a single stateless
//! classification function plus a thin fan-out type that owns the three
//! destination channels (one per engine).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use util::Conn;

/// The outcome of classifying a single datagram's first two octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Stun,
    Dtls,
    Rtp,
    Rtcp,
}

/// Classify a datagram by its leading byte (and, for the RTP/RTCP range,
/// its second byte). Returns `None` for anything that matches none of the
/// known ranges; callers must drop such datagrams and bump a counter.
///
/// Ranges, per the multiplexing convention shared by STUN/TURN, DTLS and
/// SRTP on one 5-tuple (RFC 7983):
/// - `0..=1`   → STUN (the magic cookie in bytes 4..8 further confirms)
/// - `20..=63` → DTLS record
/// - `128..=191` → RTP or RTCP, disambiguated by the payload-type octet
pub fn classify(buf: &[u8]) -> Option<PacketKind> {
    let b0 = *buf.first()?;
    match b0 {
        0..=1 => Some(PacketKind::Stun),
        20..=63 => Some(PacketKind::Dtls),
        128..=191 => {
            let pt = *buf.get(1)?;
            // RTCP payload types 192..=223 per RFC 5761; everything else
            // in the 128..=191 band is RTP.
            if (192..=223).contains(&pt) {
                Some(PacketKind::Rtcp)
            } else {
                Some(PacketKind::Rtp)
            }
        }
        _ => None,
    }
}

/// Routes inbound datagrams to per-protocol channels, counting and
/// dropping anything unclassifiable. `Clone` is cheap (four `mpsc::Sender`
/// clones and an `Arc`), letting a session hand a copy to whichever task
/// ends up owning the read loop once the real transport is known.
#[derive(Clone)]
pub struct Demultiplexer {
    stun_tx: mpsc::Sender<Vec<u8>>,
    dtls_tx: mpsc::Sender<Vec<u8>>,
    rtp_tx: mpsc::Sender<Vec<u8>>,
    rtcp_tx: mpsc::Sender<Vec<u8>>,
    drop_count: Arc<AtomicU64>,
}

pub struct DemultiplexerChannels {
    pub stun_rx: mpsc::Receiver<Vec<u8>>,
    pub dtls_rx: mpsc::Receiver<Vec<u8>>,
    pub rtp_rx: mpsc::Receiver<Vec<u8>>,
    pub rtcp_rx: mpsc::Receiver<Vec<u8>>,
}

impl Demultiplexer {
    pub fn new(drop_count: Arc<AtomicU64>) -> (Self, DemultiplexerChannels) {
        let (stun_tx, stun_rx) = mpsc::channel(64);
        let (dtls_tx, dtls_rx) = mpsc::channel(64);
        let (rtp_tx, rtp_rx) = mpsc::channel(256);
        let (rtcp_tx, rtcp_rx) = mpsc::channel(64);
        (
            Demultiplexer {
                stun_tx,
                dtls_tx,
                rtp_tx,
                rtcp_tx,
                drop_count,
            },
            DemultiplexerChannels {
                stun_rx,
                dtls_rx,
                rtp_rx,
                rtcp_rx,
            },
        )
    }

    /// Classify and route one datagram. Never blocks indefinitely: a full
    /// destination channel is treated the same as an unclassifiable packet
    /// (counted and dropped) rather than backpressuring the socket reader.
    pub fn route(&self, datagram: Vec<u8>) {
        let kind = match classify(&datagram) {
            Some(k) => k,
            None => {
                self.drop_count.fetch_add(1, Ordering::Relaxed);
                log::trace!("demux: dropping unclassifiable {}-byte datagram", datagram.len());
                return;
            }
        };
        let sent = match kind {
            PacketKind::Stun => self.stun_tx.try_send(datagram),
            PacketKind::Dtls => self.dtls_tx.try_send(datagram),
            PacketKind::Rtp => self.rtp_tx.try_send(datagram),
            PacketKind::Rtcp => self.rtcp_tx.try_send(datagram),
        };
        if sent.is_err() {
            self.drop_count.fetch_add(1, Ordering::Relaxed);
            log::trace!("demux: dropping {kind:?} datagram, destination channel full/closed");
        }
    }
}

/// A `util::Conn` adapter over one of the demultiplexer's per-protocol
/// channels: reads come from the channel the [`Demultiplexer`] routed into,
/// writes pass straight through to the shared underlying socket. This is
/// what lets the DTLS and SRTP engines (and the ICE agent) each see what
/// looks like a dedicated socket while really sharing one 5-tuple, the same
/// trick as a `mux::Endpoint` layered over `util::Conn`.
pub struct Endpoint {
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    underlying: Arc<dyn Conn + Send + Sync>,
}

impl Endpoint {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>, underlying: Arc<dyn Conn + Send + Sync>) -> Self {
        Endpoint {
            rx: Mutex::new(rx),
            underlying,
        }
    }
}

#[async_trait]
impl Conn for Endpoint {
    async fn connect(&self, addr: SocketAddr) -> anyhow::Result<()> {
        self.underlying.connect(addr).await
    }

    async fn recv(&self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            None => Err(anyhow::anyhow!("demux endpoint closed")),
        }
    }

    async fn recv_from(&self, _buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        Err(anyhow::anyhow!("recv_from not supported on a demuxed endpoint"))
    }

    async fn send(&self, buf: &[u8]) -> anyhow::Result<usize> {
        self.underlying.send(buf).await
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> anyhow::Result<usize> {
        self.underlying.send_to(buf, target).await
    }

    async fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.underlying.local_addr().await
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.rx.lock().await.close();
        Ok(())
    }
}

#[cfg(test)]
mod mux_test {
    use super::*;

    #[test]
    fn classifies_stun_by_leading_byte() {
        assert_eq!(classify(&[0x00, 0x01, 0, 0]), Some(PacketKind::Stun));
        assert_eq!(classify(&[0x01, 0x01, 0, 0]), Some(PacketKind::Stun));
    }

    #[test]
    fn classifies_dtls_record_range() {
        assert_eq!(classify(&[20, 0xfe]), Some(PacketKind::Dtls));
        assert_eq!(classify(&[63, 0x00]), Some(PacketKind::Dtls));
    }

    #[test]
    fn classifies_rtp_vs_rtcp_by_payload_type() {
        assert_eq!(classify(&[0x80, 96]), Some(PacketKind::Rtp));
        assert_eq!(classify(&[0x80, 200]), Some(PacketKind::Rtcp));
        assert_eq!(classify(&[191, 223]), Some(PacketKind::Rtcp));
    }

    #[test]
    fn unclassifiable_ranges_are_none() {
        assert_eq!(classify(&[2, 0]), None);
        assert_eq!(classify(&[19, 0]), None);
        assert_eq!(classify(&[64, 0]), None);
        assert_eq!(classify(&[127, 0]), None);
        assert_eq!(classify(&[192, 0]), None);
        assert_eq!(classify(&[]), None);
    }

    #[tokio::test]
    async fn route_increments_drop_count_for_unclassifiable() {
        let drop_count = Arc::new(AtomicU64::new(0));
        let (demux, mut channels) = Demultiplexer::new(drop_count.clone());
        demux.route(vec![2, 0, 0, 0]);
        assert_eq!(drop_count.load(Ordering::Relaxed), 1);

        demux.route(vec![0x80, 96, 0, 0]);
        let got = channels.rtp_rx.try_recv().expect("rtp datagram routed");
        assert_eq!(got, vec![0x80, 96, 0, 0]);
        assert_eq!(drop_count.load(Ordering::Relaxed), 1);
    }
}
