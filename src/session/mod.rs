//! Media Session Coordinator: ties the ICE engine, DTLS-SRTP engine, SDP
//! negotiator and audio routing controller into the single object callers
//! interact with. Mirrors the classic split between a stateless factory
//! (`api::API::new_peer_connection`) and the long-lived handle it returns
//! (`Arc<RTCPeerConnection>`), here `MediaSessionCoordinator::allocate` and
//! `Arc<MediaSession>`.

pub mod srtp_context;

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use rtcp::packet::Packet as RtcpPacket;
use rtp::packet::Packet;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use util::marshal::Marshal;
use util::Conn;

use crate::api::setting_engine::CryptoMask;
use crate::audio_routing::sound_registry::SoundMode;
use crate::audio_routing::{AudioCommand, AudioDevicePlatform, AudioRoutingController, OnRouteChangedHdlrFn};
use crate::dtls_transport::dtls_fingerprint::DtlsFingerprint;
use crate::dtls_transport::dtls_role::DtlsRole;
use crate::dtls_transport::dtls_transport_state::DtlsTransportState;
use crate::dtls_transport::{DtlsEngine, DtlsIdentity};
use crate::error::{Error, Result};
use crate::ice_transport::ice_role::RTCIceRole;
use crate::ice_transport::ice_transport_state::IceTransportState;
use crate::ice_transport::{IceEngine, NatMode, ServerCredentials};
use crate::mux::{Demultiplexer, DemultiplexerChannels};
use crate::sdp::sdp_type::MediaKind;
use crate::sdp::{CodecEntry, SdpNegotiator};
use crate::session::srtp_context::SrtpSession;
use crate::stats::{MediaStats, StatsInner};

pub type OnLocalCandidateHdlrFn = crate::ice_transport::OnLocalCandidateHdlrFn;
pub type OnEstablishedHdlrFn =
    Box<dyn (FnMut() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;
pub type OnCloseHdlrFn =
    Box<dyn (FnMut(Result<()>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;

/// Random SSRCs are cheap and collisions are vanishingly unlikely within one
/// session; the peer learns ours from SDP, not by probing.
fn random_ssrc() -> u32 {
    rand::rng().random::<u32>() | 1
}

/// The root entity: one per call leg. Holds every engine exclusively;
/// the only state shared outward is behind `Arc`/`Weak` and `mpsc`
/// channels.
pub struct MediaSession {
    nat_mode: NatMode,
    crypto_mask: CryptoMask,
    external_rtp: bool,

    demux: Demultiplexer,
    dtls_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    rtp_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    rtcp_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    media_conn: Mutex<Option<Arc<dyn Conn + Send + Sync>>>,

    ice: IceEngine,
    dtls: DtlsEngine,
    sdp: Mutex<SdpNegotiator>,
    stats: Arc<StatsInner>,

    local_candidates: Mutex<Vec<String>>,
    local_gathering_done: Arc<AtomicBool>,
    dtls_handshake_started: Arc<AtomicBool>,

    local_ssrcs: HashMap<MediaKind, u32>,
    audio_pt: u8,
    audio_seq: AtomicU16,
    audio_timestamp: AtomicU32,
    samples_per_frame: u32,

    srtp: Mutex<Option<SrtpSession>>,
    established: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    on_hold: AtomicBool,

    audio_tx: mpsc::Sender<AudioCommand>,
    audio_task: Mutex<Option<JoinHandle<()>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    rtp_task: Mutex<Option<JoinHandle<()>>>,

    established_handler: Mutex<Option<OnEstablishedHdlrFn>>,
    close_handler: Mutex<Option<OnCloseHdlrFn>>,

    demux_drop_count: Arc<AtomicU64>,
}

/// Stateless factory, the coordinator side of the public contract.
pub struct MediaSessionCoordinator;

impl MediaSessionCoordinator {
    /// Allocates a new session: wires the packet demultiplexer, starts ICE
    /// gathering, and spawns the audio routing task. The real media
    /// transport does not exist yet at this point — `ice::Agent` owns the
    /// actual sockets and only hands back a checked `Conn` once
    /// connectivity checks nominate a pair (see `wire_handlers`'
    /// `on_connected`), so the demultiplexer's receivers are parked in
    /// `Mutex<Option<_>>` fields until then. `platform` is the
    /// out-of-scope audio-device collaborator; its ownership moves
    /// entirely into the spawned audio task, so `MediaSession` itself
    /// stays non-generic.
    #[allow(clippy::too_many_arguments)]
    pub async fn allocate<P>(
        dtls_identity: Arc<DtlsIdentity>,
        audio_codec_list: Vec<CodecEntry>,
        local_address: SocketAddr,
        nat_mode: NatMode,
        crypto_mask: CryptoMask,
        external_rtp_flag: bool,
        platform: P,
        local_candidate_handler: OnLocalCandidateHdlrFn,
        established_handler: OnEstablishedHdlrFn,
        close_handler: OnCloseHdlrFn,
    ) -> Result<Arc<MediaSession>>
    where
        P: AudioDevicePlatform + 'static,
    {
        let audio_codec = audio_codec_list
            .first()
            .cloned()
            .unwrap_or_else(|| CodecEntry::opus(96));

        let stats = Arc::new(StatsInner::new());
        let demux_drop_count = Arc::new(AtomicU64::new(0));
        let (demux, channels) = Demultiplexer::new(demux_drop_count.clone());
        let DemultiplexerChannels {
            mut stun_rx,
            dtls_rx,
            rtp_rx,
            rtcp_rx,
        } = channels;

        // `ice::Agent` filters STUN out of the nominated pair's stream
        // before it ever reaches the demultiplexer, so this channel is not
        // expected to receive anything once checks start; it is still
        // drained defensively rather than left to fill up silently.
        tokio::spawn(async move { while stun_rx.recv().await.is_some() {} });

        let mut local_ssrcs = HashMap::new();
        local_ssrcs.insert(MediaKind::Audio, random_ssrc());

        let mut session = MediaSession {
            nat_mode,
            crypto_mask,
            external_rtp: external_rtp_flag,
            demux,
            dtls_rx: Mutex::new(Some(dtls_rx)),
            rtp_rx: Mutex::new(Some(rtp_rx)),
            rtcp_rx: Mutex::new(Some(rtcp_rx)),
            media_conn: Mutex::new(None),
            ice: IceEngine::new(nat_mode, stats.clone()),
            dtls: DtlsEngine::new(dtls_identity, stats.clone(), false),
            sdp: Mutex::new(SdpNegotiator::new(
                String::new(),
                String::new(),
                DtlsFingerprint::default(),
                local_ssrcs.clone(),
                false,
                false,
            )),
            stats: stats.clone(),
            local_candidates: Mutex::new(Vec::new()),
            local_gathering_done: Arc::new(AtomicBool::new(false)),
            dtls_handshake_started: Arc::new(AtomicBool::new(false)),
            local_ssrcs,
            audio_pt: audio_codec.payload_type,
            audio_seq: AtomicU16::new(0),
            audio_timestamp: AtomicU32::new(0),
            samples_per_frame: audio_codec.clock_rate / 50, // 20ms frames
            srtp: Mutex::new(None),
            established: Arc::new(AtomicBool::new(false)),
            started: Arc::new(AtomicBool::new(false)),
            on_hold: AtomicBool::new(false),
            audio_tx: mpsc::channel(1).0, // replaced immediately below
            audio_task: Mutex::new(None),
            reader_task: Mutex::new(None),
            rtp_task: Mutex::new(None),
            established_handler: Mutex::new(Some(established_handler)),
            close_handler: Mutex::new(Some(close_handler)),
            demux_drop_count,
        };

        let (audio_tx, audio_rx) = mpsc::channel(64);
        session.audio_tx = audio_tx;

        let session = Arc::new(session);

        let audio_started = Arc::new(AtomicBool::new(false));
        let controller = AudioRoutingController::new(platform, None::<OnRouteChangedHdlrFn>);
        let audio_task = tokio::spawn(controller.run(audio_rx, audio_started));
        *session.audio_task.lock().await = Some(audio_task);

        session.wire_handlers(local_candidate_handler).await;

        // Handlers are wired onto `session.ice` before gathering starts so no
        // candidate emitted during `start_gather` can race ahead of them.
        let turn_srv = None::<(SocketAddr, ServerCredentials, bool)>;
        session.ice.start_gather(None, turn_srv, true, local_address.port()).await?;

        // `ice::Agent` only assigns its local ufrag/pwd once gathering has
        // started, so the negotiator is built with placeholders above and
        // given its real credentials and fingerprint here, before any
        // caller can have reached generate_offer/handle_offer.
        let (local_ufrag, local_pwd) = session.ice.local_credentials().await?;
        let local_fingerprint = session.dtls.local_fingerprint();
        *session.sdp.lock().await = SdpNegotiator::new(
            local_ufrag,
            local_pwd,
            local_fingerprint,
            session.local_ssrcs.clone(),
            false,
            false,
        );

        Ok(session)
    }
}

impl MediaSession {
    async fn wire_handlers(self: &Arc<Self>, local_candidate_handler: OnLocalCandidateHdlrFn) {
        let weak_for_candidates = Arc::downgrade(self);
        let local_candidate_handler = Arc::new(Mutex::new(local_candidate_handler));
        self.ice
            .on_local_candidate(Box::new(move |candidate: String| {
                let weak = weak_for_candidates.clone();
                let handler = local_candidate_handler.clone();
                Box::pin(async move {
                    if let Some(session) = weak.upgrade() {
                        session.local_candidates.lock().await.push(candidate.clone());
                    }
                    let mut h = handler.lock().await;
                    h(candidate).await;
                })
            }))
            .await;

        let gathering_done = self.local_gathering_done.clone();
        self.ice
            .on_gathered(Box::new(move || {
                let gathering_done = gathering_done.clone();
                Box::pin(async move {
                    gathering_done.store(true, Ordering::SeqCst);
                })
            }))
            .await;

        let weak_for_connected = Arc::downgrade(self);
        let handshake_started = self.dtls_handshake_started.clone();
        self.ice
            .on_connected(Box::new(move |conn: Arc<dyn Conn + Send + Sync>| {
                let weak = weak_for_connected.clone();
                let handshake_started = handshake_started.clone();
                Box::pin(async move {
                    if handshake_started.swap(true, Ordering::SeqCst) {
                        return;
                    }
                    let Some(session) = weak.upgrade() else { return };
                    let Some(dtls_rx) = session.dtls_rx.lock().await.take() else {
                        handshake_started.store(false, Ordering::SeqCst);
                        return;
                    };
                    let Some(rtp_rx) = session.rtp_rx.lock().await.take() else {
                        handshake_started.store(false, Ordering::SeqCst);
                        return;
                    };
                    let Some(rtcp_rx) = session.rtcp_rx.lock().await.take() else {
                        handshake_started.store(false, Ordering::SeqCst);
                        return;
                    };

                    *session.media_conn.lock().await = Some(conn.clone());
                    let dtls_endpoint: Arc<dyn Conn + Send + Sync> =
                        Arc::new(crate::mux::Endpoint::new(dtls_rx, conn.clone()));

                    // DTLS/SRTP and RTP/RTCP share the nominated pair's
                    // checked 5-tuple; the reader loop classifies whatever
                    // ice::Agent hands back from that pair into the three
                    // per-protocol channels the engines below consume.
                    let demux = session.demux.clone();
                    let read_conn = conn.clone();
                    let reader = tokio::spawn(async move {
                        let mut buf = vec![0u8; 1500];
                        loop {
                            match read_conn.recv(&mut buf).await {
                                Ok(n) if n > 0 => demux.route(buf[..n].to_vec()),
                                Ok(_) => continue,
                                Err(e) => {
                                    log::debug!("nominated ice pair closed: {e}");
                                    break;
                                }
                            }
                        }
                    });
                    *session.reader_task.lock().await = Some(reader);

                    let rtp_task = session.clone().spawn_rtp_receive_loop(rtp_rx, rtcp_rx);
                    *session.rtp_task.lock().await = Some(rtp_task);

                    tokio::spawn(async move {
                        session.begin_dtls_handshake(dtls_endpoint).await;
                    });
                })
            }))
            .await;
    }

    async fn begin_dtls_handshake(self: Arc<Self>, dtls_endpoint: Arc<dyn Conn + Send + Sync>) {
        let remote = {
            let sdp = self.sdp.lock().await;
            sdp.remote_params().cloned()
        };
        let Some(remote) = remote else {
            log::warn!("ice connected before sdp negotiation completed; dtls deferred");
            self.dtls_handshake_started.store(false, Ordering::SeqCst);
            return;
        };

        let role = DtlsRole::answer_to(remote.setup);
        match self.dtls.start(dtls_endpoint, role, &remote.fingerprint).await {
            Ok(keys) => match SrtpSession::new(&keys) {
                Ok(srtp) => {
                    *self.srtp.lock().await = Some(srtp);
                    self.established.store(true, Ordering::SeqCst);
                    let mut handler = self.established_handler.lock().await;
                    if let Some(f) = &mut *handler {
                        f().await;
                    }
                }
                Err(e) => {
                    log::warn!("srtp context installation failed: {e}");
                    self.fail(e).await;
                }
            },
            Err(e) => {
                log::warn!("dtls handshake failed: {e}");
                self.fail(e).await;
            }
        }
    }

    async fn fail(&self, err: Error) {
        let mut handler = self.close_handler.lock().await;
        if let Some(f) = &mut *handler {
            f(Err(err)).await;
        }
    }

    fn spawn_rtp_receive_loop(
        self: Arc<Self>,
        mut rtp_rx: mpsc::Receiver<Vec<u8>>,
        mut rtcp_rx: mpsc::Receiver<Vec<u8>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(datagram) = rtp_rx.recv() => {
                        let mut srtp = self.srtp.lock().await;
                        if let Some(srtp) = srtp.as_mut() {
                            if let Err(e) = srtp.unprotect_rtp(&datagram) {
                                log::trace!("dropping unprotectable rtp datagram: {e}");
                            }
                        }
                    }
                    Some(datagram) = rtcp_rx.recv() => {
                        let plaintext = {
                            let mut srtp = self.srtp.lock().await;
                            match srtp.as_mut() {
                                Some(srtp) => match srtp.unprotect_rtcp(&datagram) {
                                    Ok(p) => Some(p),
                                    Err(e) => {
                                        log::trace!("dropping unprotectable rtcp datagram: {e}");
                                        None
                                    }
                                },
                                None => None,
                            }
                        };
                        if let Some(plaintext) = plaintext {
                            match rtcp::packet::unmarshal(&plaintext) {
                                Ok(pkt) => log::trace!(
                                    "received rtcp packet for ssrc(s) {:?}, {} bytes",
                                    pkt.destination_ssrc(),
                                    pkt.marshal_size(),
                                ),
                                Err(e) => log::trace!("unparseable rtcp packet: {e}"),
                            }
                        }
                    }
                    else => break,
                }
            }
        })
    }

    // ---- SDP I/O ----------------------------------------------------------

    pub async fn generate_offer(&self) -> Result<String> {
        let candidates = self.local_candidates.lock().await.clone();
        let eoc = self.local_gathering_done.load(Ordering::SeqCst);
        let mut sdp = self.sdp.lock().await;
        sdp.generate_offer(&candidates, eoc)
    }

    pub async fn handle_offer(&self, offer: &str) -> Result<()> {
        {
            let mut sdp = self.sdp.lock().await;
            sdp.handle_offer(offer)?;
        }
        // We are answering someone else's offer, so per RFC 8445 the
        // offering peer is controlling and we are controlled.
        self.sync_ice_with_remote(RTCIceRole::Controlled).await
    }

    pub async fn generate_answer(&self) -> Result<String> {
        let candidates = self.local_candidates.lock().await.clone();
        let eoc = self.local_gathering_done.load(Ordering::SeqCst);
        let mut sdp = self.sdp.lock().await;
        sdp.generate_answer(&candidates, eoc)
    }

    pub async fn handle_answer(&self, answer: &str) -> Result<()> {
        {
            let mut sdp = self.sdp.lock().await;
            sdp.handle_answer(answer)?;
        }
        // We sent the original offer, so we are the controlling agent.
        self.sync_ice_with_remote(RTCIceRole::Controlling).await
    }

    pub async fn offer_answer(&self, offer: &str) -> Result<String> {
        let answer = {
            let candidates = self.local_candidates.lock().await.clone();
            let eoc = self.local_gathering_done.load(Ordering::SeqCst);
            let mut sdp = self.sdp.lock().await;
            sdp.offer_answer(offer, &candidates, eoc)?
        };
        // `offer_answer` is the answering-only convenience path.
        self.sync_ice_with_remote(RTCIceRole::Controlled).await?;
        Ok(answer)
    }

    async fn sync_ice_with_remote(&self, role: RTCIceRole) -> Result<()> {
        let remote = {
            let sdp = self.sdp.lock().await;
            sdp.remote_params().cloned()
        };
        let Some(remote) = remote else {
            return Ok(());
        };
        self.ice
            .start_checks(role, remote.ice_ufrag.clone(), remote.ice_pwd.clone())
            .await?;
        for candidate in &remote.candidates {
            self.ice.add_remote_candidate(candidate).await?;
        }
        if remote.end_of_candidates {
            self.ice.set_end_of_candidates().await;
        }
        Ok(())
    }

    pub async fn add_remote_candidate(&self, candidate: &str) -> Result<()> {
        self.ice.add_remote_candidate(candidate).await
    }

    pub async fn set_end_of_candidates(&self) {
        self.ice.set_end_of_candidates().await;
    }

    // ---- Media start/stop --------------------------------------------------

    async fn ready_for_media(&self) -> bool {
        let sdp_complete = self.sdp.lock().await.is_complete();
        sdp_complete && self.ice.state().is_ready() && self.dtls.state() == DtlsTransportState::Connected
    }

    pub async fn start_media(&self) -> Result<()> {
        if !self.ready_for_media().await {
            return Err(Error::not_ready(
                "start_media requires complete sdp, ready ice and connected dtls",
            ));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn stop_media(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn hold(&self) {
        self.on_hold.store(true, Ordering::SeqCst);
    }

    pub fn unhold(&self) {
        self.on_hold.store(false, Ordering::SeqCst);
    }

    fn may_send(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.on_hold.load(Ordering::SeqCst)
    }

    // ---- Outbound media -----------------------------------------------------

    /// Packetizes and sends interleaved int16 PCM at the negotiated sample
    /// rate. Codec encoding itself is out of scope; payload is the raw PCM
    /// bytes under the negotiated payload type, matching this crate's
    /// Non-goal of not shipping a media codec.
    pub async fn send_audio(&self, pcm: &[i16]) -> Result<()> {
        if self.external_rtp {
            return Err(Error::invalid_argument("send_audio is unavailable when external_rtp_flag is set"));
        }
        if !self.may_send() {
            return Ok(());
        }
        let ssrc = *self
            .local_ssrcs
            .get(&MediaKind::Audio)
            .ok_or_else(|| Error::Internal("missing local audio ssrc".to_string()))?;

        let mut payload = Vec::with_capacity(pcm.len() * 2);
        for sample in pcm {
            payload.extend_from_slice(&sample.to_be_bytes());
        }

        let seq = self.audio_seq.fetch_add(1, Ordering::Relaxed);
        let timestamp = self
            .audio_timestamp
            .fetch_add(self.samples_per_frame, Ordering::Relaxed);

        let packet = Packet {
            header: rtp::header::Header {
                version: 2,
                padding: false,
                extension: false,
                marker: false,
                payload_type: self.audio_pt,
                sequence_number: seq,
                timestamp,
                ssrc,
                csrc: Vec::new(),
                extension_profile: 0,
                extensions: Vec::new(),
                payload_offset: 0,
            },
            payload: Bytes::from(payload),
        };
        self.send_rtp(&packet).await
    }

    pub async fn send_rtp(&self, packet: &Packet) -> Result<()> {
        if !self.may_send() {
            return Ok(());
        }
        let marshaled = packet.marshal().map_err(|e| Error::ProtocolError(format!("rtp marshal: {e}")))?;
        self.send_raw_rtp(&marshaled).await
    }

    pub async fn send_raw_rtp(&self, payload: &[u8]) -> Result<()> {
        if !self.may_send() {
            return Ok(());
        }
        let protected = {
            let mut srtp = self.srtp.lock().await;
            let srtp = srtp
                .as_mut()
                .ok_or_else(|| Error::not_ready("srtp context not yet installed"))?;
            srtp.protect_rtp(payload)?
        };
        self.media_send(&protected).await
    }

    pub async fn send_raw_rtcp(&self, payload: &[u8]) -> Result<()> {
        if !self.may_send() {
            return Ok(());
        }
        let protected = {
            let mut srtp = self.srtp.lock().await;
            let srtp = srtp
                .as_mut()
                .ok_or_else(|| Error::not_ready("srtp context not yet installed"))?;
            srtp.protect_rtcp(payload)?
        };
        self.media_send(&protected).await
    }

    async fn media_send(&self, buf: &[u8]) -> Result<()> {
        let conn = self.media_conn.lock().await.clone();
        let conn = conn.ok_or_else(|| Error::not_ready("media transport not yet established"))?;
        conn.send(buf)
            .await
            .map_err(|e| Error::ProtocolError(format!("media send: {e}")))?;
        Ok(())
    }

    // ---- Audio routing / sound registry passthrough ---------------------

    pub async fn play_sound(&self, name: impl Into<String>) -> Result<()> {
        self.audio_tx
            .send(AudioCommand::Play(name.into()))
            .await
            .map_err(|_| Error::Internal("audio task unavailable".to_string()))
    }

    pub async fn set_sound_mode(&self, mode: SoundMode) -> Result<()> {
        self.audio_tx
            .send(AudioCommand::SetIntensity(mode))
            .await
            .map_err(|_| Error::Internal("audio task unavailable".to_string()))
    }

    pub async fn notify_call_state(&self, active: bool, kind: MediaKind) -> Result<()> {
        self.audio_tx
            .send(AudioCommand::CallState { active, kind })
            .await
            .map_err(|_| Error::Internal("audio task unavailable".to_string()))
    }

    // ---- Introspection -------------------------------------------------------

    pub fn get_stats(&self) -> MediaStats {
        self.stats.snapshot()
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn ice_state(&self) -> IceTransportState {
        self.ice.state()
    }

    pub fn dtls_state(&self) -> DtlsTransportState {
        self.dtls.state()
    }

    /// Best-effort RTCP BYE on teardown (RFC 3550 §6.3.7); failures are
    /// logged and swallowed since the transport may already be half-closed.
    async fn send_goodbye(&self) {
        let Some(&ssrc) = self.local_ssrcs.get(&MediaKind::Audio) else {
            return;
        };
        let bye = rtcp::goodbye::Goodbye {
            sources: vec![ssrc],
            reason: Bytes::new(),
        };
        let marshaled = match RtcpPacket::marshal(&bye) {
            Ok(b) => b,
            Err(e) => {
                log::debug!("failed to marshal rtcp goodbye: {e}");
                return;
            }
        };
        if let Err(e) = self.send_raw_rtcp(&marshaled).await {
            log::debug!("failed to send rtcp goodbye: {e}");
        }
    }

    // ---- Lifecycle --------------------------------------------------------

    pub async fn close(&self) -> Result<()> {
        self.send_goodbye().await;
        let _ = self.audio_tx.send(AudioCommand::Exit).await;
        self.dtls.close().await?;
        self.ice.close().await?;

        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.rtp_task.lock().await.take() {
            task.abort();
        }

        self.started.store(false, Ordering::SeqCst);
        let mut handler = self.close_handler.lock().await;
        if let Some(f) = &mut *handler {
            f(Ok(())).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn random_ssrc_is_never_zero_and_odd() {
        for _ in 0..16 {
            let ssrc = random_ssrc();
            assert_ne!(ssrc, 0);
            assert_eq!(ssrc & 1, 1);
        }
    }

    #[tokio::test]
    async fn start_media_before_negotiation_is_not_ready() {
        let identity = Arc::new(DtlsIdentity::generate().expect("identity"));
        let platform = crate::testutil::FakeAudioDevicePlatform::new();
        let session = MediaSessionCoordinator::allocate(
            identity,
            vec![CodecEntry::opus(96)],
            "127.0.0.1:0".parse().unwrap(),
            NatMode::None,
            CryptoMask::default(),
            false,
            platform,
            Box::new(|_c: String| Box::pin(async {})),
            Box::new(|| Box::pin(async {})),
            Box::new(|_r: Result<()>| Box::pin(async {})),
        )
        .await
        .expect("allocate");

        let err = session.start_media().await.unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
    }
}
