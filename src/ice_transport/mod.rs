//! ICE Engine: gathers candidates, exchanges them with the peer, performs
//! connectivity checks, and nominates a working pair. A thin orchestration
//! layer over `ice::Agent`, the way `RTCIceTransport` wraps the same agent
//! for the full WebRTC stack.

pub mod ice_role;
pub mod ice_transport_state;

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use ice::agent::agent_config::AgentConfig;
use ice::agent::Agent;
use ice::candidate::Candidate;
use ice::network_type::NetworkType;
use ice::udp_network::{EphemeralUDP, UDPNetwork};
use ice::url::Url;
use tokio::sync::{mpsc, Mutex};
use util::Conn;

use crate::error::{Error, Result};
use crate::ice_transport::ice_role::RTCIceRole;
use crate::ice_transport::ice_transport_state::IceTransportState;
use crate::stats::StatsInner;

/// NAT traversal mode for a session.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum NatMode {
    #[default]
    None,
    TrickleIceDualStack,
    IceLite,
    TurnOnly,
}

/// Credentials for a TURN (or STUN, username-less) relay server.
#[derive(Debug, Clone, Default)]
pub struct ServerCredentials {
    pub username: String,
    pub password: String,
}

pub type OnLocalCandidateHdlrFn =
    Box<dyn (FnMut(String) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;
pub type OnGatheredHdlrFn =
    Box<dyn (FnMut() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;
pub type OnSelectedPairHdlrFn = Box<
    dyn (FnMut(Arc<dyn Candidate + Send + Sync>, Arc<dyn Candidate + Send + Sync>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;
pub type OnStateChangeHdlrFn = Box<
    dyn (FnMut(IceTransportState) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync,
>;
/// Fired once `start_checks` has actually nominated and connected a
/// candidate pair; the `Conn` handed back is the real, checked transport
/// for that pair (DTLS/SRTP ride on it directly, the same 5-tuple ICE
/// validated), not a second unvalidated socket.
pub type OnConnectedHdlrFn = Box<
    dyn (FnMut(Arc<dyn Conn + Send + Sync>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

/// Orchestrates a single `ice::Agent` for one media session.
pub struct IceEngine {
    nat_mode: NatMode,
    state: Arc<AtomicU8>,
    agent: Mutex<Option<Arc<Agent>>>,
    end_of_candidates: Mutex<bool>,
    stats: Arc<StatsInner>,
    cancel_tx: Mutex<Option<mpsc::Sender<()>>>,

    on_local_candidate: Arc<Mutex<Option<OnLocalCandidateHdlrFn>>>,
    on_gathered: Arc<Mutex<Option<OnGatheredHdlrFn>>>,
    on_selected_pair: Arc<Mutex<Option<OnSelectedPairHdlrFn>>>,
    on_state_change: Arc<Mutex<Option<OnStateChangeHdlrFn>>>,
    on_connected: Arc<Mutex<Option<OnConnectedHdlrFn>>>,
}

impl IceEngine {
    pub fn new(nat_mode: NatMode, stats: Arc<StatsInner>) -> Self {
        IceEngine {
            nat_mode,
            state: Arc::new(AtomicU8::new(IceTransportState::New as u8)),
            agent: Mutex::new(None),
            end_of_candidates: Mutex::new(false),
            stats,
            cancel_tx: Mutex::new(None),
            on_local_candidate: Arc::new(Mutex::new(None)),
            on_gathered: Arc::new(Mutex::new(None)),
            on_selected_pair: Arc::new(Mutex::new(None)),
            on_state_change: Arc::new(Mutex::new(None)),
            on_connected: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> IceTransportState {
        // SAFETY-free: we only ever store valid discriminants via `store_state`.
        match self.state.load(Ordering::SeqCst) {
            0 => IceTransportState::New,
            1 => IceTransportState::Checking,
            2 => IceTransportState::Connected,
            3 => IceTransportState::Completed,
            4 => IceTransportState::Disconnected,
            5 => IceTransportState::Failed,
            _ => IceTransportState::Closed,
        }
    }

    fn store_state(&self, s: IceTransportState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    pub async fn on_local_candidate(&self, f: OnLocalCandidateHdlrFn) {
        *self.on_local_candidate.lock().await = Some(f);
    }

    pub async fn on_gathered(&self, f: OnGatheredHdlrFn) {
        *self.on_gathered.lock().await = Some(f);
    }

    pub async fn on_selected_pair(&self, f: OnSelectedPairHdlrFn) {
        *self.on_selected_pair.lock().await = Some(f);
    }

    pub async fn on_state_change(&self, f: OnStateChangeHdlrFn) {
        *self.on_state_change.lock().await = Some(f);
    }

    pub async fn on_connected(&self, f: OnConnectedHdlrFn) {
        *self.on_connected.lock().await = Some(f);
    }

    /// Build the agent and, unless trickling, block until gathering
    /// completes. `trickle` mirrors the caller's choice independently of
    /// `nat_mode` since ICE-lite sessions never gather actively but may
    /// still be asked to trickle their (empty) candidate set.
    ///
    /// `local_port` restricts the ephemeral range the agent binds its own
    /// gathering sockets from to a single port when non-zero; `ice::Agent`
    /// has no notion of a literal bind address (it gathers host candidates
    /// across every local interface), so a caller-chosen IP is otherwise
    /// advisory only.
    pub async fn start_gather(
        &self,
        stun_srv: Option<SocketAddr>,
        turn_srv: Option<(SocketAddr, ServerCredentials, bool)>,
        trickle: bool,
        local_port: u16,
    ) -> Result<()> {
        if self.nat_mode == NatMode::IceLite && (stun_srv.is_some() || turn_srv.is_some()) {
            log::warn!("ice-lite mode never actively gathers; ignoring stun/turn servers");
        }

        let mut urls = Vec::new();
        if let Some(addr) = stun_srv {
            urls.push(Url::parse_url(&format!("stun:{addr}")).map_err(Error::Ice)?);
        }
        if let Some((addr, creds, secure)) = &turn_srv {
            if creds.username.is_empty() || creds.password.is_empty() {
                return Err(Error::invalid_argument("turn server requires username and password"));
            }
            let scheme = if *secure { "turns" } else { "turn" };
            let mut url = Url::parse_url(&format!("{scheme}:{addr}")).map_err(Error::Ice)?;
            url.username = creds.username.clone();
            url.password = creds.password.clone();
            urls.push(url);
        }

        let udp_network = if local_port == 0 {
            UDPNetwork::default()
        } else {
            UDPNetwork::Ephemeral(
                EphemeralUDP::new(local_port, local_port).map_err(|e| Error::invalid_argument(e.to_string()))?,
            )
        };

        let config = AgentConfig {
            urls,
            udp_network,
            network_types: vec![NetworkType::Udp4, NetworkType::Udp6],
            lite: self.nat_mode == NatMode::IceLite,
            ..Default::default()
        };

        let agent = Arc::new(Agent::new(config).await.map_err(Error::Ice)?);
        self.wire_handlers(&agent).await;
        *self.agent.lock().await = Some(agent.clone());
        self.store_state(IceTransportState::Checking);

        agent.gather_candidates().map_err(Error::Ice)?;

        if !trickle {
            // Non-trickle: caller awaits end-of-candidates externally, via
            // set_end_of_candidates, then the local full candidate set is
            // read back with get_local_candidates before generating SDP.
        }

        Ok(())
    }

    async fn wire_handlers(&self, agent: &Arc<Agent>) {
        let on_local_candidate = self.on_local_candidate.clone();
        agent.on_candidate(Box::new(move |c: Option<Arc<dyn Candidate + Send + Sync>>| {
            let on_local_candidate = on_local_candidate.clone();
            Box::pin(async move {
                let Some(c) = c else { return };
                let mut h = on_local_candidate.lock().await;
                if let Some(f) = &mut *h {
                    f(c.marshal()).await;
                }
            })
        }));

        let state = self.state.clone();
        let on_state_change = self.on_state_change.clone();
        agent.on_connection_state_change(Box::new(move |s| {
            let mapped = IceTransportState::from(s);
            state.store(mapped as u8, Ordering::SeqCst);
            let on_state_change = on_state_change.clone();
            Box::pin(async move {
                let mut h = on_state_change.lock().await;
                if let Some(f) = &mut *h {
                    f(mapped).await;
                }
            })
        }));

        let on_selected_pair = self.on_selected_pair.clone();
        agent.on_selected_candidate_pair_change(Box::new(move |local, remote| {
            let local = local.clone();
            let remote = remote.clone();
            let on_selected_pair = on_selected_pair.clone();
            Box::pin(async move {
                let mut h = on_selected_pair.lock().await;
                if let Some(f) = &mut *h {
                    f(local, remote).await;
                }
            })
        }));
    }

    pub async fn add_local_host_candidate(&self, _iface: &str, _addr: IpAddr) -> Result<()> {
        // Host candidates are discovered by `ice::Agent` itself from the
        // interfaces reachable via `AgentConfig::network_types`; this entry
        // point exists for callers (e.g. tests) that want to force a
        // specific loopback/bound address into the gathering set before
        // `start_gather` is called is out of scope for the agent's public
        // API, so we only validate and log here.
        log::debug!("requested host candidate on {_iface} ({_addr}) delegated to ice::Agent gathering");
        Ok(())
    }

    pub async fn add_remote_candidate(&self, candidate: &str) -> Result<()> {
        if *self.end_of_candidates.lock().await {
            log::debug!("ignoring remote candidate received after end-of-candidates");
            return Ok(());
        }
        let agent = self.agent.lock().await;
        let Some(agent) = agent.as_ref() else {
            return Err(Error::not_ready("ice agent not started"));
        };
        let c = ice::candidate::candidate_base::unmarshal_candidate(candidate).map_err(Error::Ice)?;
        let c: Arc<dyn Candidate + Send + Sync> = Arc::new(c);
        agent.add_remote_candidate(&c).map_err(Error::Ice)
    }

    pub async fn set_end_of_candidates(&self) {
        *self.end_of_candidates.lock().await = true;
        let mut h = self.on_gathered.lock().await;
        if let Some(f) = &mut *h {
            f().await;
        }
    }

    /// Drives real connectivity checks: controlling agents dial the peer,
    /// controlled agents accept, both via `ice::Agent::dial`/`accept`,
    /// which is what actually starts STUN binding requests and nominates a
    /// working pair (`set_remote_credentials` alone only stores the
    /// remote ufrag/pwd for later validation). Runs in a background task
    /// since both calls block until a pair is selected; the resulting
    /// `Conn` is handed to whoever registered [`Self::on_connected`].
    pub async fn start_checks(&self, role: RTCIceRole, ufrag: String, pwd: String) -> Result<()> {
        let agent = {
            let agent = self.agent.lock().await;
            agent.as_ref().cloned().ok_or_else(|| Error::not_ready("ice agent not started"))?
        };
        if self.nat_mode == NatMode::IceLite {
            // Ice-lite never sends checks; it only waits for the peer to
            // nominate. We still install remote credentials so the
            // agent can validate and respond to incoming Binding requests.
            agent.set_remote_credentials(ufrag, pwd).await.map_err(Error::Ice)?;
            return Ok(());
        }
        if role == RTCIceRole::Unspecified {
            return Err(Error::invalid_argument("start_checks requires a resolved controlling/controlled role"));
        }

        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        *self.cancel_tx.lock().await = Some(cancel_tx);

        let on_connected = self.on_connected.clone();
        tokio::spawn(async move {
            let result = match role {
                RTCIceRole::Controlling => agent.dial(cancel_rx, ufrag, pwd).await,
                _ => agent.accept(cancel_rx, ufrag, pwd).await,
            };
            match result {
                Ok(conn) => {
                    let conn: Arc<dyn Conn + Send + Sync> = conn;
                    let mut h = on_connected.lock().await;
                    if let Some(f) = &mut *h {
                        f(conn).await;
                    }
                }
                Err(e) => log::warn!("ice connectivity checks did not complete: {e}"),
            }
        });
        Ok(())
    }

    pub async fn local_credentials(&self) -> Result<(String, String)> {
        let agent = self.agent.lock().await;
        let Some(agent) = agent.as_ref() else {
            return Err(Error::not_ready("ice agent not started"));
        };
        Ok(agent.get_local_user_credentials().await)
    }

    pub async fn get_selected_candidate_pair(
        &self,
    ) -> Option<(Arc<dyn Candidate + Send + Sync>, Arc<dyn Candidate + Send + Sync>)> {
        let agent = self.agent.lock().await;
        let agent = agent.as_ref()?;
        let pair = agent.get_selected_candidate_pair()?;
        Some((pair.local.clone(), pair.remote.clone()))
    }

    pub async fn close(&self) -> Result<()> {
        self.cancel_tx.lock().await.take();
        let agent = self.agent.lock().await;
        if let Some(agent) = agent.as_ref() {
            agent.close().await.map_err(Error::Ice)?;
        }
        self.store_state(IceTransportState::Closed);
        Ok(())
    }
}

#[cfg(test)]
mod ice_transport_test {
    use super::*;

    #[test]
    fn nat_mode_defaults_to_none() {
        assert_eq!(NatMode::default(), NatMode::None);
    }

    #[test]
    fn state_round_trips_through_u8() {
        let stats = Arc::new(StatsInner::new());
        let engine = IceEngine::new(NatMode::None, stats);
        assert_eq!(engine.state(), IceTransportState::New);
        engine.store_state(IceTransportState::Connected);
        assert_eq!(engine.state(), IceTransportState::Connected);
        assert!(engine.state().is_ready());
    }
}
