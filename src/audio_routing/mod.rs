//! Audio Routing Controller: an event-driven state machine selecting the
//! active playback device, plus its sibling the [`sound_registry`]. Runs
//! on its own dedicated `tokio` task, reachable only via [`AudioCommand`]
//! messages — no state here is ever shared with the network/coordination
//! task behind a `Mutex`.

pub mod sound_registry;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::sdp::sdp_type::MediaKind;
use sound_registry::{SoundHandle, SoundMode, SoundRegistry};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AudioRoute {
    Earpiece,
    Speaker,
    Headset,
    Bluetooth,
    Lineout,
    Spdif,
    Unknown,
}

impl fmt::Display for AudioRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AudioRoute::Earpiece => "earpiece",
            AudioRoute::Speaker => "speaker",
            AudioRoute::Headset => "headset",
            AudioRoute::Bluetooth => "bluetooth",
            AudioRoute::Lineout => "lineout",
            AudioRoute::Spdif => "spdif",
            AudioRoute::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// The eight events that drive the router.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    HeadsetPlugged,
    HeadsetUnplugged,
    BtConnected,
    BtDisconnected,
    SpeakerEnable,
    SpeakerDisable,
    CallStart(MediaKind),
    CallStop,
}

/// The router's full state. `route_before_call` is a snapshot taken on
/// `CallStart`; `CallStop` does not restore it (it always goes to
/// earpiece), so it is only kept for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterState {
    pub prefer_loudspeaker: bool,
    pub bt_connected: bool,
    pub wired_headset_connected: bool,
    pub current_route: AudioRoute,
    pub route_before_call: Option<AudioRoute>,
    in_call: bool,
    call_kind: Option<MediaKind>,
}

impl Default for RouterState {
    fn default() -> Self {
        RouterState {
            prefer_loudspeaker: false,
            bt_connected: false,
            wired_headset_connected: false,
            current_route: AudioRoute::Earpiece,
            route_before_call: None,
            in_call: false,
            call_kind: None,
        }
    }
}

impl RouterState {
    pub fn new() -> Self {
        RouterState::default()
    }

    fn idle_route(&self) -> AudioRoute {
        if self.wired_headset_connected {
            AudioRoute::Headset
        } else if self.bt_connected {
            AudioRoute::Bluetooth
        } else if self.prefer_loudspeaker {
            AudioRoute::Speaker
        } else {
            AudioRoute::Earpiece
        }
    }

    /// Pure transition function: applies `event`, mutates the router's
    /// persistent fields, and returns the wanted route. `current_route` is
    /// updated to the returned value by the caller once the platform has
    /// confirmed it (see [`AudioRoutingController::run`]).
    pub fn apply(&mut self, event: RouterEvent) -> AudioRoute {
        match event {
            RouterEvent::HeadsetPlugged => {
                self.wired_headset_connected = true;
                self.prefer_loudspeaker = false;
                AudioRoute::Headset
            }
            RouterEvent::HeadsetUnplugged => {
                self.wired_headset_connected = false;
                if self.in_call && self.call_kind == Some(MediaKind::Video) {
                    self.prefer_loudspeaker = true;
                }
                if self.current_route == AudioRoute::Speaker {
                    AudioRoute::Speaker
                } else if self.bt_connected {
                    AudioRoute::Bluetooth
                } else if self.prefer_loudspeaker {
                    AudioRoute::Speaker
                } else {
                    AudioRoute::Earpiece
                }
            }
            RouterEvent::BtConnected => {
                self.bt_connected = true;
                if self.in_call {
                    AudioRoute::Bluetooth
                } else {
                    self.current_route
                }
            }
            RouterEvent::BtDisconnected => {
                self.bt_connected = false;
                if self.wired_headset_connected {
                    AudioRoute::Headset
                } else if self.prefer_loudspeaker {
                    AudioRoute::Speaker
                } else {
                    AudioRoute::Earpiece
                }
            }
            RouterEvent::SpeakerEnable => {
                self.prefer_loudspeaker = true;
                AudioRoute::Speaker
            }
            RouterEvent::SpeakerDisable => {
                self.prefer_loudspeaker = false;
                if self.wired_headset_connected {
                    AudioRoute::Headset
                } else if self.bt_connected {
                    AudioRoute::Bluetooth
                } else {
                    AudioRoute::Earpiece
                }
            }
            RouterEvent::CallStart(MediaKind::Audio) => {
                self.route_before_call = Some(self.current_route);
                self.in_call = true;
                self.call_kind = Some(MediaKind::Audio);
                self.idle_route()
            }
            RouterEvent::CallStart(MediaKind::Video) => {
                self.route_before_call = Some(self.current_route);
                self.in_call = true;
                self.call_kind = Some(MediaKind::Video);
                // prefer_loudspeaker stays false on video call start (see
                // DESIGN.md Open Questions).
                self.prefer_loudspeaker = false;
                if self.wired_headset_connected {
                    AudioRoute::Headset
                } else if self.bt_connected {
                    AudioRoute::Bluetooth
                } else {
                    AudioRoute::Speaker
                }
            }
            RouterEvent::CallStart(MediaKind::VideoRtx) => {
                // RTX never starts a call on its own; treat as a no-op on
                // the router.
                self.current_route
            }
            RouterEvent::CallStop => {
                self.in_call = false;
                self.call_kind = None;
                self.route_before_call = None;
                self.prefer_loudspeaker = false;
                AudioRoute::Earpiece
            }
        }
    }
}

/// Narrow platform collaborator: the audio task calls
/// `enable` with the wanted route and gets back what the hardware actually
/// settled on, which may differ (e.g. Bluetooth SCO not yet up).
#[async_trait]
pub trait AudioDevicePlatform: Send + Sync {
    async fn init(&self) -> crate::error::Result<()>;
    async fn teardown(&self) -> crate::error::Result<()>;
    async fn enable(&self, wanted: AudioRoute) -> crate::error::Result<AudioRoute>;
}

#[derive(Debug)]
pub enum AudioCommand {
    Play(String),
    Pause(String),
    Stop(String),
    RegisterMedia {
        name: String,
        handle: SoundHandle,
        mixing_allowed: bool,
        playable_in_call: bool,
        intensity: i32,
        priority: i32,
        is_call_media: bool,
    },
    DeregisterMedia(String),
    SetIntensity(SoundMode),
    CallState {
        active: bool,
        kind: MediaKind,
    },
    EnableSpeaker(bool),
    HeadsetConnected(bool),
    BtConnected(bool),
    Exit,
}

pub type OnRouteChangedHdlrFn = Box<dyn Fn(AudioRoute) + Send + Sync>;

/// Owns [`RouterState`] and the [`SoundRegistry`], driven entirely by
/// [`AudioCommand`]s received over `mpsc`. Spawned once per session as its
/// own `tokio` task; `started` flips only after the receive loop is
/// ready, so senders racing the task's startup never lose a message.
pub struct AudioRoutingController<P: AudioDevicePlatform> {
    state: RouterState,
    registry: SoundRegistry,
    platform: P,
    on_route_changed: Option<OnRouteChangedHdlrFn>,
}

impl<P: AudioDevicePlatform> AudioRoutingController<P> {
    pub fn new(platform: P, on_route_changed: Option<OnRouteChangedHdlrFn>) -> Self {
        AudioRoutingController {
            state: RouterState::new(),
            registry: SoundRegistry::new(),
            platform,
            on_route_changed,
        }
    }

    pub fn state(&self) -> &RouterState {
        &self.state
    }

    async fn apply_route_change(&mut self, event: RouterEvent) -> crate::error::Result<()> {
        let wanted = self.state.apply(event);
        let observed = self.platform.enable(wanted).await?;

        let effective = if observed != wanted {
            if self.state.in_call {
                log::warn!(
                    "audio route {wanted} requested but platform reports {observed}; no retry while in call"
                );
                observed
            } else {
                log::debug!("audio route settled optimistically at {wanted} despite platform reporting {observed}");
                wanted
            }
        } else {
            observed
        };

        self.state.current_route = effective;
        if let Some(handler) = &self.on_route_changed {
            handler(effective);
        }
        Ok(())
    }

    /// Runs until [`AudioCommand::Exit`] is received or `rx` closes.
    /// `started` is set once the loop is ready to receive: callers must
    /// observe it before sending.
    pub async fn run(mut self, mut rx: mpsc::Receiver<AudioCommand>, started: Arc<AtomicBool>) {
        if let Err(e) = self.platform.init().await {
            log::warn!("audio platform init failed: {e}");
        }
        started.store(true, Ordering::SeqCst);

        while let Some(cmd) = rx.recv().await {
            match cmd {
                AudioCommand::Play(name) => match self.registry.play(&name) {
                    Ok(_) => {}
                    Err(e) => log::warn!("play({name}) failed: {e}"),
                },
                AudioCommand::Pause(name) => {
                    if let Err(e) = self.registry.pause(&name) {
                        log::warn!("pause({name}) failed: {e}");
                    }
                }
                AudioCommand::Stop(name) => {
                    if let Err(e) = self.registry.stop(&name) {
                        log::warn!("stop({name}) failed: {e}");
                    }
                }
                AudioCommand::RegisterMedia {
                    name,
                    handle,
                    mixing_allowed,
                    playable_in_call,
                    intensity,
                    priority,
                    is_call_media,
                } => {
                    if let Err(e) = self.registry.register(
                        name,
                        handle,
                        mixing_allowed,
                        playable_in_call,
                        intensity,
                        priority,
                        is_call_media,
                    ) {
                        log::warn!("register_media failed: {e}");
                    }
                }
                AudioCommand::DeregisterMedia(name) => {
                    self.registry.unregister(&name);
                }
                AudioCommand::SetIntensity(mode) => {
                    self.registry.set_sound_mode(mode);
                }
                AudioCommand::CallState { active, kind } => {
                    let event = if active {
                        RouterEvent::CallStart(kind)
                    } else {
                        RouterEvent::CallStop
                    };
                    if let Err(e) = self.apply_route_change(event).await {
                        log::warn!("call-state route change failed: {e}");
                    }
                }
                AudioCommand::EnableSpeaker(on) => {
                    let event = if on {
                        RouterEvent::SpeakerEnable
                    } else {
                        RouterEvent::SpeakerDisable
                    };
                    if let Err(e) = self.apply_route_change(event).await {
                        log::warn!("speaker route change failed: {e}");
                    }
                }
                AudioCommand::HeadsetConnected(plugged) => {
                    let event = if plugged {
                        RouterEvent::HeadsetPlugged
                    } else {
                        RouterEvent::HeadsetUnplugged
                    };
                    if let Err(e) = self.apply_route_change(event).await {
                        log::warn!("headset route change failed: {e}");
                    }
                }
                AudioCommand::BtConnected(connected) => {
                    let event = if connected {
                        RouterEvent::BtConnected
                    } else {
                        RouterEvent::BtDisconnected
                    };
                    if let Err(e) = self.apply_route_change(event).await {
                        log::warn!("bluetooth route change failed: {e}");
                    }
                }
                AudioCommand::Exit => break,
            }
        }

        if let Err(e) = self.platform.teardown().await {
            log::warn!("audio platform teardown failed: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn headset_plugged_wins_when_idle() {
        let mut s = RouterState::new();
        assert_eq!(s.apply(RouterEvent::HeadsetPlugged), AudioRoute::Headset);
        assert!(s.wired_headset_connected);
        assert!(!s.prefer_loudspeaker);
    }

    #[test]
    fn headset_unplugged_falls_back_to_bluetooth_then_earpiece() {
        let mut s = RouterState::new();
        s.apply(RouterEvent::HeadsetPlugged);
        s.current_route = AudioRoute::Headset;
        s.apply(RouterEvent::BtConnected);
        assert_eq!(s.apply(RouterEvent::HeadsetUnplugged), AudioRoute::Bluetooth);

        let mut s2 = RouterState::new();
        s2.apply(RouterEvent::HeadsetPlugged);
        s2.current_route = AudioRoute::Headset;
        assert_eq!(s2.apply(RouterEvent::HeadsetUnplugged), AudioRoute::Earpiece);
    }

    #[test]
    fn speaker_enable_then_disable_with_no_accessories_goes_to_earpiece() {
        let mut s = RouterState::new();
        assert_eq!(s.apply(RouterEvent::SpeakerEnable), AudioRoute::Speaker);
        assert!(s.prefer_loudspeaker);
        assert_eq!(s.apply(RouterEvent::SpeakerDisable), AudioRoute::Earpiece);
        assert!(!s.prefer_loudspeaker);
    }

    #[test]
    fn wired_headset_and_not_preferring_loudspeaker_and_no_call_wants_headset() {
        let mut s = RouterState::new();
        s.apply(RouterEvent::HeadsetPlugged);
        assert!(s.wired_headset_connected);
        assert!(!s.prefer_loudspeaker);
        assert!(!s.in_call);
        assert_eq!(s.idle_route(), AudioRoute::Headset);
    }

    #[test]
    fn video_call_start_leaves_prefer_loudspeaker_false() {
        let mut s = RouterState::new();
        s.apply(RouterEvent::CallStart(MediaKind::Video));
        assert!(!s.prefer_loudspeaker);
    }

    #[test]
    fn call_stop_always_returns_to_earpiece() {
        let mut s = RouterState::new();
        s.apply(RouterEvent::SpeakerEnable);
        s.apply(RouterEvent::CallStart(MediaKind::Audio));
        assert_eq!(s.apply(RouterEvent::CallStop), AudioRoute::Earpiece);
        assert!(!s.prefer_loudspeaker);
        assert!(s.route_before_call.is_none());
    }
}
