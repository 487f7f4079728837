//! SDP Negotiator: generates and parses offer/answer session
//! descriptions over `sdp::SessionDescription`, tracks negotiation state,
//! and exposes the resolved codec/crypto/SSRC parameters the coordinator
//! needs to bring up RTP and DTLS.

pub mod sdp_type;

use std::collections::HashMap;
use std::fmt;

use sdp::description::common::{Address, ConnectionInformation};
use sdp::description::media::{MediaDescription, MediaName, RangedPort};
use sdp::description::session::SessionDescription;

use crate::dtls_transport::dtls_fingerprint::DtlsFingerprint;
use crate::dtls_transport::dtls_role::DtlsRole;
use crate::error::{Error, Result};
use crate::sdp::sdp_type::MediaKind;

/// Dynamic payload-type ranges this engine assigns codecs from.
pub const AUDIO_PT_RANGE: std::ops::RangeInclusive<u8> = 96..=99;
pub const VIDEO_PT_RANGE: std::ops::RangeInclusive<u8> = 100..=110;

const DEFAULT_AUDIO_CLOCK_RATE: u32 = 48_000;

/// One negotiable codec: a name/clock-rate pair bound to a payload type once
/// offered. Encode/decode of the media itself stays out of scope; this is
/// purely the SDP-visible identity of a codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecEntry {
    pub payload_type: u8,
    pub name: String,
    pub clock_rate: u32,
}

impl CodecEntry {
    pub fn opus(payload_type: u8) -> Self {
        CodecEntry {
            payload_type,
            name: "opus".to_string(),
            clock_rate: DEFAULT_AUDIO_CLOCK_RATE,
        }
    }

    pub fn vp8(payload_type: u8) -> Self {
        CodecEntry {
            payload_type,
            name: "VP8".to_string(),
            clock_rate: 90_000,
        }
    }

    pub fn rtx(payload_type: u8, clock_rate: u32) -> Self {
        CodecEntry {
            payload_type,
            name: "rtx".to_string(),
            clock_rate,
        }
    }
}

/// Negotiation progress, shaped like `RTCSignalingState` but collapsed to
/// the two offer/answer flows this engine supports (no pranswer, no
/// rollback).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum SdpState {
    #[default]
    Init,
    LocalOffer,
    RemoteOffer,
    LocalAnswer,
    RemoteAnswer,
    Complete,
}

impl fmt::Display for SdpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SdpState::Init => "init",
            SdpState::LocalOffer => "local-offer",
            SdpState::RemoteOffer => "remote-offer",
            SdpState::LocalAnswer => "local-answer",
            SdpState::RemoteAnswer => "remote-answer",
            SdpState::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// What the negotiator learned from the remote description: the pieces the
/// ICE and DTLS engines need to proceed.
#[derive(Debug, Clone)]
pub struct RemoteParams {
    pub ice_ufrag: String,
    pub ice_pwd: String,
    pub fingerprint: DtlsFingerprint,
    pub setup: DtlsRole,
    pub ssrcs: HashMap<MediaKind, u32>,
    pub candidates: Vec<String>,
    pub end_of_candidates: bool,
    /// Codecs offered per media kind, in `a=rtpmap` order, payload types as
    /// the offerer chose them. An answer must echo these back rather than
    /// substitute its own default payload types for the same codec names.
    pub audio_codecs: Vec<CodecEntry>,
    pub video_codecs: Vec<CodecEntry>,
}

/// Wraps `sdp::SessionDescription` generation/parsing and tracks where the
/// offer/answer exchange currently stands. One instance per session, owned
/// by the network/coordination task.
pub struct SdpNegotiator {
    state: SdpState,
    local_ufrag: String,
    local_pwd: String,
    local_fingerprint: DtlsFingerprint,
    local_role: DtlsRole,
    local_ssrcs: HashMap<MediaKind, u32>,
    audio_codecs: Vec<CodecEntry>,
    video_codecs: Vec<CodecEntry>,
    has_video: bool,
    privacy_mode: bool,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    remote: Option<RemoteParams>,
}

impl SdpNegotiator {
    pub fn new(
        local_ufrag: String,
        local_pwd: String,
        local_fingerprint: DtlsFingerprint,
        local_ssrcs: HashMap<MediaKind, u32>,
        has_video: bool,
        privacy_mode: bool,
    ) -> Self {
        SdpNegotiator {
            state: SdpState::Init,
            local_ufrag,
            local_pwd,
            local_fingerprint,
            local_role: DtlsRole::Actpass,
            local_ssrcs,
            audio_codecs: vec![CodecEntry::opus(96)],
            video_codecs: vec![CodecEntry::vp8(100), CodecEntry::rtx(101, 90_000)],
            has_video,
            privacy_mode,
            local_description: None,
            remote_description: None,
            remote: None,
        }
    }

    pub fn state(&self) -> SdpState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == SdpState::Complete
    }

    pub fn remote_params(&self) -> Option<&RemoteParams> {
        self.remote.as_ref()
    }

    /// Back to the initial state; local/remote descriptions are dropped.
    pub fn reset(&mut self) {
        self.state = SdpState::Init;
        self.local_role = DtlsRole::Actpass;
        self.local_description = None;
        self.remote_description = None;
        self.remote = None;
    }

    /// Build an offer with `a=setup:actpass`, our ICE credentials and
    /// fingerprint, BUNDLE grouping, and one `m=` section per media kind
    /// in scope. `candidates` are pre-marshaled `a=candidate` values
    /// (omitted entirely in privacy mode unless relayed).
    pub fn generate_offer(&mut self, candidates: &[String], end_of_candidates: bool) -> Result<String> {
        if !matches!(self.state, SdpState::Init) {
            return Err(Error::invalid_argument(format!(
                "generate_offer called in state {}",
                self.state
            )));
        }
        self.local_role = DtlsRole::Actpass;
        let audio_codecs = self.audio_codecs.clone();
        let video_codecs = self.video_codecs.clone();
        let sd = self.build_session_description(&audio_codecs, &video_codecs, candidates, end_of_candidates)?;
        let text = sd.marshal();
        self.local_description = Some(sd);
        self.state = SdpState::LocalOffer;
        Ok(text)
    }

    /// Parse a remote offer, resolving the SDP-visible parameters the
    /// ICE/DTLS engines need. Must precede [`Self::generate_answer`].
    pub fn handle_offer(&mut self, offer: &str) -> Result<()> {
        if !matches!(self.state, SdpState::Init) {
            return Err(Error::invalid_argument(format!(
                "handle_offer called in state {}",
                self.state
            )));
        }
        let sd = parse_session_description(offer)?;
        let remote = self.extract_remote_params(&sd)?;
        self.remote_description = Some(sd);
        self.remote = Some(remote);
        self.state = SdpState::RemoteOffer;
        Ok(())
    }

    /// Build the answer, echoing the offer's payload types and
    /// resolving our setup role (active if the offer was actpass/passive,
    /// passive if the offer was active).
    pub fn generate_answer(&mut self, candidates: &[String], end_of_candidates: bool) -> Result<String> {
        let Some(remote) = self.remote.clone() else {
            return Err(Error::invalid_argument(
                "generate_answer called before handle_offer",
            ));
        };
        if !matches!(self.state, SdpState::RemoteOffer) {
            return Err(Error::invalid_argument(format!(
                "generate_answer called in state {}",
                self.state
            )));
        }
        self.local_role = DtlsRole::answer_to(remote.setup);
        let audio_codecs = if remote.audio_codecs.is_empty() {
            self.audio_codecs.clone()
        } else {
            remote.audio_codecs
        };
        let video_codecs = if remote.video_codecs.is_empty() {
            self.video_codecs.clone()
        } else {
            remote.video_codecs
        };
        let sd = self.build_session_description(&audio_codecs, &video_codecs, candidates, end_of_candidates)?;
        let text = sd.marshal();
        self.local_description = Some(sd);
        self.state = SdpState::Complete;
        Ok(text)
    }

    /// Parse the remote's answer to our offer.
    pub fn handle_answer(&mut self, answer: &str) -> Result<()> {
        if !matches!(self.state, SdpState::LocalOffer) {
            return Err(Error::invalid_argument(format!(
                "handle_answer called in state {}",
                self.state
            )));
        }
        let sd = parse_session_description(answer)?;
        let remote = self.extract_remote_params(&sd)?;
        self.remote_description = Some(sd);
        self.remote = Some(remote);
        self.state = SdpState::Complete;
        Ok(())
    }

    /// Convenience combining [`Self::handle_offer`] and
    /// [`Self::generate_answer`] for callers that only ever answer.
    pub fn offer_answer(
        &mut self,
        offer: &str,
        candidates: &[String],
        end_of_candidates: bool,
    ) -> Result<String> {
        self.handle_offer(offer)?;
        self.generate_answer(candidates, end_of_candidates)
    }

    fn build_session_description(
        &self,
        audio_codecs: &[CodecEntry],
        video_codecs: &[CodecEntry],
        candidates: &[String],
        end_of_candidates: bool,
    ) -> Result<SessionDescription> {
        let mut sd = SessionDescription::new_jsep_session_description(false)
            .with_value_attribute("group".to_string(), "BUNDLE audio video".to_string())
            .with_fingerprint(
                self.local_fingerprint.algorithm.clone(),
                self.local_fingerprint.value.clone(),
            );

        let emit_candidates = !self.privacy_mode;

        sd = sd.with_media(self.build_media(MediaKind::Audio, audio_codecs, candidates, emit_candidates, end_of_candidates)?);
        if self.has_video {
            sd = sd.with_media(self.build_media(
                MediaKind::Video,
                video_codecs,
                candidates,
                emit_candidates,
                end_of_candidates,
            )?);
        }
        Ok(sd)
    }

    fn build_media(
        &self,
        kind: MediaKind,
        codecs: &[CodecEntry],
        candidates: &[String],
        emit_candidates: bool,
        end_of_candidates: bool,
    ) -> Result<MediaDescription> {
        let mut md = MediaDescription {
            media_name: MediaName {
                media: kind.to_string(),
                port: RangedPort {
                    value: 9,
                    range: None,
                },
                protos: vec!["UDP".to_string(), "TLS".to_string(), "RTP".to_string(), "SAVPF".to_string()],
                formats: vec![],
            },
            media_title: None,
            connection_information: Some(ConnectionInformation {
                network_type: "IN".to_string(),
                address_type: "IP4".to_string(),
                address: Some(Address {
                    address: "0.0.0.0".to_string(),
                    ttl: None,
                    range: None,
                }),
            }),
            bandwidth: vec![],
            encryption_key: None,
            attributes: vec![],
        };

        for codec in codecs {
            md = md.with_codec(codec.payload_type, codec.name.clone(), codec.clock_rate, 0, String::new());
        }

        md = md
            .with_value_attribute("mid".to_string(), kind.to_string())
            .with_ice_credentials(self.local_ufrag.clone(), self.local_pwd.clone())
            .with_value_attribute("setup".to_string(), self.local_role.to_string())
            .with_property_attribute("rtcp-mux".to_string());

        if let Some(ssrc) = self.local_ssrcs.get(&kind) {
            md = md.with_value_attribute("ssrc".to_string(), format!("{ssrc} cname:media-session"));
        }

        if emit_candidates {
            for c in candidates {
                md = md.with_candidate(c.clone());
            }
            if end_of_candidates {
                md = md.with_property_attribute("end-of-candidates".to_string());
            }
        }

        Ok(md)
    }

    fn extract_remote_params(&self, sd: &SessionDescription) -> Result<RemoteParams> {
        let media = sd
            .media_descriptions
            .first()
            .ok_or_else(|| Error::invalid_argument("sdp has no media sections"))?;

        let ice_ufrag = attribute(sd, media, "ice-ufrag")
            .ok_or_else(|| Error::invalid_argument("missing ice-ufrag"))?;
        let ice_pwd = attribute(sd, media, "ice-pwd")
            .ok_or_else(|| Error::invalid_argument("missing ice-pwd"))?;
        let fingerprint_line = attribute(sd, media, "fingerprint")
            .ok_or_else(|| Error::invalid_argument("missing fingerprint, required for dtls-srtp"))?;
        let fingerprint = parse_fingerprint(&fingerprint_line)?;
        let setup = attribute(sd, media, "setup")
            .map(|s| DtlsRole::from(s.as_str()))
            .unwrap_or_default();

        let mut ssrcs = HashMap::new();
        for (kind, md) in [(MediaKind::Audio, sd.media_descriptions.first()), (MediaKind::Video, sd.media_descriptions.get(1))] {
            if let Some(md) = md {
                if let Some(ssrc_line) = md.attribute("ssrc").flatten() {
                    if let Some(id) = ssrc_line.split_whitespace().next().and_then(|s| s.parse::<u32>().ok()) {
                        ssrcs.insert(kind, id);
                    }
                }
            }
        }

        let mut candidates = Vec::new();
        let mut end_of_candidates = false;
        for md in &sd.media_descriptions {
            for a in &md.attributes {
                if a.key == "candidate" {
                    if let Some(v) = &a.value {
                        candidates.push(v.clone());
                    }
                } else if a.key == "end-of-candidates" {
                    end_of_candidates = true;
                }
            }
        }

        let audio_codecs = sd
            .media_descriptions
            .first()
            .map(parse_codecs)
            .unwrap_or_default();
        let video_codecs = sd
            .media_descriptions
            .get(1)
            .map(parse_codecs)
            .unwrap_or_default();

        Ok(RemoteParams {
            ice_ufrag,
            ice_pwd,
            fingerprint,
            setup,
            ssrcs,
            candidates,
            end_of_candidates,
            audio_codecs,
            video_codecs,
        })
    }
}

/// Recover the codecs a media section offered from its `a=rtpmap:<pt>
/// <name>/<rate>[/<channels>]` attributes, in the order they appear.
/// `MediaDescription::attribute` only returns the first match, so multiple
/// rtpmap lines (one per codec) have to be read straight out of the
/// attribute list.
fn parse_codecs(md: &MediaDescription) -> Vec<CodecEntry> {
    md.attributes
        .iter()
        .filter(|a| a.key == "rtpmap")
        .filter_map(|a| a.value.as_deref())
        .filter_map(parse_rtpmap)
        .collect()
}

/// `"<pt> <name>/<rate>[/<channels>]"`.
fn parse_rtpmap(value: &str) -> Option<CodecEntry> {
    let mut parts = value.splitn(2, ' ');
    let payload_type = parts.next()?.trim().parse::<u8>().ok()?;
    let rest = parts.next()?;
    let mut spec = rest.splitn(2, '/');
    let name = spec.next()?.to_string();
    let clock_rate = spec.next()?.splitn(2, '/').next()?.parse::<u32>().ok()?;
    Some(CodecEntry {
        payload_type,
        name,
        clock_rate,
    })
}

fn attribute(sd: &SessionDescription, md: &MediaDescription, key: &str) -> Option<String> {
    md.attribute(key)
        .flatten()
        .map(|s| s.to_string())
        .or_else(|| sd.attribute(key).cloned())
}

/// `a=fingerprint:<algorithm> <value>`.
fn parse_fingerprint(line: &str) -> Result<DtlsFingerprint> {
    let mut parts = line.splitn(2, ' ');
    let algorithm = parts.next().unwrap_or_default().to_string();
    let value = parts
        .next()
        .ok_or_else(|| Error::invalid_argument("malformed fingerprint attribute"))?
        .to_string();
    Ok(DtlsFingerprint { algorithm, value })
}

fn parse_session_description(raw: &str) -> Result<SessionDescription> {
    let mut reader = std::io::Cursor::new(raw.as_bytes());
    SessionDescription::unmarshal(&mut reader).map_err(Error::Sdp)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dtls_transport::dtls_fingerprint::DtlsFingerprint;

    fn fingerprint() -> DtlsFingerprint {
        DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "AB:CD:EF".to_string(),
        }
    }

    fn negotiator() -> SdpNegotiator {
        let mut ssrcs = HashMap::new();
        ssrcs.insert(MediaKind::Audio, 111);
        SdpNegotiator::new(
            "ufrag".to_string(),
            "password1234567890123".to_string(),
            fingerprint(),
            ssrcs,
            false,
            false,
        )
    }

    #[test]
    fn generate_offer_advances_state_and_embeds_fingerprint() {
        let mut n = negotiator();
        let offer = n.generate_offer(&[], false).expect("offer");
        assert_eq!(n.state(), SdpState::LocalOffer);
        assert!(offer.contains("a=fingerprint:sha-256 AB:CD:EF"));
        assert!(offer.contains("a=setup:actpass"));
    }

    #[test]
    fn offer_answer_round_trips_ice_and_fingerprint() {
        let offerer = negotiator().generate_offer(&[], false).unwrap();

        let mut answerer = negotiator();
        let answer = answerer.offer_answer(&offerer, &[], false).expect("answer");
        assert_eq!(answerer.state(), SdpState::Complete);
        assert!(answer.contains("a=setup:active"));

        let remote = answerer.remote_params().expect("remote params recorded");
        assert_eq!(remote.ice_ufrag, "ufrag");
        assert_eq!(remote.fingerprint.value, "AB:CD:EF");
        assert_eq!(remote.setup, DtlsRole::Actpass);
    }

    #[test]
    fn answer_echoes_offered_payload_type_instead_of_local_default() {
        let mut offerer = negotiator();
        offerer.audio_codecs = vec![CodecEntry::opus(97)];
        let offer = offerer.generate_offer(&[], false).unwrap();
        assert!(offer.contains("a=rtpmap:97 opus/48000"));

        let mut answerer = negotiator();
        assert_eq!(answerer.audio_codecs, vec![CodecEntry::opus(96)]);
        let answer = answerer.offer_answer(&offer, &[], false).unwrap();
        assert!(answer.contains("a=rtpmap:97 opus/48000"));
        assert!(!answer.contains("a=rtpmap:96 opus/48000"));

        let remote = answerer.remote_params().unwrap();
        assert_eq!(remote.audio_codecs, vec![CodecEntry::opus(97)]);
    }

    #[test]
    fn handle_answer_before_offer_is_invalid_argument() {
        let mut n = negotiator();
        let err = n.handle_answer("v=0\r\n").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn missing_fingerprint_is_rejected() {
        let sd = SessionDescription::new_jsep_session_description(false).with_media(
            MediaDescription {
                media_name: MediaName {
                    media: "audio".to_string(),
                    port: RangedPort { value: 9, range: None },
                    protos: vec!["UDP".to_string()],
                    formats: vec!["96".to_string()],
                },
                media_title: None,
                connection_information: None,
                bandwidth: vec![],
                encryption_key: None,
                attributes: vec![],
            }
            .with_ice_credentials("u".to_string(), "p".to_string()),
        );
        let mut n = negotiator();
        let err = n.handle_offer(&sd.marshal()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
