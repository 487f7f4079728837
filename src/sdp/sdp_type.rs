use std::fmt;

/// Mirrors the JSEP `RTCSdpType` distinction, trimmed to the two
/// variants this engine actually produces (no pranswer/rollback).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        };
        write!(f, "{s}")
    }
}

/// The kind of media a session section (or a `CallStart` event) concerns.
/// `VideoRtx` never appears on its own `m=` line; it shares the video
/// section's SSRC group (RFC 4588) and is tracked only in the SSRC map.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
    VideoRtx,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::VideoRtx => "video-rtx",
        };
        write!(f, "{s}")
    }
}
