use std::fmt;

/// ICE controlling/controlled role, mirrored from `ice::agent::agent_config`
/// rather than redefined — kept here only as the small `Copy` type the
/// coordinator threads through `start_checks`.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum RTCIceRole {
    #[default]
    Unspecified,
    Controlling,
    Controlled,
}

impl fmt::Display for RTCIceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RTCIceRole::Unspecified => write!(f, "unspecified"),
            RTCIceRole::Controlling => write!(f, "controlling"),
            RTCIceRole::Controlled => write!(f, "controlled"),
        }
    }
}
