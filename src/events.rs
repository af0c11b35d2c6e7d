//! Closed vocabularies surfaced outside the engine.
//!
//! [`StreamingEvent`] is what observers (the UI layer) see; [`StreamingStatus`]
//! is the peer-visible playback state attached to a connection.

/// Event emitted to session observers as a streaming session evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingEvent {
    Start,
    Playing,
    Paused,
    Completed,
    Unsupported,
    Error,
    Stop,
}

/// Peer-visible playback status for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingStatus {
    #[default]
    Unknown,
    NotAvailable,
    Ready,
    Playing,
    Paused,
    Unsupported,
    Error,
}

impl std::fmt::Display for StreamingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StreamingStatus::Unknown => "unknown",
            StreamingStatus::NotAvailable => "not-available",
            StreamingStatus::Ready => "ready",
            StreamingStatus::Playing => "playing",
            StreamingStatus::Paused => "paused",
            StreamingStatus::Unsupported => "unsupported",
            StreamingStatus::Error => "error",
        };
        write!(f, "{name}")
    }
}
