//! Collaborator seams: the call session and its peer connections.
//!
//! The engine never reaches for process-wide state; everything it needs from
//! the surrounding call is injected through these traits at construction.

use std::sync::Arc;

use uuid::Uuid;

use crate::events::{StreamingEvent, StreamingStatus};
use crate::wire::StreamingPacket;

/// Identity of one peer connection within a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One peer connection able to carry streaming packets.
pub trait Connection: Send + Sync {
    fn peer_id(&self) -> PeerId;

    /// Sends a packet to the peer. Transport failures are the transport's
    /// problem; the engine treats sends as fire-and-forget.
    fn send_packet(&self, packet: &StreamingPacket);

    /// Whether the peer advertised support for in-call streaming.
    fn streaming_supported(&self) -> bool;

    /// Records the peer-visible playback status for UI surfaces.
    fn update_streaming_status(&self, status: StreamingStatus);
}

/// The surrounding call: request-id allocation, the connection set and the
/// observer event sink.
pub trait CallSession: Send + Sync {
    /// Allocates a call-wide unique request id.
    fn allocate_request_id(&self) -> u64;

    fn connections(&self) -> Vec<Arc<dyn Connection>>;

    /// Emits a streaming event to observers. `peer` is `None` for events
    /// about the local side.
    fn on_streaming_event(&self, peer: Option<PeerId>, event: StreamingEvent);
}
