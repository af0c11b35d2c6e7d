//! Local/remote duality for the block request path.
//!
//! A pull source does not care where its bytes come from. A
//! [`RemoteBlockSource`] serializes requests onto a peer connection; a
//! [`LocalBlockSource`] hands them straight to the same-process streamer with
//! no serialization and no network round-trip (self-preview). The strategy is
//! fixed at construction, so no downstream code branches on connection
//! nullability.

use std::sync::Arc;

use tracing::debug;

use crate::session::{CallSession, Connection};
use crate::wire::{StreamingControlIQ, StreamingPacket, StreamingRequestIQ, WIRE_VERSION};

/// One block request, before any wire encoding.
#[derive(Debug, Clone)]
pub struct BlockRequest {
    pub ident: u64,
    pub offset: u64,
    pub length: u64,
    /// Requester playback position, milliseconds.
    pub player_position: u64,
    /// Requester wall clock, milliseconds.
    pub timestamp: u64,
    /// Requester's last measured round-trip time, milliseconds.
    pub last_rtt: i32,
}

/// Where a pull source sends its block requests.
pub trait BlockSource: Send + Sync {
    fn request_block(&self, request: BlockRequest);
}

/// Where a player sends its control traffic (ASK and STATUS messages).
pub trait ControlSink: Send + Sync {
    fn send_control(&self, iq: StreamingControlIQ);
}

/// Same-process entry points on the streamer, used by the local player.
pub trait LocalStreamer: Send + Sync {
    /// Synchronous lookup path: no serialization, served by the streamer's
    /// sequential worker.
    fn handle_local_request(&self, request: BlockRequest);

    /// Direct local callback replacing a control message.
    fn handle_local_control(&self, iq: StreamingControlIQ);
}

/// Block requests serialized onto a peer connection.
pub struct RemoteBlockSource {
    connection: Arc<dyn Connection>,
    session: Arc<dyn CallSession>,
}

impl RemoteBlockSource {
    pub fn new(connection: Arc<dyn Connection>, session: Arc<dyn CallSession>) -> Self {
        Self {
            connection,
            session,
        }
    }
}

impl BlockSource for RemoteBlockSource {
    fn request_block(&self, request: BlockRequest) {
        let iq = StreamingRequestIQ {
            version: WIRE_VERSION,
            request_id: self.session.allocate_request_id(),
            ident: request.ident,
            offset: request.offset,
            length: request.length,
            timestamp: request.timestamp,
            player_position: request.player_position,
            last_rtt: request.last_rtt,
        };
        debug!(
            ident = request.ident,
            offset = request.offset,
            "Requesting block from peer {}",
            self.connection.peer_id()
        );
        self.connection.send_packet(&StreamingPacket::Request(iq));
    }
}

impl ControlSink for RemoteBlockSource {
    fn send_control(&self, iq: StreamingControlIQ) {
        self.connection.send_packet(&StreamingPacket::Control(iq));
    }
}

/// Block requests handed straight to the same-process streamer.
pub struct LocalBlockSource {
    streamer: Arc<dyn LocalStreamer>,
}

impl LocalBlockSource {
    pub fn new(streamer: Arc<dyn LocalStreamer>) -> Self {
        Self { streamer }
    }
}

impl BlockSource for LocalBlockSource {
    fn request_block(&self, request: BlockRequest) {
        self.streamer.handle_local_request(request);
    }
}

impl ControlSink for LocalBlockSource {
    fn send_control(&self, iq: StreamingControlIQ) {
        self.streamer.handle_local_control(iq);
    }
}
