//! In-memory session and connection doubles for tests.
//!
//! Kept in the library so integration tests and downstream consumers can
//! exercise the engine without a real call stack behind it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::events::{StreamingEvent, StreamingStatus};
use crate::session::{CallSession, Connection, PeerId};
use crate::stream::block::{BlockRequest, BlockSource, ControlSink};
use crate::wire::{StreamingControlIQ, StreamingPacket};

type PacketHandler = dyn Fn(&StreamingPacket) + Send + Sync;

/// A loopback connection: records everything sent, and optionally hands each
/// packet to an attached handler (typically the other side's dispatcher).
pub struct TestConnection {
    peer: PeerId,
    supported: bool,
    sent: Mutex<Vec<StreamingPacket>>,
    statuses: Mutex<Vec<StreamingStatus>>,
    handler: Mutex<Option<Arc<PacketHandler>>>,
}

impl TestConnection {
    pub fn new() -> Arc<Self> {
        Self::with_support(true)
    }

    pub fn with_support(supported: bool) -> Arc<Self> {
        Arc::new(Self {
            peer: PeerId::random(),
            supported,
            sent: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
        })
    }

    /// Routes future sends into `handler` in addition to recording them.
    pub fn attach<F>(&self, handler: F)
    where
        F: Fn(&StreamingPacket) + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap() = Some(Arc::new(handler));
    }

    pub fn sent(&self) -> Vec<StreamingPacket> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn statuses(&self) -> Vec<StreamingStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

impl Connection for TestConnection {
    fn peer_id(&self) -> PeerId {
        self.peer
    }

    fn send_packet(&self, packet: &StreamingPacket) {
        self.sent.lock().unwrap().push(packet.clone());
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(packet);
        }
    }

    fn streaming_supported(&self) -> bool {
        self.supported
    }

    fn update_streaming_status(&self, status: StreamingStatus) {
        self.statuses.lock().unwrap().push(status);
    }
}

/// A call session over a fixed set of [`TestConnection`]s.
pub struct TestSession {
    next_request_id: AtomicU64,
    connections: Mutex<Vec<Arc<dyn Connection>>>,
    events: Mutex<Vec<(Option<PeerId>, StreamingEvent)>>,
}

impl TestSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_request_id: AtomicU64::new(1),
            connections: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn add_connection(&self, connection: Arc<dyn Connection>) {
        self.connections.lock().unwrap().push(connection);
    }

    pub fn events(&self) -> Vec<(Option<PeerId>, StreamingEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_kinds(&self) -> Vec<StreamingEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| *event)
            .collect()
    }
}

impl CallSession for TestSession {
    fn allocate_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn connections(&self) -> Vec<Arc<dyn Connection>> {
        self.connections.lock().unwrap().clone()
    }

    fn on_streaming_event(&self, peer: Option<PeerId>, event: StreamingEvent) {
        self.events.lock().unwrap().push((peer, event));
    }
}

/// Records block requests without answering them.
#[derive(Default)]
pub struct CaptureBlockSource {
    requests: Mutex<Vec<BlockRequest>>,
}

impl CaptureBlockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<BlockRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl BlockSource for CaptureBlockSource {
    fn request_block(&self, request: BlockRequest) {
        self.requests.lock().unwrap().push(request);
    }
}

/// Records control messages without forwarding them.
#[derive(Default)]
pub struct CaptureControlSink {
    sent: Mutex<Vec<StreamingControlIQ>>,
}

impl CaptureControlSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<StreamingControlIQ> {
        self.sent.lock().unwrap().clone()
    }
}

impl ControlSink for CaptureControlSink {
    fn send_control(&self, iq: StreamingControlIQ) {
        self.sent.lock().unwrap().push(iq);
    }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
