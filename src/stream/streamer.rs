//! The serving side: one media file streamed to every capable peer.
//!
//! The streamer owns the canonical copy of the media. Block requests from
//! remote players and from the local preview player funnel into a single
//! sequential worker thread that owns the file handle and the block cache,
//! so file IO never contends and blocks are produced in offset order.
//! Synchronization decisions (where everyone should pause or resume) are
//! made here from the per-peer clock state.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use crossbeam::channel::{Sender, unbounded};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::buffer::{BufferCache, ByteRangeBuffer};
use crate::clock::{self, RemotePlayerInfo, now_millis};
use crate::config::StreamingConfig;
use crate::context::PlaybackContext;
use crate::error::{StreamError, StreamResult};
use crate::events::{StreamingEvent, StreamingStatus};
use crate::pipeline::MediaPipelineFactory;
use crate::session::{CallSession, Connection, PeerId};
use crate::stream::block::{BlockRequest, LocalBlockSource, LocalStreamer};
use crate::stream::player::StreamPlayer;
use crate::stream::source::PullDataSource;
use crate::wire::{
    StreamingControl, StreamingControlIQ, StreamingDataIQ, StreamingInfoIQ, StreamingPacket,
};

/// Descriptive metadata broadcast to peers when streaming starts.
#[derive(Debug, Clone, Default)]
pub struct StreamMetadata {
    pub title: String,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub artwork: Option<Vec<u8>>,
    pub duration_ms: u64,
}

/// Allocates a fresh stream ident, unique within the call with overwhelming
/// probability.
pub fn new_stream_ident() -> u64 {
    loop {
        let ident: u64 = rand::random();
        if ident != 0 {
            return ident;
        }
    }
}

/// Where a served block goes back to.
enum ReplyTarget {
    Remote(Arc<dyn Connection>),
    Local(PullDataSource),
}

enum Job {
    Serve {
        request_id: u64,
        offset: u64,
        length: u64,
        timestamp: u64,
        received_at: u64,
        reply: ReplyTarget,
    },
    Close,
}

/// The sharing side of one streaming session.
pub struct Streamer {
    ident: u64,
    video: bool,
    length: u64,
    config: StreamingConfig,
    metadata: StreamMetadata,
    context: PlaybackContext,
    session: Arc<dyn CallSession>,
    factory: Option<Arc<dyn MediaPipelineFactory>>,
    peers: DashMap<PeerId, RemotePlayerInfo>,
    /// Canonical playback state, fed by the local preview player when there
    /// is one and by broadcast targets otherwise.
    canonical: Mutex<RemotePlayerInfo>,
    local_player: Mutex<Option<Arc<StreamPlayer>>>,
    local_source: Mutex<Option<PullDataSource>>,
    jobs: Sender<Job>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    self_ref: Mutex<Weak<Streamer>>,
}

impl Streamer {
    /// Opens `path` and spawns the serving worker. Streaming does not start
    /// until [`start_streaming`](Self::start_streaming).
    pub fn new(
        config: StreamingConfig,
        context: PlaybackContext,
        session: Arc<dyn CallSession>,
        factory: Option<Arc<dyn MediaPipelineFactory>>,
        path: &Path,
        metadata: StreamMetadata,
        video: bool,
    ) -> StreamResult<Arc<Self>> {
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        let (jobs, job_rx) = unbounded::<Job>();
        let streamer = Arc::new(Self {
            ident: new_stream_ident(),
            video,
            length,
            config: config.clone(),
            metadata,
            context,
            session,
            factory,
            peers: DashMap::new(),
            canonical: Mutex::new(RemotePlayerInfo::new()),
            local_player: Mutex::new(None),
            local_source: Mutex::new(None),
            jobs,
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            self_ref: Mutex::new(Weak::new()),
        });
        *streamer.self_ref.lock().unwrap() = Arc::downgrade(&streamer);

        let weak = Arc::downgrade(&streamer);
        let buffer_size = config.buffer_size;
        let ident = streamer.ident;
        let handle = thread::Builder::new()
            .name("streamer".into())
            .spawn(move || {
                let mut cache = BufferCache::new();
                let mut file = file;
                for job in job_rx {
                    match job {
                        Job::Serve {
                            request_id,
                            offset,
                            length,
                            timestamp,
                            received_at,
                            reply,
                        } => {
                            let data =
                                serve_block(&mut file, &mut cache, buffer_size, offset, length);
                            let Some(streamer) = weak.upgrade() else {
                                break;
                            };
                            let now = now_millis();
                            let iq = StreamingDataIQ {
                                version: crate::wire::WIRE_VERSION,
                                request_id,
                                ident,
                                offset,
                                timestamp,
                                streamer_position: streamer.current_position(now),
                                streamer_latency: now.saturating_sub(received_at) as i32,
                                data,
                            };
                            match reply {
                                ReplyTarget::Remote(connection) => {
                                    connection.send_packet(&StreamingPacket::Data(iq));
                                }
                                ReplyTarget::Local(source) => {
                                    source.on_data_message(&iq);
                                }
                            }
                        }
                        Job::Close => break,
                    }
                }
                debug!(ident, "Streamer worker exiting");
            })
            .map_err(StreamError::SourceIo)?;
        *streamer.worker.lock().unwrap() = Some(handle);
        Ok(streamer)
    }

    pub fn ident(&self) -> u64 {
        self.ident
    }

    pub fn is_video(&self) -> bool {
        self.video
    }

    pub fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    pub fn local_player(&self) -> Option<Arc<StreamPlayer>> {
        self.local_player.lock().unwrap().clone()
    }

    fn this(&self) -> Option<Arc<Streamer>> {
        self.self_ref.lock().unwrap().upgrade()
    }

    /// Announces the stream to every capable peer and starts the local
    /// preview player when a pipeline factory was provided.
    pub fn start_streaming(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(this) = self.this() else {
            return;
        };
        let now = now_millis();
        self.canonical.lock().unwrap().update(0, 0, false, now);
        info!(
            ident = self.ident,
            length = self.length,
            video = self.video,
            title = %self.metadata.title,
            "Starting streaming"
        );

        let start = if self.video {
            StreamingControl::StartVideoStreaming
        } else {
            StreamingControl::StartAudioStreaming
        };
        for connection in self.session.connections() {
            if !connection.streaming_supported() {
                connection.update_streaming_status(StreamingStatus::NotAvailable);
                continue;
            }
            self.peers
                .insert(connection.peer_id(), RemotePlayerInfo::new());
            let iq = StreamingControlIQ::new(
                self.session.allocate_request_id(),
                self.ident,
                start,
                self.length,
                now_millis(),
                0,
                0,
            );
            connection.send_packet(&StreamingPacket::Control(iq));
            connection.send_packet(&StreamingPacket::Info(StreamingInfoIQ {
                version: crate::wire::WIRE_VERSION,
                request_id: self.session.allocate_request_id(),
                ident: self.ident,
                title: self.metadata.title.clone(),
                album: self.metadata.album.clone(),
                artist: self.metadata.artist.clone(),
                artwork: self.metadata.artwork.clone(),
                duration: self.metadata.duration_ms,
            }));
        }
        self.session
            .on_streaming_event(None, StreamingEvent::Start);

        if let Some(factory) = &self.factory {
            let local: Arc<LocalBlockSource> =
                Arc::new(LocalBlockSource::new(this.clone() as Arc<dyn LocalStreamer>));
            let player = StreamPlayer::new(
                self.ident,
                self.config.clone(),
                self.context.clone(),
                self.session.clone(),
                factory.clone(),
                local.clone(),
                local,
            );
            *self.local_source.lock().unwrap() = Some(player.source().clone());
            player.start();
            *self.local_player.lock().unwrap() = Some(player);
        }
    }

    /// Best-effort canonical playback position.
    pub fn current_position(&self, now: u64) -> u64 {
        if let Some(player) = self.local_player.lock().unwrap().as_ref() {
            return player.current_position(now);
        }
        self.canonical
            .lock()
            .unwrap()
            .current_position(now)
            .unwrap_or(0)
    }

    /// Pauses everyone at the furthest position any participant has reached.
    pub fn pause(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let now = now_millis();
        let infos = self.participant_infos();
        let target = clock::pause_target(&infos, now).unwrap_or_else(|| self.current_position(now));
        debug!(ident = self.ident, target, "Pausing streaming");
        self.canonical.lock().unwrap().update(target, 0, true, now);
        self.broadcast_lifecycle(StreamingControl::PauseStreaming, target);
    }

    /// Resumes everyone from the position of the participant furthest behind.
    pub fn resume(&self) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let now = now_millis();
        let infos = self.participant_infos();
        let target =
            clock::resume_target(&infos, now).unwrap_or_else(|| self.current_position(now));
        debug!(ident = self.ident, target, "Resuming streaming");
        self.canonical.lock().unwrap().update(target, 0, false, now);
        self.broadcast_lifecycle(StreamingControl::ResumeStreaming, target);
    }

    pub fn seek(&self, position_ms: u64) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let now = now_millis();
        let paused = self.canonical.lock().unwrap().is_paused();
        self.canonical
            .lock()
            .unwrap()
            .update(position_ms, 0, paused, now);
        self.broadcast_lifecycle(StreamingControl::SeekStreaming, position_ms);
    }

    /// Tears the session down. With `notify`, peers are told to stop first.
    /// Idempotent.
    pub fn stop_streaming(&self, notify: bool) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(ident = self.ident, notify, "Stopping streaming");
        if notify {
            self.broadcast_lifecycle_to_peers(StreamingControl::StopStreaming, 0);
        }
        if let Some(player) = self.local_player.lock().unwrap().take() {
            player.stop();
        }
        self.local_source.lock().unwrap().take();
        self.peers.clear();
        let _ = self.jobs.send(Job::Close);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.session.on_streaming_event(None, StreamingEvent::Stop);
    }

    // ---- inbound traffic -------------------------------------------------

    /// Control traffic from one peer: ASK requests and STATUS reports.
    /// Both carry the sender's position and latency, so the peer's clock
    /// state is refreshed before any dispatch; an ASK must be answered with
    /// a target computed from the position it just reported.
    pub fn on_control(&self, peer: PeerId, iq: &StreamingControlIQ) {
        if iq.ident != self.ident || self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let control = iq.control();
        let now = now_millis();
        if let Some(mut info) = self.peers.get_mut(&peer) {
            let paused = if control.is_status() {
                control == StreamingControl::StatusPaused
            } else {
                info.is_paused()
            };
            info.update(iq.position, iq.latency, paused, now);
        }
        if control.is_status() {
            self.report_peer_status(peer, control);
            return;
        }
        match control {
            StreamingControl::AskPause => self.pause(),
            StreamingControl::AskResume => self.resume(),
            StreamingControl::AskSeek => self.seek(iq.position),
            StreamingControl::AskStop => self.stop_streaming(true),
            other => {
                debug!(ident = self.ident, %peer, ?other, "Ignoring control for streamer");
            }
        }
    }

    /// Block request from one peer: clock state first, then the worker.
    pub fn on_request(&self, connection: &Arc<dyn Connection>, iq: &crate::wire::StreamingRequestIQ) {
        if iq.ident != self.ident || self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let now = now_millis();
        if let Some(mut info) = self.peers.get_mut(&connection.peer_id()) {
            let paused = info.is_paused();
            info.update(iq.player_position, iq.last_rtt, paused, now);
        }
        let job = Job::Serve {
            request_id: iq.request_id,
            offset: iq.offset,
            length: iq.length,
            timestamp: iq.timestamp,
            received_at: now,
            reply: ReplyTarget::Remote(connection.clone()),
        };
        if self.jobs.send(job).is_err() {
            warn!(ident = self.ident, "Streamer worker gone, dropping request");
        }
    }

    // ---- internals -------------------------------------------------------

    /// Clock states that participate in synchronization targets: every peer
    /// that has reported, plus the canonical local state.
    fn participant_infos(&self) -> Vec<RemotePlayerInfo> {
        let mut infos: Vec<RemotePlayerInfo> =
            self.peers.iter().map(|entry| entry.value().clone()).collect();
        let canonical = self.canonical.lock().unwrap().clone();
        if canonical.has_update() {
            infos.push(canonical);
        }
        infos
    }

    fn broadcast_lifecycle(&self, control: StreamingControl, position: u64) {
        self.broadcast_lifecycle_to_peers(control, position);
        // The local preview follows the same control path as remote players.
        let player = self.local_player.lock().unwrap().clone();
        if let Some(player) = player {
            let iq = StreamingControlIQ::new(
                self.session.allocate_request_id(),
                self.ident,
                control,
                self.length,
                now_millis(),
                position,
                0,
            );
            player.on_control(&iq);
        }
    }

    fn broadcast_lifecycle_to_peers(&self, control: StreamingControl, position: u64) {
        for connection in self.session.connections() {
            if !self.peers.contains_key(&connection.peer_id()) {
                continue;
            }
            let iq = StreamingControlIQ::new(
                self.session.allocate_request_id(),
                self.ident,
                control,
                self.length,
                now_millis(),
                position,
                0,
            );
            connection.send_packet(&StreamingPacket::Control(iq));
        }
    }

    fn report_peer_status(&self, peer: PeerId, control: StreamingControl) {
        let status = match control {
            StreamingControl::StatusReady => Some(StreamingStatus::Ready),
            StreamingControl::StatusPlaying => Some(StreamingStatus::Playing),
            StreamingControl::StatusPaused => Some(StreamingStatus::Paused),
            StreamingControl::StatusUnsupported => Some(StreamingStatus::Unsupported),
            StreamingControl::StatusError => Some(StreamingStatus::Error),
            _ => None,
        };
        if let Some(status) = status {
            for connection in self.session.connections() {
                if connection.peer_id() == peer {
                    connection.update_streaming_status(status);
                }
            }
        }
        let event = match control {
            StreamingControl::StatusPlaying => Some(StreamingEvent::Playing),
            StreamingControl::StatusPaused => Some(StreamingEvent::Paused),
            StreamingControl::StatusCompleted => Some(StreamingEvent::Completed),
            StreamingControl::StatusUnsupported => Some(StreamingEvent::Unsupported),
            StreamingControl::StatusError => Some(StreamingEvent::Error),
            StreamingControl::StatusStopped => Some(StreamingEvent::Stop),
            _ => None,
        };
        if let Some(event) = event {
            self.session.on_streaming_event(Some(peer), event);
        }
    }
}

impl LocalStreamer for Streamer {
    fn handle_local_request(&self, request: BlockRequest) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let source = self.local_source.lock().unwrap().clone();
        let Some(source) = source else {
            return;
        };
        let job = Job::Serve {
            request_id: 0,
            offset: request.offset,
            length: request.length,
            timestamp: request.timestamp,
            received_at: now_millis(),
            reply: ReplyTarget::Local(source),
        };
        let _ = self.jobs.send(job);
    }

    fn handle_local_control(&self, iq: StreamingControlIQ) {
        let control = iq.control();
        if control.is_status() {
            // The local player is the canonical position authority; its
            // reports keep the fallback state fresh too.
            let now = now_millis();
            self.canonical.lock().unwrap().update(
                iq.position,
                iq.latency,
                control == StreamingControl::StatusPaused,
                now,
            );
            return;
        }
        match control {
            StreamingControl::AskPause => self.pause(),
            StreamingControl::AskResume => self.resume(),
            StreamingControl::AskSeek => self.seek(iq.position),
            StreamingControl::AskStop => self.stop_streaming(true),
            _ => {}
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Close);
    }
}

/// Produces the block covering `offset`, reading and caching forward from
/// the current coverage edge as needed. `None` when `offset` is past the end
/// of the file or the file fails to read.
fn serve_block(
    file: &mut File,
    cache: &mut BufferCache,
    buffer_size: u64,
    offset: u64,
    length: u64,
) -> Option<Vec<u8>> {
    loop {
        if let Some(block) = cache.floor(offset) {
            let start = (offset - block.first_offset()) as usize;
            let end = block.bytes().len().min(start + length as usize);
            return Some(block.bytes()[start..end].to_vec());
        }
        let read_at = cache.coverage_end();
        if offset < read_at {
            // A hole below coverage cannot exist with sequential fills.
            return None;
        }
        match read_chunk(file, read_at, buffer_size) {
            Ok(bytes) if bytes.is_empty() => return None,
            Ok(bytes) => {
                let short = (bytes.len() as u64) < buffer_size;
                cache.insert(ByteRangeBuffer::new(read_at, bytes));
                if short && !cache.floor(offset).map_or(false, |b| b.covers(offset)) {
                    return None;
                }
            }
            Err(e) => {
                warn!(offset = read_at, "Media file read failed: {e}");
                return None;
            }
        }
    }
}

fn read_chunk(file: &mut File, offset: u64, buffer_size: u64) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut bytes = vec![0u8; buffer_size as usize];
    let mut filled = 0;
    while filled < bytes.len() {
        let n = file.read(&mut bytes[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    bytes.truncate(filled);
    Ok(bytes)
}
