//! Inbound packet routing and the public entry point for a call.
//!
//! One dispatcher per call. It owns at most one outbound [`Streamer`] and
//! any number of inbound [`StreamPlayer`]s keyed by stream ident, and routes
//! every decoded packet to the right one. Traffic for an ident nobody owns
//! is logged and dropped; one confused peer must not disturb the others.

use std::path::Path;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::StreamingConfig;
use crate::context::PlaybackContext;
use crate::error::StreamResult;
use crate::pipeline::MediaPipelineFactory;
use crate::session::{CallSession, Connection, PeerId};
use crate::stream::block::RemoteBlockSource;
use crate::stream::player::StreamPlayer;
use crate::stream::streamer::{StreamMetadata, Streamer};
use crate::wire::{StreamingControl, StreamingControlIQ, StreamingInfoIQ, StreamingPacket};

/// Application callbacks for inbound streams.
pub trait StreamingDelegate: Send + Sync {
    /// A peer started sharing. Returning a factory accepts the stream and
    /// starts local playback; `None` declines it.
    fn on_stream_started(
        &self,
        peer: PeerId,
        ident: u64,
        video: bool,
        length: u64,
    ) -> Option<Arc<dyn MediaPipelineFactory>>;

    /// Metadata for a stream announced by a peer.
    fn on_stream_info(&self, peer: PeerId, info: &StreamingInfoIQ);
}

/// Per-call streaming engine front end.
pub struct StreamingDispatcher {
    config: StreamingConfig,
    context: PlaybackContext,
    session: Arc<dyn CallSession>,
    delegate: Arc<dyn StreamingDelegate>,
    streamer: Mutex<Option<Arc<Streamer>>>,
    players: DashMap<u64, Arc<StreamPlayer>>,
}

impl StreamingDispatcher {
    pub fn new(
        config: StreamingConfig,
        context: PlaybackContext,
        session: Arc<dyn CallSession>,
        delegate: Arc<dyn StreamingDelegate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            context,
            session,
            delegate,
            streamer: Mutex::new(None),
            players: DashMap::new(),
        })
    }

    /// Starts sharing `path` with every capable peer. Any previous share is
    /// stopped first; a call carries at most one outbound stream.
    pub fn share(
        &self,
        path: &Path,
        metadata: StreamMetadata,
        video: bool,
        factory: Option<Arc<dyn MediaPipelineFactory>>,
    ) -> StreamResult<Arc<Streamer>> {
        self.stop_sharing();
        let streamer = Streamer::new(
            self.config.clone(),
            self.context.clone(),
            self.session.clone(),
            factory,
            path,
            metadata,
            video,
        )?;
        streamer.start_streaming();
        *self.streamer.lock().unwrap() = Some(streamer.clone());
        Ok(streamer)
    }

    /// Stops the outbound stream, notifying peers. Idempotent.
    pub fn stop_sharing(&self) {
        let streamer = self.streamer.lock().unwrap().take();
        if let Some(streamer) = streamer {
            streamer.stop_streaming(true);
        }
    }

    pub fn current_streamer(&self) -> Option<Arc<Streamer>> {
        self.streamer.lock().unwrap().clone()
    }

    pub fn player(&self, ident: u64) -> Option<Arc<StreamPlayer>> {
        self.players.get(&ident).map(|p| p.clone())
    }

    /// Decodes and routes one raw datagram from `connection`.
    pub fn handle_datagram(&self, connection: &Arc<dyn Connection>, bytes: &[u8]) -> StreamResult<()> {
        let packet = StreamingPacket::decode(bytes)?;
        self.handle_packet(connection, &packet);
        Ok(())
    }

    /// Routes one decoded packet from `connection`.
    pub fn handle_packet(&self, connection: &Arc<dyn Connection>, packet: &StreamingPacket) {
        match packet {
            StreamingPacket::Control(iq) => self.handle_control(connection, iq),
            StreamingPacket::Data(iq) => match self.players.get(&iq.ident) {
                Some(player) => player.source().on_data_message(iq),
                None => {
                    debug!(ident = iq.ident, "Data for unknown stream, dropping");
                }
            },
            StreamingPacket::Request(iq) => {
                let streamer = self.streamer.lock().unwrap().clone();
                match streamer {
                    Some(streamer) => streamer.on_request(connection, iq),
                    None => {
                        debug!(ident = iq.ident, "Request without an active share, dropping");
                    }
                }
            }
            StreamingPacket::Info(iq) => {
                self.delegate.on_stream_info(connection.peer_id(), iq);
            }
        }
    }

    /// Spawns an async pump draining `rx` into the dispatcher. Undecodable
    /// datagrams are logged and skipped.
    pub fn start(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<(Arc<dyn Connection>, Vec<u8>)>,
    ) -> JoinHandle<()> {
        let dispatcher = self;
        tokio::spawn(async move {
            while let Some((connection, bytes)) = rx.recv().await {
                if let Err(e) = dispatcher.handle_datagram(&connection, &bytes) {
                    warn!(peer = %connection.peer_id(), "Dropping undecodable datagram: {e}");
                }
            }
            debug!("Streaming dispatcher pump exiting");
        })
    }

    /// Stops everything this dispatcher owns: the outbound share and every
    /// inbound player.
    pub fn shutdown(&self) {
        self.stop_sharing();
        let idents: Vec<u64> = self.players.iter().map(|e| *e.key()).collect();
        for ident in idents {
            if let Some((_, player)) = self.players.remove(&ident) {
                player.stop();
            }
        }
    }

    fn handle_control(&self, connection: &Arc<dyn Connection>, iq: &StreamingControlIQ) {
        let control = iq.control();
        if control.is_ask() || control.is_status() {
            let streamer = self.streamer.lock().unwrap().clone();
            match streamer {
                Some(streamer) => streamer.on_control(connection.peer_id(), iq),
                None => {
                    debug!(ident = iq.ident, ?control, "Control without an active share");
                }
            }
            return;
        }
        match control {
            StreamingControl::StartAudioStreaming | StreamingControl::StartVideoStreaming => {
                self.handle_start(connection, iq)
            }
            StreamingControl::PauseStreaming
            | StreamingControl::ResumeStreaming
            | StreamingControl::SeekStreaming => match self.players.get(&iq.ident) {
                Some(player) => player.on_control(iq),
                None => {
                    debug!(ident = iq.ident, ?control, "Control for unknown stream");
                }
            },
            StreamingControl::StopStreaming => {
                if let Some((_, player)) = self.players.remove(&iq.ident) {
                    player.on_control(iq);
                } else {
                    debug!(ident = iq.ident, "Stop for unknown stream");
                }
            }
            StreamingControl::Unknown => {
                debug!(ident = iq.ident, "Unknown control code, dropping");
            }
            _ => {}
        }
    }

    fn handle_start(&self, connection: &Arc<dyn Connection>, iq: &StreamingControlIQ) {
        let peer = connection.peer_id();
        let video = iq.control() == StreamingControl::StartVideoStreaming;
        if self.players.contains_key(&iq.ident) {
            debug!(ident = iq.ident, %peer, "Duplicate start, ignoring");
            return;
        }
        let Some(factory) = self
            .delegate
            .on_stream_started(peer, iq.ident, video, iq.length)
        else {
            info!(ident = iq.ident, %peer, "Stream declined");
            let reply = StreamingControlIQ::new(
                self.session.allocate_request_id(),
                iq.ident,
                StreamingControl::StatusUnsupported,
                0,
                crate::clock::now_millis(),
                0,
                0,
            );
            connection.send_packet(&StreamingPacket::Control(reply));
            return;
        };
        info!(ident = iq.ident, %peer, video, "Starting playback of shared stream");
        let remote = Arc::new(RemoteBlockSource::new(
            connection.clone(),
            self.session.clone(),
        ));
        let player = StreamPlayer::new(
            iq.ident,
            self.config.clone(),
            self.context.clone(),
            self.session.clone(),
            factory,
            remote.clone(),
            remote,
        );
        self.players.insert(iq.ident, player.clone());
        player.start();
    }
}
