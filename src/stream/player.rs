//! The receiving side: a media pipeline bound to one pull source.
//!
//! The player translates pipeline lifecycle events into control traffic and
//! control traffic back into pipeline operations, always re-entering the
//! playback-affinity context for anything that touches the pipeline object.
//! Position queries never block: callers read a cached snapshot that is
//! refreshed periodically and immediately before any position-bearing send.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::now_millis;
use crate::config::StreamingConfig;
use crate::context::PlaybackContext;
use crate::events::StreamingEvent;
use crate::pipeline::{
    MediaPipeline, MediaPipelineFactory, PipelineError, PipelineListener, PipelineState,
};
use crate::session::CallSession;
use crate::stream::block::{BlockSource, ControlSink};
use crate::stream::source::PullDataSource;
use crate::wire::{StreamingControl, StreamingControlIQ};

/// Player lifecycle. `Error` and `Unsupported` are terminal-reporting states
/// that additionally tear the session down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Initializing,
    Ready,
    Paused,
    Ended,
    Error,
    Unsupported,
}

#[derive(Debug, Clone, Copy)]
enum PendingOp {
    Pause(Duration),
    Resume(Duration),
}

/// Non-blocking position snapshot, shared with the pull source so block
/// requests can carry the local playback position.
#[derive(Debug, Default)]
struct PositionSnapshot {
    position_ms: u64,
    at: u64,
    playing: bool,
}

impl PositionSnapshot {
    fn current(&self, now: u64) -> u64 {
        if self.playing {
            self.position_ms + now.saturating_sub(self.at)
        } else {
            self.position_ms
        }
    }

    fn set(&mut self, position_ms: u64, playing: bool) {
        self.position_ms = position_ms;
        self.at = now_millis();
        self.playing = playing;
    }
}

struct PlayerCore {
    state: PlayerState,
    announced_playing: bool,
    pending: Option<PendingOp>,
    stopped: bool,
}

struct PlayerInner {
    ident: u64,
    config: StreamingConfig,
    context: PlaybackContext,
    session: Arc<dyn CallSession>,
    control: Arc<dyn ControlSink>,
    factory: Arc<dyn MediaPipelineFactory>,
    source: PullDataSource,
    snapshot: Arc<Mutex<PositionSnapshot>>,
    pipeline: Mutex<Option<Box<dyn MediaPipeline>>>,
    core: Mutex<PlayerCore>,
    self_ref: Mutex<Weak<StreamPlayer>>,
}

/// One playback session for one stream ident.
pub struct StreamPlayer {
    inner: Arc<PlayerInner>,
}

impl StreamPlayer {
    pub fn new(
        ident: u64,
        config: StreamingConfig,
        context: PlaybackContext,
        session: Arc<dyn CallSession>,
        factory: Arc<dyn MediaPipelineFactory>,
        control: Arc<dyn ControlSink>,
        block_source: Arc<dyn BlockSource>,
    ) -> Arc<Self> {
        let snapshot = Arc::new(Mutex::new(PositionSnapshot::default()));
        let position_fn = {
            let snapshot = snapshot.clone();
            Arc::new(move || snapshot.lock().unwrap().current(now_millis()))
        };
        let source = PullDataSource::new(ident, config.clone(), block_source, position_fn);
        let player = Arc::new(Self {
            inner: Arc::new(PlayerInner {
                ident,
                config,
                context,
                session,
                control,
                factory,
                source,
                snapshot,
                pipeline: Mutex::new(None),
                core: Mutex::new(PlayerCore {
                    state: PlayerState::Initializing,
                    announced_playing: false,
                    pending: None,
                    stopped: false,
                }),
                self_ref: Mutex::new(Weak::new()),
            }),
        });
        *player.inner.self_ref.lock().unwrap() = Arc::downgrade(&player);
        player
    }

    fn this(&self) -> Option<Arc<StreamPlayer>> {
        self.inner.self_ref.lock().unwrap().upgrade()
    }

    pub fn ident(&self) -> u64 {
        self.inner.ident
    }

    pub fn state(&self) -> PlayerState {
        self.inner.core.lock().unwrap().state
    }

    /// Handle for routing inbound data messages to this player's source.
    pub fn source(&self) -> &PullDataSource {
        &self.inner.source
    }

    /// Opens the source and builds the pipeline on the playback context.
    pub fn start(&self) {
        let Some(player) = self.this() else {
            return;
        };
        info!(ident = self.inner.ident, "Starting stream player");
        self.inner.context.post(move || {
            if player.inner.core.lock().unwrap().stopped {
                return;
            }
            player.inner.source.open();
            let listener: Arc<dyn PipelineListener> = Arc::new(PipelineBridge {
                player: Arc::downgrade(&player),
            });
            let mut pipeline = player
                .inner
                .factory
                .create(player.inner.source.clone(), listener);
            pipeline.prepare();
            pipeline.play();
            *player.inner.pipeline.lock().unwrap() = Some(pipeline);
        });
        self.schedule_position_refresh();
    }

    /// Never blocks; linear extrapolation from the last refreshed snapshot.
    pub fn current_position(&self, now: u64) -> u64 {
        self.inner.snapshot.lock().unwrap().current(now)
    }

    // ---- requests to the authoritative remote side ----------------------

    /// Asks the streamer to pause the canonical stream.
    pub fn ask_pause(&self) {
        self.ask(StreamingControl::AskPause, None);
    }

    pub fn ask_resume(&self) {
        self.ask(StreamingControl::AskResume, None);
    }

    /// Asks the streamer to seek the canonical stream to `offset_ms`.
    pub fn ask_seek(&self, offset_ms: u64) {
        self.ask(StreamingControl::AskSeek, Some(offset_ms));
    }

    pub fn ask_stop(&self) {
        self.ask(StreamingControl::AskStop, None);
    }

    fn ask(&self, control: StreamingControl, position_override: Option<u64>) {
        let Some(player) = self.this() else {
            return;
        };
        // Refresh on the playback context so the sent position is exact.
        self.inner.context.post(move || {
            player.refresh_snapshot_on_context();
            let position =
                position_override.unwrap_or_else(|| player.current_position(now_millis()));
            player.send_control(control, position);
        });
    }

    // ---- control plane from the streamer --------------------------------

    /// Inbound control traffic for this session.
    pub fn on_control(&self, iq: &StreamingControlIQ) {
        if iq.ident != self.inner.ident {
            return;
        }
        match iq.control() {
            StreamingControl::PauseStreaming => self.do_pause(iq.position),
            StreamingControl::ResumeStreaming => self.do_resume(iq.position),
            StreamingControl::SeekStreaming => {
                let Some(player) = self.this() else {
                    return;
                };
                let target = iq.position;
                self.inner.context.post(move || {
                    if let Some(pipeline) = player.inner.pipeline.lock().unwrap().as_mut() {
                        pipeline.seek(target);
                    }
                    player.refresh_snapshot_on_context();
                });
            }
            StreamingControl::StopStreaming => self.stop(),
            other => {
                debug!(ident = self.inner.ident, ?other, "Ignoring control for player");
            }
        }
    }

    /// Pauses once local playback reaches `target_position`: the side that is
    /// ahead of the target waits the difference before acting.
    fn do_pause(&self, target_position: u64) {
        let local = self.current_position(now_millis());
        let delay = Duration::from_millis(target_position.saturating_sub(local));
        self.pause_after(delay);
    }

    fn do_resume(&self, target_position: u64) {
        let local = self.current_position(now_millis());
        let delay = Duration::from_millis(target_position.saturating_sub(local));
        self.resume_after(delay);
    }

    /// Applies a pause after `delay`. Recorded as pending while the pipeline
    /// is still initializing, applied on first Ready.
    pub fn pause_after(&self, delay: Duration) {
        {
            let mut core = self.inner.core.lock().unwrap();
            if core.stopped {
                return;
            }
            if core.state == PlayerState::Initializing {
                core.pending = Some(PendingOp::Pause(delay));
                return;
            }
        }
        let Some(player) = self.this() else {
            return;
        };
        self.inner
            .context
            .post_delayed(delay, move || player.apply_pause());
    }

    pub fn resume_after(&self, delay: Duration) {
        {
            let mut core = self.inner.core.lock().unwrap();
            if core.stopped {
                return;
            }
            if core.state == PlayerState::Initializing {
                core.pending = Some(PendingOp::Resume(delay));
                return;
            }
        }
        let Some(player) = self.this() else {
            return;
        };
        self.inner
            .context
            .post_delayed(delay, move || player.apply_resume());
    }

    fn apply_pause(&self) {
        {
            let mut core = self.inner.core.lock().unwrap();
            if core.stopped || matches!(core.state, PlayerState::Ended) {
                return;
            }
            core.state = PlayerState::Paused;
        }
        if let Some(pipeline) = self.inner.pipeline.lock().unwrap().as_mut() {
            pipeline.pause();
            let position = pipeline.position_ms();
            self.inner.snapshot.lock().unwrap().set(position, false);
        }
        let position = self.current_position(now_millis());
        self.send_control(StreamingControl::StatusPaused, position);
        self.inner
            .session
            .on_streaming_event(None, StreamingEvent::Paused);
    }

    fn apply_resume(&self) {
        {
            let mut core = self.inner.core.lock().unwrap();
            if core.stopped || matches!(core.state, PlayerState::Ended) {
                return;
            }
            core.state = PlayerState::Ready;
        }
        if let Some(pipeline) = self.inner.pipeline.lock().unwrap().as_mut() {
            pipeline.play();
            let position = pipeline.position_ms();
            self.inner.snapshot.lock().unwrap().set(position, true);
        }
        let position = self.current_position(now_millis());
        self.send_control(StreamingControl::StatusPlaying, position);
        self.inner
            .session
            .on_streaming_event(None, StreamingEvent::Playing);
    }

    // ---- pipeline events -------------------------------------------------

    fn on_pipeline_ready(&self) {
        let (first, pending) = {
            let mut core = self.inner.core.lock().unwrap();
            if core.stopped || core.state == PlayerState::Ended {
                return;
            }
            if core.state == PlayerState::Initializing {
                core.state = PlayerState::Ready;
            }
            let first = !core.announced_playing;
            core.announced_playing = true;
            (first, core.pending.take())
        };
        self.refresh_snapshot_on_context();
        if first {
            let position = self.current_position(now_millis());
            self.send_control(StreamingControl::StatusPlaying, position);
            self.inner
                .session
                .on_streaming_event(None, StreamingEvent::Playing);
        }
        match pending {
            Some(PendingOp::Pause(delay)) => self.pause_after(delay),
            Some(PendingOp::Resume(delay)) => self.resume_after(delay),
            None => {}
        }
    }

    fn on_pipeline_ended(&self) {
        {
            let mut core = self.inner.core.lock().unwrap();
            if core.stopped || core.state == PlayerState::Ended {
                return;
            }
            core.state = PlayerState::Ended;
        }
        info!(ident = self.inner.ident, "Playback ended");
        let position = self.current_position(now_millis());
        self.inner.snapshot.lock().unwrap().set(position, false);
        self.send_control(StreamingControl::StatusCompleted, position);
        self.inner
            .session
            .on_streaming_event(None, StreamingEvent::Completed);
        self.release_pipeline();
        self.inner.source.close();
    }

    fn on_pipeline_error(&self, error: PipelineError) {
        let state = if error.unsupported {
            PlayerState::Unsupported
        } else {
            PlayerState::Error
        };
        {
            let mut core = self.inner.core.lock().unwrap();
            if core.stopped {
                return;
            }
            core.state = state;
            core.stopped = true;
        }
        warn!(
            ident = self.inner.ident,
            unsupported = error.unsupported,
            "Pipeline error: {}",
            error.message
        );
        let (status, event) = if error.unsupported {
            (
                StreamingControl::StatusUnsupported,
                StreamingEvent::Unsupported,
            )
        } else {
            (StreamingControl::StatusError, StreamingEvent::Error)
        };
        let position = self.current_position(now_millis());
        self.send_control(status, position);
        self.inner.session.on_streaming_event(None, event);
        self.release_pipeline();
        self.inner.source.close();
    }

    // ---- teardown --------------------------------------------------------

    /// Idempotent, safe from any context. Clears owned state under the lock,
    /// then schedules the pipeline teardown on the playback context.
    pub fn stop(&self) {
        let was_terminal = {
            let mut core = self.inner.core.lock().unwrap();
            if core.stopped {
                return;
            }
            let terminal = matches!(
                core.state,
                PlayerState::Ended | PlayerState::Error | PlayerState::Unsupported
            );
            core.stopped = true;
            core.pending = None;
            terminal
        };
        debug!(ident = self.inner.ident, "Stopping stream player");
        self.inner.source.close();
        if !was_terminal {
            let position = self.current_position(now_millis());
            self.send_control(StreamingControl::StatusStopped, position);
            self.inner
                .session
                .on_streaming_event(None, StreamingEvent::Stop);
        }
        self.release_pipeline();
    }

    fn release_pipeline(&self) {
        let Some(player) = self.this() else {
            return;
        };
        self.inner.context.post(move || {
            if let Some(mut pipeline) = player.inner.pipeline.lock().unwrap().take() {
                pipeline.stop();
                pipeline.release();
            }
        });
    }

    // ---- internals -------------------------------------------------------

    /// Reads the pipeline position. Playback context only.
    fn refresh_snapshot_on_context(&self) {
        if let Some(pipeline) = self.inner.pipeline.lock().unwrap().as_mut() {
            let position = pipeline.position_ms();
            let playing = matches!(
                self.inner.core.lock().unwrap().state,
                PlayerState::Ready | PlayerState::Initializing
            );
            self.inner.snapshot.lock().unwrap().set(position, playing);
        }
    }

    fn schedule_position_refresh(&self) {
        let Some(player) = self.this() else {
            return;
        };
        self.inner
            .context
            .post_delayed(self.inner.config.position_refresh_interval, move || {
                {
                    let core = player.inner.core.lock().unwrap();
                    if core.stopped || core.state == PlayerState::Ended {
                        return;
                    }
                }
                player.refresh_snapshot_on_context();
                player.schedule_position_refresh();
            });
    }

    fn send_control(&self, control: StreamingControl, position: u64) {
        let iq = StreamingControlIQ::new(
            self.inner.session.allocate_request_id(),
            self.inner.ident,
            control,
            0,
            now_millis(),
            position,
            self.inner.source.last_rtt(),
        );
        self.inner.control.send_control(iq);
    }
}

struct PipelineBridge {
    player: Weak<StreamPlayer>,
}

impl PipelineListener for PipelineBridge {
    fn on_state_changed(&self, state: PipelineState) {
        let Some(player) = self.player.upgrade() else {
            return;
        };
        let inner = player.clone();
        player.inner.context.post(move || match state {
            PipelineState::Ready => inner.on_pipeline_ready(),
            PipelineState::Ended => inner.on_pipeline_ended(),
        });
    }

    fn on_error(&self, error: PipelineError) {
        let Some(player) = self.player.upgrade() else {
            return;
        };
        let inner = player.clone();
        player
            .inner
            .context
            .post(move || inner.on_pipeline_error(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{MockPipelineFactory, PipelineCall};
    use crate::testing::{CaptureBlockSource, CaptureControlSink, TestSession, wait_until};

    struct Fixture {
        player: Arc<StreamPlayer>,
        factory: Arc<MockPipelineFactory>,
        sink: Arc<CaptureControlSink>,
        session: Arc<TestSession>,
        context: PlaybackContext,
    }

    fn fixture() -> Fixture {
        let context = PlaybackContext::new();
        let session = TestSession::new();
        let factory = MockPipelineFactory::new();
        let sink = CaptureControlSink::new();
        let player = StreamPlayer::new(
            42,
            StreamingConfig::default(),
            context.clone(),
            session.clone(),
            factory.clone(),
            sink.clone(),
            CaptureBlockSource::new(),
        );
        Fixture {
            player,
            factory,
            sink,
            session,
            context,
        }
    }

    fn control(iq_control: StreamingControl, position: u64) -> StreamingControlIQ {
        StreamingControlIQ::new(1, 42, iq_control, 0, now_millis(), position, 0)
    }

    fn sent_controls(sink: &CaptureControlSink) -> Vec<StreamingControl> {
        sink.sent().iter().map(|iq| iq.control()).collect()
    }

    #[test]
    fn test_first_ready_announces_playing_once() {
        let fx = fixture();
        fx.player.start();
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Prepare) == 1
        }));
        fx.factory.handle.emit_state(PipelineState::Ready);
        fx.factory.handle.emit_state(PipelineState::Ready);
        assert!(wait_until(Duration::from_secs(2), || {
            !fx.sink.sent().is_empty()
        }));
        // Rebuffering recoveries must not re-announce.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(
            sent_controls(&fx.sink),
            vec![StreamingControl::StatusPlaying]
        );
        assert_eq!(fx.session.event_kinds(), vec![StreamingEvent::Playing]);
        assert_eq!(fx.player.state(), PlayerState::Ready);
        fx.player.stop();
        fx.context.shutdown();
    }

    #[test]
    fn test_ended_reports_completed_and_releases() {
        let fx = fixture();
        fx.player.start();
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Prepare) == 1
        }));
        fx.factory.handle.emit_state(PipelineState::Ready);
        fx.factory.handle.emit_state(PipelineState::Ended);
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Release) == 1
        }));
        assert_eq!(fx.player.state(), PlayerState::Ended);
        assert!(
            sent_controls(&fx.sink).contains(&StreamingControl::StatusCompleted)
        );
        assert!(
            fx.session
                .event_kinds()
                .contains(&StreamingEvent::Completed)
        );
        fx.context.shutdown();
    }

    #[test]
    fn test_unsupported_error_reports_unsupported() {
        let fx = fixture();
        fx.player.start();
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Prepare) == 1
        }));
        fx.factory.handle.emit_error(true, "no decoder for codec");
        assert!(wait_until(Duration::from_secs(2), || {
            fx.player.state() == PlayerState::Unsupported
        }));
        assert!(
            sent_controls(&fx.sink).contains(&StreamingControl::StatusUnsupported)
        );
        assert!(
            fx.session
                .event_kinds()
                .contains(&StreamingEvent::Unsupported)
        );
        fx.context.shutdown();
    }

    #[test]
    fn test_generic_error_reports_error() {
        let fx = fixture();
        fx.player.start();
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Prepare) == 1
        }));
        fx.factory.handle.emit_error(false, "render underrun");
        assert!(wait_until(Duration::from_secs(2), || {
            fx.player.state() == PlayerState::Error
        }));
        assert!(sent_controls(&fx.sink).contains(&StreamingControl::StatusError));
        fx.context.shutdown();
    }

    #[test]
    fn test_pause_before_ready_is_deferred() {
        let fx = fixture();
        fx.player.start();
        fx.player.pause_after(Duration::ZERO);
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Prepare) == 1
        }));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(fx.factory.handle.call_count(PipelineCall::Pause), 0);
        fx.factory.handle.emit_state(PipelineState::Ready);
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Pause) == 1
        }));
        assert_eq!(fx.player.state(), PlayerState::Paused);
        assert!(
            sent_controls(&fx.sink).contains(&StreamingControl::StatusPaused)
        );
        fx.context.shutdown();
    }

    #[test]
    fn test_pause_target_ahead_waits_for_position() {
        let fx = fixture();
        fx.player.start();
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Prepare) == 1
        }));
        fx.factory.handle.emit_state(PipelineState::Ready);
        assert!(wait_until(Duration::from_secs(2), || {
            !fx.sink.sent().is_empty()
        }));
        // Target well ahead of the local position.
        let target = fx.player.current_position(now_millis()) + 150;
        fx.player
            .on_control(&control(StreamingControl::PauseStreaming, target));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(fx.factory.handle.call_count(PipelineCall::Pause), 0);
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Pause) == 1
        }));
        assert_eq!(fx.player.state(), PlayerState::Paused);
        fx.context.shutdown();
    }

    #[test]
    fn test_resume_control_restarts_playback() {
        let fx = fixture();
        fx.player.start();
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Prepare) == 1
        }));
        fx.factory.handle.emit_state(PipelineState::Ready);
        fx.player
            .on_control(&control(StreamingControl::PauseStreaming, 0));
        assert!(wait_until(Duration::from_secs(2), || {
            fx.player.state() == PlayerState::Paused
        }));
        fx.player
            .on_control(&control(StreamingControl::ResumeStreaming, 0));
        assert!(wait_until(Duration::from_secs(2), || {
            fx.player.state() == PlayerState::Ready
        }));
        assert!(fx.factory.handle.call_count(PipelineCall::Play) >= 2);
        fx.context.shutdown();
    }

    #[test]
    fn test_seek_control_moves_pipeline() {
        let fx = fixture();
        fx.player.start();
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Prepare) == 1
        }));
        fx.factory.handle.emit_state(PipelineState::Ready);
        fx.player
            .on_control(&control(StreamingControl::SeekStreaming, 90_000));
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Seek(90_000)) == 1
        }));
        fx.context.shutdown();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let fx = fixture();
        fx.player.start();
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Prepare) == 1
        }));
        fx.factory.handle.emit_state(PipelineState::Ready);
        assert!(wait_until(Duration::from_secs(2), || {
            !fx.sink.sent().is_empty()
        }));
        fx.player.stop();
        fx.player.stop();
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Release) == 1
        }));
        std::thread::sleep(Duration::from_millis(50));
        let stops = sent_controls(&fx.sink)
            .iter()
            .filter(|c| **c == StreamingControl::StatusStopped)
            .count();
        assert_eq!(stops, 1);
        assert_eq!(
            fx.session
                .event_kinds()
                .iter()
                .filter(|e| **e == StreamingEvent::Stop)
                .count(),
            1
        );
        fx.context.shutdown();
    }

    #[test]
    fn test_ask_pause_carries_current_position() {
        let fx = fixture();
        fx.player.start();
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Prepare) == 1
        }));
        fx.factory.handle.emit_state(PipelineState::Ready);
        assert!(wait_until(Duration::from_secs(2), || {
            !fx.sink.sent().is_empty()
        }));
        std::thread::sleep(Duration::from_millis(60));
        fx.player.ask_pause();
        assert!(wait_until(Duration::from_secs(2), || {
            sent_controls(&fx.sink).contains(&StreamingControl::AskPause)
        }));
        let sent = fx.sink.sent();
        let ask = sent
            .iter()
            .find(|iq| iq.control() == StreamingControl::AskPause)
            .unwrap();
        assert!(ask.position >= 50);
        fx.context.shutdown();
    }

    #[test]
    fn test_foreign_ident_control_is_ignored() {
        let fx = fixture();
        fx.player.start();
        assert!(wait_until(Duration::from_secs(2), || {
            fx.factory.handle.call_count(PipelineCall::Prepare) == 1
        }));
        fx.factory.handle.emit_state(PipelineState::Ready);
        let mut iq = control(StreamingControl::StopStreaming, 0);
        iq.ident = 7;
        fx.player.on_control(&iq);
        std::thread::sleep(Duration::from_millis(50));
        assert_ne!(fx.player.state(), PlayerState::Ended);
        assert!(!sent_controls(&fx.sink).contains(&StreamingControl::StatusStopped));
        fx.player.stop();
        fx.context.shutdown();
    }
}
