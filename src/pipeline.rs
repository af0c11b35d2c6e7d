//! The wrapped media-playback pipeline, as a black box.
//!
//! The engine drives a real decoder/renderer it knows nothing about, through
//! this narrow contract. Two rules from the pipeline's side bind the engine:
//! every method must be called on the playback-affinity thread, and decode
//! errors split into "this container/codec cannot be played" versus
//! everything else.

use std::sync::Arc;

use crate::stream::source::PullDataSource;

/// Lifecycle notifications from the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Prepared and able to render; may fire again after rebuffering.
    Ready,
    /// Playback reached the end of the source.
    Ended,
}

/// A decode/render failure, pre-classified by the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineError {
    /// Container, format or codec cannot be decoded at all.
    pub unsupported: bool,
    pub message: String,
}

/// Callbacks from the pipeline. May arrive on any thread; implementations
/// must marshal back to the playback context for anything touching the
/// pipeline object.
pub trait PipelineListener: Send + Sync {
    fn on_state_changed(&self, state: PipelineState);
    fn on_error(&self, error: PipelineError);
}

/// The media pipeline itself. All methods playback-thread-affine.
pub trait MediaPipeline: Send {
    fn prepare(&mut self);
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, position_ms: u64);
    fn stop(&mut self);
    fn release(&mut self);
    /// Current playback position, milliseconds.
    fn position_ms(&mut self) -> u64;
}

/// Builds a pipeline instance around a pull source. Invoked on the playback
/// thread.
pub trait MediaPipelineFactory: Send + Sync {
    fn create(
        &self,
        source: PullDataSource,
        listener: Arc<dyn PipelineListener>,
    ) -> Box<dyn MediaPipeline>;
}

/// Manual mocks for driving the engine without a real decoder.
///
/// A mock pipeline that records calls, simulates a position counter and lets
/// tests fire listener callbacks at will.
pub mod testing {
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PipelineCall {
        Prepare,
        Play,
        Pause,
        Seek(u64),
        Stop,
        Release,
    }

    #[derive(Default)]
    struct MockState {
        calls: Vec<PipelineCall>,
        playing_since: Option<(u64, Instant)>,
        position_ms: u64,
    }

    /// Shared handle observing and controlling a [`MockPipeline`].
    #[derive(Clone, Default)]
    pub struct MockPipelineHandle {
        state: Arc<Mutex<MockState>>,
        listener: Arc<Mutex<Option<Arc<dyn PipelineListener>>>>,
    }

    impl MockPipelineHandle {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<PipelineCall> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn call_count(&self, call: PipelineCall) -> usize {
            self.state
                .lock()
                .unwrap()
                .calls
                .iter()
                .filter(|c| **c == call)
                .count()
        }

        /// Fires a listener callback as the real pipeline would.
        pub fn emit_state(&self, state: PipelineState) {
            if let Some(listener) = self.listener.lock().unwrap().clone() {
                listener.on_state_changed(state);
            }
        }

        pub fn emit_error(&self, unsupported: bool, message: &str) {
            if let Some(listener) = self.listener.lock().unwrap().clone() {
                listener.on_error(PipelineError {
                    unsupported,
                    message: message.into(),
                });
            }
        }

        fn attach(&self, listener: Arc<dyn PipelineListener>) {
            *self.listener.lock().unwrap() = Some(listener);
        }
    }

    /// Pipeline double: position advances with wall time while playing.
    pub struct MockPipeline {
        handle: MockPipelineHandle,
    }

    impl MediaPipeline for MockPipeline {
        fn prepare(&mut self) {
            self.handle.state.lock().unwrap().calls.push(PipelineCall::Prepare);
        }

        fn play(&mut self) {
            let mut state = self.handle.state.lock().unwrap();
            let base = state.position_ms;
            state.playing_since = Some((base, Instant::now()));
            state.calls.push(PipelineCall::Play);
        }

        fn pause(&mut self) {
            let mut state = self.handle.state.lock().unwrap();
            if let Some((base, since)) = state.playing_since.take() {
                state.position_ms = base + since.elapsed().as_millis() as u64;
            }
            state.calls.push(PipelineCall::Pause);
        }

        fn seek(&mut self, position_ms: u64) {
            let mut state = self.handle.state.lock().unwrap();
            state.position_ms = position_ms;
            if state.playing_since.is_some() {
                state.playing_since = Some((position_ms, Instant::now()));
            }
            state.calls.push(PipelineCall::Seek(position_ms));
        }

        fn stop(&mut self) {
            let mut state = self.handle.state.lock().unwrap();
            state.playing_since = None;
            state.calls.push(PipelineCall::Stop);
        }

        fn release(&mut self) {
            self.handle.state.lock().unwrap().calls.push(PipelineCall::Release);
        }

        fn position_ms(&mut self) -> u64 {
            let state = self.handle.state.lock().unwrap();
            match state.playing_since {
                Some((base, since)) => base + since.elapsed().as_millis() as u64,
                None => state.position_ms,
            }
        }
    }

    /// Factory producing [`MockPipeline`]s bound to one shared handle.
    pub struct MockPipelineFactory {
        pub handle: MockPipelineHandle,
        /// Sources handed to created pipelines, for tests that drive reads.
        pub sources: Mutex<Vec<PullDataSource>>,
    }

    impl MockPipelineFactory {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                handle: MockPipelineHandle::new(),
                sources: Mutex::new(Vec::new()),
            })
        }
    }

    impl super::MediaPipelineFactory for MockPipelineFactory {
        fn create(
            &self,
            source: PullDataSource,
            listener: Arc<dyn PipelineListener>,
        ) -> Box<dyn MediaPipeline> {
            self.handle.attach(listener);
            self.sources.lock().unwrap().push(source);
            Box::new(MockPipeline {
                handle: self.handle.clone(),
            })
        }
    }
}
