//! The playback-affinity execution context.
//!
//! The wrapped media pipeline requires every call on it (construct, prepare,
//! play, pause, seek, stop, release, position query) to happen on one fixed
//! thread. [`PlaybackContext`] models that constraint as a typed task-posting
//! interface instead of ad hoc thread checks: components post closures, a
//! single dedicated thread runs them in order.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Sender, unbounded};
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Msg {
    Run(Task),
    Shutdown,
}

struct ContextInner {
    tx: Sender<Msg>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Handle to the single playback-affinity thread. Cloneable; all clones post
/// to the same thread.
#[derive(Clone)]
pub struct PlaybackContext {
    inner: Arc<ContextInner>,
}

impl PlaybackContext {
    pub fn new() -> Self {
        let (tx, rx) = unbounded::<Msg>();
        let handle = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                for msg in rx {
                    match msg {
                        Msg::Run(task) => task(),
                        Msg::Shutdown => break,
                    }
                }
                debug!("Playback context thread exiting");
            })
            .expect("failed to spawn playback thread");

        Self {
            inner: Arc::new(ContextInner {
                tx,
                handle: Mutex::new(Some(handle)),
            }),
        }
    }

    /// Posts a task to run on the playback thread. Tasks run in posting
    /// order. Posting after shutdown drops the task.
    pub fn post<F: FnOnce() + Send + 'static>(&self, task: F) {
        if self.inner.tx.send(Msg::Run(Box::new(task))).is_err() {
            warn!("Playback context is shut down, dropping task");
        }
    }

    /// Posts a task to run on the playback thread after `delay`.
    pub fn post_delayed<F: FnOnce() + Send + 'static>(&self, delay: Duration, task: F) {
        if delay.is_zero() {
            self.post(task);
            return;
        }
        let tx = self.inner.tx.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            if tx.send(Msg::Run(Box::new(task))).is_err() {
                debug!("Playback context gone before delayed task fired");
            }
        });
    }

    /// Stops the playback thread after draining already-posted tasks.
    /// Idempotent and safe from any thread except the playback thread itself.
    pub fn shutdown(&self) {
        let handle = self.inner.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = self.inner.tx.send(Msg::Shutdown);
            if let Err(e) = handle.join() {
                warn!("Playback thread panicked: {:?}", e);
            }
        }
    }
}

impl Default for PlaybackContext {
    fn default() -> Self {
        Self::new()
    }
}
