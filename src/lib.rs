//! In-call media streaming engine.
//!
//! One participant in a peer-to-peer call shares a local media file; every
//! capable peer plays it back in sync. Data moves pull-style: each playing
//! side requests fixed-size byte-range blocks from the sharing side as its
//! decoder consumes them, so a slow receiver never forces the sender to
//! buffer. Pause, resume and seek are clock-synchronized across all
//! participants using per-peer position reports and RTT estimates.
//!
//! The engine is transport-agnostic: the surrounding call injects its
//! connections and request-id allocation through [`session::CallSession`],
//! and media decoding through [`pipeline::MediaPipelineFactory`]. Everything
//! that touches a pipeline runs on the single [`context::PlaybackContext`]
//! thread.

pub mod buffer;
pub mod clock;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod session;
pub mod stream;
pub mod testing;
pub mod wire;

pub use config::StreamingConfig;
pub use context::PlaybackContext;
pub use dispatcher::{StreamingDelegate, StreamingDispatcher};
pub use error::{StreamError, StreamResult};
pub use events::{StreamingEvent, StreamingStatus};
pub use session::{CallSession, Connection, PeerId};
pub use stream::{PlayerState, PullDataSource, StreamMetadata, StreamPlayer, Streamer};
