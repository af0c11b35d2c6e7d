//! The streaming data plane: block transport, pull sources, the player and
//! the streamer.

pub mod block;
pub mod player;
pub mod source;
pub mod streamer;

pub use block::{BlockRequest, BlockSource, ControlSink, LocalBlockSource, RemoteBlockSource};
pub use player::{PlayerState, StreamPlayer};
pub use source::PullDataSource;
pub use streamer::{StreamMetadata, Streamer, new_stream_ident};
