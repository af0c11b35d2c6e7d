//! Loopback demo: two in-process engines, one sharing a file, one pulling
//! it block by block and printing what arrives.
//!
//! Usage: callstream <media-file>

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context as _, Result, bail};
use tracing::info;

use callstream::pipeline::testing::MockPipelineFactory;
use callstream::pipeline::{MediaPipelineFactory, PipelineState};
use callstream::testing::{TestConnection, TestSession, wait_until};
use callstream::wire::StreamingInfoIQ;
use callstream::{
    Connection, PeerId, PlaybackContext, StreamMetadata, StreamingConfig, StreamingDelegate,
    StreamingDispatcher,
};

struct AcceptEverything {
    factory: Arc<MockPipelineFactory>,
}

impl StreamingDelegate for AcceptEverything {
    fn on_stream_started(
        &self,
        peer: PeerId,
        ident: u64,
        video: bool,
        length: u64,
    ) -> Option<Arc<dyn MediaPipelineFactory>> {
        info!(%peer, ident, video, length, "Peer started sharing, accepting");
        Some(self.factory.clone())
    }

    fn on_stream_info(&self, _peer: PeerId, info: &StreamingInfoIQ) {
        info!(title = %info.title, duration_ms = info.duration, "Stream metadata");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let path = match std::env::args().nth(1) {
        Some(path) => std::path::PathBuf::from(path),
        None => bail!("usage: callstream <media-file>"),
    };
    let length = std::fs::metadata(&path)
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();

    let sharer_context = PlaybackContext::new();
    let viewer_context = PlaybackContext::new();
    let sharer_session = TestSession::new();
    let viewer_session = TestSession::new();
    let link_to_viewer = TestConnection::new();
    let link_to_sharer = TestConnection::new();
    sharer_session.add_connection(link_to_viewer.clone());
    viewer_session.add_connection(link_to_sharer.clone());

    let factory = MockPipelineFactory::new();
    let sharer = StreamingDispatcher::new(
        StreamingConfig::default(),
        sharer_context.clone(),
        sharer_session.clone(),
        Arc::new(AcceptEverything {
            factory: MockPipelineFactory::new(),
        }),
    );
    let viewer = StreamingDispatcher::new(
        StreamingConfig::default(),
        viewer_context.clone(),
        viewer_session.clone(),
        Arc::new(AcceptEverything {
            factory: factory.clone(),
        }),
    );

    {
        let viewer = viewer.clone();
        let from_sharer: Arc<dyn Connection> = link_to_sharer.clone();
        link_to_viewer.attach(move |packet| {
            let bytes = packet.encode().expect("encode");
            let _ = viewer.handle_datagram(&from_sharer, &bytes);
        });
    }
    {
        let sharer = sharer.clone();
        let from_viewer: Arc<dyn Connection> = link_to_viewer.clone();
        link_to_sharer.attach(move |packet| {
            let bytes = packet.encode().expect("encode");
            let _ = sharer.handle_datagram(&from_viewer, &bytes);
        });
    }

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "untitled".into());
    let metadata = StreamMetadata {
        title,
        ..StreamMetadata::default()
    };
    sharer
        .share(&path, metadata, false, None)
        .context("starting the share")?;

    if !wait_until(std::time::Duration::from_secs(5), || {
        !factory.sources.lock().unwrap().is_empty()
    }) {
        bail!("viewer never received the stream announcement");
    }
    factory.handle.emit_state(PipelineState::Ready);

    let source = factory.sources.lock().unwrap()[0].clone();
    let start = Instant::now();
    let mut total = 0u64;
    let mut buf = [0u8; 8192];
    loop {
        let n = source.read_bytes(&mut buf)?;
        if n == 0 {
            break;
        }
        total += n as u64;
    }
    info!(
        total,
        expected = length,
        rtt_ms = source.last_rtt(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Transfer complete"
    );

    sharer.stop_sharing();
    viewer.shutdown();
    sharer_context.shutdown();
    viewer_context.shutdown();
    Ok(())
}
