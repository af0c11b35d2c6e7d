//! The pull data source: a blocking, seek-free read interface over the
//! request/response block exchange.
//!
//! A generic media pipeline pulls bytes through [`std::io::Read`]; behind it,
//! the source keeps a small bounded queue of byte-range buffers primed by
//! pipelined block requests. Block requests advance in strict
//! `BUFFER_SIZE` increments; responses are consumed in arrival order.
//!
//! A stalled peer is not an error: when no buffer shows up within the read
//! timeout the stream is treated as ended and the pipeline finishes playback
//! normally.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::{debug, error, warn};

use crate::buffer::ByteRangeBuffer;
use crate::clock::{adjusted_rtt, now_millis};
use crate::config::StreamingConfig;
use crate::stream::block::{BlockRequest, BlockSource};
use crate::wire::StreamingDataIQ;

type PositionFn = Arc<dyn Fn() -> u64 + Send + Sync>;

struct SourceState {
    opened: bool,
    end_of_stream: bool,
    /// Next offset to request.
    read_position: u64,
    /// Next offset to deliver to the reader.
    stream_position: u64,
    /// Partially consumed buffer; consumption is tracked by `stream_position`.
    current: Option<ByteRangeBuffer>,
    /// Offsets of sent-but-unanswered block requests, FIFO.
    outstanding: VecDeque<u64>,
    last_rtt: i32,
    /// Last estimate of the streamer's playback position: (position, at).
    streamer_position: Option<(u64, u64)>,
    bytes_delivered: u64,
}

struct SourceShared {
    ident: u64,
    config: StreamingConfig,
    state: Mutex<SourceState>,
    queue_tx: Sender<ByteRangeBuffer>,
    queue_rx: Receiver<ByteRangeBuffer>,
    block_source: Arc<dyn BlockSource>,
    position_fn: PositionFn,
}

/// Cloneable handle to one pull source. The pipeline end uses the
/// [`std::io::Read`] impl; the owning player keeps a clone for routing
/// inbound data messages.
#[derive(Clone)]
pub struct PullDataSource {
    shared: Arc<SourceShared>,
}

impl PullDataSource {
    pub fn new(
        ident: u64,
        config: StreamingConfig,
        block_source: Arc<dyn BlockSource>,
        position_fn: PositionFn,
    ) -> Self {
        // One slot of slack beyond the pipelining window so the terminal
        // sentinel always fits.
        let (queue_tx, queue_rx) = bounded(config.max_buffers + 1);
        Self {
            shared: Arc::new(SourceShared {
                ident,
                config,
                state: Mutex::new(SourceState {
                    opened: false,
                    end_of_stream: false,
                    read_position: 0,
                    stream_position: 0,
                    current: None,
                    outstanding: VecDeque::new(),
                    last_rtt: 0,
                    streamer_position: None,
                    bytes_delivered: 0,
                }),
                queue_tx,
                queue_rx,
                block_source,
                position_fn,
            }),
        }
    }

    pub fn ident(&self) -> u64 {
        self.shared.ident
    }

    /// Resets positions, drains any stale buffers and issues the initial
    /// read-ahead burst.
    pub fn open(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.opened = true;
            state.end_of_stream = false;
            state.read_position = 0;
            state.stream_position = 0;
            state.current = None;
            state.outstanding.clear();
            state.bytes_delivered = 0;
        }
        while self.shared.queue_rx.try_recv().is_ok() {}
        self.request_fill_buffers();
    }

    /// Marks the source closed and wakes any blocked reader.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if !state.opened {
                return;
            }
            state.opened = false;
            state.end_of_stream = true;
        }
        // Zero-length terminator; ignore a full queue, the reader will
        // observe the flag on its next wakeup anyway.
        let _ = self.shared.queue_tx.try_send(ByteRangeBuffer::probe(0));
    }

    /// Tops up the request pipeline. The number of outstanding blocks
    /// (queued plus in flight, derived from the position gap) plus a safety
    /// margin of one never exceeds the queue bound.
    pub fn request_fill_buffers(&self) {
        let requests = {
            let mut state = self.shared.state.lock().unwrap();
            if !state.opened || state.end_of_stream {
                return;
            }
            let buffer_size = self.shared.config.buffer_size;
            let in_flight = (state.read_position - state.stream_position).div_ceil(buffer_size);
            let capacity = (self.shared.config.max_buffers as u64).saturating_sub(in_flight + 1);

            let mut requests = Vec::with_capacity(capacity as usize);
            for _ in 0..capacity {
                let offset = state.read_position;
                state.outstanding.push_back(offset);
                state.read_position += buffer_size;
                requests.push(BlockRequest {
                    ident: self.shared.ident,
                    offset,
                    length: buffer_size,
                    player_position: (self.shared.position_fn)(),
                    timestamp: now_millis(),
                    last_rtt: state.last_rtt,
                });
            }
            requests
        };
        // Send outside the lock: a local block source may serve re-entrantly.
        for request in requests {
            self.shared.block_source.request_block(request);
        }
    }

    /// Inbound block response. A missing payload or an offset that does not
    /// match the requested one collapses the stream to end-of-stream; a block
    /// shorter than the requested length is the final block.
    pub fn write(&self, request_offset: u64, offset: u64, data: Option<&[u8]>) {
        let buffer = {
            let mut state = self.shared.state.lock().unwrap();
            if state.end_of_stream {
                return;
            }
            match data {
                Some(data) if offset == request_offset => {
                    if (data.len() as u64) < self.shared.config.buffer_size {
                        debug!(
                            ident = self.shared.ident,
                            offset,
                            len = data.len(),
                            "Short block, marking end of stream"
                        );
                        state.end_of_stream = true;
                    }
                    ByteRangeBuffer::new(offset, data.to_vec())
                }
                Some(_) => {
                    warn!(
                        ident = self.shared.ident,
                        expected = request_offset,
                        got = offset,
                        "Block response offset mismatch, ending stream"
                    );
                    state.end_of_stream = true;
                    ByteRangeBuffer::probe(request_offset)
                }
                None => {
                    debug!(
                        ident = self.shared.ident,
                        offset = request_offset,
                        "Empty block response, end of stream"
                    );
                    state.end_of_stream = true;
                    ByteRangeBuffer::probe(request_offset)
                }
            }
        };
        if let Err(TrySendError::Full(_)) = self.shared.queue_tx.try_send(buffer) {
            // Cannot happen while request_fill_buffers respects its bound.
            error!(
                ident = self.shared.ident,
                offset, "Buffer queue full, dropping block (pipelining invariant violated)"
            );
        }
    }

    /// Inbound data message from the network (or the local streamer).
    /// Messages for a different session are ignored.
    pub fn on_data_message(&self, iq: &StreamingDataIQ) {
        if iq.ident != self.shared.ident {
            return;
        }
        let now = now_millis();
        let request_offset = {
            let mut state = self.shared.state.lock().unwrap();
            let rtt = adjusted_rtt(now, iq.timestamp, iq.streamer_latency);
            state.last_rtt = rtt;
            // The streamer has moved on by roughly half the round trip since
            // it stamped its position.
            state.streamer_position = Some((iq.streamer_position + rtt as u64 / 2, now));
            state.outstanding.pop_front()
        };
        let Some(request_offset) = request_offset else {
            warn!(
                ident = self.shared.ident,
                offset = iq.offset,
                "Data message with no outstanding request, ignoring"
            );
            return;
        };
        self.write(request_offset, iq.offset, iq.data.as_deref());
    }

    /// Blocking pull read. Returns `Ok(0)` only for a zero-length
    /// destination or once the stream has ended and drained.
    pub fn read_bytes(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut copied = 0usize;
        loop {
            let waited = {
                let mut state = self.shared.state.lock().unwrap();

                // Copy out of the current buffer while it covers the stream
                // position, pulling queued buffers as the current one drains.
                loop {
                    if state.current.is_none() {
                        match self.shared.queue_rx.try_recv() {
                            Ok(buffer) => state.current = Some(buffer),
                            Err(_) => break,
                        }
                    }
                    let Some(current) = state.current.clone() else {
                        break;
                    };
                    if current.is_empty() {
                        state.end_of_stream = true;
                        state.current = None;
                        continue;
                    }
                    if current.last_offset() <= state.stream_position {
                        state.current = None;
                        continue;
                    }
                    if !current.covers(state.stream_position) {
                        // A gap means request/response bookkeeping broke.
                        warn!(
                            ident = self.shared.ident,
                            stream_position = state.stream_position,
                            buffer_start = current.first_offset(),
                            "Non-contiguous buffer, ending stream"
                        );
                        state.end_of_stream = true;
                        state.current = None;
                        continue;
                    }

                    let skip = (state.stream_position - current.first_offset()) as usize;
                    let available = current.bytes().len() - skip;
                    let n = available.min(buf.len() - copied);
                    buf[copied..copied + n].copy_from_slice(&current.bytes()[skip..skip + n]);
                    copied += n;
                    state.stream_position += n as u64;
                    state.bytes_delivered += n as u64;
                    if state.stream_position >= current.last_offset() {
                        state.current = None;
                    }
                    if copied == buf.len() {
                        break;
                    }
                }

                if copied == buf.len() {
                    false
                } else if copied > 0 {
                    // Deliver what we have; never block once bytes were copied.
                    false
                } else if state.end_of_stream || !state.opened {
                    false
                } else {
                    true
                }
            };

            if !waited {
                break;
            }

            // Nothing buffered and the stream is live: prime the pipeline,
            // then wait for the next block (bounded by the liveness timeout).
            self.request_fill_buffers();
            match self
                .shared
                .queue_rx
                .recv_timeout(self.shared.config.read_timeout)
            {
                Ok(buffer) => {
                    let mut state = self.shared.state.lock().unwrap();
                    if buffer.is_empty() {
                        state.end_of_stream = true;
                    } else {
                        state.current = Some(buffer);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        ident = self.shared.ident,
                        "No data within read timeout, treating stream as ended"
                    );
                    self.shared.state.lock().unwrap().end_of_stream = true;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.shared.state.lock().unwrap().end_of_stream = true;
                }
            }
        }

        if copied > 0 {
            debug!(
                ident = self.shared.ident,
                copied,
                total = self.bytes_delivered(),
                "Delivered bytes to reader"
            );
            self.request_fill_buffers();
        }
        Ok(copied)
    }

    /// Last measured round-trip time, milliseconds.
    pub fn last_rtt(&self) -> i32 {
        self.shared.state.lock().unwrap().last_rtt
    }

    /// Extrapolated estimate of the streamer's playback position at `now`.
    pub fn streamer_position_estimate(&self, now: u64) -> Option<u64> {
        let state = self.shared.state.lock().unwrap();
        state
            .streamer_position
            .map(|(position, at)| position + now.saturating_sub(at))
    }

    /// Cumulative bytes handed to the reader, for buffering telemetry.
    pub fn bytes_delivered(&self) -> u64 {
        self.shared.state.lock().unwrap().bytes_delivered
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.shared.state.lock().unwrap().end_of_stream
    }

    /// `(stream_position, read_position)` snapshot.
    pub fn positions(&self) -> (u64, u64) {
        let state = self.shared.state.lock().unwrap();
        (state.stream_position, state.read_position)
    }
}

impl std::io::Read for PullDataSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read_bytes(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::config::BUFFER_SIZE;
    use crate::wire::WIRE_VERSION;

    /// Captures requests; optionally answers them from a byte image.
    struct ScriptedBlockSource {
        requests: Mutex<Vec<BlockRequest>>,
        image: Option<Vec<u8>>,
        reply_to: Mutex<Option<PullDataSource>>,
    }

    impl ScriptedBlockSource {
        fn capture_only() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                image: None,
                reply_to: Mutex::new(None),
            })
        }

        fn serving(image: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                image: Some(image),
                reply_to: Mutex::new(None),
            })
        }

        fn attach(&self, source: &PullDataSource) {
            *self.reply_to.lock().unwrap() = Some(source.clone());
        }

        fn request_offsets(&self) -> Vec<u64> {
            self.requests.lock().unwrap().iter().map(|r| r.offset).collect()
        }
    }

    impl BlockSource for ScriptedBlockSource {
        fn request_block(&self, request: BlockRequest) {
            self.requests.lock().unwrap().push(request.clone());
            let (Some(image), Some(source)) = (
                self.image.as_ref(),
                self.reply_to.lock().unwrap().clone(),
            ) else {
                return;
            };
            let start = (request.offset as usize).min(image.len());
            let end = ((request.offset + request.length) as usize).min(image.len());
            let iq = StreamingDataIQ {
                version: WIRE_VERSION,
                request_id: 0,
                ident: request.ident,
                offset: request.offset,
                timestamp: request.timestamp,
                streamer_position: 0,
                streamer_latency: 0,
                data: (start < end).then(|| image[start..end].to_vec()),
            };
            source.on_data_message(&iq);
        }
    }

    fn fast_config() -> StreamingConfig {
        StreamingConfig {
            read_timeout: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn position_zero() -> PositionFn {
        Arc::new(|| 0)
    }

    #[test]
    fn test_zero_length_read_is_a_no_op() {
        let blocks = ScriptedBlockSource::capture_only();
        let source = PullDataSource::new(1, fast_config(), blocks.clone(), position_zero());
        source.open();
        let sent_before = blocks.requests.lock().unwrap().len();
        assert_eq!(source.read_bytes(&mut []).unwrap(), 0);
        assert_eq!(blocks.requests.lock().unwrap().len(), sent_before);
    }

    #[test]
    fn test_open_issues_initial_burst() {
        let blocks = ScriptedBlockSource::capture_only();
        let source = PullDataSource::new(1, StreamingConfig::default(), blocks.clone(), position_zero());
        source.open();
        // MAX_BUFFERS(3) minus in-flight(0) minus the safety margin = 2.
        assert_eq!(blocks.request_offsets(), vec![0, BUFFER_SIZE]);
        let (stream_position, read_position) = source.positions();
        assert_eq!(stream_position, 0);
        assert_eq!(read_position, 2 * BUFFER_SIZE);
    }

    #[test]
    fn test_read_reproduces_source_bytes_across_chunk_sizes() {
        let image: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let blocks = ScriptedBlockSource::serving(image.clone());
        let source = PullDataSource::new(1, fast_config(), blocks.clone(), position_zero());
        blocks.attach(&source);
        source.open();

        let mut collected = Vec::new();
        let mut chunk = 1usize;
        loop {
            let mut buf = vec![0u8; chunk];
            let n = source.read_bytes(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
            chunk = (chunk * 3 + 1) % 5000 + 1;
        }
        assert_eq!(collected, image);
        assert!(source.is_end_of_stream());
    }

    #[test]
    fn test_requests_stay_block_aligned_and_ordered() {
        let image = vec![0xA5u8; 40_000];
        let blocks = ScriptedBlockSource::serving(image);
        let source = PullDataSource::new(1, fast_config(), blocks.clone(), position_zero());
        blocks.attach(&source);
        source.open();

        let mut buf = vec![0u8; 4096];
        while source.read_bytes(&mut buf).unwrap() > 0 {
            let (stream_position, read_position) = source.positions();
            assert!(stream_position <= read_position);
            assert_eq!(read_position % BUFFER_SIZE, 0);
        }

        let offsets = blocks.request_offsets();
        for window in offsets.windows(2) {
            assert_eq!(window[1], window[0] + BUFFER_SIZE);
        }
    }

    #[test]
    fn test_pipelining_stays_bounded() {
        let blocks = ScriptedBlockSource::capture_only();
        let source = PullDataSource::new(1, fast_config(), blocks.clone(), position_zero());
        source.open();
        // Repeated top-up attempts with nothing consumed must not grow the
        // outstanding window.
        source.request_fill_buffers();
        source.request_fill_buffers();
        assert!(blocks.requests.lock().unwrap().len() <= 3);
    }

    #[test]
    fn test_timeout_surfaces_as_end_of_input() {
        let blocks = ScriptedBlockSource::capture_only();
        let source = PullDataSource::new(1, fast_config(), blocks, position_zero());
        source.open();
        let start = Instant::now();
        let mut buf = [0u8; 128];
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 0);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(source.is_end_of_stream());
    }

    #[test]
    fn test_offset_mismatch_ends_stream() {
        let blocks = ScriptedBlockSource::capture_only();
        let source = PullDataSource::new(1, fast_config(), blocks, position_zero());
        source.open();
        source.write(0, 8192, Some(&[1u8; 8192]));
        let mut buf = [0u8; 64];
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 0);
        assert!(source.is_end_of_stream());
    }

    #[test]
    fn test_short_block_completes_stream_promptly() {
        let blocks = ScriptedBlockSource::capture_only();
        let source = PullDataSource::new(1, fast_config(), blocks, position_zero());
        source.open();
        source.write(0, 0, Some(&[7u8; 100]));
        let mut buf = [0u8; 256];
        let start = Instant::now();
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 100);
        assert_eq!(source.read_bytes(&mut buf).unwrap(), 0);
        // End arrives from the short block, not from the timeout.
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_foreign_ident_data_is_ignored() {
        let blocks = ScriptedBlockSource::capture_only();
        let source = PullDataSource::new(42, fast_config(), blocks, position_zero());
        source.open();
        source.on_data_message(&StreamingDataIQ {
            version: WIRE_VERSION,
            request_id: 0,
            ident: 99,
            offset: 0,
            timestamp: now_millis(),
            streamer_position: 0,
            streamer_latency: 0,
            data: Some(vec![1; 8192]),
        });
        assert_eq!(source.last_rtt(), 0);
        assert!(!source.is_end_of_stream());
    }

    #[test]
    fn test_rtt_subtracts_streamer_latency() {
        let blocks = ScriptedBlockSource::capture_only();
        let source = PullDataSource::new(1, fast_config(), blocks, position_zero());
        source.open();
        let now = now_millis();
        source.on_data_message(&StreamingDataIQ {
            version: WIRE_VERSION,
            request_id: 0,
            ident: 1,
            offset: 0,
            timestamp: now - 200,
            streamer_position: 5_000,
            streamer_latency: 150,
            data: Some(vec![1; 8192]),
        });
        let rtt = source.last_rtt();
        assert!((40..=80).contains(&rtt), "rtt was {rtt}");
        let estimate = source.streamer_position_estimate(now).unwrap();
        assert!(estimate >= 5_000 + rtt as u64 / 2);
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let blocks = ScriptedBlockSource::capture_only();
        let source = PullDataSource::new(
            1,
            StreamingConfig {
                read_timeout: Duration::from_secs(10),
                ..Default::default()
            },
            blocks,
            position_zero(),
        );
        source.open();
        let reader = source.clone();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 64];
            reader.read_bytes(&mut buf).unwrap()
        });
        thread::sleep(Duration::from_millis(50));
        source.close();
        assert_eq!(handle.join().unwrap(), 0);
    }
}
