//! Byte-range buffers and the sender-side sorted cache.
//!
//! A [`ByteRangeBuffer`] is an immutable block of bytes tagged with its
//! absolute `[first_offset, last_offset)` range in the logical stream. The
//! sender keeps every block it has read in a [`BufferCache`] ordered by start
//! offset, so a request for an already-served offset is answered without
//! touching the source file again.

use std::collections::BTreeMap;
use std::sync::Arc;

/// An immutable block of bytes at an absolute range in the stream.
///
/// Cheap to clone: the payload is shared.
#[derive(Debug, Clone)]
pub struct ByteRangeBuffer {
    first_offset: u64,
    bytes: Arc<[u8]>,
}

impl ByteRangeBuffer {
    pub fn new(offset: u64, bytes: Vec<u8>) -> Self {
        Self {
            first_offset: offset,
            bytes: bytes.into(),
        }
    }

    /// Builds a buffer from a partially filled block, keeping only the first
    /// `len` bytes.
    pub fn with_len(offset: u64, mut bytes: Vec<u8>, len: usize) -> Self {
        bytes.truncate(len);
        Self::new(offset, bytes)
    }

    /// Zero-length sentinel. Valid only for ordering lookups and as the
    /// end-of-stream terminator, never for data delivery.
    pub fn probe(offset: u64) -> Self {
        Self {
            first_offset: offset,
            bytes: Arc::from(Vec::new()),
        }
    }

    pub fn first_offset(&self) -> u64 {
        self.first_offset
    }

    /// One past the last byte covered by this buffer.
    pub fn last_offset(&self) -> u64 {
        self.first_offset + self.bytes.len() as u64
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether `offset` falls inside `[first_offset, last_offset)`.
    pub fn covers(&self, offset: u64) -> bool {
        offset >= self.first_offset && offset < self.last_offset()
    }
}

impl PartialEq for ByteRangeBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.first_offset == other.first_offset
    }
}

impl Eq for ByteRangeBuffer {}

impl PartialOrd for ByteRangeBuffer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByteRangeBuffer {
    /// Total order by start offset only. The pool holds non-overlapping,
    /// gap-free ranges, so this suffices for floor lookups.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.first_offset.cmp(&other.first_offset)
    }
}

/// Sorted pool of byte-range buffers with floor lookup.
#[derive(Debug, Default)]
pub struct BufferCache {
    buffers: BTreeMap<u64, ByteRangeBuffer>,
}

impl BufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, buffer: ByteRangeBuffer) {
        self.buffers.insert(buffer.first_offset(), buffer);
    }

    /// Finds the buffer covering `offset`: the entry starting at or
    /// immediately before `offset`, if its range actually reaches it.
    pub fn floor(&self, offset: u64) -> Option<&ByteRangeBuffer> {
        self.buffers
            .range(..=offset)
            .next_back()
            .map(|(_, buffer)| buffer)
            .filter(|buffer| buffer.covers(offset))
    }

    /// End of the contiguous range read so far, or 0 when empty.
    pub fn coverage_end(&self) -> u64 {
        self.buffers
            .values()
            .next_back()
            .map(ByteRangeBuffer::last_offset)
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
