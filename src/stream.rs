//! Per-stream state (RFC 7540 Section 5).
//!
//! A [`Stream`] tracks the RFC 7540 state machine, the peer's flow-control
//! credit, the priority edges, and the queues the application drains. All of
//! it is plain data: the [`crate::connection::Endpoint`] owns the table and
//! is the only mutator.

use std::collections::{BTreeSet, HashMap, VecDeque};

use bytes::Bytes;

use crate::error::{ErrorCode, H2Error};
use crate::flowcontrol::FlowWindow;
use crate::hpack::HeaderField;

/// Stream states (RFC 7540 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    ReservedLocal,
    ReservedRemote,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// State after sending HEADERS. Sending from closed or half closed
    /// (local) is refused, as is sending on a stream the peer reserved.
    pub(crate) fn after_send_headers(self, end_stream: bool) -> Result<Self, H2Error> {
        match (self, end_stream) {
            (Self::Idle, false) | (Self::Open, false) => Ok(Self::Open),
            (Self::Idle, true) | (Self::Open, true) => Ok(Self::HalfClosedLocal),
            (Self::ReservedLocal, false) => Ok(Self::HalfClosedRemote),
            (Self::ReservedLocal, true) => Ok(Self::Closed),
            (Self::HalfClosedRemote, false) => Ok(Self::HalfClosedRemote),
            (Self::HalfClosedRemote, true) => Ok(Self::Closed),
            (Self::ReservedRemote, _) => Err(H2Error::internal(
                "cannot send HEADERS on a stream reserved by the peer",
            )),
            (Self::HalfClosedLocal | Self::Closed, _) => Err(H2Error::stream_closed(
                "HEADERS after local end of stream",
            )),
        }
    }

    /// State after receiving HEADERS.
    pub(crate) fn after_recv_headers(self, end_stream: bool) -> Result<Self, H2Error> {
        match (self, end_stream) {
            (Self::Idle, false) | (Self::Open, false) => Ok(Self::Open),
            (Self::Idle, true) | (Self::Open, true) => Ok(Self::HalfClosedRemote),
            (Self::HalfClosedLocal, false) => Ok(Self::HalfClosedLocal),
            (Self::HalfClosedLocal, true) => Ok(Self::Closed),
            _ => Err(H2Error::stream_closed("HEADERS received on a done stream")),
        }
    }

    /// State after sending DATA.
    pub(crate) fn after_send_data(self, end_stream: bool) -> Result<Self, H2Error> {
        match (self, end_stream) {
            (Self::Open, false) => Ok(Self::Open),
            (Self::Open, true) => Ok(Self::HalfClosedLocal),
            (Self::HalfClosedRemote, false) => Ok(Self::HalfClosedRemote),
            (Self::HalfClosedRemote, true) => Ok(Self::Closed),
            _ => Err(H2Error::stream_closed("DATA after end of stream")),
        }
    }

    /// State after receiving DATA.
    pub(crate) fn after_recv_data(self, end_stream: bool) -> Result<Self, H2Error> {
        match (self, end_stream) {
            (Self::Open, false) => Ok(Self::Open),
            (Self::Open, true) => Ok(Self::HalfClosedRemote),
            (Self::HalfClosedLocal, false) => Ok(Self::HalfClosedLocal),
            (Self::HalfClosedLocal, true) => Ok(Self::Closed),
            _ => Err(H2Error::stream_closed("DATA received on a done stream")),
        }
    }

    /// State after sending RST_STREAM. Resetting an idle stream is a caller
    /// bug.
    pub(crate) fn after_send_rst(self) -> Result<Self, H2Error> {
        match self {
            Self::Idle => Err(H2Error::internal("RST_STREAM on an idle stream")),
            _ => Ok(Self::Closed),
        }
    }

    /// State after receiving RST_STREAM.
    pub(crate) fn after_recv_rst(self) -> Result<Self, H2Error> {
        match self {
            Self::Idle => Err(H2Error::protocol("RST_STREAM received on an idle stream")),
            _ => Ok(Self::Closed),
        }
    }

    /// State of a promised stream after sending PUSH_PROMISE for it.
    pub(crate) fn after_send_push_promise(self) -> Result<Self, H2Error> {
        match self {
            Self::Idle => Ok(Self::ReservedLocal),
            _ => Err(H2Error::internal("PUSH_PROMISE must promise an idle stream")),
        }
    }
}

/// A received DATA payload.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub stream_id: u32,
    /// Wire payload length including the pad-length byte and any padding;
    /// this is what flow control accounting is based on.
    pub original_length: usize,
    /// Application-visible bytes with padding stripped.
    pub data: Bytes,
    acked: bool,
}

impl Chunk {
    pub(crate) fn new(stream_id: u32, original_length: usize, data: Bytes) -> Self {
        Self {
            stream_id,
            original_length,
            data,
            acked: false,
        }
    }

    pub fn is_acked(&self) -> bool {
        self.acked
    }

    /// Flip the ack guard. Acking twice is a caller bug: the read path and
    /// stream shutdown both ack, and each chunk must be counted once.
    pub(crate) fn mark_acked(&mut self) -> Result<(), H2Error> {
        if self.acked {
            return Err(H2Error::internal("chunk acked twice"));
        }
        self.acked = true;
        Ok(())
    }
}

/// One HTTP/2 stream.
pub struct Stream {
    pub id: u32,
    pub state: StreamState,
    /// How many DATA bytes the peer will still accept from us.
    pub send_credits: FlowWindow,
    /// Priority parent; stream 0 is the root of the dependency tree.
    pub parent: u32,
    /// Streams that depend on this one. Ids only: the stream table is the
    /// sole owner, so a pruned dependee simply stops resolving.
    pub dependees: BTreeSet<u32>,
    /// Priority weight, 1..=256.
    pub weight: u16,
    /// Error code recorded when the peer reset the stream.
    pub rst_error: Option<ErrorCode>,
    /// Total DATA payload bytes written on this stream. Never decreases.
    pub bytes_sent: u64,
    /// Decoded header lists awaiting `get_headers`.
    pub headers_queue: VecDeque<Vec<HeaderField>>,
    /// Header-block fragments accumulated until END_HEADERS; `None` when no
    /// block is in progress.
    pub(crate) header_fragments: Option<Vec<Bytes>>,
    /// Cached total of the fragment lengths.
    pub(crate) fragments_len: usize,
    /// Pad length recorded from the HEADERS that opened the block.
    pub(crate) header_padding: Option<u8>,
    /// Received DATA; a `None` entry marks the end of the stream.
    pub chunks: VecDeque<Option<Chunk>>,
}

impl Stream {
    pub(crate) fn new(id: u32, initial_send_credits: i64) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_credits: FlowWindow::new(initial_send_credits),
            parent: 0,
            dependees: BTreeSet::new(),
            weight: 16,
            rst_error: None,
            bytes_sent: 0,
            headers_queue: VecDeque::new(),
            header_fragments: None,
            fragments_len: 0,
            header_padding: None,
            chunks: VecDeque::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }
}

/// The stream table. Owns every stream, including the priority root
/// (stream 0, permanently idle and without flow credit).
pub struct StreamMap {
    streams: HashMap<u32, Stream>,
}

impl StreamMap {
    pub(crate) fn new() -> Self {
        let mut streams = HashMap::new();
        streams.insert(0, Stream::new(0, 0));
        Self { streams }
    }

    pub fn get(&self, id: u32) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub(crate) fn require_mut(&mut self, id: u32) -> Result<&mut Stream, H2Error> {
        self.streams
            .get_mut(&id)
            .ok_or_else(|| H2Error::internal("unknown stream"))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.streams.contains_key(&id)
    }

    /// Fetch a stream, creating it idle on first reference. New streams get
    /// default priority: they depend on the root, weight 16.
    pub(crate) fn ensure(&mut self, id: u32, initial_send_credits: i64) -> &mut Stream {
        if !self.streams.contains_key(&id) {
            self.streams.insert(id, Stream::new(id, initial_send_credits));
            if id != 0
                && let Some(root) = self.streams.get_mut(&0)
            {
                root.dependees.insert(id);
            }
        }
        self.streams.get_mut(&id).unwrap()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.streams.values_mut()
    }
}
