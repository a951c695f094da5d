//! The sans-IO HTTP/2 endpoint: inbound frame dispatch and outbound writers.
//!
//! [`Endpoint`] owns the stream table, both settings views, the
//! connection-level flow window, the HPACK contexts, and the pong/GOAWAY
//! bookkeeping. It never touches a socket: de-framed inbound frames are fed
//! to [`Endpoint::handle_frame`], and outbound frames accumulate in an
//! internal buffer drained with [`Endpoint::take_pending_send`].
//!
//! Inbound handlers return errors as values. Whether a given error resets
//! one stream or tears down the connection with GOAWAY is the pump's call
//! (see [`crate::session`]).

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{ErrorCode, H2Error};
use crate::flowcontrol::FlowWindow;
use crate::frame::{
    FLAG_ACK, FLAG_END_HEADERS, FLAG_END_STREAM, FLAG_PADDED, FLAG_PRIORITY, FRAME_CONTINUATION,
    FRAME_DATA, FRAME_GOAWAY, FRAME_HEADERS, FRAME_PING, FRAME_PRIORITY, FRAME_PUSH_PROMISE,
    FRAME_RST_STREAM, FRAME_SETTINGS, FRAME_WINDOW_UPDATE, FrameHeader, Priority, STREAM_ID_MASK,
    put_u32, read_u32,
};
use crate::hpack::{Decoder, Encoder, HeaderField};
use crate::metrics;
use crate::settings::{
    self, SETTINGS_ENABLE_PUSH, SETTINGS_HEADER_TABLE_SIZE, SETTINGS_INITIAL_WINDOW_SIZE, Settings,
};
use crate::stream::{Chunk, Stream, StreamMap, StreamState};

/// Upper bound on a buffered header block (HEADERS plus CONTINUATION
/// fragments, before HPACK decoding).
pub const MAX_HEADER_BUFFER_SIZE: usize = 409_600;

/// Which side of the connection this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The per-stream layer of one HTTP/2 connection.
pub struct Endpoint {
    role: Role,
    pub(crate) streams: StreamMap,
    /// Next locally initiated stream id: odd for clients, even for servers.
    next_stream_id: u32,
    /// Highest peer-initiated stream seen; our GOAWAY last-stream-id.
    highest_recv_stream: u32,
    /// Settings we announced.
    local_settings: Settings,
    /// Announced settings awaiting the peer's ACK.
    pending_local: Option<Settings>,
    /// Settings the peer has acknowledged.
    acked_settings: Option<Settings>,
    /// The peer's current effective settings.
    peer_settings: Settings,
    /// Connection-level credit for outgoing DATA.
    send_credits: FlowWindow,
    encoder: Encoder,
    decoder: Decoder,
    /// Stream whose header block is open; until END_HEADERS no other frame
    /// may arrive.
    expect_continuation: Option<u32>,
    /// Outstanding PING payloads; flipped true when the pong arrives.
    pongs: HashMap<[u8; 8], bool>,
    ping_counter: u64,
    /// Lowest GOAWAY last-stream-id the peer has sent, with its code.
    goaway_recv: Option<(u32, ErrorCode)>,
    goaway_sent: Option<ErrorCode>,
    send_buf: Vec<u8>,
}

impl Endpoint {
    /// Create an endpoint and queue its SETTINGS announcement.
    ///
    /// The connection-preface magic is the transport's business and is not
    /// written here.
    pub fn new(role: Role, settings: Settings) -> Self {
        let mut endpoint = Self {
            role,
            streams: StreamMap::new(),
            next_stream_id: if role == Role::Client { 1 } else { 2 },
            highest_recv_stream: 0,
            local_settings: settings.clone(),
            pending_local: None,
            acked_settings: None,
            peer_settings: Settings::default(),
            send_credits: FlowWindow::default(),
            encoder: Encoder::new(Settings::default().header_table_size as usize),
            decoder: Decoder::new(settings.header_table_size as usize),
            expect_continuation: None,
            pongs: HashMap::new(),
            ping_counter: 0,
            goaway_recv: None,
            goaway_sent: None,
            send_buf: Vec::new(),
        };
        endpoint.send_settings(settings);
        endpoint
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stream(&self, id: u32) -> Option<&Stream> {
        self.streams.get(id)
    }

    pub fn stream_state(&self, id: u32) -> Option<StreamState> {
        self.streams.get(id).map(|s| s.state)
    }

    pub fn reset_error(&self, id: u32) -> Option<ErrorCode> {
        self.streams.get(id).and_then(|s| s.rst_error)
    }

    pub fn peer_settings(&self) -> &Settings {
        &self.peer_settings
    }

    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    /// Our settings as far as the peer has acknowledged them.
    pub fn acked_settings(&self) -> Option<&Settings> {
        self.acked_settings.as_ref()
    }

    pub fn connection_send_credits(&self) -> i64 {
        self.send_credits.credits()
    }

    /// Lowest `(last_stream_id, error_code)` from any GOAWAY the peer sent.
    pub fn goaway_received(&self) -> Option<(u32, ErrorCode)> {
        self.goaway_recv
    }

    pub fn goaway_sent(&self) -> Option<ErrorCode> {
        self.goaway_sent
    }

    /// Bytes queued for the transport.
    pub fn take_pending_send(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.send_buf)
    }

    pub fn has_pending_send(&self) -> bool {
        !self.send_buf.is_empty()
    }

    /// Allocate the next locally initiated stream id.
    pub fn open_stream(&mut self) -> u32 {
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        let init = i64::from(self.peer_settings.initial_window_size);
        self.streams.ensure(id, init);
        id
    }

    // ── Inbound dispatch ───────────────────────────────────────────────

    /// Dispatch one de-framed inbound frame.
    ///
    /// `payload` is the raw frame payload; flags and stream id come from the
    /// transport header. Unknown frame types are discarded here, matching
    /// the RFC rule the transport defers to this layer.
    pub fn handle_frame(&mut self, head: FrameHeader, payload: &[u8]) -> Result<(), H2Error> {
        metrics::FRAMES_RECEIVED.increment();

        // Between HEADERS/PUSH_PROMISE without END_HEADERS and the closing
        // CONTINUATION, nothing else may arrive on any stream.
        if let Some(expected) = self.expect_continuation
            && (head.frame_type != FRAME_CONTINUATION || head.stream_id != expected)
        {
            return Err(H2Error::protocol(
                "header block interrupted: expected CONTINUATION",
            ));
        }

        match head.frame_type {
            FRAME_DATA => self.recv_data(head, payload),
            FRAME_HEADERS => self.recv_headers(head, payload),
            FRAME_PRIORITY => self.recv_priority(head, payload),
            FRAME_RST_STREAM => self.recv_rst_stream(head, payload),
            FRAME_SETTINGS => self.recv_settings(head, payload),
            FRAME_PUSH_PROMISE => self.recv_push_promise(head, payload),
            FRAME_PING => self.recv_ping(head, payload),
            FRAME_GOAWAY => self.recv_goaway(head, payload),
            FRAME_WINDOW_UPDATE => self.recv_window_update(head, payload),
            FRAME_CONTINUATION => self.recv_continuation(head, payload),
            _ => Ok(()),
        }
    }

    fn recv_data(&mut self, head: FrameHeader, payload: &[u8]) -> Result<(), H2Error> {
        if head.stream_id == 0 {
            return Err(H2Error::protocol("DATA on stream 0"));
        }
        // Flow control is charged for the whole payload, padding included.
        let original_length = payload.len();
        let data = strip_padding(payload, head.flags)?;
        let end_stream = head.flags & FLAG_END_STREAM != 0;

        let init = i64::from(self.peer_settings.initial_window_size);
        let stream = self.streams.ensure(head.stream_id, init);
        match stream.state {
            StreamState::Open | StreamState::HalfClosedLocal => {}
            _ => return Err(H2Error::stream_closed("DATA on a done stream")),
        }
        stream.state = stream.state.after_recv_data(end_stream)?;
        stream.chunks.push_back(Some(Chunk::new(
            head.stream_id,
            original_length,
            Bytes::copy_from_slice(data),
        )));
        if end_stream {
            stream.chunks.push_back(None);
        }
        metrics::DATA_BYTES_RECEIVED.add(data.len() as u64);
        Ok(())
    }

    fn recv_headers(&mut self, head: FrameHeader, payload: &[u8]) -> Result<(), H2Error> {
        if head.stream_id == 0 {
            return Err(H2Error::protocol("HEADERS on stream 0"));
        }
        let mut rest = payload;
        let mut padding = None;
        if head.flags & FLAG_PADDED != 0 {
            let Some((&pad, after)) = rest.split_first() else {
                return Err(H2Error::frame_size("HEADERS too short for a pad length"));
            };
            padding = Some(pad);
            rest = after;
        }
        let mut priority = None;
        if head.flags & FLAG_PRIORITY != 0 {
            priority = Some(Priority::parse(rest)?);
            rest = &rest[5..];
        }

        if self.is_peer_initiated(head.stream_id) {
            self.highest_recv_stream = self.highest_recv_stream.max(head.stream_id);
        }
        let init = i64::from(self.peer_settings.initial_window_size);
        self.streams.ensure(head.stream_id, init);
        if let Some(pri) = priority {
            self.apply_priority(head.stream_id, pri)?;
        }

        let end_stream = head.flags & FLAG_END_STREAM != 0;
        let end_headers = head.flags & FLAG_END_HEADERS != 0;

        let stream = self.streams.require_mut(head.stream_id)?;
        match stream.state {
            StreamState::Idle | StreamState::Open | StreamState::HalfClosedLocal => {}
            _ => return Err(H2Error::stream_closed("HEADERS on a done stream")),
        }
        if rest.len() > MAX_HEADER_BUFFER_SIZE {
            return Err(H2Error::protocol("header block exceeds the buffer limit"));
        }
        // Padding is validated and stripped at END_HEADERS, once the whole
        // block is in hand.
        stream.header_fragments = Some(vec![Bytes::copy_from_slice(rest)]);
        stream.fragments_len = rest.len();
        stream.header_padding = padding;
        let next = stream.state.after_recv_headers(end_stream)?;

        if end_headers {
            self.finish_header_block(head.stream_id)?;
        } else {
            self.expect_continuation = Some(head.stream_id);
        }

        let stream = self.streams.require_mut(head.stream_id)?;
        stream.state = next;
        if end_stream {
            stream.chunks.push_back(None);
        }
        Ok(())
    }

    fn recv_priority(&mut self, head: FrameHeader, payload: &[u8]) -> Result<(), H2Error> {
        if head.stream_id == 0 {
            return Err(H2Error::protocol("PRIORITY on stream 0"));
        }
        if payload.len() != 5 {
            return Err(H2Error::frame_size("PRIORITY payload must be 5 bytes"));
        }
        let pri = Priority::parse(payload)?;
        let init = i64::from(self.peer_settings.initial_window_size);
        self.streams.ensure(head.stream_id, init);
        self.apply_priority(head.stream_id, pri)
    }

    /// Re-hang `id` under the dependency named by a priority record and set
    /// its weight. A dependency on a stream not yet in the table creates
    /// that stream with default priority (RFC 7540 Section 5.3.1).
    fn apply_priority(&mut self, id: u32, pri: Priority) -> Result<(), H2Error> {
        if pri.dependency == id {
            return Err(H2Error::protocol("stream cannot depend on itself"));
        }
        let init = i64::from(self.peer_settings.initial_window_size);
        self.streams.ensure(pri.dependency, init);
        self.streams.reprioritize(id, pri.dependency, pri.exclusive)?;
        self.streams.require_mut(id)?.weight = pri.weight_value();
        Ok(())
    }

    fn recv_rst_stream(&mut self, head: FrameHeader, payload: &[u8]) -> Result<(), H2Error> {
        if head.stream_id == 0 {
            return Err(H2Error::protocol("RST_STREAM on stream 0"));
        }
        if payload.len() != 4 {
            return Err(H2Error::frame_size("RST_STREAM payload must be 4 bytes"));
        }
        let code = ErrorCode::from_u32(read_u32(payload));
        let init = i64::from(self.peer_settings.initial_window_size);
        let stream = self.streams.ensure(head.stream_id, init);
        stream.state = stream.state.after_recv_rst()?;
        stream.rst_error = Some(code);
        metrics::STREAMS_RESET.increment();
        // Blocked readers notice the closed state on their next wakeup.
        Ok(())
    }

    fn recv_settings(&mut self, head: FrameHeader, payload: &[u8]) -> Result<(), H2Error> {
        if head.stream_id != 0 {
            return Err(H2Error::protocol("SETTINGS on a non-zero stream"));
        }
        if head.flags & FLAG_ACK != 0 {
            if !payload.is_empty() {
                return Err(H2Error::frame_size("SETTINGS ACK with a payload"));
            }
            self.ack_settings();
            return Ok(());
        }

        let entries = settings::decode_settings(payload)?;
        for &(id, value) in &entries {
            match id {
                SETTINGS_ENABLE_PUSH if self.role == Role::Client && value == 1 => {
                    return Err(H2Error::protocol("a server cannot enable push"));
                }
                SETTINGS_HEADER_TABLE_SIZE => {
                    // Resizes our encoder table now; the size-update
                    // instruction rides at the front of the next block.
                    self.encoder.set_max_table_size(value as usize);
                }
                SETTINGS_INITIAL_WINDOW_SIZE => {
                    // Shift every live stream window by the delta
                    // (RFC 7540 Section 6.9.2). The connection window is
                    // not affected.
                    let delta =
                        i64::from(value) - i64::from(self.peer_settings.initial_window_size);
                    if delta != 0 {
                        for stream in self.streams.iter_mut() {
                            if stream.id != 0 && !stream.is_closed() {
                                stream.send_credits.adjust(delta)?;
                            }
                        }
                    }
                }
                _ => {}
            }
            self.peer_settings.apply(&[(id, value)]);
        }
        self.push_frame(FRAME_SETTINGS, FLAG_ACK, 0, &[]);
        Ok(())
    }

    fn ack_settings(&mut self) {
        if let Some(settings) = self.pending_local.take() {
            self.acked_settings = Some(settings);
        }
    }

    fn recv_push_promise(&mut self, head: FrameHeader, payload: &[u8]) -> Result<(), H2Error> {
        if head.stream_id == 0 {
            return Err(H2Error::protocol("PUSH_PROMISE on stream 0"));
        }
        if self.role != Role::Client {
            return Err(H2Error::protocol("PUSH_PROMISE sent to a server"));
        }
        if !self.local_settings.enable_push {
            return Err(H2Error::protocol("PUSH_PROMISE while push is disabled"));
        }
        let rest = strip_padding(payload, head.flags)?;
        if rest.len() < 4 {
            return Err(H2Error::frame_size(
                "PUSH_PROMISE too short for the promised stream id",
            ));
        }
        let _promised = read_u32(&rest[..4]) & STREAM_ID_MASK;
        // Accepting a promise means instantiating the reserved stream and
        // routing its header block; nothing below supports that yet, and
        // stream state must stay untouched.
        Err(H2Error::internal("PUSH_PROMISE receive is not implemented"))
    }

    fn recv_ping(&mut self, head: FrameHeader, payload: &[u8]) -> Result<(), H2Error> {
        if head.stream_id != 0 {
            return Err(H2Error::protocol("PING on a non-zero stream"));
        }
        if payload.len() != 8 {
            return Err(H2Error::frame_size("PING payload must be 8 bytes"));
        }
        if head.flags & FLAG_ACK != 0 {
            let mut opaque = [0u8; 8];
            opaque.copy_from_slice(payload);
            // Pongs nobody is waiting for are dropped on the floor.
            if let Some(waiter) = self.pongs.get_mut(&opaque) {
                *waiter = true;
            }
        } else {
            self.push_frame(FRAME_PING, FLAG_ACK, 0, payload);
        }
        Ok(())
    }

    fn recv_goaway(&mut self, head: FrameHeader, payload: &[u8]) -> Result<(), H2Error> {
        if head.stream_id != 0 {
            return Err(H2Error::protocol("GOAWAY on a non-zero stream"));
        }
        if payload.len() < 8 {
            return Err(H2Error::frame_size("GOAWAY payload must be at least 8 bytes"));
        }
        let last_stream_id = read_u32(&payload[..4]) & STREAM_ID_MASK;
        let code = ErrorCode::from_u32(read_u32(&payload[4..8]));
        // Trailing debug data is legal and ignored. Only the lowest
        // last-stream-id is kept.
        if self
            .goaway_recv
            .is_none_or(|(lowest, _)| last_stream_id < lowest)
        {
            self.goaway_recv = Some((last_stream_id, code));
        }
        Ok(())
    }

    fn recv_window_update(&mut self, head: FrameHeader, payload: &[u8]) -> Result<(), H2Error> {
        if payload.len() != 4 {
            return Err(H2Error::frame_size("WINDOW_UPDATE payload must be 4 bytes"));
        }
        // Reserved bit is asserted zero.
        let increment = read_u32(payload) & STREAM_ID_MASK;
        if increment == 0 {
            return Err(H2Error::protocol("WINDOW_UPDATE with a zero increment"));
        }
        if head.stream_id == 0 {
            self.send_credits.grant(increment)?;
        } else if let Some(stream) = self.streams.get_mut(head.stream_id) {
            stream.send_credits.grant(increment)?;
        }
        // Updates for streams we never saw (or already pruned) are ignored.
        Ok(())
    }

    fn recv_continuation(&mut self, head: FrameHeader, payload: &[u8]) -> Result<(), H2Error> {
        if head.stream_id == 0 {
            return Err(H2Error::protocol("CONTINUATION on stream 0"));
        }
        let Some(stream) = self.streams.get_mut(head.stream_id) else {
            return Err(H2Error::protocol("CONTINUATION without an open header block"));
        };
        let Some(fragments) = stream.header_fragments.as_mut() else {
            return Err(H2Error::protocol("CONTINUATION without an open header block"));
        };
        if stream.fragments_len + payload.len() > MAX_HEADER_BUFFER_SIZE {
            return Err(H2Error::protocol("header block exceeds the buffer limit"));
        }
        fragments.push(Bytes::copy_from_slice(payload));
        stream.fragments_len += payload.len();
        if head.flags & FLAG_END_HEADERS != 0 {
            self.finish_header_block(head.stream_id)?;
        }
        Ok(())
    }

    /// END_HEADERS: concatenate the buffered fragments, validate and strip
    /// padding, decode, and queue the header list.
    ///
    /// Decoding happens unconditionally and in arrival order; skipping a
    /// block would desynchronise the HPACK dynamic table.
    fn finish_header_block(&mut self, id: u32) -> Result<(), H2Error> {
        self.expect_continuation = None;
        let (mut block, padding) = {
            let stream = self.streams.require_mut(id)?;
            let fragments = stream
                .header_fragments
                .take()
                .ok_or_else(|| H2Error::internal("no header block in progress"))?;
            let mut block = Vec::with_capacity(stream.fragments_len);
            for fragment in &fragments {
                block.extend_from_slice(fragment);
            }
            stream.fragments_len = 0;
            (block, stream.header_padding.take())
        };

        if let Some(pad) = padding {
            let pad = usize::from(pad);
            if pad > block.len() {
                return Err(H2Error::protocol("pad length exceeds the header block"));
            }
            let cut = block.len() - pad;
            if block[cut..].iter().any(|&b| b != 0) {
                return Err(H2Error::protocol("padding bytes must be zero"));
            }
            block.truncate(cut);
        }

        let headers = self.decoder.decode(&block)?;

        // Every pseudo-header must precede the first regular header.
        let mut seen_regular = false;
        for header in &headers {
            if header.is_pseudo() {
                if seen_regular {
                    return Err(H2Error::protocol("pseudo-header after a regular header"));
                }
            } else {
                seen_regular = true;
            }
        }

        metrics::HEADER_BLOCKS_DECODED.increment();
        self.streams.require_mut(id)?.headers_queue.push_back(headers);
        Ok(())
    }

    // ── Outbound writers ───────────────────────────────────────────────

    /// Announce settings; they become `acked_settings` once the peer ACKs.
    pub fn send_settings(&mut self, new_settings: Settings) {
        let mut payload = Vec::new();
        settings::encode_settings(&new_settings.to_entries(), &mut payload);
        self.push_frame(FRAME_SETTINGS, 0, 0, &payload);
        self.local_settings = new_settings.clone();
        self.pending_local = Some(new_settings);
    }

    /// HPACK-encode and send a header list, fragmented at the peer's
    /// MAX_FRAME_SIZE: HEADERS first (carrying END_STREAM if requested),
    /// then CONTINUATION frames, with END_HEADERS on the last piece.
    pub fn send_headers(
        &mut self,
        id: u32,
        headers: &[HeaderField],
        end_stream: bool,
    ) -> Result<(), H2Error> {
        let init = i64::from(self.peer_settings.initial_window_size);
        let next = self
            .streams
            .ensure(id, init)
            .state
            .after_send_headers(end_stream)?;

        let mut block = Vec::new();
        self.encoder.encode(headers, &mut block);

        let max_frame = self.peer_settings.max_frame_size as usize;
        let mut offset = 0;
        let mut first = true;
        loop {
            let end = usize::min(offset + max_frame, block.len());
            let last = end == block.len();
            let mut flags = 0;
            if first && end_stream {
                flags |= FLAG_END_STREAM;
            }
            if last {
                flags |= FLAG_END_HEADERS;
            }
            let frame_type = if first { FRAME_HEADERS } else { FRAME_CONTINUATION };
            self.push_frame(frame_type, flags, id, &block[offset..end]);
            first = false;
            offset = end;
            if last {
                break;
            }
        }

        self.streams.require_mut(id)?.state = next;
        Ok(())
    }

    /// Send one DATA frame, optionally padded with `pad` zero bytes.
    ///
    /// Both the stream window and the connection window are debited by the
    /// whole framed payload, padding overhead included (RFC 7540 Section
    /// 6.9.1), before the frame is queued.
    pub fn send_data(
        &mut self,
        id: u32,
        data: &[u8],
        end_stream: bool,
        pad: Option<u8>,
    ) -> Result<(), H2Error> {
        let framed_len = data.len() + pad.map_or(0, |p| 1 + usize::from(p));
        if framed_len > self.peer_settings.max_frame_size as usize {
            return Err(H2Error::internal("DATA larger than the peer's MAX_FRAME_SIZE"));
        }

        let next = {
            let stream = self.streams.require_mut(id)?;
            let next = stream.state.after_send_data(end_stream)?;
            if stream.send_credits.available() < framed_len {
                return Err(H2Error::flow_control("insufficient stream credit"));
            }
            next
        };
        if self.send_credits.available() < framed_len {
            return Err(H2Error::flow_control("insufficient connection credit"));
        }
        self.streams.require_mut(id)?.send_credits.reserve(framed_len)?;
        self.send_credits.reserve(framed_len)?;

        let mut flags = 0;
        if end_stream {
            flags |= FLAG_END_STREAM;
        }
        let mut payload = Vec::with_capacity(framed_len);
        if let Some(pad) = pad {
            flags |= FLAG_PADDED;
            payload.push(pad);
        }
        payload.extend_from_slice(data);
        if let Some(pad) = pad {
            payload.resize(payload.len() + usize::from(pad), 0);
        }
        self.push_frame(FRAME_DATA, flags, id, &payload);

        let stream = self.streams.require_mut(id)?;
        stream.state = next;
        stream.bytes_sent += data.len() as u64;
        metrics::DATA_BYTES_SENT.add(data.len() as u64);
        Ok(())
    }

    /// Reset a stream. Resetting an idle stream is a caller bug.
    pub fn send_rst_stream(&mut self, id: u32, code: ErrorCode) -> Result<(), H2Error> {
        let next = self.streams.require_mut(id)?.state.after_send_rst()?;
        let mut payload = Vec::with_capacity(4);
        put_u32(&mut payload, code.as_u32());
        self.push_frame(FRAME_RST_STREAM, 0, id, &payload);
        self.streams.require_mut(id)?.state = next;
        metrics::STREAMS_RESET.increment();
        Ok(())
    }

    /// Announce a priority preference for `id`. The local tree tracks the
    /// peer's instructions, not our own, so nothing is re-hung here.
    pub fn send_priority(&mut self, id: u32, pri: Priority) -> Result<(), H2Error> {
        if id == 0 {
            return Err(H2Error::internal("PRIORITY on stream 0"));
        }
        let mut payload = Vec::with_capacity(5);
        pri.encode(&mut payload);
        self.push_frame(FRAME_PRIORITY, 0, id, &payload);
        Ok(())
    }

    /// Send a PING and register a pong waiter; returns the opaque payload
    /// to wait on.
    pub fn send_ping(&mut self) -> [u8; 8] {
        self.ping_counter += 1;
        let opaque = self.ping_counter.to_be_bytes();
        self.pongs.insert(opaque, false);
        self.push_frame(FRAME_PING, 0, 0, &opaque);
        opaque
    }

    /// True once the pong for `opaque` has arrived; the waiter is removed.
    pub fn take_pong(&mut self, opaque: &[u8; 8]) -> bool {
        if self.pongs.get(opaque).copied().unwrap_or(false) {
            self.pongs.remove(opaque);
            return true;
        }
        false
    }

    /// Send GOAWAY carrying the highest peer-initiated stream we processed.
    pub fn send_goaway(&mut self, code: ErrorCode) {
        let mut payload = Vec::with_capacity(8);
        put_u32(&mut payload, self.highest_recv_stream);
        put_u32(&mut payload, code.as_u32());
        self.push_frame(FRAME_GOAWAY, 0, 0, &payload);
        self.goaway_sent = Some(code);
    }

    /// Grant the peer credit. Increments outside 1..2^31 are caller bugs.
    pub fn send_window_update(&mut self, id: u32, increment: u32) -> Result<(), H2Error> {
        if increment == 0 || increment > STREAM_ID_MASK {
            return Err(H2Error::internal("WINDOW_UPDATE increment out of range"));
        }
        let mut payload = Vec::with_capacity(4);
        put_u32(&mut payload, increment);
        self.push_frame(FRAME_WINDOW_UPDATE, 0, id, &payload);
        Ok(())
    }

    /// Promise `promised` on parent stream `id` (server only). The promised
    /// stream moves to reserved (local).
    pub fn send_push_promise(
        &mut self,
        id: u32,
        promised: u32,
        headers: &[HeaderField],
    ) -> Result<(), H2Error> {
        if self.role != Role::Server {
            return Err(H2Error::internal("only a server can send PUSH_PROMISE"));
        }
        {
            let parent = self.streams.require_mut(id)?;
            match parent.state {
                StreamState::Open | StreamState::HalfClosedRemote => {}
                _ => return Err(H2Error::stream_closed("PUSH_PROMISE on a done stream")),
            }
        }
        let init = i64::from(self.peer_settings.initial_window_size);
        let next = self
            .streams
            .ensure(promised, init)
            .state
            .after_send_push_promise()?;

        let mut block = Vec::new();
        self.encoder.encode(headers, &mut block);

        // First frame carries the 4-byte promised id; the remainder rides
        // in CONTINUATION frames.
        let max_frame = self.peer_settings.max_frame_size as usize;
        let first_take = usize::min(max_frame - 4, block.len());
        let mut payload = Vec::with_capacity(4 + first_take);
        put_u32(&mut payload, promised & STREAM_ID_MASK);
        payload.extend_from_slice(&block[..first_take]);
        let mut offset = first_take;
        let flags = if offset == block.len() { FLAG_END_HEADERS } else { 0 };
        self.push_frame(FRAME_PUSH_PROMISE, flags, id, &payload);
        while offset < block.len() {
            let end = usize::min(offset + max_frame, block.len());
            let flags = if end == block.len() { FLAG_END_HEADERS } else { 0 };
            self.push_frame(FRAME_CONTINUATION, flags, id, &block[offset..end]);
            offset = end;
        }

        self.streams.require_mut(promised)?.state = next;
        Ok(())
    }

    // ── Application-side plumbing ──────────────────────────────────────

    /// Pop the next decoded header list for a stream.
    pub fn pop_headers(&mut self, id: u32) -> Option<Vec<HeaderField>> {
        self.streams.get_mut(id)?.headers_queue.pop_front()
    }

    /// Pop the next chunk-queue entry: `Some(None)` is the end-of-stream
    /// sentinel, `None` means the queue is empty.
    pub fn pop_chunk(&mut self, id: u32) -> Option<Option<Chunk>> {
        self.streams.get_mut(id)?.chunks.pop_front()
    }

    /// Ack one chunk. Unless `no_window_update`, this returns the chunk's
    /// whole wire footprint to the peer: a stream WINDOW_UPDATE followed by
    /// a connection one, each for `original_length`.
    pub fn ack_chunk(&mut self, chunk: &mut Chunk, no_window_update: bool) -> Result<(), H2Error> {
        chunk.mark_acked()?;
        if !no_window_update && chunk.original_length > 0 {
            let n = chunk.original_length as u32;
            self.send_window_update(chunk.stream_id, n)?;
            self.send_window_update(0, n)?;
        }
        Ok(())
    }

    /// Largest DATA payload currently sendable on `id`.
    pub fn data_budget(&self, id: u32, want: usize) -> usize {
        let Some(stream) = self.streams.get(id) else {
            return 0;
        };
        want.min(stream.send_credits.available())
            .min(self.send_credits.available())
            .min(self.peer_settings.max_frame_size as usize)
    }

    /// Abort a stream: RST_STREAM(NO_ERROR) unless idle or closed, then
    /// drain unread chunks and hand their credit back in one
    /// connection-level WINDOW_UPDATE.
    pub fn shutdown_stream(&mut self, id: u32) -> Result<(), H2Error> {
        let state = self.streams.require_mut(id)?.state;
        if state != StreamState::Idle && state != StreamState::Closed {
            self.send_rst_stream(id, ErrorCode::NoError)?;
        }
        let drained: Vec<Chunk> = {
            let stream = self.streams.require_mut(id)?;
            stream.chunks.drain(..).flatten().collect()
        };
        let mut recovered = 0usize;
        for mut chunk in drained {
            self.ack_chunk(&mut chunk, true)?;
            recovered += chunk.original_length;
        }
        if recovered > 0 {
            self.send_window_update(0, recovered as u32)?;
        }
        Ok(())
    }

    fn is_peer_initiated(&self, id: u32) -> bool {
        id != 0
            && match self.role {
                Role::Client => id.is_multiple_of(2),
                Role::Server => !id.is_multiple_of(2),
            }
    }

    fn push_frame(&mut self, frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) {
        FrameHeader::new(payload.len() as u32, frame_type, flags, stream_id)
            .encode(&mut self.send_buf);
        self.send_buf.extend_from_slice(payload);
        metrics::FRAMES_SENT.increment();
    }
}

/// Validate and strip `PADDED` framing: one pad-length byte, then the
/// payload, then `pad` zero bytes. The pad length must be strictly smaller
/// than the remaining payload.
fn strip_padding(payload: &[u8], flags: u8) -> Result<&[u8], H2Error> {
    if flags & FLAG_PADDED == 0 {
        return Ok(payload);
    }
    let Some((&pad, rest)) = payload.split_first() else {
        return Err(H2Error::frame_size("padded frame too short for a pad length"));
    };
    let pad = usize::from(pad);
    if pad >= rest.len() {
        return Err(H2Error::protocol(
            "pad length must be smaller than the remaining payload",
        ));
    }
    let (data, padding) = rest.split_at(rest.len() - pad);
    if padding.iter().any(|&b| b != 0) {
        return Err(H2Error::protocol("padding bytes must be zero"));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FRAME_HEADER_LEN;

    fn client() -> Endpoint {
        let mut endpoint = Endpoint::new(Role::Client, Settings::client_default());
        endpoint.take_pending_send(); // drop the SETTINGS announcement
        endpoint
    }

    fn deliver(
        endpoint: &mut Endpoint,
        frame_type: u8,
        flags: u8,
        stream_id: u32,
        payload: &[u8],
    ) -> Result<(), H2Error> {
        let head = FrameHeader::new(payload.len() as u32, frame_type, flags, stream_id);
        endpoint.handle_frame(head, payload)
    }

    /// Split the queued output into (header, payload) frames.
    fn sent_frames(endpoint: &mut Endpoint) -> Vec<(FrameHeader, Vec<u8>)> {
        let buf = endpoint.take_pending_send();
        let mut frames = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let head = FrameHeader::parse(&buf[pos..]).expect("truncated frame header");
            let start = pos + FRAME_HEADER_LEN;
            let end = start + head.length as usize;
            frames.push((head, buf[start..end].to_vec()));
            pos = end;
        }
        frames
    }

    /// Client stream in the open state, with queued output drained.
    fn open_client_stream(endpoint: &mut Endpoint) -> u32 {
        let id = endpoint.open_stream();
        endpoint
            .send_headers(id, &[HeaderField::new(b":method", b"POST")], false)
            .unwrap();
        endpoint.take_pending_send();
        id
    }

    fn peer_block(headers: &[HeaderField]) -> Vec<u8> {
        let mut encoder = Encoder::new(4096);
        let mut block = Vec::new();
        encoder.encode(headers, &mut block);
        block
    }

    #[test]
    fn initial_settings_are_announced() {
        let mut endpoint = Endpoint::new(Role::Client, Settings::client_default());
        let frames = sent_frames(&mut endpoint);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.frame_type, FRAME_SETTINGS);
        assert_eq!(frames[0].0.stream_id, 0);
        let entries = settings::decode_settings(&frames[0].1).unwrap();
        assert!(entries.contains(&(SETTINGS_ENABLE_PUSH, 0)));
    }

    #[test]
    fn data_round_trip_with_padding() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        deliver(&mut endpoint, FRAME_HEADERS, FLAG_END_HEADERS, id, &peer_block(&[
            HeaderField::new(b":status", b"200"),
        ]))
        .unwrap();

        let payload = [2, b'h', b'i', 0, 0];
        deliver(&mut endpoint, FRAME_DATA, FLAG_PADDED, id, &payload).unwrap();
        let chunk = endpoint.pop_chunk(id).unwrap().unwrap();
        assert_eq!(&chunk.data[..], b"hi");
        assert_eq!(chunk.original_length, 5);
        assert!(!chunk.is_acked());
    }

    #[test]
    fn data_pad_length_equal_to_remaining_rejected() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let err = deliver(&mut endpoint, FRAME_DATA, FLAG_PADDED, id, &[4, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn data_nonzero_padding_rejected() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let err =
            deliver(&mut endpoint, FRAME_DATA, FLAG_PADDED, id, &[2, b'h', b'i', 0, 7]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn data_on_stream_zero_rejected() {
        let mut endpoint = client();
        let err = deliver(&mut endpoint, FRAME_DATA, 0, 0, b"x").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn data_on_idle_stream_is_stream_closed() {
        let mut endpoint = client();
        let err = deliver(&mut endpoint, FRAME_DATA, 0, 2, b"x").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::StreamClosed));
    }

    #[test]
    fn data_end_stream_pushes_chunk_and_sentinel() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        deliver(&mut endpoint, FRAME_DATA, FLAG_END_STREAM, id, b"hello").unwrap();
        assert_eq!(endpoint.stream_state(id), Some(StreamState::HalfClosedRemote));
        let chunk = endpoint.pop_chunk(id).unwrap().unwrap();
        assert_eq!(&chunk.data[..], b"hello");
        assert!(endpoint.pop_chunk(id).unwrap().is_none()); // sentinel
        assert!(endpoint.pop_chunk(id).is_none()); // queue empty
    }

    #[test]
    fn headers_decoded_and_queued() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        deliver(
            &mut endpoint,
            FRAME_HEADERS,
            FLAG_END_HEADERS | FLAG_END_STREAM,
            id,
            &peer_block(&[HeaderField::new(b":status", b"200")]),
        )
        .unwrap();
        let headers = endpoint.pop_headers(id).unwrap();
        assert_eq!(headers, vec![HeaderField::new(b":status", b"200")]);
        // END_STREAM queued the end-of-stream sentinel too.
        assert!(endpoint.pop_chunk(id).unwrap().is_none());
        assert_eq!(endpoint.stream_state(id), Some(StreamState::HalfClosedRemote));
    }

    #[test]
    fn continuation_concatenates_fragments() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let block = peer_block(&[
            HeaderField::new(b":status", b"200"),
            HeaderField::new(b"x-first", b"one"),
            HeaderField::new(b"x-second", b"two"),
        ]);
        let third = block.len() / 3;
        deliver(&mut endpoint, FRAME_HEADERS, 0, id, &block[..third]).unwrap();
        deliver(&mut endpoint, FRAME_CONTINUATION, 0, id, &block[third..2 * third]).unwrap();
        deliver(
            &mut endpoint,
            FRAME_CONTINUATION,
            FLAG_END_HEADERS,
            id,
            &block[2 * third..],
        )
        .unwrap();

        let headers = endpoint.pop_headers(id).unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[2], HeaderField::new(b"x-second", b"two"));
    }

    #[test]
    fn frames_may_not_interleave_a_header_block() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        deliver(&mut endpoint, FRAME_HEADERS, 0, id, &peer_block(&[
            HeaderField::new(b":status", b"200"),
        ]))
        .unwrap();
        let err = deliver(&mut endpoint, FRAME_PING, 0, 0, &[0; 8]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn continuation_without_headers_rejected() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let err = deliver(&mut endpoint, FRAME_CONTINUATION, FLAG_END_HEADERS, id, b"x").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn oversized_header_fragment_rejected() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let big = vec![0u8; MAX_HEADER_BUFFER_SIZE + 1];
        let err = deliver(&mut endpoint, FRAME_HEADERS, FLAG_END_HEADERS, id, &big).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn cumulative_header_buffer_capped() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let half = vec![0u8; MAX_HEADER_BUFFER_SIZE / 2 + 1];
        deliver(&mut endpoint, FRAME_HEADERS, 0, id, &half).unwrap();
        let err = deliver(&mut endpoint, FRAME_CONTINUATION, 0, id, &half).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn pseudo_header_after_regular_rejected() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let block = peer_block(&[
            HeaderField::new(b"server", b"x"),
            HeaderField::new(b":status", b"200"),
        ]);
        let err = deliver(&mut endpoint, FRAME_HEADERS, FLAG_END_HEADERS, id, &block).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn headers_padding_validated_at_reassembly() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let block = peer_block(&[HeaderField::new(b":status", b"200")]);
        let mut payload = vec![2u8]; // pad length
        payload.extend_from_slice(&block);
        payload.extend_from_slice(&[0, 0]);
        deliver(
            &mut endpoint,
            FRAME_HEADERS,
            FLAG_END_HEADERS | FLAG_PADDED,
            id,
            &payload,
        )
        .unwrap();
        assert_eq!(
            endpoint.pop_headers(id).unwrap(),
            vec![HeaderField::new(b":status", b"200")]
        );
    }

    #[test]
    fn headers_nonzero_padding_rejected_at_reassembly() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let block = peer_block(&[HeaderField::new(b":status", b"200")]);
        let mut payload = vec![1u8];
        payload.extend_from_slice(&block);
        payload.push(9);
        let err = deliver(
            &mut endpoint,
            FRAME_HEADERS,
            FLAG_END_HEADERS | FLAG_PADDED,
            id,
            &payload,
        )
        .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn priority_frame_reshapes_the_tree() {
        let mut endpoint = client();
        // weight 199 on the wire is an effective weight of 200
        let mut payload = Vec::new();
        Priority {
            exclusive: false,
            dependency: 3,
            weight: 199,
        }
        .encode(&mut payload);
        deliver(&mut endpoint, FRAME_PRIORITY, 0, 5, &payload).unwrap();

        // the named dependency was created on first reference
        assert!(endpoint.stream(3).is_some());
        assert_eq!(endpoint.stream(5).unwrap().parent, 3);
        assert_eq!(endpoint.stream(5).unwrap().weight, 200);
    }

    #[test]
    fn priority_wrong_size_rejected() {
        let mut endpoint = client();
        let err = deliver(&mut endpoint, FRAME_PRIORITY, 0, 5, &[0; 4]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FrameSizeError));
    }

    #[test]
    fn priority_self_dependency_rejected() {
        let mut endpoint = client();
        let mut payload = Vec::new();
        Priority {
            exclusive: false,
            dependency: 5,
            weight: 0,
        }
        .encode(&mut payload);
        let err = deliver(&mut endpoint, FRAME_PRIORITY, 0, 5, &payload).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn rst_stream_records_code_and_closes() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        deliver(&mut endpoint, FRAME_RST_STREAM, 0, id, &[0, 0, 0, 8]).unwrap();
        assert_eq!(endpoint.stream_state(id), Some(StreamState::Closed));
        assert_eq!(endpoint.reset_error(id), Some(ErrorCode::Cancel));
    }

    #[test]
    fn rst_stream_unknown_code_becomes_internal_error() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        deliver(&mut endpoint, FRAME_RST_STREAM, 0, id, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(endpoint.reset_error(id), Some(ErrorCode::InternalError));
    }

    #[test]
    fn rst_stream_wrong_size_rejected() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let err = deliver(&mut endpoint, FRAME_RST_STREAM, 0, id, &[0, 0, 8]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FrameSizeError));
    }

    #[test]
    fn settings_ack_with_payload_rejected() {
        let mut endpoint = client();
        let err = deliver(&mut endpoint, FRAME_SETTINGS, FLAG_ACK, 0, &[0; 6]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FrameSizeError));
    }

    #[test]
    fn settings_ack_promotes_local_settings() {
        let mut endpoint = client();
        assert!(endpoint.acked_settings().is_none());
        deliver(&mut endpoint, FRAME_SETTINGS, FLAG_ACK, 0, &[]).unwrap();
        assert!(!endpoint.acked_settings().unwrap().enable_push);
    }

    #[test]
    fn settings_are_acked_and_window_delta_applied() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        assert_eq!(endpoint.stream(id).unwrap().send_credits.credits(), 65_535);

        let mut payload = Vec::new();
        settings::encode_settings(&[(SETTINGS_INITIAL_WINDOW_SIZE, 100)], &mut payload);
        deliver(&mut endpoint, FRAME_SETTINGS, 0, 0, &payload).unwrap();

        assert_eq!(endpoint.peer_settings().initial_window_size, 100);
        assert_eq!(endpoint.stream(id).unwrap().send_credits.credits(), 100);
        let frames = sent_frames(&mut endpoint);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.frame_type, FRAME_SETTINGS);
        assert_eq!(frames[0].0.flags, FLAG_ACK);
    }

    #[test]
    fn settings_on_nonzero_stream_rejected() {
        let mut endpoint = client();
        let err = deliver(&mut endpoint, FRAME_SETTINGS, 0, 1, &[]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn client_rejects_enable_push() {
        let mut endpoint = client();
        let mut payload = Vec::new();
        settings::encode_settings(&[(SETTINGS_ENABLE_PUSH, 1)], &mut payload);
        let err = deliver(&mut endpoint, FRAME_SETTINGS, 0, 0, &payload).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn header_table_size_change_rides_the_next_block() {
        let mut endpoint = client();
        let mut payload = Vec::new();
        settings::encode_settings(&[(SETTINGS_HEADER_TABLE_SIZE, 256)], &mut payload);
        deliver(&mut endpoint, FRAME_SETTINGS, 0, 0, &payload).unwrap();
        endpoint.take_pending_send(); // SETTINGS ACK

        let id = endpoint.open_stream();
        endpoint
            .send_headers(id, &[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        let frames = sent_frames(&mut endpoint);
        assert_eq!(frames[0].0.frame_type, FRAME_HEADERS);
        // Block opens with a dynamic-table size update: 001xxxxx.
        assert_eq!(frames[0].1[0] & 0xe0, 0x20);
    }

    #[test]
    fn push_promise_not_implemented_when_push_enabled() {
        let mut settings = Settings::client_default();
        settings.enable_push = true;
        let mut endpoint = Endpoint::new(Role::Client, settings);
        endpoint.take_pending_send();
        let id = open_client_stream(&mut endpoint);

        let mut payload = Vec::new();
        put_u32(&mut payload, 2);
        payload.extend_from_slice(&peer_block(&[HeaderField::new(b":method", b"GET")]));
        let err =
            deliver(&mut endpoint, FRAME_PUSH_PROMISE, FLAG_END_HEADERS, id, &payload).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InternalError));
        // stream state was not corrupted
        assert_eq!(endpoint.stream_state(id), Some(StreamState::Open));
    }

    #[test]
    fn push_promise_while_disabled_rejected() {
        let mut endpoint = client(); // client_default has push off
        let id = open_client_stream(&mut endpoint);
        let mut payload = Vec::new();
        put_u32(&mut payload, 2);
        let err = deliver(&mut endpoint, FRAME_PUSH_PROMISE, FLAG_END_HEADERS, id, &payload)
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn ping_is_answered_with_the_same_payload() {
        let mut endpoint = client();
        deliver(&mut endpoint, FRAME_PING, 0, 0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let frames = sent_frames(&mut endpoint);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.frame_type, FRAME_PING);
        assert_eq!(frames[0].0.flags, FLAG_ACK);
        assert_eq!(frames[0].1, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn pong_resolves_the_matching_waiter() {
        let mut endpoint = client();
        let opaque = endpoint.send_ping();
        endpoint.take_pending_send();
        assert!(!endpoint.take_pong(&opaque));

        // a pong nobody asked for is ignored
        deliver(&mut endpoint, FRAME_PING, FLAG_ACK, 0, &[9; 8]).unwrap();
        assert!(!endpoint.take_pong(&opaque));

        deliver(&mut endpoint, FRAME_PING, FLAG_ACK, 0, &opaque).unwrap();
        assert!(endpoint.take_pong(&opaque));
        assert!(!endpoint.take_pong(&opaque));
    }

    #[test]
    fn ping_wrong_size_rejected() {
        let mut endpoint = client();
        let err = deliver(&mut endpoint, FRAME_PING, 0, 0, &[0; 7]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FrameSizeError));
    }

    #[test]
    fn goaway_keeps_the_lowest_last_stream_id() {
        let mut endpoint = client();
        let mut payload = Vec::new();
        put_u32(&mut payload, 7);
        put_u32(&mut payload, 0);
        payload.extend_from_slice(b"debug junk");
        deliver(&mut endpoint, FRAME_GOAWAY, 0, 0, &payload).unwrap();
        assert_eq!(endpoint.goaway_received(), Some((7, ErrorCode::NoError)));

        let mut payload = Vec::new();
        put_u32(&mut payload, 5);
        put_u32(&mut payload, 8);
        deliver(&mut endpoint, FRAME_GOAWAY, 0, 0, &payload).unwrap();
        assert_eq!(endpoint.goaway_received(), Some((5, ErrorCode::Cancel)));

        let mut payload = Vec::new();
        put_u32(&mut payload, 9);
        put_u32(&mut payload, 0);
        deliver(&mut endpoint, FRAME_GOAWAY, 0, 0, &payload).unwrap();
        assert_eq!(endpoint.goaway_received(), Some((5, ErrorCode::Cancel)));
    }

    #[test]
    fn window_update_zero_increment_rejected() {
        let mut endpoint = client();
        let err = deliver(&mut endpoint, FRAME_WINDOW_UPDATE, 0, 0, &[0, 0, 0, 0]).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ProtocolError));
    }

    #[test]
    fn window_update_routes_to_stream_or_connection() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let before = endpoint.connection_send_credits();

        deliver(&mut endpoint, FRAME_WINDOW_UPDATE, 0, id, &[0, 0, 0, 10]).unwrap();
        assert_eq!(endpoint.stream(id).unwrap().send_credits.credits(), 65_545);
        assert_eq!(endpoint.connection_send_credits(), before);

        deliver(&mut endpoint, FRAME_WINDOW_UPDATE, 0, 0, &[0, 0, 0, 10]).unwrap();
        assert_eq!(endpoint.connection_send_credits(), before + 10);
    }

    #[test]
    fn window_update_overflow_is_flow_control_error() {
        let mut endpoint = client();
        let max = Vec::from(0x7fff_ffffu32.to_be_bytes());
        let err = deliver(&mut endpoint, FRAME_WINDOW_UPDATE, 0, 0, &max).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FlowControlError));
    }

    #[test]
    fn window_update_at_max_increment_accepted_on_fresh_stream() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        // drain the stream window first so the max increment fits
        let drain = vec![0u8; 16_384];
        for _ in 0..3 {
            endpoint.send_data(id, &drain, false, None).unwrap();
        }
        endpoint.send_data(id, &drain[..16_383], false, None).unwrap();
        assert_eq!(endpoint.stream(id).unwrap().send_credits.credits(), 0);
        let max = Vec::from(0x7fff_ffffu32.to_be_bytes());
        deliver(&mut endpoint, FRAME_WINDOW_UPDATE, 0, id, &max).unwrap();
        assert_eq!(
            endpoint.stream(id).unwrap().send_credits.credits(),
            0x7fff_ffff
        );
    }

    #[test]
    fn unknown_frame_types_are_ignored() {
        let mut endpoint = client();
        deliver(&mut endpoint, 0xfe, 0x42, 7, b"whatever").unwrap();
        assert!(!endpoint.has_pending_send());
    }

    #[test]
    fn send_data_debits_both_windows_by_the_framed_length() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        endpoint.send_data(id, b"hello", false, Some(3)).unwrap();

        // 5 data + 1 pad-length byte + 3 padding
        assert_eq!(endpoint.stream(id).unwrap().send_credits.credits(), 65_535 - 9);
        assert_eq!(endpoint.connection_send_credits(), 65_535 - 9);
        assert_eq!(endpoint.stream(id).unwrap().bytes_sent, 5);

        let frames = sent_frames(&mut endpoint);
        assert_eq!(frames[0].0.frame_type, FRAME_DATA);
        assert_eq!(frames[0].0.length, 9);
        assert_ne!(frames[0].0.flags & FLAG_PADDED, 0);
        assert_eq!(&frames[0].1[1..6], b"hello");
        assert_eq!(&frames[0].1[6..], &[0, 0, 0]);
    }

    #[test]
    fn send_data_without_credit_refused() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        let mut payload = Vec::new();
        settings::encode_settings(&[(SETTINGS_INITIAL_WINDOW_SIZE, 4)], &mut payload);
        deliver(&mut endpoint, FRAME_SETTINGS, 0, 0, &payload).unwrap();
        endpoint.take_pending_send();

        let err = endpoint.send_data(id, b"hello", false, None).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FlowControlError));
        // nothing was queued and nothing debited
        assert!(!endpoint.has_pending_send());
        assert_eq!(endpoint.stream(id).unwrap().send_credits.credits(), 4);
        assert_eq!(endpoint.connection_send_credits(), 65_535);
    }

    #[test]
    fn send_headers_after_local_end_stream_refused() {
        let mut endpoint = client();
        let id = endpoint.open_stream();
        endpoint
            .send_headers(id, &[HeaderField::new(b":method", b"GET")], true)
            .unwrap();
        assert_eq!(endpoint.stream_state(id), Some(StreamState::HalfClosedLocal));
        let err = endpoint
            .send_headers(id, &[HeaderField::new(b"x-late", b"1")], false)
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::StreamClosed));
    }

    #[test]
    fn send_headers_fragments_across_continuation() {
        let mut endpoint = client();
        let id = endpoint.open_stream();
        endpoint.take_pending_send();
        let big = vec![b'x'; 40_000];
        endpoint
            .send_headers(
                id,
                &[
                    HeaderField::new(b":method", b"GET"),
                    HeaderField::new(b"x-blob", big),
                ],
                true,
            )
            .unwrap();
        let frames = sent_frames(&mut endpoint);
        assert!(frames.len() >= 2, "expected fragmentation, got {}", frames.len());
        assert_eq!(frames[0].0.frame_type, FRAME_HEADERS);
        assert_ne!(frames[0].0.flags & FLAG_END_STREAM, 0);
        assert_eq!(frames[0].0.flags & FLAG_END_HEADERS, 0);
        for middle in &frames[1..frames.len() - 1] {
            assert_eq!(middle.0.frame_type, FRAME_CONTINUATION);
            assert_eq!(middle.0.flags, 0);
        }
        let last = frames.last().unwrap();
        assert_eq!(last.0.frame_type, FRAME_CONTINUATION);
        assert_eq!(last.0.flags, FLAG_END_HEADERS);
        let max = endpoint.peer_settings().max_frame_size;
        assert!(frames.iter().all(|(h, _)| h.length <= max));
    }

    #[test]
    fn send_rst_on_idle_stream_is_a_caller_bug() {
        let mut endpoint = client();
        let id = endpoint.open_stream();
        let err = endpoint.send_rst_stream(id, ErrorCode::Cancel).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InternalError));
    }

    #[test]
    fn ack_chunk_emits_stream_then_connection_updates() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        deliver(&mut endpoint, FRAME_DATA, FLAG_PADDED, id, &[2, b'h', b'i', 0, 0]).unwrap();
        let mut chunk = endpoint.pop_chunk(id).unwrap().unwrap();
        endpoint.ack_chunk(&mut chunk, false).unwrap();
        assert!(chunk.is_acked());

        let frames = sent_frames(&mut endpoint);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0.frame_type, FRAME_WINDOW_UPDATE);
        assert_eq!(frames[0].0.stream_id, id);
        assert_eq!(read_u32(&frames[0].1), 5); // pre-strip length
        assert_eq!(frames[1].0.stream_id, 0);
        assert_eq!(read_u32(&frames[1].1), 5);

        let err = endpoint.ack_chunk(&mut chunk, false).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InternalError));
    }

    #[test]
    fn shutdown_resets_and_recovers_unread_credit() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        deliver(&mut endpoint, FRAME_DATA, 0, id, &[b'a'; 10]).unwrap();
        deliver(&mut endpoint, FRAME_DATA, FLAG_PADDED, id, &[4, b'b', 0, 0, 0, 0]).unwrap();

        endpoint.shutdown_stream(id).unwrap();
        assert_eq!(endpoint.stream_state(id), Some(StreamState::Closed));
        assert!(endpoint.pop_chunk(id).is_none());

        let frames = sent_frames(&mut endpoint);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0.frame_type, FRAME_RST_STREAM);
        assert_eq!(read_u32(&frames[0].1), ErrorCode::NoError.as_u32());
        // one connection-level update for 10 + 6 wire bytes
        assert_eq!(frames[1].0.frame_type, FRAME_WINDOW_UPDATE);
        assert_eq!(frames[1].0.stream_id, 0);
        assert_eq!(read_u32(&frames[1].1), 16);
    }

    #[test]
    fn shutdown_of_an_idle_stream_sends_nothing() {
        let mut endpoint = client();
        let id = endpoint.open_stream();
        endpoint.take_pending_send();
        endpoint.shutdown_stream(id).unwrap();
        assert!(!endpoint.has_pending_send());
        assert_eq!(endpoint.stream_state(id), Some(StreamState::Idle));
    }

    #[test]
    fn stream_ids_are_role_parity() {
        let mut client_endpoint = client();
        assert_eq!(client_endpoint.open_stream(), 1);
        assert_eq!(client_endpoint.open_stream(), 3);

        let mut server_endpoint = Endpoint::new(Role::Server, Settings::default());
        server_endpoint.take_pending_send();
        assert_eq!(server_endpoint.open_stream(), 2);
        assert_eq!(server_endpoint.open_stream(), 4);
    }

    #[test]
    fn server_push_promise_reserves_the_promised_stream() {
        let mut endpoint = Endpoint::new(Role::Server, Settings::default());
        endpoint.take_pending_send();
        // a client-initiated stream arrives
        deliver(&mut endpoint, FRAME_HEADERS, FLAG_END_HEADERS, 1, &peer_block(&[
            HeaderField::new(b":method", b"GET"),
        ]))
        .unwrap();

        let promised = endpoint.open_stream();
        endpoint
            .send_push_promise(1, promised, &[HeaderField::new(b":method", b"GET")])
            .unwrap();
        assert_eq!(
            endpoint.stream_state(promised),
            Some(StreamState::ReservedLocal)
        );
        let frames = sent_frames(&mut endpoint);
        assert_eq!(frames[0].0.frame_type, FRAME_PUSH_PROMISE);
        assert_eq!(read_u32(&frames[0].1[..4]), promised);

        // HEADERS on the reserved stream half-closes it remotely
        endpoint
            .send_headers(promised, &[HeaderField::new(b":status", b"200")], false)
            .unwrap();
        assert_eq!(
            endpoint.stream_state(promised),
            Some(StreamState::HalfClosedRemote)
        );
    }

    #[test]
    fn data_budget_is_the_smallest_constraint() {
        let mut endpoint = client();
        let id = open_client_stream(&mut endpoint);
        assert_eq!(endpoint.data_budget(id, 10), 10);
        assert_eq!(endpoint.data_budget(id, 1 << 20), 16_384);

        let mut payload = Vec::new();
        settings::encode_settings(&[(SETTINGS_INITIAL_WINDOW_SIZE, 100)], &mut payload);
        deliver(&mut endpoint, FRAME_SETTINGS, 0, 0, &payload).unwrap();
        assert_eq!(endpoint.data_budget(id, 1 << 20), 100);
    }
}
