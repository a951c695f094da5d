//! Deadline-aware pump over a byte transport.
//!
//! [`Session`] couples an [`Endpoint`] to a [`Transport`], following the
//! fire-then-pump shape: writers queue frames synchronously, and every
//! blocking read-side operation loops `check predicate → step(deadline)`.
//! One `step` flushes pending output, pulls bytes from the transport,
//! de-frames them, and dispatches each complete frame. Because the
//! predicate is re-checked against endpoint state after every pump, wakeups
//! are level-triggered by construction.
//!
//! Deadlines are absolute: computed once when the blocking call is entered,
//! and handed down to every wait inside it. Expiry surfaces as
//! [`H2Error::TimedOut`] without touching stream state.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use bytes::BytesMut;

use crate::connection::{Endpoint, Role};
use crate::error::{ErrorCode, H2Error};
use crate::frame::{FRAME_HEADER_LEN, FrameHeader};
use crate::hpack::HeaderField;
use crate::settings::Settings;
use crate::stream::{Chunk, StreamState};

/// A byte transport with deadline-bounded reads.
pub trait Transport {
    /// Write the whole buffer.
    fn send(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Read some bytes, blocking no later than `deadline`.
    ///
    /// An empty return means the peer closed the transport. A reached
    /// deadline surfaces as `TimedOut` or `WouldBlock`.
    fn recv(&mut self, deadline: Option<Instant>) -> io::Result<Vec<u8>>;
}

impl Transport for TcpStream {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all(buf)
    }

    fn recv(&mut self, deadline: Option<Instant>) -> io::Result<Vec<u8>> {
        match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    return Err(io::Error::from(io::ErrorKind::TimedOut));
                }
                self.set_read_timeout(Some(deadline - now))?;
            }
            None => self.set_read_timeout(None)?,
        }
        let mut buf = vec![0u8; 16 * 1024];
        let n = self.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// An endpoint bound to a transport, exposing the blocking per-stream API.
pub struct Session<T: Transport> {
    endpoint: Endpoint,
    transport: T,
    recv_buf: BytesMut,
}

impl<T: Transport> Session<T> {
    /// Bind an endpoint to `transport`. The SETTINGS announcement queued by
    /// the endpoint goes out on the first flush; any connection-preface
    /// magic is the caller's business and must already be on the wire.
    pub fn new(transport: T, role: Role, settings: Settings) -> Self {
        Self {
            endpoint: Endpoint::new(role, settings),
            transport,
            recv_buf: BytesMut::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn open_stream(&mut self) -> u32 {
        self.endpoint.open_stream()
    }

    pub fn goaway_received(&self) -> Option<(u32, ErrorCode)> {
        self.endpoint.goaway_received()
    }

    fn flush(&mut self) -> Result<(), H2Error> {
        if self.endpoint.has_pending_send() {
            let out = self.endpoint.take_pending_send();
            self.transport.send(&out)?;
        }
        Ok(())
    }

    /// Dispatch every complete frame already buffered. Returns whether any
    /// frame was dispatched.
    fn dispatch_buffered(&mut self) -> Result<bool, H2Error> {
        let mut progressed = false;
        loop {
            let Some(head) = FrameHeader::parse(&self.recv_buf) else {
                break;
            };
            if head.length > self.endpoint.local_settings().max_frame_size {
                return Err(H2Error::frame_size("frame exceeds our MAX_FRAME_SIZE"));
            }
            let total = FRAME_HEADER_LEN + head.length as usize;
            if self.recv_buf.len() < total {
                break;
            }
            let frame = self.recv_buf.split_to(total);
            let payload = &frame[FRAME_HEADER_LEN..];
            if let Err(err) = self.endpoint.handle_frame(head, payload) {
                self.dispose_error(head.stream_id, err)?;
            }
            progressed = true;
        }
        Ok(progressed)
    }

    /// Handler errors are values; this is where the connection decides.
    /// STREAM_CLOSED on a real stream resets that stream and pumping
    /// continues; any other coded error tears the connection down with a
    /// GOAWAY carrying the code.
    fn dispose_error(&mut self, stream_id: u32, err: H2Error) -> Result<(), H2Error> {
        match err.code() {
            Some(ErrorCode::StreamClosed) if stream_id != 0 => {
                // the offending stream may be idle, in which case there is
                // nothing to reset
                let _ = self.endpoint.send_rst_stream(stream_id, ErrorCode::StreamClosed);
                Ok(())
            }
            Some(code) => {
                self.endpoint.send_goaway(code);
                let _ = self.flush();
                Err(err)
            }
            None => Err(err),
        }
    }

    /// Pump once: flush queued output, then dispatch buffered frames, or
    /// read from the transport (until `deadline`) when none are complete.
    pub fn step(&mut self, deadline: Option<Instant>) -> Result<(), H2Error> {
        self.flush()?;
        if !self.dispatch_buffered()? {
            let data = self.transport.recv(deadline).map_err(|e| match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => H2Error::TimedOut,
                _ => H2Error::Io(e),
            })?;
            if data.is_empty() {
                return Err(H2Error::BrokenPipe);
            }
            self.recv_buf.extend_from_slice(&data);
            self.dispatch_buffered()?;
        }
        self.flush()
    }

    fn deadline_for(timeout: Option<Duration>) -> Option<Instant> {
        timeout.map(|t| Instant::now() + t)
    }

    /// Block until a decoded header list is available on `id`.
    ///
    /// On a closed stream with nothing queued this returns the recorded
    /// reset error, or [`H2Error::BrokenPipe`] after a clean close.
    pub fn get_headers(
        &mut self,
        id: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<HeaderField>, H2Error> {
        let deadline = Self::deadline_for(timeout);
        loop {
            if let Some(headers) = self.endpoint.pop_headers(id) {
                return Ok(headers);
            }
            match self.endpoint.stream_state(id) {
                None => return Err(H2Error::internal("unknown stream")),
                Some(StreamState::Closed) => {
                    return Err(match self.endpoint.reset_error(id) {
                        Some(code) => H2Error::peer_reset(code),
                        None => H2Error::BrokenPipe,
                    });
                }
                _ => {}
            }
            self.step(deadline)?;
        }
    }

    /// Block until the next DATA chunk arrives on `id`.
    ///
    /// `Ok(None)` is clean end-of-stream. Each delivered chunk has already
    /// been acked, returning its wire footprint to the peer via a stream
    /// and a connection WINDOW_UPDATE.
    pub fn get_next_chunk(
        &mut self,
        id: u32,
        timeout: Option<Duration>,
    ) -> Result<Option<Chunk>, H2Error> {
        let deadline = Self::deadline_for(timeout);
        loop {
            if let Some(entry) = self.endpoint.pop_chunk(id) {
                return match entry {
                    Some(mut chunk) => {
                        self.endpoint.ack_chunk(&mut chunk, false)?;
                        self.flush()?;
                        Ok(Some(chunk))
                    }
                    None => Ok(None),
                };
            }
            match self.endpoint.stream_state(id) {
                None => return Err(H2Error::internal("unknown stream")),
                Some(StreamState::Closed | StreamState::HalfClosedRemote) => {
                    return match self.endpoint.reset_error(id) {
                        Some(code) => Err(H2Error::peer_reset(code)),
                        None => Ok(None),
                    };
                }
                _ => {}
            }
            self.step(deadline)?;
        }
    }

    /// Encode and send a header list on `id`, fragmenting at the peer's
    /// MAX_FRAME_SIZE. Header frames are not flow controlled, so this only
    /// blocks inside the transport write.
    pub fn write_headers(
        &mut self,
        id: u32,
        headers: &[HeaderField],
        end_stream: bool,
        _timeout: Option<Duration>,
    ) -> Result<(), H2Error> {
        self.endpoint.send_headers(id, headers, end_stream)?;
        self.flush()
    }

    /// Send a body, suspending whenever stream or connection credit runs
    /// dry. Each DATA frame carries the largest currently sendable slice;
    /// END_STREAM rides only on the final frame.
    pub fn write_chunk(
        &mut self,
        id: u32,
        payload: &[u8],
        end_stream: bool,
        timeout: Option<Duration>,
    ) -> Result<(), H2Error> {
        let deadline = Self::deadline_for(timeout);
        if payload.is_empty() {
            if end_stream {
                self.endpoint.send_data(id, &[], true, None)?;
                self.flush()?;
            }
            return Ok(());
        }
        let mut offset = 0;
        while offset < payload.len() {
            if self.endpoint.stream_state(id) == Some(StreamState::Closed) {
                return Err(match self.endpoint.reset_error(id) {
                    Some(code) => H2Error::peer_reset(code),
                    None => H2Error::BrokenPipe,
                });
            }
            let budget = self.endpoint.data_budget(id, payload.len() - offset);
            if budget == 0 {
                // credit arrives via WINDOW_UPDATE; pump until it does
                self.step(deadline)?;
                continue;
            }
            let last = offset + budget == payload.len();
            self.endpoint
                .send_data(id, &payload[offset..offset + budget], end_stream && last, None)?;
            offset += budget;
            self.flush()?;
        }
        Ok(())
    }

    /// Abort `id`: RST_STREAM(NO_ERROR) unless idle or closed, drain unread
    /// chunks, and return their credit in one connection WINDOW_UPDATE.
    pub fn shutdown(&mut self, id: u32) -> Result<(), H2Error> {
        self.endpoint.shutdown_stream(id)?;
        self.flush()
    }

    /// Round-trip a PING through the peer.
    pub fn ping(&mut self, timeout: Option<Duration>) -> Result<(), H2Error> {
        let deadline = Self::deadline_for(timeout);
        let opaque = self.endpoint.send_ping();
        loop {
            if self.endpoint.take_pong(&opaque) {
                return Ok(());
            }
            self.step(deadline)?;
        }
    }
}
