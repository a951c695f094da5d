//! Per-stream HTTP/2 endpoint layer (RFC 7540).
//!
//! This crate is the hard middle of an HTTP/2 endpoint: frame dispatch for
//! the nine frame types, the seven-state stream machine, the priority
//! dependency tree, stream- and connection-level flow control, and header
//! block reassembly across CONTINUATION boundaries. TLS, the connection
//! preface, and HTTP semantics above the frame layer live elsewhere.
//!
//! # Architecture
//!
//! ```text
//!   transport bytes (TCP, TLS, in-memory, ...)
//!        |
//!   +----v----------+
//!   | Session<T>    |  deadline-aware pump: flush, read, de-frame, dispatch
//!   +----v----------+
//!   | Endpoint      |  sans-IO core: streams, settings, priority, credit,
//!   |               |  HPACK contexts, pongs, GOAWAY
//!   +---------------+
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use h2peer::{HeaderField, Role, Session, Settings};
//!
//! let mut session = Session::new(tcp, Role::Client, Settings::client_default());
//! let stream = session.open_stream();
//! session.write_headers(stream, &[
//!     HeaderField::new(b":method", b"GET"),
//!     HeaderField::new(b":path", b"/"),
//!     HeaderField::new(b":scheme", b"https"),
//!     HeaderField::new(b":authority", b"example.com"),
//! ], true, None)?;
//!
//! let headers = session.get_headers(stream, Some(timeout))?;
//! while let Some(chunk) = session.get_next_chunk(stream, Some(timeout))? {
//!     body.extend_from_slice(&chunk.data);
//! }
//! ```

pub mod connection;
pub mod error;
pub mod flowcontrol;
pub mod frame;
pub mod hpack;
mod huffman;
pub mod metrics;
mod priority;
pub mod session;
pub mod settings;
pub mod stream;

pub use connection::{Endpoint, MAX_HEADER_BUFFER_SIZE, Role};
pub use error::{ErrorCode, H2Error};
pub use hpack::HeaderField;
pub use session::{Session, Transport};
pub use settings::Settings;
pub use stream::{Chunk, Stream, StreamState};
