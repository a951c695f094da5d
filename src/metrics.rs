//! Stream-layer metrics.
//!
//! Counters are process-wide and cheap to bump from the single-threaded
//! dispatch path. Registering them with a metriken exposition endpoint is
//! the embedding application's business.

use metriken::{Counter, metric};

#[metric(
    name = "h2peer/frames/received",
    description = "Frames dispatched from the peer"
)]
pub static FRAMES_RECEIVED: Counter = Counter::new();

#[metric(
    name = "h2peer/frames/sent",
    description = "Frames queued for the transport"
)]
pub static FRAMES_SENT: Counter = Counter::new();

#[metric(
    name = "h2peer/data/bytes_received",
    description = "DATA payload bytes received, padding excluded"
)]
pub static DATA_BYTES_RECEIVED: Counter = Counter::new();

#[metric(
    name = "h2peer/data/bytes_sent",
    description = "DATA payload bytes sent, padding excluded"
)]
pub static DATA_BYTES_SENT: Counter = Counter::new();

#[metric(
    name = "h2peer/streams/reset",
    description = "Streams reset locally or by the peer"
)]
pub static STREAMS_RESET: Counter = Counter::new();

#[metric(
    name = "h2peer/headers/blocks_decoded",
    description = "Complete header blocks fed through HPACK"
)]
pub static HEADER_BLOCKS_DECODED: Counter = Counter::new();
