//! SETTINGS parameter codec (RFC 7540 Section 6.5).
//!
//! The wire form of a SETTINGS payload is a sequence of 6-byte
//! `(id: u16, value: u32)` records. A decoded payload is kept as an ordered
//! record list, since a SETTINGS frame is a delta against the current
//! effective values, not a full snapshot.

use crate::error::H2Error;
use crate::frame::{put_u16, put_u32, read_u16, read_u32};

// Settings identifiers (RFC 7540 Section 6.5.2).
pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// Decode a SETTINGS payload into its ordered records, validating each
/// recognized parameter. Unknown identifiers pass through untouched.
pub fn decode_settings(buf: &[u8]) -> Result<Vec<(u16, u32)>, H2Error> {
    if !buf.len().is_multiple_of(6) {
        return Err(H2Error::frame_size(
            "SETTINGS payload is not a multiple of 6 bytes",
        ));
    }
    let mut entries = Vec::with_capacity(buf.len() / 6);
    for record in buf.chunks_exact(6) {
        let id = read_u16(&record[..2]);
        let value = read_u32(&record[2..]);
        match id {
            SETTINGS_ENABLE_PUSH => {
                if value > 1 {
                    return Err(H2Error::protocol("ENABLE_PUSH must be 0 or 1"));
                }
            }
            SETTINGS_INITIAL_WINDOW_SIZE => {
                if value > 0x7fff_ffff {
                    return Err(H2Error::flow_control("INITIAL_WINDOW_SIZE above 2^31-1"));
                }
            }
            SETTINGS_MAX_FRAME_SIZE => {
                if !(16_384..=16_777_215).contains(&value) {
                    return Err(H2Error::protocol("MAX_FRAME_SIZE outside [2^14, 2^24)"));
                }
            }
            _ => {}
        }
        entries.push((id, value));
    }
    Ok(entries)
}

/// Encode records in the given order.
pub fn encode_settings(entries: &[(u16, u32)], buf: &mut Vec<u8>) {
    for &(id, value) in entries {
        put_u16(buf, id);
        put_u32(buf, value);
    }
}

/// Effective settings of one side of a connection.
///
/// Starts from the RFC 7540 defaults; `apply` folds in a decoded record list.
#[derive(Debug, Clone)]
pub struct Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1). Default 4096.
    pub header_table_size: u32,
    /// SETTINGS_ENABLE_PUSH (0x2). Default on.
    pub enable_push: bool,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3). Default unlimited.
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4). Default 65535.
    pub initial_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5). Default 16384.
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6). Default unlimited.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Client defaults: push disabled.
    pub fn client_default() -> Self {
        Self {
            enable_push: false,
            ..Default::default()
        }
    }

    /// Fold a decoded record list into the effective values.
    pub fn apply(&mut self, entries: &[(u16, u32)]) {
        for &(id, value) in entries {
            match id {
                SETTINGS_HEADER_TABLE_SIZE => self.header_table_size = value,
                SETTINGS_ENABLE_PUSH => self.enable_push = value == 1,
                SETTINGS_MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = Some(value),
                SETTINGS_INITIAL_WINDOW_SIZE => self.initial_window_size = value,
                SETTINGS_MAX_FRAME_SIZE => self.max_frame_size = value,
                SETTINGS_MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(value),
                _ => {}
            }
        }
    }

    /// Records for announcing these settings, in canonical id order.
    pub fn to_entries(&self) -> Vec<(u16, u32)> {
        let mut entries = vec![
            (SETTINGS_HEADER_TABLE_SIZE, self.header_table_size),
            (SETTINGS_ENABLE_PUSH, u32::from(self.enable_push)),
        ];
        if let Some(v) = self.max_concurrent_streams {
            entries.push((SETTINGS_MAX_CONCURRENT_STREAMS, v));
        }
        entries.push((SETTINGS_INITIAL_WINDOW_SIZE, self.initial_window_size));
        entries.push((SETTINGS_MAX_FRAME_SIZE, self.max_frame_size));
        if let Some(v) = self.max_header_list_size {
            entries.push((SETTINGS_MAX_HEADER_LIST_SIZE, v));
        }
        entries
    }
}
