//! Error codes and error values for the HTTP/2 stream layer (RFC 7540 Section 7).

use std::fmt;
use std::io;
use std::panic::Location;

use thiserror::Error;

/// HTTP/2 wire error codes (RFC 7540 Section 7).
///
/// These are the values carried by RST_STREAM and GOAWAY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Decode a wire value. Unknown codes map to `InternalError`.
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
        };
        f.write_str(name)
    }
}

/// Errors produced by the stream layer.
///
/// Protocol violations carry the wire code a GOAWAY or RST_STREAM should use,
/// a human-readable message, and the source location that raised them. Frame
/// handlers and writers return these as values; the pump decides whether a
/// given code closes the connection or resets a single stream.
#[derive(Debug, Error)]
pub enum H2Error {
    #[error("{code}: {message} (raised at {location})")]
    Protocol {
        code: ErrorCode,
        message: String,
        location: &'static Location<'static>,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A blocking operation reached its deadline. Stream state is unchanged.
    #[error("operation timed out")]
    TimedOut,
    /// The transport or stream finished underneath a blocking operation.
    #[error("broken pipe")]
    BrokenPipe,
}

impl H2Error {
    #[track_caller]
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::ProtocolError, message)
    }

    #[track_caller]
    pub fn frame_size(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::FrameSizeError, message)
    }

    #[track_caller]
    pub fn flow_control(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::FlowControlError, message)
    }

    #[track_caller]
    pub fn stream_closed(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::StreamClosed, message)
    }

    #[track_caller]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::InternalError, message)
    }

    #[track_caller]
    pub fn compression(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::CompressionError, message)
    }

    /// The reset error surfaced to readers of a stream the peer reset.
    #[track_caller]
    pub fn peer_reset(code: ErrorCode) -> Self {
        Self::with_code(code, "stream reset by peer")
    }

    /// The wire code for protocol-level errors, `None` for I/O and timing errors.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, Self::BrokenPipe)
    }
}
