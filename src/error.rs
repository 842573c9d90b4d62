// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error types

use std::io;

use thiserror::Error;

use crate::frame::ExceptionResponse;

/// A specialized [`Result`](std::result::Result) type for Modbus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Modbus errors.
///
/// Every failure mode carries its own variant so that callers can
/// discriminate by kind, and for [`Error::Exception`] additionally by the
/// reported exception code.
#[derive(Debug, Error)]
pub enum Error {
    /// The server answered with a Modbus exception response.
    ///
    /// Never retried: resending an identical request cannot change
    /// the outcome.
    #[error(transparent)]
    Exception(#[from] ExceptionResponse),

    /// A received frame failed its checksum or structural validation.
    ///
    /// On MBAP transports this also means the connection is considered
    /// desynchronized and has been closed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The response header does not correlate with the request header.
    ///
    /// Treated like a framing error: the connection is closed instead
    /// of trying to resynchronize.
    #[error("response header mismatch: request = {request}, response = {response}")]
    HeaderMismatch {
        /// Header fields sent with the request.
        request: String,
        /// Header fields received with the response.
        response: String,
    },

    /// The response is well-formed but its echoed fields are inconsistent
    /// with the request.
    #[error("inconsistent response: {0}")]
    ResponseMismatch(&'static str),

    /// The configured response deadline elapsed during a read or write.
    #[error("operation timed out")]
    Timeout,

    /// Transport-level I/O failure (connect, socket, serial port).
    #[error(transparent)]
    Transport(#[from] io::Error),

    /// The request violates a per-function-code constraint.
    ///
    /// Detected locally before any I/O takes place.
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// Impossible parameters detected when constructing a client or server.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// All attempts of a retried request have failed.
    ///
    /// Wraps the error of the last attempt.
    #[error("request failed after {attempts} attempt(s): {source}")]
    RequestFailed {
        /// Total number of attempts, i.e. `1 + retry_count`.
        attempts: usize,
        /// The error returned by the final attempt.
        #[source]
        source: Box<Error>,
    },

    /// The graceful-stop deadline elapsed with connection tasks still
    /// running. The remaining tasks have been aborted forcibly.
    #[error("graceful shutdown timed out")]
    ShutdownTimedOut,
}

impl Error {
    /// Whether another attempt could possibly succeed.
    ///
    /// Protocol exceptions and locally rejected requests are final, all
    /// transmission-level failures are worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Frame(_)
            | Self::HeaderMismatch { .. }
            | Self::ResponseMismatch(_)
            | Self::Timeout
            | Self::Transport(_)
            | Self::NotConnected => true,
            Self::Exception(_)
            | Self::InvalidRequest(_)
            | Self::Configuration(_)
            | Self::RequestFailed { .. }
            | Self::ShutdownTimedOut => false,
        }
    }

    /// The exception code if this is a Modbus exception response.
    #[must_use]
    pub const fn exception_code(&self) -> Option<crate::frame::ExceptionCode> {
        match self {
            Self::Exception(rsp) => Some(rsp.exception),
            _ => None,
        }
    }
}

/// Byte-level framing failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The received CRC-16 does not match the computed one.
    #[error("invalid CRC: expected = 0x{expected:0>4X}, actual = 0x{actual:0>4X}")]
    Crc {
        /// CRC carried by the frame.
        expected: u16,
        /// CRC computed over the received bytes.
        actual: u16,
    },

    /// The received LRC does not match the computed one.
    #[error("invalid LRC: expected = 0x{expected:0>2X}, actual = 0x{actual:0>2X}")]
    Lrc {
        /// LRC carried by the frame.
        expected: u8,
        /// LRC computed over the received bytes.
        actual: u8,
    },

    /// The MBAP protocol identifier is not zero.
    #[error("invalid protocol identifier: {0}")]
    ProtocolId(u16),

    /// The declared MBAP length field is outside `2..=254`.
    #[error("invalid header length field: {0}")]
    HeaderLength(usize),

    /// The frame is structurally broken beyond a checksum mismatch.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::NotConnected.is_retryable());
        assert!(Error::Frame(FrameError::ProtocolId(7)).is_retryable());
        assert!(Error::Transport(io::Error::from(io::ErrorKind::BrokenPipe)).is_retryable());
        assert!(!Error::InvalidRequest("quantity out of range").is_retryable());
        assert!(!Error::ShutdownTimedOut.is_retryable());
    }

    #[test]
    fn frame_error_display() {
        let err = FrameError::Crc {
            expected: 0x0A84,
            actual: 0x63D1,
        };
        assert_eq!(
            format!("{err}"),
            "invalid CRC: expected = 0x0A84, actual = 0x63D1"
        );
        let err = FrameError::Lrc {
            expected: 0xE5,
            actual: 0x1B,
        };
        assert_eq!(format!("{err}"), "invalid LRC: expected = 0xE5, actual = 0x1B");
    }
}
