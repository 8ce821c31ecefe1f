/*
 * vSMTP mail transfer agent
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

/// Error of the SMTP receiver.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying stream failed.
    #[error("smtp protocol error: {0}")]
    Io(#[from] std::io::Error),
    /// The client sent a line the receiver can answer with an error reply.
    #[error("smtp protocol error: {0}")]
    ParseArgs(#[from] ParseArgsError),
    /// The stream was closed in the middle of a line.
    #[error("smtp protocol error: no CRLF found")]
    NoCrlf,
    /// The client did not send anything in time.
    #[error("smtp protocol error: after {}: {message}", humantime::format_duration(*.duration))]
    Timeout {
        /// Time waited.
        duration: std::time::Duration,
        /// What was expected.
        message: String,
    },
}

impl Error {
    pub(crate) const fn buffer_too_long(expected: usize, got: usize) -> Self {
        Self::ParseArgs(ParseArgsError::BufferTooLong { expected, got })
    }

    /// Produce an error with a timeout message.
    #[must_use]
    #[inline]
    pub fn timeout(duration: std::time::Duration, message: &str) -> Self {
        Self::Timeout {
            duration,
            message: message.to_string(),
        }
    }
}

/// Error while parsing the arguments of a command.
#[allow(clippy::module_name_repetitions)]
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ParseArgsError {
    /// Non-UTF8 buffer.
    #[error("{0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    /// Non-UTF8 buffer.
    #[error("{0}")]
    InvalidUtf8ref(#[from] std::str::Utf8Error),
    /// Invalid IP address.
    #[error("{0}")]
    BadTypeAddr(#[from] std::net::AddrParseError),
    /// The buffer is too big (between each "\r\n").
    #[error("buffer is not supposed to be longer than {expected} bytes but got {got}")]
    BufferTooLong {
        /// buffer size limit
        expected: usize,
        /// actual size of the buffer we got
        got: usize,
    },
    /// mail address is invalid (for rcpt, mail from ...)
    #[error("invalid mailbox '{mail}'")]
    InvalidMailAddress {
        /// ill-formatted mail address
        mail: String,
    },
    /// An utf8 mailbox was given without the SMTPUTF8 option.
    #[error("mailbox unavailable without SMTPUTF8")]
    EmailUnavailable,
    /// Any other syntax error.
    #[error("invalid arguments")]
    InvalidArgs,
}
