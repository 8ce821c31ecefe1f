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

//! Submission of a buffered message to a downstream SMTP server.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::multiple_crate_versions)]

mod smtp;

pub use smtp::SmtpRelay;

use mailmux_config::field::Downstream;

/// Sender and recipients of a transaction, as received with MAIL FROM and RCPT TO.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// `None` for the null reverse path.
    pub sender: Option<String>,
    /// In the order they were received.
    pub recipients: Vec<String>,
}

/// Error of a submission. No retry is attempted by this crate.
#[allow(clippy::module_name_repetitions)]
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The address of the downstream cannot be used.
    #[error(transparent)]
    InvalidDownstream(#[from] mailmux_config::ConfigError),
    /// A mailbox of the envelope is refused by the SMTP client.
    #[error("invalid envelope: {0}")]
    Envelope(String),
    /// The downstream or the network failed.
    #[error("relay to '{addr}' failed: {message}")]
    Transport {
        /// Address of the downstream.
        addr: String,
        /// Error as reported by the transport.
        message: String,
    },
}

/// Synchronous submission of a message.
///
/// Called from blocking threads only: script selectors relay from inside
/// the interpreter.
pub trait Relay: Send + Sync {
    /// Submit `body` to `downstream` with its own credentials.
    ///
    /// `limit` caps the time the submission may take, on top of the relay's
    /// own timeout.
    ///
    /// # Errors
    ///
    /// * see [`RelayError`]
    fn send(
        &self,
        downstream: &Downstream,
        envelope: &Envelope,
        body: &[u8],
        limit: Option<std::time::Duration>,
    ) -> Result<(), RelayError>;
}
