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

//! Server side of the SASL exchange run by the `AUTH` command.

/// SASL mechanisms the `AUTH` command can name.
///
/// Only [`Mechanism::Plain`] has a server implementation, the others are
/// recognized so they can be refused with the proper reply.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumVariantNames,
)]
#[strum(ascii_case_insensitive)]
#[non_exhaustive]
pub enum Mechanism {
    /// RFC 4616
    #[strum(serialize = "PLAIN")]
    Plain,
    /// draft-murchison-sasl-login
    #[strum(serialize = "LOGIN")]
    Login,
    /// RFC 2195
    #[strum(serialize = "CRAM-MD5")]
    CramMd5,
    /// RFC 4505
    #[strum(serialize = "ANONYMOUS")]
    Anonymous,
    /// RFC 5802
    #[strum(serialize = "SCRAM-SHA-1")]
    ScramSha1,
    /// RFC 7677
    #[strum(serialize = "SCRAM-SHA-256")]
    ScramSha256,
    /// Google's bearer tokens.
    #[strum(serialize = "XOAUTH2")]
    XOauth2,
}

/// Error of a SASL exchange.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The client sent `*`.
    #[error("authentication canceled by the client")]
    Canceled,
    /// A response was not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The mechanism forbids an initial response.
    #[error("client must not start with this mechanism")]
    ClientMustNotStart,
    /// The mechanism is not offered.
    #[error("mechanism '{0}' is not supported")]
    UnsupportedMechanism(Mechanism),
    /// The decoded response does not follow the mechanism's syntax.
    #[error("malformed response")]
    MalformedResponse,
    /// The credentials were refused.
    #[error("{0}")]
    Validation(Box<dyn std::error::Error + Send + Sync>),
    /// The connection failed during the exchange.
    #[error("{0}")]
    IO(#[from] std::io::Error),
}

/// Result of one step of the server.
#[derive(Debug, PartialEq, Eq)]
pub enum SaslStep {
    /// Send this challenge (before base64 encoding) and wait for a response.
    Challenge(Vec<u8>),
    /// The exchange succeeded.
    Done,
}

/// Server side state machine of one mechanism.
pub trait SaslServer {
    /// Advance the exchange with the (decoded) client response, `None` if
    /// the client has not sent anything yet.
    ///
    /// # Errors
    ///
    /// * the response is malformed, or the credentials are refused
    fn next(&mut self, response: Option<&[u8]>) -> Result<SaslStep, AuthError>;
}

/// Credentials checker of the PLAIN mechanism: `(identity, username, password)`.
pub type PlainAuthenticator<'a> = dyn FnMut(&str, &str, &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    + Send
    + 'a;

/// RFC 4616 server: a single `identity NUL username NUL password` message.
pub struct PlainServer<'a> {
    authenticator: Box<PlainAuthenticator<'a>>,
    done: bool,
}

impl<'a> PlainServer<'a> {
    /// Create a server delegating the verification to `authenticator`.
    #[must_use]
    #[inline]
    pub fn new<F>(authenticator: F) -> Self
    where
        F: FnMut(&str, &str, &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + 'a,
    {
        Self {
            authenticator: Box::new(authenticator),
            done: false,
        }
    }
}

impl SaslServer for PlainServer<'_> {
    fn next(&mut self, response: Option<&[u8]>) -> Result<SaslStep, AuthError> {
        if self.done {
            return Err(AuthError::MalformedResponse);
        }
        let Some(response) = response else {
            return Ok(SaslStep::Challenge(vec![]));
        };
        self.done = true;

        let mut parts = response.splitn(3, |c| *c == 0);
        let (Some(identity), Some(username), Some(password)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::MalformedResponse);
        };

        fn decode(part: &[u8]) -> Result<&str, AuthError> {
            std::str::from_utf8(part).map_err(|_e| AuthError::MalformedResponse)
        }
        (self.authenticator)(decode(identity)?, decode(username)?, decode(password)?)
            .map_err(AuthError::Validation)?;

        Ok(SaslStep::Done)
    }
}
