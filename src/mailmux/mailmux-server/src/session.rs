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

//! State of one client connection, independent of the SMTP wire format.
//!
//! ```text
//! Unauthenticated -> Authenticated -> MailFrom -> RcptTo -> (data) -> Authenticated
//! ```

use mailmux_config::{field::UserConfig, Config};
use mailmux_delivery::Envelope;
use mailmux_protocol::sasl::{Mechanism, PlainServer, SaslServer};
use mailmux_selector::{DispatchError, Dispatcher, Selection};
use std::sync::Arc;

/// Failure of an authentication attempt. The connection stays open.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No user has this email and password.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// The authorization identity differs from the username.
    #[error("authorization identity '{identity}' differs from username '{username}'")]
    UnsupportedIdentity {
        ///
        identity: String,
        ///
        username: String,
    },
    /// Only PLAIN is offered.
    #[error("mechanism '{0}' is not supported")]
    UnsupportedMechanism(Mechanism),
}

/// A transaction command received out of order.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    ///
    #[error("authentication required")]
    NotAuthenticated,
    ///
    #[error("no sender")]
    NoSender,
    ///
    #[error("no recipients")]
    NoRecipients,
}

/// Failure of [`Session::data`].
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    ///
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    ///
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// A client connection: who is authenticated and what is being sent.
pub struct Session {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    current_user: Option<usize>,
    envelope: Option<Envelope>,
}

impl Session {
    ///
    #[must_use]
    #[inline]
    pub const fn new(config: Arc<Config>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            current_user: None,
            envelope: None,
        }
    }

    /// Mechanisms advertised in the EHLO reply.
    #[must_use]
    #[inline]
    pub const fn auth_mechanisms() -> &'static [Mechanism] {
        &[Mechanism::Plain]
    }

    /// The authenticated user, if any.
    #[must_use]
    #[inline]
    pub fn user(&self) -> Option<&UserConfig> {
        self.current_user.and_then(|idx| self.config.users.get(idx))
    }

    ///
    #[must_use]
    #[inline]
    pub const fn is_authenticated(&self) -> bool {
        self.current_user.is_some()
    }

    /// Sender and recipients received so far, `None` outside of a transaction.
    #[must_use]
    #[inline]
    pub const fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// Start the SASL exchange of `mechanism`.
    ///
    /// # Errors
    ///
    /// * [`AuthError::UnsupportedMechanism`]
    pub fn auth(
        &mut self,
        mechanism: Mechanism,
    ) -> Result<Box<dyn SaslServer + Send + '_>, AuthError> {
        match mechanism {
            Mechanism::Plain => Ok(Box::new(PlainServer::new(
                |identity: &str, username: &str, password: &str| {
                    self.authenticate_plain(identity, username, password)
                        .map_err(Into::into)
                },
            ))),
            otherwise => Err(AuthError::UnsupportedMechanism(otherwise)),
        }
    }

    fn authenticate_plain(
        &mut self,
        identity: &str,
        username: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        if !identity.is_empty() && identity != username {
            return Err(AuthError::UnsupportedIdentity {
                identity: identity.to_string(),
                username: username.to_string(),
            });
        }
        self.authenticate_credentials(username, password)
    }

    /// Bind the user whose email and password are exactly `username` and `password`.
    ///
    /// # Errors
    ///
    /// * [`AuthError::InvalidCredentials`]
    pub fn authenticate_credentials(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        let idx = self
            .config
            .users
            .iter()
            .position(|user| user.email == username && user.password == password)
            .ok_or(AuthError::InvalidCredentials)?;

        tracing::info!(user = %username, "User authenticated.");
        self.current_user = Some(idx);
        Ok(())
    }

    /// Start a transaction, `None` being the null reverse path.
    ///
    /// # Errors
    ///
    /// * [`TransactionError::NotAuthenticated`]
    pub fn mail(&mut self, from: Option<String>) -> Result<(), TransactionError> {
        if !self.is_authenticated() {
            return Err(TransactionError::NotAuthenticated);
        }
        self.envelope = Some(Envelope {
            sender: from,
            recipients: vec![],
        });
        Ok(())
    }

    /// Add a recipient to the transaction.
    ///
    /// # Errors
    ///
    /// * [`TransactionError::NotAuthenticated`]
    /// * [`TransactionError::NoSender`]
    pub fn rcpt(&mut self, to: String) -> Result<(), TransactionError> {
        if !self.is_authenticated() {
            return Err(TransactionError::NotAuthenticated);
        }
        self.envelope
            .as_mut()
            .ok_or(TransactionError::NoSender)?
            .recipients
            .push(to);
        Ok(())
    }

    /// Abort the transaction, the user stays authenticated.
    pub fn reset(&mut self) {
        self.envelope = None;
    }

    /// End of the session.
    pub fn logout(&mut self) {
        self.envelope = None;
        self.current_user = None;
    }

    /// Route `body` with the envelope of the transaction, which ends whatever
    /// the outcome.
    ///
    /// # Errors
    ///
    /// * see [`TransactionError`] and [`DispatchError`]
    pub async fn data(&mut self, body: Vec<u8>) -> Result<Selection, DataError> {
        let config = self.config.clone();
        let user = self
            .current_user
            .and_then(|idx| config.users.get(idx))
            .ok_or(TransactionError::NotAuthenticated)?;

        let envelope = self.envelope.take().ok_or(TransactionError::NoSender)?;
        if envelope.recipients.is_empty() {
            return Err(TransactionError::NoRecipients.into());
        }

        Ok(self.dispatcher.dispatch(user, envelope, body).await?)
    }
}
