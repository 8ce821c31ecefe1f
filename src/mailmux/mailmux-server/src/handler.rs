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

use crate::session::{AuthError, DataError, Session, TransactionError};
use mailmux_config::Config;
use mailmux_protocol::{
    sasl::{self, Mechanism, SaslServer},
    AcceptArgs, AuthArgs, EhloArgs, Error, HeloArgs, MailFromArgs, ParseArgsError, RcptToArgs,
    ReceiverContext, Reply, Stage, Verb,
};
use mailmux_selector::{plugin::PluginError, DispatchError, Dispatcher, SelectorError};

#[allow(clippy::expect_used)]
fn reply(raw: &str) -> Reply {
    raw.parse().expect("valid syntax")
}

fn data_error_reply(error: &DataError) -> Reply {
    reply(match error {
        DataError::Transaction(TransactionError::NotAuthenticated) => {
            "530 5.7.0 Authentication required\r\n"
        }
        DataError::Transaction(_) => "503 Bad sequence of commands\r\n",
        DataError::Dispatch(DispatchError::Selector(SelectorError::Timeout(_))) => {
            "451 4.4.7 Routing timed out\r\n"
        }
        DataError::Dispatch(DispatchError::Selector(
            SelectorError::Unavailable { .. } | SelectorError::Plugin(PluginError::Unreachable(_)),
        )) => "451 4.3.0 Routing unavailable\r\n",
        _ => "554 5.3.0 Message relay failed\r\n",
    })
}

/// [`mailmux_protocol::ReceiverHandler`] of a client connection, a thin
/// adapter between the SMTP commands and the [`Session`].
pub struct Handler {
    config: std::sync::Arc<Config>,
    session: Session,
    client_name: Option<String>,
}

impl Handler {
    ///
    #[must_use]
    #[inline]
    pub fn new(config: std::sync::Arc<Config>, dispatcher: std::sync::Arc<Dispatcher>) -> Self {
        Self {
            session: Session::new(config.clone(), dispatcher),
            config,
            client_name: None,
        }
    }
}

#[async_trait::async_trait]
impl mailmux_protocol::ReceiverHandler for Handler {
    fn get_stage(&self) -> Stage {
        match (&self.client_name, self.session.envelope()) {
            (None, _) => Stage::Connect,
            (Some(_), None) => Stage::Helo,
            (Some(_), Some(envelope)) if envelope.recipients.is_empty() => Stage::MailFrom,
            (Some(_), Some(_)) => Stage::RcptTo,
        }
    }

    fn sasl_server(
        &mut self,
        mechanism: Mechanism,
    ) -> Result<Box<dyn SaslServer + Send + '_>, sasl::AuthError> {
        self.session.auth(mechanism).map_err(|e| match e {
            AuthError::UnsupportedMechanism(mechanism) => {
                sasl::AuthError::UnsupportedMechanism(mechanism)
            }
            otherwise => sasl::AuthError::Validation(Box::new(otherwise)),
        })
    }

    async fn on_accept(&mut self, _: &mut ReceiverContext, args: AcceptArgs) -> Reply {
        tracing::info!(client = %args.client_addr, "Client connected.");
        Reply::new(220, &format!("{} Service ready", self.config.server.name))
    }

    async fn on_helo(&mut self, _: &mut ReceiverContext, args: HeloArgs) -> Reply {
        self.session.reset();
        self.client_name = Some(args.client_name);
        Reply::new(250, &self.config.server.name)
    }

    async fn on_ehlo(&mut self, _: &mut ReceiverContext, args: EhloArgs) -> Reply {
        self.session.reset();
        self.client_name = Some(args.client_name.to_string());

        let mechanisms = Session::auth_mechanisms()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");

        let mut lines = vec![
            self.config.server.name.clone(),
            format!("AUTH {mechanisms}"),
            "8BITMIME".to_string(),
            "SMTPUTF8".to_string(),
        ];
        if self.config.server.pipelining {
            lines.push("PIPELINING".to_string());
        }
        lines.push(format!("SIZE {}", self.config.server.message_size_limit));

        Reply::new(250, &lines.join("\n"))
    }

    async fn on_auth(&mut self, ctx: &mut ReceiverContext, args: AuthArgs) -> Option<Reply> {
        if self.client_name.is_none() {
            return Some(reply("503 5.5.1 Send EHLO first\r\n"));
        }
        if self.session.is_authenticated() {
            return Some(reply("503 5.5.1 Already authenticated\r\n"));
        }
        if !Session::auth_mechanisms().contains(&args.mechanism) {
            return Some(reply("504 5.5.4 Mechanism is not supported\r\n"));
        }

        ctx.authenticate(args.mechanism, args.initial_response);
        None
    }

    async fn on_post_auth(
        &mut self,
        ctx: &mut ReceiverContext,
        result: Result<(), sasl::AuthError>,
    ) -> Reply {
        match result {
            Ok(()) => reply("235 2.7.0 Authentication succeeded\r\n"),
            Err(sasl::AuthError::Validation(e)) => {
                tracing::warn!(%e, "Authentication failed.");
                reply("535 5.7.8 Authentication credentials invalid\r\n")
            }
            Err(sasl::AuthError::UnsupportedMechanism(_)) => {
                reply("504 5.5.4 Mechanism is not supported\r\n")
            }
            Err(sasl::AuthError::Canceled) => reply("501 Authentication canceled by client\r\n"),
            Err(sasl::AuthError::Base64(_)) => reply("501 5.5.2 Invalid, not base64\r\n"),
            Err(sasl::AuthError::IO(e)) => {
                tracing::warn!(%e, "Connection lost during authentication.");
                ctx.deny();
                reply("421 4.4.2 Connection lost during authentication\r\n")
            }
            Err(e) => {
                tracing::warn!(%e, "Authentication failed.");
                reply("501 5.5.2 Malformed authentication response\r\n")
            }
        }
    }

    async fn on_mail_from(&mut self, _: &mut ReceiverContext, args: MailFromArgs) -> Reply {
        if args
            .size
            .map_or(false, |size| size > self.config.server.message_size_limit)
        {
            return reply("552 5.3.4 Message size exceeds fixed maximum message size\r\n");
        }

        match self.session.mail(args.reverse_path) {
            Ok(()) => reply("250 Ok\r\n"),
            Err(TransactionError::NotAuthenticated) => {
                reply("530 5.7.0 Authentication required\r\n")
            }
            Err(_) => reply("503 Bad sequence of commands\r\n"),
        }
    }

    async fn on_rcpt_to(&mut self, _: &mut ReceiverContext, args: RcptToArgs) -> Reply {
        match self.session.rcpt(args.forward_path) {
            Ok(()) => reply("250 Ok\r\n"),
            Err(TransactionError::NotAuthenticated) => {
                reply("530 5.7.0 Authentication required\r\n")
            }
            Err(_) => reply("503 Bad sequence of commands\r\n"),
        }
    }

    async fn on_message(
        &mut self,
        ctx: &mut ReceiverContext,
        mut stream: impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + Send + Unpin,
    ) -> Reply {
        let mut body = vec![];
        while let Some(line) = tokio_stream::StreamExt::next(&mut stream).await {
            match line {
                Ok(line) => body.extend_from_slice(&line),
                Err(Error::ParseArgs(ParseArgsError::BufferTooLong { expected, got })) => {
                    tracing::warn!(limit = expected, size = got, "Message too large.");
                    self.session.reset();
                    return reply("552 4.3.1 Message size exceeds fixed maximum message size\r\n");
                }
                Err(e) => {
                    tracing::warn!(%e, "Failed to receive the message.");
                    self.session.reset();
                    ctx.deny();
                    return reply("451 4.3.0 Failed to receive the message\r\n");
                }
            }
        }

        match self.session.data(body).await {
            Ok(selection) => {
                tracing::info!(?selection, "Message routed.");
                reply("250 Ok\r\n")
            }
            Err(e) => {
                tracing::warn!(%e, "Transaction failed.");
                data_error_reply(&e)
            }
        }
    }

    async fn on_hard_error(&mut self, ctx: &mut ReceiverContext, reply: Reply) -> Reply {
        ctx.deny();
        Reply::new(
            reply.code().value(),
            &format!("{}\nToo many errors from the client", reply.text()),
        )
    }

    async fn on_soft_error(&mut self, _: &mut ReceiverContext, reply: Reply) -> Reply {
        tokio::time::sleep(self.config.server.smtp.error.delay).await;
        reply
    }

    async fn on_rset(&mut self) -> Reply {
        self.session.reset();
        reply("250 Ok\r\n")
    }

    async fn on_quit(&mut self) -> Reply {
        self.session.logout();
        reply("221 Service closing transmission channel\r\n")
    }

    async fn on_bad_sequence(&mut self, (verb, _): (Verb, Stage)) -> Reply {
        if !self.session.is_authenticated()
            && matches!(verb, Verb::MailFrom | Verb::RcptTo | Verb::Data)
        {
            reply("530 5.7.0 Authentication required\r\n")
        } else {
            reply("503 Bad sequence of commands\r\n")
        }
    }
}
