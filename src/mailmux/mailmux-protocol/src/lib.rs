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

//! SMTP receiver: reads commands from the client, hands them to a
//! [`ReceiverHandler`] and writes the replies back.

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

mod command;
mod error;
mod reader;
mod receiver;
mod reply;
mod writer;

/// SASL server side.
pub mod sasl;

pub use command::{
    AcceptArgs, AuthArgs, Batch, ClientName, Command, EhloArgs, HeloArgs, MailFromArgs,
    MimeBodyType, RcptToArgs, UnparsedArgs, Verb,
};
pub use error::{Error, ParseArgsError};
pub use reader::{Reader, MAX_LINE_SIZE};
pub use receiver::{ErrorCounter, Receiver, ReceiverContext};
pub use reply::{ParseReplyError, Reply, ReplyCode};
pub use writer::WindowWriter;

use sasl::{AuthError, Mechanism, SaslServer};

/// Position of the client in the SMTP transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[allow(clippy::exhaustive_enums)]
pub enum Stage {
    /// Connection accepted, no HELO/EHLO yet.
    Connect,
    /// After HELO/EHLO, outside of a transaction.
    Helo,
    /// After MAIL FROM.
    MailFrom,
    /// After at least one RCPT TO.
    RcptTo,
}

/// Callbacks of the [`Receiver`], one per command of the protocol.
///
/// Every callback returns the reply sent to the client.
#[async_trait::async_trait]
pub trait ReceiverHandler {
    /// Current stage of the transaction, used to detect bad sequences.
    fn get_stage(&self) -> Stage;

    /// Server of the SASL exchange for `mechanism`.
    ///
    /// # Errors
    ///
    /// * [`AuthError::UnsupportedMechanism`]
    fn sasl_server(
        &mut self,
        mechanism: Mechanism,
    ) -> Result<Box<dyn SaslServer + Send + '_>, AuthError>;

    /// Called when the client connects, produces the greeting.
    async fn on_accept(&mut self, ctx: &mut ReceiverContext, args: AcceptArgs) -> Reply;

    /// Called after receiving a [`Verb::Helo`] command.
    async fn on_helo(&mut self, ctx: &mut ReceiverContext, args: HeloArgs) -> Reply;

    /// Called after receiving a [`Verb::Ehlo`] command.
    async fn on_ehlo(&mut self, ctx: &mut ReceiverContext, args: EhloArgs) -> Reply;

    /// Called after receiving a [`Verb::StartTls`] command.
    #[allow(clippy::expect_used)]
    async fn on_starttls(&mut self) -> Reply {
        "454 TLS not available due to temporary reason\r\n"
            .parse()
            .expect("valid syntax")
    }

    /// Called after receiving a [`Verb::Auth`] command.
    ///
    /// Call [`ReceiverContext::authenticate`] to start the exchange, or
    /// return a reply to refuse it.
    async fn on_auth(&mut self, ctx: &mut ReceiverContext, args: AuthArgs) -> Option<Reply>;

    /// Called at the end of the SASL exchange.
    async fn on_post_auth(
        &mut self,
        ctx: &mut ReceiverContext,
        result: Result<(), AuthError>,
    ) -> Reply;

    /// Called after receiving a [`Verb::MailFrom`] command.
    async fn on_mail_from(&mut self, ctx: &mut ReceiverContext, args: MailFromArgs) -> Reply;

    /// Called after receiving a [`Verb::RcptTo`] command.
    async fn on_rcpt_to(&mut self, ctx: &mut ReceiverContext, args: RcptToArgs) -> Reply;

    /// Called after receiving a [`Verb::Data`] command, before the message.
    #[allow(clippy::expect_used)]
    async fn on_data(&mut self) -> Reply {
        "354 Start mail input; end with <CRLF>.<CRLF>\r\n"
            .parse()
            .expect("valid syntax")
    }

    /// Called with the lines of the message, after [`Verb::Data`].
    async fn on_message(
        &mut self,
        ctx: &mut ReceiverContext,
        stream: impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + Send + Unpin,
    ) -> Reply;

    /// Called when the hard error threshold is reached, closes the connection by default.
    async fn on_hard_error(&mut self, ctx: &mut ReceiverContext, reply: Reply) -> Reply {
        ctx.deny();
        reply
    }

    /// Called when the soft error threshold is reached.
    async fn on_soft_error(&mut self, _ctx: &mut ReceiverContext, reply: Reply) -> Reply {
        reply
    }

    /// Called after receiving a [`Verb::Rset`] command.
    async fn on_rset(&mut self) -> Reply;

    /// Called after receiving a [`Verb::Quit`] command.
    #[allow(clippy::expect_used)]
    async fn on_quit(&mut self) -> Reply {
        "221 Service closing transmission channel\r\n"
            .parse()
            .expect("valid syntax")
    }

    /// Called after receiving a [`Verb::Noop`] command.
    #[allow(clippy::expect_used)]
    async fn on_noop(&mut self) -> Reply {
        "250 Ok\r\n".parse().expect("valid syntax")
    }

    /// Called after receiving a [`Verb::Help`] command.
    #[allow(clippy::expect_used)]
    async fn on_help(&mut self, _: UnparsedArgs) -> Reply {
        "214 See RFC 5321 and RFC 4954\r\n"
            .parse()
            .expect("valid syntax")
    }

    /// Called after receiving an unknown command.
    #[allow(clippy::expect_used)]
    async fn on_unknown(&mut self, _: Vec<u8>) -> Reply {
        "500 Syntax error command unrecognized\r\n"
            .parse()
            .expect("valid syntax")
    }

    /// Called when a known command is received at the wrong stage.
    #[allow(clippy::expect_used)]
    async fn on_bad_sequence(&mut self, _: (Verb, Stage)) -> Reply {
        "503 Bad sequence of commands\r\n"
            .parse()
            .expect("valid syntax")
    }

    /// Called when the arguments of a command cannot be parsed.
    #[allow(clippy::expect_used)]
    async fn on_args_error(&mut self, error: &ParseArgsError) -> Reply {
        match error {
            ParseArgsError::BufferTooLong { .. } => "500 Line too long\r\n",
            _ => "501 Syntax error in parameters or arguments\r\n",
        }
        .parse()
        .expect("valid syntax")
    }
}
