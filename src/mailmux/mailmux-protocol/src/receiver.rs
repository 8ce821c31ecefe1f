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

use crate::{
    reader::Reader,
    sasl::{AuthError, Mechanism, SaslStep},
    writer::WindowWriter,
    AcceptArgs, AuthArgs, EhloArgs, Error, HeloArgs, MailFromArgs, RcptToArgs, ReceiverHandler,
    Reply, Stage, Verb,
};
use base64::Engine;
use tokio_stream::StreamExt;

enum HandshakeOutcome {
    Message,
    Authenticate {
        mechanism: Mechanism,
        initial_response: Option<Vec<u8>>,
    },
    Quit,
}

/// Errors produced by the client so far, and the thresholds to react to.
pub struct ErrorCounter {
    /// Number of error replies sent.
    pub error_count: i64,
    /// Count from which [`ReceiverHandler::on_soft_error`] is called, `-1` to disable.
    pub threshold_soft_error: i64,
    /// Count from which [`ReceiverHandler::on_hard_error`] is called, `-1` to disable.
    pub threshold_hard_error: i64,
}

/// An handle to send event from the [`ReceiverHandler`] to the [`Receiver`].
#[allow(clippy::module_name_repetitions)]
#[derive(Default)]
pub struct ReceiverContext {
    outcome: Option<HandshakeOutcome>,
}

impl ReceiverContext {
    /// Make the [`Receiver`] quit the connection early, and close cleanly.
    #[inline]
    pub fn deny(&mut self) {
        self.outcome = Some(HandshakeOutcome::Quit);
    }

    /// Make the [`Receiver`] initialize a SASL handshake.
    #[inline]
    pub fn authenticate(&mut self, mechanism: Mechanism, initial_response: Option<Vec<u8>>) {
        self.outcome = Some(HandshakeOutcome::Authenticate {
            mechanism,
            initial_response,
        });
    }

    /// The [`Receiver`] will close the connection.
    #[inline]
    #[must_use]
    pub const fn is_denied(&self) -> bool {
        matches!(self.outcome, Some(HandshakeOutcome::Quit))
    }
}

// RFC 4954: "=" stands for an empty response
fn decode_response(raw: &[u8]) -> Result<Vec<u8>, AuthError> {
    if raw == b"=" {
        return Ok(vec![]);
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(raw)?)
}

/// A SMTP receiver.
pub struct Receiver<
    H: ReceiverHandler + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
    R: tokio::io::AsyncRead + Unpin + Send,
> {
    pub(crate) sink: WindowWriter<W>,
    pub(crate) stream: Reader<R>,
    error_counter: ErrorCounter,
    context: ReceiverContext,
    message_size_max: usize,
    timeout_client: std::time::Duration,
    h: std::marker::PhantomData<H>,
}

impl<H: ReceiverHandler + Send>
    Receiver<H, tokio::net::tcp::OwnedWriteHalf, tokio::net::tcp::OwnedReadHalf>
{
    /// Create a new [`Receiver`] from a TCP/IP stream.
    #[inline]
    #[must_use]
    pub fn from_tcp(
        tcp_stream: tokio::net::TcpStream,
        threshold_soft_error: i64,
        threshold_hard_error: i64,
        message_size_max: usize,
        support_pipelining: bool,
        timeout_client: std::time::Duration,
    ) -> Self {
        let (read, write) = tcp_stream.into_split();
        Self::new(
            read,
            write,
            threshold_soft_error,
            threshold_hard_error,
            message_size_max,
            support_pipelining,
            timeout_client,
        )
    }
}

impl<
        H: ReceiverHandler + Send,
        W: tokio::io::AsyncWrite + Unpin + Send,
        R: tokio::io::AsyncRead + Unpin + Send,
    > Receiver<H, W, R>
{
    /// Create a new [`Receiver`] over any pair of read/write halves.
    #[inline]
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        read: R,
        write: W,
        threshold_soft_error: i64,
        threshold_hard_error: i64,
        message_size_max: usize,
        support_pipelining: bool,
        timeout_client: std::time::Duration,
    ) -> Self {
        Self {
            sink: WindowWriter::new(write),
            stream: Reader::new(read, support_pipelining),
            error_counter: ErrorCounter {
                error_count: 0,
                threshold_soft_error,
                threshold_hard_error,
            },
            context: ReceiverContext::default(),
            message_size_max,
            timeout_client,
            h: std::marker::PhantomData,
        }
    }

    /// Handle the inner stream to produce a [`tokio_stream::Stream`], each item
    /// being a completed SMTP transaction.
    #[inline]
    pub fn into_stream(
        self,
        handler: H,
        args: AcceptArgs,
    ) -> impl tokio_stream::Stream<Item = Result<(), ()>> {
        self.into_stream_with_error(handler, args).map(|e| match e {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(%e);
                Err(())
            }
        })
    }

    fn into_stream_with_error(
        mut self,
        mut handler: H,
        args: AcceptArgs,
    ) -> impl tokio_stream::Stream<Item = Result<(), Error>> {
        async_stream::try_stream! {
            let reply_accept = handler.on_accept(&mut self.context, args).await;
            self.sink
                .direct_send_reply(&mut self.context, &mut self.error_counter, &mut handler, reply_accept)
                .await?;
            if self.context.is_denied() {
                return;
            }

            loop {
                match self.smtp_handshake(&mut handler).await? {
                    HandshakeOutcome::Message => {
                        let message_stream = self.stream.as_message_stream(self.message_size_max).fuse();
                        tokio::pin!(message_stream);

                        let reply = handler.on_message(&mut self.context, message_stream).await;
                        self.sink
                            .direct_send_reply(&mut self.context, &mut self.error_counter, &mut handler, reply)
                            .await?;

                        yield ();

                        if std::mem::take(&mut self.context).is_denied() {
                            return;
                        }
                    },
                    HandshakeOutcome::Authenticate { mechanism, initial_response } => {
                        let auth_result = self.authenticate(&mut handler, mechanism, initial_response).await;

                        let reply = handler.on_post_auth(&mut self.context, auth_result).await;
                        self.sink
                            .direct_send_reply(&mut self.context, &mut self.error_counter, &mut handler, reply)
                            .await?;

                        if std::mem::take(&mut self.context).is_denied() {
                            return;
                        }
                    },
                    HandshakeOutcome::Quit => break,
                }
            }
        }
    }

    /// Run the SASL exchange of `mechanism` with the client.
    async fn authenticate(
        &mut self,
        handler: &mut H,
        mechanism: Mechanism,
        initial_response: Option<Vec<u8>>,
    ) -> Result<(), AuthError> {
        let mut server = handler.sasl_server(mechanism)?;
        let mut response = initial_response
            .map(|raw| decode_response(&raw))
            .transpose()?;

        loop {
            match server.next(response.as_deref())? {
                SaslStep::Done => return Ok(()),
                SaslStep::Challenge(challenge) => {
                    self.sink
                        .write_all(&format!(
                            "334 {}\r\n",
                            base64::engine::general_purpose::STANDARD.encode(challenge)
                        ))
                        .await?;

                    let line = {
                        let lines = self.stream.as_line_stream();
                        tokio::pin!(lines);
                        match tokio::time::timeout(self.timeout_client, lines.next()).await {
                            Ok(Some(line)) => line?,
                            Ok(None) => {
                                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())
                            }
                            Err(_elapsed) => {
                                return Err(std::io::Error::from(std::io::ErrorKind::TimedOut).into())
                            }
                        }
                    };
                    let line = line.strip_suffix(b"\r\n").unwrap_or(&line);
                    tracing::trace!("<< {:?}", std::str::from_utf8(line));

                    if line == b"*" {
                        return Err(AuthError::Canceled);
                    }
                    response = Some(decode_response(line)?);
                }
            }
        }
    }

    /// SMTP handshake, until an outcome is produced by the handler.
    #[allow(clippy::too_many_lines)]
    async fn smtp_handshake(&mut self, handler: &mut H) -> Result<HandshakeOutcome, Error> {
        macro_rules! handle_args {
            ($args_output:ty, $args:expr, $on_event:tt) => {
                match <$args_output>::try_from($args) {
                    Ok(args) => handler.$on_event(&mut self.context, args).await,
                    Err(e) => handler.on_args_error(&e).await,
                }
            };
            ($args_output:ty, $args:expr, Option: $on_event:tt) => {
                match <$args_output>::try_from($args) {
                    Ok(args) => handler.$on_event(&mut self.context, args).await,
                    Err(e) => Some(handler.on_args_error(&e).await),
                }
            };
        }

        let timeout_client = self.timeout_client;
        let command_stream = self.stream.as_window_stream().timeout(timeout_client);
        tokio::pin!(command_stream);

        loop {
            let commands_batch = match command_stream.try_next().await {
                Ok(Some(Ok(commands_batch))) if !commands_batch.is_empty() => commands_batch,
                Ok(Some(Err(e))) => return Err(e.into()),
                Err(_elapsed) => {
                    tracing::warn!(
                        "Closing after {} without receiving a command",
                        humantime::format_duration(timeout_client)
                    );
                    #[allow(clippy::expect_used)]
                    self.sink
                        .direct_send_reply(
                            &mut self.context,
                            &mut self.error_counter,
                            handler,
                            "451 Timeout - closing connection\r\n"
                                .parse()
                                .expect("valid syntax"),
                        )
                        .await?;

                    return Ok(HandshakeOutcome::Quit);
                }
                _ => return Ok(HandshakeOutcome::Quit),
            };

            let batch_len = commands_batch.len();
            for (idx, command) in commands_batch.into_iter().enumerate() {
                let (verb, args) = match command {
                    Ok(command) => command,
                    Err(Error::ParseArgs(e)) => {
                        let reply = handler.on_args_error(&e).await;
                        self.sink
                            .direct_send_reply(&mut self.context, &mut self.error_counter, handler, reply)
                            .await?;
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(%e);
                        return Err(e);
                    }
                };
                tracing::trace!("<< {:?} ; {:?}", verb, std::str::from_utf8(&args.0));

                let stage = handler.get_stage();
                let reply = match (verb, stage) {
                    (Verb::Helo, _) => Some(handle_args!(HeloArgs, args, on_helo)),
                    (Verb::Ehlo, _) => Some(handle_args!(EhloArgs, args, on_ehlo)),
                    (Verb::Noop, _) => Some(handler.on_noop().await),
                    (Verb::Rset, _) => Some(handler.on_rset().await),
                    (Verb::StartTls, _) => Some(handler.on_starttls().await),
                    (Verb::Auth, Stage::Connect | Stage::Helo) => {
                        handle_args!(AuthArgs, args, Option: on_auth)
                    }
                    (Verb::MailFrom, Stage::Helo | Stage::MailFrom) => {
                        Some(handle_args!(MailFromArgs, args, on_mail_from))
                    }
                    (Verb::RcptTo, Stage::MailFrom | Stage::RcptTo) => {
                        Some(handle_args!(RcptToArgs, args, on_rcpt_to))
                    }
                    (Verb::Data, Stage::RcptTo) => {
                        self.context.outcome = Some(HandshakeOutcome::Message);
                        Some(handler.on_data().await)
                    }
                    (Verb::Quit, _) => {
                        self.context.outcome = Some(HandshakeOutcome::Quit);
                        Some(handler.on_quit().await)
                    }
                    (Verb::Help, _) => Some(handler.on_help(args).await),
                    (Verb::Unknown, _) => Some(handler.on_unknown(args.0).await),
                    otherwise => Some(handler.on_bad_sequence(otherwise).await),
                };
                if let Some(reply) = reply {
                    self.sink
                        .send_reply(&mut self.context, &mut self.error_counter, handler, reply, verb)
                        .await?;
                }

                if self.context.outcome.is_some() {
                    if idx + 1 != batch_len {
                        tracing::warn!(
                            dropped = batch_len - idx - 1,
                            "Commands pipelined after a non-pipelinable command are ignored."
                        );
                    }
                    break;
                }
            }

            if !self.sink.is_empty() {
                self.sink.flush().await?;
            }
            if let Some(done) = std::mem::take(&mut self.context).outcome {
                return Ok(done);
            }
        }
    }
}
