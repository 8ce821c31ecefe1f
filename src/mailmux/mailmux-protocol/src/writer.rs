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

use crate::{receiver::ErrorCounter, ReceiverContext, ReceiverHandler, Reply, Verb};
use tokio::io::AsyncWriteExt;

/// Writer used for pipelining, replies of bufferable verbs are kept until
/// the end of the window.
#[allow(clippy::module_name_repetitions)]
pub struct WindowWriter<W: tokio::io::AsyncWrite + Unpin + Send> {
    inner: W,
    buffer: Vec<Reply>,
}

impl<W: tokio::io::AsyncWrite + Unpin + Send> WindowWriter<W> {
    /// Create a new `WindowWriter`.
    #[inline]
    #[must_use]
    pub const fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::<Reply>::new(),
        }
    }

    /// Consume the instance and return the underlying writer.
    #[inline]
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// No reply is waiting in the buffer.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Send the buffer to the client.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    #[inline]
    pub async fn write_all(&mut self, buffer: &str) -> std::io::Result<()> {
        tracing::trace!(">> {:?}", buffer);
        self.inner.write_all(buffer.as_bytes()).await?;
        self.inner.flush().await
    }

    /// update error counters and return appropriate message based on these counters.
    async fn handle_error<T: ReceiverHandler + Send>(
        ctx: &mut ReceiverContext,
        error_counter: &mut ErrorCounter,
        handler: &mut T,
        reply: Reply,
    ) -> Reply {
        if !reply.code().is_error() {
            return reply;
        }
        error_counter.error_count += 1;

        let hard_error = error_counter.threshold_hard_error;
        let soft_error = error_counter.threshold_soft_error;

        if hard_error != -1 && error_counter.error_count >= hard_error {
            return handler.on_hard_error(ctx, reply).await;
        }
        if soft_error != -1 && error_counter.error_count >= soft_error {
            return handler.on_soft_error(ctx, reply).await;
        }
        reply
    }

    /// Send a reply right away, after the buffered ones.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    pub async fn direct_send_reply<T: ReceiverHandler + Send>(
        &mut self,
        ctx: &mut ReceiverContext,
        error_counter: &mut ErrorCounter,
        handler: &mut T,
        reply: Reply,
    ) -> std::io::Result<()> {
        let final_reply = Self::handle_error(ctx, error_counter, handler, reply).await;
        if !self.buffer.is_empty() {
            self.flush().await?;
        }
        self.write_all(final_reply.as_ref()).await
    }

    /// Buffer the reply if `verb` allows it, send it (and the buffer) otherwise.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    pub async fn send_reply<T: ReceiverHandler + Send>(
        &mut self,
        ctx: &mut ReceiverContext,
        error_counter: &mut ErrorCounter,
        handler: &mut T,
        reply: Reply,
        verb: Verb,
    ) -> std::io::Result<()> {
        let final_reply = Self::handle_error(ctx, error_counter, handler, reply).await;
        if verb.is_bufferable() {
            self.buffer.push(final_reply);
            return Ok(());
        }
        if !self.buffer.is_empty() {
            self.flush().await?;
        }
        self.write_all(final_reply.as_ref()).await
    }

    /// Send all buffered replies in one go.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    pub async fn flush(&mut self) -> std::io::Result<()> {
        let full_response = self
            .buffer
            .drain(..)
            .map(|r| r.to_string())
            .collect::<String>();
        self.write_all(&full_response).await
    }
}
