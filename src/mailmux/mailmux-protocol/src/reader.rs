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

use crate::{command::Batch, command::Command, Error, UnparsedArgs, Verb};
use tokio::io::AsyncReadExt;
use tokio_stream::StreamExt;

/// max size of a received command, including addition from all the following extensions:
/// (note: the base size is at 80 characters)
/// - AUTH (+500 characters)
/// - SMTPUTF8 (+10 characters)
pub const MAX_LINE_SIZE: usize = 1024;

fn find(bytes: &[u8], search: &[u8]) -> Option<usize> {
    bytes
        .windows(search.len())
        .position(|window| window == search)
}

fn parse_command_line(line: &[u8]) -> Result<Command<Verb, UnparsedArgs>, Error> {
    if line.len() >= MAX_LINE_SIZE {
        return Err(Error::buffer_too_long(MAX_LINE_SIZE, line.len()));
    }
    if !line.ends_with(b"\r\n") {
        return Err(Error::NoCrlf);
    }

    let verb = <Verb as strum::VariantNames>::VARIANTS
        .iter()
        .find(|i| line.len() >= i.len() && line[..i.len()].eq_ignore_ascii_case(i.as_bytes()));

    Ok(match verb.map(|v| (v.parse::<Verb>(), v.len())) {
        Some((Ok(verb), len)) if verb != Verb::Unknown => (verb, UnparsedArgs(line[len..].to_vec())),
        _ => (Verb::Unknown, UnparsedArgs(line.to_vec())),
    })
}

/// Reader for TCP window
/// it is used only for the internal reader logic and is not exposed to external.
struct ReaderWindow<'win, R: tokio::io::AsyncRead + Unpin + Send> {
    inner: &'win mut R,
    buffer: &'win mut bytes::BytesMut,
    additional_reserve: usize,
}

impl<'win, R> ReaderWindow<'win, R>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    /// Yield the lines available in the buffer, reading the stream only if
    /// the buffer does not hold a complete line yet.
    fn flush_window(
        &'win mut self,
    ) -> impl tokio_stream::Stream<Item = std::io::Result<Vec<u8>>> + 'win {
        async_stream::try_stream! {
            loop {
                if let Some(pos) = find(&self.buffer[..], b"\r\n") {
                    let out = self.buffer.split_to(pos + 2);
                    yield Vec::<u8>::from(out.as_ref());
                    if self.buffer.is_empty() {
                        return;
                    }
                } else {
                    self.buffer.reserve(self.additional_reserve);
                    let read_size = self.inner.read_buf(self.buffer).await?;
                    if read_size == 0 {
                        if !self.buffer.is_empty() {
                            let rest = self.buffer.split();
                            yield Vec::<u8>::from(rest.as_ref());
                        }
                        return;
                    }
                }
            }
        }
    }
}

/// Stream for reading commands from the client.
pub struct Reader<R: tokio::io::AsyncRead + Unpin + Send> {
    inner: R,
    additional_reserve: usize,
    buffer: bytes::BytesMut,
    pipelining_enabled: bool,
}

impl<R: tokio::io::AsyncRead + Unpin + Send> Reader<R> {
    /// Create a new stream.
    #[must_use]
    #[inline]
    pub fn new(stream: R, enable_pipelining: bool) -> Self {
        Self {
            inner: stream,
            additional_reserve: 100,
            buffer: bytes::BytesMut::with_capacity(80),
            pipelining_enabled: enable_pipelining,
        }
    }

    /// Consume the instance and return the underlying reader.
    #[must_use]
    #[inline]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn to_window_reader(&mut self) -> ReaderWindow<'_, R> {
        ReaderWindow {
            inner: &mut self.inner,
            buffer: &mut self.buffer,
            additional_reserve: self.additional_reserve,
        }
    }

    /// Produce a stream of batches, one batch per TCP window. Without
    /// pipelining each batch holds a single command.
    ///
    /// An empty batch means the client closed the connection.
    #[inline]
    pub fn as_window_stream(&mut self) -> impl tokio_stream::Stream<Item = std::io::Result<Batch>> + '_ {
        let pipelined = self.pipelining_enabled;
        async_stream::stream! {
            loop {
                let mut batch: Batch = vec![];
                let mut window_reader = self.to_window_reader();

                let window_content = window_reader.flush_window();
                tokio::pin!(window_content);
                while let Some(line) = window_content.next().await {
                    match line {
                        Ok(line) => batch.push(parse_command_line(&line)),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                    if !pipelined {
                        break;
                    }
                }
                let is_empty = batch.is_empty();
                yield Ok(batch);
                if is_empty {
                    return;
                }
            }
        }
    }

    /// Produce a stream of "\r\n" terminated lines.
    #[inline]
    pub fn as_line_stream(&mut self) -> impl tokio_stream::Stream<Item = std::io::Result<Vec<u8>>> + '_ {
        async_stream::try_stream! {
            loop {
                if let Some(pos) = find(&self.buffer[..], b"\r\n") {
                    let out = self.buffer.split_to(pos + 2);
                    yield Vec::<u8>::from(out.as_ref());
                } else {
                    self.buffer.reserve(self.additional_reserve);
                    let read_size = self.inner.read_buf(&mut self.buffer).await?;
                    if read_size == 0 {
                        if !self.buffer.is_empty() {
                            tracing::warn!(remaining = self.buffer.len(), "Connection closed in the middle of a line.");
                            self.buffer.clear();
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Produce the lines of a message sent after `DATA`, dot-unstuffed, until
    /// the terminating `.\r\n` (excluded).
    ///
    /// When the message exceeds `size_limit`, the rest of it is still consumed
    /// and a single error is produced at the end.
    #[inline]
    pub fn as_message_stream(
        &mut self,
        size_limit: usize,
    ) -> impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + '_ {
        async_stream::stream! {
            let mut size = 0;

            for await line in self.as_line_stream() {
                let mut line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        yield Err(e.into());
                        return;
                    }
                };
                tracing::trace!("<< {:?}", std::str::from_utf8(&line));

                if line == b".\r\n" {
                    if size >= size_limit {
                        yield Err(Error::buffer_too_long(size_limit, size));
                    }
                    return;
                }
                if line.first() == Some(&b'.') {
                    line.remove(0);
                }

                size += line.len();
                if size < size_limit {
                    yield Ok(line);
                }
            }

            yield Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use crate::{command::Verb, Error, ParseArgsError, UnparsedArgs};

    #[test_log::test(tokio::test)]
    async fn flush_window_several_lines() {
        let input = [
            "MAIL FROM:<mrose@dbc.mtview.ca.us>\r\n",
            "RCPT TO:<ned@innosoft.com>\r\n",
            "RCPT TO:<dan@innosoft.com>\r\n",
        ]
        .concat();

        let mut reader = super::Reader::new(std::io::Cursor::new(input), true);
        let mut window = reader.to_window_reader();

        let output_stream = window.flush_window();
        tokio::pin!(output_stream);

        assert_eq!(
            output_stream.try_next().await.unwrap(),
            Some(b"MAIL FROM:<mrose@dbc.mtview.ca.us>\r\n".to_vec()),
        );
        assert_eq!(
            output_stream.try_next().await.unwrap(),
            Some(b"RCPT TO:<ned@innosoft.com>\r\n".to_vec()),
        );
        assert_eq!(
            output_stream.try_next().await.unwrap(),
            Some(b"RCPT TO:<dan@innosoft.com>\r\n".to_vec()),
        );
        assert_eq!(output_stream.try_next().await.unwrap(), None);
    }

    #[test_log::test(tokio::test)]
    async fn window_stream_pipelined() {
        let input = [
            "MAIL FROM:<mrose@dbc.mtview.ca.us>\r\n",
            "rcpt to:<ned@innosoft.com>\r\n",
            "RCPT TO:<dan@innosoft.com>",
        ]
        .concat();

        let mut reader = super::Reader::new(std::io::Cursor::new(input), true);
        let stream = reader.as_window_stream();
        tokio::pin!(stream);

        let batch = stream.try_next().await.unwrap().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(
            batch[0].as_ref().unwrap(),
            &(
                Verb::MailFrom,
                UnparsedArgs(b"<mrose@dbc.mtview.ca.us>\r\n".to_vec())
            )
        );
        assert_eq!(
            batch[1].as_ref().unwrap(),
            &(Verb::RcptTo, UnparsedArgs(b"<ned@innosoft.com>\r\n".to_vec()))
        );
        assert!(matches!(batch[2], Err(Error::NoCrlf)));
    }

    #[test_log::test(tokio::test)]
    async fn window_stream_not_pipelined() {
        let input = ["NOOP\r\n", "HELP\r\n", "FOOBAR\r\n"].concat();

        let mut reader = super::Reader::new(std::io::Cursor::new(input), false);
        let stream = reader.as_window_stream();
        tokio::pin!(stream);

        let mut verbs = vec![];
        while let Some(batch) = stream.try_next().await.unwrap() {
            if batch.is_empty() {
                break;
            }
            assert_eq!(batch.len(), 1);
            verbs.extend(batch.into_iter().map(|cmd| cmd.unwrap().0));
        }
        assert_eq!(verbs, vec![Verb::Noop, Verb::Help, Verb::Unknown]);
    }

    #[test_log::test(tokio::test)]
    async fn window_stream_no_lines() {
        let mut reader = super::Reader::new(std::io::Cursor::new(String::new()), true);
        let stream = reader.as_window_stream();
        tokio::pin!(stream);
        let output = stream.try_next().await.unwrap().unwrap();
        assert!(output.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn line_too_long() {
        let input = format!("HELO {}\r\n", "a".repeat(super::MAX_LINE_SIZE));
        let mut reader = super::Reader::new(std::io::Cursor::new(input), true);
        let stream = reader.as_window_stream();
        tokio::pin!(stream);
        let batch = stream.try_next().await.unwrap().unwrap();
        assert!(matches!(
            batch[0],
            Err(Error::ParseArgs(ParseArgsError::BufferTooLong { .. }))
        ));
    }

    #[test_log::test(tokio::test)]
    async fn message_dot_unstuffing() {
        let input = [
            "Subject: test\r\n",
            "\r\n",
            "..leading dot\r\n",
            ".\r\n",
            "QUIT\r\n",
        ]
        .concat();
        let mut reader = super::Reader::new(std::io::Cursor::new(input), true);

        let lines = reader
            .as_message_stream(1_000)
            .collect::<Result<Vec<_>, _>>()
            .await
            .unwrap();
        pretty_assertions::assert_eq!(
            lines.concat(),
            b"Subject: test\r\n\r\n.leading dot\r\n".to_vec()
        );

        let rest = reader.as_line_stream();
        tokio::pin!(rest);
        assert_eq!(rest.try_next().await.unwrap(), Some(b"QUIT\r\n".to_vec()));
    }

    #[test_log::test(tokio::test)]
    async fn message_too_long() {
        let input = ["0123456789\r\n", "0123456789\r\n", ".\r\n", "QUIT\r\n"].concat();
        let mut reader = super::Reader::new(std::io::Cursor::new(input), true);

        let items = reader.as_message_stream(16).collect::<Vec<_>>().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(
            items[1],
            Err(Error::ParseArgs(ParseArgsError::BufferTooLong { .. }))
        ));

        let rest = reader.as_line_stream();
        tokio::pin!(rest);
        assert_eq!(rest.try_next().await.unwrap(), Some(b"QUIT\r\n".to_vec()));
    }
}
