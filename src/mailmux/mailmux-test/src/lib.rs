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


//! End-to-end test harness of mailmux: plays SMTP conversations against the
//! proxy's handler over an in-memory stream and records what gets relayed.

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

/// Configurations used by the scenarios.
pub mod config;
mod relay;

#[cfg(test)]
mod tests;

pub use relay::{RecordingRelay, Sent};

use mailmux_config::Config;
use mailmux_delivery::Relay;
use mailmux_protocol::{AcceptArgs, Receiver};
use mailmux_selector::Dispatcher;
use mailmux_server::Handler;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_stream::StreamExt;

const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Initial response of `AUTH PLAIN`, base64 encoded.
#[must_use]
pub fn plain(identity: &str, username: &str, password: &str) -> String {
    base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        format!("{identity}\0{username}\0{password}"),
    )
}

async fn read_reply<R: tokio::io::AsyncRead + Unpin>(read: &mut R, len: usize) -> String {
    let mut buffer = vec![0; len];
    let mut filled = 0;

    while filled < len {
        match tokio::time::timeout(READ_TIMEOUT, read.read(&mut buffer[filled..])).await {
            Ok(Ok(0) | Err(_)) | Err(_) => break,
            Ok(Ok(n)) => filled += n,
        }
    }

    buffer.truncate(filled);
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Play `input` against a fresh connection and collect the replies.
///
/// The first reply is the greeting, then one reply per input. Each reply is
/// read up to the length of its `expected` counterpart, so a diverging server
/// shows up as a mismatch rather than a hang.
pub async fn converse(
    config: std::sync::Arc<Config>,
    relay: std::sync::Arc<dyn Relay>,
    input: &[String],
    expected: &[String],
) -> Vec<String> {
    let dispatcher = std::sync::Arc::new(Dispatcher::new(relay, &config.server.selector));
    let (client, server) = tokio::io::duplex(1 << 16);

    let serving = {
        let (read, write) = tokio::io::split(server);
        let receiver = Receiver::<Handler, _, _>::new(
            read,
            write,
            config.server.smtp.error.soft_count,
            config.server.smtp.error.hard_count,
            config.server.message_size_limit,
            config.server.pipelining,
            config.server.smtp.timeout_client,
        );
        let handler = Handler::new(config.clone(), dispatcher);

        tokio::spawn(async move {
            let stream = receiver.into_stream(
                handler,
                AcceptArgs::new(
                    std::net::SocketAddr::from(([127, 0, 0, 1], 53844)),
                    std::net::SocketAddr::from(([127, 0, 0, 1], 10025)),
                    time::OffsetDateTime::now_utc(),
                    uuid::Uuid::new_v4(),
                ),
            );
            tokio::pin!(stream);
            while matches!(stream.next().await, Some(Ok(()))) {}
        })
    };

    let (mut read, mut write) = tokio::io::split(client);
    let mut expected = expected.iter();
    let mut replies = vec![];

    if let Some(greeting) = expected.next() {
        replies.push(read_reply(&mut read, greeting.len()).await);
    }
    for (command, reply) in input.iter().zip(expected) {
        if write.write_all(command.as_bytes()).await.is_err() {
            break;
        }
        replies.push(read_reply(&mut read, reply.len()).await);
    }

    serving.abort();
    replies
}

#[doc(hidden)]
#[macro_export]
macro_rules! or_default {
    ($default:expr) => {
        $default
    };
    ($default:expr, $value:expr) => {
        $value
    };
}

/// Declare a test playing an SMTP conversation.
///
/// `config` defaults to [`config::local_test`], `relay` to a
/// [`RecordingRelay`] accepting everything. `then` receives the messages
/// relayed during the conversation.
#[macro_export]
macro_rules! run_test {
    (
        fn $name:ident,
        input = [ $( $input:expr ),* $(,)? ],
        expected = [ $( $expected:expr ),* $(,)? ],
        $( config = $config:expr, )?
        $( relay = $relay:expr, )?
        $( then = |$sent:ident| $then:block, )?
    ) => {
        #[test_log::test(tokio::test)]
        async fn $name() {
            let config: mailmux_config::Config =
                $crate::or_default!($crate::config::local_test() $(, $config)?);
            let relay = std::sync::Arc::new(
                $crate::or_default!($crate::RecordingRelay::default() $(, $relay)?)
            );

            let input: Vec<String> = vec![ $( $input.to_string() ),* ];
            let expected: Vec<String> = vec![ $( $expected.to_string() ),* ];

            let replies = $crate::converse(
                std::sync::Arc::new(config),
                relay.clone(),
                &input,
                &expected,
            )
            .await;
            pretty_assertions::assert_eq!(replies, expected);

            $(
                let $sent = relay.sent();
                $then
            )?
        }
    };
}
