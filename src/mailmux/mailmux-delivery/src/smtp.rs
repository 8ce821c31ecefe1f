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

use crate::{Envelope, Relay, RelayError};
use lettre::transport::smtp::{
    authentication::{Credentials, Mechanism},
    client::{Tls, TlsParameters},
    extension::ClientId,
};
use mailmux_config::field::{Downstream, FieldServerRelay, RelayTls};

/// [`Relay`] over a blocking `lettre` SMTP transport, one connection per message.
#[derive(Debug, Clone)]
pub struct SmtpRelay {
    hello_name: String,
    timeout: std::time::Duration,
    tls: RelayTls,
}

impl SmtpRelay {
    /// Create a relay introducing itself as `hello_name` to the downstreams.
    #[must_use]
    #[inline]
    pub fn new(hello_name: impl Into<String>, config: &FieldServerRelay) -> Self {
        Self {
            hello_name: hello_name.into(),
            timeout: config.timeout,
            tls: config.tls,
        }
    }

    fn transport(
        &self,
        downstream: &Downstream,
        timeout: std::time::Duration,
    ) -> Result<lettre::SmtpTransport, RelayError> {
        let (host, port) = downstream.host_port()?;

        let tls = match self.tls {
            RelayTls::Opportunistic => Tls::Opportunistic(
                TlsParameters::new(host.to_string()).map_err(|e| RelayError::Transport {
                    addr: downstream.addr.clone(),
                    message: e.to_string(),
                })?,
            ),
            RelayTls::None => Tls::None,
        };

        Ok(lettre::SmtpTransport::builder_dangerous(host)
            .port(port)
            .hello_name(ClientId::Domain(self.hello_name.clone()))
            .credentials(Credentials::new(
                downstream.user.clone(),
                downstream.pass.clone(),
            ))
            .authentication(vec![Mechanism::Plain])
            .tls(tls)
            .timeout(Some(timeout))
            .build())
    }
}

fn to_lettre_envelope(envelope: &Envelope) -> Result<lettre::address::Envelope, RelayError> {
    let parse = |mailbox: &String| {
        mailbox
            .parse::<lettre::Address>()
            .map_err(|e| RelayError::Envelope(format!("'{mailbox}': {e}")))
    };

    lettre::address::Envelope::new(
        envelope.sender.as_ref().map(parse).transpose()?,
        envelope
            .recipients
            .iter()
            .map(parse)
            .collect::<Result<Vec<_>, _>>()?,
    )
    .map_err(|e| RelayError::Envelope(e.to_string()))
}

impl Relay for SmtpRelay {
    #[tracing::instrument(skip_all, fields(downstream = %downstream.addr), err)]
    fn send(
        &self,
        downstream: &Downstream,
        envelope: &Envelope,
        body: &[u8],
        limit: Option<std::time::Duration>,
    ) -> Result<(), RelayError> {
        let timeout = limit.map_or(self.timeout, |limit| limit.min(self.timeout));
        if timeout.is_zero() {
            return Err(RelayError::Transport {
                addr: downstream.addr.clone(),
                message: "no time left to relay".to_string(),
            });
        }
        let transport = self.transport(downstream, timeout)?;
        let lettre_envelope = to_lettre_envelope(envelope)?;

        // lettre terminates the data with CRLF.CRLF itself
        let body = body.strip_suffix(b"\r\n").unwrap_or(body);

        let response = lettre::Transport::send_raw(&transport, &lettre_envelope, body).map_err(
            |e| RelayError::Transport {
                addr: downstream.addr.clone(),
                message: e.to_string(),
            },
        )?;

        tracing::info!(
            recipients = envelope.recipients.len(),
            code = %response.code(),
            "Message relayed."
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use std::io::{BufRead, Write};

    fn relay_config() -> FieldServerRelay {
        FieldServerRelay {
            timeout: std::time::Duration::from_secs(5),
            tls: RelayTls::None,
        }
    }

    fn downstream(port: u16) -> Downstream {
        Downstream {
            addr: format!("127.0.0.1:{port}"),
            user: "relay-user".to_string(),
            pass: "relay-pass".to_string(),
        }
    }

    /// Accept one connection and record what the client sends.
    fn fake_downstream() -> (u16, std::thread::JoinHandle<Vec<String>>) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut seen = vec![];

            writer.write_all(b"220 downstream ESMTP\r\n").unwrap();
            let mut in_data = false;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    break;
                }
                let line = line.trim_end_matches("\r\n").to_string();

                if in_data {
                    if line == "." {
                        in_data = false;
                        writer.write_all(b"250 queued\r\n").unwrap();
                    } else {
                        seen.push(format!("body:{line}"));
                    }
                    continue;
                }

                let verb = line.get(..4).unwrap_or_default().to_string();
                let reply: &[u8] = match verb.as_str() {
                    "EHLO" => b"250-downstream\r\n250 AUTH PLAIN\r\n",
                    "AUTH" => b"235 ok\r\n",
                    "MAIL" | "RCPT" => b"250 ok\r\n",
                    "DATA" => {
                        in_data = true;
                        b"354 go ahead\r\n"
                    }
                    "QUIT" => {
                        seen.push(line);
                        let _closed = writer.write_all(b"221 bye\r\n");
                        break;
                    }
                    _ => b"500 what\r\n",
                };
                seen.push(line);
                writer.write_all(reply).unwrap();
            }
            seen
        });

        (port, handle)
    }

    #[test_log::test]
    fn relay_with_downstream_credentials() {
        let (port, server) = fake_downstream();
        let relay = SmtpRelay::new("proxy.example", &relay_config());

        relay
            .send(
                &downstream(port),
                &Envelope {
                    sender: Some("john@doe.com".to_string()),
                    recipients: vec!["jane@doe.com".to_string(), "jim@doe.com".to_string()],
                },
                b"Subject: hi\r\n\r\nhello\r\n",
                None,
            )
            .unwrap();

        let seen = server.join().unwrap();
        let plain = base64::engine::general_purpose::STANDARD.encode("\0relay-user\0relay-pass");
        pretty_assertions::assert_eq!(
            seen,
            vec![
                "EHLO proxy.example".to_string(),
                format!("AUTH PLAIN {plain}"),
                "MAIL FROM:<john@doe.com>".to_string(),
                "RCPT TO:<jane@doe.com>".to_string(),
                "RCPT TO:<jim@doe.com>".to_string(),
                "DATA".to_string(),
                "body:Subject: hi".to_string(),
                "body:".to_string(),
                "body:hello".to_string(),
                "QUIT".to_string(),
            ]
        );
    }

    #[test_log::test]
    fn relay_null_reverse_path() {
        let (port, server) = fake_downstream();
        let relay = SmtpRelay::new("proxy.example", &relay_config());

        relay
            .send(
                &downstream(port),
                &Envelope {
                    sender: None,
                    recipients: vec!["jane@doe.com".to_string()],
                },
                b"hello\r\n",
                None,
            )
            .unwrap();

        let seen = server.join().unwrap();
        assert!(seen.contains(&"MAIL FROM:<>".to_string()), "{seen:?}");
    }

    #[test_log::test]
    fn downstream_unreachable() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let relay = SmtpRelay::new("proxy.example", &relay_config());

        let error = relay
            .send(
                &downstream(port),
                &Envelope {
                    sender: Some("john@doe.com".to_string()),
                    recipients: vec!["jane@doe.com".to_string()],
                },
                b"hello\r\n",
                None,
            )
            .unwrap_err();
        assert!(
            matches!(&error, RelayError::Transport { addr, .. } if *addr == format!("127.0.0.1:{port}")),
            "{error}"
        );
    }

    #[test]
    fn invalid_envelope() {
        let relay = SmtpRelay::new("proxy.example", &relay_config());
        let error = relay
            .send(
                &downstream(25),
                &Envelope {
                    sender: Some("john@doe.com".to_string()),
                    recipients: vec!["not a mailbox".to_string()],
                },
                b"hello\r\n",
                None,
            )
            .unwrap_err();
        assert!(matches!(error, RelayError::Envelope(_)), "{error}");
    }

    #[test]
    fn invalid_downstream_addr() {
        let relay = SmtpRelay::new("proxy.example", &relay_config());
        let error = relay
            .send(
                &Downstream {
                    addr: "no-port".to_string(),
                    user: String::new(),
                    pass: String::new(),
                },
                &Envelope::default(),
                b"",
                None,
            )
            .unwrap_err();
        assert!(matches!(error, RelayError::InvalidDownstream(_)), "{error}");
    }

    #[test_log::test]
    fn limit_caps_the_relay_timeout() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // accepts, never greets
        let silent = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            std::thread::sleep(std::time::Duration::from_secs(2));
            drop(stream);
        });

        let relay = SmtpRelay::new("proxy.example", &relay_config());
        let started = std::time::Instant::now();
        let error = relay
            .send(
                &downstream(port),
                &Envelope {
                    sender: Some("john@doe.com".to_string()),
                    recipients: vec!["jane@doe.com".to_string()],
                },
                b"hello\r\n",
                Some(std::time::Duration::from_millis(200)),
            )
            .unwrap_err();

        assert!(matches!(error, RelayError::Transport { .. }), "{error}");
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        silent.join().unwrap();
    }

    #[test]
    fn no_time_left() {
        let relay = SmtpRelay::new("proxy.example", &relay_config());
        let error = relay
            .send(
                &downstream(25),
                &Envelope::default(),
                b"",
                Some(std::time::Duration::ZERO),
            )
            .unwrap_err();
        assert!(
            matches!(&error, RelayError::Transport { message, .. } if message == "no time left to relay"),
            "{error}"
        );
    }
}
