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

use crate::{sasl::Mechanism, Error, ParseArgsError};

macro_rules! strip_suffix_crlf {
    ($v:expr) => {
        $v.0.strip_suffix(b"\r\n")
            .ok_or(ParseArgsError::InvalidArgs)?
    };
}

fn strip_quote(input: &[u8]) -> Result<&[u8], ParseArgsError> {
    input
        .strip_prefix(b"<")
        .ok_or(ParseArgsError::InvalidArgs)?
        .strip_suffix(b">")
        .ok_or(ParseArgsError::InvalidArgs)
}

/// Buffer received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct UnparsedArgs(pub Vec<u8>);

/// A verb and its arguments.
pub type Command<Verb, Args> = (Verb, Args);

/// Commands read in one TCP window.
pub type Batch = Vec<Result<Command<Verb, UnparsedArgs>, Error>>;

/// Information received from the client at the connection TCP/IP.
#[non_exhaustive]
pub struct AcceptArgs {
    /// Peer address of the connection.
    pub client_addr: std::net::SocketAddr,
    /// Address of the server which accepted the connection.
    pub server_addr: std::net::SocketAddr,
    /// Instant when the connection was accepted.
    pub timestamp: time::OffsetDateTime,
    /// Universal unique identifier of the connection.
    pub uuid: uuid::Uuid,
}

impl AcceptArgs {
    /// Create a new instance.
    #[inline]
    #[must_use]
    pub const fn new(
        client_addr: std::net::SocketAddr,
        server_addr: std::net::SocketAddr,
        timestamp: time::OffsetDateTime,
        uuid: uuid::Uuid,
    ) -> Self {
        Self {
            client_addr,
            server_addr,
            timestamp,
            uuid,
        }
    }
}

/// Name given by the client in HELO/EHLO.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::exhaustive_enums)]
pub enum ClientName {
    /// FQDN of the client.
    Domain(String),
    /// `[a.b.c.d]`
    Ip4(std::net::Ipv4Addr),
    /// `[IPv6:...]`
    Ip6(std::net::Ipv6Addr),
}

impl std::fmt::Display for ClientName {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Domain(domain) => write!(f, "{domain}"),
            Self::Ip4(ip) => write!(f, "[{ip}]"),
            Self::Ip6(ip) => write!(f, "[IPv6:{ip}]"),
        }
    }
}

/// Information received from the client at the HELO command.
#[non_exhaustive]
pub struct HeloArgs {
    /// Name of the client.
    pub client_name: String,
}

/// Information received from the client at the EHLO command.
#[non_exhaustive]
pub struct EhloArgs {
    /// Name of the client.
    pub client_name: ClientName,
}

/// See "SMTP Service Extension for 8-bit MIME Transport"
/// <https://datatracker.ietf.org/doc/html/rfc6152>
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumVariantNames, strum::EnumString)]
pub enum MimeBodyType {
    ///
    #[strum(serialize = "7BIT")]
    SevenBit,
    ///
    #[strum(serialize = "8BITMIME")]
    EightBitMime,
}

/// Information received from the client at the MAIL FROM command.
#[non_exhaustive]
pub struct MailFromArgs {
    /// Sender address, `None` for the null reverse path `<>`.
    pub reverse_path: Option<String>,
    /// (8BITMIME)
    pub mime_body_type: Option<MimeBodyType>,
    /// (SIZE)
    pub size: Option<usize>,
    /// smtputf8 extension allowing utf8 email
    pub use_smtputf8: bool,
}

/// Information received from the client at the RCPT TO command.
#[non_exhaustive]
pub struct RcptToArgs {
    /// Recipient address.
    pub forward_path: String,
}

/// Information received from the client at the AUTH command.
#[non_exhaustive]
pub struct AuthArgs {
    /// Authentication mechanism.
    pub mechanism: Mechanism,
    /// First buffer of the challenge, optionally issued by the server.
    /// [`base64`] encoded buffer.
    pub initial_response: Option<Vec<u8>>,
}

fn split_args(slice: &[u8]) -> Option<(&[u8], &[u8])> {
    slice.iter().position(|c| *c == b'=').map(|pos| {
        let (k, v) = slice.split_at(pos);
        (k, &v[1..])
    })
}

fn is_domain_like(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

// local@domain, or the special `postmaster` recipient
fn parse_mailbox(raw: &[u8], use_smtputf8: bool) -> Result<String, ParseArgsError> {
    let mailbox = String::from_utf8(raw.to_vec())?;
    if !use_smtputf8 && !mailbox.is_ascii() {
        return Err(ParseArgsError::EmailUnavailable);
    }
    if mailbox.eq_ignore_ascii_case("postmaster") {
        return Ok(mailbox);
    }
    match mailbox.rsplit_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !mailbox.chars().any(|c| c.is_whitespace() || c.is_control()) =>
        {
            Ok(mailbox)
        }
        _ => Err(ParseArgsError::InvalidMailAddress { mail: mailbox }),
    }
}

impl TryFrom<UnparsedArgs> for HeloArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let value = String::from_utf8(strip_suffix_crlf!(value).to_vec())?;

        if !is_domain_like(&value) {
            return Err(ParseArgsError::InvalidArgs);
        }
        Ok(Self { client_name: value })
    }
}

impl TryFrom<UnparsedArgs> for EhloArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let value = String::from_utf8(strip_suffix_crlf!(value).to_vec())?;

        if !value.is_ascii() {
            return Err(ParseArgsError::InvalidArgs);
        }

        let client_name = match &value {
            ipv6 if ipv6.to_lowercase().starts_with("[ipv6:") && ipv6.ends_with(']') => {
                match ipv6.get("[IPv6:".len()..ipv6.len() - 1) {
                    Some(ipv6) => ClientName::Ip6(ipv6.parse::<std::net::Ipv6Addr>()?),
                    None => return Err(ParseArgsError::InvalidArgs),
                }
            }
            ipv4 if ipv4.starts_with('[') && ipv4.ends_with(']') => {
                match ipv4.get(1..ipv4.len() - 1) {
                    Some(ipv4) => ClientName::Ip4(ipv4.parse::<std::net::Ipv4Addr>()?),
                    None => return Err(ParseArgsError::InvalidArgs),
                }
            }
            domain if is_domain_like(domain) => ClientName::Domain(domain.clone()),
            _ => return Err(ParseArgsError::InvalidArgs),
        };

        Ok(Self { client_name })
    }
}

impl TryFrom<UnparsedArgs> for AuthArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let value = strip_suffix_crlf!(value);

        let (mechanism, initial_response) = if let Some((idx, _)) = value
            .iter()
            .copied()
            .enumerate()
            .find(|&(_, c)| c.is_ascii_whitespace())
        {
            let (mechanism, initial_response) = value.split_at(idx);
            (
                mechanism.to_vec(),
                Some(
                    initial_response
                        .get(1..)
                        .ok_or(ParseArgsError::InvalidArgs)?
                        .to_vec(),
                ),
            )
        } else {
            (value.to_vec(), None)
        };

        let mechanism = String::from_utf8(mechanism)?
            .parse()
            .map_err(|_err| ParseArgsError::InvalidArgs)?;

        Ok(Self {
            mechanism,
            initial_response,
        })
    }
}

impl MailFromArgs {
    fn parse_arguments(&mut self, raw_args: &[u8]) -> Result<(), ParseArgsError> {
        match split_args(raw_args) {
            Some((key, value)) if key.eq_ignore_ascii_case(b"BODY") => {
                if self.mime_body_type.is_some() {
                    return Err(ParseArgsError::InvalidArgs);
                }
                self.mime_body_type = Some(
                    std::str::from_utf8(value)?
                        .to_ascii_uppercase()
                        .parse()
                        .map_err(|_e| ParseArgsError::InvalidArgs)?,
                );
                Ok(())
            }
            Some((key, value)) if key.eq_ignore_ascii_case(b"SIZE") => {
                if self.size.is_some() {
                    return Err(ParseArgsError::InvalidArgs);
                }
                self.size = Some(
                    std::str::from_utf8(value)?
                        .parse()
                        .map_err(|_e| ParseArgsError::InvalidArgs)?,
                );
                Ok(())
            }
            // RFC 4954 AUTH parameter, accepted and ignored
            Some((key, _)) if key.eq_ignore_ascii_case(b"AUTH") => Ok(()),
            _ => Err(ParseArgsError::InvalidArgs),
        }
    }

    fn parse_options(&mut self, raw_args: &[u8]) -> Result<(), ParseArgsError> {
        if raw_args.eq_ignore_ascii_case(b"SMTPUTF8") {
            self.use_smtputf8 = true;
            Ok(())
        } else {
            Err(ParseArgsError::InvalidArgs)
        }
    }
}

impl TryFrom<UnparsedArgs> for MailFromArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let value = strip_suffix_crlf!(value);

        let mut args = value
            .split(u8::is_ascii_whitespace)
            .filter(|s| !s.is_empty());

        let mailbox = strip_quote(args.next().ok_or(ParseArgsError::InvalidArgs)?)?;

        let mut result = Self {
            reverse_path: None,
            mime_body_type: None,
            size: None,
            use_smtputf8: false,
        };

        for arg in args {
            if arg.contains(&b'=') {
                result.parse_arguments(arg)?;
            } else {
                result.parse_options(arg)?;
            }
        }

        if !mailbox.is_empty() {
            result.reverse_path = Some(parse_mailbox(mailbox, result.use_smtputf8)?);
        }
        Ok(result)
    }
}

impl TryFrom<UnparsedArgs> for RcptToArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let value = strip_suffix_crlf!(value);

        let mut args = value
            .split(u8::is_ascii_whitespace)
            .filter(|s| !s.is_empty());

        let mailbox = strip_quote(args.next().ok_or(ParseArgsError::InvalidArgs)?)?;
        if mailbox.is_empty() || args.next().is_some() {
            return Err(ParseArgsError::InvalidArgs);
        }

        Ok(Self {
            forward_path: parse_mailbox(mailbox, true)?,
        })
    }
}

/// SMTP Command.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::EnumVariantNames,
)]
#[non_exhaustive]
pub enum Verb {
    /// Used to identify the SMTP client to the SMTP server. (historical)
    #[strum(serialize = "HELO ")]
    Helo,
    /// Used to identify the SMTP client to the SMTP server and request smtp extensions.
    #[strum(serialize = "EHLO ")]
    Ehlo,
    /// Start a mail transaction.
    #[strum(serialize = "MAIL FROM:")]
    MailFrom,
    /// Add one recipient to the transaction.
    #[strum(serialize = "RCPT TO:")]
    RcptTo,
    /// Start the transfer of the message content.
    #[strum(serialize = "DATA\r\n")]
    Data,
    /// The receiver MUST send a "221 OK" reply, and then close the transmission channel.
    #[strum(serialize = "QUIT\r\n")]
    Quit,
    /// Abort the current mail transaction.
    #[strum(serialize = "RSET\r\n")]
    Rset,
    /// Ask for helpful information.
    #[strum(serialize = "HELP")]
    Help,
    /// No effect.
    #[strum(serialize = "NOOP\r\n")]
    Noop,
    /// Upgrade the connection to TLS. Not offered by this receiver.
    #[strum(serialize = "STARTTLS\r\n")]
    StartTls,
    /// Start a SASL exchange.
    #[strum(serialize = "AUTH ")]
    Auth,
    /// Any other buffer received.
    Unknown,
}

impl Verb {
    /// The reply of this verb can wait in the buffer until the end of the
    /// window (RFC 2920 section 3.1).
    #[must_use]
    #[inline]
    pub const fn is_bufferable(self) -> bool {
        matches!(self, Self::MailFrom | Self::RcptTo | Self::Rset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(input: &str) -> UnparsedArgs {
        UnparsedArgs(input.as_bytes().to_vec())
    }

    #[test]
    fn mail_from() {
        let parsed = MailFromArgs::try_from(args("<john@doe.com> BODY=8bitmime SIZE=1024\r\n"))
            .unwrap();
        assert_eq!(parsed.reverse_path.as_deref(), Some("john@doe.com"));
        assert_eq!(parsed.mime_body_type, Some(MimeBodyType::EightBitMime));
        assert_eq!(parsed.size, Some(1024));
        assert!(!parsed.use_smtputf8);

        let parsed = MailFromArgs::try_from(args("<>\r\n")).unwrap();
        assert_eq!(parsed.reverse_path, None);

        let parsed = MailFromArgs::try_from(args("<jöhn@doe.com> SMTPUTF8\r\n")).unwrap();
        assert_eq!(parsed.reverse_path.as_deref(), Some("jöhn@doe.com"));
    }

    #[rstest::rstest]
    #[case("john@doe.com\r\n")]
    #[case("<john@doe.com>")]
    #[case("<john>\r\n")]
    #[case("<jöhn@doe.com>\r\n")]
    #[case("<john@doe.com> FOO=BAR\r\n")]
    #[case("<john@doe.com> SIZE=abc\r\n")]
    fn mail_from_invalid(#[case] input: &str) {
        assert!(MailFromArgs::try_from(args(input)).is_err(), "{input:?}");
    }

    #[test]
    fn rcpt_to() {
        let parsed = RcptToArgs::try_from(args("<jane@doe.com>\r\n")).unwrap();
        assert_eq!(parsed.forward_path, "jane@doe.com");

        let parsed = RcptToArgs::try_from(args("<Postmaster>\r\n")).unwrap();
        assert_eq!(parsed.forward_path, "Postmaster");

        assert!(RcptToArgs::try_from(args("<>\r\n")).is_err());
        assert!(RcptToArgs::try_from(args("<a@b> NOTIFY=NEVER\r\n")).is_err());
    }

    #[test]
    fn ehlo() {
        let parsed = EhloArgs::try_from(args("mail.example.com\r\n")).unwrap();
        assert_eq!(
            parsed.client_name,
            ClientName::Domain("mail.example.com".to_string())
        );

        let parsed = EhloArgs::try_from(args("[127.0.0.1]\r\n")).unwrap();
        assert_eq!(parsed.client_name.to_string(), "[127.0.0.1]");

        let parsed = EhloArgs::try_from(args("[IPv6:::1]\r\n")).unwrap();
        assert_eq!(
            parsed.client_name,
            ClientName::Ip6(std::net::Ipv6Addr::LOCALHOST)
        );

        assert!(EhloArgs::try_from(args("القيام\r\n")).is_err());
        assert!(EhloArgs::try_from(args("foo bar\r\n")).is_err());
    }

    #[test]
    fn auth() {
        let parsed = AuthArgs::try_from(args("PLAIN AGpvaG4Ac2VjcmV0\r\n")).unwrap();
        assert_eq!(parsed.mechanism, Mechanism::Plain);
        assert_eq!(
            parsed.initial_response.as_deref(),
            Some(b"AGpvaG4Ac2VjcmV0".as_slice())
        );

        let parsed = AuthArgs::try_from(args("plain\r\n")).unwrap();
        assert_eq!(parsed.mechanism, Mechanism::Plain);
        assert_eq!(parsed.initial_response, None);

        let parsed = AuthArgs::try_from(args("CRAM-MD5\r\n")).unwrap();
        assert_eq!(parsed.mechanism, Mechanism::CramMd5);

        assert!(AuthArgs::try_from(args("FOO-BAR\r\n")).is_err());
    }
}
