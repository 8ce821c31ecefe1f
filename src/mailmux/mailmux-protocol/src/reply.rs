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

/// Three digits code of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// The numeric value.
    #[must_use]
    #[inline]
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Transient (4yz) or permanent (5yz) failure.
    #[must_use]
    #[inline]
    pub const fn is_error(self) -> bool {
        self.0 >= 400
    }
}

impl std::fmt::Display for ReplyCode {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reply sent to the client, stored with its CRLF terminator(s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: ReplyCode,
    raw: String,
}

/// The buffer is not a well formed reply.
#[derive(Debug, thiserror::Error)]
#[error("invalid reply '{input}': {reason}")]
pub struct ParseReplyError {
    input: String,
    reason: &'static str,
}

impl Reply {
    /// Build a reply from a code and a text, multi-line if `text` has several lines.
    #[must_use]
    pub fn new(code: u16, text: &str) -> Self {
        let lines = text.lines().collect::<Vec<_>>();
        let raw = match lines.split_last() {
            None => format!("{code} \r\n"),
            Some((last, firsts)) => firsts
                .iter()
                .map(|line| format!("{code}-{line}\r\n"))
                .chain(std::iter::once(format!("{code} {last}\r\n")))
                .collect(),
        };
        Self {
            code: ReplyCode(code),
            raw,
        }
    }

    /// Code of the reply.
    #[must_use]
    #[inline]
    pub const fn code(&self) -> ReplyCode {
        self.code
    }

    /// Text of the reply without the codes and the line terminators.
    #[must_use]
    pub fn text(&self) -> String {
        self.raw
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .map(|line| line.get(4..).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl std::str::FromStr for Reply {
    type Err = ParseReplyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = |reason| ParseReplyError {
            input: s.to_string(),
            reason,
        };

        let body = s.strip_suffix("\r\n").ok_or_else(|| error("missing CRLF"))?;
        let code = body
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|code| (200..600).contains(code))
            .ok_or_else(|| error("bad code"))?;

        let lines = body.split("\r\n").collect::<Vec<_>>();
        for (idx, line) in lines.iter().enumerate() {
            let separator = if idx + 1 == lines.len() { ' ' } else { '-' };
            if line.get(..3) != body.get(..3) {
                return Err(error("inconsistent code"));
            }
            match line.chars().nth(3) {
                Some(c) if c == separator => {}
                None if idx + 1 == lines.len() => {}
                _ => return Err(error("bad separator")),
            }
        }

        Ok(Self {
            code: ReplyCode(code),
            raw: s.to_string(),
        })
    }
}

impl AsRef<str> for Reply {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for Reply {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::Reply;

    #[test]
    fn parse() {
        let reply = "250 Ok\r\n".parse::<Reply>().unwrap();
        assert_eq!(reply.code().value(), 250);
        assert!(!reply.code().is_error());
        assert_eq!(reply.text(), "Ok");

        let reply = "250-localhost\r\n250 SMTPUTF8\r\n".parse::<Reply>().unwrap();
        assert_eq!(reply.text(), "localhost\nSMTPUTF8");

        assert!("451 Timeout\r\n".parse::<Reply>().unwrap().code().is_error());
    }

    #[rstest::rstest]
    #[case("250 Ok")]
    #[case("25 Ok\r\n")]
    #[case("abc Ok\r\n")]
    #[case("700 Ok\r\n")]
    #[case("250-Ok\r\n")]
    #[case("250-a\r\n251 b\r\n")]
    fn parse_invalid(#[case] input: &str) {
        assert!(input.parse::<Reply>().is_err(), "{input}");
    }

    #[test]
    fn new_multiline() {
        let reply = Reply::new(250, "localhost\nAUTH PLAIN\nSMTPUTF8");
        pretty_assertions::assert_eq!(
            reply.as_ref(),
            "250-localhost\r\n250-AUTH PLAIN\r\n250 SMTPUTF8\r\n"
        );
        pretty_assertions::assert_eq!(reply, reply.as_ref().parse::<Reply>().unwrap());
    }
}
