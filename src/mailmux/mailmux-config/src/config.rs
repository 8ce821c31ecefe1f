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

use self::field::{FieldServer, UserConfig};

/// Process-wide configuration, read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Settings of the listening server, the selectors and the relay.
    #[serde(default)]
    pub server: FieldServer,
    /// Tenants allowed to submit messages.
    #[serde(default)]
    pub users: Vec<UserConfig>,
    /// Path of the file this configuration was read from.
    #[serde(skip)]
    pub path: Option<std::path::PathBuf>,
}

impl Config {
    /// Find the tenant whose email is exactly `email`.
    #[must_use]
    #[inline]
    pub fn find_user(&self, email: &str) -> Option<&UserConfig> {
        self.users.iter().find(|user| user.email == email)
    }

    /// Copy of the configuration with every password replaced, safe to print.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        for user in &mut out.users {
            user.password = field::REDACTED.to_string();
            for downstream in &mut user.downstreams {
                downstream.pass = field::REDACTED.to_string();
            }
        }
        out
    }
}

/// The fields of the configuration.
pub mod field {
    pub(crate) const REDACTED: &str = "<redacted>";

    /// How the selector of a user is executed.
    #[derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        Eq,
        strum::Display,
        strum::EnumString,
        serde_with::SerializeDisplay,
        serde_with::DeserializeFromStr,
    )]
    #[strum(serialize_all = "snake_case")]
    pub enum SelectorKind {
        /// Embedded rhai script defining `fn selector(downstreams)`.
        #[default]
        Script,
        /// Executable speaking the plugin handshake and `Plugin.Select` rpc.
        Plugin,
    }

    /// What happens when a selector cannot be loaded at all.
    #[derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        Eq,
        strum::Display,
        strum::EnumString,
        serde_with::SerializeDisplay,
        serde_with::DeserializeFromStr,
    )]
    #[strum(serialize_all = "snake_case")]
    pub enum FallbackPolicy {
        /// Relay through the first downstream of the pool.
        #[default]
        FirstDownstream,
        /// Report the error to the client.
        None,
    }

    /// Transport security used towards the downstream servers.
    #[derive(
        Debug,
        Default,
        Clone,
        Copy,
        PartialEq,
        Eq,
        strum::Display,
        strum::EnumString,
        serde_with::SerializeDisplay,
        serde_with::DeserializeFromStr,
    )]
    #[strum(serialize_all = "snake_case")]
    pub enum RelayTls {
        /// Use STARTTLS when the downstream advertises it.
        #[default]
        Opportunistic,
        /// Plain text only.
        None,
    }

    /// One downstream SMTP server of a user's pool.
    #[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct Downstream {
        /// `host:port`, unique within a pool.
        pub addr: String,
        /// Login used on this downstream only.
        pub user: String,
        /// Password used on this downstream only.
        pub pass: String,
    }

    impl std::fmt::Debug for Downstream {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Downstream")
                .field("addr", &self.addr)
                .field("user", &self.user)
                .field("pass", &REDACTED)
                .finish()
        }
    }

    impl Downstream {
        /// Split `addr` into its host and port.
        ///
        /// IPv6 literals may be written between brackets (`[::1]:25`), the
        /// brackets are removed from the returned host.
        ///
        /// # Errors
        ///
        /// * no `:` separator, an empty host, or a port that is not a `u16`
        pub fn host_port(&self) -> Result<(&str, u16), crate::ConfigError> {
            let invalid = || crate::ConfigError::InvalidDownstreamAddr {
                addr: self.addr.clone(),
            };

            let (host, port) = self.addr.rsplit_once(':').ok_or_else(invalid)?;
            let host = host
                .strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .unwrap_or(host);
            if host.is_empty() {
                return Err(invalid());
            }
            let port = port.parse::<u16>().map_err(|_| invalid())?;
            Ok((host, port))
        }
    }

    /// A tenant of the proxy.
    #[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct UserConfig {
        /// Authentication identity, unique across users.
        pub email: String,
        /// Plaintext password compared as is.
        pub password: String,
        /// Location of the rhai script or of the plugin executable.
        pub selector_algo_path: std::path::PathBuf,
        /// How `selector_algo_path` is executed.
        #[serde(default)]
        pub selector_kind: SelectorKind,
        /// Ordered pool of downstream servers.
        #[serde(default)]
        pub downstreams: Vec<Downstream>,
    }

    impl std::fmt::Debug for UserConfig {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("UserConfig")
                .field("email", &self.email)
                .field("password", &REDACTED)
                .field("selector_algo_path", &self.selector_algo_path)
                .field("selector_kind", &self.selector_kind)
                .field("downstreams", &self.downstreams)
                .finish()
        }
    }

    impl UserConfig {
        /// The pool entry whose address is exactly `addr`.
        #[must_use]
        #[inline]
        pub fn downstream(&self, addr: &str) -> Option<&Downstream> {
            self.downstreams.iter().find(|d| d.addr == addr)
        }
    }

    /// Settings of the server.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServer {
        /// Name advertised in the greeting and the EHLO reply.
        #[serde(default = "FieldServer::default_name")]
        pub name: String,
        /// Addresses to listen on.
        #[serde(default = "FieldServer::default_addr")]
        pub addr: Vec<std::net::SocketAddr>,
        /// Maximum number of simultaneous clients, `-1` to disable.
        #[serde(default = "FieldServer::default_client_count_max")]
        pub client_count_max: i64,
        /// Maximum size of a message, in bytes.
        #[serde(default = "FieldServer::default_message_size_limit")]
        pub message_size_limit: usize,
        /// Advertise and accept PIPELINING.
        #[serde(default = "FieldServer::default_pipelining")]
        pub pipelining: bool,
        ///
        #[serde(default)]
        pub logs: FieldServerLogs,
        ///
        #[serde(default)]
        pub smtp: FieldServerSMTP,
        ///
        #[serde(default)]
        pub selector: FieldServerSelector,
        ///
        #[serde(default)]
        pub relay: FieldServerRelay,
    }

    /// Logging system.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerLogs {
        /// Filter directives, as in `RUST_LOG`.
        #[serde(
            default = "FieldServerLogs::default_level",
            serialize_with = "serde_with::As::<Vec<serde_with::DisplayFromStr>>::serialize",
            deserialize_with = "serde_with::As::<Vec<serde_with::DisplayFromStr>>::deserialize"
        )]
        pub level: Vec<tracing_subscriber::filter::Directive>,
        /// Write the logs into this file as well.
        #[serde(default)]
        pub filename: Option<std::path::PathBuf>,
    }

    /// SMTP dialog limits.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerSMTP {
        /// Idle time allowed between two commands.
        #[serde(
            default = "FieldServerSMTP::default_timeout_client",
            with = "humantime_serde"
        )]
        pub timeout_client: std::time::Duration,
        ///
        #[serde(default)]
        pub error: FieldServerSMTPError,
    }

    /// Error thresholds of a connection.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerSMTPError {
        /// After this many errors, each reply is delayed, `-1` to disable.
        #[serde(default = "FieldServerSMTPError::default_soft_count")]
        pub soft_count: i64,
        /// After this many errors, the connection is closed, `-1` to disable.
        #[serde(default = "FieldServerSMTPError::default_hard_count")]
        pub hard_count: i64,
        /// Delay applied once `soft_count` is reached.
        #[serde(default = "FieldServerSMTPError::default_delay", with = "humantime_serde")]
        pub delay: std::time::Duration,
    }

    /// Selector execution.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerSelector {
        /// Upper bound of one selector invocation.
        #[serde(
            default = "FieldServerSelector::default_timeout",
            with = "humantime_serde"
        )]
        pub timeout: std::time::Duration,
        /// Policy applied when the selector cannot be loaded.
        #[serde(default)]
        pub fallback: FallbackPolicy,
    }

    /// Outbound submission.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerRelay {
        /// Upper bound of each network operation with a downstream.
        #[serde(default = "FieldServerRelay::default_timeout", with = "humantime_serde")]
        pub timeout: std::time::Duration,
        ///
        #[serde(default)]
        pub tls: RelayTls,
    }
}
