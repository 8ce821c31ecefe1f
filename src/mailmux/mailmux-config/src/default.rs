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
    field::{
        FieldServer, FieldServerLogs, FieldServerRelay, FieldServerSMTP, FieldServerSMTPError,
        FieldServerSelector,
    },
    Config,
};

impl Default for Config {
    fn default() -> Self {
        Self {
            server: FieldServer::default(),
            users: vec![],
            path: None,
        }
    }
}

impl Default for FieldServer {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            addr: Self::default_addr(),
            client_count_max: Self::default_client_count_max(),
            message_size_limit: Self::default_message_size_limit(),
            pipelining: Self::default_pipelining(),
            logs: FieldServerLogs::default(),
            smtp: FieldServerSMTP::default(),
            selector: FieldServerSelector::default(),
            relay: FieldServerRelay::default(),
        }
    }
}

impl FieldServer {
    pub(crate) fn default_name() -> String {
        "localhost".to_string()
    }

    pub(crate) fn default_addr() -> Vec<std::net::SocketAddr> {
        vec![std::net::SocketAddr::from(([0, 0, 0, 0], 1020))]
    }

    pub(crate) const fn default_client_count_max() -> i64 {
        -1
    }

    pub(crate) const fn default_message_size_limit() -> usize {
        20_000_000
    }

    pub(crate) const fn default_pipelining() -> bool {
        true
    }
}

impl Default for FieldServerLogs {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            filename: None,
        }
    }
}

impl FieldServerLogs {
    pub(crate) fn default_level() -> Vec<tracing_subscriber::filter::Directive> {
        vec![tracing_subscriber::filter::LevelFilter::INFO.into()]
    }
}

impl Default for FieldServerSMTP {
    fn default() -> Self {
        Self {
            timeout_client: Self::default_timeout_client(),
            error: FieldServerSMTPError::default(),
        }
    }
}

impl FieldServerSMTP {
    pub(crate) const fn default_timeout_client() -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }
}

impl Default for FieldServerSMTPError {
    fn default() -> Self {
        Self {
            soft_count: Self::default_soft_count(),
            hard_count: Self::default_hard_count(),
            delay: Self::default_delay(),
        }
    }
}

impl FieldServerSMTPError {
    pub(crate) const fn default_soft_count() -> i64 {
        10
    }

    pub(crate) const fn default_hard_count() -> i64 {
        20
    }

    pub(crate) const fn default_delay() -> std::time::Duration {
        std::time::Duration::from_secs(5)
    }
}

impl Default for FieldServerSelector {
    fn default() -> Self {
        Self {
            timeout: Self::default_timeout(),
            fallback: crate::field::FallbackPolicy::default(),
        }
    }
}

impl FieldServerSelector {
    pub(crate) const fn default_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }
}

impl Default for FieldServerRelay {
    fn default() -> Self {
        Self {
            timeout: Self::default_timeout(),
            tls: crate::field::RelayTls::default(),
        }
    }
}

impl FieldServerRelay {
    pub(crate) const fn default_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(60)
    }
}
