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

/// Error produced while loading or validating the configuration.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read configuration file '{}': {source}", path.display())]
    Io {
        /// Path of the file.
        path: std::path::PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The document is not valid, `path` locates the faulty field.
    #[error("invalid configuration at '{path}': {inner}")]
    Parse {
        /// JSON path of the faulty field.
        path: String,
        /// Underlying error.
        inner: serde_json::Error,
    },
    /// Two users share the same email.
    #[error("user '{email}' is defined more than once")]
    DuplicateUser {
        /// Duplicated email.
        email: String,
    },
    /// Two downstreams of the same user share an address.
    #[error("downstream '{addr}' is defined more than once for user '{email}'")]
    DuplicateDownstream {
        /// Owner of the pool.
        email: String,
        /// Duplicated address.
        addr: String,
    },
    /// A downstream address is not `host:port`.
    #[error("downstream address '{addr}' is not of the form 'host:port'")]
    InvalidDownstreamAddr {
        /// Faulty address.
        addr: String,
    },
}

impl From<serde_path_to_error::Error<serde_json::Error>> for ConfigError {
    #[inline]
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        Self::Parse {
            path: value.path().to_string(),
            inner: value.into_inner(),
        }
    }
}
