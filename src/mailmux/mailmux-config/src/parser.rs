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

use crate::{Config, ConfigError};

impl Config {
    /// Parse and validate a configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// * the document is not valid JSON or does not match the expected layout
    /// * see [`Config::validate`]
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let deserializer = &mut serde_json::Deserializer::from_str(input);
        let config: Self = serde_path_to_error::deserialize(deserializer)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// * the file cannot be read
    /// * see [`Config::from_json`]
    #[tracing::instrument(err)]
    pub fn from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_json(&input)?;
        config.path = Some(path.to_path_buf());

        tracing::debug!(users = config.users.len(), "Configuration loaded.");
        Ok(config)
    }

    /// Check the invariants the deserializer cannot express.
    ///
    /// # Errors
    ///
    /// * two users have the same email
    /// * two downstreams of the same user have the same address
    /// * a downstream address is not `host:port`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.users.is_empty() {
            tracing::warn!("No user configured, every authentication will fail.");
        }

        let mut emails = std::collections::HashSet::new();
        for user in &self.users {
            if !emails.insert(user.email.as_str()) {
                return Err(ConfigError::DuplicateUser {
                    email: user.email.clone(),
                });
            }

            let mut addrs = std::collections::HashSet::new();
            for downstream in &user.downstreams {
                downstream.host_port()?;
                if !addrs.insert(downstream.addr.as_str()) {
                    return Err(ConfigError::DuplicateDownstream {
                        email: user.email.clone(),
                        addr: downstream.addr.clone(),
                    });
                }
            }

            if user.downstreams.is_empty() {
                tracing::warn!(user = %user.email, "User has no downstream, its messages will be refused.");
            }
        }

        Ok(())
    }
}
