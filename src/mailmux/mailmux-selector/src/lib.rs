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

//! Selection of the downstream server a message is relayed to.
//!
//! Every user has a selector, either a rhai script ([`script`]) or an
//! executable speaking the plugin protocol ([`plugin`]). The [`Dispatcher`]
//! runs it under a deadline, validates its answer against the user's pool
//! and relays the message.

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
#![allow(clippy::module_name_repetitions)]

mod dispatcher;
/// Out-of-process selectors.
pub mod plugin;
/// Embedded rhai selectors.
pub mod script;

pub use dispatcher::{DispatchError, Dispatcher};

use mailmux_config::field::Downstream;
use mailmux_delivery::Envelope;

/// Everything a selector may need to choose, or to relay by itself.
#[derive(Debug, Clone)]
pub struct SelectRequest {
    /// Pool of the user, in configuration order.
    pub downstreams: Vec<Downstream>,
    /// Envelope of the buffered transaction.
    pub envelope: Envelope,
    /// Buffered message, dot-unstuffed.
    pub body: std::sync::Arc<[u8]>,
    /// Time left to the selector.
    pub timeout: std::time::Duration,
    /// Relays started by the selector itself, still readable by the caller
    /// once the selection is abandoned.
    pub attempts: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

/// Successful outcome of a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The message must be relayed to the downstream with this address.
    Downstream(String),
    /// The selector relayed the message itself, `count` times.
    Relayed {
        /// Successful calls to `send`.
        count: usize,
    },
}

impl SelectorError {
    /// Timeout of a selection, depending on whether it had started relaying.
    #[must_use]
    pub fn timeout(timeout: std::time::Duration, attempts: usize) -> Self {
        if attempts == 0 {
            Self::Timeout(timeout)
        } else {
            Self::TimeoutAfterRelay { timeout, attempts }
        }
    }
}

/// Failure of a selector.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    /// The selector could not be loaded at all.
    #[error("selector '{}' is unavailable: {reason}", path.display())]
    Unavailable {
        /// Location of the script or of the executable.
        path: std::path::PathBuf,
        /// Why it could not be loaded.
        reason: String,
    },
    /// The script does not define `fn selector(downstreams)`.
    #[error("selector does not define `fn {}(downstreams)`", script::ENTRY_POINT)]
    MissingEntryPoint,
    /// The script failed, or returned something else than `()`.
    #[error("selector script failed: {0}")]
    Script(String),
    /// The selector did not complete in time.
    #[error("selector timed out after {}", humantime::format_duration(*.0))]
    Timeout(std::time::Duration),
    /// The selector did not complete in time, but had already started
    /// relaying: the message may have been delivered.
    #[error(
        "selector timed out after {} with {attempts} relay(s) started",
        humantime::format_duration(*.timeout)
    )]
    TimeoutAfterRelay {
        /// Time given to the selector.
        timeout: std::time::Duration,
        /// Calls to `send` that reached the relay.
        attempts: usize,
    },
    /// The plugin failed.
    #[error(transparent)]
    Plugin(#[from] plugin::PluginError),
}

/// A way of choosing a downstream.
#[async_trait::async_trait]
pub trait Selector: Send + Sync {
    /// Run the selection.
    ///
    /// The future may be dropped at any await point, the implementation must
    /// then release its resources (interpreter, subprocess).
    ///
    /// # Errors
    ///
    /// * see [`SelectorError`]
    async fn select(&self, request: SelectRequest) -> Result<Selection, SelectorError>;
}
