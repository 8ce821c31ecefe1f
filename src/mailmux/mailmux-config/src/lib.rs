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

//! mailmux configuration
//!
//! The configuration is a JSON document loaded once at startup. It holds the
//! server settings and, for every tenant, its credentials, its selector and its
//! pool of downstream servers. Once loaded it is shared as `Arc<Config>` and
//! never mutated.

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

mod config;
mod default;
mod error;
mod parser;

pub use config::{field, Config};
pub use error::ConfigError;

#[cfg(test)]
mod tests;
