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


/// Duration after which the server stops, for testing purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(pub std::time::Duration);

impl std::str::FromStr for Timeout {
    type Err = humantime::DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        humantime::parse_duration(s).map(Timeout)
    }
}

///
#[derive(Debug, PartialEq, Eq, clap::Parser)]
#[command(about, version, author)]
pub struct Args {
    /// Path of the mailmux configuration file (json format)
    #[arg(short, long, default_value = "config.json")]
    pub config: std::path::PathBuf,

    ///
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Also write the logs on the standard output
    #[arg(long)]
    pub stdout: bool,

    /// Make the server stop after the given duration, for testing purpose
    #[arg(short, long)]
    pub timeout: Option<Timeout>,
}

///
#[derive(Debug, PartialEq, Eq, clap::Subcommand)]
pub enum Commands {
    /// Show the loaded config (as serialized json format, passwords redacted)
    ConfigShow,
    /// Show the difference between the loaded config and the default one
    ConfigDiff,
    /// Load and validate the config, then exit
    ConfigCheck,
}
