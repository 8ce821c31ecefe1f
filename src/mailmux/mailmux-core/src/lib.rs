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


//! mailmux executable

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

mod args;

pub use args::{Args, Commands, Timeout};

#[cfg(debug_assertions)]
macro_rules! get_fmt {
    () => {
        tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_ansi(false)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! get_fmt {
    () => {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_thread_ids(false)
            .with_target(false)
            .with_ansi(false)
    };
}

macro_rules! file_writer {
    ($filename:expr) => {{
        let filename: &std::path::Path = $filename;
        let writer_backend = if let (Some(directory), Some(file_name)) = (
            filename.parent(),
            filename.file_name().and_then(std::ffi::OsStr::to_str),
        ) {
            tracing_appender::rolling::never(directory, file_name)
        } else {
            anyhow::bail!(
                "filepath at '{}' does not have a parent or is not valid",
                filename.display()
            )
        };

        get_fmt!().with_writer(writer_backend)
    }};
}

/// Initialize the tracing subsystem.
///
/// Logs are written in `server.logs.filename` when set, and on the standard
/// output when `--stdout` is given or no file is configured.
///
/// # Errors
///
/// * the log file path is not valid
/// * a global subscriber is already installed
pub fn init_logs(args: &Args, config: &mailmux_config::Config) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let subscriber = tracing_subscriber::registry().with({
        let mut e = tracing_subscriber::EnvFilter::default();
        for i in &config.server.logs.level {
            e = e.add_directive(i.clone());
        }
        e
    });

    let file = match config.server.logs.filename.as_deref() {
        Some(filename) => Some(file_writer!(filename)),
        None => None,
    };
    let stdout = args.stdout || file.is_none();
    let subscriber = subscriber.with(file);

    // the layered type differs with the stdout writer, hence the macro
    macro_rules! try_init {
        ($s:expr) => {
            if stdout {
                $s.with(get_fmt!().with_writer(std::io::stdout).with_ansi(true))
                    .try_init()
            } else {
                $s.try_init()
            }?
        };
    }

    try_init!(subscriber);

    tracing::info!(
        file = ?config.server.logs.filename,
        stdout,
        "mailmux logs initialized."
    );

    Ok(())
}
