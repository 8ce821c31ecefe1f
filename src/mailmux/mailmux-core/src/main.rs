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

use anyhow::Context;
use mailmux::{init_logs, Args, Commands};
use mailmux_config::Config;
use mailmux_server::{socket_bind_anyhow, start_runtime};

fn main() {
    if let Err(err) = try_main() {
        eprintln!("ERROR: {err}");
        tracing::error!("ERROR: {err}");
        err.chain().skip(1).for_each(|cause| eprintln!("because: {cause}"));
        std::process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();

    let config = Config::from_path(&args.config).context("Cannot parse the configuration")?;

    if let Some(command) = &args.command {
        match command {
            Commands::ConfigShow => {
                let stringified = serde_json::to_string_pretty(&config.redacted())?;
                println!("Loaded configuration: {stringified}");
            }
            Commands::ConfigDiff => {
                let loaded_config = serde_json::to_string_pretty(&config.redacted())?;
                let default_config = serde_json::to_string_pretty(&Config::default())?;
                for diff in diff::lines(&default_config, &loaded_config) {
                    match diff {
                        diff::Result::Left(left) => println!("-\x1b[0;31m{left}\x1b[0m"),
                        diff::Result::Both(same, _) => println!(" {same}"),
                        diff::Result::Right(right) => println!("+\x1b[0;32m{right}\x1b[0m"),
                    }
                }
            }
            Commands::ConfigCheck => {
                println!(
                    "Configuration '{}' is valid: {} user(s).",
                    args.config.display(),
                    config.users.len()
                );
            }
        }
        return Ok(());
    }

    let sockets = config
        .server
        .addr
        .iter()
        .map(socket_bind_anyhow)
        .collect::<anyhow::Result<Vec<std::net::TcpListener>>>()?;

    init_logs(&args, &config).context("Cannot initialize the logs")?;

    start_runtime(
        std::sync::Arc::new(config),
        sockets,
        args.timeout.map(|t| t.0),
    )
}
