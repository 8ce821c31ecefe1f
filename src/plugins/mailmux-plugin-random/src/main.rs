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


//! Selector plugin choosing one downstream of the pool uniformly at random.
//!
//! Set the path of this executable as `selector_algo_path` of a user, with
//! `"selector_kind": "plugin"`.

#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::multiple_crate_versions)]

use mailmux_selector::plugin::{serve, DownstreamInfo, SelectPlugin};

struct Random;

impl SelectPlugin for Random {
    fn select(&self, downstreams: &[DownstreamInfo]) -> Result<String, String> {
        if downstreams.is_empty() {
            return Err("no downstream to choose from".to_string());
        }

        let chosen = &downstreams[fastrand::usize(..downstreams.len())];

        tracing::info!(addr = %chosen.addr, pool = downstreams.len(), "Downstream chosen.");
        Ok(chosen.addr.clone())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // stdout carries the handshake
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();

    serve(Random).await?;
    Ok(())
}
