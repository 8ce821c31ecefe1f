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


//! Selector plugin answering a fixed downstream, used by the integration
//! tests. Launched through a shell wrapper passing its arguments.

use mailmux_selector::plugin::{serve, DownstreamInfo, SelectPlugin};

#[derive(Debug, clap::Parser)]
struct Args {
    /// Address answered, the first downstream otherwise
    #[arg(long)]
    answer: Option<String>,
    /// Answer this error instead of an address
    #[arg(long, conflicts_with = "answer")]
    error: Option<String>,
    /// Write the downstreams received, as json, in this file
    #[arg(long)]
    record: Option<std::path::PathBuf>,
}

struct Fixed(Args);

impl SelectPlugin for Fixed {
    fn select(&self, downstreams: &[DownstreamInfo]) -> Result<String, String> {
        tracing::info!(count = downstreams.len(), "Selecting.");

        if let Some(path) = &self.0.record {
            let json = serde_json::to_vec(downstreams).map_err(|e| e.to_string())?;
            std::fs::write(path, json).map_err(|e| e.to_string())?;
        }

        if let Some(error) = &self.0.error {
            return Err(error.clone());
        }
        match &self.0.answer {
            Some(answer) => Ok(answer.clone()),
            None => downstreams
                .first()
                .map(|d| d.addr.clone())
                .ok_or_else(|| "empty pool".to_string()),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = <Args as clap::Parser>::parse();
    serve(Fixed(args)).await?;
    Ok(())
}
