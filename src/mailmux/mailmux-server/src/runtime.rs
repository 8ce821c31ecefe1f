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

use crate::Server;
use anyhow::Context;
use mailmux_config::Config;
use mailmux_delivery::SmtpRelay;
use mailmux_selector::Dispatcher;

async fn run(
    config: std::sync::Arc<Config>,
    sockets: Vec<std::net::TcpListener>,
) -> anyhow::Result<()> {
    let relay = std::sync::Arc::new(SmtpRelay::new(
        config.server.name.clone(),
        &config.server.relay,
    ));
    let dispatcher = std::sync::Arc::new(Dispatcher::new(relay, &config.server.selector));

    tokio::select! {
        result = Server::new(config, dispatcher).listen(sockets) => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for the interrupt signal")?;
            tracing::info!("Interrupted, stopping the server.");
            Ok(())
        }
    }
}

/// Build the runtime and serve the clients on `sockets` until interrupted,
/// or until `timeout` elapsed if one is given.
///
/// # Errors
///
/// * failed to build the runtime
/// * see [`Server::listen`]
pub fn start_runtime(
    config: std::sync::Arc<Config>,
    sockets: Vec<std::net::TcpListener>,
    timeout: Option<std::time::Duration>,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("mailmux-server")
        .build()
        .context("Failed to build the server runtime")?;

    runtime.block_on(async move {
        let Some(timeout) = timeout else {
            return run(config, sockets).await;
        };

        match tokio::time::timeout(timeout, run(config, sockets)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::info!(?timeout, "Timeout reached, stopping the server.");
                Ok(())
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_after_the_timeout() {
        let socket = crate::socket_bind_anyhow("127.0.0.1:0").unwrap();

        let begin = std::time::Instant::now();
        start_runtime(
            std::sync::Arc::new(Config::default()),
            vec![socket],
            Some(std::time::Duration::from_millis(100)),
        )
        .unwrap();

        assert!(begin.elapsed() >= std::time::Duration::from_millis(100));
    }
}
