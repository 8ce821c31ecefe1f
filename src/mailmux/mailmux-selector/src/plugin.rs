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

//! A plugin is an executable launched for every selection:
//!
//! 1. the host spawns it with `SMTP_ROUTER_PLUGIN=hello` and
//!    `PLUGIN_PROTOCOL_VERSIONS=1` in its environment;
//! 2. the plugin listens, and prints `1|1|tcp|127.0.0.1:PORT|jsonrpc` on stdout;
//! 3. the host connects and sends one newline-delimited JSON request
//!    `{"method":"Plugin.Select","params":[[{"addr":..,"user":..}]],"id":N}`;
//! 4. the plugin answers `{"id":N,"result":"addr","error":null}`;
//! 5. the host kills the plugin.
//!
//! Plugins are written with [`serve`].

use crate::{SelectRequest, Selection, Selector, SelectorError};
use mailmux_config::field::Downstream;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use tracing::Instrument;

/// Environment variable checked by the plugin before serving.
pub const MAGIC_COOKIE_KEY: &str = "SMTP_ROUTER_PLUGIN";
/// Expected value of [`MAGIC_COOKIE_KEY`].
pub const MAGIC_COOKIE_VALUE: &str = "hello";
/// Environment variable listing the application versions the host speaks.
pub const PROTOCOL_VERSIONS_KEY: &str = "PLUGIN_PROTOCOL_VERSIONS";
/// Version of the handshake.
pub const CORE_PROTOCOL_VERSION: u32 = 1;
/// Version of the `Plugin.Select` interface.
pub const APP_PROTOCOL_VERSION: u32 = 1;
/// The only rpc method.
pub const SELECT_METHOD: &str = "Plugin.Select";
/// Wire protocol advertised in the handshake.
pub const RPC_PROTOCOL: &str = "jsonrpc";

const MAX_HANDSHAKE_LEN: u64 = 1024;

/// Failure of a plugin call.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Spawn, handshake, transport or crash.
    #[error("plugin unreachable: {0}")]
    Unreachable(String),
    /// The plugin answered with an error.
    #[error("plugin error: {0}")]
    Application(String),
}

impl From<std::io::Error> for PluginError {
    fn from(value: std::io::Error) -> Self {
        Self::Unreachable(value.to_string())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(value: serde_json::Error) -> Self {
        Self::Unreachable(format!("invalid rpc message: {value}"))
    }
}

/// What a plugin knows of a downstream. Passwords never leave the host.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownstreamInfo {
    /// `host:port`
    pub addr: String,
    /// Login of the downstream.
    pub user: String,
}

impl From<&Downstream> for DownstreamInfo {
    fn from(value: &Downstream) -> Self {
        Self {
            addr: value.addr.clone(),
            user: value.user.clone(),
        }
    }
}

/// Transport of the rpc connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Network {
    /// `ip:port`
    Tcp,
    /// Path of a unix socket.
    Unix,
}

/// First line printed by a plugin:
/// `CORE-PROTOCOL-VERSION|APP-PROTOCOL-VERSION|NETWORK|ADDRESS|PROTOCOL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    ///
    pub core_version: u32,
    ///
    pub app_version: u32,
    ///
    pub network: Network,
    /// Where the plugin listens.
    pub address: String,
    /// Encoding of the rpc, only `jsonrpc` is spoken.
    pub protocol: String,
}

impl std::fmt::Display for Handshake {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.core_version, self.app_version, self.network, self.address, self.protocol
        )
    }
}

impl std::str::FromStr for Handshake {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PluginError::Unreachable(format!("invalid handshake '{s}'"));

        let parts = s.trim_end().split('|').collect::<Vec<_>>();
        let [core_version, app_version, network, address, protocol] = parts[..] else {
            return Err(invalid());
        };

        Ok(Self {
            core_version: core_version.parse().map_err(|_| invalid())?,
            app_version: app_version.parse().map_err(|_| invalid())?,
            network: network.parse().map_err(|_| invalid())?,
            address: address.to_string(),
            protocol: protocol.to_string(),
        })
    }
}

impl Handshake {
    /// Check the plugin speaks the same protocol as the host.
    ///
    /// # Errors
    ///
    /// * [`PluginError::Unreachable`] on any mismatch
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.core_version != CORE_PROTOCOL_VERSION {
            return Err(PluginError::Unreachable(format!(
                "incompatible core protocol version {}, expected {CORE_PROTOCOL_VERSION}",
                self.core_version
            )));
        }
        if self.app_version != APP_PROTOCOL_VERSION {
            return Err(PluginError::Unreachable(format!(
                "incompatible plugin protocol version {}, expected {APP_PROTOCOL_VERSION}",
                self.app_version
            )));
        }
        if self.protocol != RPC_PROTOCOL {
            return Err(PluginError::Unreachable(format!(
                "unsupported rpc protocol '{}', expected '{RPC_PROTOCOL}'",
                self.protocol
            )));
        }
        if self.network == Network::Unix && !cfg!(unix) {
            return Err(PluginError::Unreachable(
                "unix sockets are not supported on this platform".to_string(),
            ));
        }
        Ok(())
    }
}

/// `Plugin.Select` call.
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Request {
    ///
    pub method: String,
    /// A single positional parameter: the pool.
    pub params: (Vec<DownstreamInfo>,),
    ///
    pub id: u64,
}

/// Answer to a [`Request`], exactly one of `result` and `error` is set.
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Response {
    ///
    pub id: u64,
    /// Address of the chosen downstream.
    pub result: Option<String>,
    ///
    pub error: Option<String>,
}

async fn call<S>(stream: S, downstreams: Vec<DownstreamInfo>) -> Result<String, PluginError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    const ID: u64 = 1;

    let (read, mut write) = tokio::io::split(stream);

    let mut request = serde_json::to_vec(&Request {
        method: SELECT_METHOD.to_string(),
        params: (downstreams,),
        id: ID,
    })?;
    request.push(b'\n');
    write.write_all(&request).await?;
    write.flush().await?;

    let mut lines = tokio::io::BufReader::new(read).lines();
    let line = lines.next_line().await?.ok_or_else(|| {
        PluginError::Unreachable("connection closed before the response".to_string())
    })?;
    let response = serde_json::from_str::<Response>(&line)?;

    if response.id != ID {
        return Err(PluginError::Unreachable(format!(
            "response id {} does not match request id {ID}",
            response.id
        )));
    }
    match response {
        Response {
            error: Some(error), ..
        } => Err(PluginError::Application(error)),
        Response {
            result: Some(addr), ..
        } => Ok(addr),
        _ => Err(PluginError::Unreachable(
            "response has neither result nor error".to_string(),
        )),
    }
}

/// Executable launched for every selection, and killed right after.
pub struct PluginSelector {
    path: std::path::PathBuf,
}

impl PluginSelector {
    /// Selector launching the executable at `path`.
    #[must_use]
    #[inline]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn spawn(&self) -> Result<tokio::process::Child, SelectorError> {
        let mut child = tokio::process::Command::new(&self.path)
            .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .env(PROTOCOL_VERSIONS_KEY, APP_PROTOCOL_VERSION.to_string())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    SelectorError::Unavailable {
                        path: self.path.clone(),
                        reason: e.to_string(),
                    }
                }
                _ => PluginError::Unreachable(format!("cannot spawn plugin: {e}")).into(),
            })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(
                async move {
                    let mut lines = tokio::io::BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        tracing::info!(target: "mailmux::plugin", "{line}");
                    }
                }
                .in_current_span(),
            );
        }

        Ok(child)
    }
}

async fn negotiate_and_call(
    child: &mut tokio::process::Child,
    downstreams: Vec<DownstreamInfo>,
) -> Result<String, PluginError> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PluginError::Unreachable("plugin stdout is not piped".to_string()))?;

    let mut line = String::new();
    let read = tokio::io::BufReader::new(stdout)
        .take(MAX_HANDSHAKE_LEN)
        .read_line(&mut line)
        .await?;
    if read == 0 {
        return Err(PluginError::Unreachable(
            "plugin exited before the handshake".to_string(),
        ));
    }
    if !line.ends_with('\n') && read as u64 == MAX_HANDSHAKE_LEN {
        return Err(PluginError::Unreachable(format!(
            "handshake longer than {MAX_HANDSHAKE_LEN} bytes"
        )));
    }

    let handshake = line.parse::<Handshake>()?;
    handshake.validate()?;
    tracing::debug!(%handshake, "Plugin handshake completed.");

    match handshake.network {
        Network::Tcp => {
            call(
                tokio::net::TcpStream::connect(&handshake.address).await?,
                downstreams,
            )
            .await
        }
        #[cfg(unix)]
        Network::Unix => {
            call(
                tokio::net::UnixStream::connect(&handshake.address).await?,
                downstreams,
            )
            .await
        }
        #[cfg(not(unix))]
        Network::Unix => Err(PluginError::Unreachable(
            "unix sockets are not supported on this platform".to_string(),
        )),
    }
}

#[async_trait::async_trait]
impl Selector for PluginSelector {
    #[tracing::instrument(name = "plugin", skip_all, fields(path = %self.path.display()))]
    async fn select(&self, request: SelectRequest) -> Result<Selection, SelectorError> {
        let mut child = self.spawn()?;

        let downstreams = request
            .downstreams
            .iter()
            .map(DownstreamInfo::from)
            .collect();
        let result = negotiate_and_call(&mut child, downstreams).await;

        if let Err(e) = child.kill().await {
            tracing::debug!(%e, "Plugin already exited.");
        }

        let addr = result?;
        tracing::debug!(%addr, "Plugin selected a downstream.");
        Ok(Selection::Downstream(addr))
    }
}

/// Implemented by plugin executables, see [`serve`].
pub trait SelectPlugin: Send + Sync + 'static {
    /// Choose the address of one of `downstreams`, or explain why not.
    ///
    /// # Errors
    ///
    /// * the message sent back to the host
    fn select(&self, downstreams: &[DownstreamInfo]) -> Result<String, String>;
}

/// Failure of the plugin side.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// The magic cookie is missing.
    #[error(
        "This binary is a plugin of mailmux. It is not meant to be executed directly: \
         it is launched by the proxy for the users whose `selector_kind` is \"plugin\"."
    )]
    NotLaunchedByHost,
    /// The host does not speak our version of `Plugin.Select`.
    #[error("the host speaks plugin protocol versions '{0}', this plugin speaks {APP_PROTOCOL_VERSION}")]
    UnsupportedVersion(String),
    ///
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serve `plugin` to the host that launched this process.
///
/// Returns when the host closes the standard input.
///
/// # Errors
///
/// * see [`ServeError`]
pub async fn serve<P: SelectPlugin>(plugin: P) -> Result<(), ServeError> {
    if std::env::var(MAGIC_COOKIE_KEY).as_deref() != Ok(MAGIC_COOKIE_VALUE) {
        return Err(ServeError::NotLaunchedByHost);
    }
    if let Ok(versions) = std::env::var(PROTOCOL_VERSIONS_KEY) {
        if !versions
            .split(',')
            .any(|v| v.trim() == APP_PROTOCOL_VERSION.to_string())
        {
            return Err(ServeError::UnsupportedVersion(versions));
        }
    }

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let handshake = Handshake {
        core_version: CORE_PROTOCOL_VERSION,
        app_version: APP_PROTOCOL_VERSION,
        network: Network::Tcp,
        address: listener.local_addr()?.to_string(),
        protocol: RPC_PROTOCOL.to_string(),
    };

    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{handshake}\n").as_bytes()).await?;
    stdout.flush().await?;

    serve_listener(listener, plugin, async {
        let _closed = tokio::io::copy(&mut tokio::io::stdin(), &mut tokio::io::sink()).await;
    })
    .await
}

pub(crate) async fn serve_listener<P: SelectPlugin>(
    listener: tokio::net::TcpListener,
    plugin: P,
    shutdown: impl std::future::Future<Output = ()> + Send,
) -> Result<(), ServeError> {
    let plugin = std::sync::Arc::new(plugin);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => return Ok(()),
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let plugin = plugin.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, plugin.as_ref()).await {
                        tracing::warn!(%peer, %e, "Connection with the host failed.");
                    }
                });
            }
        }
    }
}

async fn serve_connection<S, P>(stream: S, plugin: &P) -> std::io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    P: SelectPlugin,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = tokio::io::BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(Request { method, params, id }) if method == SELECT_METHOD => {
                match plugin.select(&params.0) {
                    Ok(addr) => Response {
                        id,
                        result: Some(addr),
                        error: None,
                    },
                    Err(error) => Response {
                        id,
                        result: None,
                        error: Some(error),
                    },
                }
            }
            Ok(Request { method, id, .. }) => Response {
                id,
                result: None,
                error: Some(format!("rpc: can't find method {method}")),
            },
            Err(e) => Response {
                id: 0,
                result: None,
                error: Some(format!("invalid request: {e}")),
            },
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        write.write_all(&out).await?;
        write.flush().await?;
    }
    Ok(())
}
