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

use crate::{
    plugin::PluginSelector, script::ScriptSelector, SelectRequest, Selection, Selector,
    SelectorError,
};
use mailmux_config::field::{FallbackPolicy, FieldServerSelector, SelectorKind, UserConfig};
use mailmux_delivery::{Envelope, Relay, RelayError};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Failure of a routed transaction.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The user has an empty pool.
    #[error("user '{0}' has no downstream configured")]
    NoDownstreamsConfigured(String),
    /// The selector chose an address outside of the pool.
    #[error("selector chose '{0}', which is not a downstream of the user")]
    UnknownDownstream(String),
    ///
    #[error(transparent)]
    Selector(#[from] SelectorError),
    ///
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Run the selector of a user and relay the message accordingly.
pub struct Dispatcher {
    relay: Arc<dyn Relay>,
    timeout: std::time::Duration,
    fallback: FallbackPolicy,
}

impl Dispatcher {
    ///
    #[must_use]
    #[inline]
    pub fn new(relay: Arc<dyn Relay>, config: &FieldServerSelector) -> Self {
        Self {
            relay,
            timeout: config.timeout,
            fallback: config.fallback,
        }
    }

    fn selector_for(&self, user: &UserConfig) -> Box<dyn Selector> {
        match user.selector_kind {
            SelectorKind::Script => Box::new(ScriptSelector::new(
                &user.selector_algo_path,
                self.relay.clone(),
            )),
            SelectorKind::Plugin => Box::new(PluginSelector::new(&user.selector_algo_path)),
        }
    }

    /// Route the buffered transaction of `user`.
    ///
    /// The selector runs under the configured timeout. When it cannot be
    /// loaded at all, the fallback policy applies. An address chosen by the
    /// selector is relayed to only if it belongs to the pool.
    ///
    /// # Errors
    ///
    /// * see [`DispatchError`]
    #[tracing::instrument(
        name = "dispatch",
        skip_all,
        fields(user = %user.email, kind = %user.selector_kind),
        err
    )]
    pub async fn dispatch(
        &self,
        user: &UserConfig,
        envelope: Envelope,
        body: Vec<u8>,
    ) -> Result<Selection, DispatchError> {
        let first = user
            .downstreams
            .first()
            .ok_or_else(|| DispatchError::NoDownstreamsConfigured(user.email.clone()))?;

        let body = Arc::<[u8]>::from(body);
        let attempts = Arc::new(AtomicUsize::new(0));
        let request = SelectRequest {
            downstreams: user.downstreams.clone(),
            envelope: envelope.clone(),
            body: body.clone(),
            timeout: self.timeout,
            attempts: attempts.clone(),
        };

        let selector = self.selector_for(user);
        let selected = tokio::time::timeout(self.timeout, selector.select(request))
            .await
            .unwrap_or_else(|_elapsed| {
                Err(SelectorError::timeout(
                    self.timeout,
                    attempts.load(Ordering::SeqCst),
                ))
            });

        let addr = match selected {
            Ok(Selection::Relayed { count }) => {
                if count == 0 {
                    tracing::warn!("Selector succeeded without relaying the message.");
                } else {
                    tracing::info!(count, "Message relayed by the selector.");
                }
                return Ok(Selection::Relayed { count });
            }
            Ok(Selection::Downstream(addr)) => addr,
            Err(e @ SelectorError::Unavailable { .. })
                if self.fallback == FallbackPolicy::FirstDownstream =>
            {
                tracing::warn!(%e, downstream = %first.addr, "Falling back to the first downstream.");
                first.addr.clone()
            }
            Err(e) => return Err(e.into()),
        };

        let downstream = user
            .downstream(&addr)
            .ok_or_else(|| DispatchError::UnknownDownstream(addr.clone()))?
            .clone();

        let relay = self.relay.clone();
        tokio::task::spawn_blocking(move || relay.send(&downstream, &envelope, &body, None))
            .await
            .map_err(|e| RelayError::Transport {
                addr: addr.clone(),
                message: e.to_string(),
            })??;

        Ok(Selection::Downstream(addr))
    }
}
