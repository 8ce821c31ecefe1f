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

//! A script defines `fn selector(downstreams)`, where `downstreams` is an
//! array of `#{addr, user, pass}` maps, and relays the message with the only
//! host function available, `send(downstream)`:
//!
//! ```rhai
//! fn selector(downstreams) {
//!     let err = send(downstreams[0]);
//!     if err != () {
//!         return err;
//!     }
//! }
//! ```
//!
//! `send` returns `()` on success or a string describing the failure.
//! The selector succeeds when it returns `()`, any other value is an error.

use crate::{SelectRequest, Selection, Selector, SelectorError};
use mailmux_config::field::Downstream;
use mailmux_delivery::{Envelope, Relay};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

/// Name of the function called by the host.
pub const ENTRY_POINT: &str = "selector";

const MAX_OPERATIONS: u64 = 100_000_000;
const MAX_CALL_LEVELS: usize = 32;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FUNCTION_EXPR_DEPTH: usize = 32;
const MAX_STRING_SIZE: usize = 1 << 20;
const MAX_COLLECTION_SIZE: usize = 10_000;

/// Marshal a pool entry into the map the script receives.
#[must_use]
pub fn to_record(downstream: &Downstream) -> rhai::Dynamic {
    let mut record = rhai::Map::new();
    record.insert("addr".into(), downstream.addr.clone().into());
    record.insert("user".into(), downstream.user.clone().into());
    record.insert("pass".into(), downstream.pass.clone().into());
    rhai::Dynamic::from_map(record)
}

/// Host side of `send`: always relays with the credentials of the pool.
struct SendContext {
    relay: Arc<dyn Relay>,
    downstreams: Vec<Downstream>,
    envelope: Envelope,
    body: Arc<[u8]>,
    deadline: std::time::Instant,
    attempts: Arc<AtomicUsize>,
    sent: AtomicUsize,
}

impl SendContext {
    fn send(&self, record: &rhai::Map) -> rhai::Dynamic {
        let left = self
            .deadline
            .saturating_duration_since(std::time::Instant::now());
        if left.is_zero() {
            return "selection deadline exceeded".into();
        }

        let Some(addr) = record
            .get("addr")
            .and_then(|addr| addr.clone().into_string().ok())
        else {
            return "downstream has no `addr` string".into();
        };
        let Some(downstream) = self.downstreams.iter().find(|d| d.addr == addr) else {
            tracing::warn!(%addr, "Script tried to send to a downstream outside of its pool.");
            return format!("unknown downstream '{addr}'").into();
        };

        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self
            .relay
            .send(downstream, &self.envelope, &self.body, Some(left))
        {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::SeqCst);
                rhai::Dynamic::UNIT
            }
            Err(e) => e.to_string().into(),
        }
    }
}

fn sandboxed_engine(
    path: &std::path::Path,
    context: Arc<SendContext>,
    cancel: Arc<AtomicBool>,
) -> rhai::Engine {
    let mut engine = rhai::Engine::new();

    let deadline = context.deadline;
    let source = path.display().to_string();

    engine
        .set_module_resolver(rhai::module_resolvers::DummyModuleResolver::new())
        .disable_symbol("eval")
        .set_max_operations(MAX_OPERATIONS)
        .set_max_call_levels(MAX_CALL_LEVELS)
        .set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FUNCTION_EXPR_DEPTH)
        .set_max_string_size(MAX_STRING_SIZE)
        .set_max_array_size(MAX_COLLECTION_SIZE)
        .set_max_map_size(MAX_COLLECTION_SIZE)
        .on_print({
            let source = source.clone();
            move |text| tracing::info!(script = %source, "{text}")
        })
        .on_debug(move |text, _, pos| tracing::debug!(script = %source, %pos, "{text}"))
        .on_progress(move |_| {
            if cancel.load(Ordering::Relaxed) || std::time::Instant::now() >= deadline {
                Some(rhai::Dynamic::UNIT)
            } else {
                None
            }
        })
        .register_fn("send", move |record: rhai::Map| context.send(&record));

    engine
}

fn unavailable(path: &std::path::Path, reason: impl ToString) -> SelectorError {
    SelectorError::Unavailable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn run(
    path: &std::path::Path,
    relay: Arc<dyn Relay>,
    request: SelectRequest,
    deadline: std::time::Instant,
    cancel: Arc<AtomicBool>,
) -> Result<Selection, SelectorError> {
    let source = std::fs::read_to_string(path).map_err(|e| unavailable(path, e))?;

    let downstreams = request
        .downstreams
        .iter()
        .map(to_record)
        .collect::<rhai::Array>();

    let context = Arc::new(SendContext {
        relay,
        downstreams: request.downstreams,
        envelope: request.envelope,
        body: request.body,
        deadline,
        attempts: request.attempts.clone(),
        sent: AtomicUsize::new(0),
    });
    let engine = sandboxed_engine(path, context.clone(), cancel);

    let ast = engine.compile(source).map_err(|e| unavailable(path, e))?;
    if !ast
        .iter_functions()
        .any(|f| f.name == ENTRY_POINT && f.params.len() == 1)
    {
        return Err(SelectorError::MissingEntryPoint);
    }

    let output = engine
        .call_fn::<rhai::Dynamic>(&mut rhai::Scope::new(), &ast, ENTRY_POINT, (downstreams,))
        .map_err(|e| match *e {
            rhai::EvalAltResult::ErrorTerminated(..) => SelectorError::timeout(
                request.timeout,
                request.attempts.load(Ordering::SeqCst),
            ),
            otherwise => SelectorError::Script(otherwise.to_string()),
        })?;

    if output.is_unit() {
        Ok(Selection::Relayed {
            count: context.sent.load(Ordering::SeqCst),
        })
    } else {
        Err(SelectorError::Script(output.to_string()))
    }
}

/// Raise the flag when the selection future is dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// A rhai script, compiled and run in a fresh engine at each selection.
pub struct ScriptSelector {
    path: std::path::PathBuf,
    relay: Arc<dyn Relay>,
}

impl ScriptSelector {
    /// Selector running the script at `path`, whose `send` relays through `relay`.
    #[must_use]
    #[inline]
    pub fn new(path: impl Into<std::path::PathBuf>, relay: Arc<dyn Relay>) -> Self {
        Self {
            path: path.into(),
            relay,
        }
    }
}

#[async_trait::async_trait]
impl Selector for ScriptSelector {
    #[tracing::instrument(name = "script", skip_all, fields(path = %self.path.display()))]
    async fn select(&self, request: SelectRequest) -> Result<Selection, SelectorError> {
        let deadline = std::time::Instant::now() + request.timeout;
        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancel.clone());

        let path = self.path.clone();
        let relay = self.relay.clone();

        tokio::task::spawn_blocking(move || run(&path, relay, request, deadline, cancel))
            .await
            .map_err(|e| SelectorError::Script(e.to_string()))?
    }
}
