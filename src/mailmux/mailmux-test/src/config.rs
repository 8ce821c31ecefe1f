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


use mailmux_config::{
    field::{Downstream, SelectorKind, UserConfig},
    Config,
};

/// Path of a selector script shipped with this crate.
#[must_use]
pub fn script(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("scripts")
        .join(name)
}

/// A downstream whose credentials are derived from its host.
#[must_use]
pub fn downstream(addr: &str) -> Downstream {
    let host = addr.split('.').nth(1).unwrap_or(addr);
    Downstream {
        addr: addr.to_string(),
        user: format!("{host}-user"),
        pass: format!("{host}-pass"),
    }
}

/// Configuration of the scenarios:
///
/// * `alice@example.com` / `secret`, relaying through the first of
///   `smtp.a.example:587` and `smtp.b.example:587`;
/// * `bob@example.com` / `hunter2`, without downstream.
///
/// The error counters are disabled so no delay slows the tests down.
#[must_use]
pub fn local_test() -> Config {
    let mut config = Config::default();
    config.server.name = "testserver.com".to_string();
    config.server.smtp.error.soft_count = -1;
    config.server.smtp.error.hard_count = -1;
    config.server.selector.timeout = std::time::Duration::from_secs(5);

    config.users = vec![
        UserConfig {
            email: "alice@example.com".to_string(),
            password: "secret".to_string(),
            selector_algo_path: script("first_downstream.rhai"),
            selector_kind: SelectorKind::Script,
            downstreams: vec![
                downstream("smtp.a.example:587"),
                downstream("smtp.b.example:587"),
            ],
        },
        UserConfig {
            email: "bob@example.com".to_string(),
            password: "hunter2".to_string(),
            selector_algo_path: script("first_downstream.rhai"),
            selector_kind: SelectorKind::Script,
            downstreams: vec![],
        },
    ];
    config
}

/// [`local_test`] where alice's messages go through `path`.
#[must_use]
pub fn with_selector(path: impl Into<std::path::PathBuf>, kind: SelectorKind) -> Config {
    let mut config = local_test();
    if let Some(alice) = config.users.first_mut() {
        alice.selector_algo_path = path.into();
        alice.selector_kind = kind;
    }
    config
}
