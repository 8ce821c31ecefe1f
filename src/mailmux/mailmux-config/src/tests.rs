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
    field::{Downstream, FallbackPolicy, RelayTls, SelectorKind},
    Config, ConfigError,
};

const FULL: &str = r#"{
    "server": {
        "name": "relay.example.com",
        "addr": ["127.0.0.1:10025"],
        "client_count_max": 8,
        "logs": { "level": ["warn", "mailmux_selector=trace"] },
        "smtp": { "timeout_client": "10s", "error": { "soft_count": 1, "hard_count": 2, "delay": "1ms" } },
        "selector": { "timeout": "2s", "fallback": "none" },
        "relay": { "timeout": "5s", "tls": "none" }
    },
    "users": [
        {
            "email": "alice@example.com",
            "password": "secret",
            "selector_algo_path": "/etc/mailmux/alice.rhai",
            "downstreams": [
                { "addr": "smtp.a.example:587", "user": "a", "pass": "pa" },
                { "addr": "[::1]:2525", "user": "b", "pass": "pb" }
            ]
        },
        {
            "email": "bob@example.com",
            "password": "hunter2",
            "selector_algo_path": "/usr/libexec/mailmux/random",
            "selector_kind": "plugin",
            "downstreams": []
        }
    ]
}"#;

#[test]
fn parse_full() {
    let config = Config::from_json(FULL).unwrap();

    pretty_assertions::assert_eq!(config.server.name, "relay.example.com");
    pretty_assertions::assert_eq!(
        config.server.addr,
        vec!["127.0.0.1:10025".parse::<std::net::SocketAddr>().unwrap()]
    );
    pretty_assertions::assert_eq!(config.server.client_count_max, 8);
    pretty_assertions::assert_eq!(
        config
            .server
            .logs
            .level
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        vec!["warn", "mailmux_selector=trace"]
    );
    pretty_assertions::assert_eq!(
        config.server.smtp.timeout_client,
        std::time::Duration::from_secs(10)
    );
    pretty_assertions::assert_eq!(config.server.smtp.error.hard_count, 2);
    pretty_assertions::assert_eq!(
        config.server.selector.timeout,
        std::time::Duration::from_secs(2)
    );
    pretty_assertions::assert_eq!(config.server.selector.fallback, FallbackPolicy::None);
    pretty_assertions::assert_eq!(config.server.relay.tls, RelayTls::None);

    let alice = config.find_user("alice@example.com").unwrap();
    pretty_assertions::assert_eq!(alice.selector_kind, SelectorKind::Script);
    pretty_assertions::assert_eq!(
        alice.downstreams,
        vec![
            Downstream {
                addr: "smtp.a.example:587".to_string(),
                user: "a".to_string(),
                pass: "pa".to_string(),
            },
            Downstream {
                addr: "[::1]:2525".to_string(),
                user: "b".to_string(),
                pass: "pb".to_string(),
            },
        ]
    );

    let bob = config.find_user("bob@example.com").unwrap();
    pretty_assertions::assert_eq!(bob.selector_kind, SelectorKind::Plugin);
    assert!(bob.downstreams.is_empty());
    assert!(config.find_user("Alice@example.com").is_none());
}

#[test]
fn defaults() {
    let config = Config::from_json(r#"{ "users": [] }"#).unwrap();
    pretty_assertions::assert_eq!(config, Config::default());
    pretty_assertions::assert_eq!(config.server.name, "localhost");
    pretty_assertions::assert_eq!(
        config.server.addr,
        vec!["0.0.0.0:1020".parse::<std::net::SocketAddr>().unwrap()]
    );
    pretty_assertions::assert_eq!(
        config.server.selector.timeout,
        std::time::Duration::from_secs(30)
    );
    pretty_assertions::assert_eq!(
        config.server.selector.fallback,
        FallbackPolicy::FirstDownstream
    );
    pretty_assertions::assert_eq!(config.server.relay.tls, RelayTls::Opportunistic);
}

#[test]
fn serialize_deserialize() {
    let config = Config::from_json(FULL).unwrap();
    let json = serde_json::to_string_pretty(&config).unwrap();
    pretty_assertions::assert_eq!(Config::from_json(&json).unwrap(), config);
}

#[test]
fn unknown_field_reports_path() {
    let error = Config::from_json(
        r#"{ "users": [ { "email": "a", "password": "b", "selector_algo_path": "c", "pasword": "d" } ] }"#,
    )
    .unwrap_err();

    match error {
        ConfigError::Parse { path, inner } => {
            assert!(path.starts_with("users[0]"), "{path}");
            assert!(inner.to_string().contains("pasword"), "{inner}");
        }
        otherwise => panic!("unexpected error: {otherwise}"),
    }
}

#[test]
fn bad_selector_kind() {
    let error = Config::from_json(
        r#"{ "users": [ { "email": "a", "password": "b", "selector_algo_path": "c", "selector_kind": "wasm" } ] }"#,
    )
    .unwrap_err();
    assert!(matches!(error, ConfigError::Parse { .. }), "{error}");
}

#[test]
fn duplicate_user() {
    let error = Config::from_json(
        r#"{ "users": [
            { "email": "a@b", "password": "1", "selector_algo_path": "s" },
            { "email": "a@b", "password": "2", "selector_algo_path": "s" }
        ] }"#,
    )
    .unwrap_err();
    assert!(
        matches!(error, ConfigError::DuplicateUser { ref email } if email == "a@b"),
        "{error}"
    );
}

#[test]
fn duplicate_downstream() {
    let error = Config::from_json(
        r#"{ "users": [
            { "email": "a@b", "password": "1", "selector_algo_path": "s", "downstreams": [
                { "addr": "mx:25", "user": "u", "pass": "p" },
                { "addr": "mx:25", "user": "v", "pass": "q" }
            ] }
        ] }"#,
    )
    .unwrap_err();
    assert!(
        matches!(error, ConfigError::DuplicateDownstream { ref addr, .. } if addr == "mx:25"),
        "{error}"
    );
}

#[rstest::rstest]
#[case("smtp.example.com:587", Some(("smtp.example.com", 587)))]
#[case("127.0.0.1:25", Some(("127.0.0.1", 25)))]
#[case("[::1]:2525", Some(("::1", 2525)))]
#[case("smtp.example.com", None)]
#[case(":25", None)]
#[case("smtp.example.com:smtp", None)]
#[case("smtp.example.com:70000", None)]
fn downstream_host_port(#[case] addr: &str, #[case] expected: Option<(&str, u16)>) {
    let downstream = Downstream {
        addr: addr.to_string(),
        user: String::new(),
        pass: String::new(),
    };
    pretty_assertions::assert_eq!(downstream.host_port().ok(), expected);
}

#[test]
fn redacted() {
    let config = Config::from_json(FULL).unwrap().redacted();
    let json = serde_json::to_string(&config).unwrap();

    assert!(!json.contains("secret"));
    assert!(!json.contains("hunter2"));
    assert!(!json.contains("\"pa\""));
    assert!(!format!("{config:?}").contains("secret"));
}

#[test]
fn from_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, FULL).unwrap();

    let config = Config::from_path(&path).unwrap();
    pretty_assertions::assert_eq!(config.path.as_deref(), Some(path.as_path()));

    let error = Config::from_path(&dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(error, ConfigError::Io { .. }), "{error}");
}

#[test]
fn demo_configuration() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../demos/config.json");
    let config = Config::from_path(&path).unwrap();

    pretty_assertions::assert_eq!(config.users.len(), 2);
    pretty_assertions::assert_eq!(config.users[0].selector_kind, SelectorKind::Script);
    pretty_assertions::assert_eq!(config.users[1].selector_kind, SelectorKind::Plugin);
}
