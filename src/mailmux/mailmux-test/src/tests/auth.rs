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


use super::{auth_alice, AUTH_OK, EHLO, GREETING, QUIT};
use crate::{plain, run_test};

run_test! {
    fn ehlo_advertises_plain,
    input = [
        "EHLO client.example.com\r\n",
        "QUIT\r\n",
    ],
    expected = [
        GREETING,
        EHLO,
        QUIT,
    ],
}

run_test! {
    fn ehlo_without_pipelining,
    input = [
        "EHLO client.example.com\r\n",
    ],
    expected = [
        GREETING,
        "250-testserver.com\r\n\
        250-AUTH PLAIN\r\n\
        250-8BITMIME\r\n\
        250-SMTPUTF8\r\n\
        250 SIZE 20000000\r\n",
    ],
    config = {
        let mut config = crate::config::local_test();
        config.server.pipelining = false;
        config
    },
}

run_test! {
    fn plain_with_initial_response,
    input = [
        "EHLO client.example.com\r\n",
        auth_alice(),
    ],
    expected = [
        GREETING,
        EHLO,
        AUTH_OK,
    ],
}

run_test! {
    fn plain_with_challenge,
    input = [
        "EHLO client.example.com\r\n",
        "AUTH PLAIN\r\n",
        format!("{}\r\n", plain("", "alice@example.com", "secret")),
    ],
    expected = [
        GREETING,
        EHLO,
        "334 \r\n",
        AUTH_OK,
    ],
}

run_test! {
    fn identity_equal_to_username,
    input = [
        "EHLO client.example.com\r\n",
        format!(
            "AUTH PLAIN {}\r\n",
            plain("alice@example.com", "alice@example.com", "secret")
        ),
    ],
    expected = [
        GREETING,
        EHLO,
        AUTH_OK,
    ],
}

run_test! {
    fn identity_must_match_username,
    input = [
        "EHLO client.example.com\r\n",
        format!(
            "AUTH PLAIN {}\r\n",
            plain("other@example.com", "alice@example.com", "secret")
        ),
    ],
    expected = [
        GREETING,
        EHLO,
        "535 5.7.8 Authentication credentials invalid\r\n",
    ],
}

run_test! {
    fn failed_attempt_keeps_the_connection,
    input = [
        "EHLO client.example.com\r\n",
        format!("AUTH PLAIN {}\r\n", plain("", "alice@example.com", "Secret")),
        format!("AUTH PLAIN {}\r\n", plain("", "alice@example.co", "secret")),
        auth_alice(),
    ],
    expected = [
        GREETING,
        EHLO,
        "535 5.7.8 Authentication credentials invalid\r\n",
        "535 5.7.8 Authentication credentials invalid\r\n",
        AUTH_OK,
    ],
}

run_test! {
    fn already_authenticated,
    input = [
        "EHLO client.example.com\r\n",
        auth_alice(),
        format!("AUTH PLAIN {}\r\n", plain("", "bob@example.com", "hunter2")),
    ],
    expected = [
        GREETING,
        EHLO,
        AUTH_OK,
        "503 5.5.1 Already authenticated\r\n",
    ],
}

run_test! {
    fn ehlo_first,
    input = [
        auth_alice(),
    ],
    expected = [
        GREETING,
        "503 5.5.1 Send EHLO first\r\n",
    ],
}

run_test! {
    fn unsupported_mechanism,
    input = [
        "EHLO client.example.com\r\n",
        "AUTH LOGIN\r\n",
        "AUTH CRAM-MD5\r\n",
    ],
    expected = [
        GREETING,
        EHLO,
        "504 5.5.4 Mechanism is not supported\r\n",
        "504 5.5.4 Mechanism is not supported\r\n",
    ],
}

run_test! {
    fn unknown_mechanism,
    input = [
        "EHLO client.example.com\r\n",
        "AUTH FOOBAR\r\n",
    ],
    expected = [
        GREETING,
        EHLO,
        "501 Syntax error in parameters or arguments\r\n",
    ],
}

run_test! {
    fn canceled_by_client,
    input = [
        "EHLO client.example.com\r\n",
        "AUTH PLAIN\r\n",
        "*\r\n",
        auth_alice(),
    ],
    expected = [
        GREETING,
        EHLO,
        "334 \r\n",
        "501 Authentication canceled by client\r\n",
        AUTH_OK,
    ],
}

run_test! {
    fn not_base64,
    input = [
        "EHLO client.example.com\r\n",
        "AUTH PLAIN %%%\r\n",
    ],
    expected = [
        GREETING,
        EHLO,
        "501 5.5.2 Invalid, not base64\r\n",
    ],
}

run_test! {
    fn malformed_response,
    input = [
        "EHLO client.example.com\r\n",
        format!(
            "AUTH PLAIN {}\r\n",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, "no separator")
        ),
    ],
    expected = [
        GREETING,
        EHLO,
        "501 5.5.2 Malformed authentication response\r\n",
    ],
}

run_test! {
    fn unknown_user,
    input = [
        "EHLO client.example.com\r\n",
        format!("AUTH PLAIN {}\r\n", plain("", "carol@example.com", "secret")),
    ],
    expected = [
        GREETING,
        EHLO,
        "535 5.7.8 Authentication credentials invalid\r\n",
    ],
}

run_test! {
    fn quit_logs_out,
    input = [
        "EHLO client.example.com\r\n",
        auth_alice(),
        "QUIT\r\n",
    ],
    expected = [
        GREETING,
        EHLO,
        AUTH_OK,
        QUIT,
    ],
}
