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


use super::{auth_alice, AUTH_OK, AUTH_REQUIRED, BAD_SEQUENCE, GREETING};
use crate::run_test;
use pretty_assertions::assert_eq;

const HELO: &str = "250 testserver.com\r\n";
const DATA: &str = "354 Start mail input; end with <CRLF>.<CRLF>\r\n";
const OK: &str = "250 Ok\r\n";

run_test! {
    fn mail_before_auth,
    input = [
        "HELO client.example.com\r\n",
        "MAIL FROM:<john@doe.com>\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_REQUIRED,
    ],
    then = |sent| {
        assert!(sent.is_empty());
    },
}

run_test! {
    fn transaction_before_helo,
    input = [
        "MAIL FROM:<john@doe.com>\r\n",
        "RCPT TO:<jane@doe.com>\r\n",
        "DATA\r\n",
    ],
    expected = [
        GREETING,
        AUTH_REQUIRED,
        AUTH_REQUIRED,
        AUTH_REQUIRED,
    ],
}

run_test! {
    fn rcpt_and_data_before_auth,
    input = [
        "HELO client.example.com\r\n",
        "RCPT TO:<jane@doe.com>\r\n",
        "DATA\r\n",
        auth_alice(),
        "MAIL FROM:<john@doe.com>\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_REQUIRED,
        AUTH_REQUIRED,
        AUTH_OK,
        OK,
    ],
}

run_test! {
    fn rcpt_without_mail,
    input = [
        "HELO client.example.com\r\n",
        auth_alice(),
        "RCPT TO:<jane@doe.com>\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_OK,
        BAD_SEQUENCE,
    ],
}

run_test! {
    fn data_without_rcpt,
    input = [
        "HELO client.example.com\r\n",
        auth_alice(),
        "MAIL FROM:<john@doe.com>\r\n",
        "DATA\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_OK,
        OK,
        BAD_SEQUENCE,
    ],
}

run_test! {
    fn mail_after_rcpt,
    input = [
        "HELO client.example.com\r\n",
        auth_alice(),
        "MAIL FROM:<john@doe.com>\r\n",
        "RCPT TO:<jane@doe.com>\r\n",
        "MAIL FROM:<john@doe.com>\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_OK,
        OK,
        OK,
        BAD_SEQUENCE,
    ],
}

run_test! {
    fn one_message,
    input = [
        "HELO client.example.com\r\n",
        auth_alice(),
        "MAIL FROM:<john@doe.com>\r\n",
        "RCPT TO:<jane@doe.com>\r\n",
        "RCPT TO:<jim@doe.com>\r\n",
        "DATA\r\n",
        "Subject: hi\r\n\r\n..starts with a dot\r\nbye\r\n.\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_OK,
        OK,
        OK,
        OK,
        DATA,
        OK,
    ],
    then = |sent| {
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope.sender.as_deref(), Some("john@doe.com"));
        assert_eq!(
            sent[0].envelope.recipients,
            vec!["jane@doe.com".to_string(), "jim@doe.com".to_string()]
        );
        assert_eq!(
            String::from_utf8(sent[0].body.clone()).unwrap(),
            "Subject: hi\r\n\r\n.starts with a dot\r\nbye\r\n"
        );
    },
}

run_test! {
    fn second_mail_replaces_the_sender,
    input = [
        "HELO client.example.com\r\n",
        auth_alice(),
        "MAIL FROM:<john@doe.com>\r\n",
        "MAIL FROM:<jim@doe.com>\r\n",
        "RCPT TO:<jane@doe.com>\r\n",
        "DATA\r\n",
        "hello\r\n.\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_OK,
        OK,
        OK,
        OK,
        DATA,
        OK,
    ],
    then = |sent| {
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope.sender.as_deref(), Some("jim@doe.com"));
    },
}

run_test! {
    fn null_reverse_path,
    input = [
        "HELO client.example.com\r\n",
        auth_alice(),
        "MAIL FROM:<>\r\n",
        "RCPT TO:<jane@doe.com>\r\n",
        "DATA\r\n",
        "bounce\r\n.\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_OK,
        OK,
        OK,
        DATA,
        OK,
    ],
    then = |sent| {
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope.sender, None);
    },
}

run_test! {
    fn reset_keeps_authentication,
    input = [
        "HELO client.example.com\r\n",
        auth_alice(),
        "MAIL FROM:<john@doe.com>\r\n",
        "RCPT TO:<jane@doe.com>\r\n",
        "RSET\r\n",
        "MAIL FROM:<jim@doe.com>\r\n",
        "RCPT TO:<joe@doe.com>\r\n",
        "DATA\r\n",
        "hello\r\n.\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_OK,
        OK,
        OK,
        OK,
        OK,
        OK,
        DATA,
        OK,
    ],
    then = |sent| {
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope.sender.as_deref(), Some("jim@doe.com"));
        assert_eq!(sent[0].envelope.recipients, vec!["joe@doe.com".to_string()]);
    },
}

run_test! {
    fn several_transactions,
    input = [
        "HELO client.example.com\r\n",
        auth_alice(),
        "MAIL FROM:<john@doe.com>\r\n",
        "RCPT TO:<jane@doe.com>\r\n",
        "DATA\r\n",
        "first\r\n.\r\n",
        "MAIL FROM:<john@doe.com>\r\n",
        "RCPT TO:<jim@doe.com>\r\n",
        "DATA\r\n",
        "second\r\n.\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_OK,
        OK,
        OK,
        DATA,
        OK,
        OK,
        OK,
        DATA,
        OK,
    ],
    then = |sent| {
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].body, b"first\r\n".to_vec());
        assert_eq!(sent[0].envelope.recipients, vec!["jane@doe.com".to_string()]);
        assert_eq!(sent[1].body, b"second\r\n".to_vec());
        assert_eq!(sent[1].envelope.recipients, vec!["jim@doe.com".to_string()]);
    },
}

run_test! {
    fn size_parameter_over_the_limit,
    input = [
        "HELO client.example.com\r\n",
        auth_alice(),
        "MAIL FROM:<john@doe.com> SIZE=20000001\r\n",
        "MAIL FROM:<john@doe.com> SIZE=20000000\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_OK,
        "552 5.3.4 Message size exceeds fixed maximum message size\r\n",
        OK,
    ],
}

run_test! {
    fn message_over_the_limit,
    input = [
        "HELO client.example.com\r\n",
        auth_alice(),
        "MAIL FROM:<john@doe.com>\r\n",
        "RCPT TO:<jane@doe.com>\r\n",
        "DATA\r\n",
        format!("{}\r\n.\r\n", "X".repeat(100)),
        "MAIL FROM:<john@doe.com>\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_OK,
        OK,
        OK,
        DATA,
        "552 4.3.1 Message size exceeds fixed maximum message size\r\n",
        OK,
    ],
    config = {
        let mut config = crate::config::local_test();
        config.server.message_size_limit = 64;
        config
    },
    then = |sent| {
        assert!(sent.is_empty());
    },
}

run_test! {
    fn too_many_errors,
    input = [
        "HELO client.example.com\r\n",
        "MAIL FROM:<john@doe.com>\r\n",
        "MAIL FROM:<john@doe.com>\r\n",
        "MAIL FROM:<john@doe.com>\r\n",
    ],
    expected = [
        GREETING,
        HELO,
        AUTH_REQUIRED,
        AUTH_REQUIRED,
        "530-5.7.0 Authentication required\r\n\
        530 Too many errors from the client\r\n",
    ],
    config = {
        let mut config = crate::config::local_test();
        config.server.smtp.error.hard_count = 3;
        config
    },
}

run_test! {
    fn idle_client_is_disconnected,
    input = [
        "HELO client.example.com\r\n",
    ],
    expected = [
        GREETING,
        "250 testserver.com\r\n\
        451 Timeout - closing connection\r\n",
    ],
    config = {
        let mut config = crate::config::local_test();
        config.server.smtp.timeout_client = std::time::Duration::from_millis(500);
        config
    },
}
