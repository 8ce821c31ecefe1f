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


mod auth;
mod transaction;

use crate::plain;

const GREETING: &str = "220 testserver.com Service ready\r\n";

const EHLO: &str = "250-testserver.com\r\n\
                    250-AUTH PLAIN\r\n\
                    250-8BITMIME\r\n\
                    250-SMTPUTF8\r\n\
                    250-PIPELINING\r\n\
                    250 SIZE 20000000\r\n";

const AUTH_OK: &str = "235 2.7.0 Authentication succeeded\r\n";

const AUTH_REQUIRED: &str = "530 5.7.0 Authentication required\r\n";

const BAD_SEQUENCE: &str = "503 Bad sequence of commands\r\n";

const QUIT: &str = "221 Service closing transmission channel\r\n";

fn auth_alice() -> String {
    format!("AUTH PLAIN {}\r\n", plain("", "alice@example.com", "secret"))
}
