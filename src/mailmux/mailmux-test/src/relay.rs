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


use mailmux_config::field::Downstream;
use mailmux_delivery::{Envelope, Relay, RelayError};

/// A message handed to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    /// Downstream used, with the credentials the relay received.
    pub downstream: Downstream,
    ///
    pub envelope: Envelope,
    ///
    pub body: Vec<u8>,
}

/// [`Relay`] recording every submission instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingRelay {
    refused: Vec<String>,
    sent: std::sync::Mutex<Vec<Sent>>,
}

impl RecordingRelay {
    /// A relay failing for the downstreams in `addrs`, recording the others.
    #[must_use]
    pub fn refusing<'a>(addrs: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            refused: addrs.into_iter().map(str::to_string).collect(),
            sent: std::sync::Mutex::default(),
        }
    }

    /// Successful submissions, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Relay for RecordingRelay {
    fn send(
        &self,
        downstream: &Downstream,
        envelope: &Envelope,
        body: &[u8],
        _: Option<std::time::Duration>,
    ) -> Result<(), RelayError> {
        if self.refused.contains(&downstream.addr) {
            return Err(RelayError::Transport {
                addr: downstream.addr.clone(),
                message: "554 5.7.1 Relay access denied".to_string(),
            });
        }

        tracing::debug!(addr = %downstream.addr, "Recording a relayed message.");
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Sent {
                downstream: downstream.clone(),
                envelope: envelope.clone(),
                body: body.to_vec(),
            });
        Ok(())
    }
}
