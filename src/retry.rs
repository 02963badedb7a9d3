// Copyright (C) 2020  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Retry policy of the serialized request controller.
//!
//! The inverter answers with spurious timeouts and slave-busy exceptions
//! when it is poked too eagerly; those two conditions (and only those) are
//! absorbed by re-sending the request after a constant delay.

use std::time::Duration;

use crate::error::Error;

/// Constant-interval retry budget for one logical operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts
    pub interval: Duration,
    /// Total number of attempts, first one included
    pub max_tries: u32,
}

impl RetryPolicy {
    pub const fn new(interval: Duration, max_tries: u32) -> Self {
        Self {
            interval,
            max_tries,
        }
    }

    /// Policy for ordinary register reads and writes
    pub const fn register_access() -> Self {
        Self::new(Duration::from_secs(2), 5)
    }

    /// Policy for the file-upload sub-protocol, which the firmware
    /// services at much lower priority
    pub const fn file_upload() -> Self {
        Self::new(Duration::from_secs(10), 6)
    }

    /// Whether `error` is worth another attempt after `tries` attempts
    /// already made
    pub fn wants_retry(&self, error: &Error, tries: u32) -> bool {
        error.is_transient() && tries < self.max_tries
    }
}
