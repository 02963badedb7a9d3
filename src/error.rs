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

//! The Huawei solar client errors

use thiserror::Error;

/// Local error definition
#[derive(Error, Debug)]
pub enum Error {
    /// General error used for conditions that don't deserve their own variant.
    #[error("{0}")]
    General(String),

    /// Transport is not open or the connection dropped mid-exchange.
    /// Never retried by the request controller; the caller may reconnect.
    #[error("connection: {0}")]
    Connection(String),

    /// The per-request receive deadline elapsed. Retried by the controller.
    #[error("request timed out")]
    Timeout,

    /// Modbus exception 0x06. Retried by the controller.
    #[error("device reported slave busy")]
    SlaveBusy,

    /// Modbus exception 0x02. Never retried; capability probes interpret
    /// this as "feature absent".
    #[error("illegal register address")]
    IllegalAddress,

    /// Modbus exception 0x80 as used by Huawei firmware for operations
    /// requiring an authenticated session.
    #[error("permission denied")]
    PermissionDenied,

    /// The inverter rejected the login credentials (non-zero login status).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Unexpected bytes in a private-function response.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The CRC of an uploaded file doesn't match the CRC reported by the
    /// inverter.
    #[error("file crc mismatch: computed {computed:#06x}, device reported {expected:#06x}")]
    CrcMismatch { computed: u16, expected: u16 },

    /// A register name not present in the catalog. Purely local.
    #[error("unknown register name: {0}")]
    InvalidName(String),

    /// A `get_multiple` input violating the adjacency/gap contract. Purely
    /// local, the transport is never touched.
    #[error("invalid register range: {0}")]
    InvalidRange(String),

    /// A value that cannot be encoded into the target register.
    #[error("invalid value for register {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    /// Read retries exhausted or a terminal read error reported by the
    /// device.
    #[error("read failed: {0}")]
    Read(String),

    /// Write retries exhausted or a terminal write error reported by the
    /// device.
    #[error("write failed: {0}")]
    Write(String),
}

/// Convenience type alias
pub type Result<T> = std::result::Result<T, self::Error>;

impl Error {
    /// True for errors the request controller is allowed to absorb by
    /// retrying the exchange.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout | Error::SlaveBusy)
    }
}
