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

//! Client library for Huawei solar inverters speaking Modbus-TCP/RTU.
//!
//! The inverter exposes its data model as holding registers plus a
//! vendor-private function code for login and file transfers, and it is a
//! strictly single-client device: concurrent or back-to-back requests make
//! it answer with spurious timeouts and slave-busy exceptions. This crate
//! provides:
//!
//! * a typed register catalog translating field names into word ranges
//!   and decoded values ([`registers`]),
//! * batched reads fusing many registers into one transaction
//!   ([`Client::get_multiple`]),
//! * the session discipline the device needs to stay responsive
//!   (serialized requests, cooldown, constant-interval retries),
//! * challenge/response login, keep-alive and chunked file upload,
//! * a high-level [`Bridge`] that probes device capabilities and serves
//!   complete snapshots.
//!
//! ```no_run
//! use ii_huawei_solar::Bridge;
//!
//! # async fn run() -> ii_huawei_solar::Result<()> {
//! let bridge = Bridge::connect("192.168.1.10", 502, 0).await?;
//! let snapshot = bridge.update().await?;
//! for (name, reading) in &snapshot {
//!     println!("{}: {} {}", name, reading.value, reading.unit.unwrap_or(""));
//! }
//! bridge.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod client;
pub mod codec;
pub mod crc;
pub mod error;
pub mod frames;
pub mod names;
pub mod registers;
pub mod retry;
pub mod test_utils;
pub mod transport;
pub mod values;

pub use bridge::{Bridge, InverterInfo, HEARTBEAT_INTERVAL};
pub use client::{
    Client, Config, DEFAULT_COOLDOWN_TIME, DEFAULT_SLAVE, DEFAULT_TIMEOUT, HEARTBEAT_REGISTER,
    MAX_BATCH_GAP,
};
pub use error::{Error, Result};
pub use registers::{
    AccessLevel, Catalog, EnumValue, Reading, RegisterDef, RegisterKind, Unit, Value, REGISTERS,
};
pub use retry::RetryPolicy;
pub use transport::{Reply, Transport, WriteEcho};
