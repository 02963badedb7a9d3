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

//! Modbus transport seam.
//!
//! The session core talks to the inverter exclusively through the
//! [`Transport`] trait; only the framers below (and the fake in
//! `test_utils`) know how ADUs look on the wire. A device can answer any
//! request with a Modbus exception instead of data, which is not a
//! transport failure, so every operation returns a [`Reply`].

pub mod rtu;
pub mod tcp;

use async_trait::async_trait;

use crate::error::Result;
use crate::frames::{PrivateRequest, PrivateResponse};

pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Modbus exception codes with meaning to this crate
pub const EXC_ILLEGAL_ADDRESS: u8 = 0x02;
pub const EXC_SLAVE_BUSY: u8 = 0x06;
/// Huawei-specific: operation requires an authenticated session
pub const EXC_PERMISSION_DENIED: u8 = 0x80;

/// Outcome of a Modbus exchange: either function data or the exception
/// code the device raised
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Data(T),
    Exception(u8),
}

/// Echo returned by the device for register writes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteEcho {
    pub address: u16,
    pub count: u16,
}

/// Async Modbus client transport
#[async_trait]
pub trait Transport: Send {
    /// Function code 0x03
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        slave: u8,
    ) -> Result<Reply<Vec<u16>>>;

    /// Function code 0x10
    async fn write_registers(
        &mut self,
        address: u16,
        words: &[u16],
        slave: u8,
    ) -> Result<Reply<WriteEcho>>;

    /// Function code 0x06
    async fn write_single_register(
        &mut self,
        address: u16,
        word: u16,
        slave: u8,
    ) -> Result<Reply<WriteEcho>>;

    /// Vendor-private function code 0x41
    async fn execute(
        &mut self,
        request: &PrivateRequest,
        slave: u8,
    ) -> Result<Reply<PrivateResponse>>;

    fn is_connected(&self) -> bool;

    async fn close(&mut self) -> Result<()>;
}

/// Build a read-holding-registers PDU
pub(crate) fn read_holding_pdu(address: u16, count: u16) -> Vec<u8> {
    vec![
        FC_READ_HOLDING_REGISTERS,
        (address >> 8) as u8,
        address as u8,
        (count >> 8) as u8,
        count as u8,
    ]
}

/// Build a write-multiple-registers PDU
pub(crate) fn write_multiple_pdu(address: u16, words: &[u16]) -> Vec<u8> {
    let count = words.len() as u16;
    let mut pdu = Vec::with_capacity(6 + words.len() * 2);
    pdu.push(FC_WRITE_MULTIPLE_REGISTERS);
    pdu.push((address >> 8) as u8);
    pdu.push(address as u8);
    pdu.push((count >> 8) as u8);
    pdu.push(count as u8);
    pdu.push((words.len() * 2) as u8);
    for word in words {
        pdu.push((word >> 8) as u8);
        pdu.push(*word as u8);
    }
    pdu
}

/// Build a write-single-register PDU
pub(crate) fn write_single_pdu(address: u16, word: u16) -> Vec<u8> {
    vec![
        FC_WRITE_SINGLE_REGISTER,
        (address >> 8) as u8,
        address as u8,
        (word >> 8) as u8,
        word as u8,
    ]
}

/// Interpret a response PDU for the given request function code.
///
/// Returns the payload after the function code, or the exception reply.
pub(crate) fn split_response_pdu(
    function_code: u8,
    pdu: &[u8],
) -> crate::error::Result<Reply<Vec<u8>>> {
    use crate::error::Error;

    if pdu.is_empty() {
        return Err(Error::ProtocolViolation("empty response PDU".into()));
    }
    if pdu[0] == function_code | 0x80 {
        if pdu.len() < 2 {
            return Err(Error::ProtocolViolation(
                "exception response without exception code".into(),
            ));
        }
        return Ok(Reply::Exception(pdu[1]));
    }
    if pdu[0] != function_code {
        return Err(Error::ProtocolViolation(format!(
            "response function code {:#04x} doesn't match request {:#04x}",
            pdu[0], function_code
        )));
    }
    Ok(Reply::Data(pdu[1..].to_vec()))
}

/// Parse the payload of a read-holding-registers response into words
pub(crate) fn parse_read_payload(payload: &[u8], count: u16) -> crate::error::Result<Vec<u16>> {
    use crate::error::Error;

    if payload.is_empty() {
        return Err(Error::ProtocolViolation("empty read response".into()));
    }
    let byte_count = payload[0] as usize;
    let data = &payload[1..];
    if data.len() != byte_count || byte_count != count as usize * 2 {
        return Err(Error::ProtocolViolation(format!(
            "read response carries {} bytes, expected {}",
            data.len(),
            count as usize * 2
        )));
    }
    Ok(data
        .chunks(2)
        .map(|pair| (pair[0] as u16) << 8 | pair[1] as u16)
        .collect())
}

/// Parse the payload of a write response (0x06 and 0x10 share the layout)
pub(crate) fn parse_write_payload(payload: &[u8]) -> crate::error::Result<WriteEcho> {
    use crate::error::Error;

    if payload.len() != 4 {
        return Err(Error::ProtocolViolation(format!(
            "write echo has {} bytes, expected 4",
            payload.len()
        )));
    }
    Ok(WriteEcho {
        address: (payload[0] as u16) << 8 | payload[1] as u16,
        count: (payload[2] as u16) << 8 | payload[3] as u16,
    })
}
