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

//! Modbus-RTU framing over a serial port.
//!
//! Responses are delimited by bus silence: after the first bytes arrive,
//! the frame is considered complete once the line stays idle for
//! [`FRAME_IDLE`]. The CRC then validates the cut. This handles responses
//! arriving split across multiple reads, which the vendor-private frames
//! commonly are.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::time;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::crc;
use crate::error::{Error, Result};
use crate::frames::{self, PrivateRequest, PrivateResponse};
use crate::transport::{self, Reply, Transport, WriteEcho};

/// Inter-frame silence delimiting a response
pub const FRAME_IDLE: Duration = Duration::from_millis(10);

/// Smallest valid RTU frame: address, function code, exception code, CRC
const MIN_FRAME_LEN: usize = 5;

/// Serial line settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub parity: ParitySetting,
    pub stop_bits: StopBitsSetting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParitySetting {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBitsSetting {
    One,
    Two,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            parity: ParitySetting::None,
            stop_bits: StopBitsSetting::One,
        }
    }
}

/// Modbus-RTU client transport
pub struct RtuTransport {
    port: Option<SerialStream>,
}

impl RtuTransport {
    /// Open the serial port with 8 data bits and the configured framing
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let parity = match config.parity {
            ParitySetting::None => Parity::None,
            ParitySetting::Odd => Parity::Odd,
            ParitySetting::Even => Parity::Even,
        };
        let stop_bits = match config.stop_bits {
            StopBitsSetting::One => StopBits::One,
            StopBitsSetting::Two => StopBits::Two,
        };

        let port = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(parity)
            .stop_bits(stop_bits)
            .open_native_async()
            .map_err(|e| Error::Connection(format!("open {}: {}", config.port, e)))?;
        debug!("opened serial port {} at {} baud", config.port, config.baud_rate);

        Ok(Self { port: Some(port) })
    }

    fn port(&mut self) -> Result<&mut SerialStream> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::Connection("serial port is not open".into()))
    }

    async fn exchange(&mut self, slave: u8, pdu: &[u8]) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
        frame.push(slave);
        frame.extend_from_slice(pdu);
        let crc = crc::crc16(&frame);
        frame.push(crc as u8);
        frame.push((crc >> 8) as u8);

        let result = self.exchange_inner(slave, &frame).await;
        if matches!(result, Err(Error::Connection(_))) {
            self.port = None;
        }
        result
    }

    async fn exchange_inner(&mut self, slave: u8, frame: &[u8]) -> Result<Vec<u8>> {
        let port = self.port()?;

        trace!("rtu tx: {:02x?}", frame);
        port.write_all(frame)
            .await
            .map_err(|e| Error::Connection(format!("serial write failed: {}", e)))?;

        let mut response: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            if response.len() >= MIN_FRAME_LEN {
                // wait for the line to go idle before cutting the frame
                match time::timeout(FRAME_IDLE, port.read(&mut chunk)).await {
                    Ok(Ok(0)) => {
                        return Err(Error::Connection("serial port closed".into()));
                    }
                    Ok(Ok(n)) => response.extend_from_slice(&chunk[..n]),
                    Ok(Err(e)) => {
                        return Err(Error::Connection(format!("serial read failed: {}", e)));
                    }
                    Err(_) => break,
                }
            } else {
                // the leading bytes have no deadline here; the per-request
                // timeout of the session cancels the whole exchange
                match port.read(&mut chunk).await {
                    Ok(0) => return Err(Error::Connection("serial port closed".into())),
                    Ok(n) => response.extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        return Err(Error::Connection(format!("serial read failed: {}", e)));
                    }
                }
            }
        }
        trace!("rtu rx: {:02x?}", response);

        let len = response.len();
        let expected_crc =
            (response[len - 1] as u16) << 8 | response[len - 2] as u16;
        if crc::crc16(&response[..len - 2]) != expected_crc {
            return Err(Error::ProtocolViolation("RTU frame CRC mismatch".into()));
        }
        if response[0] != slave {
            return Err(Error::ProtocolViolation(format!(
                "response from slave {}, expected {}",
                response[0], slave
            )));
        }
        Ok(response[1..len - 2].to_vec())
    }
}

#[async_trait]
impl Transport for RtuTransport {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        slave: u8,
    ) -> Result<Reply<Vec<u16>>> {
        let pdu = transport::read_holding_pdu(address, count);
        let response = self.exchange(slave, &pdu).await?;
        match transport::split_response_pdu(transport::FC_READ_HOLDING_REGISTERS, &response)? {
            Reply::Exception(code) => Ok(Reply::Exception(code)),
            Reply::Data(payload) => Ok(Reply::Data(transport::parse_read_payload(
                &payload, count,
            )?)),
        }
    }

    async fn write_registers(
        &mut self,
        address: u16,
        words: &[u16],
        slave: u8,
    ) -> Result<Reply<WriteEcho>> {
        let pdu = transport::write_multiple_pdu(address, words);
        let response = self.exchange(slave, &pdu).await?;
        match transport::split_response_pdu(transport::FC_WRITE_MULTIPLE_REGISTERS, &response)? {
            Reply::Exception(code) => Ok(Reply::Exception(code)),
            Reply::Data(payload) => Ok(Reply::Data(transport::parse_write_payload(&payload)?)),
        }
    }

    async fn write_single_register(
        &mut self,
        address: u16,
        word: u16,
        slave: u8,
    ) -> Result<Reply<WriteEcho>> {
        let pdu = transport::write_single_pdu(address, word);
        let response = self.exchange(slave, &pdu).await?;
        match transport::split_response_pdu(transport::FC_WRITE_SINGLE_REGISTER, &response)? {
            Reply::Exception(code) => Ok(Reply::Exception(code)),
            Reply::Data(payload) => {
                let echo = transport::parse_write_payload(&payload)?;
                Ok(Reply::Data(WriteEcho {
                    address: echo.address,
                    count: 1,
                }))
            }
        }
    }

    async fn execute(
        &mut self,
        request: &PrivateRequest,
        slave: u8,
    ) -> Result<Reply<PrivateResponse>> {
        let mut pdu = Vec::with_capacity(2 + request.content.len());
        pdu.push(frames::FUNCTION_CODE);
        pdu.extend_from_slice(&request.to_bytes());

        let response = self.exchange(slave, &pdu).await?;
        match transport::split_response_pdu(frames::FUNCTION_CODE, &response)? {
            Reply::Exception(code) => Ok(Reply::Exception(code)),
            Reply::Data(payload) => Ok(Reply::Data(PrivateResponse::from_bytes(&payload)?)),
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }
}
