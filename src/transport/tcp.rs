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

//! Modbus-TCP framing (MBAP header) over a tokio TCP stream.

use async_trait::async_trait;
use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::frames::{self, PrivateRequest, PrivateResponse};
use crate::transport::{self, Reply, Transport, WriteEcho};

/// Default Modbus-TCP port
pub const DEFAULT_PORT: u16 = 502;

const MBAP_HEADER_LEN: usize = 7;
const PROTOCOL_ID: u16 = 0x0000;

/// Modbus-TCP client transport
pub struct TcpTransport {
    stream: Option<TcpStream>,
    transaction_id: u16,
}

impl TcpTransport {
    /// Open a TCP connection to the inverter's Modbus interface
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Connection(format!("connect to {}:{}: {}", host, port, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::Connection(e.to_string()))?;
        debug!("connected to {}:{}", host, port);

        Ok(Self {
            stream: Some(stream),
            transaction_id: 0,
        })
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::Connection("TCP transport is not connected".into()))
    }

    /// One request/response exchange. Any I/O failure poisons the
    /// connection; the caller has to reconnect.
    async fn exchange(&mut self, slave: u8, pdu: &[u8]) -> Result<Vec<u8>> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let tid = self.transaction_id;

        let mut adu = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
        adu.extend_from_slice(&tid.to_be_bytes());
        adu.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        adu.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
        adu.push(slave);
        adu.extend_from_slice(pdu);

        let result = self.exchange_inner(tid, slave, &adu).await;
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    async fn exchange_inner(&mut self, tid: u16, slave: u8, adu: &[u8]) -> Result<Vec<u8>> {
        let stream = self.stream()?;

        trace!("tcp tx: {:02x?}", adu);
        stream
            .write_all(adu)
            .await
            .map_err(|e| Error::Connection(format!("send failed: {}", e)))?;

        loop {
            let mut header = [0u8; MBAP_HEADER_LEN];
            stream
                .read_exact(&mut header)
                .await
                .map_err(|e| Error::Connection(format!("receive failed: {}", e)))?;

            let rx_tid = u16::from_be_bytes([header[0], header[1]]);
            let protocol = u16::from_be_bytes([header[2], header[3]]);
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            let unit = header[6];

            if protocol != PROTOCOL_ID || length == 0 {
                return Err(Error::ProtocolViolation(format!(
                    "bad MBAP header: {:02x?}",
                    header
                )));
            }

            let mut pdu = vec![0u8; length - 1];
            stream
                .read_exact(&mut pdu)
                .await
                .map_err(|e| Error::Connection(format!("receive failed: {}", e)))?;
            trace!("tcp rx: tid {} unit {} pdu {:02x?}", rx_tid, unit, pdu);

            // a stale response to a request whose deadline already fired
            // may still sit in the socket; skip until our transaction
            if rx_tid != tid {
                debug!("dropping stale response with transaction id {}", rx_tid);
                continue;
            }
            if unit != slave {
                return Err(Error::ProtocolViolation(format!(
                    "response from unit {}, expected {}",
                    unit, slave
                )));
            }
            return Ok(pdu);
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
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
            // the 0x06 echo is address + value, which parses the same way
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
        self.stream.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            // best effort, the peer may already be gone
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}
