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

//! Vendor-private Modbus frames (function code 0x41).
//!
//! All private traffic shares one function code; the first payload byte is
//! a sub-command selecting between the login handshake and the chunked
//! file-upload procedure. The request/response layouts here follow the
//! "Solar Inverter Modbus Interface Definitions", section 6.3.

use std::convert::TryInto;

use crate::error::{Error, Result};

/// The Huawei private function code
pub const FUNCTION_CODE: u8 = 0x41;

pub const SUB_CHALLENGE: u8 = 0x24;
pub const SUB_LOGIN: u8 = 0x25;
pub const SUB_UPLOAD_START: u8 = 0x05;
pub const SUB_UPLOAD_DATA: u8 = 0x06;
pub const SUB_UPLOAD_COMPLETE: u8 = 0x0c;

/// Size of the nonces exchanged during the login handshake
pub const NONCE_LEN: usize = 16;

/// Request with the private function code
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateRequest {
    pub sub_command: u8,
    pub content: Vec<u8>,
}

impl PrivateRequest {
    /// Ask the inverter for a login nonce
    pub fn challenge() -> Self {
        Self {
            sub_command: SUB_CHALLENGE,
            content: vec![0x01, 0x00],
        }
    }

    /// Login frame: client nonce, username and the HMAC computed over the
    /// inverter nonce, each length-prefixed, with a total-length byte up
    /// front.
    pub fn login(client_nonce: &[u8; NONCE_LEN], username: &str, digest: &[u8]) -> Self {
        let username = username.as_bytes();
        let total = client_nonce.len() + 1 + username.len() + 1 + digest.len();

        let mut content = Vec::with_capacity(1 + total);
        content.push(total as u8);
        content.extend_from_slice(client_nonce);
        content.push(username.len() as u8);
        content.extend_from_slice(username);
        content.push(digest.len() as u8);
        content.extend_from_slice(digest);

        Self {
            sub_command: SUB_LOGIN,
            content,
        }
    }

    pub fn upload_start(file_type: u8, customized: &[u8]) -> Self {
        let mut content = Vec::with_capacity(2 + customized.len());
        content.push(1 + customized.len() as u8);
        content.push(file_type);
        content.extend_from_slice(customized);

        Self {
            sub_command: SUB_UPLOAD_START,
            content,
        }
    }

    pub fn upload_data(file_type: u8, frame_no: u16) -> Self {
        Self {
            sub_command: SUB_UPLOAD_DATA,
            content: vec![0x03, file_type, (frame_no >> 8) as u8, frame_no as u8],
        }
    }

    pub fn upload_complete(file_type: u8) -> Self {
        Self {
            sub_command: SUB_UPLOAD_COMPLETE,
            content: vec![0x01, file_type],
        }
    }

    /// Serialized PDU payload (everything after the function code)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.content.len());
        out.push(self.sub_command);
        out.extend_from_slice(&self.content);
        out
    }
}

/// Response with the private function code, not yet interpreted
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateResponse {
    pub sub_command: u8,
    pub content: Vec<u8>,
}

impl PrivateResponse {
    /// Split a PDU payload (everything after the function code) into
    /// sub-command and content.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::ProtocolViolation(
                "empty private-function response".into(),
            ));
        }
        Ok(Self {
            sub_command: data[0],
            content: data[1..].to_vec(),
        })
    }

    fn check_sub_command(&self, expected: u8) -> Result<()> {
        if self.sub_command != expected {
            return Err(Error::ProtocolViolation(format!(
                "unexpected sub-command {:#04x}, expected {:#04x}",
                self.sub_command, expected
            )));
        }
        Ok(())
    }
}

/// Parsed challenge response: the 16-byte inverter nonce
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeResponse {
    pub inverter_nonce: [u8; NONCE_LEN],
}

impl ChallengeResponse {
    pub fn parse(resp: &PrivateResponse) -> Result<Self> {
        resp.check_sub_command(SUB_CHALLENGE)?;
        if resp.content.len() < 1 + NONCE_LEN || resp.content[0] != 0x11 {
            return Err(Error::ProtocolViolation(format!(
                "malformed challenge response: {:02x?}",
                resp.content
            )));
        }
        let inverter_nonce = resp.content[1..1 + NONCE_LEN]
            .try_into()
            .expect("nonce length checked above");
        Ok(Self { inverter_nonce })
    }
}

/// Parsed login response: status byte plus the MAC the inverter computed
/// over our client nonce
#[derive(Debug, Clone, PartialEq)]
pub struct LoginResponse {
    pub status: u8,
    pub inverter_mac: Vec<u8>,
}

impl LoginResponse {
    pub fn parse(resp: &PrivateResponse) -> Result<Self> {
        resp.check_sub_command(SUB_LOGIN)?;
        if resp.content.len() < 3 {
            return Err(Error::ProtocolViolation(format!(
                "short login response: {:02x?}",
                resp.content
            )));
        }
        let status = resp.content[1];
        let mac_len = resp.content[2] as usize;
        if resp.content.len() < 3 + mac_len {
            return Err(Error::ProtocolViolation(format!(
                "login response truncates MAC: {:02x?}",
                resp.content
            )));
        }
        Ok(Self {
            status,
            inverter_mac: resp.content[3..3 + mac_len].to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadStartResponse {
    pub file_type: u8,
    pub file_length: u32,
    pub data_frame_length: u8,
    pub customized: Vec<u8>,
}

impl UploadStartResponse {
    pub fn parse(resp: &PrivateResponse) -> Result<Self> {
        resp.check_sub_command(SUB_UPLOAD_START)?;
        let c = &resp.content;
        if c.len() < 7 {
            return Err(Error::ProtocolViolation(format!(
                "short upload-start response: {:02x?}",
                c
            )));
        }
        let data_len = c[0] as usize;
        let customized = c[7..].to_vec();
        if customized.len() != data_len.saturating_sub(6) {
            return Err(Error::ProtocolViolation(format!(
                "upload-start length byte {} disagrees with payload size {}",
                data_len,
                c.len() - 1
            )));
        }
        Ok(Self {
            file_type: c[1],
            file_length: u32::from_be_bytes([c[2], c[3], c[4], c[5]]),
            data_frame_length: c[6],
            customized,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadDataResponse {
    pub file_type: u8,
    pub frame_no: u16,
    pub frame_data: Vec<u8>,
}

impl UploadDataResponse {
    pub fn parse(resp: &PrivateResponse) -> Result<Self> {
        resp.check_sub_command(SUB_UPLOAD_DATA)?;
        let c = &resp.content;
        if c.len() < 4 {
            return Err(Error::ProtocolViolation(format!(
                "short upload-data response: {:02x?}",
                c
            )));
        }
        let data_len = c[0] as usize;
        let frame_data = c[4..].to_vec();
        if frame_data.len() != data_len.saturating_sub(3) {
            return Err(Error::ProtocolViolation(format!(
                "upload-data length byte {} disagrees with payload size {}",
                data_len,
                c.len() - 1
            )));
        }
        Ok(Self {
            file_type: c[1],
            frame_no: u16::from_be_bytes([c[2], c[3]]),
            frame_data,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadCompleteResponse {
    pub file_type: u8,
    pub file_crc: u16,
}

impl UploadCompleteResponse {
    pub fn parse(resp: &PrivateResponse) -> Result<Self> {
        resp.check_sub_command(SUB_UPLOAD_COMPLETE)?;
        let c = &resp.content;
        if c.len() < 4 || c[0] != 0x03 {
            return Err(Error::ProtocolViolation(format!(
                "malformed upload-complete response: {:02x?}",
                c
            )));
        }
        Ok(Self {
            file_type: c[1],
            file_crc: u16::from_be_bytes([c[2], c[3]]),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_challenge_request() {
        let req = PrivateRequest::challenge();
        assert_eq!(req.to_bytes(), [0x24, 0x01, 0x00]);
    }

    #[test]
    fn test_challenge_response() {
        let mut data = vec![0x24, 0x11];
        data.extend(0u8..16);
        let resp = PrivateResponse::from_bytes(&data).unwrap();
        let challenge = ChallengeResponse::parse(&resp).unwrap();
        assert_eq!(challenge.inverter_nonce[0], 0);
        assert_eq!(challenge.inverter_nonce[15], 15);

        // abnormal first content byte
        let resp = PrivateResponse::from_bytes(&[0x24, 0x12, 0, 0]).unwrap();
        assert!(matches!(
            ChallengeResponse::parse(&resp),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_login_request_layout() {
        let nonce = [0xaau8; NONCE_LEN];
        let digest = [0x5au8; 32];
        let req = PrivateRequest::login(&nonce, "installer", &digest);
        let bytes = req.to_bytes();

        assert_eq!(bytes[0], SUB_LOGIN);
        // total length: nonce + 1 + username + 1 + digest
        assert_eq!(bytes[1] as usize, 16 + 1 + 9 + 1 + 32);
        assert_eq!(&bytes[2..18], &nonce);
        assert_eq!(bytes[18], 9);
        assert_eq!(&bytes[19..28], b"installer");
        assert_eq!(bytes[28], 32);
        assert_eq!(&bytes[29..61], &digest);
        assert_eq!(bytes.len(), 61);
    }

    #[test]
    fn test_login_response() {
        let mut data = vec![SUB_LOGIN, 0x22, 0x00, 0x20];
        data.extend([0x11u8; 32].iter());
        let resp = PrivateResponse::from_bytes(&data).unwrap();
        let login = LoginResponse::parse(&resp).unwrap();
        assert_eq!(login.status, 0);
        assert_eq!(login.inverter_mac, vec![0x11u8; 32]);

        let resp = PrivateResponse::from_bytes(&[SUB_LOGIN, 0x01, 0x03, 0x00]).unwrap();
        assert_eq!(LoginResponse::parse(&resp).unwrap().status, 0x03);
    }

    #[test]
    fn test_upload_requests() {
        assert_eq!(
            PrivateRequest::upload_start(0x45, &[]).to_bytes(),
            [0x05, 0x01, 0x45]
        );
        assert_eq!(
            PrivateRequest::upload_start(0x45, &[0xca, 0xfe]).to_bytes(),
            [0x05, 0x03, 0x45, 0xca, 0xfe]
        );
        assert_eq!(
            PrivateRequest::upload_data(0x45, 0x0102).to_bytes(),
            [0x06, 0x03, 0x45, 0x01, 0x02]
        );
        assert_eq!(
            PrivateRequest::upload_complete(0x45).to_bytes(),
            [0x0c, 0x01, 0x45]
        );
    }

    #[test]
    fn test_upload_start_response() {
        // data_len 6, file 0x45, length 300, frame length 128
        let data = [0x05, 0x06, 0x45, 0x00, 0x00, 0x01, 0x2c, 0x80];
        let resp = PrivateResponse::from_bytes(&data).unwrap();
        let start = UploadStartResponse::parse(&resp).unwrap();
        assert_eq!(start.file_type, 0x45);
        assert_eq!(start.file_length, 300);
        assert_eq!(start.data_frame_length, 128);
        assert!(start.customized.is_empty());
    }

    #[test]
    fn test_upload_data_response() {
        let data = [0x06, 0x07, 0x45, 0x00, 0x02, 0xde, 0xad, 0xbe, 0xef];
        let resp = PrivateResponse::from_bytes(&data).unwrap();
        let frame = UploadDataResponse::parse(&resp).unwrap();
        assert_eq!(frame.file_type, 0x45);
        assert_eq!(frame.frame_no, 2);
        assert_eq!(frame.frame_data, [0xde, 0xad, 0xbe, 0xef]);

        // length byte lies about the payload size
        let data = [0x06, 0x09, 0x45, 0x00, 0x02, 0xde, 0xad];
        let resp = PrivateResponse::from_bytes(&data).unwrap();
        assert!(matches!(
            UploadDataResponse::parse(&resp),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_upload_complete_response() {
        let data = [0x0c, 0x03, 0x45, 0xc3, 0x7b];
        let resp = PrivateResponse::from_bytes(&data).unwrap();
        let complete = UploadCompleteResponse::parse(&resp).unwrap();
        assert_eq!(complete.file_type, 0x45);
        assert_eq!(complete.file_crc, 0xc37b);
    }

    #[test]
    fn test_wrong_sub_command() {
        let resp = PrivateResponse::from_bytes(&[0x06, 0x03, 0x45, 0x00, 0x00]).unwrap();
        assert!(matches!(
            UploadCompleteResponse::parse(&resp),
            Err(Error::ProtocolViolation(_))
        ));
    }
}
