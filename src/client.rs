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

//! Inverter session core.
//!
//! [`Client`] owns the transport behind a session-wide gate that admits a
//! single in-flight request, sleeps a cooldown before releasing, and
//! absorbs the transient errors the inverter produces when polled too
//! eagerly. On top of that discipline it implements the batched register
//! reads, register writes with echo verification, the challenge/response
//! login, the keep-alive write and the chunked file-upload procedure.

use std::time::Duration;

use futures::lock::Mutex;
use hmac::{Hmac, Mac};
use log::{debug, error, info};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time;

use crate::crc;
use crate::error::{Error, Result};
use crate::frames::{
    ChallengeResponse, LoginResponse, PrivateRequest, PrivateResponse, UploadCompleteResponse,
    UploadDataResponse, UploadStartResponse, NONCE_LEN,
};
use crate::codec::WordReader;
use crate::names;
use crate::registers::{Catalog, Reading, REGISTERS};
use crate::retry::RetryPolicy;
use crate::transport::{
    tcp::TcpTransport, Reply, Transport, WriteEcho, EXC_ILLEGAL_ADDRESS, EXC_PERMISSION_DENIED,
    EXC_SLAVE_BUSY,
};
use crate::transport::rtu::{RtuTransport, SerialConfig};
use crate::values::StorageProductModel;

pub const DEFAULT_SLAVE: u8 = 0;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_COOLDOWN_TIME: Duration = Duration::from_millis(50);

/// Writing 0x0001 here keeps an authenticated session alive
pub const HEARTBEAT_REGISTER: u16 = 49999;

/// Largest tolerated hole between two registers fused into one read
pub const MAX_BATCH_GAP: u32 = 64;

/// Firmware needs a moment after accepting a TCP connection before it
/// answers the first request
const CONNECT_SETTLE: Duration = Duration::from_secs(1);

/// Pause between the challenge and login frames
const LOGIN_INTER_FRAME_DELAY: Duration = Duration::from_millis(50);

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Modbus unit id, 0-247; 0 doubles as the smart-logger probe target
    pub slave: u8,
    /// Per-request receive deadline
    pub timeout: Duration,
    /// Idle time enforced after every completed exchange
    pub cooldown_time: Duration,
    /// Delay between retries of a transient failure
    pub wait: Duration,
    /// Attempts per logical operation, the first one included
    pub max_tries: u32,
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::register_access();
        Self {
            slave: DEFAULT_SLAVE,
            timeout: DEFAULT_TIMEOUT,
            cooldown_time: DEFAULT_COOLDOWN_TIME,
            wait: retry.interval,
            max_tries: retry.max_tries,
        }
    }
}

/// Facts about the device learned by the probe, plus login state
#[derive(Debug, Default)]
struct SessionState {
    time_zone: Option<i16>,
    battery_type: Option<StorageProductModel>,
    smart_logger: bool,
    logged_in: bool,
}

/// Async session with one Huawei inverter (or smart logger)
pub struct Client {
    /// The gate: transport access is exclusive for a whole exchange
    /// including its retries and the trailing cooldown
    io: Mutex<Box<dyn Transport>>,
    state: Mutex<SessionState>,
    catalog: &'static Catalog,
    slave: u8,
    timeout: Duration,
    cooldown_time: Duration,
    retry: RetryPolicy,
}

impl Client {
    /// Wrap an already-open transport. The session is not probed yet;
    /// call [`Client::initialize`] before decoding timestamp registers,
    /// or use one of the `connect` constructors which do both.
    pub fn new(transport: Box<dyn Transport>, config: Config) -> Self {
        Self::with_catalog(transport, config, &REGISTERS)
    }

    /// Like [`Client::new`] with a custom register catalog
    pub fn with_catalog(
        transport: Box<dyn Transport>,
        config: Config,
        catalog: &'static Catalog,
    ) -> Self {
        Self {
            io: Mutex::new(transport),
            state: Mutex::new(SessionState::default()),
            catalog,
            slave: config.slave,
            timeout: config.timeout,
            cooldown_time: config.cooldown_time,
            retry: RetryPolicy::new(config.wait, config.max_tries),
        }
    }

    /// Connect over Modbus-TCP and probe the device
    pub async fn connect(host: &str, port: u16, config: Config) -> Result<Self> {
        let transport = TcpTransport::connect(host, port).await?;
        time::sleep(CONNECT_SETTLE).await;
        Self::create(Box::new(transport), config).await
    }

    /// Connect over Modbus-RTU and probe the device
    pub async fn connect_rtu(serial: &SerialConfig, config: Config) -> Result<Self> {
        let transport = RtuTransport::open(serial)?;
        Self::create(Box::new(transport), config).await
    }

    /// Probe an already-open transport, closing it when the probe fails
    pub async fn create(transport: Box<dyn Transport>, config: Config) -> Result<Self> {
        let client = Self::new(transport, config);
        if let Err(err) = client.initialize().await {
            error!("aborting client creation: {}", err);
            let _ = client.stop().await;
            return Err(err);
        }
        Ok(client)
    }

    /// Learn the device facts every session needs: smart-logger presence
    /// (slave 0 only), the time zone used by timestamp registers, and the
    /// battery model when one is installed.
    pub async fn initialize(&self) -> Result<()> {
        if self.slave == 0 {
            match self.get(names::SMARTLOGGER_FIRST_SLAVE_POWER).await {
                Ok(_) => {
                    info!("smart logger detected");
                    self.state.lock().await.smart_logger = true;
                }
                Err(Error::Read(_)) | Err(Error::IllegalAddress) => {
                    debug!("no smart logger detected");
                }
                Err(err) => return Err(err),
            }
        }

        if self.is_smart_logger().await {
            let tz = self.get(names::SMARTLOGGER_TIME_ZONE).await?;
            self.store_time_zone(&tz).await?;
            return Ok(());
        }

        let tz = self.get(names::TIME_ZONE).await?;
        self.store_time_zone(&tz).await?;

        // when a battery is present it always occupies storage unit 1
        match self.get(names::STORAGE_UNIT_1_PRODUCT_MODEL).await {
            Ok(reading) => {
                self.state.lock().await.battery_type =
                    reading.value.enum_raw().map(StorageProductModel::from_raw);
            }
            Err(Error::IllegalAddress) => {
                info!("inverter doesn't support a battery");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    async fn store_time_zone(&self, reading: &Reading) -> Result<()> {
        let minutes = reading
            .value
            .as_i64()
            .filter(|v| (i16::MIN as i64..=i16::MAX as i64).contains(v))
            .ok_or_else(|| {
                Error::ProtocolViolation("time zone register decoded to a non-integer".into())
            })?;
        self.state.lock().await.time_zone = Some(minutes as i16);
        Ok(())
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    /// Time zone offset in minutes, once the probe has learned it
    pub async fn time_zone(&self) -> Option<i16> {
        self.state.lock().await.time_zone
    }

    /// Battery model detected in storage unit 1, if any
    pub async fn battery_type(&self) -> Option<StorageProductModel> {
        self.state.lock().await.battery_type
    }

    pub async fn is_smart_logger(&self) -> bool {
        self.state.lock().await.smart_logger
    }

    pub async fn logged_in(&self) -> bool {
        self.state.lock().await.logged_in
    }

    pub async fn is_connected(&self) -> bool {
        self.io.lock().await.is_connected()
    }

    /// Close the transport and forget the session
    pub async fn stop(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        let result = io.close().await;
        self.state.lock().await.logged_in = false;
        result
    }

    /// Read one named register
    pub async fn get(&self, name: &str) -> Result<Reading> {
        self.get_on(name, None).await
    }

    /// Read one named register from an explicit slave
    pub async fn get_on(&self, name: &str, slave: Option<u8>) -> Result<Reading> {
        let mut readings = self.get_multiple_on(&[name], slave).await?;
        Ok(readings.remove(0))
    }

    /// Read several registers with a single physical transaction
    pub async fn get_multiple(&self, names: &[&str]) -> Result<Vec<Reading>> {
        self.get_multiple_on(names, None).await
    }

    /// Read several registers with a single physical transaction.
    ///
    /// The registers must be given in strictly increasing, non-overlapping
    /// address order with at most [`MAX_BATCH_GAP`] unread words between
    /// two consecutive entries; the inverter firmware degrades badly under
    /// many small reads, so wider gaps have to be split into separate
    /// calls by the caller.
    pub async fn get_multiple_on(&self, names: &[&str], slave: Option<u8>) -> Result<Vec<Reading>> {
        if names.is_empty() {
            return Err(Error::InvalidRange(
                "expected at least one register name".into(),
            ));
        }

        let mut regs = Vec::with_capacity(names.len());
        for name in names {
            regs.push(self.catalog.lookup(name)?);
        }

        for pair in regs.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a.end() > b.address as u32 {
                return Err(Error::InvalidRange(format!(
                    "registers must be in monotonically increasing order, \
                     but {} + {} > {} ({} follows {})",
                    a.address, a.length, b.address, b.name, a.name
                )));
            }
            let gap = b.address as u32 - a.end();
            if gap > MAX_BATCH_GAP {
                return Err(Error::InvalidRange(format!(
                    "gap of {} words between {} and {} exceeds {}, split the request in two",
                    gap, a.name, b.name, MAX_BATCH_GAP
                )));
            }
        }

        let first = regs[0];
        let last = regs[regs.len() - 1];
        let total = (last.end() - first.address as u32) as u16;

        let words = self
            .read_registers_raw(first.address, total, slave.unwrap_or(self.slave))
            .await?;

        let time_zone = self.time_zone().await;
        let mut reader = WordReader::new(&words);
        let mut readings = Vec::with_capacity(regs.len());
        let mut position = first.address as u32;
        for reg in &regs {
            reader.skip_words((reg.address as u32 - position) as usize)?;
            let value = reg.decode(&mut reader, time_zone)?;
            readings.push(Reading {
                value,
                unit: reg.unit.exposed(),
            });
            position = reg.end();
        }
        Ok(readings)
    }

    /// Write a named register, returning whether the inverter echoed the
    /// written range back
    pub async fn set(&self, name: &str, value: &crate::registers::Value) -> Result<bool> {
        self.set_on(name, value, None).await
    }

    pub async fn set_on(
        &self,
        name: &str,
        value: &crate::registers::Value,
        slave: Option<u8>,
    ) -> Result<bool> {
        let reg = self.catalog.lookup(name)?;
        if !reg.is_writeable() {
            return Err(Error::Write(format!("register {} is not writeable", name)));
        }
        let words = reg.encode(value)?;
        if words.len() != reg.length as usize {
            return Err(Error::Write(format!(
                "register {} encodes to {} words, expected {}",
                name,
                words.len(),
                reg.length
            )));
        }

        let echo = self
            .write_registers_raw(reg.address, &words, slave.unwrap_or(self.slave))
            .await?;
        Ok(echo.address == reg.address && echo.count == reg.length)
    }

    /// Authenticate the session with the inverter.
    ///
    /// Returns `Ok(false)` when the inverter rejects the credentials. The
    /// inverter proves knowledge of the password by answering our nonce;
    /// a wrong answer is logged as a possible man-in-the-middle but does
    /// not fail the login, since the device did authorize the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<bool> {
        self.login_on(username, password, None).await
    }

    pub async fn login_on(
        &self,
        username: &str,
        password: &str,
        slave: Option<u8>,
    ) -> Result<bool> {
        let slave = slave.unwrap_or(self.slave);
        let mut io = self.io.lock().await;
        let result = self
            .login_exchange(io.as_mut(), username, password, slave)
            .await;
        time::sleep(self.cooldown_time).await;
        if let Ok(true) = result {
            self.state.lock().await.logged_in = true;
        }
        result
    }

    async fn login_exchange(
        &self,
        transport: &mut dyn Transport,
        username: &str,
        password: &str,
        slave: u8,
    ) -> Result<bool> {
        let response = self
            .private_exchange(transport, &PrivateRequest::challenge(), slave)
            .await?;
        let challenge = ChallengeResponse::parse(&response)?;

        let mut client_nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut client_nonce);

        let digest = compute_digest(password.as_bytes(), &challenge.inverter_nonce);
        let request = PrivateRequest::login(&client_nonce, username, &digest);

        time::sleep(LOGIN_INTER_FRAME_DELAY).await;
        let response = self.private_exchange(transport, &request, slave).await?;
        let login = LoginResponse::parse(&response)?;

        if login.status != 0 {
            debug!("inverter rejected login with status {:#04x}", login.status);
            return Ok(false);
        }

        let expected = compute_digest(password.as_bytes(), &client_nonce);
        if expected != login.inverter_mac {
            error!(
                "inverter answered the client challenge with an invalid MAC, \
                 this could indicate a man-in-the-middle"
            );
        }
        Ok(true)
    }

    /// Keep-alive write. Returns false (never an error) when the session
    /// cannot be kept alive; an exception response means the device gave
    /// up on the session and the heartbeat should stop.
    pub async fn heartbeat(&self, slave: Option<u8>) -> bool {
        let slave = slave.unwrap_or(self.slave);
        let mut io = self.io.lock().await;
        if !io.is_connected() {
            return false;
        }
        let result = time::timeout(
            self.timeout,
            io.write_single_register(HEARTBEAT_REGISTER, 0x0001, slave),
        )
        .await;
        time::sleep(self.cooldown_time).await;
        match result {
            Ok(Ok(Reply::Data(_))) => {
                debug!("heartbeat succeeded");
                true
            }
            Ok(Ok(Reply::Exception(code))) => {
                debug!("heartbeat refused with exception {:#04x}", code);
                false
            }
            Ok(Err(err)) => {
                log::warn!("heartbeat failed: {}", err);
                false
            }
            Err(_) => {
                log::warn!("heartbeat timed out");
                false
            }
        }
    }

    /// Read a "file" with the chunked upload procedure of the vendor
    /// interface definition (start, data frames, complete + CRC check)
    pub async fn get_file(&self, file_type: u8, customized: Option<&[u8]>) -> Result<Vec<u8>> {
        self.get_file_on(file_type, customized, None).await
    }

    pub async fn get_file_on(
        &self,
        file_type: u8,
        customized: Option<&[u8]>,
        slave: Option<u8>,
    ) -> Result<Vec<u8>> {
        let slave = slave.unwrap_or(self.slave);
        let mut io = self.io.lock().await;
        debug!("reading file {:#04x}", file_type);
        let result = self
            .file_exchange(io.as_mut(), file_type, customized.unwrap_or(&[]), slave)
            .await;
        time::sleep(self.cooldown_time).await;
        result
    }

    async fn file_exchange(
        &self,
        transport: &mut dyn Transport,
        file_type: u8,
        customized: &[u8],
        slave: u8,
    ) -> Result<Vec<u8>> {
        let policy = RetryPolicy::file_upload();

        let response = self
            .file_request(
                transport,
                &PrivateRequest::upload_start(file_type, customized),
                slave,
                &policy,
            )
            .await?;
        let start = UploadStartResponse::parse(&response)?;
        let frame_length = start.data_frame_length as u32;
        if frame_length == 0 {
            return Err(Error::ProtocolViolation(
                "upload-start reports a zero frame length".into(),
            ));
        }

        let mut data = Vec::with_capacity(start.file_length as usize);
        let mut frame_no: u16 = 0;
        while (frame_no as u32) * frame_length < start.file_length {
            let response = self
                .file_request(
                    transport,
                    &PrivateRequest::upload_data(file_type, frame_no),
                    slave,
                    &policy,
                )
                .await?;
            let frame = UploadDataResponse::parse(&response)?;
            if frame.frame_no != frame_no {
                return Err(Error::ProtocolViolation(format!(
                    "got file frame {}, expected {}",
                    frame.frame_no, frame_no
                )));
            }
            data.extend_from_slice(&frame.frame_data);
            frame_no += 1;
        }

        let response = self
            .file_request(
                transport,
                &PrivateRequest::upload_complete(file_type),
                slave,
                &policy,
            )
            .await?;
        let complete = UploadCompleteResponse::parse(&response)?;

        // the firmware transmits the CRC byte-swapped
        let expected = crc::swap_bytes(complete.file_crc);
        let computed = crc::crc16(&data);
        if computed != expected {
            return Err(Error::CrcMismatch { computed, expected });
        }
        Ok(data)
    }

    async fn file_request(
        &self,
        transport: &mut dyn Transport,
        request: &PrivateRequest,
        slave: u8,
        policy: &RetryPolicy,
    ) -> Result<PrivateResponse> {
        let mut tries = 0u32;
        loop {
            tries += 1;
            match self.private_exchange(transport, request, slave).await {
                Ok(response) => return Ok(response),
                Err(err) if policy.wants_retry(&err, tries) => {
                    debug!(
                        "backing off file upload for {:?} after {} tries: {}",
                        policy.interval, tries, err
                    );
                    time::sleep(policy.interval).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(Error::Read(format!(
                        "failed to read file {:#04x} after {} tries",
                        request.content.get(1).copied().unwrap_or(0),
                        tries
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn private_exchange(
        &self,
        transport: &mut dyn Transport,
        request: &PrivateRequest,
        slave: u8,
    ) -> Result<PrivateResponse> {
        if !transport.is_connected() {
            return Err(Error::Connection(
                "transport is not connected to the inverter".into(),
            ));
        }
        let reply = time::timeout(self.timeout, transport.execute(request, slave))
            .await
            .map_err(|_| Error::Timeout)??;
        match reply {
            Reply::Data(response) => Ok(response),
            Reply::Exception(code) => Err(match code {
                EXC_PERMISSION_DENIED => Error::PermissionDenied,
                EXC_SLAVE_BUSY => Error::SlaveBusy,
                other => Error::Read(format!(
                    "exception {:#04x} in a private-function exchange",
                    other
                )),
            }),
        }
    }

    /// Gate + retry + cooldown around one read transaction
    async fn read_registers_raw(&self, address: u16, count: u16, slave: u8) -> Result<Vec<u16>> {
        let mut io = self.io.lock().await;
        debug!("reading {} registers at {}", count, address);
        let result = self
            .read_with_retries(io.as_mut(), address, count, slave)
            .await;
        // throttle requests to keep the inverter responsive
        time::sleep(self.cooldown_time).await;
        result
    }

    async fn read_with_retries(
        &self,
        transport: &mut dyn Transport,
        address: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<u16>> {
        let mut tries = 0u32;
        loop {
            tries += 1;
            match self.read_attempt(transport, address, count, slave).await {
                Ok(words) => return Ok(words),
                Err(err) if self.retry.wants_retry(&err, tries) => {
                    debug!(
                        "backing off reading for {:?} after {} tries: {}",
                        self.retry.interval, tries, err
                    );
                    time::sleep(self.retry.interval).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(Error::Read(format!(
                        "failed to read {} registers at {} after {} tries",
                        count, address, tries
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn read_attempt(
        &self,
        transport: &mut dyn Transport,
        address: u16,
        count: u16,
        slave: u8,
    ) -> Result<Vec<u16>> {
        if !transport.is_connected() {
            return Err(Error::Connection(
                "transport is not connected to the inverter".into(),
            ));
        }
        let reply = time::timeout(
            self.timeout,
            transport.read_holding_registers(address, count, slave),
        )
        .await
        .map_err(|_| Error::Timeout)??;
        match reply {
            Reply::Data(words) => Ok(words),
            Reply::Exception(code) => Err(match code {
                EXC_SLAVE_BUSY => Error::SlaveBusy,
                EXC_ILLEGAL_ADDRESS => Error::IllegalAddress,
                EXC_PERMISSION_DENIED => Error::PermissionDenied,
                other => Error::Read(format!(
                    "exception {:#04x} while reading {} registers at {}",
                    other, count, address
                )),
            }),
        }
    }

    /// Gate + retry + cooldown around one write transaction
    async fn write_registers_raw(
        &self,
        address: u16,
        words: &[u16],
        slave: u8,
    ) -> Result<WriteEcho> {
        let mut io = self.io.lock().await;
        debug!("writing {:04x?} to {}", words, address);
        let result = self
            .write_with_retries(io.as_mut(), address, words, slave)
            .await;
        time::sleep(self.cooldown_time).await;
        result
    }

    async fn write_with_retries(
        &self,
        transport: &mut dyn Transport,
        address: u16,
        words: &[u16],
        slave: u8,
    ) -> Result<WriteEcho> {
        let mut tries = 0u32;
        loop {
            tries += 1;
            match self.write_attempt(transport, address, words, slave).await {
                Ok(echo) => return Ok(echo),
                Err(err) if self.retry.wants_retry(&err, tries) => {
                    debug!(
                        "backing off writing for {:?} after {} tries: {}",
                        self.retry.interval, tries, err
                    );
                    time::sleep(self.retry.interval).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(Error::Write(format!(
                        "failed to write {} registers at {} after {} tries",
                        words.len(),
                        address,
                        tries
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn write_attempt(
        &self,
        transport: &mut dyn Transport,
        address: u16,
        words: &[u16],
        slave: u8,
    ) -> Result<WriteEcho> {
        if !transport.is_connected() {
            return Err(Error::Connection(
                "transport is not connected to the inverter".into(),
            ));
        }
        let reply = time::timeout(self.timeout, transport.write_registers(address, words, slave))
            .await
            .map_err(|_| Error::Timeout)??;
        match reply {
            Reply::Data(echo) => Ok(echo),
            Reply::Exception(code) => Err(match code {
                EXC_SLAVE_BUSY => Error::SlaveBusy,
                EXC_ILLEGAL_ADDRESS => Error::IllegalAddress,
                EXC_PERMISSION_DENIED => Error::PermissionDenied,
                other => Error::Write(format!(
                    "exception {:#04x} while writing {} registers at {}",
                    other,
                    words.len(),
                    address
                )),
            }),
        }
    }
}

/// HMAC-SHA-256 keyed with the SHA-256 of the password, as both login
/// directions use it
fn compute_digest(password: &[u8], seed: &[u8]) -> Vec<u8> {
    let hashed_password = Sha256::digest(password);
    let mut mac = Hmac::<Sha256>::new_from_slice(&hashed_password)
        .expect("HMAC accepts any key length");
    mac.update(seed);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frames;
    use crate::registers::{AccessLevel, RegisterDef, RegisterKind, Unit, Value};
    use crate::test_utils::{FakeReply, FakeRequest, FakeTransport};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn make_client(fake: &FakeTransport) -> Client {
        Client::new(Box::new(fake.clone()), Config::default())
    }

    fn reg(
        name: &str,
        address: u16,
        length: u16,
        kind: RegisterKind,
        scale: u32,
        unit: Unit,
    ) -> RegisterDef {
        let mut reg = RegisterDef {
            name: name.to_string(),
            address,
            length,
            kind,
            scale: 1,
            unit,
            access: AccessLevel::Read,
        };
        reg.scale = scale;
        reg
    }

    fn leak(catalog: Catalog) -> &'static Catalog {
        Box::leak(Box::new(catalog))
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_read() {
        let fake = FakeTransport::new();
        fake.push_reply(FakeReply::Words(vec![0x0000, 0x1388]));

        let client = make_client(&fake);
        let reading = client.get(names::ACTIVE_POWER).await.unwrap();
        assert_eq!(reading.value, Value::I32(5000));
        assert_eq!(reading.unit, Some("W"));

        assert_eq!(
            fake.requests(),
            vec![FakeRequest::ReadHolding {
                address: 32080,
                count: 2,
                slave: 0,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_read_with_gap() {
        // catalog straight from the interface definition example:
        // voltage U16/scale 10 at 32069, current U32/scale 100 at 32072
        let catalog = leak(Catalog::new(vec![
            reg(
                "phase_A_voltage",
                32069,
                1,
                RegisterKind::U16,
                10,
                Unit::Const("V"),
            ),
            reg(
                "phase_A_current",
                32072,
                2,
                RegisterKind::U32,
                100,
                Unit::Const("A"),
            ),
        ]));

        let fake = FakeTransport::new();
        // voltage word, two gap words, then the two current words
        fake.push_reply(FakeReply::Words(vec![
            0x08fc, 0x0000, 0x0000, 0x0000, 0x2710,
        ]));

        let client =
            Client::with_catalog(Box::new(fake.clone()), Config::default(), catalog);
        let readings = client
            .get_multiple(&["phase_A_voltage", "phase_A_current"])
            .await
            .unwrap();

        assert_eq!(readings[0].value, Value::Float(230.0));
        assert_eq!(readings[0].unit, Some("V"));
        assert_eq!(readings[1].value, Value::Float(100.0));
        assert_eq!(readings[1].unit, Some("A"));

        // the two registers were fused into one physical read spanning
        // 32069..32074
        assert_eq!(
            fake.requests(),
            vec![FakeRequest::ReadHolding {
                address: 32069,
                count: 5,
                slave: 0,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_rejects_overlap_without_touching_the_wire() {
        let catalog = leak(Catalog::new(vec![
            reg("a", 100, 2, RegisterKind::U32, 1, Unit::None),
            reg("b", 101, 1, RegisterKind::U16, 1, Unit::None),
        ]));
        let fake = FakeTransport::new();
        let client =
            Client::with_catalog(Box::new(fake.clone()), Config::default(), catalog);

        assert!(matches!(
            client.get_multiple(&["a", "b"]).await,
            Err(Error::InvalidRange(_))
        ));
        assert!(fake.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_rejects_wide_gap() {
        let catalog = leak(Catalog::new(vec![
            reg("a", 100, 1, RegisterKind::U16, 1, Unit::None),
            reg("b", 165, 1, RegisterKind::U16, 1, Unit::None),
            reg("c", 166, 1, RegisterKind::U16, 1, Unit::None),
        ]));
        let fake = FakeTransport::new();
        let client =
            Client::with_catalog(Box::new(fake.clone()), Config::default(), catalog);

        // gap of 65 words is over the cap
        assert!(matches!(
            client.get_multiple(&["a", "c"]).await,
            Err(Error::InvalidRange(_))
        ));
        assert!(fake.requests().is_empty());

        // gap of exactly 64 words is allowed
        fake.push_reply(FakeReply::Words(vec![0u16; 66]));
        client.get_multiple(&["a", "b"]).await.unwrap();
        assert_eq!(
            fake.requests(),
            vec![FakeRequest::ReadHolding {
                address: 100,
                count: 66,
                slave: 0,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_unknown_names() {
        let fake = FakeTransport::new();
        let client = make_client(&fake);

        assert!(matches!(
            client.get_multiple(&[]).await,
            Err(Error::InvalidRange(_))
        ));
        assert!(matches!(
            client.get("no_such_register").await,
            Err(Error::InvalidName(_))
        ));
        assert!(fake.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slave_busy_retry_cadence() {
        let fake = FakeTransport::new();
        fake.push_replies(vec![
            FakeReply::Exception(EXC_SLAVE_BUSY),
            FakeReply::Exception(EXC_SLAVE_BUSY),
            FakeReply::Words(vec![0x0000, 0x1388]),
        ]);

        let client = make_client(&fake);
        let started = Instant::now();
        let reading = client.get(names::ACTIVE_POWER).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(reading.value, Value::I32(5000));
        assert_eq!(fake.requests().len(), 3);

        // two 2 s backoffs, then one 50 ms cooldown after the success
        assert!(elapsed >= Duration::from_millis(4050));
        assert!(elapsed < Duration::from_millis(4500));

        let times = fake.request_times();
        assert_eq!(times[1] - times[0], Duration::from_secs(2));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_bounded() {
        let fake = FakeTransport::new();
        fake.push_replies(vec![FakeReply::Exception(EXC_SLAVE_BUSY); 8]);

        let client = make_client(&fake);
        let result = client.get(names::ACTIVE_POWER).await;
        assert!(matches!(result, Err(Error::Read(_))));
        // exactly max_tries attempts, no more
        assert_eq!(fake.requests().len(), 5);
        assert_eq!(fake.pending_replies(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried() {
        let fake = FakeTransport::new();
        fake.push_replies(vec![
            FakeReply::Silence,
            FakeReply::Words(vec![0x0000, 0x1388]),
        ]);

        let client = make_client(&fake);
        let started = Instant::now();
        let reading = client.get(names::ACTIVE_POWER).await.unwrap();

        assert_eq!(reading.value, Value::I32(5000));
        assert_eq!(fake.requests().len(), 2);
        // 5 s timeout + 2 s backoff + cooldown
        assert!(started.elapsed() >= Duration::from_millis(7050));
    }

    #[tokio::test(start_paused = true)]
    async fn test_illegal_address_is_not_retried() {
        let fake = FakeTransport::new();
        fake.push_reply(FakeReply::Exception(EXC_ILLEGAL_ADDRESS));

        let client = make_client(&fake);
        assert!(matches!(
            client.get(names::ACTIVE_POWER).await,
            Err(Error::IllegalAddress)
        ));
        assert_eq!(fake.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_serialized_with_cooldown() {
        let fake = FakeTransport::new();
        fake.push_replies(vec![
            FakeReply::Words(vec![0x0000, 0x1388]),
            FakeReply::Words(vec![0x0000, 0x0000]),
        ]);

        let client = Arc::new(make_client(&fake));
        let a = {
            let client = client.clone();
            tokio::spawn(async move { client.get(names::ACTIVE_POWER).await })
        };
        let b = {
            let client = client.clone();
            tokio::spawn(async move { client.get(names::ACTIVE_POWER).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let times = fake.request_times();
        assert_eq!(times.len(), 2);
        // the second request must not start before the first one's
        // cooldown elapsed
        assert!(times[1] - times[0] >= DEFAULT_COOLDOWN_TIME);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_checks_echo() {
        let fake = FakeTransport::new();
        fake.push_reply(FakeReply::Echo);

        let client = make_client(&fake);
        assert!(client
            .set(names::TIME_ZONE, &Value::I16(60))
            .await
            .unwrap());
        assert_eq!(
            fake.requests(),
            vec![FakeRequest::WriteMultiple {
                address: 43006,
                words: vec![0x003c],
                slave: 0,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_refuses_read_only_registers() {
        let fake = FakeTransport::new();
        let client = make_client(&fake);

        assert!(matches!(
            client.set(names::ACTIVE_POWER, &Value::I32(0)).await,
            Err(Error::Write(_))
        ));
        assert!(fake.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_permission_denied() {
        let fake = FakeTransport::new();
        fake.push_reply(FakeReply::Exception(EXC_PERMISSION_DENIED));

        let client = make_client(&fake);
        assert!(matches!(
            client.set(names::TIME_ZONE, &Value::I16(60)).await,
            Err(Error::PermissionDenied)
        ));
        assert_eq!(fake.requests().len(), 1);
    }

    fn push_challenge(fake: &FakeTransport, nonce: [u8; NONCE_LEN]) {
        let mut content = vec![0x11];
        content.extend_from_slice(&nonce);
        fake.push_reply(FakeReply::Private(PrivateResponse {
            sub_command: frames::SUB_CHALLENGE,
            content,
        }));
    }

    fn push_login_status(fake: &FakeTransport, status: u8, mac: &[u8]) {
        let mut content = vec![(1 + 1 + mac.len()) as u8, status, mac.len() as u8];
        content.extend_from_slice(mac);
        fake.push_reply(FakeReply::Private(PrivateResponse {
            sub_command: frames::SUB_LOGIN,
            content,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_sends_correct_hmac() {
        let inverter_nonce: [u8; NONCE_LEN] =
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
        let fake = FakeTransport::new();
        push_challenge(&fake, inverter_nonce);
        // the echoed MAC is wrong here, which must only produce a warning
        push_login_status(&fake, 0, &[0u8; 32]);

        let client = make_client(&fake);
        assert!(client.login("installer", "1234").await.unwrap());
        assert!(client.logged_in().await);

        let requests = fake.requests();
        assert_eq!(requests.len(), 2);
        match &requests[0] {
            FakeRequest::Private {
                sub_command,
                content,
                ..
            } => {
                assert_eq!(*sub_command, frames::SUB_CHALLENGE);
                assert_eq!(content, &[0x01, 0x00]);
            }
            other => panic!("unexpected request {:?}", other),
        }
        match &requests[1] {
            FakeRequest::Private {
                sub_command,
                content,
                ..
            } => {
                assert_eq!(*sub_command, frames::SUB_LOGIN);
                // content: total | nonce(16) | ulen | user | hlen | hmac(32)
                let ulen = content[17] as usize;
                assert_eq!(&content[18..18 + ulen], b"installer");
                let hlen = content[18 + ulen] as usize;
                assert_eq!(hlen, 32);
                let wire_hmac = &content[19 + ulen..19 + ulen + hlen];
                assert_eq!(
                    wire_hmac,
                    compute_digest(b"1234", &inverter_nonce).as_slice()
                );
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_rejected() {
        let fake = FakeTransport::new();
        push_challenge(&fake, [7u8; NONCE_LEN]);
        push_login_status(&fake, 0x03, &[]);

        let client = make_client(&fake);
        assert!(!client.login("installer", "wrong").await.unwrap());
        assert!(!client.logged_in().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_challenge_violation() {
        let fake = FakeTransport::new();
        fake.push_reply(FakeReply::Private(PrivateResponse {
            sub_command: frames::SUB_CHALLENGE,
            content: vec![0x99, 0, 0],
        }));

        let client = make_client(&fake);
        assert!(matches!(
            client.login("installer", "1234").await,
            Err(Error::ProtocolViolation(_))
        ));
    }

    fn push_file_script(fake: &FakeTransport, file_type: u8, data: &[u8], crc: u16) {
        let frame_len = 128usize;
        let mut start = vec![0x06, file_type];
        start.extend_from_slice(&(data.len() as u32).to_be_bytes());
        start.push(frame_len as u8);
        fake.push_reply(FakeReply::Private(PrivateResponse {
            sub_command: frames::SUB_UPLOAD_START,
            content: start,
        }));

        for (no, chunk) in data.chunks(frame_len).enumerate() {
            let mut content = vec![(chunk.len() + 3) as u8, file_type];
            content.extend_from_slice(&(no as u16).to_be_bytes());
            content.extend_from_slice(chunk);
            fake.push_reply(FakeReply::Private(PrivateResponse {
                sub_command: frames::SUB_UPLOAD_DATA,
                content,
            }));
        }

        fake.push_reply(FakeReply::Private(PrivateResponse {
            sub_command: frames::SUB_UPLOAD_COMPLETE,
            content: vec![0x03, file_type, (crc >> 8) as u8, crc as u8],
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_upload() {
        let data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        // device reports the CRC byte-swapped
        let wire_crc = crc::swap_bytes(crc::crc16(&data));

        let fake = FakeTransport::new();
        push_file_script(&fake, 0x45, &data, wire_crc);

        let client = make_client(&fake);
        let uploaded = client.get_file(0x45, None).await.unwrap();
        assert_eq!(uploaded, data);

        // start, three data frames (128 + 128 + 44 bytes), complete
        let requests = fake.requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(
            requests[1],
            FakeRequest::Private {
                sub_command: frames::SUB_UPLOAD_DATA,
                content: vec![0x03, 0x45, 0x00, 0x00],
                slave: 0,
            }
        );
        assert_eq!(
            requests[3],
            FakeRequest::Private {
                sub_command: frames::SUB_UPLOAD_DATA,
                content: vec![0x03, 0x45, 0x00, 0x02],
                slave: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_upload_detects_corruption() {
        let mut data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let wire_crc = crc::swap_bytes(crc::crc16(&data));
        // flip one bit in the transmitted data
        data[150] ^= 0x01;

        let fake = FakeTransport::new();
        push_file_script(&fake, 0x45, &data, wire_crc);

        let client = make_client(&fake);
        assert!(matches!(
            client.get_file(0x45, None).await,
            Err(Error::CrcMismatch { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_upload_permission_denied() {
        let fake = FakeTransport::new();
        fake.push_reply(FakeReply::Exception(EXC_PERMISSION_DENIED));

        let client = make_client(&fake);
        assert!(matches!(
            client.get_file(0x45, None).await,
            Err(Error::PermissionDenied)
        ));
        assert_eq!(fake.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_upload_retries_busy_with_long_interval() {
        let data: Vec<u8> = vec![0xab; 10];
        let wire_crc = crc::swap_bytes(crc::crc16(&data));

        let fake = FakeTransport::new();
        fake.push_reply(FakeReply::Exception(EXC_SLAVE_BUSY));
        push_file_script(&fake, 0x45, &data, wire_crc);

        let client = make_client(&fake);
        let started = Instant::now();
        assert_eq!(client.get_file(0x45, None).await.unwrap(), data);
        // one 10 s file-upload backoff
        assert!(started.elapsed() >= Duration::from_secs(10));

        let times = fake.request_times();
        assert_eq!(times[1] - times[0], Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat() {
        let fake = FakeTransport::new();
        fake.push_reply(FakeReply::Echo);
        let client = make_client(&fake);

        assert!(client.heartbeat(None).await);
        assert_eq!(
            fake.requests(),
            vec![FakeRequest::WriteSingle {
                address: HEARTBEAT_REGISTER,
                word: 0x0001,
                slave: 0,
            }]
        );

        // exception response stops the heartbeat without an error
        fake.push_reply(FakeReply::Exception(EXC_PERMISSION_DENIED));
        assert!(!client.heartbeat(None).await);

        // a disconnected transport is reported as false, no request made
        fake.set_connected(false);
        let before = fake.requests().len();
        assert!(!client.heartbeat(None).await);
        assert_eq!(fake.requests().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_plain_inverter() {
        let fake = FakeTransport::new();
        fake.push_replies(vec![
            // smart-logger probe fails with an illegal address
            FakeReply::Exception(EXC_ILLEGAL_ADDRESS),
            // time zone: +60 minutes
            FakeReply::Words(vec![0x003c]),
            // battery probe: LUNA2000
            FakeReply::Words(vec![0x0002]),
        ]);

        let client = make_client(&fake);
        client.initialize().await.unwrap();

        assert!(!client.is_smart_logger().await);
        assert_eq!(client.time_zone().await, Some(60));
        assert_eq!(
            client.battery_type().await,
            Some(StorageProductModel::HuaweiLuna2000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_without_battery() {
        let fake = FakeTransport::new();
        fake.push_replies(vec![
            FakeReply::Exception(EXC_ILLEGAL_ADDRESS),
            FakeReply::Words(vec![0xffc4]), // -60 minutes
            FakeReply::Exception(EXC_ILLEGAL_ADDRESS),
        ]);

        let client = make_client(&fake);
        client.initialize().await.unwrap();

        assert_eq!(client.time_zone().await, Some(-60));
        assert_eq!(client.battery_type().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_smart_logger() {
        let fake = FakeTransport::new();
        fake.push_replies(vec![
            // smart-logger probe answers with a power reading
            FakeReply::Words(vec![0x0000, 0x1388]),
            // smart-logger time zone: +120 minutes
            FakeReply::Words(vec![0x0078]),
        ]);

        let client = make_client(&fake);
        client.initialize().await.unwrap();

        assert!(client.is_smart_logger().await);
        assert_eq!(client.time_zone().await, Some(120));

        let requests = fake.requests();
        assert_eq!(
            requests[0],
            FakeRequest::ReadHolding {
                address: 32290,
                count: 2,
                slave: 0,
            }
        );
        assert_eq!(
            requests[1],
            FakeRequest::ReadHolding {
                address: 40002,
                count: 1,
                slave: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timestamp_uses_learned_time_zone() {
        let fake = FakeTransport::new();
        fake.push_replies(vec![
            FakeReply::Exception(EXC_ILLEGAL_ADDRESS),
            FakeReply::Words(vec![0x0078]), // +120 minutes
            FakeReply::Exception(EXC_ILLEGAL_ADDRESS),
        ]);

        let client = make_client(&fake);
        client.initialize().await.unwrap();

        let local = 1_600_000_000u32 + 7200;
        fake.push_reply(FakeReply::Words(vec![(local >> 16) as u16, local as u16]));
        let reading = client.get(names::STARTUP_TIME).await.unwrap();
        match reading.value {
            Value::Timestamp(ts) => {
                assert_eq!(ts.timestamp(), 1_600_000_000);
                assert_eq!(ts.offset().local_minus_utc(), 7200);
            }
            other => panic!("expected a timestamp, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_transport() {
        let fake = FakeTransport::new();
        let client = make_client(&fake);
        assert!(client.is_connected().await);
        client.stop().await.unwrap();
        assert!(!client.is_connected().await);
    }
}
