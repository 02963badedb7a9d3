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

//! High-level inverter access.
//!
//! A [`Bridge`] probes what the inverter is equipped with (PV strings,
//! optimizers, power meter, batteries) and then serves complete snapshots
//! via [`Bridge::update`], each equipment block fetched with a single
//! batched read. It also owns the keep-alive task that an authenticated
//! session requires.
//!
//! Several bridges can multiplex one [`Client`] to address extra slaves
//! behind a smart logger; only the primary bridge owns the transport and
//! closes it on [`Bridge::stop`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::lock::Mutex;
use log::warn;
use tokio::task::JoinHandle;
use tokio::time;

use crate::client::{Client, Config};
use crate::error::{Error, Result};
use crate::names;
use crate::registers::Reading;
use crate::transport::rtu::SerialConfig;
use crate::values::{MeterStatus, MeterType, StorageProductModel};

/// Cadence of the keep-alive writes
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Registers polled on every update
pub const INVERTER_REGISTERS: &[&str] = &[
    names::INPUT_POWER,
    names::LINE_VOLTAGE_A_B,
    names::LINE_VOLTAGE_B_C,
    names::LINE_VOLTAGE_C_A,
    names::PHASE_A_VOLTAGE,
    names::PHASE_B_VOLTAGE,
    names::PHASE_C_VOLTAGE,
    names::PHASE_A_CURRENT,
    names::PHASE_B_CURRENT,
    names::PHASE_C_CURRENT,
    names::DAY_ACTIVE_POWER_PEAK,
    names::ACTIVE_POWER,
    names::REACTIVE_POWER,
    names::POWER_FACTOR,
    names::GRID_FREQUENCY,
    names::EFFICIENCY,
    names::INTERNAL_TEMPERATURE,
    names::INSULATION_RESISTANCE,
    names::DEVICE_STATUS,
    names::FAULT_CODE,
    names::STARTUP_TIME,
    names::SHUTDOWN_TIME,
    names::ACCUMULATED_YIELD_ENERGY,
    names::DAILY_YIELD_ENERGY,
];

/// Registers polled when optimizers are installed
pub const OPTIMIZER_REGISTERS: &[&str] = &[names::NB_ONLINE_OPTIMIZERS];

/// Registers polled when a power meter is attached
pub const POWER_METER_REGISTERS: &[&str] = &[
    names::GRID_A_VOLTAGE,
    names::GRID_B_VOLTAGE,
    names::GRID_C_VOLTAGE,
    names::ACTIVE_GRID_A_CURRENT,
    names::ACTIVE_GRID_B_CURRENT,
    names::ACTIVE_GRID_C_CURRENT,
    names::POWER_METER_ACTIVE_POWER,
    names::POWER_METER_REACTIVE_POWER,
    names::ACTIVE_GRID_POWER_FACTOR,
    names::ACTIVE_GRID_FREQUENCY,
    names::GRID_EXPORTED_ENERGY,
    names::GRID_ACCUMULATED_ENERGY,
    names::GRID_ACCUMULATED_REACTIVE_POWER,
    names::METER_TYPE,
    names::ACTIVE_GRID_A_B_VOLTAGE,
    names::ACTIVE_GRID_B_C_VOLTAGE,
    names::ACTIVE_GRID_C_A_VOLTAGE,
    names::ACTIVE_GRID_A_POWER,
    names::ACTIVE_GRID_B_POWER,
    names::ACTIVE_GRID_C_POWER,
];

/// Registers polled when a battery is installed
pub const ENERGY_STORAGE_REGISTERS: &[&str] = &[
    names::STORAGE_STATE_OF_CAPACITY,
    names::STORAGE_RUNNING_STATUS,
    names::STORAGE_BUS_VOLTAGE,
    names::STORAGE_BUS_CURRENT,
    names::STORAGE_CHARGE_DISCHARGE_POWER,
    names::STORAGE_TOTAL_CHARGE,
    names::STORAGE_TOTAL_DISCHARGE,
    names::STORAGE_CURRENT_DAY_CHARGE_CAPACITY,
    names::STORAGE_CURRENT_DAY_DISCHARGE_CAPACITY,
];

/// Basic inverter identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InverterInfo {
    pub model_name: String,
    pub serial_number: String,
}

struct HeartbeatTask {
    enabled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// High-level interface to one inverter
pub struct Bridge {
    client: Arc<Client>,
    /// Only the primary bridge closes the shared session on stop
    primary: bool,
    slave_id: u8,
    pv_string_count: u16,
    pv_registers: Vec<String>,
    has_optimizers: bool,
    battery_1: StorageProductModel,
    battery_2: StorageProductModel,
    power_meter_type: Option<MeterType>,
    heartbeat: Mutex<HeartbeatTask>,
}

impl Bridge {
    /// Connect over Modbus-TCP and probe device capabilities
    pub async fn connect(host: &str, port: u16, slave_id: u8) -> Result<Self> {
        let config = Config {
            slave: slave_id,
            ..Config::default()
        };
        let client = Arc::new(Client::connect(host, port, config).await?);
        Self::populate(client, true, slave_id).await
    }

    /// Connect over Modbus-RTU and probe device capabilities
    pub async fn connect_rtu(serial: &SerialConfig, slave_id: u8) -> Result<Self> {
        let config = Config {
            slave: slave_id,
            ..Config::default()
        };
        let client = Arc::new(Client::connect_rtu(serial, config).await?);
        Self::populate(client, true, slave_id).await
    }

    /// Build the primary bridge over an already-probed session
    pub async fn create_primary(client: Arc<Client>) -> Result<Self> {
        let slave_id = client.slave();
        Self::populate(client, true, slave_id).await
    }

    /// Build a bridge for an extra slave reachable through the session of
    /// another device (smart logger or daisy-chained RS-485). Stopping it
    /// leaves the shared session open.
    pub async fn create_extra_slave(client: Arc<Client>, slave_id: u8) -> Result<Self> {
        assert_ne!(
            client.slave(),
            slave_id,
            "extra-slave bridge must address a different slave id"
        );
        Self::populate(client, false, slave_id).await
    }

    /// Probe the equipment this bridge reports on every update
    async fn populate(client: Arc<Client>, primary: bool, slave_id: u8) -> Result<Self> {
        let mut bridge = Self {
            client,
            primary,
            slave_id,
            pv_string_count: 0,
            pv_registers: Vec::new(),
            has_optimizers: false,
            battery_1: StorageProductModel::None,
            battery_2: StorageProductModel::None,
            power_meter_type: None,
            heartbeat: Mutex::new(HeartbeatTask {
                enabled: Arc::new(AtomicBool::new(false)),
                handle: None,
            }),
        };

        let count = bridge
            .get(names::NB_PV_STRINGS)
            .await?
            .value
            .as_u16()
            .unwrap_or(0);
        if !(1..=names::MAX_PV_STRINGS).contains(&count) {
            return Err(Error::ProtocolViolation(format!(
                "inverter reports {} PV strings, expected 1-{}",
                count,
                names::MAX_PV_STRINGS
            )));
        }
        bridge.pv_string_count = count;
        for i in 1..=count {
            bridge.pv_registers.push(names::pv_voltage(i));
            bridge.pv_registers.push(names::pv_current(i));
        }

        // some inverters answer this with an illegal-address exception
        if let Some(reading) = bridge.probe(names::NB_OPTIMIZERS).await? {
            bridge.has_optimizers = reading.value.as_i64().unwrap_or(0) > 0;
        }

        if let Some(status) = bridge.probe(names::METER_STATUS).await? {
            let online = status.value.enum_raw().map(MeterStatus::from_raw)
                == Some(MeterStatus::Normal);
            if online {
                if let Some(kind) = bridge.probe(names::METER_TYPE).await? {
                    bridge.power_meter_type =
                        kind.value.enum_raw().map(MeterType::from_raw);
                }
            }
        }

        if let Some(model) = bridge.probe(names::STORAGE_UNIT_1_PRODUCT_MODEL).await? {
            if let Some(raw) = model.value.enum_raw() {
                bridge.battery_1 = StorageProductModel::from_raw(raw);
            }
        }
        if let Some(model) = bridge.probe(names::STORAGE_UNIT_2_PRODUCT_MODEL).await? {
            if let Some(raw) = model.value.enum_raw() {
                bridge.battery_2 = StorageProductModel::from_raw(raw);
            }
        }
        if bridge.battery_1.is_present()
            && bridge.battery_2.is_present()
            && bridge.battery_1 != bridge.battery_2
        {
            warn!(
                "detected two batteries of different types ({:?} and {:?}), \
                 this can lead to unexpected behavior",
                bridge.battery_1, bridge.battery_2
            );
        }

        Ok(bridge)
    }

    /// One optional-feature probe: an illegal address or a terminal read
    /// error means the feature is absent, anything else is fatal
    async fn probe(&self, name: &str) -> Result<Option<Reading>> {
        match self.get(name).await {
            Ok(reading) => Ok(Some(reading)),
            Err(Error::IllegalAddress) | Err(Error::Read(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn get(&self, name: &str) -> Result<Reading> {
        self.client.get_on(name, Some(self.slave_id)).await
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn pv_string_count(&self) -> u16 {
        self.pv_string_count
    }

    pub fn has_optimizers(&self) -> bool {
        self.has_optimizers
    }

    pub fn battery_1_type(&self) -> StorageProductModel {
        self.battery_1
    }

    pub fn battery_2_type(&self) -> StorageProductModel {
        self.battery_2
    }

    pub fn power_meter_type(&self) -> Option<MeterType> {
        self.power_meter_type
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Snapshot of every register set the probed equipment provides.
    ///
    /// Each set is fetched with one batched read. A failing set fails the
    /// whole update; no partial snapshot is returned.
    pub async fn update(&self) -> Result<HashMap<String, Reading>> {
        let mut snapshot = HashMap::new();

        self.fetch_into(&mut snapshot, INVERTER_REGISTERS).await?;

        let pv: Vec<&str> = self.pv_registers.iter().map(String::as_str).collect();
        self.fetch_into(&mut snapshot, &pv).await?;

        if self.has_optimizers {
            self.fetch_into(&mut snapshot, OPTIMIZER_REGISTERS).await?;
        }
        if self.power_meter_type.is_some() {
            self.fetch_into(&mut snapshot, POWER_METER_REGISTERS).await?;
        }
        if self.battery_1.is_present() || self.battery_2.is_present() {
            self.fetch_into(&mut snapshot, ENERGY_STORAGE_REGISTERS)
                .await?;
        }

        Ok(snapshot)
    }

    async fn fetch_into(
        &self,
        snapshot: &mut HashMap<String, Reading>,
        names: &[&str],
    ) -> Result<()> {
        let readings = self
            .client
            .get_multiple_on(names, Some(self.slave_id))
            .await?;
        for (name, reading) in names.iter().zip(readings) {
            snapshot.insert((*name).to_string(), reading);
        }
        Ok(())
    }

    /// Model name and serial number, fetched with one batched read
    pub async fn get_info(&self) -> Result<InverterInfo> {
        let readings = self
            .client
            .get_multiple_on(&[names::MODEL_NAME, names::SERIAL_NUMBER], Some(self.slave_id))
            .await?;
        Ok(InverterInfo {
            model_name: readings[0].value.as_str().unwrap_or_default().to_string(),
            serial_number: readings[1].value.as_str().unwrap_or_default().to_string(),
        })
    }

    /// Write a register, true when the inverter echoed the written range
    pub async fn set(&self, name: &str, value: &crate::registers::Value) -> Result<bool> {
        self.client.set_on(name, value, Some(self.slave_id)).await
    }

    /// Probe write permission by writing the current time zone back to the
    /// inverter.
    ///
    /// This performs a real (semantically idempotent) register write and
    /// is therefore never run implicitly; call it only when the write has
    /// been sanctioned.
    pub async fn has_write_permission(&self) -> Result<bool> {
        let time_zone = self.get(names::TIME_ZONE).await?;
        match self.set(names::TIME_ZONE, &time_zone.value).await {
            Ok(_) => Ok(true),
            Err(Error::PermissionDenied) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Authenticate and start the keep-alive task
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        if !self
            .client
            .login_on(username, password, Some(self.slave_id))
            .await?
        {
            return Err(Error::InvalidCredentials);
        }
        self.start_heartbeat().await
    }

    /// Spawn the keep-alive task. It stops itself as soon as one
    /// heartbeat is refused.
    pub async fn start_heartbeat(&self) -> Result<()> {
        let mut heartbeat = self.heartbeat.lock().await;
        if let Some(handle) = &heartbeat.handle {
            if !handle.is_finished() {
                return Err(Error::General(
                    "cannot start the heartbeat task, it is still running".into(),
                ));
            }
        }

        let enabled = Arc::new(AtomicBool::new(true));
        let client = self.client.clone();
        let slave_id = self.slave_id;
        let flag = enabled.clone();
        heartbeat.enabled = enabled;
        heartbeat.handle = Some(tokio::spawn(async move {
            while flag.load(Ordering::SeqCst) {
                if !client.heartbeat(Some(slave_id)).await {
                    warn!("heartbeat refused, stopping the keep-alive task");
                    flag.store(false, Ordering::SeqCst);
                    break;
                }
                time::sleep(HEARTBEAT_INTERVAL).await;
            }
        }));
        Ok(())
    }

    /// Stop the keep-alive task and, on the primary bridge, close the
    /// session. The task is cancelled observably: no heartbeat write
    /// happens after this returns.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut heartbeat = self.heartbeat.lock().await;
            heartbeat.enabled.store(false, Ordering::SeqCst);
            if let Some(handle) = heartbeat.handle.take() {
                handle.abort();
            }
        }
        if self.primary {
            self.client.stop().await
        } else {
            Ok(())
        }
    }
}
