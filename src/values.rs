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

//! Decoded register value tables: device enumerations and status/alarm
//! bit assignments from the vendor interface definition.
//!
//! Raw integers reported by firmware newer than this table must stay
//! representable, so every enum carries an `Unknown` catch-all.

/// Battery product installed in a storage unit slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProductModel {
    None,
    LgResu,
    HuaweiLuna2000,
    Unknown(u16),
}

impl StorageProductModel {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::LgResu,
            2 => Self::HuaweiLuna2000,
            other => Self::Unknown(other),
        }
    }

    /// True when the slot actually holds a battery
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Power meter reachability as reported by the inverter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterStatus {
    Offline,
    Normal,
    Unknown(u16),
}

impl MeterStatus {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Self::Offline,
            1 => Self::Normal,
            other => Self::Unknown(other),
        }
    }
}

/// Kind of power meter attached to the inverter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterType {
    SinglePhase,
    ThreePhase,
    Unknown(u16),
}

impl MeterType {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Self::SinglePhase,
            1 => Self::ThreePhase,
            other => Self::Unknown(other),
        }
    }
}

/// Energy storage running state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStatus {
    Offline,
    Standby,
    Running,
    Fault,
    SleepMode,
    Unknown(u16),
}

impl StorageStatus {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => Self::Offline,
            1 => Self::Standby,
            2 => Self::Running,
            3 => Self::Fault,
            4 => Self::SleepMode,
            other => Self::Unknown(other),
        }
    }
}

/// Device status register (32089) value mapping
pub const DEVICE_STATUS: &[(u16, &str)] = &[
    (0x0000, "Standby: initializing"),
    (0x0001, "Standby: detecting insulation resistance"),
    (0x0002, "Standby: detecting irradiation"),
    (0x0003, "Standby: grid detecting"),
    (0x0100, "Starting"),
    (0x0200, "On-grid"),
    (0x0201, "Grid connection: power limited"),
    (0x0202, "Grid connection: self-derating"),
    (0x0300, "Shutdown: fault"),
    (0x0301, "Shutdown: command"),
    (0x0302, "Shutdown: OVGR"),
    (0x0303, "Shutdown: communication disconnected"),
    (0x0304, "Shutdown: power limited"),
    (0x0305, "Shutdown: manual startup required"),
    (0x0306, "Shutdown: DC switches disconnected"),
    (0x0307, "Shutdown: rapid cutoff"),
    (0x0308, "Shutdown: input underpower"),
    (0x0401, "Grid scheduling: cos(phi)-P curve"),
    (0x0402, "Grid scheduling: Q-U curve"),
    (0x0403, "Grid scheduling: PF-U curve"),
    (0x0404, "Grid scheduling: dry contact"),
    (0x0405, "Grid scheduling: Q-P curve"),
    (0x0500, "Spot-check ready"),
    (0x0501, "Spot-checking"),
    (0x0600, "Inspecting"),
    (0x0700, "AFCI self check"),
    (0x0800, "I-V scanning"),
    (0x0900, "DC input detection"),
    (0x0a00, "Running: off-grid charging"),
    (0xa000, "Standby: no irradiation"),
];

/// Meter status register (37100) value mapping
pub const METER_STATUS: &[(u16, &str)] = &[(0, "offline"), (1, "normal")];

/// Meter type register (37125) value mapping
pub const METER_TYPE: &[(u16, &str)] = &[(0, "single phase"), (1, "three phase")];

/// Storage running status (37762) value mapping
pub const STORAGE_STATUS: &[(u16, &str)] = &[
    (0, "offline"),
    (1, "standby"),
    (2, "running"),
    (3, "fault"),
    (4, "sleep mode"),
];

/// Storage product model (47000/47089) value mapping
pub const STORAGE_PRODUCT_MODEL: &[(u16, &str)] =
    &[(0, "none"), (1, "LG-RESU"), (2, "Huawei-LUNA2000")];

/// State register 1 (32000) bit assignments
pub const STATE_1: &[(u16, &str)] = &[
    (0x0001, "standby"),
    (0x0002, "grid_connected"),
    (0x0004, "grid_connected_normally"),
    (0x0008, "grid_connection_derated_by_rationing"),
    (0x0010, "grid_connection_derated_internally"),
    (0x0020, "normal_stop"),
    (0x0040, "stop_due_to_faults"),
    (0x0080, "stop_due_to_power_rationing"),
    (0x0100, "shutdown"),
    (0x0200, "spot_check"),
];

/// State register 2 (32002) bit assignments
pub const STATE_2: &[(u16, &str)] = &[
    (0x0001, "unlocked"),
    (0x0002, "pv_connected"),
    (0x0004, "dsp_data_collection"),
];

/// State register 3 (32003, 32 bits) bit assignments
pub const STATE_3: &[(u32, &str)] = &[(0x0000_0001, "off_grid"), (0x0000_0002, "off_grid_switch_enabled")];

/// Alarm register 1 (32008) bit assignments
pub const ALARM_1: &[(u16, &str)] = &[
    (0x0001, "high_string_input_voltage"),
    (0x0002, "dc_arc_fault"),
    (0x0004, "string_reverse_connection"),
    (0x0008, "string_current_backfeed"),
    (0x0010, "abnormal_string_power"),
    (0x0020, "afci_self_check_fail"),
    (0x0040, "phase_wire_short_circuit_to_ground"),
    (0x0080, "grid_phase_failure"),
    (0x0100, "pv_string_loss"),
    (0x0200, "grid_undervoltage"),
    (0x0400, "grid_overvoltage"),
    (0x0800, "grid_voltage_imbalance"),
    (0x1000, "grid_overfrequency"),
    (0x2000, "grid_underfrequency"),
    (0x4000, "unstable_grid_frequency"),
    (0x8000, "output_overcurrent"),
];

/// Alarm register 2 (32009) bit assignments
pub const ALARM_2: &[(u16, &str)] = &[
    (0x0001, "output_dc_component_overhigh"),
    (0x0002, "abnormal_residual_current"),
    (0x0004, "abnormal_grounding"),
    (0x0008, "low_insulation_resistance"),
    (0x0010, "overtemperature"),
    (0x0020, "device_fault"),
    (0x0040, "upgrade_failed"),
    (0x0080, "license_expired"),
    (0x0100, "faulty_monitoring_unit"),
    (0x0200, "faulty_power_collector"),
    (0x0400, "battery_abnormal"),
    (0x0800, "active_islanding"),
    (0x1000, "passive_islanding"),
    (0x2000, "transient_ac_overvoltage"),
    (0x4000, "peripheral_port_short_circuit"),
    (0x8000, "churn_output_overload"),
];

/// Alarm register 3 (32010) bit assignments
pub const ALARM_3: &[(u16, &str)] = &[
    (0x0001, "abnormal_pv_module_configuration"),
    (0x0002, "optimizer_fault"),
    (0x0004, "built_in_pid_operation_abnormal"),
    (0x0008, "high_input_string_voltage_to_ground"),
    (0x0010, "external_fan_abnormal"),
    (0x0020, "battery_reverse_connection"),
    (0x0040, "on_grid_off_grid_controller_abnormal"),
    (0x0080, "pv_string_loss"),
    (0x0100, "internal_fan_abnormal"),
    (0x0200, "dc_protection_unit_abnormal"),
];
