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

//! Register name constants.
//!
//! Catalog lookups are keyed by these strings. The per-string PV names are
//! generated, see [`pv_voltage`] and [`pv_current`].

pub const MODEL_NAME: &str = "model_name";
pub const SERIAL_NUMBER: &str = "serial_number";
pub const PRODUCT_NUMBER: &str = "product_number";
pub const NB_PV_STRINGS: &str = "nb_pv_strings";
pub const RATED_POWER: &str = "rated_power";

pub const STATE_1: &str = "state_1";
pub const STATE_2: &str = "state_2";
pub const STATE_3: &str = "state_3";
pub const ALARM_1: &str = "alarm_1";
pub const ALARM_2: &str = "alarm_2";
pub const ALARM_3: &str = "alarm_3";

pub const INPUT_POWER: &str = "input_power";
pub const LINE_VOLTAGE_A_B: &str = "line_voltage_A_B";
pub const LINE_VOLTAGE_B_C: &str = "line_voltage_B_C";
pub const LINE_VOLTAGE_C_A: &str = "line_voltage_C_A";
pub const PHASE_A_VOLTAGE: &str = "phase_A_voltage";
pub const PHASE_B_VOLTAGE: &str = "phase_B_voltage";
pub const PHASE_C_VOLTAGE: &str = "phase_C_voltage";
pub const PHASE_A_CURRENT: &str = "phase_A_current";
pub const PHASE_B_CURRENT: &str = "phase_B_current";
pub const PHASE_C_CURRENT: &str = "phase_C_current";
pub const DAY_ACTIVE_POWER_PEAK: &str = "day_active_power_peak";
pub const ACTIVE_POWER: &str = "active_power";
pub const REACTIVE_POWER: &str = "reactive_power";
pub const POWER_FACTOR: &str = "power_factor";
pub const GRID_FREQUENCY: &str = "grid_frequency";
pub const EFFICIENCY: &str = "efficiency";
pub const INTERNAL_TEMPERATURE: &str = "internal_temperature";
pub const INSULATION_RESISTANCE: &str = "insulation_resistance";
pub const DEVICE_STATUS: &str = "device_status";
pub const FAULT_CODE: &str = "fault_code";
pub const STARTUP_TIME: &str = "startup_time";
pub const SHUTDOWN_TIME: &str = "shutdown_time";
pub const ACCUMULATED_YIELD_ENERGY: &str = "accumulated_yield_energy";
pub const DAILY_YIELD_ENERGY: &str = "daily_yield_energy";

pub const METER_STATUS: &str = "meter_status";
pub const GRID_A_VOLTAGE: &str = "grid_A_voltage";
pub const GRID_B_VOLTAGE: &str = "grid_B_voltage";
pub const GRID_C_VOLTAGE: &str = "grid_C_voltage";
pub const ACTIVE_GRID_A_CURRENT: &str = "active_grid_A_current";
pub const ACTIVE_GRID_B_CURRENT: &str = "active_grid_B_current";
pub const ACTIVE_GRID_C_CURRENT: &str = "active_grid_C_current";
pub const POWER_METER_ACTIVE_POWER: &str = "power_meter_active_power";
pub const POWER_METER_REACTIVE_POWER: &str = "power_meter_reactive_power";
pub const ACTIVE_GRID_POWER_FACTOR: &str = "active_grid_power_factor";
pub const ACTIVE_GRID_FREQUENCY: &str = "active_grid_frequency";
pub const GRID_EXPORTED_ENERGY: &str = "grid_exported_energy";
pub const GRID_ACCUMULATED_ENERGY: &str = "grid_accumulated_energy";
pub const GRID_ACCUMULATED_REACTIVE_POWER: &str = "grid_accumulated_reactive_power";
pub const METER_TYPE: &str = "meter_type";
pub const ACTIVE_GRID_A_B_VOLTAGE: &str = "active_grid_A_B_voltage";
pub const ACTIVE_GRID_B_C_VOLTAGE: &str = "active_grid_B_C_voltage";
pub const ACTIVE_GRID_C_A_VOLTAGE: &str = "active_grid_C_A_voltage";
pub const ACTIVE_GRID_A_POWER: &str = "active_grid_A_power";
pub const ACTIVE_GRID_B_POWER: &str = "active_grid_B_power";
pub const ACTIVE_GRID_C_POWER: &str = "active_grid_C_power";

pub const NB_OPTIMIZERS: &str = "nb_optimizers";
pub const NB_ONLINE_OPTIMIZERS: &str = "nb_online_optimizers";

pub const STORAGE_STATE_OF_CAPACITY: &str = "storage_state_of_capacity";
pub const STORAGE_RUNNING_STATUS: &str = "storage_running_status";
pub const STORAGE_BUS_VOLTAGE: &str = "storage_bus_voltage";
pub const STORAGE_BUS_CURRENT: &str = "storage_bus_current";
pub const STORAGE_CHARGE_DISCHARGE_POWER: &str = "storage_charge_discharge_power";
pub const STORAGE_TOTAL_CHARGE: &str = "storage_total_charge";
pub const STORAGE_TOTAL_DISCHARGE: &str = "storage_total_discharge";
pub const STORAGE_CURRENT_DAY_CHARGE_CAPACITY: &str = "storage_current_day_charge_capacity";
pub const STORAGE_CURRENT_DAY_DISCHARGE_CAPACITY: &str = "storage_current_day_discharge_capacity";
pub const STORAGE_UNIT_1_PRODUCT_MODEL: &str = "storage_unit_1_product_model";
pub const STORAGE_UNIT_2_PRODUCT_MODEL: &str = "storage_unit_2_product_model";

pub const SYSTEM_TIME: &str = "system_time";
pub const TIME_ZONE: &str = "time_zone";
pub const HEARTBEAT: &str = "heartbeat";

pub const SMARTLOGGER_FIRST_SLAVE_POWER: &str = "smartlogger_first_slave_power";
pub const SMARTLOGGER_TIME_ZONE: &str = "smartlogger_time_zone";

/// Highest PV string index an inverter can report
pub const MAX_PV_STRINGS: u16 = 24;

/// Name of the voltage register of PV string `index` (1-based)
pub fn pv_voltage(index: u16) -> String {
    format!("pv_{:02}_voltage", index)
}

/// Name of the current register of PV string `index` (1-based)
pub fn pv_current(index: u16) -> String {
    format!("pv_{:02}_current", index)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pv_names() {
        assert_eq!(pv_voltage(1), "pv_01_voltage");
        assert_eq!(pv_current(12), "pv_12_current");
        assert_eq!(pv_voltage(24), "pv_24_voltage");
    }
}
