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

//! Typed register map of the Huawei inverter holding-register space.
//!
//! A [`RegisterDef`] translates a logical field name into a word range plus
//! decode/encode rules; the immutable [`Catalog`] maps names to definitions.
//! The process-wide [`REGISTERS`] catalog carries the full map from the
//! vendor interface definition; tests and special deployments can build
//! their own via [`Catalog::new`].

use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use once_cell::sync::Lazy;

use crate::codec::{self, WordReader};
use crate::error::{Error, Result};
use crate::names;
use crate::values;

/// How a register may be accessed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    /// Readable without login
    Read,
    /// Readable only within an authenticated session
    ReadAuthorized,
    /// Writeable (implies readable)
    Write,
}

/// Decode/encode rule of a register
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterKind {
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    /// Fixed-length ASCII, trailing NULs and whitespace trimmed
    Str,
    /// Seconds since the Unix epoch in inverter-local time; `0xffffffff`
    /// means "not set"
    Timestamp,
    Bitfield16(&'static [(u16, &'static str)]),
    Bitfield32(&'static [(u32, &'static str)]),
    Enum(&'static [(u16, &'static str)]),
}

impl RegisterKind {
    /// Word footprint of the kind, `None` when the descriptor length rules
    /// (strings)
    fn fixed_length(&self) -> Option<u16> {
        match self {
            Self::U16 | Self::I16 | Self::Bitfield16(_) | Self::Enum(_) => Some(1),
            Self::U32 | Self::I32 | Self::F32 | Self::Timestamp | Self::Bitfield32(_) => Some(2),
            Self::U64 | Self::I64 => Some(4),
            Self::Str => None,
        }
    }
}

/// Physical unit attached to a register
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Unit {
    None,
    Const(&'static str),
    /// Unit depends on the decoded value. Such registers expose no unit on
    /// their readings; the caller interprets the raw value.
    PerValue(&'static [(u64, &'static str)]),
    /// Unit is computed from device state and not representable statically
    Dynamic,
}

impl Unit {
    /// The unit attached to readings of this register
    pub fn exposed(&self) -> Option<&'static str> {
        match self {
            Unit::Const(unit) => Some(unit),
            _ => None,
        }
    }
}

/// Decoded enumeration value; firmware may report values newer than the
/// mapping table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumValue {
    pub raw: u16,
    pub label: Option<&'static str>,
}

/// Semantic value decoded from a register
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    /// Scaled integer
    Float(f64),
    Str(String),
    Timestamp(DateTime<FixedOffset>),
    /// Names of the bits set in a bitfield register
    Flags(Vec<&'static str>),
    Enum(EnumValue),
    /// Sentinel for "value not set" (timestamp registers)
    None,
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::U16(v) => Some(*v as i64),
            Value::I16(v) => Some(*v as i64),
            Value::U32(v) => Some(*v as i64),
            Value::I32(v) => Some(*v as i64),
            Value::U64(v) => i64::try_from(*v).ok(),
            Value::I64(v) => Some(*v),
            Value::Enum(e) => Some(e.raw as i64),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self.as_i64() {
            Some(v) if (0..=u16::MAX as i64).contains(&v) => Some(v as u16),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::F32(v) => Some(*v as f64),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn enum_raw(&self) -> Option<u16> {
        match self {
            Value::Enum(e) => Some(e.raw),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U16(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Flags(flags) => write!(f, "{}", flags.join("|")),
            Value::Enum(e) => match e.label {
                Some(label) => write!(f, "{}", label),
                None => write!(f, "unknown({})", e.raw),
            },
            Value::None => write!(f, "-"),
        }
    }
}

/// A decoded register: the semantic value and, for registers with a fixed
/// physical unit, that unit
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: Value,
    pub unit: Option<&'static str>,
}

/// Register descriptor: where the field lives and how its words decode
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDef {
    pub name: String,
    pub address: u16,
    pub length: u16,
    pub kind: RegisterKind,
    /// Divisor applied after the primitive decode
    pub scale: u32,
    pub unit: Unit,
    pub access: AccessLevel,
}

/// Shorthand constructor used by the catalog tables
fn def(name: &str, address: u16, length: u16, kind: RegisterKind) -> RegisterDef {
    RegisterDef {
        name: name.to_string(),
        address,
        length,
        kind,
        scale: 1,
        unit: Unit::None,
        access: AccessLevel::Read,
    }
}

impl RegisterDef {
    fn scale(mut self, scale: u32) -> Self {
        self.scale = scale;
        self
    }

    fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Unit::Const(unit);
        self
    }

    fn access(mut self, access: AccessLevel) -> Self {
        self.access = access;
        self
    }

    pub fn is_writeable(&self) -> bool {
        self.access == AccessLevel::Write
    }

    /// Word address one past the end of this register
    pub fn end(&self) -> u32 {
        self.address as u32 + self.length as u32
    }

    /// Decode this register from the word stream.
    ///
    /// `time_zone` is the inverter-reported offset in minutes, needed by
    /// timestamp registers; when it is not known yet timestamps decode as
    /// UTC.
    pub fn decode(&self, reader: &mut WordReader<'_>, time_zone: Option<i16>) -> Result<Value> {
        let value = match self.kind {
            RegisterKind::U16 => self.scaled_unsigned(reader.u16()? as u64),
            RegisterKind::U32 => self.scaled_unsigned(reader.u32()? as u64),
            RegisterKind::U64 => self.scaled_unsigned(reader.u64()?),
            RegisterKind::I16 => self.scaled_signed(reader.i16()? as i64),
            RegisterKind::I32 => self.scaled_signed(reader.i32()? as i64),
            RegisterKind::I64 => self.scaled_signed(reader.i64()?),
            RegisterKind::F32 => {
                let raw = reader.f32()?;
                if self.scale == 1 {
                    Value::F32(raw)
                } else {
                    Value::Float(raw as f64 / self.scale as f64)
                }
            }
            RegisterKind::Str => {
                let bytes = reader.bytes(self.length as usize * 2)?;
                let text = String::from_utf8_lossy(&bytes);
                Value::Str(text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
            }
            RegisterKind::Timestamp => {
                let raw = reader.u32()?;
                if raw == u32::MAX {
                    Value::None
                } else {
                    let tz_min = time_zone.unwrap_or(0) as i32;
                    let offset = FixedOffset::east_opt(tz_min * 60).ok_or_else(|| {
                        Error::ProtocolViolation(format!(
                            "time zone offset {} min out of range",
                            tz_min
                        ))
                    })?;
                    // the device reports local epoch seconds
                    let utc_secs = raw as i64 - tz_min as i64 * 60;
                    let utc = Utc
                        .timestamp_opt(utc_secs, 0)
                        .single()
                        .ok_or_else(|| {
                            Error::ProtocolViolation(format!("unrepresentable timestamp {}", raw))
                        })?;
                    Value::Timestamp(utc.with_timezone(&offset))
                }
            }
            RegisterKind::Bitfield16(table) => {
                let raw = reader.u16()?;
                let mut flags = Vec::new();
                for (mask, name) in table {
                    if raw & *mask != 0 {
                        flags.push(*name);
                    }
                }
                Value::Flags(flags)
            }
            RegisterKind::Bitfield32(table) => {
                let raw = reader.u32()?;
                let mut flags = Vec::new();
                for (mask, name) in table {
                    if raw & *mask != 0 {
                        flags.push(*name);
                    }
                }
                Value::Flags(flags)
            }
            RegisterKind::Enum(table) => {
                let raw = reader.u16()?;
                let label = table
                    .iter()
                    .find(|(value, _)| *value == raw)
                    .map(|(_, label)| *label);
                Value::Enum(EnumValue { raw, label })
            }
        };
        Ok(value)
    }

    fn scaled_unsigned(&self, raw: u64) -> Value {
        if self.scale != 1 {
            return Value::Float(raw as f64 / self.scale as f64);
        }
        match self.kind {
            RegisterKind::U16 => Value::U16(raw as u16),
            RegisterKind::U32 => Value::U32(raw as u32),
            _ => Value::U64(raw),
        }
    }

    fn scaled_signed(&self, raw: i64) -> Value {
        if self.scale != 1 {
            return Value::Float(raw as f64 / self.scale as f64);
        }
        match self.kind {
            RegisterKind::I16 => Value::I16(raw as i16),
            RegisterKind::I32 => Value::I32(raw as i32),
            _ => Value::I64(raw),
        }
    }

    /// Encode `value` into the register's words. Fails with `InvalidValue`
    /// when the value doesn't round-trip through the register's scale and
    /// range.
    pub fn encode(&self, value: &Value) -> Result<Vec<u16>> {
        let mut words = Vec::with_capacity(self.length as usize);
        match self.kind {
            RegisterKind::U16 => {
                let raw = self.raw_for_encode(value, 0, u16::MAX as i64)?;
                codec::push_u16(&mut words, raw as u16);
            }
            RegisterKind::I16 => {
                let raw = self.raw_for_encode(value, i16::MIN as i64, i16::MAX as i64)?;
                codec::push_u16(&mut words, raw as i16 as u16);
            }
            RegisterKind::U32 => {
                let raw = self.raw_for_encode(value, 0, u32::MAX as i64)?;
                codec::push_u32(&mut words, raw as u32);
            }
            RegisterKind::I32 => {
                let raw = self.raw_for_encode(value, i32::MIN as i64, i32::MAX as i64)?;
                codec::push_u32(&mut words, raw as i32 as u32);
            }
            RegisterKind::U64 | RegisterKind::I64 => {
                let raw = self.raw_for_encode(value, i64::MIN, i64::MAX)?;
                codec::push_u64(&mut words, raw as u64);
            }
            RegisterKind::F32 => match value {
                Value::F32(v) => codec::push_u32(&mut words, v.to_bits()),
                Value::Float(v) => {
                    codec::push_u32(&mut words, ((*v * self.scale as f64) as f32).to_bits())
                }
                _ => return Err(self.invalid_value(value, "expected a float")),
            },
            RegisterKind::Str => match value {
                Value::Str(text) => {
                    if text.len() > self.length as usize * 2 {
                        return Err(self.invalid_value(value, "string too long"));
                    }
                    codec::push_bytes(&mut words, text.as_bytes(), self.length as usize);
                }
                _ => return Err(self.invalid_value(value, "expected a string")),
            },
            RegisterKind::Enum(table) => {
                let raw = self.raw_for_encode(value, 0, u16::MAX as i64)? as u16;
                if !table.iter().any(|(code, _)| *code == raw) {
                    return Err(self.invalid_value(value, "not a known enumeration value"));
                }
                codec::push_u16(&mut words, raw);
            }
            RegisterKind::Bitfield16(table) => {
                let raw = match value {
                    Value::Flags(flags) => flags_to_mask(flags, table, self)?,
                    _ => self.raw_for_encode(value, 0, u16::MAX as i64)? as u16,
                };
                codec::push_u16(&mut words, raw);
            }
            RegisterKind::Bitfield32(_) | RegisterKind::Timestamp => {
                return Err(self.invalid_value(value, "register kind is not encodable"));
            }
        }
        debug_assert_eq!(words.len(), self.length as usize);
        Ok(words)
    }

    /// Undo the scale and verify the integer raw value round-trips
    fn raw_for_encode(&self, value: &Value, min: i64, max: i64) -> Result<i64> {
        let raw = if self.scale == 1 {
            self.as_exact_integer(value)?
        } else {
            let v = value
                .as_f64()
                .ok_or_else(|| self.invalid_value(value, "expected a number"))?;
            let scaled = v * self.scale as f64;
            if (scaled - scaled.round()).abs() > 1e-6 {
                return Err(self.invalid_value(value, "does not round-trip through the scale"));
            }
            scaled.round() as i64
        };
        if raw < min || raw > max {
            return Err(self.invalid_value(value, "out of range"));
        }
        Ok(raw)
    }

    fn as_exact_integer(&self, value: &Value) -> Result<i64> {
        if let Some(v) = value.as_i64() {
            return Ok(v);
        }
        // allow floats holding an exact integer
        match value.as_f64() {
            Some(v) if v.fract() == 0.0 => Ok(v as i64),
            _ => Err(self.invalid_value(value, "expected an integer")),
        }
    }

    fn invalid_value(&self, value: &Value, reason: &str) -> Error {
        Error::InvalidValue {
            name: self.name.clone(),
            reason: format!("{} ({})", reason, value),
        }
    }
}

fn flags_to_mask(
    flags: &[&'static str],
    table: &'static [(u16, &'static str)],
    reg: &RegisterDef,
) -> Result<u16> {
    let mut mask = 0u16;
    for flag in flags {
        let (bit, _) = table
            .iter()
            .find(|(_, name)| name == flag)
            .ok_or_else(|| Error::InvalidValue {
                name: reg.name.clone(),
                reason: format!("unknown flag {}", flag),
            })?;
        mask |= bit;
    }
    Ok(mask)
}

/// Immutable name-to-descriptor map
pub struct Catalog {
    map: HashMap<String, RegisterDef>,
}

impl Catalog {
    /// Build a catalog, validating the register-map invariants.
    ///
    /// Panics on programmer error in the descriptor table: duplicate
    /// names, address arithmetic overflowing the 16-bit space, a length
    /// not matching the kind, or overlapping writeable registers.
    pub fn new(defs: Vec<RegisterDef>) -> Self {
        let mut map = HashMap::with_capacity(defs.len());

        for reg in &defs {
            assert!(
                reg.length > 0 && reg.end() <= 0x1_0000,
                "register {} exceeds the 16-bit address space",
                reg.name
            );
            if let Some(expected) = reg.kind.fixed_length() {
                assert_eq!(
                    reg.length, expected,
                    "register {} length doesn't match its kind",
                    reg.name
                );
            }
        }

        let writeable: Vec<&RegisterDef> = defs.iter().filter(|r| r.is_writeable()).collect();
        for (i, a) in writeable.iter().enumerate() {
            for b in &writeable[i + 1..] {
                let disjoint = a.end() <= b.address as u32 || b.end() <= a.address as u32;
                assert!(
                    disjoint,
                    "writeable registers {} and {} overlap",
                    a.name, b.name
                );
            }
        }

        for reg in defs {
            let prev = map.insert(reg.name.clone(), reg);
            assert!(prev.is_none(), "duplicate register name");
        }

        Self { map }
    }

    pub fn get(&self, name: &str) -> Option<&RegisterDef> {
        self.map.get(name)
    }

    pub fn lookup(&self, name: &str) -> Result<&RegisterDef> {
        self.get(name)
            .ok_or_else(|| Error::InvalidName(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// The full Huawei register map
pub static REGISTERS: Lazy<Catalog> = Lazy::new(huawei_registers);

fn huawei_registers() -> Catalog {
    use AccessLevel::*;
    use RegisterKind::*;

    let mut defs = vec![
        // identity block
        def(names::MODEL_NAME, 30000, 15, Str),
        def(names::SERIAL_NUMBER, 30015, 10, Str),
        def(names::PRODUCT_NUMBER, 30025, 10, Str),
        def(names::NB_PV_STRINGS, 30071, 1, U16),
        def(names::RATED_POWER, 30073, 2, U32).unit("W"),
        // state and alarm bitfields
        def(names::STATE_1, 32000, 1, Bitfield16(values::STATE_1)),
        def(names::STATE_2, 32002, 1, Bitfield16(values::STATE_2)),
        def(names::STATE_3, 32003, 2, Bitfield32(values::STATE_3)),
        def(names::ALARM_1, 32008, 1, Bitfield16(values::ALARM_1)),
        def(names::ALARM_2, 32009, 1, Bitfield16(values::ALARM_2)),
        def(names::ALARM_3, 32010, 1, Bitfield16(values::ALARM_3)),
        // grid-side measurements
        def(names::INPUT_POWER, 32064, 2, I32).unit("W"),
        def(names::LINE_VOLTAGE_A_B, 32066, 1, U16).scale(10).unit("V"),
        def(names::LINE_VOLTAGE_B_C, 32067, 1, U16).scale(10).unit("V"),
        def(names::LINE_VOLTAGE_C_A, 32068, 1, U16).scale(10).unit("V"),
        def(names::PHASE_A_VOLTAGE, 32069, 1, U16).scale(10).unit("V"),
        def(names::PHASE_B_VOLTAGE, 32070, 1, U16).scale(10).unit("V"),
        def(names::PHASE_C_VOLTAGE, 32071, 1, U16).scale(10).unit("V"),
        def(names::PHASE_A_CURRENT, 32072, 2, I32).scale(1000).unit("A"),
        def(names::PHASE_B_CURRENT, 32074, 2, I32).scale(1000).unit("A"),
        def(names::PHASE_C_CURRENT, 32076, 2, I32).scale(1000).unit("A"),
        def(names::DAY_ACTIVE_POWER_PEAK, 32078, 2, I32).unit("W"),
        def(names::ACTIVE_POWER, 32080, 2, I32).unit("W"),
        def(names::REACTIVE_POWER, 32082, 2, I32).unit("var"),
        def(names::POWER_FACTOR, 32084, 1, I16).scale(1000),
        def(names::GRID_FREQUENCY, 32085, 1, U16).scale(100).unit("Hz"),
        def(names::EFFICIENCY, 32086, 1, U16).scale(100).unit("%"),
        def(names::INTERNAL_TEMPERATURE, 32087, 1, I16).scale(10).unit("°C"),
        def(names::INSULATION_RESISTANCE, 32088, 1, U16).scale(1000).unit("MOhm"),
        def(names::DEVICE_STATUS, 32089, 1, Enum(values::DEVICE_STATUS)),
        def(names::FAULT_CODE, 32090, 1, U16),
        def(names::STARTUP_TIME, 32091, 2, Timestamp),
        def(names::SHUTDOWN_TIME, 32093, 2, Timestamp),
        def(names::ACCUMULATED_YIELD_ENERGY, 32106, 2, U32).scale(100).unit("kWh"),
        def(names::DAILY_YIELD_ENERGY, 32114, 2, U32).scale(100).unit("kWh"),
        // power meter block
        def(names::METER_STATUS, 37100, 1, Enum(values::METER_STATUS)),
        def(names::GRID_A_VOLTAGE, 37101, 2, I32).scale(10).unit("V"),
        def(names::GRID_B_VOLTAGE, 37103, 2, I32).scale(10).unit("V"),
        def(names::GRID_C_VOLTAGE, 37105, 2, I32).scale(10).unit("V"),
        def(names::ACTIVE_GRID_A_CURRENT, 37107, 2, I32).scale(100).unit("A"),
        def(names::ACTIVE_GRID_B_CURRENT, 37109, 2, I32).scale(100).unit("A"),
        def(names::ACTIVE_GRID_C_CURRENT, 37111, 2, I32).scale(100).unit("A"),
        def(names::POWER_METER_ACTIVE_POWER, 37113, 2, I32).unit("W"),
        def(names::POWER_METER_REACTIVE_POWER, 37115, 2, I32).unit("var"),
        def(names::ACTIVE_GRID_POWER_FACTOR, 37117, 1, I16).scale(1000),
        def(names::ACTIVE_GRID_FREQUENCY, 37118, 1, I16).scale(100).unit("Hz"),
        def(names::GRID_EXPORTED_ENERGY, 37119, 2, I32).scale(100).unit("kWh"),
        def(names::GRID_ACCUMULATED_ENERGY, 37121, 2, U32).scale(100).unit("kWh"),
        def(names::GRID_ACCUMULATED_REACTIVE_POWER, 37123, 2, I32).scale(100).unit("kvarh"),
        def(names::METER_TYPE, 37125, 1, Enum(values::METER_TYPE)),
        def(names::ACTIVE_GRID_A_B_VOLTAGE, 37126, 2, I32).scale(10).unit("V"),
        def(names::ACTIVE_GRID_B_C_VOLTAGE, 37128, 2, I32).scale(10).unit("V"),
        def(names::ACTIVE_GRID_C_A_VOLTAGE, 37130, 2, I32).scale(10).unit("V"),
        def(names::ACTIVE_GRID_A_POWER, 37132, 2, I32).unit("W"),
        def(names::ACTIVE_GRID_B_POWER, 37134, 2, I32).unit("W"),
        def(names::ACTIVE_GRID_C_POWER, 37136, 2, I32).unit("W"),
        // optimizers
        def(names::NB_OPTIMIZERS, 37200, 1, U16),
        def(names::NB_ONLINE_OPTIMIZERS, 37202, 1, U16),
        // energy storage block
        def(names::STORAGE_STATE_OF_CAPACITY, 37760, 1, U16).scale(10).unit("%"),
        def(names::STORAGE_RUNNING_STATUS, 37762, 1, Enum(values::STORAGE_STATUS)),
        def(names::STORAGE_BUS_VOLTAGE, 37763, 1, U16).scale(10).unit("V"),
        def(names::STORAGE_BUS_CURRENT, 37764, 1, I16).scale(10).unit("A"),
        def(names::STORAGE_CHARGE_DISCHARGE_POWER, 37765, 2, I32).unit("W"),
        def(names::STORAGE_TOTAL_CHARGE, 37780, 2, U32).scale(100).unit("kWh"),
        def(names::STORAGE_TOTAL_DISCHARGE, 37782, 2, U32).scale(100).unit("kWh"),
        def(names::STORAGE_CURRENT_DAY_CHARGE_CAPACITY, 37784, 2, U32).scale(100).unit("kWh"),
        def(names::STORAGE_CURRENT_DAY_DISCHARGE_CAPACITY, 37786, 2, U32).scale(100).unit("kWh"),
        def(names::STORAGE_UNIT_1_PRODUCT_MODEL, 47000, 1, Enum(values::STORAGE_PRODUCT_MODEL)),
        def(names::STORAGE_UNIT_2_PRODUCT_MODEL, 47089, 1, Enum(values::STORAGE_PRODUCT_MODEL)),
        // configuration and session registers
        def(names::SYSTEM_TIME, 40000, 2, Timestamp).access(ReadAuthorized),
        def(names::TIME_ZONE, 43006, 1, I16).unit("min").access(Write),
        def(names::HEARTBEAT, 49999, 1, U16).access(Write),
        // smart-logger remapped registers
        def(names::SMARTLOGGER_FIRST_SLAVE_POWER, 32290, 2, I32).unit("W"),
        def(names::SMARTLOGGER_TIME_ZONE, 40002, 1, I16).unit("min"),
    ];

    // per-string PV measurements, two registers per string
    for i in 1..=names::MAX_PV_STRINGS {
        let base = 32016 + (i - 1) * 2;
        defs.push(def(&names::pv_voltage(i), base, 1, I16).scale(10).unit("V"));
        defs.push(def(&names::pv_current(i), base + 1, 1, I16).scale(100).unit("A"));
    }

    Catalog::new(defs)
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode_one(reg: &RegisterDef, words: &[u16], time_zone: Option<i16>) -> Value {
        let mut reader = WordReader::new(words);
        reg.decode(&mut reader, time_zone).unwrap()
    }

    #[test]
    fn test_catalog_lookup() {
        let reg = REGISTERS.lookup(names::ACTIVE_POWER).unwrap();
        assert_eq!(reg.address, 32080);
        assert_eq!(reg.length, 2);

        assert!(matches!(
            REGISTERS.lookup("definitely_not_a_register"),
            Err(Error::InvalidName(_))
        ));

        // all 24 PV string pairs must resolve
        for i in 1..=names::MAX_PV_STRINGS {
            assert!(REGISTERS.get(&names::pv_voltage(i)).is_some());
            assert!(REGISTERS.get(&names::pv_current(i)).is_some());
        }
        assert_eq!(REGISTERS.get(&names::pv_voltage(1)).unwrap().address, 32016);
        assert_eq!(REGISTERS.get(&names::pv_current(24)).unwrap().address, 32063);
    }

    #[test]
    fn test_decode_active_power() {
        let reg = REGISTERS.lookup(names::ACTIVE_POWER).unwrap();
        assert_eq!(
            decode_one(reg, &[0x0000, 0x1388], None),
            Value::I32(5000)
        );
        assert_eq!(reg.unit.exposed(), Some("W"));

        // negative power flows when feeding a battery
        assert_eq!(
            decode_one(reg, &[0xffff, 0xec78], None),
            Value::I32(-5000)
        );
    }

    #[test]
    fn test_decode_scaled() {
        let reg = REGISTERS.lookup(names::PHASE_A_VOLTAGE).unwrap();
        assert_eq!(decode_one(reg, &[0x08fc], None), Value::Float(230.0));

        let reg = REGISTERS.lookup(names::INTERNAL_TEMPERATURE).unwrap();
        assert_eq!(decode_one(reg, &[0xffce], None), Value::Float(-5.0));
    }

    #[test]
    fn test_decode_string() {
        let reg = REGISTERS.lookup(names::MODEL_NAME).unwrap();
        let mut words = vec![0x5355, 0x4e32, 0x3030, 0x304b, 0x544c];
        words.resize(15, 0);
        assert_eq!(
            decode_one(reg, &words, None),
            Value::Str("SUN2000KTL".to_string())
        );
    }

    #[test]
    fn test_decode_bitfield() {
        let reg = REGISTERS.lookup(names::STATE_1).unwrap();
        assert_eq!(
            decode_one(reg, &[0x0003], None),
            Value::Flags(vec!["standby", "grid_connected"])
        );
        assert_eq!(decode_one(reg, &[0x0000], None), Value::Flags(vec![]));
    }

    #[test]
    fn test_decode_enum() {
        let reg = REGISTERS.lookup(names::DEVICE_STATUS).unwrap();
        assert_eq!(
            decode_one(reg, &[0x0200], None),
            Value::Enum(EnumValue {
                raw: 0x0200,
                label: Some("On-grid"),
            })
        );

        // firmware newer than the table
        let value = decode_one(reg, &[0x4242], None);
        assert_eq!(value.enum_raw(), Some(0x4242));
        assert_eq!(
            value,
            Value::Enum(EnumValue {
                raw: 0x4242,
                label: None,
            })
        );
    }

    #[test]
    fn test_decode_timestamp() {
        let reg = REGISTERS.lookup(names::STARTUP_TIME).unwrap();

        // 2020-09-13T12:26:40Z as seen by an inverter at UTC+2
        let local = 1_600_000_000u32 + 7200;
        let words = [(local >> 16) as u16, local as u16];
        match decode_one(reg, &words, Some(120)) {
            Value::Timestamp(ts) => {
                assert_eq!(ts.timestamp(), 1_600_000_000);
                assert_eq!(ts.offset().local_minus_utc(), 7200);
            }
            other => panic!("expected timestamp, got {:?}", other),
        }

        // sentinel
        assert_eq!(decode_one(reg, &[0xffff, 0xffff], Some(120)), Value::None);
    }

    #[test]
    fn test_dynamic_unit_is_hidden() {
        const CODES: &[(u64, &str)] = &[(0, "kWh"), (1, "kvarh")];
        let mut reg = def("meter_accumulated", 40010, 1, RegisterKind::U16);
        reg.unit = Unit::PerValue(CODES);
        assert_eq!(reg.unit.exposed(), None);
        assert_eq!(Unit::Dynamic.exposed(), None);
        assert_eq!(Unit::Const("V").exposed(), Some("V"));
    }

    #[test]
    fn test_encode_roundtrip() {
        let reg = REGISTERS.lookup(names::TIME_ZONE).unwrap();
        let words = [0xffc4u16]; // -60 min
        let value = decode_one(reg, &words, None);
        assert_eq!(value, Value::I16(-60));
        assert_eq!(reg.encode(&value).unwrap(), words);

        let reg = REGISTERS.lookup(names::HEARTBEAT).unwrap();
        assert_eq!(reg.encode(&Value::U16(1)).unwrap(), [0x0001]);
    }

    #[test]
    fn test_encode_scaled() {
        // scaled register encodes by multiplying back
        let reg = def("cooling_setpoint", 42000, 1, RegisterKind::U16)
            .scale(10)
            .access(AccessLevel::Write);
        assert_eq!(reg.encode(&Value::Float(23.5)).unwrap(), [235]);

        // value that doesn't land on a scale step must be refused
        assert!(matches!(
            reg.encode(&Value::Float(23.55)),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_encode_out_of_range() {
        let reg = REGISTERS.lookup(names::HEARTBEAT).unwrap();
        assert!(matches!(
            reg.encode(&Value::U32(70_000)),
            Err(Error::InvalidValue { .. })
        ));
        assert!(matches!(
            reg.encode(&Value::I16(-1)),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    #[should_panic]
    fn test_catalog_rejects_overlapping_writes() {
        Catalog::new(vec![
            def("a", 100, 2, RegisterKind::U32).access(AccessLevel::Write),
            def("b", 101, 1, RegisterKind::U16).access(AccessLevel::Write),
        ]);
    }

    #[test]
    #[should_panic]
    fn test_catalog_rejects_address_overflow() {
        Catalog::new(vec![def("a", 0xffff, 2, RegisterKind::U32)]);
    }

    #[test]
    fn test_read_alias_is_allowed() {
        // read-only registers may alias each other
        let catalog = Catalog::new(vec![
            def("whole", 100, 2, RegisterKind::U32),
            def("half", 101, 1, RegisterKind::U16),
        ]);
        assert_eq!(catalog.len(), 2);
    }
}
