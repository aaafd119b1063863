//! Decoded telemetry
//!
//! Value types decoded from the hardware-info and cell-voltage response
//! payloads. Every read produces a fresh snapshot; nothing here is updated
//! in place.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use crate::protocol::error::{FramingError, ProtocolError};
use crate::protocol::registers::{decode_temperature, PackedDate};

/// Fixed part of the hardware-info payload before the per-sensor tail
const HARDWARE_INFO_FIXED_LEN: usize = 23;

/// Protection status bits, decoded into named flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionFlags {
    /// A cell exceeded its over-voltage threshold
    pub cell_over_voltage: bool,
    /// A cell fell below its under-voltage threshold
    pub cell_under_voltage: bool,
    /// Pack over-voltage
    pub pack_over_voltage: bool,
    /// Pack under-voltage
    pub pack_under_voltage: bool,
    /// Over-temperature while charging
    pub charge_over_temp: bool,
    /// Under-temperature while charging
    pub charge_under_temp: bool,
    /// Over-temperature while discharging
    pub discharge_over_temp: bool,
    /// Under-temperature while discharging
    pub discharge_under_temp: bool,
    /// Charge overcurrent
    pub charge_overcurrent: bool,
    /// Discharge overcurrent
    pub discharge_overcurrent: bool,
    /// Short circuit detected
    pub short_circuit: bool,
    /// Analog front-end IC fault
    pub frontend_error: bool,
    /// FETs locked out by software configuration
    pub fet_lock: bool,
}

macro_rules! read_bit {
    ($word:expr, $position:expr) => {
        ($word >> $position) & 1 != 0
    };
}

impl ProtectionFlags {
    /// Decode the protection bitmask
    pub fn from_bits(bits: u16) -> Self {
        Self {
            cell_over_voltage: read_bit!(bits, 0),
            cell_under_voltage: read_bit!(bits, 1),
            pack_over_voltage: read_bit!(bits, 2),
            pack_under_voltage: read_bit!(bits, 3),
            charge_over_temp: read_bit!(bits, 4),
            charge_under_temp: read_bit!(bits, 5),
            discharge_over_temp: read_bit!(bits, 6),
            discharge_under_temp: read_bit!(bits, 7),
            charge_overcurrent: read_bit!(bits, 8),
            discharge_overcurrent: read_bit!(bits, 9),
            short_circuit: read_bit!(bits, 10),
            frontend_error: read_bit!(bits, 11),
            fet_lock: read_bit!(bits, 12),
        }
    }

    /// True if any protection is currently tripped
    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

/// One decoded hardware-info snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Pack voltage in volts
    pub pack_voltage: f64,
    /// Pack current in amperes; negative while discharging
    pub current: f64,
    /// Remaining capacity in amp-hours
    pub remaining_capacity: f64,
    /// Design (nominal) capacity in amp-hours
    pub nominal_capacity: f64,
    /// Completed charge/discharge cycles
    pub cycle_count: u16,
    /// Pack manufacture date
    pub manufacture_date: PackedDate,
    /// Balance state for cells 1–16, one bit per cell
    pub balance_low: u16,
    /// Balance state for cells 17–32
    pub balance_high: u16,
    /// Raw protection bitmask as reported
    pub protection_bits: u16,
    /// Decoded protection flags
    pub protection: ProtectionFlags,
    /// Firmware version byte
    pub firmware_version: u8,
    /// Relative state of charge, percent
    pub rsoc: u8,
    /// Raw FET status bits (bit0 = charge FET on, bit1 = discharge FET on)
    pub fet_bits: u8,
    /// Charge FET currently enabled
    pub charging_enabled: bool,
    /// Discharge FET currently enabled
    pub discharging_enabled: bool,
    /// Number of cells in series
    pub cell_count: u8,
    /// Number of temperature sensors
    pub ntc_count: u8,
    /// Sensor temperatures in °C, one per sensor
    pub temperatures: Vec<f64>,
}

impl TelemetrySnapshot {
    /// Decode a hardware-info response payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < HARDWARE_INFO_FIXED_LEN {
            return Err(FramingError::TooShort(payload.len()).into());
        }

        let ntc_count = payload[22];
        let expected = HARDWARE_INFO_FIXED_LEN + 2 * ntc_count as usize;
        if payload.len() < expected {
            return Err(FramingError::LengthMismatch {
                declared: expected,
                available: payload.len(),
            }
            .into());
        }

        let protection_bits = BigEndian::read_u16(&payload[16..18]);
        let fet_bits = payload[20];

        let temperatures = (0..ntc_count as usize)
            .map(|i| {
                let raw = BigEndian::read_u16(&payload[23 + 2 * i..25 + 2 * i]);
                decode_temperature(raw)
            })
            .collect();

        Ok(Self {
            pack_voltage: BigEndian::read_u16(&payload[0..2]) as f64 / 100.0,
            current: BigEndian::read_i16(&payload[2..4]) as f64 / 100.0,
            remaining_capacity: BigEndian::read_u16(&payload[4..6]) as f64 / 100.0,
            nominal_capacity: BigEndian::read_u16(&payload[6..8]) as f64 / 100.0,
            cycle_count: BigEndian::read_u16(&payload[8..10]),
            manufacture_date: PackedDate::from_raw(BigEndian::read_u16(&payload[10..12])),
            balance_low: BigEndian::read_u16(&payload[12..14]),
            balance_high: BigEndian::read_u16(&payload[14..16]),
            protection_bits,
            protection: ProtectionFlags::from_bits(protection_bits),
            firmware_version: payload[18],
            rsoc: payload[19],
            fet_bits,
            charging_enabled: fet_bits & 0x01 != 0,
            discharging_enabled: fet_bits & 0x02 != 0,
            cell_count: payload[21],
            ntc_count,
            temperatures,
        })
    }
}

/// Per-cell voltages decoded from a cell-info response payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellVoltages {
    /// Cell voltages in volts, in cell order
    pub cells: Vec<f64>,
}

impl CellVoltages {
    /// Decode a cell-info response payload (two bytes per cell, millivolts)
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() % 2 != 0 {
            return Err(FramingError::LengthMismatch {
                declared: payload.len() + 1,
                available: payload.len(),
            }
            .into());
        }

        let cells = payload
            .chunks_exact(2)
            .map(|pair| BigEndian::read_u16(pair) as f64 / 1000.0)
            .collect();
        Ok(Self { cells })
    }

    /// Lowest cell voltage, if any cells were reported
    pub fn min(&self) -> Option<f64> {
        self.cells.iter().copied().reduce(f64::min)
    }

    /// Highest cell voltage, if any cells were reported
    pub fn max(&self) -> Option<f64> {
        self.cells.iter().copied().reduce(f64::max)
    }

    /// Spread between the highest and lowest cell
    pub fn delta(&self) -> Option<f64> {
        match (self.min(), self.max()) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}
