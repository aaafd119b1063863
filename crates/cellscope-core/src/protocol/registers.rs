//! Register semantics
//!
//! Static map from register id to name, physical kind, and scale, plus the
//! reversible conversions between raw register words and physical values.
//!
//! All conversions round-trip exactly except temperature, which the device
//! stores in tenths of a kelvin: encoding rounds to the nearest 0.1 degree,
//! so `decode(encode(x))` is within 0.05 degrees of `x`.

use serde::{Deserialize, Serialize};

/// EEPROM gate open (write-only control register)
pub const REG_EEPROM_OPEN: u8 = 0x00;
/// EEPROM gate close/commit (write-only control register)
pub const REG_EEPROM_CLOSE: u8 = 0x01;
/// Hardware info block (telemetry snapshot source)
pub const REG_HARDWARE_INFO: u8 = 0x03;
/// Per-cell voltage block
pub const REG_CELL_VOLTAGES: u8 = 0x04;
/// Hardware version string
pub const REG_HARDWARE_VERSION: u8 = 0x05;
/// MOSFET control (2-byte payload, byte1 bit0 = charge off, bit1 = discharge off)
pub const REG_MOSFET_CONTROL: u8 = 0xE1;

/// Magic payload that opens the EEPROM gate
pub const EEPROM_OPEN_PAYLOAD: [u8; 2] = [0x56, 0x78];
/// Payload that closes/commits the EEPROM gate
pub const EEPROM_CLOSE_PAYLOAD: [u8; 2] = [0x00, 0x00];

/// Physical interpretation of a register's raw value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterKind {
    /// Pack voltage, raw × 1/100 V
    Voltage,
    /// Single-cell voltage, raw × 1/1000 V
    CellVoltage,
    /// Pack current, signed 16-bit raw × 1/100 A
    Current,
    /// Charge capacity, raw × 1/100 Ah
    Capacity,
    /// Temperature, (raw − 2731) / 10 °C
    Temperature,
    /// Resistance, raw milliohms
    Resistance,
    /// Time span, raw seconds
    Duration,
    /// Percentage, raw percent
    Percent,
    /// Packed calendar date
    Date,
    /// Uninterpreted 16-bit word (counters, bitmasks, ids)
    Raw,
    /// Raw bytes, length given by the frame LEN field
    Text,
}

/// A calendar date packed into one register word:
/// bits 15..9 = year − 2000, bits 8..5 = month, bits 4..0 = day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedDate {
    /// Full year (2000-based on the wire)
    pub year: u16,
    /// Month 1–12
    pub month: u8,
    /// Day 1–31
    pub day: u8,
}

impl PackedDate {
    /// Unpack from the raw register word
    pub fn from_raw(raw: u16) -> Self {
        Self {
            year: 2000 + (raw >> 9),
            month: ((raw >> 5) & 0x0F) as u8,
            day: (raw & 0x1F) as u8,
        }
    }

    /// Pack back into the raw register word
    pub fn to_raw(&self) -> u16 {
        (self.year.saturating_sub(2000) << 9)
            | ((self.month as u16 & 0x0F) << 5)
            | (self.day as u16 & 0x1F)
    }
}

impl std::fmt::Display for PackedDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// A physical value decoded from (or encodable into) a register word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalValue {
    /// Volts
    Voltage(f64),
    /// Volts (single cell)
    CellVoltage(f64),
    /// Amperes, negative while discharging
    Current(f64),
    /// Amp-hours
    Capacity(f64),
    /// Degrees Celsius
    Temperature(f64),
    /// Milliohms
    Resistance(u16),
    /// Seconds
    Duration(u16),
    /// Percent
    Percent(u16),
    /// Calendar date
    Date(PackedDate),
    /// Uninterpreted word
    Raw(u16),
}

impl PhysicalValue {
    /// Decode a raw register word under the given kind.
    ///
    /// `Text` registers are not word-valued; use [`decode_text`] on the
    /// frame payload instead.
    pub fn decode(kind: RegisterKind, raw: u16) -> Option<Self> {
        Some(match kind {
            RegisterKind::Voltage => PhysicalValue::Voltage(raw as f64 / 100.0),
            RegisterKind::CellVoltage => PhysicalValue::CellVoltage(raw as f64 / 1000.0),
            RegisterKind::Current => PhysicalValue::Current(raw as i16 as f64 / 100.0),
            RegisterKind::Capacity => PhysicalValue::Capacity(raw as f64 / 100.0),
            RegisterKind::Temperature => {
                PhysicalValue::Temperature((raw as f64 - 2731.0) / 10.0)
            }
            RegisterKind::Resistance => PhysicalValue::Resistance(raw),
            RegisterKind::Duration => PhysicalValue::Duration(raw),
            RegisterKind::Percent => PhysicalValue::Percent(raw),
            RegisterKind::Date => PhysicalValue::Date(PackedDate::from_raw(raw)),
            RegisterKind::Raw => PhysicalValue::Raw(raw),
            RegisterKind::Text => return None,
        })
    }

    /// Encode back into the raw register word.
    ///
    /// Exact inverse of [`PhysicalValue::decode`] for every kind except
    /// `Temperature`, which rounds to the device's 0.1-degree resolution.
    pub fn encode(&self) -> u16 {
        match self {
            PhysicalValue::Voltage(v) => (v * 100.0).round() as u16,
            PhysicalValue::CellVoltage(v) => (v * 1000.0).round() as u16,
            PhysicalValue::Current(a) => ((a * 100.0).round() as i16) as u16,
            PhysicalValue::Capacity(ah) => (ah * 100.0).round() as u16,
            PhysicalValue::Temperature(c) => ((c * 10.0).round() + 2731.0) as u16,
            PhysicalValue::Resistance(r) => *r,
            PhysicalValue::Duration(s) => *s,
            PhysicalValue::Percent(p) => *p,
            PhysicalValue::Date(d) => d.to_raw(),
            PhysicalValue::Raw(w) => *w,
        }
    }
}

/// Encode a temperature in °C into the raw register word
pub fn encode_temperature(celsius: f64) -> u16 {
    ((celsius * 10.0).round() + 2731.0) as u16
}

/// Decode a raw register word into a temperature in °C
pub fn decode_temperature(raw: u16) -> f64 {
    (raw as f64 - 2731.0) / 10.0
}

/// Decode a text register payload. The frame LEN field bounds the bytes;
/// there is no internal length prefix.
pub fn decode_text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).trim_end_matches('\0').to_string()
}

/// A register descriptor in the static semantics table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    /// Register id on the wire
    pub id: u8,
    /// Stable lowercase name
    pub name: &'static str,
    /// Physical interpretation
    pub kind: RegisterKind,
}

impl Register {
    /// Look up a register descriptor by id
    pub fn lookup(id: u8) -> Option<&'static Register> {
        REGISTER_TABLE.iter().find(|r| r.id == id)
    }
}

macro_rules! reg {
    ($id:expr, $name:expr, $kind:ident) => {
        Register {
            id: $id,
            name: $name,
            kind: RegisterKind::$kind,
        }
    };
}

/// The full register semantics table: commands, configuration parameters,
/// and text registers.
pub static REGISTER_TABLE: &[Register] = &[
    reg!(REG_EEPROM_OPEN, "eeprom_open", Raw),
    reg!(REG_EEPROM_CLOSE, "eeprom_close", Raw),
    reg!(REG_HARDWARE_INFO, "hardware_info", Raw),
    reg!(REG_CELL_VOLTAGES, "cell_voltages", Raw),
    reg!(REG_HARDWARE_VERSION, "hardware_version", Text),
    reg!(0x10, "design_capacity", Capacity),
    reg!(0x11, "cycle_capacity", Capacity),
    reg!(0x12, "cell_100_voltage", CellVoltage),
    reg!(0x15, "manufacture_date", Date),
    reg!(0x16, "serial_number", Raw),
    reg!(0x17, "cycle_count", Raw),
    reg!(0x18, "charge_over_temp", Temperature),
    reg!(0x19, "charge_over_temp_release", Temperature),
    reg!(0x1A, "charge_under_temp", Temperature),
    reg!(0x1B, "charge_under_temp_release", Temperature),
    reg!(0x1C, "discharge_over_temp", Temperature),
    reg!(0x1D, "discharge_over_temp_release", Temperature),
    reg!(0x1E, "discharge_under_temp", Temperature),
    reg!(0x1F, "discharge_under_temp_release", Temperature),
    reg!(0x20, "pack_over_voltage", Voltage),
    reg!(0x21, "pack_over_voltage_release", Voltage),
    reg!(0x22, "pack_under_voltage", Voltage),
    reg!(0x23, "pack_under_voltage_release", Voltage),
    reg!(0x24, "cell_over_voltage", CellVoltage),
    reg!(0x25, "cell_over_voltage_release", CellVoltage),
    reg!(0x26, "cell_under_voltage", CellVoltage),
    reg!(0x27, "cell_under_voltage_release", CellVoltage),
    reg!(0x28, "charge_overcurrent", Current),
    reg!(0x29, "discharge_overcurrent", Current),
    reg!(0x2A, "balance_start_voltage", CellVoltage),
    reg!(0x2B, "balance_window", CellVoltage),
    reg!(0x2C, "sense_resistance", Resistance),
    reg!(0x2D, "function_config", Raw),
    reg!(0x2E, "ntc_config", Raw),
    reg!(0x2F, "cell_count", Raw),
    reg!(0x30, "fet_control", Raw),
    reg!(0x31, "led_timer", Duration),
    reg!(0x32, "cell_80_voltage", CellVoltage),
    reg!(0x33, "cell_60_voltage", CellVoltage),
    reg!(0x34, "cell_40_voltage", CellVoltage),
    reg!(0x35, "cell_20_voltage", CellVoltage),
    reg!(0x36, "secondary_cell_over_voltage", CellVoltage),
    reg!(0x37, "secondary_cell_under_voltage", CellVoltage),
    reg!(0x38, "short_circuit_config", Raw),
    reg!(0x39, "secondary_release_config", Raw),
    reg!(0x3A, "charge_temp_delays", Raw),
    reg!(0x3B, "discharge_temp_delays", Raw),
    reg!(0x3C, "pack_voltage_delays", Raw),
    reg!(0x3D, "cell_voltage_delays", Raw),
    reg!(0x3E, "charge_overcurrent_delays", Raw),
    reg!(0x3F, "discharge_overcurrent_delays", Raw),
    reg!(0x40, "standby_voltage", Voltage),
    reg!(0x41, "standby_time", Duration),
    reg!(REG_MOSFET_CONTROL, "mosfet_control", Raw),
    reg!(0xA0, "manufacturer_name", Text),
    reg!(0xA1, "device_name", Text),
    reg!(0xA2, "barcode", Text),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_id() {
        let reg = Register::lookup(0x20).expect("known register");
        assert_eq!(reg.name, "pack_over_voltage");
        assert_eq!(reg.kind, RegisterKind::Voltage);
        assert!(Register::lookup(0x0F).is_none());
    }

    #[test]
    fn test_table_ids_unique() {
        let mut ids: Vec<u8> = REGISTER_TABLE.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), REGISTER_TABLE.len());
    }

    #[test]
    fn test_voltage_and_current_scaling() {
        assert_eq!(
            PhysicalValue::decode(RegisterKind::Voltage, 2500),
            Some(PhysicalValue::Voltage(25.00))
        );
        assert_eq!(
            PhysicalValue::decode(RegisterKind::Current, 0xFF38),
            Some(PhysicalValue::Current(-2.00))
        );
    }

    #[test]
    fn test_word_kinds_roundtrip_exactly() {
        let kinds = [
            RegisterKind::Voltage,
            RegisterKind::CellVoltage,
            RegisterKind::Current,
            RegisterKind::Capacity,
            RegisterKind::Resistance,
            RegisterKind::Duration,
            RegisterKind::Percent,
            RegisterKind::Date,
            RegisterKind::Raw,
        ];
        for kind in kinds {
            for raw in [0u16, 1, 0x0D48, 0x7FFF, 0x8000, 0xFF38, 0xFFFF] {
                let value = PhysicalValue::decode(kind, raw).expect("word kind");
                assert_eq!(value.encode(), raw, "{kind:?} raw={raw:#06x}");
            }
        }
    }

    #[test]
    fn test_temperature_roundtrip_within_tolerance() {
        for celsius in [-40.0, -0.1, 0.0, 25.37, 60.04, 99.9] {
            let decoded = decode_temperature(encode_temperature(celsius));
            assert!(
                (decoded - celsius).abs() <= 0.05,
                "celsius={celsius} decoded={decoded}"
            );
        }
        // Raw-side roundtrip is exact
        for raw in [2331u16, 2731, 2986, 3400] {
            assert_eq!(encode_temperature(decode_temperature(raw)), raw);
        }
    }

    #[test]
    fn test_packed_date() {
        let date = PackedDate::from_raw((24 << 9) | (7 << 5) | 15);
        assert_eq!(
            date,
            PackedDate {
                year: 2024,
                month: 7,
                day: 15
            }
        );
        assert_eq!(date.to_raw(), (24 << 9) | (7 << 5) | 15);
        assert_eq!(date.to_string(), "2024-07-15");
    }

    #[test]
    fn test_decode_text_strips_padding() {
        assert_eq!(decode_text(b"SP04S020-L4S\0\0"), "SP04S020-L4S");
    }
}
