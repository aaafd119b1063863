//! Device configuration
//!
//! The full set of readable/writable pack parameters, captured atomically
//! by one bracketed multi-register read. A snapshot is a plain value:
//! after any parameter write it is stale and the caller re-reads; there is
//! no partial patching of an existing snapshot.

use serde::{Deserialize, Serialize};

use crate::protocol::registers::PackedDate;

/// One atomically-read configuration snapshot, all values in physical units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Design capacity in amp-hours
    pub design_capacity: f64,
    /// Cycle capacity in amp-hours
    pub cycle_capacity: f64,
    /// Cell voltage considered 100 % charged, in volts
    pub cell_100_voltage: f64,
    /// Pack manufacture date
    pub manufacture_date: PackedDate,
    /// Factory serial number word
    pub serial_number: u16,
    /// Stored cycle count
    pub cycle_count: u16,

    /// Charge over-temperature cutoff, °C
    pub charge_over_temp: f64,
    /// Charge over-temperature release, °C
    pub charge_over_temp_release: f64,
    /// Charge under-temperature cutoff, °C
    pub charge_under_temp: f64,
    /// Charge under-temperature release, °C
    pub charge_under_temp_release: f64,
    /// Discharge over-temperature cutoff, °C
    pub discharge_over_temp: f64,
    /// Discharge over-temperature release, °C
    pub discharge_over_temp_release: f64,
    /// Discharge under-temperature cutoff, °C
    pub discharge_under_temp: f64,
    /// Discharge under-temperature release, °C
    pub discharge_under_temp_release: f64,

    /// Pack over-voltage cutoff, V
    pub pack_over_voltage: f64,
    /// Pack over-voltage release, V
    pub pack_over_voltage_release: f64,
    /// Pack under-voltage cutoff, V
    pub pack_under_voltage: f64,
    /// Pack under-voltage release, V
    pub pack_under_voltage_release: f64,
    /// Cell over-voltage cutoff, V
    pub cell_over_voltage: f64,
    /// Cell over-voltage release, V
    pub cell_over_voltage_release: f64,
    /// Cell under-voltage cutoff, V
    pub cell_under_voltage: f64,
    /// Cell under-voltage release, V
    pub cell_under_voltage_release: f64,

    /// Charge overcurrent cutoff, A
    pub charge_overcurrent: f64,
    /// Discharge overcurrent cutoff, A (negative, discharge convention)
    pub discharge_overcurrent: f64,

    /// Cell voltage at which balancing starts, V
    pub balance_start_voltage: f64,
    /// Cell delta that keeps balancing active, V
    pub balance_window: f64,

    /// Current-sense shunt resistance, milliohms
    pub sense_resistance: u16,
    /// Function configuration bitmask (switch, balance mode, LED, ...)
    pub function_config: u16,
    /// Temperature sensor population bitmask
    pub ntc_config: u16,
    /// Number of cells in series
    pub cell_count: u16,
    /// FET configuration word
    pub fet_control: u16,
    /// Front-panel LED timer, seconds
    pub led_timer: u16,

    /// Cell voltage considered 80 % charged, V
    pub cell_80_voltage: f64,
    /// Cell voltage considered 60 % charged, V
    pub cell_60_voltage: f64,
    /// Cell voltage considered 40 % charged, V
    pub cell_40_voltage: f64,
    /// Cell voltage considered 20 % charged, V
    pub cell_20_voltage: f64,

    /// Manufacturer name text register
    pub manufacturer_name: String,
    /// Device name text register
    pub device_name: String,
    /// Barcode text register
    pub barcode: String,
}
