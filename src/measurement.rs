//! Energy-usage response decoding.
//!
//! The reply to [`Command::RequestMeasurement`](crate::Command::RequestMeasurement)
//! carries three little-endian 48-bit fixed-point quantities followed by the
//! device RTC. Offsets below are from the start of the full frame (header
//! byte at offset 0):
//!
//! ```text
//! [3]       kind = 0x08
//! [5..11]   voltage  / 16^6        -> V
//! [11..17]  current  / 32^6 * 1000 -> mA
//! [17..23]  wattage  / 16^6        -> W
//! [23..29]  second, minute, hour, day, month-1, year-1900
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::command::CMD_ENERGY_USAGE;
use crate::error::{Result, WattchError};
use crate::protocol::{Frame, PREFIX_SIZE, TRAILER_SIZE};

/// Fixed-point divisor for voltage and wattage (2^24).
pub const VOLTAGE_SCALE: f64 = 16_777_216.0;

/// Fixed-point divisor for current (2^30).
pub const CURRENT_SCALE: f64 = 1_073_741_824.0;

/// Same divisor as voltage.
pub const WATTAGE_SCALE: f64 = VOLTAGE_SCALE;

const VOLTAGE_OFFSET: usize = 5;
const CURRENT_OFFSET: usize = 11;
const WATTAGE_OFFSET: usize = 17;
const CLOCK_OFFSET: usize = 23;

/// Minimum frame length holding every energy-usage field plus the trailer.
pub const ENERGY_USAGE_MIN_FRAME: usize = CLOCK_OFFSET + 6 + TRAILER_SIZE;

/// Minimum payload length of an energy-usage frame.
pub const ENERGY_USAGE_MIN_PAYLOAD: usize = ENERGY_USAGE_MIN_FRAME - PREFIX_SIZE - TRAILER_SIZE;

/// One decoded reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    /// Device RTC at the time of the reading.
    pub timestamp: NaiveDateTime,
    /// Volts.
    pub voltage: f64,
    /// Milliamps.
    pub current: f64,
    /// Watts.
    pub wattage: f64,
}

impl Measurement {
    /// Create a measurement from engineering-unit values.
    pub fn new(timestamp: NaiveDateTime, voltage: f64, current: f64, wattage: f64) -> Self {
        Self {
            timestamp,
            voltage,
            current,
            wattage,
        }
    }
}

/// A decoded device response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Response {
    /// Reply to a measurement request.
    EnergyUsage(Measurement),
    /// A response kind this crate does not interpret yet (`None` for an
    /// empty payload).
    Unrecognized(Option<u8>),
}

impl Response {
    /// Decode a validated frame.
    ///
    /// Unknown kinds are not an error. Energy-usage frames that are too short
    /// or carry an impossible date are.
    pub fn decode(frame: &Frame) -> Result<Self> {
        match frame.kind() {
            Some(CMD_ENERGY_USAGE) => {
                decode_energy_usage(frame.as_bytes()).map(Response::EnergyUsage)
            }
            other => Ok(Response::Unrecognized(other)),
        }
    }
}

/// Decode the fields of an energy-usage frame given its full raw bytes.
fn decode_energy_usage(raw: &[u8]) -> Result<Measurement> {
    if raw.len() < ENERGY_USAGE_MIN_FRAME {
        return Err(WattchError::Truncated {
            needed: ENERGY_USAGE_MIN_FRAME,
            got: raw.len(),
        });
    }

    let voltage = read_u48_le(&raw[VOLTAGE_OFFSET..]) as f64 / VOLTAGE_SCALE;
    let current = read_u48_le(&raw[CURRENT_OFFSET..]) as f64 / CURRENT_SCALE * 1000.0;
    let wattage = read_u48_le(&raw[WATTAGE_OFFSET..]) as f64 / WATTAGE_SCALE;

    // Calendar fields are stored least significant first.
    let clock = &raw[CLOCK_OFFSET..CLOCK_OFFSET + 6];
    let (second, minute, hour, day, month0, year) =
        (clock[0], clock[1], clock[2], clock[3], clock[4], clock[5]);

    let timestamp = NaiveDate::from_ymd_opt(
        1900 + i32::from(year),
        u32::from(month0) + 1,
        u32::from(day),
    )
    .and_then(|date| date.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second)))
    .ok_or(WattchError::InvalidTimestamp)?;

    Ok(Measurement {
        timestamp,
        voltage,
        current,
        wattage,
    })
}

/// Read a little-endian 48-bit unsigned integer from the first 6 bytes.
#[inline]
fn read_u48_le(buf: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[..6].copy_from_slice(&buf[..6]);
    u64::from_le_bytes(bytes)
}
