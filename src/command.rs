//! Command set understood by the wattmeter.
//!
//! Each command is a fixed payload template wrapped by
//! [`build_frame`](crate::protocol::build_frame) before it is written.
//!
//! | Command              | Payload                                         | Reply |
//! |----------------------|-------------------------------------------------|-------|
//! | `SetClock`           | `01 sec min hour day month-1 year-1900 weekday` | none  |
//! | `PowerOn`            | `A7 01`                                         | none  |
//! | `PowerOff`           | `A7 00`                                         | none  |
//! | `RequestMeasurement` | `08`                                            | one energy-usage frame |

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::protocol::build_frame;

/// Payload identifier of the clock-setting command.
pub const CMD_SET_CLOCK: u8 = 0x01;

/// Payload identifier of the relay command.
pub const CMD_RELAY: u8 = 0xA7;

/// Payload identifier of the measurement request and its reply.
pub const CMD_ENERGY_USAGE: u8 = 0x08;

/// A command sent to the wattmeter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Set the device RTC. The protocol carries whole seconds only, so the
    /// caller should sample the wall clock right after a second boundary.
    SetClock(NaiveDateTime),
    /// Close the relay (outlet on).
    PowerOn,
    /// Open the relay (outlet off).
    PowerOff,
    /// Ask for one energy-usage reading.
    RequestMeasurement,
}

impl Command {
    /// Unframed payload bytes.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Command::SetClock(at) => vec![
                CMD_SET_CLOCK,
                at.second() as u8,
                at.minute() as u8,
                at.hour() as u8,
                at.day() as u8,
                at.month0() as u8,
                (at.year() - 1900) as u8,
                at.weekday().num_days_from_monday() as u8,
            ],
            Command::PowerOn => vec![CMD_RELAY, 0x01],
            Command::PowerOff => vec![CMD_RELAY, 0x00],
            Command::RequestMeasurement => vec![CMD_ENERGY_USAGE],
        }
    }

    /// Complete wire frame for this command.
    pub fn encode(&self) -> Vec<u8> {
        build_frame(&self.payload())
    }

    /// Whether the device answers this command with a frame.
    pub fn expects_response(&self) -> bool {
        matches!(self, Command::RequestMeasurement)
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetClock(_) => "set_clock",
            Command::PowerOn => "power_on",
            Command::PowerOff => "power_off",
            Command::RequestMeasurement => "request_measurement",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_fixed_payloads() {
        assert_eq!(Command::PowerOn.payload(), [0xA7, 0x01]);
        assert_eq!(Command::PowerOff.payload(), [0xA7, 0x00]);
        assert_eq!(Command::RequestMeasurement.payload(), [0x08]);
    }

    #[test]
    fn test_encoded_frames() {
        assert_eq!(Command::PowerOn.encode(), [0xAA, 0x00, 0x02, 0xA7, 0x01, 0x59]);
        assert_eq!(Command::PowerOff.encode(), [0xAA, 0x00, 0x02, 0xA7, 0x00, 0xDC]);
        assert_eq!(
            Command::RequestMeasurement.encode(),
            [0xAA, 0x00, 0x01, 0x08, 0xB3]
        );
    }

    #[test]
    fn test_set_clock_payload() {
        // Friday 2024-03-15 12:34:56
        let cmd = Command::SetClock(at(2024, 3, 15, 12, 34, 56));
        assert_eq!(cmd.payload(), [0x01, 56, 34, 12, 15, 2, 124, 4]);
        assert_eq!(
            cmd.encode(),
            [0xAA, 0x00, 0x08, 0x01, 56, 34, 12, 15, 2, 124, 4, 0x76]
        );
    }

    #[test]
    fn test_set_clock_weekday_monday_is_zero() {
        // 2024-01-01 was a Monday, 2023-12-31 a Sunday.
        let monday = Command::SetClock(at(2024, 1, 1, 0, 0, 0)).payload();
        let sunday = Command::SetClock(at(2023, 12, 31, 23, 59, 59)).payload();

        assert_eq!(monday[7], 0);
        assert_eq!(monday[5], 0);
        assert_eq!(sunday[7], 6);
        assert_eq!(sunday[5], 11);
        assert_eq!(sunday[6], 123);
    }

    #[test]
    fn test_expects_response() {
        assert!(Command::RequestMeasurement.expects_response());
        assert!(!Command::PowerOn.expects_response());
        assert!(!Command::PowerOff.expects_response());
        assert!(!Command::SetClock(at(2024, 1, 1, 0, 0, 0)).expects_response());
    }
}
