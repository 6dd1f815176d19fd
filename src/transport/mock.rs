//! In-memory wattmeter for tests and demos.
//!
//! [`MockConnector`] hands out [`MockTransport`]s bound to one shared
//! [`MockDevice`]. The device parses incoming frames with the same
//! [`FrameBuffer`] the host uses, keeps a relay flag and an RTC, and answers
//! each measurement request with an energy-usage frame split into
//! `fragment_size`-byte notifications, the way a BLE link with a small MTU
//! delivers it.
//!
//! # Example
//!
//! ```
//! use btwattch2::transport::mock::{MockConfig, MockConnector};
//!
//! let connector = MockConnector::new("AA:BB:CC:DD:EE:FF", MockConfig::default());
//! let device = connector.device();
//! assert!(!device.relay_on());
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use tokio::sync::mpsc;

use super::{BoxFuture, Connector, Transport};
use crate::command::{CMD_ENERGY_USAGE, CMD_RELAY, CMD_SET_CLOCK};
use crate::error::{Result, WattchError};
use crate::measurement::{Measurement, CURRENT_SCALE, VOLTAGE_SCALE, WATTAGE_SCALE};
use crate::protocol::{build_frame, FeedResult, FrameBuffer};

/// Notification payload size of a default-MTU BLE link (23 - 3).
pub const DEFAULT_FRAGMENT_SIZE: usize = 20;

/// Notification channel depth.
const NOTIFY_CHANNEL_CAPACITY: usize = 64;

/// Behaviour of the simulated device.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// String returned by `read_model_number`.
    pub model_number: String,
    /// Maximum bytes per notification.
    pub fragment_size: usize,
    /// Reported volts.
    pub voltage: f64,
    /// Reported milliamps.
    pub current: f64,
    /// Reported watts.
    pub wattage: f64,
    /// Initial RTC value.
    pub clock: NaiveDateTime,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            model_number: "RS-BTWATTCH2".to_string(),
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            voltage: 100.5,
            current: 250.0,
            wattage: 25.125,
            clock: NaiveDate::from_ymd_opt(2024, 3, 15)
                .and_then(|d| d.and_hms_opt(12, 0, 0))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug)]
struct DeviceState {
    config: MockConfig,
    relay_on: bool,
    clock: NaiveDateTime,
    connected: bool,
    disconnects: usize,
    written: Vec<Vec<u8>>,
    measurement_requests: usize,
    swallow_replies: usize,
    corrupt_replies: usize,
    notify_tx: Option<mpsc::Sender<Bytes>>,
}

/// Shared handle to the simulated device, for inspection and fault injection.
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    fn new(config: MockConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                clock: config.clock,
                config,
                relay_on: false,
                connected: false,
                disconnects: 0,
                written: Vec::new(),
                measurement_requests: 0,
                swallow_replies: 0,
                corrupt_replies: 0,
                notify_tx: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the relay is closed.
    pub fn relay_on(&self) -> bool {
        self.lock().relay_on
    }

    /// Current RTC value.
    pub fn clock(&self) -> NaiveDateTime {
        self.lock().clock
    }

    /// Whether a transport is currently connected.
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Number of completed disconnects.
    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    /// Every raw write received, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Number of valid measurement requests received.
    pub fn measurement_requests(&self) -> usize {
        self.lock().measurement_requests
    }

    /// Change the values reported by subsequent replies.
    pub fn set_reading(&self, voltage: f64, current: f64, wattage: f64) {
        let mut state = self.lock();
        state.config.voltage = voltage;
        state.config.current = current;
        state.config.wattage = wattage;
    }

    /// Ignore the next `count` measurement requests.
    pub fn swallow_replies(&self, count: usize) {
        self.lock().swallow_replies = count;
    }

    /// Flip a trailer bit in the next `count` replies.
    pub fn corrupt_replies(&self, count: usize) {
        self.lock().corrupt_replies = count;
    }

    /// Push a raw notification chunk to the host.
    pub async fn notify(&self, chunk: Bytes) -> Result<()> {
        let tx = self
            .lock()
            .notify_tx
            .clone()
            .ok_or_else(|| WattchError::Transport("notifications not enabled".to_string()))?;
        tx.send(chunk)
            .await
            .map_err(|_| WattchError::Transport("notification receiver dropped".to_string()))
    }

    /// Apply one validated command payload; returns the reply frame, if any.
    fn handle_payload(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let mut state = self.lock();
        match payload {
            [CMD_SET_CLOCK, sec, min, hour, day, month0, year, _weekday] => {
                let clock = NaiveDate::from_ymd_opt(
                    1900 + i32::from(*year),
                    u32::from(*month0) + 1,
                    u32::from(*day),
                )
                .and_then(|d| d.and_hms_opt(u32::from(*hour), u32::from(*min), u32::from(*sec)));
                if let Some(clock) = clock {
                    state.clock = clock;
                }
                None
            }
            [CMD_RELAY, on] => {
                state.relay_on = *on != 0;
                None
            }
            [CMD_ENERGY_USAGE] => {
                state.measurement_requests += 1;
                let reading = Measurement::new(
                    state.clock,
                    state.config.voltage,
                    state.config.current,
                    state.config.wattage,
                );
                state.clock += Duration::seconds(1);

                if state.swallow_replies > 0 {
                    state.swallow_replies -= 1;
                    return None;
                }

                let mut frame = energy_usage_frame(&reading);
                if state.corrupt_replies > 0 {
                    state.corrupt_replies -= 1;
                    if let Some(last) = frame.last_mut() {
                        *last ^= 0x01;
                    }
                }
                Some(frame)
            }
            _ => None,
        }
    }
}

/// Encode a reading the way the wattmeter does.
pub fn energy_usage_frame(reading: &Measurement) -> Vec<u8> {
    use chrono::{Datelike, Timelike};

    let mut payload = Vec::with_capacity(26);
    payload.push(CMD_ENERGY_USAGE);
    payload.push(0x00);
    push_u48_le(&mut payload, reading.voltage * VOLTAGE_SCALE);
    push_u48_le(&mut payload, reading.current / 1000.0 * CURRENT_SCALE);
    push_u48_le(&mut payload, reading.wattage * WATTAGE_SCALE);

    let ts = reading.timestamp;
    payload.extend_from_slice(&[
        ts.second() as u8,
        ts.minute() as u8,
        ts.hour() as u8,
        ts.day() as u8,
        ts.month0() as u8,
        (ts.year() - 1900) as u8,
    ]);
    build_frame(&payload)
}

fn push_u48_le(buf: &mut Vec<u8>, value: f64) {
    let raw = value.round().max(0.0) as u64;
    buf.extend_from_slice(&raw.to_le_bytes()[..6]);
}

/// Connector that always resolves to the same simulated device.
#[derive(Debug, Clone)]
pub struct MockConnector {
    address: String,
    device: MockDevice,
}

impl MockConnector {
    /// Create a connector that accepts only `address`.
    pub fn new(address: &str, config: MockConfig) -> Self {
        Self {
            address: address.to_string(),
            device: MockDevice::new(config),
        }
    }

    /// Handle to the simulated device.
    pub fn device(&self) -> MockDevice {
        self.device.clone()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn connect(&self, address: &str) -> BoxFuture<'_, Result<MockTransport>> {
        let address = address.to_string();
        Box::pin(async move {
            if address != self.address {
                return Err(WattchError::ConnectionFailed {
                    address,
                    reason: "device not found".to_string(),
                });
            }
            self.device.lock().connected = true;
            Ok(MockTransport {
                device: self.device.clone(),
                rx_buffer: FrameBuffer::new(),
            })
        })
    }
}

/// Link to a [`MockDevice`].
#[derive(Debug)]
pub struct MockTransport {
    device: MockDevice,
    /// Device-side reassembly of host writes.
    rx_buffer: FrameBuffer,
}

impl MockTransport {
    fn ensure_connected(&self) -> Result<()> {
        if self.device.lock().connected {
            Ok(())
        } else {
            Err(WattchError::Transport("not connected".to_string()))
        }
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: Bytes, _with_response: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.ensure_connected()?;
            self.device.lock().written.push(data.to_vec());

            let reply = match self.rx_buffer.feed(&data) {
                FeedResult::Complete(frame) => self.device.handle_payload(frame.payload()),
                FeedResult::Incomplete | FeedResult::Desync => None,
            };

            if let Some(reply) = reply {
                let (tx, fragment_size) = {
                    let state = self.device.lock();
                    (state.notify_tx.clone(), state.config.fragment_size.max(1))
                };
                if let Some(tx) = tx {
                    for chunk in reply.chunks(fragment_size) {
                        // Receiver gone means the host stopped listening.
                        if tx.send(Bytes::copy_from_slice(chunk)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn subscribe(&mut self) -> BoxFuture<'_, Result<mpsc::Receiver<Bytes>>> {
        Box::pin(async move {
            self.ensure_connected()?;
            let (tx, rx) = mpsc::channel(NOTIFY_CHANNEL_CAPACITY);
            self.device.lock().notify_tx = Some(tx);
            Ok(rx)
        })
    }

    fn read_model_number(&mut self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.ensure_connected()?;
            Ok(self.device.lock().config.model_number.clone())
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.device.lock();
            if state.connected {
                state.connected = false;
                state.disconnects += 1;
            }
            state.notify_tx = None;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::measurement::Response;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    async fn collect_frame(rx: &mut mpsc::Receiver<Bytes>) -> (usize, Response) {
        let mut buffer = FrameBuffer::new();
        let mut chunks = 0;
        loop {
            let chunk = rx.recv().await.expect("notification stream ended");
            chunks += 1;
            match buffer.feed(&chunk) {
                FeedResult::Complete(frame) => return (chunks, Response::decode(&frame).unwrap()),
                FeedResult::Incomplete => {}
                FeedResult::Desync => panic!("mock produced an invalid frame"),
            }
        }
    }

    #[tokio::test]
    async fn test_connect_unknown_address_fails() {
        let connector = MockConnector::new(ADDRESS, MockConfig::default());
        let result = connector.connect("00:00:00:00:00:00").await;
        assert!(matches!(result, Err(WattchError::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_measurement_reply_is_fragmented() {
        let connector = MockConnector::new(ADDRESS, MockConfig::default());
        let mut transport = connector.connect(ADDRESS).await.unwrap();
        let mut rx = transport.subscribe().await.unwrap();

        let frame = Bytes::from(Command::RequestMeasurement.encode());
        transport.write(frame, true).await.unwrap();

        let (chunks, response) = collect_frame(&mut rx).await;
        assert_eq!(chunks, 2); // 30 bytes over 20-byte notifications
        let Response::EnergyUsage(m) = response else {
            panic!("expected energy usage");
        };
        assert_eq!(m.voltage, 100.5);
        assert_eq!(m.current, 250.0);
        assert_eq!(m.wattage, 25.125);
        assert_eq!(m.timestamp, MockConfig::default().clock);
        assert_eq!(connector.device().measurement_requests(), 1);
    }

    #[tokio::test]
    async fn test_relay_and_clock_commands() {
        let connector = MockConnector::new(ADDRESS, MockConfig::default());
        let device = connector.device();
        let mut transport = connector.connect(ADDRESS).await.unwrap();

        transport
            .write(Bytes::from(Command::PowerOn.encode()), true)
            .await
            .unwrap();
        assert!(device.relay_on());

        transport
            .write(Bytes::from(Command::PowerOff.encode()), true)
            .await
            .unwrap();
        assert!(!device.relay_on());

        let at = NaiveDate::from_ymd_opt(2025, 7, 1)
            .unwrap()
            .and_hms_opt(8, 30, 15)
            .unwrap();
        transport
            .write(Bytes::from(Command::SetClock(at).encode()), true)
            .await
            .unwrap();
        assert_eq!(device.clock(), at);
        assert_eq!(device.written().len(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_closes_notifications() {
        let connector = MockConnector::new(ADDRESS, MockConfig::default());
        let mut transport = connector.connect(ADDRESS).await.unwrap();
        let mut rx = transport.subscribe().await.unwrap();

        transport.disconnect().await.unwrap();

        assert!(rx.recv().await.is_none());
        assert!(!connector.device().is_connected());
        assert_eq!(connector.device().disconnect_count(), 1);

        let result = transport.write(Bytes::from_static(&[0xAA]), true).await;
        assert!(matches!(result, Err(WattchError::Transport(_))));
    }

    #[test]
    fn test_energy_usage_frame_matches_decoder() {
        let reading = Measurement::new(MockConfig::default().clock, 99.5, 1234.0, 122.75);
        let bytes = energy_usage_frame(&reading);

        let mut buffer = FrameBuffer::new();
        let FeedResult::Complete(frame) = buffer.feed(&bytes) else {
            panic!("invalid frame");
        };
        assert_eq!(frame.payload_len(), 26);
        let Response::EnergyUsage(decoded) = Response::decode(&frame).unwrap() else {
            panic!("expected energy usage");
        };
        assert_eq!(decoded.timestamp, reading.timestamp);
        assert_eq!(decoded.voltage, 99.5);
        assert_eq!(decoded.wattage, 122.75);
        approx::assert_relative_eq!(decoded.current, 1234.0, epsilon = 1e-5);
    }
}
