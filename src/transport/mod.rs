//! Transport module - the Bluetooth LE link to the wattmeter.
//!
//! Connection establishment, GATT discovery and notification plumbing belong
//! to the platform BLE stack. This crate only needs the primitives below,
//! which a platform adapter implements:
//! - [`Connector::connect`] - open a link to a device address
//! - [`Transport::write`] - write a frame to the TX characteristic
//! - [`Transport::subscribe`] - stream RX notifications
//! - [`Transport::read_model_number`] - read the model-number string once
//! - [`Transport::disconnect`] - release the link
//!
//! [`mock`] provides an in-memory wattmeter for tests and demos.

pub mod mock;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

/// GATT characteristic the host writes commands to.
pub const TX_CHARACTERISTIC_UUID: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";

/// GATT characteristic the device notifies responses on.
pub const RX_CHARACTERISTIC_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/// Standard Device Information "Model Number String" characteristic.
pub const MODEL_NUMBER_UUID: &str = "00002a24-0000-1000-8000-00805f9b34fb";

/// Advertised name fragment identifying the wattmeter during scans.
pub const DEVICE_NAME_PATTERN: &str = "BTWATTCH2";

/// Boxed future returned by transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An established link to one wattmeter.
///
/// All methods are called from a single session task, never concurrently.
pub trait Transport: Send + 'static {
    /// Write raw bytes to the TX characteristic.
    fn write(&mut self, data: Bytes, with_response: bool) -> BoxFuture<'_, Result<()>>;

    /// Enable notifications on the RX characteristic.
    ///
    /// Each received notification is delivered as one `Bytes` chunk, which
    /// may hold any fragment of a frame. The stream ends when the link drops.
    fn subscribe(&mut self) -> BoxFuture<'_, Result<mpsc::Receiver<Bytes>>>;

    /// Read the device model-number string.
    fn read_model_number(&mut self) -> BoxFuture<'_, Result<String>>;

    /// Disconnect from the device.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Opens links to wattmeters by address.
pub trait Connector: Send + Sync {
    /// Link type produced on success.
    type Transport: Transport;

    /// Connect to the device at `address`.
    fn connect(&self, address: &str) -> BoxFuture<'_, Result<Self::Transport>>;
}
