//! # btwattch2
//!
//! Host-side driver for the RS-BTWATTCH2 Bluetooth LE wattmeter.
//!
//! The device speaks a small framed protocol over a UART-style GATT service:
//! the host writes commands to one characteristic and the device answers via
//! notifications on another, fragmented at arbitrary boundaries.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): framing, CRC-8 and reassembly
//! - **Commands / responses** ([`command`], [`measurement`]): payload layouts
//! - **Session** ([`session`]): one task owning the link and all protocol I/O
//! - **Poller** ([`poller`]): one task issuing a measurement request per second
//! - **Live table** ([`table`], [`export`]): sorted display rows and CSV export
//!
//! The BLE stack itself sits behind the [`transport::Transport`] and
//! [`transport::Connector`] traits.
//!
//! ## Example
//!
//! ```ignore
//! use btwattch2::Client;
//!
//! #[tokio::main]
//! async fn main() -> btwattch2::Result<()> {
//!     let client = Client::builder()
//!         .connect(&connector, "AA:BB:CC:DD:EE:FF")
//!         .await?;
//!
//!     client.start_measuring()?;
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!
//!     let table = client.table();
//!     btwattch2::export::save_csv(&table.lock().unwrap(), "usage.csv")?;
//!     client.shutdown().await
//! }
//! ```

pub mod command;
pub mod error;
pub mod export;
pub mod measurement;
pub mod poller;
pub mod protocol;
pub mod session;
pub mod table;
pub mod transport;

mod client;

pub use client::{Client, ClientBuilder, ClientConfig};
pub use command::Command;
pub use error::{Result, WattchError};
pub use measurement::{Measurement, Response};
pub use poller::{PollState, PollerConfig};
pub use table::{Column, Direction, LiveRow, LiveTable, SortState};
