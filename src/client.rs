//! Client builder and connection lifecycle.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the session
//! and building the client. [`ClientBuilder::connect`] then:
//! 1. Connects to the device (failure here is fatal)
//! 2. Reads the model number
//! 3. Subscribes to notifications and spawns the session task
//! 4. Spawns and arms the polling driver
//! 5. Optionally syncs the device clock at the next whole second
//!
//! # Example
//!
//! ```ignore
//! use btwattch2::Client;
//!
//! let client = Client::builder()
//!     .on_sample(|m| println!("{} {:.3} W", m.timestamp, m.wattage))
//!     .connect(&connector, "AA:BB:CC:DD:EE:FF")
//!     .await?;
//!
//! client.power_on().await?;
//! client.start_measuring()?;
//! // ...
//! client.shutdown().await?;
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{Local, SubsecRound};
use tokio::task::JoinHandle;

use crate::command::Command;
use crate::error::{Result, WattchError};
use crate::measurement::Measurement;
use crate::poller::{delay_to_next_cycle, PollState, Poller, PollerConfig};
use crate::session::{spawn_session, SessionHandle, DEFAULT_CHANNEL_CAPACITY};
use crate::table::LiveTable;
use crate::transport::{Connector, Transport};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session request queue capacity.
    pub channel_capacity: usize,
    /// Send `SetClock` right after connecting.
    pub sync_clock_on_connect: bool,
    /// Polling driver settings.
    pub poller: PollerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            sync_clock_on_connect: true,
            poller: PollerConfig::default(),
        }
    }
}

type SampleCallback = Box<dyn FnMut(&Measurement) + Send + 'static>;

/// Builder for configuring and connecting a wattmeter client.
pub struct ClientBuilder {
    config: ClientConfig,
    table: Arc<Mutex<LiveTable>>,
    on_sample: Option<SampleCallback>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            table: Arc::new(Mutex::new(LiveTable::new())),
            on_sample: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the time to wait for each measurement reply.
    ///
    /// Default: 1 second
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.poller.response_timeout = timeout;
        self
    }

    /// Set the offset past each whole second at which a poll cycle starts.
    ///
    /// Default: 50 ms
    pub fn cycle_offset(mut self, offset: Duration) -> Self {
        self.config.poller.cycle_offset = offset;
        self
    }

    /// Set how often an armed, non-polling worker re-checks its state.
    ///
    /// Default: 3 seconds
    pub fn recheck_interval(mut self, interval: Duration) -> Self {
        self.config.poller.recheck_interval = interval;
        self
    }

    /// Set the session request queue capacity.
    ///
    /// Default: 32
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Enable or disable the clock sync after connecting.
    ///
    /// Default: enabled
    pub fn sync_clock_on_connect(mut self, enabled: bool) -> Self {
        self.config.sync_clock_on_connect = enabled;
        self
    }

    /// Share an existing live table instead of a fresh one.
    pub fn table(mut self, table: Arc<Mutex<LiveTable>>) -> Self {
        self.table = table;
        self
    }

    /// Register a callback run for every sample after it enters the table.
    ///
    /// Runs on the session task and must not block.
    pub fn on_sample<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Measurement) + Send + 'static,
    {
        self.on_sample = Some(Box::new(callback));
        self
    }

    /// Connect to the device at `address` and start the session.
    pub async fn connect<C: Connector>(self, connector: &C, address: &str) -> Result<Client> {
        let ClientBuilder {
            config,
            table,
            mut on_sample,
        } = self;

        let mut transport =
            connector
                .connect(address)
                .await
                .map_err(|e| match e {
                    e @ WattchError::ConnectionFailed { .. } => e,
                    e => WattchError::ConnectionFailed {
                        address: address.to_string(),
                        reason: e.to_string(),
                    },
                })?;
        tracing::info!("Connected to {}", address);

        let model_number = match transport.read_model_number().await {
            Ok(model) => model,
            Err(e) => {
                let _ = transport.disconnect().await;
                return Err(e);
            }
        };
        tracing::info!("Model number: {}", model_number);

        let notifications = match transport.subscribe().await {
            Ok(rx) => rx,
            Err(e) => {
                let _ = transport.disconnect().await;
                return Err(e);
            }
        };

        let sink = table.clone();
        let (session, session_task) = spawn_session(
            transport,
            notifications,
            Box::new(move |sample| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(&sample);
                if let Some(callback) = on_sample.as_mut() {
                    callback(&sample);
                }
            }),
            config.channel_capacity,
        );

        let mut poller = Poller::new(session.clone(), config.poller.clone());
        poller.arm()?;

        let client = Client {
            address: address.to_string(),
            model_number,
            session,
            session_task: Some(session_task),
            poller,
            table,
        };

        if config.sync_clock_on_connect {
            client.sync_clock().await?;
        }

        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected wattmeter.
///
/// Dropping the client without [`shutdown`](Client::shutdown) stops the
/// worker and disconnects in the background.
pub struct Client {
    address: String,
    model_number: String,
    session: SessionHandle,
    session_task: Option<JoinHandle<Result<()>>>,
    poller: Poller,
    table: Arc<Mutex<LiveTable>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Device address this client is connected to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Model-number string read at connect time.
    pub fn model_number(&self) -> &str {
        &self.model_number
    }

    /// The live table fed by this session.
    pub fn table(&self) -> Arc<Mutex<LiveTable>> {
        self.table.clone()
    }

    /// Handle to the session task, for issuing raw commands.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Close the relay.
    pub async fn power_on(&self) -> Result<()> {
        self.session.send(Command::PowerOn).await
    }

    /// Open the relay.
    pub async fn power_off(&self) -> Result<()> {
        self.session.send(Command::PowerOff).await
    }

    /// Set the device RTC to local wall time at the next whole second.
    pub async fn sync_clock(&self) -> Result<()> {
        tokio::time::sleep(delay_to_next_cycle(&Local::now(), Duration::ZERO)).await;

        let now = Local::now().naive_local().trunc_subsecs(0);
        tracing::info!("Setting device clock to {}", now);
        self.session.send(Command::SetClock(now)).await
    }

    /// Begin polling once per second.
    pub fn start_measuring(&self) -> Result<()> {
        self.poller.start()
    }

    /// Stop polling at the next cycle boundary.
    pub fn stop_measuring(&self) -> Result<()> {
        self.poller.stop()
    }

    /// Whether the poller is issuing measurement requests.
    pub fn is_measuring(&self) -> bool {
        self.poller.state() == PollState::Polling
    }

    /// Current polling driver state.
    pub fn poll_state(&self) -> PollState {
        self.poller.state()
    }

    /// Stop polling, join the worker, disconnect and join the session task.
    pub async fn shutdown(mut self) -> Result<()> {
        self.poller.shutdown().await?;

        match self.session.shutdown().await {
            Ok(()) | Err(WattchError::SessionClosed) => {}
            Err(e) => return Err(e),
        }
        if let Some(task) = self.session_task.take() {
            task.await??;
        }
        tracing::info!("Disconnected from {}", self.address);
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .field("model_number", &self.model_number)
            .field("poll_state", &self.poller.state())
            .finish()
    }
}
