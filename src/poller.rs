//! Polling driver: one measurement request per second.
//!
//! A dedicated task runs the cadence loop and hands each request to the
//! session task, so sleeping between cycles never blocks I/O.
//!
//! ```text
//!  Idle ──arm──► Armed ◄──stop/start──► Polling
//!    └──────────────┴──────shutdown───────┴──► Stopped
//! ```
//!
//! - **Polling**: request, wait for the sample or `response_timeout`, then
//!   sleep until the next whole second plus `cycle_offset`.
//! - **Armed**: wait for a state change, re-checking every `recheck_interval`.
//! - Stop is honoured at the next cycle boundary; shutdown also interrupts the
//!   inter-cycle sleep and the idle wait.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Result, WattchError};
use crate::session::SessionHandle;

/// Default time to wait for a measurement reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default delay after the whole-second boundary before the next request.
pub const DEFAULT_CYCLE_OFFSET: Duration = Duration::from_millis(50);

/// Default re-check interval while armed.
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(3);

const ONE_SECOND_NANOS: u64 = 1_000_000_000;

/// Lifecycle state of the polling driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Created, worker not started.
    Idle,
    /// Worker running, not polling.
    Armed,
    /// Worker issuing one request per cycle.
    Polling,
    /// Terminal.
    Stopped,
}

/// Configuration for the polling driver.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// How long to wait for each measurement reply.
    pub response_timeout: Duration,
    /// Offset past the whole-second boundary at which each cycle starts.
    pub cycle_offset: Duration,
    /// Re-check interval while armed.
    pub recheck_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            cycle_offset: DEFAULT_CYCLE_OFFSET,
            recheck_interval: DEFAULT_RECHECK_INTERVAL,
        }
    }
}

/// Delay from `now` until the next whole second plus `offset`.
pub fn delay_to_next_cycle<Tz: TimeZone>(now: &DateTime<Tz>, offset: Duration) -> Duration {
    // Leap-second representation can exceed one second.
    let into_second = u64::from(now.timestamp_subsec_nanos()).min(ONE_SECOND_NANOS);
    Duration::from_nanos(ONE_SECOND_NANOS - into_second) + offset
}

/// Handle to the polling driver.
#[derive(Debug)]
pub struct Poller {
    /// Shared with the worker, which publishes `Stopped` when it exits.
    state: Arc<watch::Sender<PollState>>,
    session: SessionHandle,
    config: PollerConfig,
    worker: Option<JoinHandle<()>>,
}

impl Poller {
    /// Create an idle poller bound to a session.
    pub fn new(session: SessionHandle, config: PollerConfig) -> Self {
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            state: Arc::new(state),
            session,
            config,
            worker: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Spawn the worker (Idle -> Armed).
    pub fn arm(&mut self) -> Result<()> {
        self.transition(&[PollState::Idle], PollState::Armed)?;

        let worker = Worker {
            session: self.session.clone(),
            publisher: self.state.clone(),
            state: self.state.subscribe(),
            config: self.config.clone(),
        };
        self.worker = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    /// Begin polling (Armed -> Polling). Idempotent while polling.
    pub fn start(&self) -> Result<()> {
        self.transition(&[PollState::Armed, PollState::Polling], PollState::Polling)
    }

    /// Stop polling at the next cycle boundary (Polling -> Armed).
    pub fn stop(&self) -> Result<()> {
        self.transition(&[PollState::Armed, PollState::Polling], PollState::Armed)
    }

    /// Enter Stopped and wait for the worker to exit.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.state.send_replace(PollState::Stopped);
        if let Some(worker) = self.worker.take() {
            worker.await?;
        }
        Ok(())
    }

    fn transition(&self, allowed: &[PollState], to: PollState) -> Result<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if !allowed.contains(state) {
                result = Err(WattchError::InvalidTransition { from: *state, to });
                return false;
            }
            if *state == to {
                return false;
            }
            tracing::debug!("Poller {:?} -> {:?}", state, to);
            *state = to;
            true
        });
        result
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        // Lets a detached worker exit at its next wake-up.
        self.state.send_replace(PollState::Stopped);
    }
}

/// State owned by the worker task.
struct Worker {
    session: SessionHandle,
    publisher: Arc<watch::Sender<PollState>>,
    state: watch::Receiver<PollState>,
    config: PollerConfig,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let state = *self.state.borrow_and_update();
            match state {
                PollState::Stopped => break,
                PollState::Idle | PollState::Armed => {
                    let _ =
                        tokio::time::timeout(self.config.recheck_interval, self.state.changed())
                            .await;
                }
                PollState::Polling => {
                    if !self.cycle().await {
                        break;
                    }
                }
            }
        }
        // Covers exits the handle did not request, e.g. a closed session.
        self.publisher.send_replace(PollState::Stopped);
        tracing::debug!("Poller worker exited");
    }

    /// One request/response cycle plus the inter-cycle sleep.
    ///
    /// Returns `false` when the worker should exit.
    async fn cycle(&mut self) -> bool {
        match self.session.measure(self.config.response_timeout).await {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(
                "No measurement reply within {:?}",
                self.config.response_timeout
            ),
            Err(e) => {
                tracing::error!("Measurement request failed: {}", e);
                if self.session.is_closed() {
                    return false;
                }
            }
        }

        let delay = delay_to_next_cycle(&chrono::Local::now(), self.config.cycle_offset);
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.state.wait_for(|s| *s == PollState::Stopped) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{spawn_session, DEFAULT_CHANNEL_CAPACITY};
    use crate::transport::mock::{MockConfig, MockConnector, MockDevice};
    use crate::transport::{Connector, Transport as _};
    use chrono::{NaiveDate, Utc};

    const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

    async fn session() -> (SessionHandle, MockDevice) {
        let connector = MockConnector::new(ADDRESS, MockConfig::default());
        let mut transport = connector.connect(ADDRESS).await.unwrap();
        let notifications = transport.subscribe().await.unwrap();
        let (handle, _task) = spawn_session(
            transport,
            notifications,
            Box::new(|_| {}),
            DEFAULT_CHANNEL_CAPACITY,
        );
        (handle, connector.device())
    }

    fn utc(nanos: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_nano_opt(12, 0, 0, nanos)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_delay_to_next_cycle() {
        let offset = Duration::from_millis(50);

        assert_eq!(
            delay_to_next_cycle(&utc(0), offset),
            Duration::from_millis(1050)
        );
        assert_eq!(
            delay_to_next_cycle(&utc(250_000_000), offset),
            Duration::from_millis(800)
        );
        assert_eq!(
            delay_to_next_cycle(&utc(999_000_000), Duration::ZERO),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_config_default() {
        let config = PollerConfig::default();
        assert_eq!(config.response_timeout, DEFAULT_RESPONSE_TIMEOUT);
        assert_eq!(config.cycle_offset, DEFAULT_CYCLE_OFFSET);
        assert_eq!(config.recheck_interval, DEFAULT_RECHECK_INTERVAL);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (session, _device) = session().await;
        let mut poller = Poller::new(session, PollerConfig::default());
        assert_eq!(poller.state(), PollState::Idle);

        assert!(matches!(
            poller.start(),
            Err(WattchError::InvalidTransition {
                from: PollState::Idle,
                to: PollState::Polling
            })
        ));

        poller.arm().unwrap();
        assert_eq!(poller.state(), PollState::Armed);
        assert!(poller.arm().is_err());

        poller.start().unwrap();
        assert_eq!(poller.state(), PollState::Polling);
        poller.start().unwrap();

        poller.stop().unwrap();
        assert_eq!(poller.state(), PollState::Armed);

        poller.shutdown().await.unwrap();
        assert_eq!(poller.state(), PollState::Stopped);
        assert!(poller.start().is_err());
        assert!(poller.stop().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_shutdown() {
        let (session, device) = session().await;
        let mut poller = Poller::new(session, PollerConfig::default());
        poller.arm().unwrap();
        poller.start().unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        poller.shutdown().await.unwrap();

        // First request is immediate, then one per cycle of at most 1.05 s.
        let requests = device.measurement_requests();
        assert!(requests >= 4, "got {requests} requests");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(device.measurement_requests(), requests);
    }

    #[tokio::test(start_paused = true)]
    async fn test_armed_does_not_poll() {
        let (session, device) = session().await;
        let mut poller = Poller::new(session, PollerConfig::default());
        poller.arm().unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(device.measurement_requests(), 0);

        poller.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_replies_do_not_stall_polling() {
        let (session, device) = session().await;
        device.swallow_replies(2);

        let mut poller = Poller::new(session, PollerConfig::default());
        poller.arm().unwrap();
        poller.start().unwrap();

        tokio::time::sleep(Duration::from_millis(4500)).await;
        poller.shutdown().await.unwrap();

        assert!(device.measurement_requests() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_wakes_armed_worker_immediately() {
        let (session, _device) = session().await;
        let mut poller = Poller::new(session, PollerConfig {
            recheck_interval: Duration::from_secs(3600),
            ..PollerConfig::default()
        });
        poller.arm().unwrap();
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        poller.shutdown().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_worker_exits_when_session_closes() {
        let (session, _device) = session().await;
        let mut poller = Poller::new(session.clone(), PollerConfig::default());
        poller.arm().unwrap();

        session.shutdown().await.unwrap();
        poller.start().unwrap();

        // The first failed request ends the worker, which reports Stopped.
        let mut state = poller.state.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == PollState::Stopped),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(poller.state(), PollState::Stopped);
        assert!(poller.start().is_err());

        tokio::time::timeout(Duration::from_secs(5), poller.shutdown())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_without_arm() {
        let (session, _device) = session().await;
        let mut poller = Poller::new(session, PollerConfig::default());
        poller.shutdown().await.unwrap();
        assert_eq!(poller.state(), PollState::Stopped);
    }
}
