//! Supervisor
//!
//! Top-level control loop. Polls the schedule gate, opens and closes the
//! gateway connection at the window boundaries, and restarts the read loop
//! after transport failures. Only process shutdown ends the loop.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::schedule::{Clock, ScheduleGate};

/// Sleep past a window boundary so the open interval has flipped on wake-up
const TRANSITION_SLACK: Duration = Duration::from_secs(1);

/// Supervisor timing
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Fixed delay after a failed connect or a lost connection
    pub retry_backoff: Duration,

    /// Longest sleep between schedule checks outside working hours
    pub idle_poll: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(5),
            idle_poll: Duration::from_secs(60),
        }
    }
}

pub struct Supervisor {
    gate: ScheduleGate,
    manager: Arc<ConnectionManager>,
    clock: Arc<dyn Clock>,
    config: SupervisorConfig,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        gate: ScheduleGate,
        manager: Arc<ConnectionManager>,
        clock: Arc<dyn Clock>,
        config: SupervisorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            gate,
            manager,
            clock,
            config,
            shutdown,
        }
    }

    /// Run until the shutdown token is cancelled
    ///
    /// Transport failures are retried forever; a fatal error from `connect`
    /// (bad credentials header, internal state) ends the loop with that error.
    pub async fn run(&self) -> Result<()> {
        info!(window = %self.gate.window(), "Supervisor started");

        let mut backoff = Constant::new(self.config.retry_backoff);
        let mut announced: Option<DateTime<Utc>> = None;

        while !self.shutdown.is_cancelled() {
            let now = self.clock.now();

            if !self.gate.is_active(now) {
                self.idle(now, &mut announced).await;
                continue;
            }
            announced = None;

            if !self.manager.is_connected() {
                match self.manager.connect().await {
                    Ok(generation) => {
                        debug!(generation = %generation, "Connect succeeded");
                    }
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Cannot connect, giving up");
                        self.manager.disconnect().await;
                        return Err(e);
                    }
                    Err(e) => {
                        let delay = backoff.next_backoff().unwrap_or(self.config.retry_backoff);
                        warn!(error = %e, retry_in_secs = delay.as_secs_f64(), "Connect failed");
                        self.pause(delay).await;
                        continue;
                    }
                }
            }

            if let Err(e) = self.drive(now).await {
                let delay = backoff.next_backoff().unwrap_or(self.config.retry_backoff);
                warn!(error = %e, retry_in_secs = delay.as_secs_f64(), "Connection ended, will reconnect");
                self.pause(delay).await;
            }
        }

        self.manager.disconnect().await;
        info!(stats = ?self.manager.stats(), "Supervisor stopped");
        Ok(())
    }

    /// Outside working hours: make sure we are offline and wait for the window
    async fn idle(&self, now: DateTime<Utc>, announced: &mut Option<DateTime<Utc>>) {
        if self.manager.is_connected() {
            self.manager.disconnect().await;
        }

        let next = self.gate.next_transition(now);
        if *announced != Some(next) {
            info!(
                now = %self.gate.format_local(now),
                next_active = %self.gate.format_local(next),
                "Outside working hours"
            );
            *announced = Some(next);
        }

        let until = until(now, next) + TRANSITION_SLACK;
        self.pause(until.min(self.config.idle_poll)).await;
    }

    /// Block on the read loop until it fails, the window closes or shutdown
    async fn drive(&self, now: DateTime<Utc>) -> Result<()> {
        let end = self.gate.next_transition(now);
        info!(
            generation = %self.manager.generation(),
            until = %self.gate.format_local(end),
            "Staying online"
        );

        let reading = self.manager.read_loop();
        tokio::pin!(reading);

        tokio::select! {
            result = &mut reading => return result,
            _ = tokio::time::sleep(until(now, end) + TRANSITION_SLACK) => {
                info!(at = %self.gate.format_local(self.clock.now()), "Working hours ended");
            }
            _ = self.shutdown.cancelled() => {
                info!("Shutdown requested");
            }
        }

        self.manager.disconnect().await;
        reading.await
    }

    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

fn until(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (then - now).to_std().unwrap_or(Duration::ZERO)
}
