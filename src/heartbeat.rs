//! Heartbeat loop
//!
//! Ticks once per heartbeat interval while the orchestrator runs. Each tick
//! checks the loaded profile and asks the player for progress reports during
//! playback. The loop ends on abort or on a profile switch, and the caller
//! then runs the orderly shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TimingConfig;
use crate::host::HostUi;
use crate::state::ProcessState;
use crate::sync::SyncWorkerSupervisor;

/// Kind of progress report requested from the player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressReport {
    Partial,
    Full,
}

impl ProgressReport {
    pub fn is_full(self) -> bool {
        matches!(self, ProgressReport::Full)
    }
}

/// Paces progress reports during playback
#[derive(Debug, Clone)]
pub struct ProgressClock {
    last_report: Instant,
    last_full_report: Instant,
    interval: Duration,
    full_interval: Duration,
}

impl ProgressClock {
    pub fn new(now: Instant, interval: Duration, full_interval: Duration) -> Self {
        Self {
            last_report: now,
            last_full_report: now,
            interval,
            full_interval,
        }
    }

    pub fn from_timing(now: Instant, timing: &TimingConfig) -> Self {
        Self::new(
            now,
            Duration::from_secs(timing.progress_report),
            Duration::from_secs(timing.full_progress_report),
        )
    }

    /// Report due at `now`, if any. The full-report timestamp only moves on escalation.
    pub fn poll(&mut self, now: Instant) -> Option<ProgressReport> {
        if now.saturating_duration_since(self.last_report) <= self.interval {
            return None;
        }
        self.last_report = now;

        if now.saturating_duration_since(self.last_full_report) > self.full_interval {
            self.last_full_report = now;
            Some(ProgressReport::Full)
        } else {
            Some(ProgressReport::Partial)
        }
    }
}

/// Why the heartbeat loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Abort requested by the host or by a quit notification
    Aborted,
    /// The host loaded a different profile
    ProfileSwitch,
}

pub struct HeartbeatLoop {
    state: Arc<ProcessState>,
    supervisor: Arc<SyncWorkerSupervisor>,
    ui: Arc<dyn HostUi>,
    clock: ProgressClock,
    interval: Duration,
    abort: CancellationToken,
}

impl HeartbeatLoop {
    pub fn new(
        state: Arc<ProcessState>,
        supervisor: Arc<SyncWorkerSupervisor>,
        ui: Arc<dyn HostUi>,
        timing: &TimingConfig,
        abort: CancellationToken,
    ) -> Self {
        Self {
            state,
            supervisor,
            ui,
            clock: ProgressClock::from_timing(Instant::now(), timing),
            interval: timing.heartbeat(),
            abort,
        }
    }

    /// One heartbeat. Returns the exit reason when the loop must end.
    pub async fn tick(&mut self, now: Instant) -> Option<LoopExit> {
        if !self.state.is_online() {
            return None;
        }

        let live_profile = self.ui.current_profile();
        if self.state.profile().as_deref() != Some(live_profile.as_str()) {
            warn!(
                "Profile changed from {:?} to {:?}",
                self.state.profile(),
                live_profile
            );
            return Some(LoopExit::ProfileSwitch);
        }

        if self.supervisor.is_live().await && self.ui.is_playing() {
            if let Some(report) = self.clock.poll(now) {
                debug!("Requesting {:?} progress report", report);
                self.ui.report_progress(report.is_full());
            }
        }

        None
    }

    /// Tick until aborted or the profile changes
    pub async fn run(mut self) -> LoopExit {
        info!("Heartbeat started, interval {:?}", self.interval);
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.abort.cancelled() => break LoopExit::Aborted,
                _ = timer.tick() => {
                    if let Some(exit) = self.tick(Instant::now()).await {
                        break exit;
                    }
                }
            }
        };

        info!("Heartbeat stopped: {:?}", exit);
        exit
    }
}
