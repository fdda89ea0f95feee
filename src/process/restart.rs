use crate::config::{BackoffKind, RoleOverrides, SupervisorSettings};
use crate::process::handle::ExitReason;
use std::time::{Duration, Instant};

/// Restart policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Maximum number of restarts within the time window
    pub max_restarts: usize,
    /// Time window for counting restarts
    pub window: Duration,
    /// Delay before the first restart
    pub initial_delay: Duration,
    /// Backoff strategy to use
    pub backoff_strategy: BackoffStrategy,
}

/// Outcome of evaluating an unexpected exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Leave the role stopped
    Stop,
    /// Respawn the role after `delay`
    Restart { delay: Duration },
    /// Restart budget exhausted within the window
    CrashLoop { recent: usize },
}

impl RestartPolicy {
    /// Create a new restart policy with default values
    pub fn new() -> Self {
        Self::from_settings(&SupervisorSettings::default(), &RoleOverrides::default())
    }

    /// Resolve the policy for one role from supervisor defaults and its overrides
    pub fn from_settings(settings: &SupervisorSettings, overrides: &RoleOverrides) -> Self {
        let initial_delay = overrides
            .restart_delay_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| settings.restart_delay());

        let backoff_strategy = match settings.backoff {
            BackoffKind::Fixed => BackoffStrategy::Fixed,
            BackoffKind::Exponential => BackoffStrategy::Exponential {
                max_delay: settings.max_restart_delay().max(initial_delay),
            },
        };

        Self {
            enabled: overrides.autorestart.unwrap_or(true),
            max_restarts: overrides.max_restarts.unwrap_or(settings.max_restarts),
            window: settings.restart_window(),
            initial_delay,
            backoff_strategy,
        }
    }

    /// Decide what to do after a role exited outside of a requested stop.
    ///
    /// Every non-clean exit of an enabled role counts as a restart attempt,
    /// including the one that trips the crash-loop limit.
    pub fn evaluate(&self, reason: &ExitReason, tracker: &mut RestartTracker) -> RestartDecision {
        if reason.is_clean() || !self.enabled {
            return RestartDecision::Stop;
        }

        let delay = self.calculate_delay(tracker);

        tracker.record_restart();
        tracker.prune_old_restarts(self.window);

        let recent = tracker.count_recent_restarts(self.window);
        if recent > self.max_restarts {
            RestartDecision::CrashLoop { recent }
        } else {
            RestartDecision::Restart { delay }
        }
    }

    /// Calculate the delay before the next restart attempt
    pub fn calculate_delay(&self, tracker: &RestartTracker) -> Duration {
        self.backoff_strategy
            .calculate_delay(self.initial_delay, tracker.restart_count())
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff strategy for restart delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between restarts
    Fixed,
    /// Exponential backoff with maximum delay
    Exponential { max_delay: Duration },
}

impl BackoffStrategy {
    /// Calculate the delay for a given restart attempt
    pub fn calculate_delay(&self, initial_delay: Duration, restart_count: usize) -> Duration {
        match self {
            BackoffStrategy::Fixed => initial_delay,
            BackoffStrategy::Exponential { max_delay } => {
                // delay = initial * 2^restart_count
                let factor = 2_u32.saturating_pow(restart_count.min(u32::MAX as usize) as u32);
                initial_delay.saturating_mul(factor).min(*max_delay)
            }
        }
    }
}

/// Tracks restart history for a role
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    /// Timestamps of restarts still inside the window
    restart_times: Vec<Instant>,
    /// Restarts since the supervisor started; never decreases
    total: usize,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a restart attempt
    pub fn record_restart(&mut self) {
        self.restart_times.push(Instant::now());
        self.total += 1;
    }

    /// Total number of restarts
    pub fn restart_count(&self) -> usize {
        self.total
    }

    /// Count restarts within the specified time window
    pub fn count_recent_restarts(&self, window: Duration) -> usize {
        let now = Instant::now();
        self.restart_times
            .iter()
            .filter(|&&time| now.duration_since(time) < window)
            .count()
    }

    pub fn last_restart_time(&self) -> Option<Instant> {
        self.restart_times.last().copied()
    }

    /// Remove restart records older than the specified window
    pub fn prune_old_restarts(&mut self, window: Duration) {
        let now = Instant::now();
        self.restart_times
            .retain(|&time| now.duration_since(time) < window);
    }
}
