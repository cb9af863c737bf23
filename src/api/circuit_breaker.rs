use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { since: Instant },
    /// One probe is in flight; everyone else still fails fast. A probe that
    /// never reports back is replaced after another cooldown.
    HalfOpen { since: Instant },
}

/// Fails calls fast once a backend has failed `threshold` times in a row,
/// then lets a single probe through after `cooldown`.
#[derive(Debug)]
pub struct CircuitBreaker {
    phase: Mutex<Phase>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            phase: Mutex::new(Phase::Closed { failures: 0 }),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a call may go out now. Moving from open to half-open admits
    /// exactly one caller.
    pub fn allow(&self) -> bool {
        let mut phase = self.phase();
        match *phase {
            Phase::Closed { .. } => true,
            Phase::Open { since } | Phase::HalfOpen { since }
                if since.elapsed() >= self.cooldown =>
            {
                debug!("Circuit half-open, admitting probe");
                *phase = Phase::HalfOpen {
                    since: Instant::now(),
                };
                true
            }
            Phase::Open { .. } | Phase::HalfOpen { .. } => false,
        }
    }

    /// Returns true when this success closed the circuit.
    pub fn on_success(&self) -> bool {
        let mut phase = self.phase();
        let reopened = !matches!(*phase, Phase::Closed { .. });
        if reopened {
            debug!("Circuit closed");
        }
        *phase = Phase::Closed { failures: 0 };
        reopened
    }

    /// Returns true when this failure opened the circuit.
    pub fn on_failure(&self) -> bool {
        let mut phase = self.phase();
        let next = match *phase {
            Phase::Closed { failures } if failures + 1 >= self.threshold => {
                warn!(failures = failures + 1, "Circuit opened");
                Phase::Open {
                    since: Instant::now(),
                }
            }
            Phase::Closed { failures } => Phase::Closed {
                failures: failures + 1,
            },
            Phase::HalfOpen { .. } => {
                warn!("Probe failed, circuit reopened");
                Phase::Open {
                    since: Instant::now(),
                }
            }
            Phase::Open { .. } => return false,
        };
        let opened = matches!(next, Phase::Open { .. });
        *phase = next;
        opened
    }

    pub fn state(&self) -> CircuitState {
        match *self.phase() {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}
