use crate::health::HealthVerdict;
use std::time::Duration;

/// Decision returned by the poll policy after a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Collector is healthy on the expected endpoint.
    Ready,
    /// Not there yet; sleep for `delay` and probe again.
    Retry { delay: Duration },
    /// A different collector owns the port; it will never converge.
    Abort,
    /// Deadline passed without a healthy probe.
    TimedOut,
}

/// Bounded polling policy for a freshly spawned collector.
///
/// `WrongEndpoint` aborts immediately; every other non-healthy verdict
/// (dead, unhealthy, socket file not created yet) is retried until the
/// deadline. The retry delay is clipped to the remaining budget so the
/// loop never overshoots the deadline by more than one probe.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    deadline: Duration,
    interval: Duration,
}

impl PollPolicy {
    pub fn new(deadline: Duration, interval: Duration) -> Self {
        Self { deadline, interval }
    }

    /// Decide what to do after a probe returned `verdict`, `elapsed` into
    /// the budget.
    pub fn evaluate(&self, verdict: HealthVerdict, elapsed: Duration) -> PollDecision {
        match verdict {
            HealthVerdict::Healthy => return PollDecision::Ready,
            HealthVerdict::WrongEndpoint => {
                tracing::warn!(
                    "another collector is bound to a different endpoint, giving up on startup"
                );
                return PollDecision::Abort;
            }
            _ => {}
        }
        if elapsed >= self.deadline {
            tracing::debug!(
                ?verdict,
                elapsed_ms = elapsed.as_millis() as u64,
                "collector startup deadline reached"
            );
            return PollDecision::TimedOut;
        }
        let remaining = self.deadline - elapsed;
        PollDecision::Retry {
            delay: self.interval.min(remaining),
        }
    }
}
