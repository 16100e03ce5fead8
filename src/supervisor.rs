/// Collector lifecycle supervision.
///
/// One bounded pass per wrapper invocation:
/// probe, then reap, remove a stale socket, spawn, and poll until healthy or
/// the startup deadline passes. Nothing here is fatal to the build; every
/// failure degrades to "no collector endpoint".
use crate::endpoint::{Endpoint, EndpointResolver};
use crate::health::{HealthCheck, HealthVerdict};
use crate::launch::Launcher;
use crate::reaper::Reap;
use crate::retry::{PollDecision, PollPolicy};
use crate::EnvMap;
use std::future::Future;
use std::time::{Duration, Instant};

/// Time source for the polling loop.
pub trait Clock {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);

    /// Run `fut` for at most `limit`; `None` when the limit passed first.
    async fn timeout<F: Future>(&self, limit: Duration, fut: F) -> Option<F::Output>;
}

/// Wall clock backed by tokio's timer.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn timeout<F: Future>(&self, limit: Duration, fut: F) -> Option<F::Output> {
        tokio::time::timeout(limit, fut).await.ok()
    }
}

/// What the caller knows about this invocation before any supervision.
#[derive(Debug, Clone, Default)]
pub struct SupervisionRequest {
    /// `--enable_collector` was given and telemetry is consented to.
    pub enabled: bool,
    /// Bare help request; never worth starting a collector for.
    pub help: bool,
    pub project: Option<String>,
}

/// Why supervision was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Help,
    NoProject,
    Unsupported,
}

/// Terminal state of a supervision pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisionOutcome {
    /// Collector is serving the expected endpoint.
    Healthy { endpoint: Endpoint },
    /// Supervision gave up; proceed without a collector.
    TimedOut { endpoint: Option<Endpoint> },
    Skipped(SkipReason),
}

impl SupervisionOutcome {
    pub fn healthy(&self) -> bool {
        matches!(self, SupervisionOutcome::Healthy { .. })
    }

    /// Endpoint to advertise downstream, present only when healthy.
    pub fn advertised_endpoint(&self) -> Option<&Endpoint> {
        match self {
            SupervisionOutcome::Healthy { endpoint } => Some(endpoint),
            _ => None,
        }
    }
}

/// Fixed knobs of the supervision state machine.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub health_port: u16,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
}

pub struct CollectorSupervisor<H, R, L, C> {
    resolver: EndpointResolver,
    probe: H,
    reaper: R,
    launcher: L,
    clock: C,
    settings: SupervisorSettings,
}

impl<H, R, L, C> CollectorSupervisor<H, R, L, C>
where
    H: HealthCheck,
    R: Reap,
    L: Launcher,
    C: Clock,
{
    pub fn new(
        resolver: EndpointResolver,
        probe: H,
        reaper: R,
        launcher: L,
        clock: C,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            resolver,
            probe,
            reaper,
            launcher,
            clock,
            settings,
        }
    }

    /// Full pass: gate on the request, resolve the endpoint, supervise.
    pub async fn run(&self, request: &SupervisionRequest, env: &EnvMap) -> SupervisionOutcome {
        if !request.enabled {
            return SupervisionOutcome::Skipped(SkipReason::Disabled);
        }
        if request.help {
            return SupervisionOutcome::Skipped(SkipReason::Help);
        }
        let Some(project) = request.project.as_deref().filter(|p| !p.is_empty()) else {
            return SupervisionOutcome::Skipped(SkipReason::NoProject);
        };
        if !self.launcher.collector_supported().await {
            return SupervisionOutcome::Skipped(SkipReason::Unsupported);
        }

        let endpoint = match self.resolver.endpoint_for(project, env) {
            Ok(ep) => ep,
            Err(e) => {
                tracing::warn!(error = %e, "cannot resolve collector endpoint");
                return SupervisionOutcome::TimedOut { endpoint: None };
            }
        };
        self.supervise(project, endpoint).await
    }

    /// Bring a collector for `project` up on `endpoint`.
    pub async fn supervise(&self, project: &str, endpoint: Endpoint) -> SupervisionOutcome {
        let start = self.clock.now();

        let verdict = self.probe_within_budget(&endpoint, start).await;
        tracing::debug!(?verdict, endpoint = %endpoint, "initial collector probe");
        match verdict {
            HealthVerdict::Healthy => return SupervisionOutcome::Healthy { endpoint },
            HealthVerdict::Dead => {}
            HealthVerdict::Unhealthy
            | HealthVerdict::WrongEndpoint
            | HealthVerdict::MissingSocketFile => {
                if !self.reaper.find_and_kill(self.settings.health_port) {
                    return SupervisionOutcome::TimedOut {
                        endpoint: Some(endpoint),
                    };
                }
            }
        }

        remove_stale_socket(&endpoint);

        if let Err(e) = self.launcher.spawn_collector(project, &endpoint) {
            tracing::warn!(error = %e, "failed to spawn collector");
            return SupervisionOutcome::TimedOut {
                endpoint: Some(endpoint),
            };
        }

        if self.poll_until_healthy(&endpoint, start).await {
            SupervisionOutcome::Healthy { endpoint }
        } else {
            SupervisionOutcome::TimedOut {
                endpoint: Some(endpoint),
            }
        }
    }

    /// Probe, cut off at the startup deadline. A probe still pending when
    /// the budget runs out counts as `Dead`.
    async fn probe_within_budget(&self, endpoint: &Endpoint, start: Instant) -> HealthVerdict {
        let elapsed = self.clock.now().saturating_duration_since(start);
        let remaining = self.settings.startup_timeout.saturating_sub(elapsed);
        match self.clock.timeout(remaining, self.probe.classify(endpoint)).await {
            Some(verdict) => verdict,
            None => {
                tracing::debug!(
                    remaining_ms = remaining.as_millis() as u64,
                    "collector probe cut off at startup deadline"
                );
                HealthVerdict::Dead
            }
        }
    }

    async fn poll_until_healthy(&self, endpoint: &Endpoint, start: Instant) -> bool {
        let policy = PollPolicy::new(self.settings.startup_timeout, self.settings.poll_interval);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let verdict = self.probe_within_budget(endpoint, start).await;
            let elapsed = self.clock.now().saturating_duration_since(start);
            match policy.evaluate(verdict, elapsed) {
                PollDecision::Ready => {
                    tracing::info!(attempts, endpoint = %endpoint, "collector healthy");
                    return true;
                }
                PollDecision::Retry { delay } => self.clock.sleep(delay).await,
                PollDecision::Abort | PollDecision::TimedOut => {
                    tracing::debug!(attempts, ?verdict, "collector polling stopped");
                    return false;
                }
            }
        }
    }
}

/// A leftover socket file can break the new collector's bind. Failing to
/// remove it is reported but does not stop the spawn.
fn remove_stale_socket(endpoint: &Endpoint) {
    let Some(path) = endpoint.socket_path() else {
        return;
    };
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale collector socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            error = %e,
            path = %path.display(),
            "failed to remove stale collector socket, starting collector anyway"
        ),
    }
}
