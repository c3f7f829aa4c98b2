use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::page::PageError;

// ========================= Control State =========================

/// Who is currently in control of the page. Owned by the scheduler; phases
/// request transitions through their poll outcome and never mutate it
/// themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlState {
    Idle,
    Stopping,
    Finishing,
    Navigating,
}

/// Transition requested by a phase after one poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Nothing to do this tick.
    Pass,
    /// Take control; only honored while the state is `Idle`.
    Claim,
    /// Keep holding control.
    Continue,
    /// Hand control back to `Idle`.
    Release,
}

/// One independently triggerable unit of workflow logic. A phase is polled
/// when the control state is `Idle` or when the phase itself is the holder;
/// it must confine side effects to polls where it claims or holds control.
#[async_trait]
pub trait Phase: Send {
    fn name(&self) -> &'static str;

    /// The control state this phase occupies while in control.
    fn claims(&self) -> ControlState;

    async fn poll(&mut self, holding: bool) -> Result<PhaseOutcome, PageError>;
}

// ========================= Scheduler =========================

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub tick: Duration,
    /// How long a phase may hold control before a stale warning is logged.
    /// Control is never force-released.
    pub stale_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(1000),
            stale_after: Duration::from_secs(180),
        }
    }
}

/// Fixed-period tick loop. Polls registered phases in registration order;
/// the control state arbitrates exclusivity, so at most one phase acts
/// meaningfully per tick while the rest stay read-only.
pub struct Scheduler {
    phases: Vec<Box<dyn Phase>>,
    control: ControlState,
    held_since: Option<Instant>,
    stale_warned: bool,
    cfg: SchedulerConfig,
}

impl Scheduler {
    pub fn new(cfg: SchedulerConfig) -> Self {
        Self {
            phases: Vec::new(),
            control: ControlState::Idle,
            held_since: None,
            stale_warned: false,
            cfg,
        }
    }

    pub fn register(&mut self, phase: Box<dyn Phase>) {
        self.phases.push(phase);
    }

    pub fn control(&self) -> ControlState {
        self.control
    }

    /// Runs ticks for the lifetime of the page. No cancellation API; the
    /// caller drops the future when the page goes away.
    pub async fn run(&mut self) {
        let mut ticker = tokio::time::interval(self.cfg.tick);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One scheduler tick. Split out so tests can drive the loop directly.
    pub async fn tick(&mut self) {
        self.check_stale();

        for i in 0..self.phases.len() {
            let holding = self.control != ControlState::Idle
                && self.control == self.phases[i].claims();
            if self.control != ControlState::Idle && !holding {
                continue;
            }

            let outcome = match self.phases[i].poll(holding).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(phase = self.phases[i].name(), %err, "phase poll failed");
                    if holding {
                        // Surface the failure instead of starving siblings.
                        warn!(phase = self.phases[i].name(), "releasing control after failure");
                        self.release();
                    }
                    continue;
                }
            };

            match outcome {
                PhaseOutcome::Pass => {}
                PhaseOutcome::Claim => {
                    if self.control == ControlState::Idle {
                        self.control = self.phases[i].claims();
                        self.held_since = Some(Instant::now());
                        self.stale_warned = false;
                        debug!(phase = self.phases[i].name(), state = ?self.control, "control claimed");
                    } else {
                        warn!(phase = self.phases[i].name(), "claim ignored, control not idle");
                    }
                }
                PhaseOutcome::Continue => {
                    if !holding {
                        warn!(phase = self.phases[i].name(), "continue from non-holder ignored");
                    }
                }
                PhaseOutcome::Release => {
                    if holding {
                        debug!(phase = self.phases[i].name(), "control released");
                        self.release();
                    }
                }
            }
        }
    }

    fn release(&mut self) {
        self.control = ControlState::Idle;
        self.held_since = None;
        self.stale_warned = false;
    }

    fn check_stale(&mut self) {
        if self.stale_warned {
            return;
        }
        if let Some(since) = self.held_since {
            if since.elapsed() >= self.cfg.stale_after {
                warn!(
                    state = ?self.control,
                    held_for_s = since.elapsed().as_secs(),
                    "control held past stale threshold"
                );
                self.stale_warned = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Scripted {
        name: &'static str,
        claims: ControlState,
        script: Vec<PhaseOutcome>,
        at: usize,
        acted: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(
            name: &'static str,
            claims: ControlState,
            script: Vec<PhaseOutcome>,
            acted: Arc<AtomicUsize>,
        ) -> Self {
            Self { name, claims, script, at: 0, acted }
        }
    }

    #[async_trait]
    impl Phase for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn claims(&self) -> ControlState {
            self.claims
        }

        async fn poll(&mut self, _holding: bool) -> Result<PhaseOutcome, PageError> {
            let outcome = self.script.get(self.at).copied().unwrap_or(PhaseOutcome::Pass);
            self.at += 1;
            if matches!(outcome, PhaseOutcome::Claim | PhaseOutcome::Continue) {
                self.acted.fetch_add(1, Ordering::SeqCst);
            }
            Ok(outcome)
        }
    }

    struct Failing;

    #[async_trait]
    impl Phase for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn claims(&self) -> ControlState {
            ControlState::Finishing
        }

        async fn poll(&mut self, holding: bool) -> Result<PhaseOutcome, PageError> {
            if holding {
                Err(PageError::CapabilityAbsent("finishWxCourse".into()))
            } else {
                Ok(PhaseOutcome::Claim)
            }
        }
    }

    #[tokio::test]
    async fn holder_excludes_other_phases() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut sched = Scheduler::new(SchedulerConfig::default());
        sched.register(Box::new(Scripted::new(
            "stop",
            ControlState::Stopping,
            vec![PhaseOutcome::Claim, PhaseOutcome::Continue, PhaseOutcome::Release],
            first.clone(),
        )));
        sched.register(Box::new(Scripted::new(
            "nav",
            ControlState::Navigating,
            vec![PhaseOutcome::Claim; 8],
            second.clone(),
        )));

        sched.tick().await;
        assert_eq!(sched.control(), ControlState::Stopping);
        // The navigator never got polled while the stop phase held control.
        assert_eq!(second.load(Ordering::SeqCst), 0);

        sched.tick().await;
        assert_eq!(sched.control(), ControlState::Stopping);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        // Release lands mid-tick; the later phase re-checks control on the
        // same tick and takes over.
        sched.tick().await;
        assert_eq!(sched.control(), ControlState::Navigating);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn claim_applies_in_registration_order() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut sched = Scheduler::new(SchedulerConfig::default());
        sched.register(Box::new(Scripted::new(
            "a",
            ControlState::Stopping,
            vec![PhaseOutcome::Claim],
            first.clone(),
        )));
        sched.register(Box::new(Scripted::new(
            "b",
            ControlState::Navigating,
            vec![PhaseOutcome::Claim],
            second.clone(),
        )));

        sched.tick().await;
        assert_eq!(sched.control(), ControlState::Stopping);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        // The later registration was skipped once the earlier claim landed.
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn holder_failure_releases_control() {
        let mut sched = Scheduler::new(SchedulerConfig::default());
        sched.register(Box::new(Failing));

        sched.tick().await;
        assert_eq!(sched.control(), ControlState::Finishing);

        sched.tick().await;
        assert_eq!(sched.control(), ControlState::Idle);
    }
}
