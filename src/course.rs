use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::control::{ControlState, Phase, PhaseOutcome, Scheduler, SchedulerConfig};
use crate::page::{AlertRule, CoursePage, PageError};

/// Origin of the micro-course player pages.
pub const PLAYER_ORIGIN_MARKER: &str = "mcwk.mycourse.cn";
/// Route fragment of an exam in progress.
pub const EXAM_FRAGMENT_MARKER: &str = "#/courses/exam-page?";
/// Route fragment prefix of the course listing.
pub const COURSE_LIST_FRAGMENT: &str = "#/course?";
/// Exact alert text the player emits when a micro-course completes.
pub const COMPLETION_ALERT: &str = "恭喜，您已完成本微课的学习";
/// Shown to the user when the sweep finds nothing left to open.
pub const ALL_DONE_MESSAGE: &str = "课程已全部完成";

// ========================= Sweep =========================

/// Planned step of a course-list sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepStep {
    /// Expand the group header at this index.
    Expand(usize),
}

/// Pull-based plan for sweeping the two-level course list: every group
/// header once per pass, at most two passes. Exhaustion means nothing
/// actionable was revealed.
#[derive(Clone, Debug)]
pub struct Sweep {
    group_count: usize,
    cursor: usize,
    pass: usize,
}

impl Sweep {
    pub fn new(group_count: usize) -> Self {
        Self {
            group_count,
            cursor: 0,
            pass: 0,
        }
    }
}

impl Iterator for Sweep {
    type Item = SweepStep;

    fn next(&mut self) -> Option<SweepStep> {
        if self.group_count == 0 {
            return None;
        }
        if self.cursor >= self.group_count {
            self.cursor = 0;
            self.pass += 1;
        }
        if self.pass > 1 {
            return None;
        }
        let index = self.cursor;
        self.cursor += 1;
        Some(SweepStep::Expand(index))
    }
}

// ========================= Dwell =========================

/// Humanized dwell before marking a micro-course done:
/// `base - jitter + rand[0, 2*jitter)`.
pub fn jittered_dwell(base: Duration, jitter: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let jitter_ms = jitter.as_millis() as u64;
    let low = base_ms.saturating_sub(jitter_ms);
    let span = jitter_ms * 2;
    let ms = if span == 0 {
        low
    } else {
        low + rand::thread_rng().gen_range(0..span)
    };
    Duration::from_millis(ms)
}

// ========================= Stop Detector =========================

/// Mirrors the exam route into the control state so nothing else touches
/// the page mid-exam. No timer of its own; re-evaluated every tick.
pub struct StopDetector {
    page: Arc<dyn CoursePage>,
}

impl StopDetector {
    pub fn new(page: Arc<dyn CoursePage>) -> Self {
        Self { page }
    }
}

#[async_trait]
impl Phase for StopDetector {
    fn name(&self) -> &'static str {
        "stop-detector"
    }

    fn claims(&self) -> ControlState {
        ControlState::Stopping
    }

    async fn poll(&mut self, holding: bool) -> Result<PhaseOutcome, PageError> {
        let loc = self.page.location().await?;
        let exam_open = loc.url.contains(EXAM_FRAGMENT_MARKER);
        Ok(match (holding, exam_open) {
            (false, true) => {
                info!("exam page open, holding everything back");
                PhaseOutcome::Claim
            }
            (false, false) => PhaseOutcome::Pass,
            (true, true) => PhaseOutcome::Continue,
            (true, false) => PhaseOutcome::Release,
        })
    }
}

// ========================= Finisher =========================

#[derive(Clone, Debug)]
pub struct FinisherConfig {
    pub dwell_base: Duration,
    pub dwell_jitter: Duration,
}

impl Default for FinisherConfig {
    fn default() -> Self {
        Self {
            dwell_base: Duration::from_millis(50_000),
            dwell_jitter: Duration::from_millis(10_000),
        }
    }
}

/// Waits out a jittered dwell on a micro-course player page, then invokes
/// the host's completion entry point. The installed alert rule turns the
/// player's completion dialog into back-navigation.
pub struct Finisher {
    page: Arc<dyn CoursePage>,
    cfg: FinisherConfig,
    deadline: Option<Instant>,
    armed_at: Option<Instant>,
    armed: bool,
}

impl Finisher {
    pub fn new(page: Arc<dyn CoursePage>, cfg: FinisherConfig) -> Self {
        Self {
            page,
            cfg,
            deadline: None,
            armed_at: None,
            armed: false,
        }
    }
}

#[async_trait]
impl Phase for Finisher {
    fn name(&self) -> &'static str {
        "finisher"
    }

    fn claims(&self) -> ControlState {
        ControlState::Finishing
    }

    async fn poll(&mut self, holding: bool) -> Result<PhaseOutcome, PageError> {
        let loc = self.page.location().await?;
        let on_player = loc.origin.contains(PLAYER_ORIGIN_MARKER);

        if !holding {
            if !on_player {
                // Leaving the player re-arms for the next qualifying load.
                self.armed = false;
                return Ok(PhaseOutcome::Pass);
            }
            if self.armed {
                return Ok(PhaseOutcome::Pass);
            }
            let dwell = jittered_dwell(self.cfg.dwell_base, self.cfg.dwell_jitter);
            self.page
                .install_alert_rule(AlertRule::new(COMPLETION_ALERT))
                .await?;
            self.deadline = Some(Instant::now() + dwell);
            self.armed_at = Some(Instant::now());
            self.armed = true;
            info!(dwell_s = dwell.as_secs_f64(), url = %loc.url, "finish armed");
            return Ok(PhaseOutcome::Claim);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.deadline = None;
                self.page.finish_course().await?;
                if let Some(armed_at) = self.armed_at.take() {
                    info!(elapsed_s = armed_at.elapsed().as_secs_f64(), "finish triggered");
                }
                Ok(PhaseOutcome::Release)
            }
            Some(_) => Ok(PhaseOutcome::Continue),
            None => Ok(PhaseOutcome::Release),
        }
    }
}

// ========================= Navigator =========================

#[derive(Clone, Debug)]
pub struct NavigatorConfig {
    /// Minimum spacing between sweep steps.
    pub step_interval: Duration,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            step_interval: Duration::from_millis(1500),
        }
    }
}

/// Sweeps the course listing for an unfinished item: alternating steps
/// probe visible unfinished leaves and expand the next group header from
/// the sweep plan. Exhausting the plan means everything passed.
pub struct Navigator {
    page: Arc<dyn CoursePage>,
    cfg: NavigatorConfig,
    sweep: Option<Sweep>,
    probe_next: bool,
    last_step: Option<Instant>,
}

impl Navigator {
    pub fn new(page: Arc<dyn CoursePage>, cfg: NavigatorConfig) -> Self {
        Self {
            page,
            cfg,
            sweep: None,
            probe_next: true,
            last_step: None,
        }
    }
}

#[async_trait]
impl Phase for Navigator {
    fn name(&self) -> &'static str {
        "navigator"
    }

    fn claims(&self) -> ControlState {
        ControlState::Navigating
    }

    async fn poll(&mut self, holding: bool) -> Result<PhaseOutcome, PageError> {
        if !holding {
            let loc = self.page.location().await?;
            if !loc.fragment.starts_with(COURSE_LIST_FRAGMENT) {
                return Ok(PhaseOutcome::Pass);
            }
            let groups = self.page.group_header_count().await?;
            if groups == 0 {
                return Ok(PhaseOutcome::Pass);
            }
            self.sweep = Some(Sweep::new(groups));
            self.probe_next = true;
            self.last_step = Some(Instant::now());
            info!(groups, "course sweep started");
            return Ok(PhaseOutcome::Claim);
        }

        if let Some(last) = self.last_step {
            if last.elapsed() < self.cfg.step_interval {
                return Ok(PhaseOutcome::Continue);
            }
        }
        self.last_step = Some(Instant::now());

        if self.probe_next {
            self.probe_next = false;
            if self.page.click_first_unfinished().await? {
                info!("unfinished course opened");
                self.sweep = None;
                return Ok(PhaseOutcome::Release);
            }
            debug!("no unfinished item visible yet");
            return Ok(PhaseOutcome::Continue);
        }

        self.probe_next = true;
        match self.sweep.as_mut().and_then(|sweep| sweep.next()) {
            Some(SweepStep::Expand(index)) => {
                self.page.expand_group(index).await?;
                debug!(index, "group expanded");
                Ok(PhaseOutcome::Continue)
            }
            None => {
                info!("sweep exhausted, nothing left to open");
                self.page.announce(ALL_DONE_MESSAGE).await?;
                self.sweep = None;
                Ok(PhaseOutcome::Release)
            }
        }
    }
}

// ========================= Agent =========================

#[derive(Clone, Debug, Default)]
pub struct CourseAgentConfig {
    pub scheduler: SchedulerConfig,
    pub finisher: FinisherConfig,
    pub navigator: NavigatorConfig,
}

/// The course-completion agent: stop-detector, finisher and navigator on
/// one shared tick loop, highest priority first.
pub struct CourseAgent {
    scheduler: Scheduler,
}

impl CourseAgent {
    pub fn new(page: Arc<dyn CoursePage>, cfg: CourseAgentConfig) -> Self {
        let mut scheduler = Scheduler::new(cfg.scheduler);
        scheduler.register(Box::new(StopDetector::new(page.clone())));
        scheduler.register(Box::new(Finisher::new(page.clone(), cfg.finisher)));
        scheduler.register(Box::new(Navigator::new(page, cfg.navigator)));
        Self { scheduler }
    }

    pub fn control(&self) -> ControlState {
        self.scheduler.control()
    }

    /// Drive one tick by hand. Used by tests and embedders with their own loop.
    pub async fn tick(&mut self) {
        self.scheduler.tick().await;
    }

    /// Run until the page goes away.
    pub async fn run(&mut self) {
        self.scheduler.run().await;
    }
}
