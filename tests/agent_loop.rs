//! Drives the course agent end to end against a scripted page: sweep the
//! course list, open the one unfinished micro-course, dwell it out, finish,
//! then sweep again and report completion.

use async_trait::async_trait;
use coursepilot::control::SchedulerConfig;
use coursepilot::course::{FinisherConfig, NavigatorConfig, COMPLETION_ALERT};
use coursepilot::{
    AlertRule, ControlState, CourseAgent, CourseAgentConfig, CoursePage, PageError, PageLocation,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LIST_URL: &str = "https://weiban.mycourse.cn/#/course?tab=1";
const LIST_ORIGIN: &str = "https://weiban.mycourse.cn";
const LIST_FRAGMENT: &str = "#/course?tab=1";
const PLAYER_URL: &str = "https://mcwk.mycourse.cn/player/42";
const PLAYER_ORIGIN: &str = "https://mcwk.mycourse.cn";

struct SiteState {
    loc: PageLocation,
    groups: usize,
    /// Group whose expansion reveals the unfinished item.
    unfinished_in_group: Option<usize>,
    revealed: bool,
    finished: bool,
    events: Vec<String>,
}

struct ScriptedSite {
    state: Mutex<SiteState>,
}

impl ScriptedSite {
    fn new(groups: usize, unfinished_in_group: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SiteState {
                loc: PageLocation::new(LIST_URL, LIST_ORIGIN, LIST_FRAGMENT),
                groups,
                unfinished_in_group,
                revealed: false,
                finished: false,
                events: Vec::new(),
            }),
        })
    }

    fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl CoursePage for ScriptedSite {
    async fn location(&self) -> Result<PageLocation, PageError> {
        Ok(self.state.lock().unwrap().loc.clone())
    }

    async fn group_header_count(&self) -> Result<usize, PageError> {
        let st = self.state.lock().unwrap();
        if st.loc.fragment.starts_with("#/course?") {
            Ok(st.groups)
        } else {
            Ok(0)
        }
    }

    async fn expand_group(&self, index: usize) -> Result<(), PageError> {
        let mut st = self.state.lock().unwrap();
        st.events.push(format!("expand:{index}"));
        if !st.finished && st.unfinished_in_group == Some(index) {
            st.revealed = true;
        }
        Ok(())
    }

    async fn click_first_unfinished(&self) -> Result<bool, PageError> {
        let mut st = self.state.lock().unwrap();
        if st.revealed && !st.finished {
            st.revealed = false;
            st.events.push("open-item".into());
            // Opening the item routes to the micro-course player.
            st.loc = PageLocation::new(PLAYER_URL, PLAYER_ORIGIN, "");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn install_alert_rule(&self, rule: AlertRule) -> Result<(), PageError> {
        assert_eq!(rule.completion_message, COMPLETION_ALERT);
        self.state.lock().unwrap().events.push("alert-rule".into());
        Ok(())
    }

    async fn finish_course(&self) -> Result<(), PageError> {
        let mut st = self.state.lock().unwrap();
        st.finished = true;
        st.events.push("finish".into());
        // The player's completion alert is rerouted to history.back().
        st.loc = PageLocation::new(LIST_URL, LIST_ORIGIN, LIST_FRAGMENT);
        Ok(())
    }

    async fn history_back(&self) -> Result<(), PageError> {
        let mut st = self.state.lock().unwrap();
        st.loc = PageLocation::new(LIST_URL, LIST_ORIGIN, LIST_FRAGMENT);
        Ok(())
    }

    async fn announce(&self, message: &str) -> Result<(), PageError> {
        self.state
            .lock()
            .unwrap()
            .events
            .push(format!("announce:{message}"));
        Ok(())
    }
}

fn instant_config() -> CourseAgentConfig {
    CourseAgentConfig {
        scheduler: SchedulerConfig::default(),
        finisher: FinisherConfig {
            dwell_base: Duration::ZERO,
            dwell_jitter: Duration::ZERO,
        },
        navigator: NavigatorConfig {
            step_interval: Duration::ZERO,
        },
    }
}

#[tokio::test]
async fn completes_one_course_then_reports_done() {
    let site = ScriptedSite::new(2, Some(1));
    let mut agent = CourseAgent::new(site.clone(), instant_config());

    // Navigator claims on the course listing.
    agent.tick().await;
    assert_eq!(agent.control(), ControlState::Navigating);

    // Sweep: probe, expand 0, probe, expand 1 (reveals), probe clicks.
    for _ in 0..5 {
        agent.tick().await;
    }
    assert_eq!(
        site.events(),
        vec!["expand:0", "expand:1", "open-item"],
        "sweep should stop at the first revealed item"
    );
    assert_eq!(agent.control(), ControlState::Idle);

    // On the player page the finisher arms, then fires on the next tick.
    agent.tick().await;
    assert_eq!(agent.control(), ControlState::Finishing);
    agent.tick().await;
    assert!(site.events().contains(&"alert-rule".to_string()));
    assert!(site.events().contains(&"finish".to_string()));
    // Finishing routed back to the listing, where the navigator reclaims
    // control on the same tick.
    assert_eq!(agent.control(), ControlState::Navigating);

    // Back on the listing with everything passed: two full passes, then the
    // completion message.
    let mut ticks = 0;
    while !site.events().iter().any(|e| e.starts_with("announce:")) {
        agent.tick().await;
        ticks += 1;
        assert!(ticks < 32, "sweep never announced completion");
    }
    let expands_after_finish: Vec<_> = site
        .events()
        .iter()
        .skip_while(|e| *e != "finish")
        .filter(|e| e.starts_with("expand:"))
        .cloned()
        .collect();
    assert_eq!(expands_after_finish, vec!["expand:0", "expand:1", "expand:0", "expand:1"]);
    assert_eq!(agent.control(), ControlState::Idle);
}

#[tokio::test]
async fn exam_page_suspends_everything() {
    let site = ScriptedSite::new(2, Some(0));
    {
        let mut st = site.state.lock().unwrap();
        st.loc = PageLocation::new(
            "https://weiban.mycourse.cn/#/courses/exam-page?id=7",
            LIST_ORIGIN,
            "#/courses/exam-page?id=7",
        );
    }
    let mut agent = CourseAgent::new(site.clone(), instant_config());

    for _ in 0..5 {
        agent.tick().await;
    }
    assert_eq!(agent.control(), ControlState::Stopping);
    assert!(site.events().is_empty(), "no page mutations during an exam");

    // Exam over: the stop-detector releases and the navigator picks up the
    // listing on the same tick, since every later phase re-checks control.
    {
        let mut st = site.state.lock().unwrap();
        st.loc = PageLocation::new(LIST_URL, LIST_ORIGIN, LIST_FRAGMENT);
    }
    agent.tick().await;
    assert_eq!(agent.control(), ControlState::Navigating);
}
