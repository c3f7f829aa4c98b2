use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use crate::page::{CourseOption, PageError, SurveyPage};

/// Substring marking a course that has not been rated yet.
pub const NOT_RATED_MARKER: &str = "(未评)";
/// Sentinel option covering every course at once; never auto-picked.
pub const ALL_SENTINEL: &str = "all";
/// Prepended to the page body so the user can see the agent attached.
pub const LOADED_BANNER: &str = "教学评价自动填充已加载";

/// Picks the option the agent should rate next: the first entry that is not
/// the all-courses sentinel and still carries the not-yet-rated marker.
/// With nothing left unrated, falls back to index 0 only when something
/// else is currently selected.
pub fn pick_option(options: &[CourseOption], selected_index: usize) -> Option<usize> {
    for (index, option) in options.iter().enumerate() {
        if option.value == ALL_SENTINEL {
            continue;
        }
        if !option.text.contains(NOT_RATED_MARKER) {
            continue;
        }
        return Some(index);
    }
    if selected_index != 0 {
        Some(0)
    } else {
        None
    }
}

#[derive(Clone, Debug)]
pub struct SurveyAgentConfig {
    /// Settle time before the agree-all click and the post-submit re-run.
    pub settle_delay: Duration,
}

impl Default for SurveyAgentConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Single-shot survey agent. Runs once per page load; no tick loop and no
/// shared control state, the whole flow is reload-triggered.
pub struct SurveyAgent {
    page: Arc<dyn SurveyPage>,
    cfg: SurveyAgentConfig,
}

impl SurveyAgent {
    pub fn new(page: Arc<dyn SurveyPage>, cfg: SurveyAgentConfig) -> Self {
        Self { page, cfg }
    }

    /// The load-time pass. Returns early when a previous run already tagged
    /// this page.
    pub async fn run(&self) -> Result<(), PageError> {
        if self.page.marker_present().await? {
            return Ok(());
        }
        self.page.insert_marker().await?;

        let options = self.page.course_options().await?;
        let selected = self.page.selected_index().await?;
        // A current selection without the marker is already rated; move on.
        let current_rated = options
            .get(selected)
            .map(|option| !option.text.contains(NOT_RATED_MARKER))
            .unwrap_or(false);
        if current_rated {
            self.select_next().await?;
        }

        self.page.show_banner(LOADED_BANNER).await?;

        if self.page.agree_all_present().await? {
            sleep(self.cfg.settle_delay).await;
            self.page.click_agree_all().await?;
        }
        Ok(())
    }

    /// Selects and submits the next unrated course, if any.
    pub async fn select_next(&self) -> Result<(), PageError> {
        let options = self.page.course_options().await?;
        let selected = self.page.selected_index().await?;
        if let Some(index) = pick_option(&options, selected) {
            info!(choice = %options[index].text, "selecting course to rate");
            self.page.select_option(index).await?;
            self.page.click_submit().await?;
        }
        Ok(())
    }

    /// Wired by the adapter to the rating-submission button: after a submit,
    /// wait for the page to settle and move to the next unrated course.
    pub async fn on_submit_clicked(&self) -> Result<(), PageError> {
        sleep(self.cfg.settle_delay).await;
        self.select_next().await
    }
}
