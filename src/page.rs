use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ========================= Page State =========================

/// Snapshot of where the page currently is. Derived fresh on every read;
/// the host mutates it through client-side routing outside our control.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageLocation {
    pub url: String,
    pub origin: String,
    pub fragment: String,
}

impl PageLocation {
    pub fn new(url: impl Into<String>, origin: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            origin: origin.into(),
            fragment: fragment.into(),
        }
    }
}

/// One selectable entry in the survey's course dropdown.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CourseOption {
    pub value: String,
    pub text: String,
}

// ========================= Errors =========================

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum PageError {
    #[error("expected element missing: {0}")]
    MissingElement(String),
    #[error("host capability absent: {0}")]
    CapabilityAbsent(String),
    #[error("host error: {0}")]
    Host(String),
}

// ========================= Alert Routing =========================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertAction {
    /// Suppress the dialog and navigate back in history.
    NavigateBack,
    /// Pass the message through to the native alert unchanged.
    Forward,
}

/// Injected replacement for the page's alert handling. The adapter wires the
/// native alert through `decide`; the rule stays installed for the page's life.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertRule {
    pub completion_message: String,
}

impl AlertRule {
    pub fn new(completion_message: impl Into<String>) -> Self {
        Self {
            completion_message: completion_message.into(),
        }
    }

    pub fn decide(&self, message: &str) -> AlertAction {
        if message == self.completion_message {
            AlertAction::NavigateBack
        } else {
            AlertAction::Forward
        }
    }
}

// ========================= Host Boundaries =========================

/// Everything the course agent may observe or touch on the host page.
/// All calls report absence explicitly instead of faulting on a missing
/// element or global.
#[async_trait]
pub trait CoursePage: Send + Sync {
    async fn location(&self) -> Result<PageLocation, PageError>;

    /// Number of expandable group headers currently in the DOM.
    async fn group_header_count(&self) -> Result<usize, PageError>;

    /// Click the group header at `index`, revealing its leaf items.
    async fn expand_group(&self, index: usize) -> Result<(), PageError>;

    /// Click the first visible uncompleted leaf item, if any.
    /// Returns false when none are visible.
    async fn click_first_unfinished(&self) -> Result<bool, PageError>;

    async fn install_alert_rule(&self, rule: AlertRule) -> Result<(), PageError>;

    /// Invoke the host's course-completion entry point. Returns
    /// `CapabilityAbsent` when the page never exposed it.
    async fn finish_course(&self) -> Result<(), PageError>;

    async fn history_back(&self) -> Result<(), PageError>;

    /// Show a user-visible message on the page.
    async fn announce(&self, message: &str) -> Result<(), PageError>;
}

/// Host boundary for the survey page's single-shot flow.
#[async_trait]
pub trait SurveyPage: Send + Sync {
    /// True when a previous run already tagged this page.
    async fn marker_present(&self) -> Result<bool, PageError>;

    async fn insert_marker(&self) -> Result<(), PageError>;

    async fn course_options(&self) -> Result<Vec<CourseOption>, PageError>;

    async fn selected_index(&self) -> Result<usize, PageError>;

    async fn select_option(&self, index: usize) -> Result<(), PageError>;

    /// Click the course-selection submit button.
    async fn click_submit(&self) -> Result<(), PageError>;

    /// True when the "fully agree to everything" control exists.
    async fn agree_all_present(&self) -> Result<bool, PageError>;

    async fn click_agree_all(&self) -> Result<(), PageError>;

    async fn show_banner(&self, text: &str) -> Result<(), PageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPLETION: &str = "恭喜，您已完成本微课的学习";

    #[test]
    fn completion_message_navigates_back() {
        let rule = AlertRule::new(COMPLETION);
        assert_eq!(rule.decide(COMPLETION), AlertAction::NavigateBack);
    }

    #[test]
    fn other_messages_forward_unchanged() {
        let rule = AlertRule::new(COMPLETION);
        assert_eq!(rule.decide("登录已过期"), AlertAction::Forward);
        assert_eq!(rule.decide(""), AlertAction::Forward);
        // A prefix of the literal is not the literal.
        assert_eq!(rule.decide("恭喜"), AlertAction::Forward);
    }
}
