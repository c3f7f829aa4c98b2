pub mod browser;
pub mod control;
pub mod course;
pub mod page;
pub mod survey;

pub use browser::{BrowserConfig, BrowserPage};
pub use control::{ControlState, Phase, PhaseOutcome, Scheduler, SchedulerConfig};
pub use course::{CourseAgent, CourseAgentConfig};
pub use page::{AlertAction, AlertRule, CoursePage, PageError, PageLocation, SurveyPage};
pub use survey::{SurveyAgent, SurveyAgentConfig};
