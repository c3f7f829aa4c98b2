use anyhow::Result;
use coursepilot::{BrowserConfig, BrowserPage, CourseAgent, CourseAgentConfig, SurveyAgent, SurveyAgentConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let page = if let Ok(ws) = std::env::var("CHROME_WS_URL") {
        if !ws.trim().is_empty() {
            BrowserPage::connect(&ws).await?
        } else {
            BrowserPage::launch(BrowserConfig { headless: false, user_agent: None }).await?
        }
    } else {
        BrowserPage::launch(BrowserConfig { headless: false, user_agent: None }).await?
    };

    let start_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://weiban.mycourse.cn/".to_string());
    page.goto(&start_url).await?;
    let page = Arc::new(page);

    if std::env::var("COURSEPILOT_SURVEY").is_ok() {
        // Single-shot survey flow: run once, then relay submit clicks back
        // into the agent until the page goes away.
        let survey = SurveyAgent::new(page.clone(), SurveyAgentConfig::default());
        survey.run().await?;
        page.arm_submit_hook().await?;
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if page.take_submit_clicks().await? > 0 {
                survey.on_submit_clicked().await?;
            }
        }
    }

    let mut agent = CourseAgent::new(page, CourseAgentConfig::default());
    agent.run().await;
    Ok(())
}
