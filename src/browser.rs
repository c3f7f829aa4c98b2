use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::page::{AlertRule, CourseOption, CoursePage, PageError, PageLocation, SurveyPage};

const GROUP_HEADER_SEL: &str = "#app .van-collapse-item__title";
const UNFINISHED_ITEM_SEL: &str = "#app .img-texts-item.van-hairline--top:not(.passed)";
const COMPLETION_GLOBAL: &str = "finishWxCourse";

const COURSE_SELECT_NAME: &str = "kcxuanze";
const COURSE_SUBMIT_SEL: &str = "#submit3";
const AGREE_ALL_SEL: &str = "input[value=E]";
const RATING_SUBMIT_SEL: &str = "#submit01";
const MARKER_ID: &str = "coursepilot-loaded";

#[derive(Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true, user_agent: None }
    }
}

/// CDP-backed implementation of the page boundaries. One instance drives
/// one page for its whole life.
pub struct BrowserPage {
    page: Page,
    _browser: OxideBrowser,
}

impl BrowserPage {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Unique user data dir per run to avoid ProcessSingleton profile
        // lock conflicts when Chromium restarts rapidly.
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("coursepilot-profile-{}-{}", std::process::id(), ts));
        let _ = std::fs::create_dir_all(&profile_dir);
        builder = builder
            .user_data_dir(profile_dir.clone())
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        let bcfg = builder.build().map_err(|e| anyhow::anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser.new_page("about:blank").await?;
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        Ok(Self { page, _browser: browser })
    }

    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (browser, mut handler) = OxideBrowser::connect(ws_url).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser.new_page("about:blank").await?;
        Ok(Self { page, _browser: browser })
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    /// Hook the rating-submit button so clicks can be observed from outside
    /// the page. The driver drains `take_submit_clicks` and feeds
    /// `SurveyAgent::on_submit_clicked`.
    pub async fn arm_submit_hook(&self) -> Result<(), PageError> {
        let js = format!(
            r#"(() => {{
                const btn = document.querySelector({submit});
                if (!btn) return false;
                if (window.__cpSubmitHook) return true;
                window.__cpSubmitHook = true;
                window.__cpSubmitClicks = 0;
                btn.addEventListener('click', () => {{ window.__cpSubmitClicks++; }});
                return true;
            }})()"#,
            submit = js_str(RATING_SUBMIT_SEL),
        );
        if self.eval_bool(js).await? {
            Ok(())
        } else {
            Err(PageError::MissingElement(RATING_SUBMIT_SEL.into()))
        }
    }

    /// Number of submit clicks since the last call.
    pub async fn take_submit_clicks(&self) -> Result<u64, PageError> {
        let js = "(() => { const n = window.__cpSubmitClicks || 0; window.__cpSubmitClicks = 0; return n; })()";
        let v = self.eval(js.to_string()).await?;
        Ok(v.as_u64().unwrap_or(0))
    }

    async fn eval(&self, expression: String) -> Result<Value, PageError> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .build()
            .map_err(PageError::Host)?;
        let resp = self
            .page
            .execute(params)
            .await
            .map_err(|e| PageError::Host(e.to_string()))?;
        Ok(resp.result.result.value.clone().unwrap_or(Value::Null))
    }

    async fn eval_bool(&self, expression: String) -> Result<bool, PageError> {
        Ok(self.eval(expression).await?.as_bool().unwrap_or(false))
    }
}

fn js_str(s: &str) -> String {
    // serde_json string encoding doubles as a JS string literal.
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into())
}

#[async_trait]
impl CoursePage for BrowserPage {
    async fn location(&self) -> Result<PageLocation, PageError> {
        let js = "(() => ({ url: location.href, origin: location.origin, fragment: location.hash }))()";
        let v = self.eval(js.to_string()).await?;
        serde_json::from_value(v).map_err(|e| PageError::Host(e.to_string()))
    }

    async fn group_header_count(&self) -> Result<usize, PageError> {
        let js = format!(
            "document.querySelectorAll({sel}).length",
            sel = js_str(GROUP_HEADER_SEL)
        );
        let v = self.eval(js).await?;
        Ok(v.as_u64().unwrap_or(0) as usize)
    }

    async fn expand_group(&self, index: usize) -> Result<(), PageError> {
        let js = format!(
            r#"(() => {{
                const boxes = document.querySelectorAll({sel});
                if ({index} >= boxes.length) return false;
                boxes.item({index}).click();
                return true;
            }})()"#,
            sel = js_str(GROUP_HEADER_SEL),
        );
        if self.eval_bool(js).await? {
            Ok(())
        } else {
            Err(PageError::MissingElement(format!(
                "{GROUP_HEADER_SEL}[{index}]"
            )))
        }
    }

    async fn click_first_unfinished(&self) -> Result<bool, PageError> {
        let js = format!(
            r#"(() => {{
                const items = document.querySelectorAll({sel});
                if (!items.length) return false;
                items.item(0).click();
                return true;
            }})()"#,
            sel = js_str(UNFINISHED_ITEM_SEL),
        );
        self.eval_bool(js).await
    }

    async fn install_alert_rule(&self, rule: AlertRule) -> Result<(), PageError> {
        // Page-side mirror of AlertRule::decide; stays installed for the
        // page's life.
        let js = format!(
            r#"(() => {{
                if (window.__cpAlertHooked) return;
                window.__cpAlertHooked = true;
                const native = window.alert;
                window.alert = (msg) => {{
                    if (msg === {completion}) {{
                        window.history.back();
                    }} else {{
                        native(msg);
                    }}
                }};
            }})()"#,
            completion = js_str(&rule.completion_message),
        );
        self.eval(js).await?;
        Ok(())
    }

    async fn finish_course(&self) -> Result<(), PageError> {
        let js = format!(
            r#"(() => {{
                if (typeof window.{global} !== 'function') return false;
                window.{global}();
                return true;
            }})()"#,
            global = COMPLETION_GLOBAL,
        );
        if self.eval_bool(js).await? {
            Ok(())
        } else {
            Err(PageError::CapabilityAbsent(COMPLETION_GLOBAL.into()))
        }
    }

    async fn history_back(&self) -> Result<(), PageError> {
        self.eval("window.history.back()".to_string()).await?;
        Ok(())
    }

    async fn announce(&self, message: &str) -> Result<(), PageError> {
        let js = format!(
            r#"(() => {{
                const div = document.createElement('div');
                div.textContent = {msg};
                document.body.prepend(div);
            }})()"#,
            msg = js_str(message),
        );
        self.eval(js).await?;
        Ok(())
    }
}

#[async_trait]
impl SurveyPage for BrowserPage {
    async fn marker_present(&self) -> Result<bool, PageError> {
        let js = format!("!!document.getElementById({id})", id = js_str(MARKER_ID));
        self.eval_bool(js).await
    }

    async fn insert_marker(&self) -> Result<(), PageError> {
        let js = format!(
            r#"(() => {{
                const div = document.createElement('div');
                div.id = {id};
                document.body.append(div);
            }})()"#,
            id = js_str(MARKER_ID),
        );
        self.eval(js).await?;
        Ok(())
    }

    async fn course_options(&self) -> Result<Vec<CourseOption>, PageError> {
        let js = "Array.from(document.querySelectorAll('option')).map(o => ({ value: o.value, text: o.text }))";
        let v = self.eval(js.to_string()).await?;
        serde_json::from_value(v).map_err(|e| PageError::Host(e.to_string()))
    }

    async fn selected_index(&self) -> Result<usize, PageError> {
        let js = format!(
            r#"(() => {{
                const sel = document.getElementsByName({name})[0];
                return sel ? sel.selectedIndex : -1;
            }})()"#,
            name = js_str(COURSE_SELECT_NAME),
        );
        let v = self.eval(js).await?;
        match v.as_i64() {
            Some(i) if i >= 0 => Ok(i as usize),
            _ => Err(PageError::MissingElement(COURSE_SELECT_NAME.into())),
        }
    }

    async fn select_option(&self, index: usize) -> Result<(), PageError> {
        let js = format!(
            r#"(() => {{
                const options = document.querySelectorAll('option');
                if ({index} >= options.length) return false;
                options.item({index}).selected = true;
                return true;
            }})()"#,
        );
        if self.eval_bool(js).await? {
            Ok(())
        } else {
            Err(PageError::MissingElement(format!("option[{index}]")))
        }
    }

    async fn click_submit(&self) -> Result<(), PageError> {
        let js = format!(
            r#"(() => {{
                const btn = document.querySelector({sel});
                if (!btn) return false;
                btn.click();
                return true;
            }})()"#,
            sel = js_str(COURSE_SUBMIT_SEL),
        );
        if self.eval_bool(js).await? {
            Ok(())
        } else {
            Err(PageError::MissingElement(COURSE_SUBMIT_SEL.into()))
        }
    }

    async fn agree_all_present(&self) -> Result<bool, PageError> {
        let js = format!(
            "document.querySelectorAll({sel}).length > 0",
            sel = js_str(AGREE_ALL_SEL)
        );
        self.eval_bool(js).await
    }

    async fn click_agree_all(&self) -> Result<(), PageError> {
        let js = format!(
            "document.querySelectorAll({sel}).forEach(e => e.click())",
            sel = js_str(AGREE_ALL_SEL)
        );
        self.eval(js).await?;
        Ok(())
    }

    async fn show_banner(&self, text: &str) -> Result<(), PageError> {
        self.announce(text).await
    }
}
