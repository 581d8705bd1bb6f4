use anyhow::{Context, Result};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BrowserSettings;
use crate::dom;
use crate::types::{ActionOutcome, PageState, ScrollDirection};

const MAX_WAIT_SECS: f64 = 60.0;

/// Everything the mission worker needs from a browser. Methods block.
///
/// An `Err` from an action method is an action failure, not a mission
/// failure; only `start` and `page_state` errors end a mission.
pub trait PageDriver: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn goto(&mut self, url: &str) -> Result<ActionOutcome>;
    fn click(&mut self, selector: &str) -> Result<ActionOutcome>;
    fn type_text(&mut self, selector: &str, text: &str, press_enter: bool)
    -> Result<ActionOutcome>;
    fn scroll(&mut self, direction: ScrollDirection) -> Result<ActionOutcome>;
    fn wait(&mut self, seconds: f64) -> Result<ActionOutcome>;
    fn page_state(&mut self) -> Result<PageState>;
}

/// Builds one driver per mission.
pub trait DriverFactory: Send + Sync {
    fn create(&self, headless: bool) -> Box<dyn PageDriver>;
}

pub struct ChromeFactory {
    settings: BrowserSettings,
}

impl ChromeFactory {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

impl DriverFactory for ChromeFactory {
    fn create(&self, headless: bool) -> Box<dyn PageDriver> {
        let settings = BrowserSettings {
            headless,
            ..self.settings.clone()
        };
        Box::new(ChromeDriver::new(settings))
    }
}

/// Browser plus the single tab a mission works in.
struct Session {
    _browser: Browser,
    tab: Arc<Tab>,
}

pub struct ChromeDriver {
    settings: BrowserSettings,
    session: Option<Session>,
}

impl ChromeDriver {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    fn tab(&self) -> Result<&Arc<Tab>> {
        self.session
            .as_ref()
            .map(|s| &s.tab)
            .context("browser session not started")
    }

    fn current(&self) -> Result<ActionOutcome> {
        Ok(ActionOutcome::at(dom::get_current_url(self.tab()?)))
    }
}

impl PageDriver for ChromeDriver {
    fn start(&mut self) -> Result<()> {
        let options = LaunchOptions {
            headless: self.settings.headless,
            window_size: Some(self.settings.viewport),
            path: self.settings.chrome_path.clone(),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                // Anti-bot flags
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--disable-dev-shm-usage"),
            ],
            idle_browser_timeout: Duration::from_millis(self.settings.timeout_ms.max(1) * 4),
            ..Default::default()
        };

        tracing::info!(headless = self.settings.headless, "starting Chrome");
        let browser = Browser::new(options).context("browser launch failed")?;
        let tab = browser.new_tab().context("failed to open tab")?;
        tab.set_default_timeout(Duration::from_millis(self.settings.timeout_ms));
        tracing::debug!("Chrome ready");

        self.session = Some(Session {
            _browser: browser,
            tab,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.tab.close(false) {
                tracing::warn!(error = %e, "failed to close tab");
            }
            tracing::debug!("Chrome stopped");
        }
        Ok(())
    }

    fn goto(&mut self, url: &str) -> Result<ActionOutcome> {
        let tab = self.tab()?;
        tab.navigate_to(url)
            .with_context(|| format!("navigation to {url} failed"))?;
        tab.wait_until_navigated()?;
        std::thread::sleep(Duration::from_millis(1000));
        Ok(ActionOutcome::at(tab.get_url()))
    }

    fn click(&mut self, selector: &str) -> Result<ActionOutcome> {
        let tab = self.tab()?;
        let Ok(el) = tab.find_element(selector) else {
            return Ok(ActionOutcome::failed(format!("Element not found: {selector}")));
        };
        el.scroll_into_view()?;
        el.click()?;
        std::thread::sleep(Duration::from_millis(1000));
        self.current()
    }

    fn type_text(
        &mut self,
        selector: &str,
        text: &str,
        press_enter: bool,
    ) -> Result<ActionOutcome> {
        let tab = self.tab()?;
        let Ok(el) = tab.find_element(selector) else {
            return Ok(ActionOutcome::failed(format!("Element not found: {selector}")));
        };
        el.click()?;
        let js_sel = serde_json::to_string(selector)?;
        tab.evaluate(
            &format!("(document.querySelector({js_sel}) || {{}}).value = ''"),
            false,
        )?;
        tab.type_str(text)?;

        if press_enter {
            tab.press_key("Enter")?;
            std::thread::sleep(Duration::from_millis(2000));
        }
        self.current()
    }

    fn scroll(&mut self, direction: ScrollDirection) -> Result<ActionOutcome> {
        let tab = self.tab()?;
        let sign = match direction {
            ScrollDirection::Down => "",
            ScrollDirection::Up => "-",
        };
        tab.evaluate(
            &format!("window.scrollBy(0, {sign}Math.round(window.innerHeight * 0.8))"),
            false,
        )?;
        std::thread::sleep(Duration::from_millis(1000));
        self.current()
    }

    fn wait(&mut self, seconds: f64) -> Result<ActionOutcome> {
        let seconds = if seconds.is_finite() {
            seconds.clamp(0.0, MAX_WAIT_SECS)
        } else {
            0.0
        };
        std::thread::sleep(Duration::from_secs_f64(seconds));
        Ok(ActionOutcome::ok())
    }

    fn page_state(&mut self) -> Result<PageState> {
        dom::capture_page_state(self.tab()?)
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
