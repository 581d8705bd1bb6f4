//! Scripted in-memory web used by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use anyhow::anyhow;
use marketradar::hands::{DriverFactory, PageDriver};
use marketradar::mission::{MissionEvent, MissionStream};
use marketradar::types::{ActionOutcome, PageElement, PageState, ScrollDirection};

pub const HOME: &str = "https://www.google.com";

/// What the test can observe about a driver after it moved into a worker.
#[derive(Clone, Default)]
pub struct Tracker {
    pub started: Arc<AtomicBool>,
    pub stopped: Arc<AtomicBool>,
    pub page_reads: Arc<AtomicUsize>,
    pub visited: Arc<Mutex<Vec<String>>>,
}

impl Tracker {
    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }
}

pub struct FakeDriver {
    pages: HashMap<String, PageState>,
    results: Vec<PageElement>,
    current: String,
    fail_goto_containing: Option<String>,
    fail_page_state_at: Option<usize>,
    panic_page_state_at: Option<usize>,
    page_delay: Option<Duration>,
    gate: Option<mpsc::Receiver<()>>,
    pub tracker: Tracker,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            results: Vec::new(),
            current: String::new(),
            fail_goto_containing: None,
            fail_page_state_at: None,
            panic_page_state_at: None,
            page_delay: None,
            gate: None,
            tracker: Tracker::default(),
        }
    }

    pub fn page(mut self, state: PageState) -> Self {
        self.pages.insert(state.url.clone(), state);
        self
    }

    /// Links shown on every search results page.
    pub fn results(mut self, links: Vec<PageElement>) -> Self {
        self.results = links;
        self
    }

    pub fn fail_goto_containing(mut self, needle: &str) -> Self {
        self.fail_goto_containing = Some(needle.to_string());
        self
    }

    /// The n-th page state read (1-based) fails.
    pub fn fail_page_state_at(mut self, n: usize) -> Self {
        self.fail_page_state_at = Some(n);
        self
    }

    /// The n-th page state read (1-based) panics, like a driver bug would.
    pub fn panic_page_state_at(mut self, n: usize) -> Self {
        self.panic_page_state_at = Some(n);
        self
    }

    /// Every page state read sleeps first, keeping the mission alive for a while.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.page_delay = Some(delay);
        self
    }

    /// Every page state read blocks until the sender sends or hangs up.
    pub fn gated(mut self, gate: mpsc::Receiver<()>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn current_page(&self) -> PageState {
        if self.current.contains("/search") {
            return PageState {
                url: self.current.clone(),
                title: "Search results".into(),
                visible_text: "About 1,000 results".into(),
                elements: self.results.clone(),
            };
        }
        if self.current.trim_end_matches('/') == HOME {
            return PageState {
                url: self.current.clone(),
                title: "Google".into(),
                visible_text: "Google Search".into(),
                elements: vec![PageElement {
                    tag: "textarea".into(),
                    id: Some("q".into()),
                    text: "Search".into(),
                    href: None,
                    eid: Some("e0".into()),
                }],
            };
        }
        self.pages.get(&self.current).cloned().unwrap_or(PageState {
            url: self.current.clone(),
            ..Default::default()
        })
    }

    fn navigate(&mut self, url: &str) -> ActionOutcome {
        self.current = url.to_string();
        self.tracker.visited.lock().unwrap().push(url.to_string());
        ActionOutcome::at(url)
    }
}

impl PageDriver for FakeDriver {
    fn start(&mut self) -> anyhow::Result<()> {
        self.tracker.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.tracker.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn goto(&mut self, url: &str) -> anyhow::Result<ActionOutcome> {
        if let Some(needle) = &self.fail_goto_containing {
            if url.contains(needle.as_str()) {
                return Err(anyhow!("net::ERR_CONNECTION_REFUSED at {url}"));
            }
        }
        Ok(self.navigate(url))
    }

    fn click(&mut self, selector: &str) -> anyhow::Result<ActionOutcome> {
        let target = self
            .current_page()
            .elements
            .into_iter()
            .find(|el| el.selector().as_deref() == Some(selector))
            .and_then(|el| el.href);
        match target {
            Some(href) => Ok(self.navigate(&href)),
            None => Ok(ActionOutcome::failed(format!("Element not found: {selector}"))),
        }
    }

    fn type_text(
        &mut self,
        _selector: &str,
        text: &str,
        press_enter: bool,
    ) -> anyhow::Result<ActionOutcome> {
        if press_enter {
            let url = format!("{HOME}/search?q={}", text.replace(' ', "+"));
            return Ok(self.navigate(&url));
        }
        Ok(ActionOutcome::at(self.current.clone()))
    }

    fn scroll(&mut self, _direction: ScrollDirection) -> anyhow::Result<ActionOutcome> {
        Ok(ActionOutcome::at(self.current.clone()))
    }

    fn wait(&mut self, _seconds: f64) -> anyhow::Result<ActionOutcome> {
        Ok(ActionOutcome::ok())
    }

    fn page_state(&mut self) -> anyhow::Result<PageState> {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        if let Some(delay) = self.page_delay {
            std::thread::sleep(delay);
        }
        let n = self.tracker.page_reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_page_state_at == Some(n) {
            panic!("driver bug: snapshot index out of range");
        }
        if self.fail_page_state_at == Some(n) {
            return Err(anyhow!("browser crashed"));
        }
        Ok(self.current_page())
    }
}

/// Factory handing out fresh drivers with the same script.
pub struct FakeFactory {
    pub shops: Vec<(String, f64)>,
}

impl DriverFactory for FakeFactory {
    fn create(&self, _headless: bool) -> Box<dyn PageDriver> {
        Box::new(shop_web(&self.shops))
    }
}

/// Factory whose drivers crawl an empty web slowly, so missions stay running.
pub struct SlowFactory {
    pub delay: Duration,
}

impl DriverFactory for SlowFactory {
    fn create(&self, _headless: bool) -> Box<dyn PageDriver> {
        Box::new(FakeDriver::new().slow(self.delay))
    }
}

pub fn link(id: &str, text: &str, href: &str) -> PageElement {
    PageElement {
        tag: "a".into(),
        id: Some(id.into()),
        text: text.into(),
        href: Some(href.into()),
        eid: None,
    }
}

/// A product page with one BRL price and enough words to be extracted.
pub fn shop_page(url: &str, price: f64) -> PageState {
    let price = format!("{price:.2}").replace('.', ",");
    let filler = "produto de qualidade para treino ".repeat(30);
    PageState {
        url: url.into(),
        title: "Creatina Monohidratada 300g".into(),
        visible_text: format!("Creatina Monohidratada 300g\nPor R$ {price} à vista\n{filler}"),
        elements: vec![],
    }
}

/// Search results linking to every shop, plus the shop pages themselves.
pub fn shop_web(shops: &[(String, f64)]) -> FakeDriver {
    let links = shops
        .iter()
        .enumerate()
        .map(|(i, (url, _))| link(&format!("r{i}"), &format!("Creatina oferta {i}"), url))
        .collect();
    shops
        .iter()
        .fold(FakeDriver::new().results(links), |driver, (url, price)| {
            driver.page(shop_page(url, *price))
        })
}

pub fn three_shops() -> Vec<(String, f64)> {
    vec![
        ("https://www.mercadolivre.com.br/creatina-a".to_string(), 50.0),
        ("https://www.amazon.com.br/creatina-b".to_string(), 55.0),
        ("https://www.zoom.com.br/creatina-c".to_string(), 60.0),
    ]
}

/// Drain a mission stream up to and including `finished`.
pub async fn collect(stream: &mut MissionStream) -> Vec<MissionEvent> {
    let mut events = Vec::new();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(10), stream.next())
            .await
            .expect("mission stalled");
        match next {
            Some(MissionEvent::Finished) => {
                events.push(MissionEvent::Finished);
                break;
            }
            Some(event) => events.push(event),
            None => break,
        }
    }
    events
}
