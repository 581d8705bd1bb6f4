//! The decision engine: page state in, exactly one action out.
//!
//! Rules are checked top to bottom and the first one that applies wins:
//! iteration cap, loop guard, extraction (and the average shortcut),
//! search home, search results, content page, keyword fallback, default.
//! The brain never touches the ledger; whatever it extracted comes back in
//! the [`Decision`] for the caller to commit.

use std::borrow::Cow;
use std::sync::Arc;

use serde_json::{Map, json};
use url::Url;

use crate::config::AgentSettings;
use crate::extractor::DataExtractor;
use crate::memory::VisitLedger;
use crate::types::{
    ActionCommand, ExtractedRecord, GoalIntent, PageElement, PageState, ResearchType,
    ScrollDirection,
};

const CONTENT_INDICATORS: &[&str] = &[
    "r$",
    "preço",
    "price",
    "valor",
    "custo",
    "produto",
    "product",
    "item",
    "marca",
    "especificação",
    "specification",
    "característica",
    "informação",
    "information",
    "dados",
    "data",
    "análise",
    "analysis",
    "comparação",
    "comparison",
    "revisão",
    "review",
    "avaliação",
    "evaluation",
];

const SEARCH_ENGINES: &[&str] = &["google.", "bing.com", "duckduckgo.com"];
const RESULTS_MARKERS: &[&str] = &["google.com/search", "bing.com/search", "duckduckgo.com/?q="];
const SEARCH_INPUT_FALLBACK: &str =
    "textarea[name='q'], input[name='q'], input[type='search'], input[type='text']";
const MIN_PRICES_FOR_AVERAGE: usize = 3;
const MIN_LINK_TEXT_CHARS: usize = 5;

/// What the brain wants to happen next.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub thought_process: String,
    pub reasoning: String,
    pub action: ActionCommand,
    pub goal_achieved: bool,
    /// Records extracted while deciding, in the order they should be stored.
    pub records: Vec<ExtractedRecord>,
    /// URL to register as a visited source.
    pub new_source: Option<String>,
}

impl Decision {
    fn new(
        thought_process: impl Into<String>,
        reasoning: impl Into<String>,
        action: ActionCommand,
    ) -> Self {
        Self {
            thought_process: thought_process.into(),
            reasoning: reasoning.into(),
            action,
            goal_achieved: false,
            records: Vec::new(),
            new_source: None,
        }
    }

    fn finish(
        thought_process: impl Into<String>,
        reasoning: impl Into<String>,
        summary: String,
        goal_achieved: bool,
    ) -> Self {
        Self {
            goal_achieved,
            ..Self::new(thought_process, reasoning, ActionCommand::Finish { summary })
        }
    }

    fn scroll_down(thought_process: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self::new(
            thought_process,
            reasoning,
            ActionCommand::Scroll {
                direction: ScrollDirection::Down,
            },
        )
    }

    pub fn rationale(&self) -> String {
        format!("{} {}", self.thought_process, self.reasoning)
    }
}

pub struct Brain {
    settings: Arc<AgentSettings>,
    max_iterations: u32,
    min_sources: usize,
}

impl Brain {
    pub fn new(settings: Arc<AgentSettings>, max_iterations: u32, min_sources: usize) -> Self {
        Self {
            settings,
            max_iterations,
            min_sources,
        }
    }

    /// Pick the next action. `iteration` is 1-based and rises by one per call.
    pub fn decide(
        &self,
        state: &PageState,
        ledger: &VisitLedger,
        intent: &GoalIntent,
        iteration: u32,
        extractor: &dyn DataExtractor,
    ) -> Decision {
        if iteration >= self.max_iterations {
            return Decision::finish(
                "Maximum iterations reached. Finishing mission.",
                "Preventing infinite loops.",
                ledger.summary(),
                false,
            );
        }

        let url = state.url.as_str();
        if ledger.is_loop_on(url) {
            return Decision::new(
                format!("Loop detected on {url}. Changing strategy."),
                format!(
                    "Visited this URL {}+ times. Need to try a different approach.",
                    ledger.loop_threshold()
                ),
                ActionCommand::Goto {
                    url: self.settings.search_home_url.clone(),
                },
            );
        }

        let eligible = self.should_extract_data(state);
        let mut staged = Cow::Borrowed(ledger);
        let mut records = Vec::new();
        let mut new_source = None;

        if eligible && !ledger.is_source(url) {
            let mut fields: Vec<String> = intent.target_fields.iter().cloned().collect();
            fields.extend(["url".to_string(), "title".to_string()]);
            let record = extractor.extract_structured_data(state, &fields);

            let working = staged.to_mut();
            working.record_extraction(record.clone());
            working.mark_source(url);
            records.push(record);
            new_source = Some(url.to_string());

            if intent.research_type == ResearchType::AverageCalculation {
                let prices = working.all_prices();
                if prices.len() >= MIN_PRICES_FOR_AVERAGE {
                    let average = prices.iter().sum::<f64>() / prices.len() as f64;
                    let derived = average_record(average, prices.len());
                    working.record_extraction(derived.clone());
                    records.push(derived);

                    let mut decision = Decision::finish(
                        format!(
                            "Collected data from {} sources. Average calculated from {} prices.",
                            working.sources().len(),
                            prices.len()
                        ),
                        "Sufficient data gathered from multiple sources to calculate average.",
                        working.summary(),
                        true,
                    );
                    decision.records = records;
                    decision.new_source = new_source;
                    return decision;
                }
            }
        }

        let mut decision = self.navigate(state, &staged, intent, eligible);
        decision.records = records;
        decision.new_source = new_source;
        decision
    }

    /// Phase logic once extraction has been handled.
    fn navigate(
        &self,
        state: &PageState,
        ledger: &VisitLedger,
        intent: &GoalIntent,
        eligible: bool,
    ) -> Decision {
        let sources = ledger.sources().len();
        let enough = sources >= self.min_sources;

        if self.is_search_home(&state.url) {
            let query = intent.primary_query().to_string();
            return Decision::new(
                format!("Starting comprehensive research. Searching for: {query}"),
                "Beginning multi-source research. Will visit multiple sources to gather structured data.",
                ActionCommand::Type {
                    selector: self.find_search_input(state),
                    text: query,
                    press_enter: true,
                },
            );
        }

        if self.is_search_results(&state.url) {
            let mut candidates = self.candidate_links(state, intent, ledger);
            candidates.sort_by_key(|(el, _)| if self.is_trusted_link(el) { 0 } else { 1 });

            if !enough {
                if let Some((el, selector)) = candidates.into_iter().next() {
                    let label: String = el.text.chars().take(50).collect();
                    return Decision::new(
                        format!("Found relevant source: {label}. Visiting to collect structured data."),
                        format!(
                            "Visiting source {} of {} minimum. Collecting comprehensive data.",
                            sources + 1,
                            self.min_sources
                        ),
                        ActionCommand::Click { selector },
                    );
                }
                return Decision::scroll_down(
                    "Scrolling search results to find more relevant sources.",
                    "Need more sources. Scrolling to reveal additional search results.",
                );
            }
            return Decision::finish(
                format!("Collected data from {sources} sources. Consolidating results."),
                "Sufficient sources visited. Ready to consolidate data.",
                ledger.summary(),
                true,
            );
        }

        if eligible {
            if !enough {
                let last = intent.search_queries.len().saturating_sub(1);
                let query = intent
                    .search_queries
                    .get(sources.min(last))
                    .map(String::as_str)
                    .unwrap_or_else(|| intent.primary_query());
                return Decision::new(
                    format!(
                        "Data extracted from current source. Need {} more sources. Returning to search.",
                        self.min_sources - sources
                    ),
                    "Continuing multi-source research. Going back to search for more sources.",
                    ActionCommand::Goto {
                        url: self.search_url(query),
                    },
                );
            }
            return Decision::finish(
                format!("Collected comprehensive data from {sources} sources. Consolidating results."),
                "Sufficient sources visited. Ready to consolidate structured data.",
                ledger.summary(),
                true,
            );
        }

        let text = state.visible_text.to_lowercase();
        if intent.keywords.iter().any(|k| text.contains(k.as_str())) {
            let next = self.candidate_links(state, intent, ledger).into_iter().next();
            if let (Some((_, selector)), false) = (next, enough) {
                return Decision::new(
                    "Found relevant link on page. Following to collect more data.",
                    "Following link to expand data collection from an additional source.",
                    ActionCommand::Click { selector },
                );
            }
            return Decision::scroll_down(
                "Relevant content found. Scrolling to find more information or links.",
                "Scrolling to reveal more content or navigation options.",
            );
        }

        if !enough {
            return Decision::new(
                "No clear action. Returning to search to find more sources.",
                format!(
                    "Need more sources ({} remaining). Going back to search.",
                    self.min_sources - sources
                ),
                ActionCommand::Goto {
                    url: self.settings.search_home_url.clone(),
                },
            );
        }

        Decision::scroll_down(
            "Scrolling to reveal more content.",
            "Scrolling down to trigger lazy loading or reveal hidden elements.",
        )
    }

    /// Whether this page is worth extracting: not a skipped domain, carries
    /// content vocabulary and has enough words.
    pub fn should_extract_data(&self, state: &PageState) -> bool {
        let url = state.url.to_lowercase();
        if self.settings.skip_domains.iter().any(|d| url.contains(d.as_str())) {
            return false;
        }

        let text = state.visible_text.to_lowercase();
        let has_content = CONTENT_INDICATORS.iter().any(|i| text.contains(i));
        let word_count = text.split_whitespace().count();
        has_content && word_count > self.settings.min_word_count
    }

    pub fn is_trusted_source(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.settings
            .trusted_domains
            .iter()
            .any(|d| url.contains(d.as_str()))
    }

    fn is_trusted_link(&self, element: &PageElement) -> bool {
        element
            .href
            .as_deref()
            .is_some_and(|href| !href.is_empty() && self.is_trusted_source(href))
    }

    pub fn should_visit_link(
        &self,
        element: &PageElement,
        intent: &GoalIntent,
        ledger: &VisitLedger,
    ) -> bool {
        let text = element.text.trim().to_lowercase();
        let href = element.href.as_deref().unwrap_or_default();

        let has_keywords = intent.keywords.iter().any(|k| text.contains(k.as_str()));
        let is_trusted = self.is_trusted_link(element);
        let is_new = href.is_empty() || !ledger.is_source(href);

        (has_keywords || is_trusted) && is_new && text.chars().count() > MIN_LINK_TEXT_CHARS
    }

    /// Links worth following, in page order, paired with their selector.
    fn candidate_links<'a>(
        &self,
        state: &'a PageState,
        intent: &GoalIntent,
        ledger: &VisitLedger,
    ) -> Vec<(&'a PageElement, String)> {
        state
            .elements
            .iter()
            .filter(|el| el.tag == "a" && !el.text.trim().is_empty())
            .filter(|el| self.should_visit_link(el, intent, ledger))
            .filter_map(|el| el.selector().map(|s| (el, s)))
            .collect()
    }

    pub fn find_search_input(&self, state: &PageState) -> String {
        let inputs: Vec<&PageElement> = state
            .elements
            .iter()
            .filter(|el| el.tag == "input" || el.tag == "textarea")
            .collect();

        let preferred = inputs.iter().find(|el| {
            el.id.as_deref().is_some_and(|id| {
                let id = id.to_lowercase();
                id.contains("search") || id == "q"
            })
        });

        preferred
            .or_else(|| inputs.iter().find(|el| el.selector().is_some()))
            .and_then(|el| el.selector())
            .unwrap_or_else(|| SEARCH_INPUT_FALLBACK.to_string())
    }

    pub fn is_search_results(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        let configured = self.settings.search_results_url.to_lowercase();
        RESULTS_MARKERS.iter().any(|m| url.contains(m))
            || (!configured.is_empty() && url.starts_with(&configured))
    }

    pub fn is_search_home(&self, url: &str) -> bool {
        let trimmed = url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return true;
        }
        if self.is_search_results(url) {
            return false;
        }
        let lower = trimmed.to_lowercase();
        lower == self.settings.search_home_url.to_lowercase().trim_end_matches('/')
            || SEARCH_ENGINES.iter().any(|e| lower.contains(e))
    }

    /// Results page URL for `query` on the configured engine.
    pub fn search_url(&self, query: &str) -> String {
        Url::parse_with_params(&self.settings.search_results_url, &[("q", query)])
            .map(String::from)
            .unwrap_or_else(|_| self.settings.search_home_url.clone())
    }
}

fn average_record(average: f64, count: usize) -> ExtractedRecord {
    let mut fields = Map::new();
    fields.insert("average_price".to_string(), json!(average));
    fields.insert("currency".to_string(), json!("BRL"));
    fields.insert("price_count".to_string(), json!(count));
    ExtractedRecord::new(fields)
}
