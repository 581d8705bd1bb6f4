//! Regex-based field extraction over a page snapshot.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use crate::types::{ExtractedRecord, PageState};

/// Turns the visible content of a page into named fields.
pub trait DataExtractor: Send + Sync {
    fn extract_structured_data(&self, page: &PageState, fields: &[String]) -> ExtractedRecord;
}

static BRL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"R\$\s*(\d[\d.,]*)").expect("BRL pattern is valid"));
static USD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^R])\$\s*(\d[\d.,]*)").expect("USD pattern is valid"));
static EUR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"€\s*(\d[\d.,]*)").expect("EUR pattern is valid"));
static UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d+(?:[.,]\d+)?\s*(?:mg|g|kg|ml|l|un|unidades?)\b")
        .expect("unit pattern is valid")
});
static SPEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*([^:=\n]{1,49}?)\s*[:=]\s*(\S[^\n]{0,198})$")
        .expect("specification pattern is valid")
});

const NAME_HINTS: &[&str] = &["product", "item", "title", "name"];
const MAX_PRODUCT_NAMES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
    Brl,
    Usd,
    Eur,
}

impl Currency {
    fn code(self) -> &'static str {
        match self {
            Currency::Brl => "BRL",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Currency::Brl => &BRL_RE,
            Currency::Usd => &USD_RE,
            Currency::Eur => &EUR_RE,
        }
    }
}

/// Default extractor: literal patterns, no page understanding.
#[derive(Debug, Clone)]
pub struct RegexExtractor {
    currency: Currency,
}

impl Default for RegexExtractor {
    fn default() -> Self {
        Self {
            currency: Currency::Brl,
        }
    }
}

impl RegexExtractor {
    pub fn new(currency: Currency) -> Self {
        Self { currency }
    }

    pub fn prices(&self, text: &str) -> Vec<Value> {
        self.currency
            .pattern()
            .captures_iter(text)
            .filter_map(|caps| {
                let raw = caps.get(0)?.as_str().trim();
                let amount = parse_amount(caps.get(1)?.as_str(), self.currency)?;
                Some(json!({
                    "value": amount,
                    "currency": self.currency.code(),
                    "raw": raw,
                }))
            })
            .collect()
    }

    pub fn product_names(&self, page: &PageState) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();

        for element in &page.elements {
            let text = element.text.trim();
            if text.len() <= 3 || text.len() >= 200 {
                continue;
            }
            let id = element.id.as_deref().unwrap_or_default().to_lowercase();
            if NAME_HINTS.iter().any(|h| id.contains(h)) || UNIT_RE.is_match(text) {
                push_unique(&mut names, &mut seen, text);
            }
        }

        for line in page.visible_text.lines().map(str::trim) {
            if line.len() > 5 && line.len() < 150 && UNIT_RE.is_match(line) {
                push_unique(&mut names, &mut seen, line);
            }
        }

        names.truncate(MAX_PRODUCT_NAMES);
        names
    }

    pub fn description(&self, page: &PageState) -> String {
        page.visible_text
            .lines()
            .map(str::trim)
            .find(|line| line.len() > 50 && line.len() < 500)
            .map(str::to_string)
            .unwrap_or_else(|| page.visible_text.chars().take(300).collect())
    }

    pub fn specifications(&self, page: &PageState) -> Map<String, Value> {
        SPEC_RE
            .captures_iter(&page.visible_text)
            .filter_map(|caps| {
                let key = caps.get(1)?.as_str().trim();
                let value = caps.get(2)?.as_str().trim();
                (!key.is_empty()).then(|| (key.to_string(), Value::String(value.to_string())))
            })
            .collect()
    }

    fn snippet(&self, page: &PageState, field: &str) -> Value {
        let lower = page.visible_text.to_lowercase();
        let needle = field.to_lowercase().replace('_', " ");
        let Some(idx) = lower.find(&needle) else {
            return Value::Null;
        };
        let start = floor_char_boundary(&lower, idx.saturating_sub(50));
        let end = floor_char_boundary(&lower, (idx + 100).min(lower.len()));
        Value::String(lower[start..end].trim().to_string())
    }
}

impl DataExtractor for RegexExtractor {
    fn extract_structured_data(&self, page: &PageState, fields: &[String]) -> ExtractedRecord {
        let mut out = Map::new();
        for field in fields {
            let value = match field.as_str() {
                "prices" => Value::Array(self.prices(&page.visible_text)),
                "product_names" => json!(self.product_names(page)),
                "url" => json!(page.url),
                "title" => json!(page.title),
                "description" | "descriptions" => json!(self.description(page)),
                "specifications" => Value::Object(self.specifications(page)),
                other => self.snippet(page, other),
            };
            out.insert(field.clone(), value);
        }
        ExtractedRecord::new(out)
    }
}

fn push_unique(names: &mut Vec<String>, seen: &mut HashSet<String>, text: &str) {
    if seen.insert(text.to_string()) {
        names.push(text.to_string());
    }
}

/// `1.234,56` for BRL/EUR, `1,234.56` for USD.
fn parse_amount(raw: &str, currency: Currency) -> Option<f64> {
    let raw = raw.trim_end_matches(['.', ',']);
    let normalized = match currency {
        Currency::Usd => raw.replace(',', ""),
        Currency::Brl | Currency::Eur => raw.replace('.', "").replace(',', "."),
    };
    normalized.parse().ok()
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
