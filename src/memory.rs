//! Per-mission memory: what was done, where, and what was found.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{ActionCommand, ExtractedRecord};

pub const DEFAULT_LOOP_THRESHOLD: u32 = 3;

const SUMMARY_MAX_SOURCES: usize = 10;
const SUMMARY_RECENT_ACTIONS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub command: ActionCommand,
    pub url: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// Ledger of one mission. Owned by the mission worker; the brain only reads it.
#[derive(Debug, Clone)]
pub struct VisitLedger {
    loop_threshold: u32,
    visit_counts: HashMap<String, u32>,
    sources: Vec<String>,
    extracted: Vec<ExtractedRecord>,
    history: Vec<ActionRecord>,
}

impl Default for VisitLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LOOP_THRESHOLD)
    }
}

impl VisitLedger {
    pub fn new(loop_threshold: u32) -> Self {
        Self {
            loop_threshold,
            visit_counts: HashMap::new(),
            sources: Vec::new(),
            extracted: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Log an action performed at `url` and bump that URL's visit count.
    pub fn record_action(&mut self, command: &ActionCommand, url: &str, result: impl Into<String>) {
        self.history.push(ActionRecord {
            command: command.clone(),
            url: url.to_string(),
            result: result.into(),
            timestamp: Utc::now(),
        });
        *self.visit_counts.entry(url.to_string()).or_insert(0) += 1;
    }

    pub fn record_extraction(&mut self, record: ExtractedRecord) {
        self.extracted.push(record);
    }

    /// Remember `url` as a source. Returns false if it was already one.
    pub fn mark_source(&mut self, url: &str) -> bool {
        if self.is_source(url) {
            return false;
        }
        self.sources.push(url.to_string());
        true
    }

    pub fn is_source(&self, url: &str) -> bool {
        self.sources.iter().any(|s| s == url)
    }

    pub fn visit_count(&self, url: &str) -> u32 {
        self.visit_counts.get(url).copied().unwrap_or(0)
    }

    pub fn is_loop_on(&self, url: &str) -> bool {
        self.visit_count(url) >= self.loop_threshold
    }

    pub fn loop_threshold(&self) -> u32 {
        self.loop_threshold
    }

    pub fn recent_actions(&self, n: usize) -> &[ActionRecord] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn actions(&self) -> &[ActionRecord] {
        &self.history
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn extracted(&self) -> &[ExtractedRecord] {
        &self.extracted
    }

    /// Every numeric price collected so far, in ingestion order.
    pub fn all_prices(&self) -> Vec<f64> {
        self.extracted
            .iter()
            .flat_map(ExtractedRecord::price_values)
            .collect()
    }

    pub fn summary(&self) -> String {
        let mut out = String::from("Research Summary\n");
        let _ = writeln!(out, "Total actions: {}", self.history.len());
        let _ = writeln!(out, "Sources visited: {}", self.sources.len());
        let _ = writeln!(out, "Extracted data points: {}", self.extracted.len());

        let total_prices: usize = self
            .extracted
            .iter()
            .map(|r| match r.fields.get("prices") {
                Some(serde_json::Value::Array(items)) => items.len(),
                Some(_) => 1,
                None => 0,
            })
            .sum();
        if total_prices > 0 {
            let _ = writeln!(out, "Total prices found: {total_prices}");
        }

        if !self.sources.is_empty() {
            out.push_str("\nSources consulted:\n");
            for (i, source) in self.sources.iter().take(SUMMARY_MAX_SOURCES).enumerate() {
                let _ = writeln!(out, "  {}. {}", i + 1, source);
            }
        }

        out.push_str("\nRecent actions:\n");
        for action in self.recent_actions(SUMMARY_RECENT_ACTIONS) {
            let _ = writeln!(out, "  - {} on {}", action.command.name(), action.url);
        }
        out
    }
}
