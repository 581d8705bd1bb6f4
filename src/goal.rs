//! Turns a free-text research goal into a [`GoalIntent`].
//!
//! The parsing is deliberately literal: a handful of Portuguese and English
//! tokens and two bounded patterns. When a pattern does not match, the field
//! is left empty and analysis carries on.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{GoalIntent, ResearchType};

const PRICE_TOKENS: &[&str] = &["preço", "preco", "price"];
const AVERAGE_TOKENS: &[&str] = &["média", "media", "médio", "medio", "average"];

pub const BASELINE_FIELDS: &[&str] = &[
    "prices",
    "product_names",
    "descriptions",
    "specifications",
    "reviews",
    "comparisons",
];

static TOPIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:preço|price|de|of|sobre|about)\s+(?:(?:médio|média|medio|media|average)\s+)?(?:(?:de|of|do|da|dos|das)\s+)?(.+?)(?:\s+(?:em|in|no|na|brasil|brazil)\b|\s*\?|$)",
    )
    .expect("topic pattern is valid")
});

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:em|in|no|na)\s+([^?]+)").expect("location pattern is valid")
});

/// Analyze a goal. Same input, same output.
pub fn analyze(goal: &str) -> GoalIntent {
    let lower = goal.to_lowercase();

    let mut research_type = ResearchType::General;
    if PRICE_TOKENS.iter().any(|t| lower.contains(t)) {
        research_type = ResearchType::PriceResearch;
    }
    if AVERAGE_TOKENS.iter().any(|t| lower.contains(t)) {
        research_type = ResearchType::AverageCalculation;
    }

    let topic = capture(&TOPIC_RE, &lower);
    let location = capture(&LOCATION_RE, &lower);

    let keywords: Vec<String> = [topic.clone(), location]
        .into_iter()
        .filter(|k| !k.is_empty())
        .collect();

    let search_queries = if topic.is_empty() {
        vec![goal.to_string()]
    } else {
        vec![
            topic.clone(),
            format!("{topic} preço brasil"),
            format!("{topic} mercado brasil"),
            format!("{topic} informações"),
            format!("{topic} dados"),
        ]
    };

    let mut target_fields: BTreeSet<String> =
        BASELINE_FIELDS.iter().map(|f| f.to_string()).collect();
    if research_type == ResearchType::PriceResearch {
        target_fields.insert("prices".to_string());
    }

    GoalIntent {
        research_type,
        topic,
        keywords,
        target_fields,
        search_queries,
    }
}

fn capture(re: &Regex, haystack: &str) -> String {
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_goal_in_english() {
        let intent = analyze("Find the average price of Creatine in Brazil");
        assert_eq!(intent.research_type, ResearchType::AverageCalculation);
        assert_eq!(intent.topic, "creatine");
        assert!(intent.keywords.iter().any(|k| k.contains("creatine")));
        assert_eq!(intent.search_queries[0], "creatine");
        assert_eq!(intent.search_queries[1], "creatine preço brasil");
        assert_eq!(intent.search_queries.len(), 5);
    }

    #[test]
    fn portuguese_price_goal() {
        let intent = analyze("Qual o preço de whey protein no Brasil?");
        assert_eq!(intent.research_type, ResearchType::PriceResearch);
        assert_eq!(intent.topic, "whey protein");
        assert_eq!(intent.keywords, vec!["whey protein", "brasil"]);
    }

    #[test]
    fn average_detection_does_not_need_price_tokens() {
        let intent = analyze("média salarial de programadores");
        assert_eq!(intent.research_type, ResearchType::AverageCalculation);
        assert_eq!(intent.topic, "programadores");
    }

    #[test]
    fn unmatched_goal_falls_back_to_verbatim_query() {
        let intent = analyze("Creatine");
        assert_eq!(intent.research_type, ResearchType::General);
        assert!(intent.topic.is_empty());
        assert!(intent.keywords.is_empty());
        assert_eq!(intent.search_queries, vec!["Creatine".to_string()]);
    }

    #[test]
    fn prices_field_is_not_duplicated() {
        let intent = analyze("price of rice");
        assert_eq!(intent.research_type, ResearchType::PriceResearch);
        assert_eq!(intent.target_fields.len(), BASELINE_FIELDS.len());
        assert!(intent.target_fields.contains("prices"));
    }

    #[test]
    fn analysis_is_deterministic() {
        let goal = "Find the average price of Creatine in Brazil";
        assert_eq!(analyze(goal), analyze(goal));
    }
}
