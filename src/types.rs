use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single atomic action the brain asks the driver to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "params", rename_all = "snake_case")]
pub enum ActionCommand {
    Goto {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
        press_enter: bool,
    },
    Scroll {
        direction: ScrollDirection,
    },
    Wait {
        seconds: f64,
    },
    Extract {
        fields: Vec<String>,
    },
    Finish {
        summary: String,
    },
}

impl ActionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ActionCommand::Goto { .. } => "goto",
            ActionCommand::Click { .. } => "click",
            ActionCommand::Type { .. } => "type",
            ActionCommand::Scroll { .. } => "scroll",
            ActionCommand::Wait { .. } => "wait",
            ActionCommand::Extract { .. } => "extract",
            ActionCommand::Finish { .. } => "finish",
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, ActionCommand::Finish { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// What the driver reports back after executing one action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn at(url: impl Into<String>) -> Self {
        Self {
            success: true,
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// One interactive element as seen by the page snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageElement {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub href: Option<String>,
    /// Marker the snapshot stamps as `data-eid` on the live element.
    #[serde(default)]
    pub eid: Option<String>,
}

impl PageElement {
    /// A CSS selector targeting this element: its `id` when present, else its
    /// `data-eid` stamp. Elements with neither cannot be targeted.
    pub fn selector(&self) -> Option<String> {
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            return Some(id_selector(id));
        }
        let eid = self.eid.as_deref().filter(|eid| !eid.is_empty())?;
        Some(format!("[data-eid=\"{}\"]", eid.replace('"', "\\\"")))
    }
}

fn id_selector(id: &str) -> String {
    let plain = id
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if plain {
        format!("#{id}")
    } else {
        format!("[id=\"{}\"]", id.replace('"', "\\\""))
    }
}

/// What the agent observes on the current page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub visible_text: String,
    #[serde(default)]
    pub elements: Vec<PageElement>,
}

/// A bag of extracted fields plus the moment it entered the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ExtractedRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            timestamp: Utc::now(),
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.fields.get("url").and_then(Value::as_str)
    }

    /// Numeric price values carried by this record, flattening nested lists.
    pub fn price_values(&self) -> Vec<f64> {
        let Some(prices) = self.fields.get("prices") else {
            return Vec::new();
        };
        match prices {
            Value::Array(items) => items.iter().filter_map(price_value).collect(),
            other => price_value(other).into_iter().collect(),
        }
    }
}

fn price_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(obj) => obj.get("value").and_then(Value::as_f64),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchType {
    General,
    PriceResearch,
    AverageCalculation,
}

/// Structured reading of the user's goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalIntent {
    pub research_type: ResearchType,
    pub topic: String,
    pub keywords: Vec<String>,
    pub target_fields: BTreeSet<String>,
    pub search_queries: Vec<String>,
}

impl GoalIntent {
    pub fn primary_query(&self) -> &str {
        self.search_queries
            .first()
            .map(String::as_str)
            .unwrap_or(self.topic.as_str())
    }
}

pub const VISIBLE_TEXT_MAX_CHARS: usize = 2000;
pub const ELEMENT_TEXT_MAX_CHARS: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_command_uses_name_and_params_on_the_wire() {
        let cmd = ActionCommand::Type {
            selector: "#q".into(),
            text: "creatine".into(),
            press_enter: true,
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(
            value,
            json!({"name": "type", "params": {"selector": "#q", "text": "creatine", "press_enter": true}})
        );
        assert_eq!(cmd.name(), "type");
    }

    #[test]
    fn selector_requires_an_identifier() {
        let anonymous = PageElement {
            tag: "a".into(),
            ..Default::default()
        };
        assert_eq!(anonymous.selector(), None);

        let plain = PageElement {
            tag: "a".into(),
            id: Some("result-1".into()),
            ..Default::default()
        };
        assert_eq!(plain.selector().as_deref(), Some("#result-1"));

        let odd = PageElement {
            tag: "a".into(),
            id: Some("1:odd".into()),
            ..Default::default()
        };
        assert_eq!(odd.selector().as_deref(), Some("[id=\"1:odd\"]"));
    }

    #[test]
    fn stamped_elements_without_id_use_data_eid() {
        let stamped = PageElement {
            tag: "a".into(),
            eid: Some("e7".into()),
            ..Default::default()
        };
        assert_eq!(stamped.selector().as_deref(), Some("[data-eid=\"e7\"]"));

        let both = PageElement {
            tag: "input".into(),
            id: Some("q".into()),
            eid: Some("e0".into()),
            ..Default::default()
        };
        assert_eq!(both.selector().as_deref(), Some("#q"));
    }

    #[test]
    fn price_values_flatten_objects_and_numbers() {
        let mut fields = Map::new();
        fields.insert(
            "prices".into(),
            json!([{"value": 50.0, "currency": "BRL"}, 55.5, "n/a"]),
        );
        assert_eq!(ExtractedRecord::new(fields).price_values(), vec![50.0, 55.5]);

        let mut single = Map::new();
        single.insert("prices".into(), json!(12));
        assert_eq!(ExtractedRecord::new(single).price_values(), vec![12.0]);
    }
}
