use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::{NotionError, Result};

/// A database row as returned by `databases/{id}/query` or `pages`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
}

/// One decoded property value. Only the types this backend maps are
/// modelled; everything else lands in `Unsupported`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyValue {
    Title {
        #[serde(default)]
        title: Vec<RichText>,
    },
    RichText {
        #[serde(default)]
        rich_text: Vec<RichText>,
    },
    Select {
        select: Option<SelectOption>,
    },
    Checkbox {
        #[serde(default)]
        checkbox: bool,
    },
    Number {
        number: Option<f64>,
    },
    #[serde(other)]
    Unsupported,
}

impl PropertyValue {
    pub fn kind(&self) -> &'static str {
        match self {
            PropertyValue::Title { .. } => "title",
            PropertyValue::RichText { .. } => "rich_text",
            PropertyValue::Select { .. } => "select",
            PropertyValue::Checkbox { .. } => "checkbox",
            PropertyValue::Number { .. } => "number",
            PropertyValue::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RichText {
    #[serde(default)]
    pub plain_text: Option<String>,
    #[serde(default)]
    pub text: Option<TextContent>,
}

impl RichText {
    fn content(&self) -> &str {
        self.plain_text
            .as_deref()
            .or_else(|| self.text.as_ref().map(|t| t.content.as_str()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TextContent {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SelectOption {
    pub name: String,
}

fn join_segments(segments: &[RichText]) -> String {
    segments.iter().map(RichText::content).collect()
}

impl Page {
    fn property(&self, name: &str, expected: &'static str) -> Result<Option<&PropertyValue>> {
        match self.properties.get(name) {
            None => Ok(None),
            Some(value) if value.kind() == expected => Ok(Some(value)),
            Some(value) => Err(NotionError::UnexpectedPropertyType {
                name: name.to_string(),
                expected,
                found: value.kind(),
            }),
        }
    }

    pub fn title(&self, name: &str) -> Result<Option<String>> {
        Ok(match self.property(name, "title")? {
            Some(PropertyValue::Title { title }) => Some(join_segments(title)),
            _ => None,
        })
    }

    pub fn rich_text(&self, name: &str) -> Result<Option<String>> {
        Ok(match self.property(name, "rich_text")? {
            Some(PropertyValue::RichText { rich_text }) => Some(join_segments(rich_text)),
            _ => None,
        })
    }

    pub fn select(&self, name: &str) -> Result<Option<String>> {
        Ok(match self.property(name, "select")? {
            Some(PropertyValue::Select { select }) => select.as_ref().map(|s| s.name.clone()),
            _ => None,
        })
    }

    pub fn checkbox(&self, name: &str) -> Result<Option<bool>> {
        Ok(match self.property(name, "checkbox")? {
            Some(PropertyValue::Checkbox { checkbox }) => Some(*checkbox),
            _ => None,
        })
    }

    pub fn number(&self, name: &str) -> Result<Option<f64>> {
        Ok(match self.property(name, "number")? {
            Some(PropertyValue::Number { number }) => *number,
            _ => None,
        })
    }

    /// A number property that must hold an integer exactly representable
    /// in an `f64`.
    pub fn integer(&self, name: &str) -> Result<Option<i64>> {
        const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
        match self.number(name)? {
            None => Ok(None),
            Some(value) if value.fract() == 0.0 && value.abs() <= MAX_EXACT => Ok(Some(value as i64)),
            Some(value) => Err(NotionError::NonIntegralNumber {
                name: name.to_string(),
                value,
            }),
        }
    }

    /// Names of properties that decoded to no known type.
    pub fn unsupported_properties(&self) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|(_, v)| matches!(v, PropertyValue::Unsupported))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

// Request-side property payloads for page creation

pub fn title_property(text: &str) -> Value {
    json!({ "title": [{ "text": { "content": text } }] })
}

pub fn rich_text_property(text: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": text } }] })
}

pub fn select_property(name: &str) -> Value {
    json!({ "select": { "name": name } })
}

pub fn number_property(value: f64) -> Value {
    json!({ "number": value })
}

/// Filter matching rows whose rich-text property equals `value`.
pub fn rich_text_equals(property: &str, value: &str) -> Value {
    json!({ "property": property, "rich_text": { "equals": value } })
}
