//! Result Renderer
//!
//! Pure transformation of backend JSON (profile records, search hit collections)
//! into Adaptive Card documents.
//!
//! Search payloads are loosely shaped: any field may be missing, `searchTerms`
//! arrives as a string or as an array of strings, and scalars sometimes come
//! back as numbers. Inputs are therefore deserialized leniently and every
//! nested lookup goes through an optional chain that falls back to `""`, so a
//! bad hit degrades to blank cells instead of failing the whole card.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const ADAPTIVE_CARD_SCHEMA: &str = "http://adaptivecards.io/schemas/adaptive-card.json";
pub const ADAPTIVE_CARD_VERSION: &str = "1.6";
pub const ADAPTIVE_CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.adaptive";

/// Rendering errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Malformed search payload: {0}")]
    Malformed(String),
}

// ============================================================================
// Inputs
// ============================================================================

/// Identity graph profile (`/v1.0/me`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResult {
    #[serde(default, deserialize_with = "lenient::string")]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mail: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub preferred_language: Option<String>,
}

impl ProfileResult {
    pub fn from_value(value: &Value) -> Result<Self, RenderError> {
        if !value.is_object() {
            return Err(RenderError::Malformed("profile is not an object".into()));
        }
        serde_json::from_value(value.clone()).map_err(|e| RenderError::Malformed(e.to_string()))
    }
}

/// Search response: `{ value: [SearchContainer] }`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResultSet {
    #[serde(default, deserialize_with = "lenient::list")]
    pub value: Vec<SearchContainer>,
}

impl SearchResultSet {
    /// Parse a search payload. Only an unusable top level is an error; anything
    /// missing further down is tolerated.
    pub fn from_value(value: &Value) -> Result<Self, RenderError> {
        let object = value
            .as_object()
            .ok_or_else(|| RenderError::Malformed("expected an object".into()))?;
        if let Some(inner) = object.get("value") {
            if !inner.is_array() && !inner.is_null() {
                return Err(RenderError::Malformed("`value` is not an array".into()));
            }
        }
        serde_json::from_value(value.clone()).map_err(|e| RenderError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchContainer {
    #[serde(default, deserialize_with = "lenient::terms")]
    pub search_terms: Option<String>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub hits_containers: Vec<HitsContainer>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HitsContainer {
    #[serde(default, deserialize_with = "lenient::count")]
    pub total: u64,
    #[serde(default, deserialize_with = "lenient::list")]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Hit {
    #[serde(default, deserialize_with = "lenient::object")]
    pub resource: Option<HitResource>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitResource {
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub web_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub last_modified_date_time: Option<String>,
    #[serde(default, deserialize_with = "lenient::object")]
    pub last_modified_by: Option<IdentitySet>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IdentitySet {
    #[serde(default, deserialize_with = "lenient::object")]
    pub user: Option<Identity>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default, deserialize_with = "lenient::string")]
    pub display_name: Option<String>,
}

impl Hit {
    pub fn name(&self) -> &str {
        or_blank(self.resource.as_ref().and_then(|r| r.name.as_deref()))
    }

    pub fn web_url(&self) -> &str {
        or_blank(self.resource.as_ref().and_then(|r| r.web_url.as_deref()))
    }

    pub fn last_modified(&self) -> &str {
        or_blank(
            self.resource
                .as_ref()
                .and_then(|r| r.last_modified_date_time.as_deref()),
        )
    }

    /// `resource.lastModifiedBy.user.displayName`
    pub fn modified_by(&self) -> &str {
        or_blank(
            self.resource
                .as_ref()
                .and_then(|r| r.last_modified_by.as_ref())
                .and_then(|by| by.user.as_ref())
                .and_then(|user| user.display_name.as_deref()),
        )
    }

    pub fn summary(&self) -> &str {
        or_blank(self.summary.as_deref())
    }
}

/// Sentinel for absent fields
fn or_blank(value: Option<&str>) -> &str {
    value.unwrap_or("")
}

/// Tolerant field deserializers: wrong shapes become "absent", never an error
mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn scalar_text(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.as_ref().and_then(scalar_text))
    }

    /// A single string, or an array of strings joined with spaces
    pub fn terms<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(scalar_text)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            other => other.as_ref().and_then(scalar_text),
        })
    }

    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
                .unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        })
    }

    pub fn object<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(v @ Value::Object(_)) => serde_json::from_value(v).ok(),
            _ => None,
        })
    }

    /// Array elements that fail to parse become `T::default()`, keeping one entry per element
    pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| serde_json::from_value(item).unwrap_or_default())
                .collect(),
            _ => Vec::new(),
        })
    }
}

// ============================================================================
// Card document
// ============================================================================

/// Adaptive Card. Built once by the render functions, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    #[serde(rename = "type")]
    kind: String,
    body: Vec<Element>,
    #[serde(rename = "$schema")]
    schema: String,
    version: String,
}

impl Card {
    fn new(body: Vec<Element>) -> Self {
        Self {
            kind: "AdaptiveCard".to_string(),
            body,
            schema: ADAPTIVE_CARD_SCHEMA.to_string(),
            version: ADAPTIVE_CARD_VERSION.to_string(),
        }
    }

    pub fn body(&self) -> &[Element] {
        &self.body
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Element {
    TextBlock(TextBlock),
    FactSet(FactSet),
    Container(Container),
    ActionSet(ActionSet),
    RichTextBlock(RichTextBlock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextSize {
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextWeight {
    Bolder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<TextSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<TextWeight>,
    pub text: String,
}

impl TextBlock {
    /// Medium, bold line
    pub fn heading(text: impl Into<String>) -> Self {
        Self {
            size: Some(TextSize::Medium),
            weight: Some(TextWeight::Bolder),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fact {
    pub title: String,
    pub value: String,
}

impl Fact {
    pub fn new(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactSet {
    pub facts: Vec<Fact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStyle {
    Emphasis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Container {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub separator: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ContainerStyle>,
    pub items: Vec<Element>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSet {
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename = "Action.OpenUrl")]
    OpenUrl { title: String, url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RichTextBlock {
    pub inlines: Vec<Inline>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Inline {
    TextRun { text: String },
}

/// Card wrapped for delivery on the chat surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub content_type: String,
    pub content: Card,
}

impl Attachment {
    pub fn adaptive_card(card: Card) -> Self {
        Self {
            content_type: ADAPTIVE_CARD_CONTENT_TYPE.to_string(),
            content: card,
        }
    }
}

// ============================================================================
// Renderers
// ============================================================================

/// Welcome card with exactly three facts: Name, Email, Preferred Language
pub fn render_profile(profile: &ProfileResult) -> Card {
    let facts = vec![
        Fact::new("Name", or_blank(profile.display_name.as_deref())),
        Fact::new("Email", or_blank(profile.mail.as_deref())),
        Fact::new(
            "Preferred Language",
            or_blank(profile.preferred_language.as_deref()),
        ),
    ];

    Card::new(vec![
        Element::TextBlock(TextBlock::heading("Welcome!")),
        Element::FactSet(FactSet { facts }),
    ])
}

/// One card listing every hit of every non-empty hits container, in source order.
///
/// The header shows the search terms of the *last* container in `value`; earlier
/// containers' terms are overwritten.
pub fn render_search_results(results: &SearchResultSet) -> Card {
    let mut search_terms = String::new();
    let mut items = Vec::new();

    for container in &results.value {
        search_terms = container.search_terms.clone().unwrap_or_default();

        for hits in &container.hits_containers {
            if hits.total == 0 {
                continue;
            }
            items.extend(hits.hits.iter().map(render_hit));
        }
    }

    Card::new(vec![
        Element::TextBlock(TextBlock::heading(format!(
            "Search results for: {}",
            search_terms
        ))),
        Element::Container(Container {
            separator: false,
            style: None,
            items,
        }),
    ])
}

fn render_hit(hit: &Hit) -> Element {
    Element::Container(Container {
        separator: true,
        style: Some(ContainerStyle::Emphasis),
        items: vec![
            Element::TextBlock(TextBlock::heading(hit.name())),
            Element::RichTextBlock(RichTextBlock {
                inlines: vec![Inline::TextRun {
                    text: hit.summary().to_string(),
                }],
            }),
            Element::FactSet(FactSet {
                facts: vec![
                    Fact::new("lastModifiedDateTime", hit.last_modified()),
                    Fact::new("lastModifiedBy", hit.modified_by()),
                ],
            }),
            Element::ActionSet(ActionSet {
                actions: vec![Action::OpenUrl {
                    title: hit.name().to_string(),
                    url: hit.web_url().to_string(),
                }],
            }),
        ],
    })
}
