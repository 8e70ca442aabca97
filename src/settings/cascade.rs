//! Configuration cascade types.
//!
//! A cascade is the ordered list of subjects that can hold settings (site,
//! organization, user), lowest precedence first, plus the merged result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::parse::{parse_jsonc, ParseError};

/// Settings, a parse error, or nothing at all.
pub type SettingsOrError<T> = Option<Result<T, ParseError>>;

/// Kind of entity that holds settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Org,
    Site,
}

/// Something that can have settings associated with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// Unique identifier for this subject.
    pub id: String,

    pub kind: SubjectKind,

    #[serde(default)]
    pub display_name: String,
}

impl Subject {
    pub fn new(id: impl Into<String>, kind: SubjectKind, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            display_name: display_name.into(),
        }
    }
}

/// A keyed settings document. Only the `extensions` key is interpreted.
///
/// Equality takes key order into account: the order of `extensions` decides
/// the order of configured extensions, so a reordering is a real change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(Map<String, Value>);

impl PartialEq for Settings {
    fn eq(&self, other: &Self) -> bool {
        same_entries(&self.0, &other.0)
    }
}

fn same_entries(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|((ka, va), (kb, vb))| ka == kb && same_value(va, vb))
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => same_entries(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| same_value(a, b))
        }
        _ => a == b,
    }
}

impl Settings {
    /// Key holding per-extension settings.
    pub const EXTENSIONS_KEY: &'static str = "extensions";

    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Build settings from a parsed document. `null` is treated as empty settings.
    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(ParseError::new(format!(
                "Settings must be a JSON object (got {})",
                json_type_name(&other)
            ))),
        }
    }

    /// Parse a raw settings document.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Self::from_value(parse_jsonc(text)?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The `extensions` map, in document order. Non-object values count as absent.
    pub fn extensions(&self) -> Option<&Map<String, Value>> {
        self.0.get(Self::EXTENSIONS_KEY).and_then(Value::as_object)
    }

    /// Settings for one extension, if an entry exists for it (whatever its value).
    pub fn extension(&self, extension_id: &str) -> Option<ExtensionSettings> {
        self.extensions()
            .and_then(|exts| exts.get(extension_id))
            .map(|v| ExtensionSettings(v.clone()))
    }

    /// Extension ids listed under `extensions`, in document order.
    pub fn extension_ids(&self) -> Vec<String> {
        self.extensions()
            .map(|exts| exts.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Settings for a single extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionSettings(Value);

impl ExtensionSettings {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Whether the reserved `disabled` key is `true`.
    pub fn is_disabled(&self) -> bool {
        self.0.get("disabled").and_then(Value::as_bool) == Some(true)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// A subject and its settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredSubject {
    pub subject: Subject,

    /// The subject's settings, a parse error, or `None` if it has none.
    pub settings: SettingsOrError<Settings>,
}

/// Subjects from lowest to highest precedence, and their merged settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Cascade {
    pub subjects: Vec<ConfiguredSubject>,

    /// The merged settings, an error, or `None` if no subject has settings.
    pub merged: SettingsOrError<Settings>,
}

impl Cascade {
    /// The subject whose settings win over all others.
    pub fn highest_precedence(&self) -> Option<&Subject> {
        self.subjects.last().map(|s| &s.subject)
    }

    pub fn subject(&self, id: &str) -> Option<&Subject> {
        self.subjects
            .iter()
            .map(|s| &s.subject)
            .find(|subject| subject.id == id)
    }

    /// The merged settings error, if merging or parsing failed.
    pub fn merged_error(&self) -> Option<&ParseError> {
        match &self.merged {
            Some(Err(e)) => Some(e),
            _ => None,
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
