//! `StructuredValue`: a value that is simultaneously a canonical text
//! rendering and a typed data projection (§3.3).
//!
//! Unlike a general-purpose runtime value representing everything a
//! language can compute, a `StructuredValue` is strictly a boundary type: it
//! exists so that command output, file content, and pipeline stage results
//! can be displayed *and* field-accessed without the caller having to
//! choose one interpretation up front.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::security::SecurityDescriptor;

/// The wire/data format a `StructuredValue`'s `data` side was parsed from (or
/// will serialize back to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredValueType {
    Text,
    Json,
    Yaml,
    Csv,
    Toml,
    Xml,
    Html,
    Markdown,
}

/// The structured projection. `Null`/`Bool`/`Number`/`String` mirror JSON's
/// scalar set since every supported format (yaml, toml, csv-as-rows, ...)
/// reduces to it; `Array`/`Object` give field access and iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<DataValue>),
    Object(IndexMap<String, DataValue>),
}

impl DataValue {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&DataValue> {
        match self {
            Self::Object(map) => map.get(name),
            _ => None,
        }
    }

    #[must_use]
    pub fn index(&self, i: usize) -> Option<&DataValue> {
        match self {
            Self::Array(items) => items.get(i),
            _ => None,
        }
    }

    #[must_use]
    pub fn length(&self) -> Option<usize> {
        match self {
            Self::Array(items) => Some(items.len()),
            Self::String(s) => Some(s.chars().count()),
            Self::Object(map) => Some(map.len()),
            _ => None,
        }
    }

    /// `String(x)` / `JSON.stringify(x)` for raw objects; `""` for null.
    /// Mirrors the text projection rule in §4.3 step 5 for values that never
    /// went through a `StructuredValue` wrapper.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Self::String(s) => s.clone(),
            Self::Array(_) | Self::Object(_) => serde_json::to_string(&self.to_json()).unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(DataValue::to_json).collect()),
            Self::Object(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
        }
    }

    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::Array(items.iter().map(DataValue::from_json).collect()),
            serde_json::Value::Object(map) => {
                Self::Object(map.iter().map(|(k, v)| (k.clone(), DataValue::from_json(v))).collect())
            }
        }
    }
}

/// Free-form metadata: filename, file path, glob info, row count, etc.
pub type StructuredMetadata = BTreeMap<String, String>;

/// A value that is simultaneously a canonical text rendering (`text`) and a
/// structured data projection (`data`). The internal brand (§3.3
/// `isStructuredValue`) is inherent: this is a distinct type, not a marker on
/// a generic container, so "is this a StructuredValue" is just a pattern
/// match rather than a runtime tag check.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredValue {
    pub text: Arc<str>,
    pub data: DataValue,
    pub value_type: StructuredValueType,
    pub mx: SecurityDescriptor,
    pub metadata: StructuredMetadata,
}

impl StructuredValue {
    #[must_use]
    pub fn new(text: impl Into<Arc<str>>, data: DataValue, value_type: StructuredValueType, mx: SecurityDescriptor) -> Self {
        Self { text: text.into(), data, value_type, mx, metadata: StructuredMetadata::new() }
    }

    /// Wraps a plain string with no structured projection beyond itself.
    #[must_use]
    pub fn text(s: impl Into<Arc<str>>, mx: SecurityDescriptor) -> Self {
        let text = s.into();
        Self::new(text.clone(), DataValue::String(text.to_string()), StructuredValueType::Text, mx)
    }

    /// Automatic JSON detection (§4.2 `executeCommand`): if `raw` parses as
    /// JSON, wrap as `json`; otherwise fall back to plain text.
    #[must_use]
    pub fn auto_detect(raw: impl Into<Arc<str>>, mx: SecurityDescriptor) -> Self {
        let raw = raw.into();
        match serde_json::from_str::<serde_json::Value>(raw.trim()) {
            Ok(json) => Self::new(raw, DataValue::from_json(&json), StructuredValueType::Json, mx),
            Err(_) => Self::text(raw, mx),
        }
    }

    /// Format-aware parsing keyed off a file extension (§4.4.1 component
    /// table "content loader applies... JSON auto-parse", generalized to the
    /// rest of `structuredValueType`'s declared formats). Falls back to
    /// [`Self::auto_detect`] for an unrecognized or absent extension, so a
    /// `.txt`/extensionless load still gets the JSON-or-text behavior.
    #[must_use]
    pub fn from_path(path: &str, raw: impl Into<Arc<str>>, mx: SecurityDescriptor) -> Self {
        let raw = raw.into();
        let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => match serde_yaml::from_str::<serde_yaml::Value>(&raw) {
                Ok(value) => Self::new(raw, DataValue::from_json(&yaml_to_json(&value)), StructuredValueType::Yaml, mx),
                Err(_) => Self::text(raw, mx),
            },
            "toml" => match raw.parse::<toml_edit::DocumentMut>() {
                Ok(doc) => {
                    let json = toml_document_to_json(&doc);
                    Self::new(raw, DataValue::from_json(&json), StructuredValueType::Toml, mx)
                }
                Err(_) => Self::text(raw, mx),
            },
            "csv" => match csv_to_rows(&raw) {
                Some(rows) => Self::new(raw, rows, StructuredValueType::Csv, mx),
                None => Self::text(raw, mx),
            },
            "xml" => match quick_xml::de::from_str::<serde_json::Value>(&raw) {
                Ok(json) => Self::new(raw, DataValue::from_json(&json), StructuredValueType::Xml, mx),
                Err(_) => Self::new(raw.clone(), DataValue::String(raw.to_string()), StructuredValueType::Xml, mx),
            },
            "html" => Self::new(raw.clone(), DataValue::String(raw.to_string()), StructuredValueType::Html, mx),
            "md" | "markdown" => Self::new(raw.clone(), DataValue::String(raw.to_string()), StructuredValueType::Markdown, mx),
            _ => Self::auto_detect(raw, mx),
        }
    }

    /// `asText(sv)`: always returns the canonical text without re-serializing.
    #[must_use]
    pub fn as_text(&self) -> &str {
        &self.text
    }

    /// `asData(sv)`: always returns the structured projection.
    #[must_use]
    pub fn as_data(&self) -> &DataValue {
        &self.data
    }

    /// Field access on a `StructuredValue` is field access on `data`,
    /// yielding a new value whose `mx` merges parent and field (§3.3).
    /// Returns `StructuredValue` for nested objects/arrays, a scalar
    /// `DataValue` otherwise — callers decide how to re-wrap.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<StructuredValue> {
        let field_value = self.data.field(name)?.clone();
        Some(self.rewrap(field_value))
    }

    #[must_use]
    pub fn index(&self, i: usize) -> Option<StructuredValue> {
        let item = self.data.index(i)?.clone();
        Some(self.rewrap(item))
    }

    fn rewrap(&self, value: DataValue) -> StructuredValue {
        let text = value.to_display_string();
        Self::new(text, value, StructuredValueType::Json, self.mx.clone())
    }
}

fn yaml_to_json(value: &serde_yaml::Value) -> serde_json::Value {
    match value {
        serde_yaml::Value::Null => serde_json::Value::Null,
        serde_yaml::Value::Bool(b) => serde_json::Value::Bool(*b),
        serde_yaml::Value::Number(n) => n
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        serde_yaml::Value::String(s) => serde_json::Value::String(s.clone()),
        serde_yaml::Value::Sequence(items) => serde_json::Value::Array(items.iter().map(yaml_to_json).collect()),
        serde_yaml::Value::Mapping(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                if let Some(key) = k.as_str() {
                    obj.insert(key.to_string(), yaml_to_json(v));
                }
            }
            serde_json::Value::Object(obj)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

fn toml_document_to_json(doc: &toml_edit::DocumentMut) -> serde_json::Value {
    toml_item_to_json(doc.as_item())
}

fn toml_item_to_json(item: &toml_edit::Item) -> serde_json::Value {
    match item {
        toml_edit::Item::None => serde_json::Value::Null,
        toml_edit::Item::Value(v) => toml_value_to_json(v),
        toml_edit::Item::Table(t) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in t.iter() {
                obj.insert(k.to_string(), toml_item_to_json(v));
            }
            serde_json::Value::Object(obj)
        }
        toml_edit::Item::ArrayOfTables(arr) => serde_json::Value::Array(arr.iter().map(|t| toml_item_to_json(&toml_edit::Item::Table(t.clone()))).collect()),
    }
}

fn toml_value_to_json(value: &toml_edit::Value) -> serde_json::Value {
    match value {
        toml_edit::Value::String(s) => serde_json::Value::String(s.value().clone()),
        toml_edit::Value::Integer(i) => serde_json::Value::Number((*i.value()).into()),
        toml_edit::Value::Float(f) => serde_json::Number::from_f64(*f.value()).map_or(serde_json::Value::Null, serde_json::Value::Number),
        toml_edit::Value::Boolean(b) => serde_json::Value::Bool(*b.value()),
        toml_edit::Value::Datetime(dt) => serde_json::Value::String(dt.value().to_string()),
        toml_edit::Value::Array(arr) => serde_json::Value::Array(arr.iter().map(toml_value_to_json).collect()),
        toml_edit::Value::InlineTable(table) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in table.iter() {
                obj.insert(k.to_string(), toml_value_to_json(v));
            }
            serde_json::Value::Object(obj)
        }
    }
}

/// Parses CSV text into an array of row objects keyed by header, mirroring
/// how a tabular format is expected to field-access (`@rows[0].name`).
fn csv_to_rows(raw: &str) -> Option<DataValue> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(raw.as_bytes());
    let headers = reader.headers().ok()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.ok()?;
        let mut row = IndexMap::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), DataValue::String(field.to_string()));
        }
        rows.push(DataValue::Object(row));
    }
    Some(DataValue::Array(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn auto_detect_parses_valid_json_as_data() {
        let sv = StructuredValue::auto_detect(r#"{"topic":"x"}"#, SecurityDescriptor::empty());
        assert_eq!(sv.value_type, StructuredValueType::Json);
        assert_eq!(sv.field("topic").unwrap().as_text(), "x");
    }

    #[test]
    fn auto_detect_falls_back_to_text_on_non_json() {
        let sv = StructuredValue::auto_detect("hello world", SecurityDescriptor::empty());
        assert_eq!(sv.value_type, StructuredValueType::Text);
        assert_eq!(sv.as_text(), "hello world");
    }

    #[test]
    fn as_text_never_reserializes() {
        let sv = StructuredValue::auto_detect(r#"{ "a" : 1 }"#, SecurityDescriptor::empty());
        assert_eq!(sv.as_text(), r#"{ "a" : 1 }"#);
    }

    #[test]
    fn field_access_merges_descriptors() {
        let mx = SecurityDescriptor::with_taint(["src:file"]);
        let sv = StructuredValue::auto_detect(r#"{"topic":"x"}"#, mx);
        let field = sv.field("topic").unwrap();
        assert!(field.mx.taint.contains("src:file"));
    }

    #[test]
    fn field_access_on_missing_key_returns_none() {
        let sv = StructuredValue::auto_detect(r#"{"topic":"x"}"#, SecurityDescriptor::empty());
        assert!(sv.field("missing").is_none());
    }

    #[test]
    fn from_path_parses_yaml_by_extension() {
        let sv = StructuredValue::from_path("config.yaml", "topic: x\ncount: 2\n", SecurityDescriptor::empty());
        assert_eq!(sv.value_type, StructuredValueType::Yaml);
        assert_eq!(sv.field("topic").unwrap().as_text(), "x");
    }

    #[test]
    fn from_path_parses_toml_by_extension() {
        let sv = StructuredValue::from_path("config.toml", "topic = \"x\"\ncount = 2\n", SecurityDescriptor::empty());
        assert_eq!(sv.value_type, StructuredValueType::Toml);
        assert_eq!(sv.field("topic").unwrap().as_text(), "x");
    }

    #[test]
    fn from_path_parses_csv_rows_keyed_by_header() {
        let sv = StructuredValue::from_path("rows.csv", "name,age\nava,9\nben,12\n", SecurityDescriptor::empty());
        assert_eq!(sv.value_type, StructuredValueType::Csv);
        assert_eq!(sv.index(0).unwrap().field("name").unwrap().as_text(), "ava");
        assert_eq!(sv.index(1).unwrap().field("age").unwrap().as_text(), "12");
    }

    #[test]
    fn from_path_falls_back_to_auto_detect_for_unknown_extension() {
        let sv = StructuredValue::from_path("notes.txt", r#"{"a":1}"#, SecurityDescriptor::empty());
        assert_eq!(sv.value_type, StructuredValueType::Json);
    }

    #[test]
    fn from_path_malformed_yaml_falls_back_to_text() {
        let sv = StructuredValue::from_path("bad.yaml", "key: [unterminated", SecurityDescriptor::empty());
        assert_eq!(sv.value_type, StructuredValueType::Text);
    }
}
