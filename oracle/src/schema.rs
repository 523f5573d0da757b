//! Per-source record schemas.
//!
//! A schema lists the fields a record of a given source must carry and
//! classifies each one for ground-truth comparison:
//!
//! - **Identity**: must match exactly (ids, addresses, authors, bodies)
//! - **Volatile**: numeric, may drift a little (prices)
//! - **Estimate**: numeric, may drift more (model estimates)
//! - **Status**: may move forward along an allowed transition list
//! - **Informational**: carried but never compared

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

use claims::DataSource;

/// How a field is compared against ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    Identity,
    Volatile,
    Estimate,
    Status,
    Informational,
}

/// Expected JSON type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Bool,
    /// Any non-null value
    Any,
}

impl FieldKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Any => !value.is_null(),
        }
    }
}

/// One field of a record schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub class: FieldClass,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: &str, class: FieldClass, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            class,
            kind,
            required: true,
        }
    }

    pub fn optional(name: &str, class: FieldClass, kind: FieldKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, class, kind)
        }
    }
}

/// Allowed status moves between scrape time and verification time.
///
/// Staying in the same status is always allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransitions {
    allowed: BTreeSet<(String, String)>,
}

impl StatusTransitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, from: &str, to: &str) -> Self {
        self.allowed
            .insert((normalize_status(from), normalize_status(to)));
        self
    }

    /// Whether a record claimed in `from` may legitimately be observed in `to`.
    pub fn allows(&self, from: &str, to: &str) -> bool {
        let from = normalize_status(from);
        let to = normalize_status(to);
        from == to || self.allowed.contains(&(from, to))
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

fn normalize_status(status: &str) -> String {
    status
        .trim()
        .to_lowercase()
        .replace(|c: char| c == ' ' || c == '-', "_")
}

/// Field layout of one source's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub source: DataSource,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub status_transitions: StatusTransitions,
}

impl RecordSchema {
    pub fn new(source: DataSource, fields: Vec<FieldSpec>) -> Self {
        Self {
            source,
            fields,
            status_transitions: StatusTransitions::new(),
        }
    }

    pub fn with_transitions(mut self, transitions: StatusTransitions) -> Self {
        self.status_transitions = transitions;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check that required fields are present and every present field has
    /// the expected type. Returns a description of the first problem.
    pub fn check_structure(&self, record: &Map<String, Value>) -> Result<(), String> {
        for spec in &self.fields {
            match record.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(format!("missing required field '{}'", spec.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.matches(value) => {
                    return Err(format!(
                        "field '{}' expected {:?}, got {}",
                        spec.name,
                        spec.kind,
                        json_type_name(value)
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Schemas for every recognized source.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    schemas: HashMap<DataSource, RecordSchema>,
}

impl SchemaCatalog {
    /// An empty catalog.
    pub fn empty() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    pub fn insert(&mut self, schema: RecordSchema) {
        self.schemas.insert(schema.source, schema);
    }

    pub fn with_schema(mut self, schema: RecordSchema) -> Self {
        self.insert(schema);
        self
    }

    pub fn get(&self, source: DataSource) -> Option<&RecordSchema> {
        self.schemas.get(&source)
    }

    fn zillow() -> RecordSchema {
        use FieldClass::*;
        RecordSchema::new(
            DataSource::Zillow,
            vec![
                FieldSpec::required("zpid", Identity, FieldKind::Any),
                FieldSpec::required("address", Identity, FieldKind::String),
                FieldSpec::required("property_type", Identity, FieldKind::String),
                FieldSpec::optional("bedrooms", Identity, FieldKind::Number),
                FieldSpec::required("price", Volatile, FieldKind::Number),
                FieldSpec::optional("zestimate", Estimate, FieldKind::Number),
                FieldSpec::optional("rent_zestimate", Estimate, FieldKind::Number),
                FieldSpec::required("status", Status, FieldKind::String),
                FieldSpec::optional("days_on_market", Informational, FieldKind::Number),
            ],
        )
        .with_transitions(
            StatusTransitions::new()
                .allow("for_sale", "pending")
                .allow("for_sale", "sold")
                .allow("for_sale", "off_market")
                .allow("pending", "sold")
                .allow("pending", "for_sale")
                .allow("for_rent", "off_market"),
        )
    }

    fn reddit() -> RecordSchema {
        use FieldClass::*;
        RecordSchema::new(
            DataSource::Reddit,
            vec![
                FieldSpec::required("id", Identity, FieldKind::String),
                FieldSpec::required("community", Identity, FieldKind::String),
                FieldSpec::required("username", Identity, FieldKind::String),
                FieldSpec::required("body", Identity, FieldKind::String),
                FieldSpec::required("data_type", Identity, FieldKind::String),
                FieldSpec::optional("title", Identity, FieldKind::String),
                FieldSpec::optional("score", Informational, FieldKind::Number),
            ],
        )
    }

    fn x() -> RecordSchema {
        use FieldClass::*;
        RecordSchema::new(
            DataSource::X,
            vec![
                FieldSpec::required("tweet_id", Identity, FieldKind::String),
                FieldSpec::required("username", Identity, FieldKind::String),
                FieldSpec::required("text", Identity, FieldKind::String),
                FieldSpec::optional("like_count", Informational, FieldKind::Number),
            ],
        )
    }

    fn youtube() -> RecordSchema {
        use FieldClass::*;
        RecordSchema::new(
            DataSource::Youtube,
            vec![
                FieldSpec::required("video_id", Identity, FieldKind::String),
                FieldSpec::required("channel_id", Identity, FieldKind::String),
                FieldSpec::required("title", Identity, FieldKind::String),
                FieldSpec::optional("transcript", Informational, FieldKind::Any),
                FieldSpec::optional("view_count", Informational, FieldKind::Number),
            ],
        )
    }
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        Self::empty()
            .with_schema(Self::zillow())
            .with_schema(Self::reddit())
            .with_schema(Self::x())
            .with_schema(Self::youtube())
    }
}
