use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// Field name -> human readable description, in declaration order. The
/// description is only a hint for the extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(IndexMap<String, String>);

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, description: impl Into<String>) {
        self.0.insert(field.into(), description.into());
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Schema {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

/// Per-field outcome of one document; `None` marks a field nothing could fill.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionResult(IndexMap<String, Option<FieldValue>>);

impl ExtractionResult {
    pub fn all_null(schema: &Schema) -> Self {
        Self(schema.fields().map(|f| (f.to_string(), None)).collect())
    }

    pub fn set(&mut self, field: impl Into<String>, value: Option<FieldValue>) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field).and_then(|v| v.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&FieldValue>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reshapes to exactly the schema's fields, in schema order.
    pub fn conform(mut self, schema: &Schema) -> Self {
        Self(
            schema
                .fields()
                .map(|f| (f.to_string(), self.0.swap_remove(f).flatten()))
                .collect(),
        )
    }

    /// Share of schema fields without a value; 0 for an empty schema.
    pub fn null_ratio(&self, schema: &Schema) -> f64 {
        if schema.is_empty() {
            return 0.0;
        }
        let nulls = schema.fields().filter(|f| self.get(f).is_none()).count();
        nulls as f64 / schema.len() as f64
    }

    /// Values only, with page and box metadata stripped.
    pub fn values(&self) -> IndexMap<String, Option<String>> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.as_ref().map(|fv| fv.value.clone())))
            .collect()
    }
}
