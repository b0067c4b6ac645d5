use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;
use crate::schema::Schema;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMemory {
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelMemory {
    #[serde(default)]
    pub seen: u32,
    #[serde(default)]
    pub fields: IndexMap<String, FieldMemory>,
}

/// Persisted per-label state: documents seen and confirmed value boxes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionMemory(IndexMap<String, LabelMemory>);

impl ExtractionMemory {
    pub fn labels(&self) -> impl Iterator<Item = (&String, &LabelMemory)> {
        self.0.iter()
    }

    pub fn label(&self, label: &str) -> Option<&LabelMemory> {
        self.0.get(label)
    }

    pub fn seen(&self, label: &str) -> u32 {
        self.0.get(label).map(|m| m.seen).unwrap_or(0)
    }

    pub fn increment_seen(&mut self, label: &str) -> u32 {
        let entry = self.0.entry(label.to_string()).or_default();
        entry.seen = entry.seen.saturating_add(1);
        entry.seen
    }

    pub fn initialize(&mut self, label: &str, schema: &Schema) {
        let entry = self.0.entry(label.to_string()).or_default();
        for field in schema.fields() {
            entry.fields.entry(field.to_string()).or_default();
        }
    }

    pub fn push_box(&mut self, label: &str, field: &str, bbox: BoundingBox) {
        self.0
            .entry(label.to_string())
            .or_default()
            .fields
            .entry(field.to_string())
            .or_default()
            .boxes
            .push(bbox);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
